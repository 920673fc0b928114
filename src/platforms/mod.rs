//! Thin clients for the platforms a pipeline provisions against.

pub mod central;
pub mod cluster;
pub mod json;
