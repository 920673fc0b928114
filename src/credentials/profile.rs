use log::info;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::auth::Token;
use crate::error::{ProvisionError, Result};

/// A shell profile (e.g. `~/.bashrc`) used as persisted credential storage.
///
/// Only `export KEY=value` lines are read; everything else in the file is
/// left alone, including when a value is persisted.
#[derive(Debug, Clone)]
pub struct ShellProfile {
    path: PathBuf,
}

impl ShellProfile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.bashrc`, if a home directory can be determined.
    pub fn default_location() -> Option<Self> {
        dirs::home_dir().map(|home| Self::new(home.join(".bashrc")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All exported variables. Later exports of the same key win.
    pub fn exports(&self) -> Result<HashMap<String, String>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(contents.lines().filter_map(parse_export).collect())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.exports()?.remove(key))
    }

    /// Write `export KEY="value"`, replacing earlier exports of the same key.
    pub fn persist(&self, key: &str, value: &Token) -> Result<()> {
        if !is_valid_key(key) {
            return Err(ProvisionError::Config(format!(
                "{key} is not a valid shell variable name"
            )));
        }

        let existing = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let line = format!("export {key}=\"{}\"", escape(value.as_str()));
        let mut replaced = false;
        let mut lines: Vec<String> = Vec::new();
        for current in existing.lines() {
            match parse_export(current) {
                Some((k, _)) if k == key => {
                    if !replaced {
                        lines.push(line.clone());
                        replaced = true;
                    }
                }
                _ => lines.push(current.to_string()),
            }
        }
        if !replaced {
            lines.push(line);
        }

        let mut contents = lines.join("\n");
        contents.push('\n');
        fs::write(&self.path, contents)?;

        info!("Persisted {key}={value} to {}", self.path.display());
        Ok(())
    }
}

fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_export(line: &str) -> Option<(String, String)> {
    let rest = line.trim().strip_prefix("export")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let (key, raw) = rest.trim_start().split_once('=')?;
    if !is_valid_key(key) {
        return None;
    }
    Some((key.to_string(), unquote(raw.trim())))
}

/// A leading quoted segment ends at its closing quote and anything after it
/// (usually a comment) is dropped. Unquoted values stop at the first ` #`.
fn unquote(raw: &str) -> String {
    let mut chars = raw.chars();
    match chars.next() {
        Some('\'') => chars.take_while(|&c| c != '\'').collect(),
        Some('"') => {
            let mut out = String::new();
            while let Some(c) = chars.next() {
                match c {
                    '"' => break,
                    '\\' => {
                        if let Some(next) = chars.next() {
                            out.push(next);
                        }
                    }
                    _ => out.push(c),
                }
            }
            out
        }
        _ => raw
            .split(" #")
            .next()
            .unwrap_or_default()
            .trim_end()
            .to_string(),
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
