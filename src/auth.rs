use std::fmt;

const VISIBLE_PREFIX: usize = 4;

/// A secret value such as an API token or password.
///
/// The full value is only reachable through [`Token::as_str`]. Formatting a
/// token, with either `{}` or `{:?}`, prints a short prefix and the length so
/// that log lines and reports never carry the secret itself.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn masked(&self) -> String {
        let len = self.0.chars().count();
        if len <= VISIBLE_PREFIX {
            return "****".to_string();
        }
        let prefix: String = self.0.chars().take(VISIBLE_PREFIX).collect();
        format!("{prefix}… ({len} chars)")
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self.masked())
    }
}
