use console::Term;
use std::io;

/// Source of operator-typed values. The resolver only calls it for required
/// credentials that no other source could provide.
pub trait Prompter: Send + Sync {
    fn prompt(&self, key: &str, secret: bool) -> io::Result<String>;
}

/// Prompts on the terminal's stderr so stdout stays clean for reports.
pub struct ConsolePrompter {
    term: Term,
}

impl ConsolePrompter {
    pub fn new() -> Self {
        Self {
            term: Term::stderr(),
        }
    }
}

impl Default for ConsolePrompter {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompter for ConsolePrompter {
    fn prompt(&self, key: &str, secret: bool) -> io::Result<String> {
        if !self.term.is_term() {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "stderr is not a terminal",
            ));
        }
        self.term.write_str(&format!("Enter {key}: "))?;
        let line = if secret {
            self.term.read_secure_line()?
        } else {
            self.term.read_line()?
        };
        Ok(line.trim().to_string())
    }
}
