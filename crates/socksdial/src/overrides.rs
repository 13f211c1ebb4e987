//! A configuration source made of `-c` options from the command line.

use config::{ConfigError, Source, Value};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// A list of toml lines given on the command line, to be merged over
/// the configuration files.
///
/// Each line is one `key = value` assignment.  As a convenience, a value
/// that is a single bare word (`trace=true`, `connect.socks4_user_id=me`)
/// doesn't need to be quoted.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// The lines, in the order given.
    lines: Vec<String>,
}

impl Overrides {
    /// Return a new empty set of overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one `key = value` line.
    pub fn push<S: Into<String>>(&mut self, line: S) {
        self.lines.push(line.into());
    }

    /// Return all of our lines as one toml document.
    fn to_toml(&self) -> String {
        let mut doc = String::new();
        for line in &self.lines {
            match quote_bareword(line) {
                Some(quoted) => doc.push_str(&quoted),
                None => doc.push_str(line),
            }
            doc.push('\n');
        }
        doc
    }

    /// Rewrite a toml error message so that it names the offending option,
    /// not a line number in a document the user never saw.
    fn describe_error(&self, msg: &str, line_col: Option<(usize, usize)>) -> String {
        /// Matches the position suffix the toml crate adds to its errors.
        static POSITION: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"^(.*?) at line [0-9]+ column [0-9]+$").expect("Can't compile regex")
        });
        let msg = POSITION
            .captures(msg)
            .and_then(|c| c.get(1))
            .map_or(msg, |m| m.as_str());

        match line_col {
            Some((line, _)) if line < self.lines.len() => {
                format!("{} in option {:?}", msg, self.lines[line])
            }
            _ => format!("{} in command-line options", msg),
        }
    }
}

impl Source for Overrides {
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new(self.clone())
    }

    fn collect(&self) -> Result<HashMap<String, Value>, ConfigError> {
        let doc: toml::Value = toml::from_str(&self.to_toml())
            .map_err(|e| ConfigError::Message(self.describe_error(&e.to_string(), e.line_col())))?;
        doc.try_into().map_err(|e| ConfigError::Foreign(Box::new(e)))
    }
}

/// If `line` looks like `dotted.key = bareword`, return it with the
/// bareword quoted.
fn quote_bareword(line: &str) -> Option<String> {
    /// Matches an assignment whose value is one unquoted word.
    static BAREWORD: Lazy<Regex> = Lazy::new(|| {
        Regex::new(
            r#"(?x:
               ^ [\ \t]*
               # the key, possibly dotted
               ((?:[a-zA-Z0-9_\-]+\.)* [a-zA-Z0-9_\-]+)
               [\ \t]* = [\ \t]*
               # the value: letters, digits and underscores only
               ([a-zA-Z0-9_]+)
               [\ \t]* $)"#,
        )
        .expect("Can't compile regex")
    });

    BAREWORD
        .captures(line)
        .map(|c| format!("{}=\"{}\"", &c[1], &c[2]))
}
