//! Prefix command parsing.
//!
//! Turns the raw text of a [`ChatEvent`](warden_core::ChatEvent) into a
//! command name plus positional arguments:
//!
//! ```text
//! "!Sticker  crop   round"   (prefix "!")
//!  └─┬──┘    └──┬───────┘
//!   name      args = ["crop", "round"]
//!  "sticker"
//! ```

/// A command extracted from message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// The prefix the message started with.
    pub prefix: String,
    /// Lower-cased command name as typed (may be an alias).
    pub name: String,
    /// Positional arguments, split on runs of whitespace.
    pub args: Vec<String>,
}

impl ParsedCommand {
    /// Parses `text` as a command invocation.
    ///
    /// Returns `None` when the text does not start with `prefix` or when no
    /// command name follows it.
    pub fn parse(text: &str, prefix: &str) -> Option<Self> {
        let rest = text.strip_prefix(prefix)?;
        let mut tokens = rest.split_whitespace();
        let name = tokens.next()?.to_lowercase();

        Some(Self {
            prefix: prefix.to_string(),
            name,
            args: tokens.map(str::to_string).collect(),
        })
    }

    /// Returns the invocation as the user typed it, e.g. `!sticker`.
    pub fn invocation(&self) -> String {
        format!("{}{}", self.prefix, self.name)
    }

    /// Returns the arguments joined by single spaces.
    pub fn rest(&self) -> String {
        self.args.join(" ")
    }
}
