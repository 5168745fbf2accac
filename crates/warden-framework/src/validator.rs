//! Positional argument validation.
//!
//! A handler declares [`ArgumentRules`]; the validator evaluates them fresh
//! for every invocation. Checks run in a fixed order and the first failure
//! short-circuits:
//!
//! 1. fewer arguments than `min`
//! 2. more arguments than `max`
//! 3. each declared positional [`ArgType`], in order: an absent argument is
//!    skipped when the type is [`ArgType::Optional`] and rejected otherwise
//!
//! The rejection carries a formatted usage message (reason, invocation
//! syntax, examples) ready to be sent back to the user.
//!
//! ```rust,ignore
//! let rules = ArgumentRules::new()
//!     .min(1)
//!     .arg(ArgType::number_in(0.0, 100.0))
//!     .arg(ArgType::boolean().optional())
//!     .usage("<volume> [persist]");
//! ```

use std::fmt;

use url::Url;
use warden_core::ChatEvent;

use crate::error::ValidationError;

/// Tokens accepted as `true` by [`ArgType::Boolean`].
pub const TRUE_TOKENS: &[&str] = &["true", "yes", "1", "on"];

/// Tokens accepted as `false` by [`ArgType::Boolean`].
pub const FALSE_TOKENS: &[&str] = &["false", "no", "0", "off"];

/// Parses a boolean argument token, case-insensitively.
pub fn parse_boolean(token: &str) -> Option<bool> {
    let token = token.to_lowercase();
    if TRUE_TOKENS.contains(&token.as_str()) {
        Some(true)
    } else if FALSE_TOKENS.contains(&token.as_str()) {
        Some(false)
    } else {
        None
    }
}

// ─── ArgType ──────────────────────────────────────────────────────────────────

/// The expected type of one positional argument.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgType {
    /// A number, optionally bounded (inclusive).
    Number { min: Option<f64>, max: Option<f64> },
    /// The message must mention someone or quote a message.
    Mention,
    /// An absolute URL.
    Url,
    /// One of a fixed set of words, compared case-insensitively.
    Choice(Vec<String>),
    /// Free text with optional length bounds (in characters).
    Text {
        min_len: Option<usize>,
        max_len: Option<usize>,
    },
    /// One of [`TRUE_TOKENS`] or [`FALSE_TOKENS`].
    Boolean,
    /// The wrapped type, but the argument may be left out.
    Optional(Box<ArgType>),
}

impl ArgType {
    /// Any number.
    pub fn number() -> Self {
        Self::Number {
            min: None,
            max: None,
        }
    }

    /// A number within `min..=max`.
    pub fn number_in(min: f64, max: f64) -> Self {
        Self::Number {
            min: Some(min),
            max: Some(max),
        }
    }

    /// Any text.
    pub fn text() -> Self {
        Self::Text {
            min_len: None,
            max_len: None,
        }
    }

    /// Text whose length lies within `min_len..=max_len` characters.
    pub fn text_len(min_len: usize, max_len: usize) -> Self {
        Self::Text {
            min_len: Some(min_len),
            max_len: Some(max_len),
        }
    }

    /// One of the given choices.
    pub fn choice<I, S>(choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Choice(choices.into_iter().map(Into::into).collect())
    }

    /// A boolean token.
    pub fn boolean() -> Self {
        Self::Boolean
    }

    /// Wraps this type so the argument may be omitted.
    pub fn optional(self) -> Self {
        match self {
            Self::Optional(_) => self,
            other => Self::Optional(Box::new(other)),
        }
    }

    /// Returns `true` if the argument may be omitted.
    pub fn is_optional(&self) -> bool {
        matches!(self, Self::Optional(_))
    }

    /// Returns the type with any optional wrapper removed.
    pub fn inner(&self) -> &ArgType {
        match self {
            Self::Optional(inner) => inner.inner(),
            other => other,
        }
    }

    /// Checks a single present argument against this type.
    ///
    /// Returns the failure reason on rejection.
    pub fn check(&self, arg: &str, event: &ChatEvent) -> Result<(), String> {
        match self.inner() {
            Self::Number { min, max } => {
                let value = arg
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| format!("\"{arg}\" is not a valid number."))?;
                if let Some(min) = min
                    && value < *min
                {
                    return Err(format!("Number must be at least {min}."));
                }
                if let Some(max) = max
                    && value > *max
                {
                    return Err(format!("Number must be at most {max}."));
                }
                Ok(())
            }
            Self::Mention => {
                if event.mentions.is_empty() && !event.is_quoted() {
                    return Err("Mention someone or reply to their message.".to_string());
                }
                Ok(())
            }
            Self::Url => Url::parse(arg)
                .map(|_| ())
                .map_err(|_| format!("\"{arg}\" is not a valid URL.")),
            Self::Choice(choices) => {
                let lowered = arg.to_lowercase();
                if choices.iter().any(|c| c.to_lowercase() == lowered) {
                    Ok(())
                } else {
                    Err(format!("Valid choices: {}.", choices.join(", ")))
                }
            }
            Self::Text { min_len, max_len } => {
                let len = arg.chars().count();
                if let Some(min_len) = min_len
                    && len < *min_len
                {
                    return Err(format!("Text must be at least {min_len} characters."));
                }
                if let Some(max_len) = max_len
                    && len > *max_len
                {
                    return Err(format!("Text must be at most {max_len} characters."));
                }
                Ok(())
            }
            Self::Boolean => {
                if parse_boolean(arg).is_some() {
                    Ok(())
                } else {
                    let accepted: Vec<&str> =
                        TRUE_TOKENS.iter().chain(FALSE_TOKENS).copied().collect();
                    Err(format!("Use one of: {}.", accepted.join("/")))
                }
            }
            Self::Optional(inner) => inner.check(arg, event),
        }
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number { .. } => write!(f, "number"),
            Self::Mention => write!(f, "mention"),
            Self::Url => write!(f, "url"),
            Self::Choice(choices) => write!(f, "{}", choices.join("|")),
            Self::Text { .. } => write!(f, "text"),
            Self::Boolean => write!(f, "boolean"),
            Self::Optional(inner) => write!(f, "[{inner}]"),
        }
    }
}

// ─── ArgumentRules ────────────────────────────────────────────────────────────

/// Declarative positional-argument rules for a handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArgumentRules {
    /// Minimum number of arguments.
    pub min: Option<usize>,
    /// Maximum number of arguments.
    pub max: Option<usize>,
    /// Expected type per position.
    pub types: Vec<ArgType>,
    /// Argument syntax shown after the invocation, e.g. `<url> [quality]`.
    pub usage: Option<String>,
    /// One-line description shown in the usage message.
    pub description: Option<String>,
    /// Example argument lists shown in the usage message.
    pub examples: Vec<String>,
}

impl ArgumentRules {
    /// Creates an empty rule set (accepts anything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the minimum argument count.
    pub fn min(mut self, min: usize) -> Self {
        self.min = Some(min);
        self
    }

    /// Sets the maximum argument count.
    pub fn max(mut self, max: usize) -> Self {
        self.max = Some(max);
        self
    }

    /// Appends the expected type of the next position.
    pub fn arg(mut self, ty: ArgType) -> Self {
        self.types.push(ty);
        self
    }

    /// Sets the usage syntax. The invocation is prepended when rendering, so
    /// leave the command name out.
    pub fn usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = Some(usage.into());
        self
    }

    /// Sets the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds an example argument list.
    pub fn example(mut self, example: impl Into<String>) -> Self {
        self.examples.push(example.into());
        self
    }

    /// Returns why these rules can never be satisfied, if they can't.
    pub(crate) fn inconsistency(&self) -> Option<String> {
        if let (Some(min), Some(max)) = (self.min, self.max)
            && min > max
        {
            return Some(format!("min ({min}) is greater than max ({max})"));
        }
        if let Some(max) = self.max {
            let required = self.types.iter().filter(|t| !t.is_optional()).count();
            if required > max {
                return Some(format!(
                    "{required} required positions exceed max ({max})"
                ));
            }
        }
        None
    }

    /// Builds the usage message for a failed validation.
    pub fn usage_message(&self, invocation: &str, reason: &str) -> String {
        let mut msg = reason.to_string();

        let syntax = self.usage.clone().or_else(|| {
            (!self.types.is_empty()).then(|| {
                self.types
                    .iter()
                    .map(|t| match t {
                        ArgType::Optional(_) => t.to_string(),
                        _ => format!("<{t}>"),
                    })
                    .collect::<Vec<_>>()
                    .join(" ")
            })
        });
        if let Some(syntax) = syntax {
            msg.push_str(&format!("\n\nUsage:\n{invocation} {syntax}"));
        }

        if let Some(description) = &self.description {
            msg.push_str(&format!("\n\nDescription:\n{description}"));
        }

        if !self.examples.is_empty() {
            msg.push_str("\n\nExamples:");
            for (idx, example) in self.examples.iter().enumerate() {
                msg.push_str(&format!("\n{}. {invocation} {example}", idx + 1));
            }
        }

        msg
    }
}

// ─── Validation ───────────────────────────────────────────────────────────────

/// Validates `args` against `rules`.
///
/// `invocation` is the command as typed (e.g. `!volume`) and is only used to
/// render the usage message.
pub fn validate(
    rules: &ArgumentRules,
    invocation: &str,
    args: &[String],
    event: &ChatEvent,
) -> Result<(), ValidationError> {
    let reject = |reason: String| ValidationError {
        message: rules.usage_message(invocation, &reason),
        reason,
    };

    if let Some(min) = rules.min
        && args.len() < min
    {
        return Err(reject(format!("At least {min} argument(s) required.")));
    }

    if let Some(max) = rules.max
        && args.len() > max
    {
        return Err(reject(format!("At most {max} argument(s) allowed.")));
    }

    for (idx, ty) in rules.types.iter().enumerate() {
        match args.get(idx) {
            None if ty.is_optional() => continue,
            None => return Err(reject(format!("Argument {} is required.", idx + 1))),
            Some(arg) => ty.check(arg, event).map_err(reject)?,
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::QuotedMessage;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn event() -> ChatEvent {
        ChatEvent::new("u1", "c1", "")
    }

    #[test]
    fn test_number_rule() {
        let rules = ArgumentRules::new().min(1).arg(ArgType::number_in(0.0, 100.0));

        let err = validate(&rules, "!vol", &args(&["abc"]), &event()).unwrap_err();
        assert!(err.reason.contains("not a valid number"));

        assert!(validate(&rules, "!vol", &args(&["42"]), &event()).is_ok());

        let err = validate(&rules, "!vol", &args(&["500"]), &event()).unwrap_err();
        assert_eq!(err.reason, "Number must be at most 100.");
        assert!(err.message.contains("!vol <number>"));
    }

    #[test]
    fn test_count_checks_run_first() {
        let rules = ArgumentRules::new().min(2).max(3).arg(ArgType::number());

        let err = validate(&rules, "!x", &args(&["nope"]), &event()).unwrap_err();
        assert_eq!(err.reason, "At least 2 argument(s) required.");

        let err = validate(&rules, "!x", &args(&["1", "2", "3", "4"]), &event()).unwrap_err();
        assert_eq!(err.reason, "At most 3 argument(s) allowed.");
    }

    #[test]
    fn test_optional_and_required_positions() {
        let rules = ArgumentRules::new()
            .arg(ArgType::text())
            .arg(ArgType::boolean().optional());

        assert!(validate(&rules, "!x", &args(&["hello"]), &event()).is_ok());

        let err = validate(&rules, "!x", &[], &event()).unwrap_err();
        assert_eq!(err.reason, "Argument 1 is required.");

        let err = validate(&rules, "!x", &args(&["hello", "maybe"]), &event()).unwrap_err();
        assert!(err.reason.starts_with("Use one of: true/yes/1/on/false/no/0/off"));
        assert!(validate(&rules, "!x", &args(&["hello", "OFF"]), &event()).is_ok());
    }

    #[test]
    fn test_mention_accepts_quote() {
        let rules = ArgumentRules::new().arg(ArgType::Mention);

        let err = validate(&rules, "!kick", &args(&["@bob"]), &event()).unwrap_err();
        assert!(err.reason.contains("Mention someone"));

        let mentioned = event().with_mentions(["bob@s.whatsapp.net"]);
        assert!(validate(&rules, "!kick", &args(&["@bob"]), &mentioned).is_ok());

        let quoted = event().with_quoted(QuotedMessage::new("m1"));
        assert!(validate(&rules, "!kick", &args(&["x"]), &quoted).is_ok());
    }

    #[test]
    fn test_url_choice_and_text() {
        let rules = ArgumentRules::new()
            .arg(ArgType::Url)
            .arg(ArgType::choice(["low", "high"]))
            .arg(ArgType::text_len(2, 4));

        assert!(
            validate(&rules, "!dl", &args(&["https://a.b/c", "HIGH", "abc"]), &event()).is_ok()
        );

        let err = validate(&rules, "!dl", &args(&["not a url", "low", "abc"]), &event());
        assert!(err.unwrap_err().reason.contains("not a valid URL"));

        let err = validate(&rules, "!dl", &args(&["https://a.b", "mid", "abc"]), &event());
        assert_eq!(err.unwrap_err().reason, "Valid choices: low, high.");

        let err = validate(&rules, "!dl", &args(&["https://a.b", "low", "abcdef"]), &event());
        assert_eq!(
            err.unwrap_err().reason,
            "Text must be at most 4 characters."
        );
    }

    #[test]
    fn test_usage_message_layout() {
        let rules = ArgumentRules::new()
            .min(1)
            .usage("<url> [quality]")
            .description("Downloads a video.")
            .example("https://youtu.be/x")
            .example("https://youtu.be/x high");

        let err = validate(&rules, "!dl", &[], &event()).unwrap_err();
        assert_eq!(
            err.message,
            "At least 1 argument(s) required.\n\n\
             Usage:\n!dl <url> [quality]\n\n\
             Description:\nDownloads a video.\n\n\
             Examples:\n1. !dl https://youtu.be/x\n2. !dl https://youtu.be/x high"
        );
    }

    #[test]
    fn test_parse_boolean() {
        assert_eq!(parse_boolean("Yes"), Some(true));
        assert_eq!(parse_boolean("0"), Some(false));
        assert_eq!(parse_boolean("ya"), None);
    }

    #[test]
    fn test_inconsistent_rules() {
        assert!(ArgumentRules::new().min(3).max(1).inconsistency().is_some());
        let rules = ArgumentRules::new()
            .max(1)
            .arg(ArgType::number())
            .arg(ArgType::number());
        assert!(rules.inconsistency().is_some());
        assert!(ArgumentRules::new().min(1).max(1).inconsistency().is_none());
    }
}
