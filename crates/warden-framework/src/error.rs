//! Error types for the dispatch core.
//!
//! | Error | Raised by | Policy |
//! |-------|-----------|--------|
//! | [`LoadError`] | registry | recoverable: recorded, batch continues |
//! | [`AdmissionError`] | admission queue | user is told the system is busy |
//! | [`ValidationError`] | argument validator | usage message sent to the user |
//! | [`DispatchError`] | dispatch engine | surfaced to the originating chat |
//! | [`CommandError`] | handler bodies | carries an optional user-facing message |
//!
//! Alias conflicts are warnings, not errors; see
//! [`RegistryConflict`](crate::registry::RegistryConflict).

use std::time::Duration;

use thiserror::Error;

/// Returned when a handler definition cannot be registered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The canonical name is empty.
    #[error("handler definition has an empty name")]
    EmptyName,

    /// The canonical name contains whitespace and could never be typed.
    #[error("handler name '{name}' contains whitespace")]
    InvalidName {
        /// The offending name.
        name: String,
    },

    /// No executable body was attached.
    #[error("handler '{name}' has no executable body")]
    MissingBody {
        /// The handler missing its body.
        name: String,
    },

    /// An alias is empty or contains whitespace.
    #[error("handler '{name}' declares an invalid alias '{alias}'")]
    InvalidAlias {
        /// The handler declaring the alias.
        name: String,
        /// The offending alias.
        alias: String,
    },

    /// The declared cooldown exceeds [`MAX_COOLDOWN_SECS`](crate::cooldown::MAX_COOLDOWN_SECS).
    #[error("handler '{name}' declares a cooldown of {secs}s, above the {max}s limit")]
    CooldownTooLong {
        /// The handler declaring the cooldown.
        name: String,
        /// The declared cooldown.
        secs: u64,
        /// The accepted maximum.
        max: u64,
    },

    /// The argument rules can never be satisfied.
    #[error("handler '{name}' has inconsistent argument rules: {reason}")]
    InvalidRules {
        /// The handler declaring the rules.
        name: String,
        /// What is wrong with them.
        reason: String,
    },

    /// A hot-reload source could not produce a definition.
    #[error("failed to load handler from '{source_path}': {reason}")]
    Source {
        /// The file or source identifier.
        source_path: String,
        /// Reason for failure.
        reason: String,
    },
}

impl LoadError {
    /// Creates a source error.
    pub fn from_source(source_path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Source {
            source_path: source_path.into(),
            reason: reason.into(),
        }
    }
}

/// Failure to hand a task to the admission queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// The queue was closed (engine shutting down).
    #[error("admission queue '{queue}' is closed")]
    Closed {
        /// The queue that rejected the task.
        queue: String,
    },
}

/// A failed argument check: the short reason plus the full usage message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct ValidationError {
    /// The failing check, e.g. `Number must be at most 100.`
    pub reason: String,
    /// The message to send to the user.
    pub message: String,
}

/// Errors produced while dispatching a single inbound event.
///
/// Every variant is surfaced to the originating chat with a non-leaking
/// message; the full detail only goes to the log.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// The user invoked the handler again before its cooldown elapsed.
    #[error("handler is on cooldown for another {remaining_secs}s")]
    CooldownActive {
        /// Seconds remaining, rounded up.
        remaining_secs: u64,
    },

    /// A guard stopped the pipeline.
    #[error("rejected by guard '{guard}'")]
    GuardRejected {
        /// Name of the rejecting guard.
        guard: String,
    },

    /// Argument validation failed.
    #[error("invalid arguments: {0}")]
    Validation(String),

    /// The handler body returned an error or panicked.
    #[error("handler execution failed: {0}")]
    Execution(String),

    /// The handler body exceeded the execution deadline.
    #[error("handler execution timed out after {0:?}")]
    Timeout(Duration),

    /// The task could not be admitted.
    #[error(transparent)]
    Admission(#[from] AdmissionError),
}

/// Error type handler bodies may return to control what the user sees.
///
/// Any other error type is reported with the engine's generic failure text.
///
/// ```rust,ignore
/// async fn kick(inv: Invocation) -> Result<(), BoxError> {
///     let target = inv.event.mentions.first()
///         .ok_or_else(|| CommandError::user("Mention the member to remove."))?;
///     // …
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Error)]
#[error("{detail}")]
pub struct CommandError {
    detail: String,
    user_message: Option<String>,
}

impl CommandError {
    /// An error whose message is safe to show to the user verbatim.
    pub fn user(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            detail: message.clone(),
            user_message: Some(message),
        }
    }

    /// An internal error; the user only sees the generic failure text.
    pub fn internal(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
            user_message: None,
        }
    }

    /// Attaches a user-facing message to an internal error.
    pub fn with_user_message(mut self, message: impl Into<String>) -> Self {
        self.user_message = Some(message.into());
        self
    }

    /// Returns the message intended for the user, if any.
    pub fn user_message(&self) -> Option<&str> {
        self.user_message.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_user_message() {
        let err = CommandError::user("Reply to an image.");
        assert_eq!(err.user_message(), Some("Reply to an image."));
        assert_eq!(err.to_string(), "Reply to an image.");

        let internal = CommandError::internal("ffmpeg exited with 1");
        assert!(internal.user_message().is_none());
        assert_eq!(internal.to_string(), "ffmpeg exited with 1");
    }

    #[test]
    fn test_validation_error_displays_reason_only() {
        let err = ValidationError {
            reason: "Number must be at most 100.".into(),
            message: "Number must be at most 100.\n\nUsage: !volume <level>".into(),
        };
        assert_eq!(err.to_string(), "Number must be at most 100.");
    }

    #[test]
    fn test_admission_error_converts_into_dispatch_error() {
        let err: DispatchError = AdmissionError::Closed {
            queue: "global".into(),
        }
        .into();
        assert!(matches!(err, DispatchError::Admission(_)));
        assert_eq!(err.to_string(), "admission queue 'global' is closed");
    }
}
