//! Handler definitions, descriptors and executable bodies.
//!
//! A handler is authored as a [`HandlerDefinition`] (plain data plus one
//! executable entry point) and becomes an immutable [`HandlerDescriptor`]
//! once the registry has validated it:
//!
//! ```text
//! HandlerDefinition ──register()──▶ HandlerDescriptor (Arc, immutable)
//!        │                                │
//!   unchecked data                  replaced wholesale on reload
//! ```
//!
//! The body is a boxed tower service taking an [`Invocation`]. Most handlers
//! are written as async functions and wrapped with [`handler_fn`]:
//!
//! ```rust,ignore
//! use warden_framework::prelude::*;
//!
//! async fn ping(inv: Invocation) -> Result<(), BoxError> {
//!     inv.reply("pong").await?;
//!     Ok(())
//! }
//!
//! let def = HandlerDefinition::new("ping")
//!     .alias("p")
//!     .cooldown(5)
//!     .handler(handler_fn(ping));
//! ```

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tower::util::BoxCloneSyncService;
use tower::{BoxError, ServiceExt, service_fn};
use warden_core::{BoxedTransport, ChatEvent, MessageRef, TransportResult};

use crate::command::ParsedCommand;
use crate::cooldown::MAX_COOLDOWN_SECS;
use crate::error::LoadError;
use crate::validator::ArgumentRules;

/// The executable body of a handler.
pub type HandlerBody = BoxCloneSyncService<Invocation, (), BoxError>;

// ─── Invocation ───────────────────────────────────────────────────────────────

/// Everything a handler body receives for one execution.
#[derive(Clone)]
pub struct Invocation {
    /// Outbound capability of the session the event arrived on.
    pub transport: BoxedTransport,
    /// The inbound event.
    pub event: Arc<ChatEvent>,
    /// The parsed command (name as typed plus arguments).
    pub command: Arc<ParsedCommand>,
    /// Cancelled when the engine gives up on this execution (timeout or
    /// shutdown). Long-running bodies should check it at safe points.
    pub cancel: CancellationToken,
}

impl Invocation {
    /// Positional arguments.
    pub fn args(&self) -> &[String] {
        &self.command.args
    }

    /// Replies to the triggering event.
    pub async fn reply(&self, text: &str) -> TransportResult<MessageRef> {
        self.transport.reply(&self.event, text).await
    }

    /// Returns `true` once the engine has abandoned this execution.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("transport", &self.transport.id())
            .field("event", &self.event)
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

/// Wraps an async function into a [`HandlerBody`].
pub fn handler_fn<F, Fut, E>(f: F) -> HandlerBody
where
    F: Fn(Invocation) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    BoxCloneSyncService::new(service_fn(f).map_err(Into::into))
}

// ─── Permission flags ─────────────────────────────────────────────────────────

/// Builtin gating flags; each set flag enables the builtin guard of the same
/// name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Gates {
    pub group_only: bool,
    pub admin_only: bool,
    pub bot_admin_only: bool,
    pub owner_only: bool,
}

// ─── HandlerDefinition ────────────────────────────────────────────────────────

/// Unvalidated handler data, as authored.
#[derive(Clone, Default)]
pub struct HandlerDefinition {
    pub(crate) name: String,
    pub(crate) aliases: Vec<String>,
    pub(crate) description: Option<String>,
    pub(crate) category: Option<String>,
    pub(crate) cooldown_secs: Option<u64>,
    pub(crate) guards: Vec<String>,
    pub(crate) args: Option<ArgumentRules>,
    pub(crate) gates: Gates,
    pub(crate) body: Option<HandlerBody>,
}

impl HandlerDefinition {
    /// Starts a definition for the handler `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Adds an alias.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Adds several aliases.
    pub fn aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases.extend(aliases.into_iter().map(Into::into));
        self
    }

    /// Sets a one-line description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the category used for grouping in help output.
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Overrides the engine-wide default cooldown, in seconds. `0` disables it.
    pub fn cooldown(mut self, secs: u64) -> Self {
        self.cooldown_secs = Some(secs);
        self
    }

    /// Requests an additional guard by name.
    pub fn guard(mut self, name: impl Into<String>) -> Self {
        self.guards.push(name.into());
        self
    }

    /// Sets the argument rules.
    pub fn args(mut self, rules: ArgumentRules) -> Self {
        self.args = Some(rules);
        self
    }

    /// Only usable inside groups.
    pub fn group_only(mut self) -> Self {
        self.gates.group_only = true;
        self
    }

    /// Only usable by group admins.
    pub fn admin_only(mut self) -> Self {
        self.gates.admin_only = true;
        self
    }

    /// Only usable when the bot is a group admin.
    pub fn bot_admin_only(mut self) -> Self {
        self.gates.bot_admin_only = true;
        self
    }

    /// Only usable by bot owners.
    pub fn owner_only(mut self) -> Self {
        self.gates.owner_only = true;
        self
    }

    /// Attaches the executable body.
    pub fn handler(mut self, body: HandlerBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Returns the declared name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Validates the definition into a descriptor.
    pub(crate) fn validate(self) -> Result<HandlerDescriptor, LoadError> {
        let name = self.name.trim().to_lowercase();
        if name.is_empty() {
            return Err(LoadError::EmptyName);
        }
        if name.chars().any(char::is_whitespace) {
            return Err(LoadError::InvalidName { name });
        }
        let Some(body) = self.body else {
            return Err(LoadError::MissingBody { name });
        };

        let mut aliases: Vec<String> = Vec::with_capacity(self.aliases.len());
        for alias in self.aliases {
            let normalized = alias.trim().to_lowercase();
            if normalized.is_empty() || normalized.chars().any(char::is_whitespace) {
                return Err(LoadError::InvalidAlias { name, alias });
            }
            if normalized != name && !aliases.contains(&normalized) {
                aliases.push(normalized);
            }
        }

        if let Some(secs) = self.cooldown_secs
            && secs > MAX_COOLDOWN_SECS
        {
            return Err(LoadError::CooldownTooLong {
                name,
                secs,
                max: MAX_COOLDOWN_SECS,
            });
        }

        if let Some(reason) = self.args.as_ref().and_then(ArgumentRules::inconsistency) {
            return Err(LoadError::InvalidRules { name, reason });
        }

        Ok(HandlerDescriptor {
            name,
            aliases,
            description: self.description,
            category: self.category,
            cooldown_secs: self.cooldown_secs,
            guards: self.guards,
            args: self.args,
            gates: self.gates,
            body,
        })
    }
}

impl std::fmt::Debug for HandlerDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerDefinition")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("has_body", &self.body.is_some())
            .finish_non_exhaustive()
    }
}

// ─── HandlerDescriptor ────────────────────────────────────────────────────────

/// A validated, registered handler. Immutable; reload swaps in a new one.
pub struct HandlerDescriptor {
    name: String,
    aliases: Vec<String>,
    description: Option<String>,
    category: Option<String>,
    cooldown_secs: Option<u64>,
    guards: Vec<String>,
    args: Option<ArgumentRules>,
    gates: Gates,
    body: HandlerBody,
}

impl HandlerDescriptor {
    /// Canonical (lower-cased) name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Normalized aliases, without duplicates or the canonical name.
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// One-line description.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Category for grouping in help output.
    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    /// Per-handler cooldown override, in seconds.
    pub fn cooldown_secs(&self) -> Option<u64> {
        self.cooldown_secs
    }

    /// Extra guard names to run, in declaration order.
    pub fn guard_names(&self) -> &[String] {
        &self.guards
    }

    /// Argument rules, if any.
    pub fn argument_rules(&self) -> Option<&ArgumentRules> {
        self.args.as_ref()
    }

    /// Builtin gating flags.
    pub fn gates(&self) -> Gates {
        self.gates
    }

    /// A fresh handle to the executable body.
    pub fn body(&self) -> HandlerBody {
        self.body.clone()
    }
}

impl std::fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("cooldown_secs", &self.cooldown_secs)
            .field("guards", &self.guards)
            .field("gates", &self.gates)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::ArgType;

    fn noop() -> HandlerBody {
        handler_fn(|_inv: Invocation| async { Ok::<_, BoxError>(()) })
    }

    #[test]
    fn test_validate_normalizes_names_and_aliases() {
        let desc = HandlerDefinition::new(" Sticker ")
            .aliases(["S", "stiker", "s", "sticker"])
            .handler(noop())
            .validate()
            .unwrap();
        assert_eq!(desc.name(), "sticker");
        assert_eq!(desc.aliases(), ["s", "stiker"]);
    }

    #[test]
    fn test_validate_rejects_malformed() {
        assert_eq!(
            HandlerDefinition::new("").handler(noop()).validate().unwrap_err(),
            LoadError::EmptyName
        );
        assert!(matches!(
            HandlerDefinition::new("two words").handler(noop()).validate(),
            Err(LoadError::InvalidName { .. })
        ));
        assert!(matches!(
            HandlerDefinition::new("ping").validate(),
            Err(LoadError::MissingBody { .. })
        ));
        assert!(matches!(
            HandlerDefinition::new("ping").alias("a b").handler(noop()).validate(),
            Err(LoadError::InvalidAlias { .. })
        ));
        assert!(matches!(
            HandlerDefinition::new("ping")
                .args(ArgumentRules::new().min(2).max(1).arg(ArgType::number()))
                .handler(noop())
                .validate(),
            Err(LoadError::InvalidRules { .. })
        ));
        assert!(matches!(
            HandlerDefinition::new("ping").cooldown(u64::MAX).handler(noop()).validate(),
            Err(LoadError::CooldownTooLong { .. })
        ));
    }
}
