//! Guard pipeline: named boolean gates run before a handler executes.
//!
//! A [`Guard`] inspects the event and the resolved descriptor and returns
//! `Ok(true)` to continue or `Ok(false)` to stop. A rejecting guard is
//! responsible for telling the user why (or for staying silent). An `Err` or
//! a panic also stops the chain; the pipeline then sends a generic failure
//! reply and logs the error with the guard's name.
//!
//! # Assembly
//!
//! For each invocation the pipeline collects:
//!
//! 1. builtin guards whose descriptor flag is set
//!    (`group_only`, `admin_only`, `bot_admin_only`, `owner_only`);
//! 2. every guard name the descriptor lists explicitly;
//!
//! removes duplicates, then orders by descending [`Guard::priority`]. Equal
//! priorities keep the order above.
//!
//! ```text
//! owner_only (100) ─► group_only (0) ─► admin_only (0) ─► custom (0) ─► handler
//!        │                 │                 │                │
//!        └──── false/Err ──┴─────────────────┴────────────────┴──► stop
//! ```
//!
//! Registering a custom guard under a builtin's name replaces the builtin.

mod builtin;

pub use builtin::{
    ADMIN_ONLY, AdminOnly, BOT_ADMIN_ONLY, BotAdminOnly, GROUP_ONLY, GroupOnly, OWNER_ONLY,
    OwnerOnly,
};

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::Instant;
use tower::BoxError;
use tracing::{debug, error, info, warn};
use warden_core::{BoxedTransport, ChatEvent};

use crate::handler::HandlerDescriptor;

/// Reply sent when a guard fails with an error.
pub const GUARD_FAILURE_REPLY: &str =
    "Something went wrong while checking permissions. Please try again later.";

// =============================================================================
// Guard trait
// =============================================================================

/// Everything a guard can look at.
#[derive(Clone)]
pub struct GuardContext {
    pub transport: BoxedTransport,
    pub event: Arc<ChatEvent>,
    pub descriptor: Arc<HandlerDescriptor>,
}

impl GuardContext {
    /// Replies to the triggering event, logging delivery failures.
    pub async fn reply(&self, text: &str) {
        if let Err(e) = self.transport.reply(&self.event, text).await {
            warn!(error = %e, chat = %self.event.chat, "Failed to deliver guard reply");
        }
    }
}

/// A named gate in front of handler execution.
#[async_trait]
pub trait Guard: Send + Sync {
    /// Unique name; handlers refer to guards by it.
    fn name(&self) -> &str;

    /// Higher runs first. Defaults to 0.
    fn priority(&self) -> i32 {
        0
    }

    /// Returns `Ok(true)` to let the invocation continue.
    async fn check(&self, ctx: &GuardContext) -> Result<bool, BoxError>;
}

/// A shared guard trait object.
pub type BoxedGuard = Arc<dyn Guard>;

/// A guard backed by an async closure.
///
/// ```rust,ignore
/// let nsfw = guard_fn("nsfw_enabled", 10, |ctx: GuardContext| async move {
///     let on = settings.nsfw_enabled(&ctx.event.chat).await?;
///     if !on {
///         ctx.reply("NSFW commands are disabled here.").await;
///     }
///     Ok::<_, BoxError>(on)
/// });
/// ```
pub fn guard_fn<F, Fut>(name: impl Into<String>, priority: i32, f: F) -> BoxedGuard
where
    F: Fn(GuardContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, BoxError>> + Send + 'static,
{
    Arc::new(FnGuard {
        name: name.into(),
        priority,
        f,
    })
}

struct FnGuard<F> {
    name: String,
    priority: i32,
    f: F,
}

#[async_trait]
impl<F, Fut> Guard for FnGuard<F>
where
    F: Fn(GuardContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, BoxError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn check(&self, ctx: &GuardContext) -> Result<bool, BoxError> {
        (self.f)(ctx.clone()).await
    }
}

// =============================================================================
// Verdicts and stats
// =============================================================================

/// Outcome of running the pipeline for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardVerdict {
    /// Every guard passed.
    Passed,
    /// A guard returned `false`.
    Rejected { guard: String },
    /// A guard returned an error. The user has been sent a generic reply.
    Failed { guard: String, error: String },
}

/// Execution statistics of one guard.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GuardStats {
    pub executions: u64,
    pub rejections: u64,
    pub failures: u64,
    pub total_duration: Duration,
}

/// Aggregate guard view.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GuardPipelineStats {
    pub total_guards: usize,
    pub guards: HashMap<String, GuardStats>,
}

// =============================================================================
// GuardPipeline
// =============================================================================

/// Registry of guards plus the per-invocation runner.
pub struct GuardPipeline {
    guards: RwLock<HashMap<String, BoxedGuard>>,
    stats: Mutex<HashMap<String, GuardStats>>,
}

impl GuardPipeline {
    /// Creates a pipeline without any guard registered.
    pub fn empty() -> Self {
        Self {
            guards: RwLock::new(HashMap::new()),
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a pipeline with the four builtin guards. `owners` feeds the
    /// owner check.
    pub fn with_builtins<I, S>(owners: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pipeline = Self::empty();
        pipeline.register(Arc::new(GroupOnly));
        pipeline.register(Arc::new(AdminOnly));
        pipeline.register(Arc::new(BotAdminOnly));
        pipeline.register(Arc::new(OwnerOnly::new(owners)));
        pipeline
    }

    /// Registers a guard, replacing any guard of the same name.
    pub fn register(&self, guard: BoxedGuard) -> Option<BoxedGuard> {
        let name = guard.name().to_string();
        let priority = guard.priority();
        let previous = self.guards.write().insert(name.clone(), guard);
        self.stats.lock().entry(name.clone()).or_default();
        if previous.is_some() {
            info!(guard = %name, priority, "Guard overridden");
        } else {
            debug!(guard = %name, priority, "Guard registered");
        }
        previous
    }

    /// Removes a guard by name.
    pub fn remove(&self, name: &str) -> Option<BoxedGuard> {
        self.stats.lock().remove(name);
        self.guards.write().remove(name)
    }

    /// Returns `true` if a guard named `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.guards.read().contains_key(name)
    }

    /// Returns the guards applicable to `descriptor`, in execution order.
    ///
    /// Unknown guard names are logged and skipped.
    pub fn assemble(&self, descriptor: &HandlerDescriptor) -> Vec<BoxedGuard> {
        let gates = descriptor.gates();
        let flagged = [
            (gates.group_only, GROUP_ONLY),
            (gates.admin_only, ADMIN_ONLY),
            (gates.bot_admin_only, BOT_ADMIN_ONLY),
            (gates.owner_only, OWNER_ONLY),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name));

        let requested = flagged.chain(descriptor.guard_names().iter().map(String::as_str));

        let guards = self.guards.read();
        let mut seen: Vec<&str> = Vec::new();
        let mut chain: Vec<BoxedGuard> = Vec::new();
        for name in requested {
            if seen.contains(&name) {
                continue;
            }
            seen.push(name);
            match guards.get(name) {
                Some(guard) => chain.push(Arc::clone(guard)),
                None => warn!(
                    handler = %descriptor.name(),
                    guard   = %name,
                    "Guard not found, skipping"
                ),
            }
        }
        drop(guards);

        // Stable: equal priorities keep declaration order.
        chain.sort_by_key(|g| std::cmp::Reverse(g.priority()));
        chain
    }

    /// Runs the assembled chain sequentially, stopping at the first guard
    /// that does not pass.
    pub async fn run(&self, ctx: &GuardContext) -> GuardVerdict {
        for guard in self.assemble(&ctx.descriptor) {
            let name = guard.name().to_string();
            let started = Instant::now();
            let result = AssertUnwindSafe(guard.check(ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err("guard panicked".into()));
            let elapsed = started.elapsed();

            let verdict = match result {
                Ok(true) => None,
                Ok(false) => {
                    debug!(
                        guard   = %name,
                        handler = %ctx.descriptor.name(),
                        "Guard rejected invocation"
                    );
                    Some(GuardVerdict::Rejected {
                        guard: name.clone(),
                    })
                }
                Err(e) => {
                    error!(
                        guard   = %name,
                        handler = %ctx.descriptor.name(),
                        user    = %ctx.event.sender,
                        error   = %e,
                        "Guard failed"
                    );
                    Some(GuardVerdict::Failed {
                        guard: name.clone(),
                        error: e.to_string(),
                    })
                }
            };

            self.record(&name, elapsed, verdict.as_ref());

            match verdict {
                None => continue,
                Some(v @ GuardVerdict::Failed { .. }) => {
                    ctx.reply(GUARD_FAILURE_REPLY).await;
                    return v;
                }
                Some(v) => return v,
            }
        }
        GuardVerdict::Passed
    }

    fn record(&self, name: &str, elapsed: Duration, verdict: Option<&GuardVerdict>) {
        let mut stats = self.stats.lock();
        let entry = stats.entry(name.to_string()).or_default();
        entry.executions += 1;
        entry.total_duration += elapsed;
        match verdict {
            Some(GuardVerdict::Rejected { .. }) => entry.rejections += 1,
            Some(GuardVerdict::Failed { .. }) => entry.failures += 1,
            _ => {}
        }
    }

    /// Snapshot of per-guard statistics.
    pub fn stats(&self) -> GuardPipelineStats {
        GuardPipelineStats {
            total_guards: self.guards.read().len(),
            guards: self.stats.lock().clone(),
        }
    }
}

impl Default for GuardPipeline {
    fn default() -> Self {
        Self::with_builtins(std::iter::empty::<String>())
    }
}

impl std::fmt::Debug for GuardPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.guards.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("GuardPipeline").field("guards", &names).finish()
    }
}
