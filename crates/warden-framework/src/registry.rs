//! Handler registry: canonical names, aliases and execution statistics.
//!
//! [`HandlerRegistry`] owns every [`HandlerDescriptor`]. It:
//!
//! - Validates [`HandlerDefinition`]s on registration. Malformed definitions
//!   are rejected with a [`LoadError`] that is recorded and returned, never
//!   aborting a bulk load.
//! - Resolves a typed command name with one lookup by canonical name, then at
//!   most one hop through the alias table.
//! - Resolves conflicts by *last writer wins*: re-registering a name replaces
//!   the old descriptor, and an alias claimed by another handler is moved.
//!   An alias equal to another handler's canonical name is shadowed by it,
//!   whichever was registered first. All cases are logged and kept as
//!   [`RegistryConflict`]s.
//! - Tracks per-handler [`ExecutionStats`], which survive a reload and are
//!   discarded on unload.
//!
//! # Atomicity
//!
//! Each `register` / `unload` runs under a single write lock, so a concurrent
//! [`resolve`](HandlerRegistry::resolve) observes either the old or the new
//! mapping, never a descriptor with half of its aliases in place.
//!
//! ```text
//!            ┌───────────── write lock ─────────────┐
//! register ─►│ handlers[name] = desc                │
//!            │ drop aliases of the replaced desc    │
//!            │ aliases[a] = name  (for a in desc)   │
//!            └──────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::LoadError;
use crate::handler::{HandlerDefinition, HandlerDescriptor};

// =============================================================================
// Records
// =============================================================================

/// A name or alias collision and how it was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryConflict {
    /// A handler with the same canonical name was replaced.
    Name {
        /// The contested name.
        name: String,
    },
    /// An alias was moved from one handler to another.
    Alias {
        /// The contested alias.
        alias: String,
        /// Handler the alias pointed to before.
        previous: String,
        /// Handler the alias points to now.
        current: String,
    },
    /// An alias equals another handler's canonical name and never resolves.
    Shadowed {
        /// The alias, which is also a canonical name.
        alias: String,
        /// Handler declaring the alias.
        alias_of: String,
    },
}

/// Result of a successful registration.
#[derive(Debug, Clone)]
pub struct Registered {
    /// The stored descriptor.
    pub descriptor: Arc<HandlerDescriptor>,
    /// Whether an older descriptor with the same name was replaced.
    pub replaced: bool,
}

/// Summary of a bulk load.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Canonical names registered, in order.
    pub loaded: Vec<String>,
    /// Definitions that were rejected.
    pub errors: Vec<LoadError>,
}

impl LoadReport {
    /// Returns `true` if nothing was rejected.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Execution statistics of one handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionStats {
    /// Completed invocations, including failed and timed-out ones.
    pub uses: u64,
    /// Invocations that failed or timed out.
    pub failures: u64,
    /// When the handler last finished an invocation.
    pub last_used: Option<SystemTime>,
    /// Cumulative execution time.
    pub total_duration: Duration,
}

impl ExecutionStats {
    /// Mean execution time, or zero if never used.
    pub fn average_duration(&self) -> Duration {
        match u32::try_from(self.uses) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total_duration / n,
            Err(_) => Duration::from_secs_f64(self.total_duration.as_secs_f64() / self.uses as f64),
        }
    }
}

/// Statistics of one handler, by name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerUsage {
    pub name: String,
    #[serde(flatten)]
    pub stats: ExecutionStats,
}

/// Aggregate registry view.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    pub total_handlers: usize,
    pub total_aliases: usize,
    pub load_errors: usize,
    /// Every handler, in registration order.
    pub handlers: Vec<HandlerUsage>,
    /// Most used handlers, descending; ties keep registration order. Handlers
    /// that were never used are not listed.
    pub top: Vec<HandlerUsage>,
}

// =============================================================================
// HandlerRegistry
// =============================================================================

#[derive(Default)]
struct State {
    handlers: HashMap<String, Arc<HandlerDescriptor>>,
    aliases: HashMap<String, String>,
    /// Canonical names in first-registration order.
    order: Vec<String>,
}

/// Name → descriptor map with alias resolution.
#[derive(Default)]
pub struct HandlerRegistry {
    state: RwLock<State>,
    stats: Mutex<HashMap<String, ExecutionStats>>,
    load_errors: Mutex<Vec<LoadError>>,
    conflicts: Mutex<Vec<RegistryConflict>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Mutation ────────────────────────────────────────────────────────────

    /// Validates and registers a handler.
    ///
    /// On failure the error is also appended to [`load_errors`](Self::load_errors).
    pub fn register(&self, definition: HandlerDefinition) -> Result<Registered, LoadError> {
        let declared = definition.name().to_string();
        let descriptor = match definition.validate() {
            Ok(d) => Arc::new(d),
            Err(e) => {
                warn!(handler = %declared, error = %e, "Rejected malformed handler definition");
                self.load_errors.lock().push(e.clone());
                return Err(e);
            }
        };

        let name = descriptor.name().to_string();
        let mut conflicts = Vec::new();
        let replaced = {
            let mut state = self.state.write();

            let previous = state.handlers.insert(name.clone(), Arc::clone(&descriptor));
            if let Some(old) = &previous {
                for alias in old.aliases() {
                    if state.aliases.get(alias) == Some(&name) {
                        state.aliases.remove(alias);
                    }
                }
                conflicts.push(RegistryConflict::Name { name: name.clone() });
            } else {
                state.order.push(name.clone());
            }

            if let Some(owner) = state.aliases.get(&name)
                && *owner != name
            {
                conflicts.push(RegistryConflict::Shadowed {
                    alias: name.clone(),
                    alias_of: owner.clone(),
                });
            }

            for alias in descriptor.aliases() {
                if state.handlers.contains_key(alias) {
                    conflicts.push(RegistryConflict::Shadowed {
                        alias: alias.clone(),
                        alias_of: name.clone(),
                    });
                }
                if let Some(prev) = state.aliases.insert(alias.clone(), name.clone())
                    && prev != name
                {
                    conflicts.push(RegistryConflict::Alias {
                        alias: alias.clone(),
                        previous: prev,
                        current: name.clone(),
                    });
                }
            }

            previous.is_some()
        };

        self.stats.lock().entry(name.clone()).or_default();

        for conflict in &conflicts {
            match conflict {
                RegistryConflict::Name { name } => {
                    warn!(handler = %name, "Duplicate handler name, last registration wins");
                }
                RegistryConflict::Alias {
                    alias,
                    previous,
                    current,
                } => {
                    warn!(
                        alias    = %alias,
                        previous = %previous,
                        current  = %current,
                        "Alias reassigned, last registration wins"
                    );
                }
                RegistryConflict::Shadowed { alias, alias_of } => {
                    warn!(
                        alias    = %alias,
                        alias_of = %alias_of,
                        "Alias equals another handler's name and is shadowed by it"
                    );
                }
            }
        }
        self.conflicts.lock().extend(conflicts);

        if replaced {
            info!(handler = %name, "Handler replaced");
        } else {
            debug!(handler = %name, aliases = ?descriptor.aliases(), "Handler registered");
        }

        Ok(Registered {
            descriptor,
            replaced,
        })
    }

    /// Replaces a handler after a source change. Same semantics as
    /// [`register`](Self::register); statistics are kept.
    pub fn reload(&self, definition: HandlerDefinition) -> Result<Registered, LoadError> {
        self.register(definition)
    }

    /// Removes a handler, every alias pointing to it and its statistics.
    ///
    /// Returns `false` if no handler of that name exists.
    pub fn unload(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        {
            let mut state = self.state.write();
            if state.handlers.remove(&name).is_none() {
                return false;
            }
            state.aliases.retain(|_, target| *target != name);
            state.order.retain(|n| *n != name);
        }
        self.stats.lock().remove(&name);
        info!(handler = %name, "Handler unloaded");
        true
    }

    // ─── Lookup ──────────────────────────────────────────────────────────────

    /// Looks up a handler by canonical name or alias (case-insensitive).
    pub fn resolve(&self, name_or_alias: &str) -> Option<Arc<HandlerDescriptor>> {
        let key = name_or_alias.to_lowercase();
        let state = self.state.read();
        state
            .handlers
            .get(&key)
            .or_else(|| {
                state
                    .aliases
                    .get(&key)
                    .and_then(|name| state.handlers.get(name))
            })
            .cloned()
    }

    /// Canonical names in registration order.
    pub fn handler_names(&self) -> Vec<String> {
        self.state.read().order.clone()
    }

    /// All descriptors in registration order.
    pub fn descriptors(&self) -> Vec<Arc<HandlerDescriptor>> {
        let state = self.state.read();
        state
            .order
            .iter()
            .filter_map(|n| state.handlers.get(n).cloned())
            .collect()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.state.read().handlers.len()
    }

    /// Returns `true` if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every load error recorded since creation.
    pub fn load_errors(&self) -> Vec<LoadError> {
        self.load_errors.lock().clone()
    }

    /// Records a load failure that happened before validation, e.g. in a
    /// hot-reload source.
    pub(crate) fn note_load_error(&self, error: LoadError) {
        self.load_errors.lock().push(error);
    }

    /// Every conflict recorded since creation.
    pub fn conflicts(&self) -> Vec<RegistryConflict> {
        self.conflicts.lock().clone()
    }

    // ─── Statistics ──────────────────────────────────────────────────────────

    /// Records one finished invocation. Ignored for handlers that are no
    /// longer registered.
    pub fn record_execution(&self, name: &str, duration: Duration, failed: bool) {
        if let Some(stats) = self.stats.lock().get_mut(name) {
            stats.uses += 1;
            stats.failures += u64::from(failed);
            stats.last_used = Some(SystemTime::now());
            stats.total_duration += duration;
        }
    }

    /// Statistics of a single handler.
    pub fn execution_stats(&self, name: &str) -> Option<ExecutionStats> {
        self.stats.lock().get(&name.to_lowercase()).cloned()
    }

    /// Zeroes every handler's statistics.
    pub fn reset_stats(&self) {
        for stats in self.stats.lock().values_mut() {
            *stats = ExecutionStats::default();
        }
        info!("Handler statistics reset");
    }

    /// Builds the aggregate view with the `top_n` most used handlers.
    pub fn stats(&self, top_n: usize) -> RegistryStats {
        let (order, total_aliases) = {
            let state = self.state.read();
            (state.order.clone(), state.aliases.len())
        };

        let handlers: Vec<HandlerUsage> = {
            let stats = self.stats.lock();
            order
                .into_iter()
                .map(|name| {
                    let stats = stats.get(&name).cloned().unwrap_or_default();
                    HandlerUsage { name, stats }
                })
                .collect()
        };

        let mut top: Vec<HandlerUsage> = handlers
            .iter()
            .filter(|h| h.stats.uses > 0)
            .cloned()
            .collect();
        // Stable, so equal counts keep registration order.
        top.sort_by(|a, b| b.stats.uses.cmp(&a.stats.uses));
        top.truncate(top_n);

        RegistryStats {
            total_handlers: handlers.len(),
            total_aliases,
            load_errors: self.load_errors.lock().len(),
            handlers,
            top,
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &state.order)
            .field("aliases", &state.aliases.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerBody, Invocation, handler_fn};
    use tower::BoxError;

    fn noop() -> HandlerBody {
        handler_fn(|_inv: Invocation| async { Ok::<_, BoxError>(()) })
    }

    fn def(name: &str) -> HandlerDefinition {
        HandlerDefinition::new(name).handler(noop())
    }

    #[test]
    fn test_same_name_last_writer_wins() {
        let registry = HandlerRegistry::new();
        registry.register(def("ping").cooldown(1)).unwrap();
        let second = registry.register(def("ping").cooldown(9)).unwrap();

        assert!(second.replaced);
        assert_eq!(registry.resolve("ping").unwrap().cooldown_secs(), Some(9));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.conflicts(),
            vec![RegistryConflict::Name {
                name: "ping".into()
            }]
        );
    }

    #[test]
    fn test_alias_resolution() {
        let registry = HandlerRegistry::new();
        registry
            .register(def("sticker").aliases(["s", "stiker"]))
            .unwrap();

        let by_name = registry.resolve("sticker").unwrap();
        for key in ["s", "stiker", "STIKER"] {
            assert!(Arc::ptr_eq(&registry.resolve(key).unwrap(), &by_name));
        }
        assert!(registry.resolve("x").is_none());
    }

    #[test]
    fn test_alias_conflict_moves_alias_and_is_recorded() {
        let registry = HandlerRegistry::new();
        registry.register(def("sticker").alias("s")).unwrap();
        registry.register(def("search").alias("s")).unwrap();

        assert_eq!(registry.resolve("s").unwrap().name(), "search");
        assert_eq!(
            registry.conflicts(),
            vec![RegistryConflict::Alias {
                alias: "s".into(),
                previous: "sticker".into(),
                current: "search".into(),
            }]
        );
    }

    #[test]
    fn test_replacement_drops_stale_aliases() {
        let registry = HandlerRegistry::new();
        registry.register(def("ping").alias("p")).unwrap();
        registry.reload(def("ping").alias("pg")).unwrap();

        assert!(registry.resolve("p").is_none());
        assert_eq!(registry.resolve("pg").unwrap().name(), "ping");
    }

    #[test]
    fn test_unload_removes_handler_and_aliases() {
        let registry = HandlerRegistry::new();
        registry.register(def("ping").alias("p")).unwrap();

        assert!(registry.unload("ping"));
        assert!(registry.resolve("ping").is_none());
        assert!(registry.resolve("p").is_none());
        assert!(!registry.unload("ping"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_alias_shadowed_by_canonical_name_in_either_order() {
        let registry = HandlerRegistry::new();
        registry.register(def("ping")).unwrap();
        registry.register(def("pong").alias("ping")).unwrap();
        registry.register(def("stats").alias("st")).unwrap();
        registry.register(def("st")).unwrap();

        assert_eq!(registry.resolve("ping").unwrap().name(), "ping");
        assert_eq!(registry.resolve("st").unwrap().name(), "st");
        assert_eq!(
            registry.conflicts(),
            vec![
                RegistryConflict::Shadowed {
                    alias: "ping".into(),
                    alias_of: "pong".into(),
                },
                RegistryConflict::Shadowed {
                    alias: "st".into(),
                    alias_of: "stats".into(),
                },
            ]
        );
    }

    #[test]
    fn test_malformed_definitions_are_recorded() {
        let registry = HandlerRegistry::new();
        assert!(registry.register(HandlerDefinition::new("broken")).is_err());
        assert!(registry.register(def("")).is_err());
        registry.register(def("ping")).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.load_errors().len(), 2);
        assert_eq!(registry.stats(5).load_errors, 2);
    }

    #[test]
    fn test_stats_top_n_ties_keep_registration_order() {
        let registry = HandlerRegistry::new();
        for name in ["a", "b", "c", "d"] {
            registry.register(def(name)).unwrap();
        }

        for name in ["c", "b", "c", "a", "d"] {
            registry.record_execution(name, Duration::from_millis(10), false);
        }
        registry.record_execution("b", Duration::from_millis(30), true);

        let stats = registry.stats(3);
        let top: Vec<_> = stats.top.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(top, vec!["b", "c", "a"]);
        assert_eq!(stats.total_handlers, 4);

        let b = registry.execution_stats("b").unwrap();
        assert_eq!(b.uses, 2);
        assert_eq!(b.failures, 1);
        assert_eq!(b.average_duration(), Duration::from_millis(20));
        assert!(b.last_used.is_some());
    }

    #[test]
    fn test_reload_keeps_stats_unload_discards() {
        let registry = HandlerRegistry::new();
        registry.register(def("ping")).unwrap();
        registry.record_execution("ping", Duration::from_millis(5), false);

        registry.reload(def("ping")).unwrap();
        assert_eq!(registry.execution_stats("ping").unwrap().uses, 1);

        registry.reset_stats();
        assert_eq!(registry.execution_stats("ping").unwrap().uses, 0);

        registry.unload("ping");
        assert!(registry.execution_stats("ping").is_none());
        registry.record_execution("ping", Duration::from_millis(5), false);
        assert!(registry.execution_stats("ping").is_none());
    }
}
