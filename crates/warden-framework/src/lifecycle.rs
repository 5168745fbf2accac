//! Lifecycle notifications and the hot-reload bridge.
//!
//! The engine never touches the filesystem. A watcher owned by the
//! application reports [`SourceChange`]s, and a [`HandlerSource`] turns a
//! changed path into a [`HandlerDefinition`]:
//!
//! ```text
//! fs watcher ──SourceChange──► DispatchEngine::apply_source_change ──► registry
//!                                        │               ▲
//!                                        └─ HandlerSource┘
//!                                        │
//!                                        └──► EngineEvent (broadcast)
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::LoadError;
use crate::handler::HandlerDefinition;

/// Notification emitted by the engine whenever the handler set changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A handler was registered for the first time.
    HandlerLoaded { name: String },
    /// An existing handler was replaced.
    HandlerReloaded { name: String },
    /// A handler was removed.
    HandlerUnloaded { name: String },
    /// A definition was rejected.
    LoadFailed { error: LoadError },
}

/// A change reported by a source watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceChange {
    Added(PathBuf),
    Changed(PathBuf),
    Removed(PathBuf),
}

impl SourceChange {
    /// The affected path.
    pub fn path(&self) -> &Path {
        match self {
            Self::Added(p) | Self::Changed(p) | Self::Removed(p) => p,
        }
    }

    /// The handler a removed file stood for: its lower-cased file stem.
    pub fn handler_name(&self) -> Option<String> {
        self.path()
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_lowercase)
    }
}

/// Produces handler definitions from source paths.
#[async_trait]
pub trait HandlerSource: Send + Sync {
    /// Loads the definition stored at `path`.
    async fn load(&self, path: &Path) -> Result<HandlerDefinition, LoadError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_name_from_stem() {
        let change = SourceChange::Removed(PathBuf::from("commands/fun/Sticker.rs"));
        assert_eq!(change.handler_name().as_deref(), Some("sticker"));
        assert_eq!(change.path(), Path::new("commands/fun/Sticker.rs"));
        assert_eq!(SourceChange::Changed(PathBuf::from("/")).handler_name(), None);
    }
}
