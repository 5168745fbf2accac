//! # Warden Core
//!
//! Foundation types shared by every layer of the Warden dispatch engine.
//!
//! - **Events**: the transport-neutral inbound message ([`ChatEvent`])
//! - **Transport**: the outbound collaborator trait ([`Transport`])
//! - **Errors**: transport error taxonomy ([`TransportError`])
//!
//! The dispatch core itself lives in `warden-framework`; nothing here holds
//! state.
//!
//! ```text
//! ┌─────────────┐  ChatEvent   ┌──────────────────┐
//! │  Transport  │─────────────▶│ Dispatch Engine  │
//! │ (WhatsApp…) │◀─────────────│   (framework)    │
//! └─────────────┘  send/reply  └──────────────────┘
//! ```

pub mod error;
pub mod event;
pub mod transport;

pub use error::{TransportError, TransportResult};
pub use event::{ChatEvent, MediaKind, QuotedMessage};
pub use transport::{BoxedTransport, MessageRef, Transport, downcast_transport};
