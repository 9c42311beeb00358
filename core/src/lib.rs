//! Beam core: the discovery session controller, the per-target list adapter
//! and the transfer operations behind the demo UI.
//!
//! The UI-facing surface is [`SessionActor`]/[`SessionHandle`]: spawn the
//! actor, subscribe to [`SessionEvent`]s, and drive it with commands. All
//! list state lives inside the actor's task; callbacks arriving from other
//! tasks (watcher events, logo loads) are re-dispatched onto it.

mod actor;
mod config;
mod entry;
mod events;
mod operations;
mod session;

pub use actor::*;
pub use config::*;
pub use entry::*;
pub use events::*;
pub use operations::{receive_loop, OperationError};
pub use session::*;
