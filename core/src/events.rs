use std::net::SocketAddr;

use beam_discovery::{DiscoveredTarget, TargetId};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{entry::EntryChange, session::SessionState};

/// Session state synchronized to the embedding frontend.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
	StateChanged {
		state: SessionState,
	},
	/// A new entry was appended to the visible list.
	TargetAdded {
		target: DiscoveredTarget,
	},
	/// An entry was removed from the visible list.
	TargetRemoved {
		id: TargetId,
	},
	/// One observable field of an entry changed.
	EntryChanged {
		id: TargetId,
		change: EntryChange,
	},
	/// The visible list was discarded wholesale (reconfigure).
	ListCleared,

	TransferStarted {
		id: Uuid,
		target: TargetId,
	},
	TransferProgress {
		id: Uuid,
		percent: u8,
	},
	TransferCompleted {
		id: Uuid,
	},
	TransferFailed {
		id: Uuid,
		reason: String,
	},

	/// A remote peer started handing us a package (receive side).
	IncomingTransfer {
		id: Uuid,
		from: SocketAddr,
		title: String,
		files: Vec<String>,
	},
	IncomingCompleted {
		id: Uuid,
	},
	IncomingFailed {
		id: Uuid,
		reason: String,
	},
}

/// Broadcast channel carrying [`SessionEvent`]s to any number of frontends.
pub struct SessionEvents {
	events: (
		broadcast::Sender<SessionEvent>,
		broadcast::Receiver<SessionEvent>,
	),
}

impl SessionEvents {
	pub fn new() -> Self {
		let events = broadcast::channel(64);
		Self {
			events: (events.0, events.1),
		}
	}

	pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
		self.events.0.subscribe()
	}

	/// A cloneable sender for tasks that emit events off the session's
	/// owning task (transfers, the receive loop).
	pub fn sender(&self) -> broadcast::Sender<SessionEvent> {
		self.events.0.clone()
	}

	#[allow(clippy::result_large_err)]
	pub fn send(
		&self,
		event: SessionEvent,
	) -> Result<usize, broadcast::error::SendError<SessionEvent>> {
		self.events.0.send(event)
	}
}

impl Default for SessionEvents {
	fn default() -> Self {
		Self::new()
	}
}
