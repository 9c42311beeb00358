use std::{
	collections::HashSet,
	fmt::{self, Display},
	sync::Arc,
};

use mdns_sd::ServiceEvent;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
	mdns::resolved_to_target, DiscoveredTarget, DiscoveryError, DiscoveryOptions, Mdns, TargetId,
	SERVICE_NAME,
};

/// Identifies one watcher instance. Every event is tagged with the watcher
/// that produced it so consumers can drop events from a superseded or stopped
/// watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WatcherId(Uuid);

impl WatcherId {
	/// Mint a fresh unique id. [`TargetWatcher::spawn`] does this for every
	/// watcher; embedders only need it to fabricate events in tests.
	#[allow(clippy::new_without_default)]
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Display for WatcherId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

#[derive(Debug, Clone, Serialize)]
pub enum WatcherEvent {
	TargetAdded(DiscoveredTarget),
	TargetUpdated(DiscoveredTarget),
	TargetRemoved(TargetId),
}

/// A watcher event together with the watcher that produced it.
#[derive(Debug, Clone)]
pub struct DiscoveryEvent {
	pub watcher: WatcherId,
	pub event: WatcherEvent,
}

/// Tracks which targets a watcher has surfaced, turning raw mDNS resolutions
/// into add/update/remove events and enforcing the discovery options.
#[derive(Default)]
struct WatcherState {
	visible: HashSet<TargetId>,
}

impl WatcherState {
	fn on_resolved(
		&mut self,
		target: DiscoveredTarget,
		options: &DiscoveryOptions,
	) -> Option<WatcherEvent> {
		if !options.admits(&target.metadata.app_id) {
			debug!(
				"target '{}' (app '{}') filtered by the allow-list",
				target.id, target.metadata.app_id
			);
			return None;
		}

		if self.visible.contains(&target.id) {
			return Some(WatcherEvent::TargetUpdated(target));
		}

		if let Some(max) = options.max_targets {
			if self.visible.len() >= max.get() {
				debug!(
					"target '{}' ignored, {max} targets already surfaced",
					target.id
				);
				return None;
			}
		}

		self.visible.insert(target.id.clone());
		Some(WatcherEvent::TargetAdded(target))
	}

	fn on_removed(&mut self, id: TargetId) -> Option<WatcherEvent> {
		self.visible
			.remove(&id)
			.then(|| WatcherEvent::TargetRemoved(id))
	}
}

/// An active discovery watcher.
///
/// Browses for transfer targets and delivers [`DiscoveryEvent`]s over the
/// channel returned from [`TargetWatcher::spawn`]. The channel closes once
/// the watcher is stopped and its loop has drained.
pub struct TargetWatcher {
	id: WatcherId,
	shutdown_tx: oneshot::Sender<()>,
}

impl TargetWatcher {
	/// `local_instance` is this host's own advertisement instance name, if
	/// any; it is never surfaced as a target.
	pub fn spawn(
		mdns: Arc<Mdns>,
		options: DiscoveryOptions,
		local_instance: Option<String>,
	) -> Result<(Self, mpsc::Receiver<DiscoveryEvent>), DiscoveryError> {
		let id = WatcherId::new();
		let browse_rx = mdns.browse()?;
		let (events_tx, events_rx) = mpsc::channel(64);
		let (shutdown_tx, shutdown_rx) = oneshot::channel();

		tokio::spawn(run(
			id,
			mdns,
			browse_rx,
			events_tx,
			options,
			local_instance,
			shutdown_rx,
		));

		Ok((Self { id, shutdown_tx }, events_rx))
	}

	pub fn id(&self) -> WatcherId {
		self.id
	}

	/// Stop browsing and shut the event loop down.
	pub fn stop(self) {
		let _ = self.shutdown_tx.send(());
	}
}

async fn run(
	id: WatcherId,
	mdns: Arc<Mdns>,
	browse_rx: mdns_sd::Receiver<ServiceEvent>,
	events_tx: mpsc::Sender<DiscoveryEvent>,
	options: DiscoveryOptions,
	local_instance: Option<String>,
	mut shutdown_rx: oneshot::Receiver<()>,
) {
	let mut state = WatcherState::default();

	loop {
		let service_event = tokio::select! {
			_ = &mut shutdown_rx => break,
			event = browse_rx.recv_async() => match event {
				Ok(event) => event,
				Err(_) => {
					warn!("mdns event channel closed, watcher '{id}' is done");
					break;
				}
			},
		};

		let event = match service_event {
			ServiceEvent::ServiceResolved(resolved) => match resolved_to_target(&resolved) {
				Ok(target) => {
					// Never surface our own advertisement.
					if local_instance.as_deref() == Some(target.id.as_str()) {
						continue;
					}
					state.on_resolved(target, &options)
				}
				Err(err) => {
					warn!("ignoring invalid target advertisement: {err}");
					None
				}
			},
			ServiceEvent::ServiceRemoved(_, fullname) => {
				match TargetId::from_fullname(&fullname, SERVICE_NAME) {
					Some(target_id) => state.on_removed(target_id),
					None => {
						warn!("service removal with unexpected fullname '{fullname}'");
						None
					}
				}
			}
			ServiceEvent::ServiceFound(_, fullname) => {
				debug!("found '{fullname}', waiting for resolution");
				None
			}
			ServiceEvent::SearchStopped(_) => break,
			_ => None,
		};

		if let Some(event) = event {
			if events_tx
				.send(DiscoveryEvent { watcher: id, event })
				.await
				.is_err()
			{
				// Consumer is gone, no point browsing any further.
				break;
			}
		}
	}

	mdns.stop_browse();
	debug!("watcher '{id}' stopped");
}

#[cfg(test)]
mod tests {
	use std::num::NonZeroUsize;

	use super::*;
	use crate::TargetMetadata;

	fn target(id: &str, app_id: &str) -> DiscoveredTarget {
		DiscoveredTarget {
			id: TargetId::new(id),
			metadata: TargetMetadata {
				label: id.to_string(),
				app_id: app_id.to_string(),
				enabled: true,
				logo: None,
			},
			addresses: vec![],
		}
	}

	#[test]
	fn first_resolution_adds_then_updates() {
		let mut state = WatcherState::default();
		let options = DiscoveryOptions::default();

		assert!(matches!(
			state.on_resolved(target("a", "app"), &options),
			Some(WatcherEvent::TargetAdded(_))
		));
		assert!(matches!(
			state.on_resolved(target("a", "app"), &options),
			Some(WatcherEvent::TargetUpdated(_))
		));
	}

	#[test]
	fn removal_of_unknown_target_is_silent() {
		let mut state = WatcherState::default();
		assert!(state.on_removed(TargetId::new("ghost")).is_none());
	}

	#[test]
	fn allow_list_filters_resolutions() {
		let mut state = WatcherState::default();
		let options = DiscoveryOptions {
			allowed_apps: Some(std::collections::HashSet::from(["beam.demo".to_string()])),
			..Default::default()
		};

		assert!(state.on_resolved(target("a", "other.app"), &options).is_none());
		assert!(state.on_resolved(target("a", "beam.demo"), &options).is_some());
	}

	#[test]
	fn max_targets_caps_until_a_slot_frees() {
		let mut state = WatcherState::default();
		let options = DiscoveryOptions {
			max_targets: Some(NonZeroUsize::new(1).unwrap()),
			..Default::default()
		};

		assert!(matches!(
			state.on_resolved(target("a", "app"), &options),
			Some(WatcherEvent::TargetAdded(_))
		));
		// Cap reached, second target is not surfaced.
		assert!(state.on_resolved(target("b", "app"), &options).is_none());
		// Updates to the surfaced target still flow.
		assert!(matches!(
			state.on_resolved(target("a", "app"), &options),
			Some(WatcherEvent::TargetUpdated(_))
		));

		assert!(matches!(
			state.on_removed(TargetId::new("a")),
			Some(WatcherEvent::TargetRemoved(_))
		));
		// The slot freed up.
		assert!(matches!(
			state.on_resolved(target("b", "app"), &options),
			Some(WatcherEvent::TargetAdded(_))
		));
	}
}
