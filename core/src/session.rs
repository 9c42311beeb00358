use std::sync::Arc;

use beam_discovery::{
	DiscoveredTarget, DiscoveryError, DiscoveryEvent, DiscoveryOptions, Mdns, TargetId,
	TargetWatcher, WatcherEvent, WatcherId,
};
use beam_icons::{Icon, IconHandle};
use beam_package::{DataPackage, Manifest, ManifestError};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{
	entry::{LogoRequest, TargetEntry},
	events::{SessionEvent, SessionEvents},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
	/// The discovery capability is unavailable on this host; the UI shows a
	/// "not supported" notice instead of the configuration form.
	Idle,
	/// The configuration form is shown; no watcher exists.
	Configuring,
	/// A watcher is active and the visible list tracks its events.
	Running,
	/// The watcher was stopped but the visible list is kept so already
	/// discovered targets can still be invoked.
	Stopped,
}

#[derive(Debug, Error)]
pub enum SessionError {
	#[error("discovery can only start while configuring (state is {0:?})")]
	NotConfiguring(SessionState),
	#[error("the data package is empty")]
	EmptyPackage,
	#[error("error preparing the package manifest: {0}")]
	Manifest(#[from] ManifestError),
	#[error("error starting the watcher: {0}")]
	Discovery(#[from] DiscoveryError),
	#[error("the session actor is gone")]
	Closed,
}

/// The discovery session controller.
///
/// Owns at most one active watcher and the ordered list of visible entries,
/// uniquely addressable by target id. Everything here assumes single-task
/// ownership: watcher events and logo completions originate on other tasks
/// and must be re-dispatched (see [`SessionActor`](crate::SessionActor))
/// before being applied.
pub struct DiscoverySession {
	state: SessionState,
	/// Handle used to stop the spawned watcher.
	watcher: Option<TargetWatcher>,
	/// Identity of the active watcher; events from any other are stale.
	active: Option<WatcherId>,
	/// Bumped whenever the identifier namespace resets (reconfigure). Logo
	/// completions from an older generation are dropped.
	generation: u64,
	entries: Vec<TargetEntry>,
	package: Option<Arc<DataPackage>>,
	manifest: Option<Manifest>,
	events: SessionEvents,
}

impl DiscoverySession {
	pub fn new(capability_available: bool) -> Self {
		Self {
			state: if capability_available {
				SessionState::Configuring
			} else {
				SessionState::Idle
			},
			watcher: None,
			active: None,
			generation: 0,
			entries: Vec::new(),
			package: None,
			manifest: None,
			events: SessionEvents::new(),
		}
	}

	pub fn state(&self) -> SessionState {
		self.state
	}

	pub fn events(&self) -> &SessionEvents {
		&self.events
	}

	/// The ordered list of currently visible entries.
	pub fn visible(&self) -> &[TargetEntry] {
		&self.entries
	}

	pub fn entry(&self, id: &TargetId) -> Option<&TargetEntry> {
		self.entries.iter().find(|entry| entry.id() == id)
	}

	/// The package discovery was started with, plus its prepared manifest.
	pub fn active_package(&self) -> Option<(Arc<DataPackage>, Manifest)> {
		Some((self.package.clone()?, self.manifest.clone()?))
	}

	/// Build the package view and start a watcher scoped to it. Returns the
	/// watcher's event stream for the owning task to drain into
	/// [`Self::apply`].
	pub async fn start(
		&mut self,
		mdns: &Arc<Mdns>,
		package: DataPackage,
		options: DiscoveryOptions,
		local_instance: Option<String>,
	) -> Result<mpsc::Receiver<DiscoveryEvent>, SessionError> {
		if self.state != SessionState::Configuring {
			return Err(SessionError::NotConfiguring(self.state));
		}
		if package.is_empty() {
			return Err(SessionError::EmptyPackage);
		}

		let manifest = Manifest::from_package(&package).await?;
		let (watcher, events_rx) = TargetWatcher::spawn(mdns.clone(), options, local_instance)?;
		debug!("started watcher '{}'", watcher.id());

		self.active = Some(watcher.id());
		self.watcher = Some(watcher);
		self.package = Some(Arc::new(package));
		self.manifest = Some(manifest);
		self.set_state(SessionState::Running);
		Ok(events_rx)
	}

	/// Apply one watcher event to the visible list.
	///
	/// Events whose originating watcher is not the active one are discarded
	/// regardless of content; they belong to a superseded or stopped
	/// watcher racing against its own shutdown.
	pub fn apply(&mut self, event: DiscoveryEvent) {
		if self.active != Some(event.watcher) {
			debug!(
				"discarding event from inactive watcher '{}'",
				event.watcher
			);
			return;
		}

		match event.event {
			WatcherEvent::TargetAdded(target) => match self.position(&target.id) {
				// An add for an id we already show is applied as an update so
				// the list stays uniquely addressable by id.
				Some(index) => self.update_entry(index, target),
				None => {
					let _ = self.events.send(SessionEvent::TargetAdded {
						target: target.clone(),
					});
					self.entries.push(TargetEntry::new(target));
				}
			},
			WatcherEvent::TargetUpdated(target) => {
				if let Some(index) = self.position(&target.id) {
					self.update_entry(index, target);
				}
			}
			WatcherEvent::TargetRemoved(id) => {
				if let Some(index) = self.position(&id) {
					self.entries.remove(index);
					let _ = self.events.send(SessionEvent::TargetRemoved { id });
				}
			}
		}
	}

	/// Begin lazy logo retrieval for an entry. When a fetch should start,
	/// returns the handle plus the generation tag the completion must carry.
	pub fn request_logo(&mut self, id: &TargetId) -> Option<(IconHandle, u64)> {
		let generation = self.generation;
		let index = self.position(id)?;
		match self.entries[index].request_logo() {
			LogoRequest::Fetch(handle) => Some((handle, generation)),
			LogoRequest::Settled(change) => {
				let _ = self.events.send(SessionEvent::EntryChanged {
					id: id.clone(),
					change,
				});
				None
			}
			LogoRequest::Noop => None,
		}
	}

	/// Apply a logo load completion posted back from a fetch task.
	pub fn apply_logo_result(
		&mut self,
		generation: u64,
		id: &TargetId,
		result: Result<Icon, beam_icons::Error>,
	) {
		if generation != self.generation {
			debug!("dropping logo result for '{id}' from an old generation");
			return;
		}
		let Some(index) = self.position(id) else {
			return;
		};

		let change = match result {
			Ok(icon) => self.entries[index].logo_loaded(icon),
			Err(err) => {
				debug!("logo load for '{id}' failed: {err}");
				self.entries[index].logo_failed()
			}
		};
		if let Some(change) = change {
			let _ = self.events.send(SessionEvent::EntryChanged {
				id: id.clone(),
				change,
			});
		}
	}

	/// Stop the watcher but keep the visible list, so the user can still act
	/// on already discovered targets.
	pub fn stop(&mut self) {
		if self.active.take().is_some() {
			if let Some(watcher) = self.watcher.take() {
				debug!("stopping watcher '{}'", watcher.id());
				watcher.stop();
			}
			self.set_state(SessionState::Stopped);
		}
	}

	/// Discard the watcher and the whole visible list and return to the
	/// configuration form. Prior target ids are meaningless afterwards.
	pub fn reconfigure(&mut self) {
		if self.state == SessionState::Idle {
			return;
		}

		self.active = None;
		if let Some(watcher) = self.watcher.take() {
			watcher.stop();
		}
		self.entries.clear();
		self.package = None;
		self.manifest = None;
		self.generation += 1;
		let _ = self.events.send(SessionEvent::ListCleared);
		self.set_state(SessionState::Configuring);
	}

	fn set_state(&mut self, state: SessionState) {
		self.state = state;
		let _ = self.events.send(SessionEvent::StateChanged { state });
	}

	fn position(&self, id: &TargetId) -> Option<usize> {
		self.entries.iter().position(|entry| entry.id() == id)
	}

	fn update_entry(&mut self, index: usize, target: DiscoveredTarget) {
		let id = target.id.clone();
		let changes = self.entries[index].update(target);
		for change in changes {
			let _ = self
				.events
				.send(SessionEvent::EntryChanged {
					id: id.clone(),
					change,
				});
		}
	}

	/// Put the session into `Running` against a fabricated watcher id,
	/// without any mDNS backing. Test-only seam for driving [`Self::apply`].
	#[cfg(test)]
	pub(crate) fn force_running(&mut self, watcher: WatcherId) {
		self.active = Some(watcher);
		self.state = SessionState::Running;
	}
}

#[cfg(test)]
mod tests {
	use beam_discovery::TargetMetadata;
	use tokio::sync::broadcast::error::TryRecvError;

	use super::*;
	use crate::entry::{EntryChange, LogoState};

	fn target(id: &str, label: &str) -> DiscoveredTarget {
		DiscoveredTarget {
			id: TargetId::new(id),
			metadata: TargetMetadata {
				label: label.to_string(),
				app_id: "beam.demo".to_string(),
				enabled: true,
				logo: Some("/tmp/logo.png".to_string()),
			},
			addresses: vec![],
		}
	}

	fn event(watcher: WatcherId, event: WatcherEvent) -> DiscoveryEvent {
		DiscoveryEvent { watcher, event }
	}

	fn running_session() -> (DiscoverySession, WatcherId) {
		let mut session = DiscoverySession::new(true);
		let watcher = WatcherId::new();
		session.force_running(watcher);
		(session, watcher)
	}

	#[test]
	fn add_update_remove_scenario() {
		let (mut session, watcher) = running_session();

		session.apply(event(watcher, WatcherEvent::TargetAdded(target("A", "X"))));
		assert_eq!(session.visible().len(), 1);
		assert_eq!(session.visible()[0].label(), "X");

		session.apply(event(watcher, WatcherEvent::TargetUpdated(target("A", "Y"))));
		assert_eq!(session.visible().len(), 1);
		assert_eq!(session.visible()[0].label(), "Y");

		session.apply(event(
			watcher,
			WatcherEvent::TargetRemoved(TargetId::new("A")),
		));
		assert!(session.visible().is_empty());
	}

	#[test]
	fn update_and_remove_for_unknown_ids_are_noops() {
		let (mut session, watcher) = running_session();
		session.apply(event(watcher, WatcherEvent::TargetAdded(target("A", "X"))));

		session.apply(event(watcher, WatcherEvent::TargetUpdated(target("B", "Y"))));
		session.apply(event(
			watcher,
			WatcherEvent::TargetRemoved(TargetId::new("C")),
		));

		assert_eq!(session.visible().len(), 1);
		assert_eq!(session.visible()[0].label(), "X");
	}

	#[test]
	fn events_from_another_watcher_are_ignored() {
		let (mut session, _watcher) = running_session();

		session.apply(event(
			WatcherId::new(),
			WatcherEvent::TargetAdded(target("A", "X")),
		));
		assert!(session.visible().is_empty());
	}

	#[test]
	fn events_after_stop_are_ignored() {
		let (mut session, watcher) = running_session();
		session.apply(event(watcher, WatcherEvent::TargetAdded(target("A", "X"))));
		session.stop();

		session.apply(event(watcher, WatcherEvent::TargetAdded(target("B", "Y"))));
		assert_eq!(session.visible().len(), 1);
	}

	#[test]
	fn stop_keeps_the_list_reconfigure_clears_it() {
		let (mut session, watcher) = running_session();
		session.apply(event(watcher, WatcherEvent::TargetAdded(target("A", "X"))));

		session.stop();
		assert_eq!(session.state(), SessionState::Stopped);
		assert_eq!(session.visible().len(), 1);

		session.reconfigure();
		assert_eq!(session.state(), SessionState::Configuring);
		assert!(session.visible().is_empty());
	}

	#[test]
	fn add_collision_updates_in_place() {
		let (mut session, watcher) = running_session();
		session.apply(event(watcher, WatcherEvent::TargetAdded(target("A", "X"))));
		session.apply(event(watcher, WatcherEvent::TargetAdded(target("A", "Y"))));

		assert_eq!(session.visible().len(), 1);
		assert_eq!(session.visible()[0].label(), "Y");
	}

	#[test]
	fn update_raises_exactly_three_entry_changes() {
		let (mut session, watcher) = running_session();
		session.apply(event(watcher, WatcherEvent::TargetAdded(target("A", "X"))));

		let mut rx = session.events().subscribe();
		session.apply(event(watcher, WatcherEvent::TargetUpdated(target("A", "Y"))));

		let mut changes = Vec::new();
		loop {
			match rx.try_recv() {
				Ok(SessionEvent::EntryChanged { change, .. }) => changes.push(change),
				Ok(other) => panic!("unexpected event {other:?}"),
				Err(TryRecvError::Empty) => break,
				Err(err) => panic!("{err}"),
			}
		}
		assert_eq!(
			changes,
			vec![EntryChange::Label, EntryChange::Logo, EntryChange::Enabled]
		);
	}

	#[test]
	fn logo_results_from_an_old_generation_are_dropped() {
		let (mut session, watcher) = running_session();
		session.apply(event(watcher, WatcherEvent::TargetAdded(target("A", "X"))));

		let id = TargetId::new("A");
		let (_handle, generation) = session.request_logo(&id).unwrap();

		session.reconfigure();
		session.force_running(watcher);
		session.apply(event(watcher, WatcherEvent::TargetAdded(target("A", "X"))));

		// Completion tagged with the pre-reconfigure generation is stale.
		session.apply_logo_result(generation, &id, Err(beam_icons::Error::TooLarge));
		assert_eq!(
			*session.entry(&id).unwrap().logo(),
			LogoState::NotRequested
		);
	}

	#[test]
	fn failed_logo_load_enters_fallback_and_notifies_once() {
		let (mut session, watcher) = running_session();
		session.apply(event(watcher, WatcherEvent::TargetAdded(target("A", "X"))));

		let id = TargetId::new("A");
		let (_handle, generation) = session.request_logo(&id).unwrap();
		// Second request while the load is in flight does nothing.
		assert!(session.request_logo(&id).is_none());

		let mut rx = session.events().subscribe();
		session.apply_logo_result(generation, &id, Err(beam_icons::Error::TooLarge));
		session.apply_logo_result(generation, &id, Err(beam_icons::Error::TooLarge));

		assert!(matches!(
			rx.try_recv(),
			Ok(SessionEvent::EntryChanged {
				change: EntryChange::Logo,
				..
			})
		));
		assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
		assert_eq!(*session.entry(&id).unwrap().logo(), LogoState::Fallback);
	}
}
