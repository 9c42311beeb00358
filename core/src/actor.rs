use std::sync::Arc;

use beam_discovery::{DiscoveredTarget, DiscoveryEvent, DiscoveryOptions, Mdns, TargetId};
use beam_icons::Icon;
use beam_package::DataPackage;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
	events::SessionEvent,
	operations,
	session::{DiscoverySession, SessionError, SessionState},
	OperationError,
};

enum SessionCommand {
	Start {
		package: DataPackage,
		options: DiscoveryOptions,
		reply: oneshot::Sender<Result<(), SessionError>>,
	},
	Stop,
	Reconfigure,
	RequestLogo(TargetId),
	SendTo {
		id: TargetId,
		reply: oneshot::Sender<Result<Uuid, OperationError>>,
	},
	Visible {
		reply: oneshot::Sender<Vec<DiscoveredTarget>>,
	},
	State {
		reply: oneshot::Sender<SessionState>,
	},
}

struct LogoCompletion {
	generation: u64,
	id: TargetId,
	result: Result<Icon, beam_icons::Error>,
}

/// Cloneable handle to a running [`SessionActor`].
///
/// Dropping every handle shuts the actor down.
#[derive(Clone)]
pub struct SessionHandle {
	commands: mpsc::Sender<SessionCommand>,
	events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
	pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
		self.events.subscribe()
	}

	pub async fn start(
		&self,
		package: DataPackage,
		options: DiscoveryOptions,
	) -> Result<(), SessionError> {
		let (tx, rx) = oneshot::channel();
		self.commands
			.send(SessionCommand::Start {
				package,
				options,
				reply: tx,
			})
			.await
			.map_err(|_| SessionError::Closed)?;
		rx.await.map_err(|_| SessionError::Closed)?
	}

	pub async fn stop(&self) {
		let _ = self.commands.send(SessionCommand::Stop).await;
	}

	pub async fn reconfigure(&self) {
		let _ = self.commands.send(SessionCommand::Reconfigure).await;
	}

	/// Kick off lazy logo retrieval for one entry. The result arrives as an
	/// `EntryChanged { change: Logo }` event.
	pub async fn request_logo(&self, id: TargetId) {
		let _ = self.commands.send(SessionCommand::RequestLogo(id)).await;
	}

	/// Invoke a transfer of the active package to a visible target. Returns
	/// the transfer id; progress and the final result arrive as events.
	pub async fn send_to(&self, id: TargetId) -> Result<Uuid, OperationError> {
		let (tx, rx) = oneshot::channel();
		self.commands
			.send(SessionCommand::SendTo { id, reply: tx })
			.await
			.map_err(|_| OperationError::Closed)?;
		rx.await.map_err(|_| OperationError::Closed)?
	}

	/// Snapshot of the currently visible targets, in list order.
	pub async fn visible(&self) -> Vec<DiscoveredTarget> {
		let (tx, rx) = oneshot::channel();
		if self
			.commands
			.send(SessionCommand::Visible { reply: tx })
			.await
			.is_err()
		{
			return Vec::new();
		}
		rx.await.unwrap_or_default()
	}

	pub async fn state(&self) -> Option<SessionState> {
		let (tx, rx) = oneshot::channel();
		self.commands
			.send(SessionCommand::State { reply: tx })
			.await
			.ok()?;
		rx.await.ok()
	}
}

/// Owns a [`DiscoverySession`] and serializes every mutation onto one task.
///
/// Watcher events and logo completions originate on other tasks; they reach
/// the session only through this actor's channels, which is what gives the
/// session its single-task ownership guarantee.
pub struct SessionActor {
	session: DiscoverySession,
	mdns: Arc<Mdns>,
	local_instance: Option<String>,
	commands: mpsc::Receiver<SessionCommand>,
	watcher_events: Option<mpsc::Receiver<DiscoveryEvent>>,
	logo_tx: mpsc::Sender<LogoCompletion>,
	logo_rx: mpsc::Receiver<LogoCompletion>,
}

impl SessionActor {
	/// Spawn the actor onto the runtime and hand back its command handle.
	///
	/// `local_instance` is this host's own advertisement name, if it is also
	/// receiving; the watcher will never surface it as a target.
	pub fn spawn(mdns: Arc<Mdns>, local_instance: Option<String>) -> SessionHandle {
		let session = DiscoverySession::new(true);
		let (commands_tx, commands_rx) = mpsc::channel(32);
		let (logo_tx, logo_rx) = mpsc::channel(16);
		let events = session.events().sender();

		tokio::spawn(
			Self {
				session,
				mdns,
				local_instance,
				commands: commands_rx,
				watcher_events: None,
				logo_tx,
				logo_rx,
			}
			.run(),
		);

		SessionHandle {
			commands: commands_tx,
			events,
		}
	}

	async fn run(mut self) {
		loop {
			tokio::select! {
				command = self.commands.recv() => match command {
					Some(command) => self.handle_command(command).await,
					// Every handle is gone.
					None => break,
				},
				event = next_watcher_event(&mut self.watcher_events) => match event {
					Some(event) => self.session.apply(event),
					// The watcher loop drained after a stop.
					None => self.watcher_events = None,
				},
				Some(done) = self.logo_rx.recv() => {
					self.session
						.apply_logo_result(done.generation, &done.id, done.result);
				}
			}
		}

		self.session.reconfigure();
		debug!("session actor stopped");
	}

	async fn handle_command(&mut self, command: SessionCommand) {
		match command {
			SessionCommand::Start {
				package,
				options,
				reply,
			} => {
				let result = self
					.session
					.start(&self.mdns, package, options, self.local_instance.clone())
					.await;
				let _ = reply.send(match result {
					Ok(events_rx) => {
						self.watcher_events = Some(events_rx);
						Ok(())
					}
					Err(err) => Err(err),
				});
			}
			SessionCommand::Stop => self.session.stop(),
			SessionCommand::Reconfigure => {
				self.session.reconfigure();
				self.watcher_events = None;
			}
			SessionCommand::RequestLogo(id) => {
				if let Some((handle, generation)) = self.session.request_logo(&id) {
					let logo_tx = self.logo_tx.clone();
					tokio::spawn(async move {
						let result = beam_icons::load(&handle).await;
						let _ = logo_tx
							.send(LogoCompletion {
								generation,
								id,
								result,
							})
							.await;
					});
				}
			}
			SessionCommand::SendTo { id, reply } => {
				let _ = reply.send(self.begin_send(id));
			}
			SessionCommand::Visible { reply } => {
				let _ = reply.send(
					self.session
						.visible()
						.iter()
						.map(|entry| entry.target().clone())
						.collect(),
				);
			}
			SessionCommand::State { reply } => {
				let _ = reply.send(self.session.state());
			}
		}
	}

	fn begin_send(&mut self, id: TargetId) -> Result<Uuid, OperationError> {
		let entry = self
			.session
			.entry(&id)
			.ok_or_else(|| OperationError::UnknownTarget(id.clone()))?;
		if !entry.enabled() {
			return Err(OperationError::TargetDisabled(id));
		}
		let target = entry.target().clone();
		let (package, manifest) = self
			.session
			.active_package()
			.ok_or(OperationError::NoPackage)?;

		let transfer_id = Uuid::new_v4();
		let events = self.session.events().sender();
		let _ = events.send(SessionEvent::TransferStarted {
			id: transfer_id,
			target: id,
		});

		tokio::spawn(async move {
			match operations::send_package(transfer_id, package, manifest, target, events.clone())
				.await
			{
				Ok(()) => {
					let _ = events.send(SessionEvent::TransferCompleted { id: transfer_id });
				}
				Err(err) => {
					warn!("({transfer_id}): transfer failed: {err}");
					let _ = events.send(SessionEvent::TransferFailed {
						id: transfer_id,
						reason: err.to_string(),
					});
				}
			}
		});

		Ok(transfer_id)
	}
}

async fn next_watcher_event(
	rx: &mut Option<mpsc::Receiver<DiscoveryEvent>>,
) -> Option<DiscoveryEvent> {
	match rx {
		Some(rx) => rx.recv().await,
		None => std::future::pending().await,
	}
}
