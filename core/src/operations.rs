use std::{
	net::SocketAddr,
	path::{Path, PathBuf},
	sync::{atomic::AtomicBool, Arc},
	time::Duration,
};

use beam_discovery::{DiscoveredTarget, TargetId};
use beam_package::{DataPackage, Manifest, ManifestError, Transfer, TransferError};
use thiserror::Error;
use tokio::{
	fs::{create_dir_all, File},
	io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter},
	net::{TcpListener, TcpStream},
	sync::broadcast,
	time::sleep,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::SessionEvent;

/// How long the sender waits for the target to accept or reject before
/// giving up.
pub(crate) const ACCEPT_TIMEOUT: Duration = Duration::from_secs(60);

const RESPONSE_ACCEPTED: u8 = 1;

#[derive(Debug, Error)]
pub enum OperationError {
	#[error("no target '{0}' is currently visible")]
	UnknownTarget(TargetId),
	#[error("target '{0}' is disabled")]
	TargetDisabled(TargetId),
	#[error("no package is active; start discovery first")]
	NoPackage,
	#[error("the target advertised no reachable address")]
	NoAddress,
	#[error("error connecting to the target: {0}")]
	Connect(std::io::Error),
	#[error("error negotiating the transfer: {0}")]
	Negotiate(std::io::Error),
	#[error("the target rejected the transfer")]
	Rejected,
	#[error("the target did not answer in time")]
	Timeout,
	#[error(transparent)]
	Manifest(#[from] ManifestError),
	#[error(transparent)]
	Transfer(#[from] TransferError),
	#[error("io error opening source file '{0}': {1}")]
	SourceFile(PathBuf, std::io::Error),
	#[error("the incoming file name '{0}' is not usable")]
	UnsafeFileName(String),
	#[error("io error creating '{0}': {1}")]
	Create(PathBuf, std::io::Error),
	#[error("the session actor is gone")]
	Closed,
}

/// Hand the active package to one target: connect, send the manifest, await
/// the accept byte, then stream every file as blocks.
///
/// Failures are returned to the caller (and surfaced as `TransferFailed`
/// events by the actor) rather than swallowed.
pub(crate) async fn send_package(
	id: Uuid,
	package: Arc<DataPackage>,
	manifest: Manifest,
	target: DiscoveredTarget,
	events: broadcast::Sender<SessionEvent>,
) -> Result<(), OperationError> {
	let mut stream = connect(&target.addresses).await?;
	debug!("({id}): connected to '{}', sending manifest", target.id);

	let bytes = manifest.to_bytes()?;
	stream
		.write_all(&bytes)
		.await
		.map_err(OperationError::Negotiate)?;
	stream.flush().await.map_err(OperationError::Negotiate)?;

	debug!("({id}): waiting for response");
	let response = tokio::select! {
		response = stream.read_u8() => response.map_err(OperationError::Negotiate)?,
		// A little slack in case the user answered right on the deadline.
		_ = sleep(ACCEPT_TIMEOUT + Duration::from_secs(5)) => return Err(OperationError::Timeout),
	};
	if response != RESPONSE_ACCEPTED {
		return Err(OperationError::Rejected);
	}

	let cancelled = AtomicBool::new(false);
	let mut transfer = Transfer::new(
		&manifest,
		|percent| {
			let _ = events.send(SessionEvent::TransferProgress { id, percent });
		},
		&cancelled,
	);

	for (descriptor, path) in manifest.files.iter().zip(package.files.iter()) {
		debug!("({id}): transmitting '{}' from '{path:?}'", descriptor.name);
		let file = File::open(path)
			.await
			.map_err(|err| OperationError::SourceFile(path.clone(), err))?;
		transfer
			.send(&mut stream, BufReader::new(file), descriptor)
			.await?;
	}
	stream.flush().await.map_err(OperationError::Negotiate)?;

	debug!("({id}): finished");
	Ok(())
}

async fn connect(addresses: &[SocketAddr]) -> Result<TcpStream, OperationError> {
	let mut last_err = None;
	for addr in addresses {
		match TcpStream::connect(addr).await {
			Ok(stream) => return Ok(stream),
			Err(err) => {
				debug!("connection to '{addr}' failed: {err}");
				last_err = Some(err);
			}
		}
	}
	Err(last_err
		.map(OperationError::Connect)
		.unwrap_or(OperationError::NoAddress))
}

/// Serve incoming transfers forever, writing accepted packages under
/// `download_dir`. The demo accepts everything; a hardened client would ask
/// the user between the manifest and the accept byte.
pub async fn receive_loop(
	listener: TcpListener,
	download_dir: PathBuf,
	events: broadcast::Sender<SessionEvent>,
) -> std::io::Result<()> {
	loop {
		let (stream, addr) = listener.accept().await?;
		debug!("incoming connection from '{addr}'");

		let download_dir = download_dir.clone();
		let events = events.clone();
		tokio::spawn(async move {
			let id = Uuid::new_v4();
			if let Err(err) = handle_incoming(id, stream, addr, &download_dir, &events).await {
				warn!("({id}): incoming transfer failed: {err}");
				let _ = events.send(SessionEvent::IncomingFailed {
					id,
					reason: err.to_string(),
				});
			}
		});
	}
}

async fn handle_incoming(
	id: Uuid,
	mut stream: TcpStream,
	addr: SocketAddr,
	download_dir: &Path,
	events: &broadcast::Sender<SessionEvent>,
) -> Result<(), OperationError> {
	let manifest = Manifest::from_stream(&mut stream).await?;

	info!(
		"({id}): incoming package '{}' with {} file(s) from '{addr}'",
		manifest.properties.title,
		manifest.files.len()
	);
	let _ = events.send(SessionEvent::IncomingTransfer {
		id,
		from: addr,
		title: manifest.properties.title.clone(),
		files: manifest.files.iter().map(|file| file.name.clone()).collect(),
	});

	stream
		.write_all(&[RESPONSE_ACCEPTED])
		.await
		.map_err(OperationError::Negotiate)?;
	stream.flush().await.map_err(OperationError::Negotiate)?;

	create_dir_all(download_dir)
		.await
		.map_err(|err| OperationError::Create(download_dir.to_path_buf(), err))?;

	let cancelled = AtomicBool::new(false);
	let mut transfer = Transfer::new(
		&manifest,
		|percent| {
			let _ = events.send(SessionEvent::TransferProgress { id, percent });
		},
		&cancelled,
	);

	for descriptor in &manifest.files {
		let path = download_dir.join(safe_file_name(&descriptor.name)?);
		debug!("({id}): receiving '{}' into '{path:?}'", descriptor.name);
		let file = File::create(&path)
			.await
			.map_err(|err| OperationError::Create(path.clone(), err))?;
		transfer
			.receive(&mut stream, BufWriter::new(file), descriptor)
			.await?;
	}

	for link in &manifest.links {
		info!("({id}): received link '{link}'");
	}
	if let Some(text) = &manifest.text {
		info!("({id}): received text ({} bytes)", text.len());
	}
	if let Some(html) = &manifest.html {
		info!("({id}): received html ({} bytes)", html.len());
	}
	for (key, _) in &manifest.custom {
		info!("({id}): received custom entry '{key}'");
	}

	info!("({id}): complete");
	let _ = events.send(SessionEvent::IncomingCompleted { id });
	Ok(())
}

/// Guard against path traversal in peer controlled file names.
fn safe_file_name(name: &str) -> Result<&str, OperationError> {
	match Path::new(name).file_name().and_then(|name| name.to_str()) {
		Some(clean) if clean == name => Ok(clean),
		_ => Err(OperationError::UnsafeFileName(name.to_string())),
	}
}
