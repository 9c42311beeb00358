use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{DiscoveredTarget, Metadata, TargetId, TargetMetadata};

/// The mDNS service type all Beam transfer targets advertise under.
pub const SERVICE_NAME: &str = "_beam._tcp.local.";

#[derive(Debug, Error)]
pub enum DiscoveryError {
	#[error("error with mdns discovery: {0}")]
	Mdns(#[from] mdns_sd::Error),
}

/// Owns the mDNS daemon.
///
/// Constructing one doubles as the capability probe: on hosts where the
/// daemon cannot start there is no discovery, and the embedding application
/// should show its "not supported" notice instead of the configuration form.
pub struct Mdns {
	daemon: ServiceDaemon,
}

impl Mdns {
	pub fn new() -> Result<Self, DiscoveryError> {
		Ok(Self {
			daemon: ServiceDaemon::new()?,
		})
	}

	pub(crate) fn browse(&self) -> Result<mdns_sd::Receiver<ServiceEvent>, DiscoveryError> {
		Ok(self.daemon.browse(SERVICE_NAME)?)
	}

	pub(crate) fn stop_browse(&self) {
		if let Err(err) = self.daemon.stop_browse(SERVICE_NAME) {
			debug!("error stopping mdns browse: {err}");
		}
	}

	/// Shut down the daemon. Active advertisements and browses die with it.
	pub fn shutdown(&self) {
		if let Err(err) = self.daemon.shutdown() {
			warn!("error shutting down mdns daemon: {err}");
		}
	}
}

/// An active advertisement of this host as a transfer target.
///
/// Dropping it withdraws the advertisement, so watchers on other hosts see a
/// remove event.
pub struct TargetAdvertisement {
	mdns: Arc<Mdns>,
	instance: String,
	fullname: String,
	port: u16,
}

impl TargetAdvertisement {
	pub fn register(
		mdns: Arc<Mdns>,
		instance: &str,
		metadata: TargetMetadata,
		port: u16,
	) -> Result<Self, DiscoveryError> {
		let this = Self {
			mdns,
			instance: instance.to_string(),
			fullname: format!("{instance}.{SERVICE_NAME}"),
			port,
		};
		this.announce(metadata)?;
		Ok(this)
	}

	/// The instance name this host is advertised under; equal to the
	/// [`TargetId`] remote watchers will see.
	pub fn instance(&self) -> &str {
		&self.instance
	}

	/// Re-announce with new metadata so browsers see an update event.
	pub fn update(&self, metadata: TargetMetadata) -> Result<(), DiscoveryError> {
		self.announce(metadata)
	}

	fn announce(&self, metadata: TargetMetadata) -> Result<(), DiscoveryError> {
		let map = metadata.to_hashmap();
		let properties: Vec<(&str, &str)> =
			map.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

		// Hostnames must be valid DNS labels even when the instance name
		// isn't one.
		let host = format!(
			"{}.local.",
			self.instance
				.replace(|c: char| !c.is_ascii_alphanumeric(), "-")
		);

		let info = ServiceInfo::new(
			SERVICE_NAME,
			&self.instance,
			&host,
			"",
			self.port,
			&properties[..],
		)?
		.enable_addr_auto();

		debug!("advertising mdns service '{}'", info.get_fullname());
		Ok(self.mdns.daemon.register(info)?)
	}
}

impl Drop for TargetAdvertisement {
	fn drop(&mut self) {
		if let Err(err) = self.mdns.daemon.unregister(&self.fullname) {
			warn!(
				"could not withdraw mdns advertisement '{}': {err}",
				self.fullname
			);
		}
	}
}

/// Convert a resolved mDNS service into a target snapshot. The `Err` carries
/// a human readable reason, matching the [`Metadata`] decode convention.
pub(crate) fn resolved_to_target(resolved: &ServiceInfo) -> Result<DiscoveredTarget, String> {
	let id = TargetId::from_fullname(resolved.get_fullname(), SERVICE_NAME)
		.ok_or_else(|| format!("unexpected fullname '{}'", resolved.get_fullname()))?;

	let properties: HashMap<String, String> = resolved
		.get_properties()
		.iter()
		.map(|property| (property.key().to_string(), property.val_str().to_string()))
		.collect();
	let metadata = TargetMetadata::from_hashmap(&properties)?;

	let port = resolved.get_port();
	let mut addresses: Vec<SocketAddr> = resolved
		.get_addresses()
		.iter()
		.map(|addr| SocketAddr::new(*addr, port))
		.collect();
	addresses.sort_by_key(|addr| !addr.is_ipv4());

	Ok(DiscoveredTarget {
		id,
		metadata,
		addresses,
	})
}
