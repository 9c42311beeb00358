use std::{
	fmt::{self, Display},
	net::SocketAddr,
};

use serde::Serialize;

use crate::TargetMetadata;

/// Stable string key identifying a transfer target.
///
/// Derived from the target's mDNS instance name. Unique within one watcher's
/// lifetime; a new watcher starts a fresh identifier namespace, so ids must
/// never be compared across watchers.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Extract the id from an mDNS fullname like
	/// `living-room._beam._tcp.local.`.
	pub(crate) fn from_fullname(fullname: &str, service_name: &str) -> Option<Self> {
		fullname
			.strip_suffix(service_name)
			.and_then(|instance| instance.strip_suffix('.'))
			.filter(|instance| !instance.is_empty())
			.map(Self::new)
	}
}

impl Display for TargetId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// A read-only snapshot of one discovered transfer target, as delivered with
/// an add or update event.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredTarget {
	pub id: TargetId,
	pub metadata: TargetMetadata,
	/// Where the target can be reached, IPv4 first.
	pub addresses: Vec<SocketAddr>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn id_from_fullname() {
		assert_eq!(
			TargetId::from_fullname("living-room._beam._tcp.local.", "_beam._tcp.local."),
			Some(TargetId::new("living-room"))
		);
		assert_eq!(
			TargetId::from_fullname("_beam._tcp.local.", "_beam._tcp.local."),
			None
		);
		assert_eq!(
			TargetId::from_fullname("other._printer._tcp.local.", "_beam._tcp.local."),
			None
		);
	}
}
