use std::{collections::HashSet, num::NonZeroUsize};

/// Configuration limiting which and how many targets a watcher surfaces.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
	/// Cap on concurrently surfaced targets. `None` means unlimited. When a
	/// surfaced target disappears, a later advertisement may fill its slot.
	pub max_targets: Option<NonZeroUsize>,
	/// Allow-list of target application identifiers. `None` admits every app.
	pub allowed_apps: Option<HashSet<String>>,
}

impl DiscoveryOptions {
	pub(crate) fn admits(&self, app_id: &str) -> bool {
		self.allowed_apps
			.as_ref()
			.map_or(true, |allowed| allowed.contains(app_id))
	}
}
