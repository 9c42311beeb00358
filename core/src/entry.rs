use beam_discovery::{DiscoveredTarget, TargetId};
use beam_icons::{Icon, IconHandle};
use serde::Serialize;

/// Which observable field of an entry changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryChange {
	Label,
	Logo,
	Enabled,
}

/// Logo retrieval progress for one entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum LogoState {
	#[default]
	NotRequested,
	Loading,
	Loaded(Icon),
	/// Sticky failure state: no further load is attempted until the entry is
	/// updated with a fresh snapshot.
	Fallback,
}

/// What a logo request resolved to.
#[derive(Debug, PartialEq, Eq)]
pub enum LogoRequest {
	/// Fetch this handle and report back via [`TargetEntry::logo_loaded`] or
	/// [`TargetEntry::logo_failed`].
	Fetch(IconHandle),
	/// The request settled immediately (the target advertises no logo);
	/// deliver the returned notification.
	Settled(EntryChange),
	/// A load already ran or is in flight; nothing to do.
	Noop,
}

/// Mirrors one discovered target for a UI-bound list.
///
/// The identifier is fixed for the adapter's lifetime; update and remove
/// events are matched to it by id. Change notifications are returned to the
/// caller instead of being raised inline so the session can deliver them
/// through its event channel, off any in-progress binding pass.
#[derive(Debug)]
pub struct TargetEntry {
	target: DiscoveredTarget,
	logo: LogoState,
}

impl TargetEntry {
	pub fn new(target: DiscoveredTarget) -> Self {
		Self {
			target,
			logo: LogoState::NotRequested,
		}
	}

	pub fn id(&self) -> &TargetId {
		&self.target.id
	}

	pub fn label(&self) -> &str {
		&self.target.metadata.label
	}

	pub fn enabled(&self) -> bool {
		self.target.metadata.enabled
	}

	pub fn logo(&self) -> &LogoState {
		&self.logo
	}

	/// The snapshot this entry currently mirrors.
	pub fn target(&self) -> &DiscoveredTarget {
		&self.target
	}

	/// Replace the underlying snapshot. Clears a sticky logo fallback so the
	/// fresh snapshot gets another chance, and raises exactly three change
	/// notifications.
	pub fn update(&mut self, target: DiscoveredTarget) -> [EntryChange; 3] {
		debug_assert_eq!(self.target.id, target.id);
		self.target = target;
		self.logo = LogoState::NotRequested;
		[EntryChange::Label, EntryChange::Logo, EntryChange::Enabled]
	}

	/// Begin lazy logo retrieval. The first request decides everything:
	/// either a fetch starts, or a target without a logo settles straight
	/// into the fallback state.
	pub fn request_logo(&mut self) -> LogoRequest {
		if self.logo != LogoState::NotRequested {
			return LogoRequest::Noop;
		}

		match &self.target.metadata.logo {
			Some(raw) => {
				let handle = IconHandle::parse(raw);
				self.logo = LogoState::Loading;
				LogoRequest::Fetch(handle)
			}
			None => match self.logo_failed() {
				Some(change) => LogoRequest::Settled(change),
				None => LogoRequest::Noop,
			},
		}
	}

	/// A fetch completed. Ignored unless a load is actually in flight, so a
	/// stale completion can't resurrect a fallback.
	pub fn logo_loaded(&mut self, icon: Icon) -> Option<EntryChange> {
		match self.logo {
			LogoState::Loading => {
				self.logo = LogoState::Loaded(icon);
				Some(EntryChange::Logo)
			}
			_ => None,
		}
	}

	/// Enter the sticky fallback state. Raises a single Logo notification on
	/// first entry; repeat failures are suppressed.
	pub fn logo_failed(&mut self) -> Option<EntryChange> {
		match self.logo {
			LogoState::Fallback => None,
			_ => {
				self.logo = LogoState::Fallback;
				Some(EntryChange::Logo)
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use beam_discovery::TargetMetadata;

	use super::*;

	fn target(label: &str, logo: Option<&str>) -> DiscoveredTarget {
		DiscoveredTarget {
			id: TargetId::new("a"),
			metadata: TargetMetadata {
				label: label.to_string(),
				app_id: "beam.demo".to_string(),
				enabled: true,
				logo: logo.map(String::from),
			},
			addresses: vec![],
		}
	}

	fn icon() -> Icon {
		beam_icons::decode(&{
			let image = image::RgbaImage::from_pixel(1, 1, image::Rgba([255, 0, 0, 255]));
			let mut bytes = Vec::new();
			image
				.write_to(
					&mut std::io::Cursor::new(&mut bytes),
					image::ImageFormat::Png,
				)
				.unwrap();
			bytes
		})
		.unwrap()
	}

	#[test]
	fn update_clears_fallback_and_raises_three_notifications() {
		let mut entry = TargetEntry::new(target("X", Some("/tmp/logo.png")));
		assert!(entry.logo_failed().is_some());
		assert_eq!(*entry.logo(), LogoState::Fallback);

		let changes = entry.update(target("Y", Some("/tmp/logo.png")));
		assert_eq!(
			changes,
			[EntryChange::Label, EntryChange::Logo, EntryChange::Enabled]
		);
		assert_eq!(entry.label(), "Y");
		assert_eq!(*entry.logo(), LogoState::NotRequested);
	}

	#[test]
	fn failure_before_any_load_is_sticky() {
		let mut entry = TargetEntry::new(target("X", Some("/tmp/logo.png")));

		assert!(matches!(entry.request_logo(), LogoRequest::Fetch(_)));
		assert_eq!(entry.logo_failed(), Some(EntryChange::Logo));

		// Converged: no second notification, no further load attempts.
		assert_eq!(entry.logo_failed(), None);
		assert_eq!(entry.request_logo(), LogoRequest::Noop);
		assert_eq!(*entry.logo(), LogoState::Fallback);
	}

	#[test]
	fn failure_after_a_successful_load_converges_to_the_same_fallback() {
		let mut entry = TargetEntry::new(target("X", Some("/tmp/logo.png")));

		assert!(matches!(entry.request_logo(), LogoRequest::Fetch(_)));
		assert_eq!(entry.logo_loaded(icon()), Some(EntryChange::Logo));

		// The image-failed path after a load fell over.
		assert_eq!(entry.logo_failed(), Some(EntryChange::Logo));
		assert_eq!(entry.logo_failed(), None);
		assert_eq!(entry.request_logo(), LogoRequest::Noop);
		assert_eq!(*entry.logo(), LogoState::Fallback);
	}

	#[test]
	fn missing_logo_settles_into_fallback_with_one_notification() {
		let mut entry = TargetEntry::new(target("X", None));
		assert_eq!(
			entry.request_logo(),
			LogoRequest::Settled(EntryChange::Logo)
		);
		assert_eq!(entry.request_logo(), LogoRequest::Noop);
		assert_eq!(*entry.logo(), LogoState::Fallback);
	}

	#[test]
	fn stale_completion_cannot_resurrect_a_fallback() {
		let mut entry = TargetEntry::new(target("X", Some("/tmp/logo.png")));
		assert!(matches!(entry.request_logo(), LogoRequest::Fetch(_)));
		assert!(entry.logo_failed().is_some());

		assert_eq!(entry.logo_loaded(icon()), None);
		assert_eq!(*entry.logo(), LogoState::Fallback);
	}
}
