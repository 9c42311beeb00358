use std::{collections::HashMap, fmt::Debug};

use serde::Serialize;

/// Converts a metadata value to and from mDNS TXT records.
pub trait Metadata: Debug + Clone + Send + Sync + 'static {
	fn to_hashmap(self) -> HashMap<String, String>;

	fn from_hashmap(data: &HashMap<String, String>) -> Result<Self, String>
	where
		Self: Sized;
}

/// What a transfer target advertises about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetMetadata {
	/// Human readable display label.
	pub label: String,
	/// Identifier of the application behind the target. Discovery options can
	/// allow-list on this.
	pub app_id: String,
	/// Whether the target currently accepts transfers. Disabled targets are
	/// still listed, they just can't be invoked.
	pub enabled: bool,
	/// Where the target's logo can be fetched from (path or http(s) URL).
	pub logo: Option<String>,
}

impl Metadata for TargetMetadata {
	fn to_hashmap(self) -> HashMap<String, String> {
		let mut map = HashMap::with_capacity(4);
		map.insert("label".to_owned(), self.label);
		map.insert("app".to_owned(), self.app_id);
		if !self.enabled {
			map.insert("enabled".to_owned(), "false".to_owned());
		}
		if let Some(logo) = self.logo {
			map.insert("logo".to_owned(), logo);
		}
		map
	}

	fn from_hashmap(data: &HashMap<String, String>) -> Result<Self, String>
	where
		Self: Sized,
	{
		Ok(Self {
			label: data
				.get("label")
				.ok_or_else(|| {
					"TXT record for field 'label' missing. Unable to decode 'TargetMetadata'!"
						.to_owned()
				})?
				.to_owned(),
			app_id: data
				.get("app")
				.ok_or_else(|| {
					"TXT record for field 'app' missing. Unable to decode 'TargetMetadata'!"
						.to_owned()
				})?
				.to_owned(),
			enabled: data
				.get("enabled")
				.map(|v| {
					v.parse()
						.map_err(|_| "Unable to parse 'enabled' TXT record!".to_owned())
				})
				.transpose()?
				.unwrap_or(true),
			logo: data.get("logo").map(|v| v.to_owned()),
		})
	}
}
