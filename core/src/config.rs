use std::{
	collections::{BTreeMap, HashSet},
	num::NonZeroUsize,
	path::{Path, PathBuf},
};

use beam_discovery::{DiscoveryOptions, TargetMetadata};
use beam_package::{DataPackage, PackageProperties};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;

/// Name of the config file, resolved relative to the demo's data directory.
pub const CONFIG_FILE_NAME: &str = "beam.json";

const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("there was an i/o error: {0}")]
	Io(#[from] std::io::Error),
	#[error("error (de)serializing the config: {0}")]
	Serde(#[from] serde_json::Error),
	#[error("config version {0} is newer than this build understands")]
	UnsupportedVersion(u32),
}

fn default_version() -> u32 {
	CURRENT_VERSION
}

fn default_true() -> bool {
	true
}

fn default_device_name() -> String {
	"beam-device".to_string()
}

fn default_app_id() -> String {
	"beam.demo".to_string()
}

fn default_download_dir() -> PathBuf {
	PathBuf::from("beam-downloads")
}

/// The configuration form's state, persisted between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemoConfig {
	#[serde(default = "default_version")]
	pub version: u32,

	/// How this host announces itself when receiving.
	#[serde(default = "default_device_name")]
	pub device_name: String,
	#[serde(default = "default_app_id")]
	pub app_id: String,
	/// Logo locator advertised alongside the name (path or http(s) URL).
	#[serde(default)]
	pub logo: Option<String>,
	#[serde(default = "default_download_dir")]
	pub download_dir: PathBuf,

	// The package being assembled.
	#[serde(default)]
	pub title: String,
	#[serde(default)]
	pub description: String,
	#[serde(default)]
	pub files: Vec<PathBuf>,
	#[serde(default)]
	pub links: Vec<String>,
	#[serde(default)]
	pub text: String,
	#[serde(default = "default_true")]
	pub text_enabled: bool,
	#[serde(default)]
	pub html: String,
	#[serde(default = "default_true")]
	pub html_enabled: bool,
	#[serde(default)]
	pub custom: BTreeMap<String, String>,
	#[serde(default = "default_true")]
	pub custom_enabled: bool,

	// Discovery options.
	#[serde(default)]
	pub allowed_apps: Vec<String>,
	#[serde(default)]
	pub max_targets: Option<usize>,
}

impl Default for DemoConfig {
	fn default() -> Self {
		Self {
			version: CURRENT_VERSION,
			device_name: default_device_name(),
			app_id: default_app_id(),
			logo: None,
			download_dir: default_download_dir(),
			title: String::new(),
			description: String::new(),
			files: Vec::new(),
			links: Vec::new(),
			text: String::new(),
			text_enabled: true,
			html: String::new(),
			html_enabled: true,
			custom: BTreeMap::new(),
			custom_enabled: true,
			allowed_apps: Vec::new(),
			max_targets: None,
		}
	}
}

impl DemoConfig {
	/// Load the config, falling back to defaults when the file doesn't exist
	/// yet.
	pub async fn load(path: &Path) -> Result<Self, ConfigError> {
		let raw = match fs::read(path).await {
			Ok(raw) => raw,
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
				return Ok(Self::default())
			}
			Err(err) => return Err(err.into()),
		};

		let config: Self = serde_json::from_slice(&raw)?;
		if config.version > CURRENT_VERSION {
			return Err(ConfigError::UnsupportedVersion(config.version));
		}
		Ok(config)
	}

	/// Save atomically: write a sibling temp file, then rename it over the
	/// target so a crash can't leave a half-written config.
	pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
		let bytes = serde_json::to_vec_pretty(self)?;
		let tmp = path.with_extension("json.tmp");
		fs::write(&tmp, &bytes).await?;
		fs::rename(&tmp, path).await?;
		Ok(())
	}

	/// Assemble the package the form currently describes, honoring the
	/// enable checkboxes.
	pub fn package(&self) -> DataPackage {
		DataPackage {
			files: self.files.clone(),
			links: self.links.clone(),
			text: (self.text_enabled && !self.text.is_empty()).then(|| self.text.clone()),
			html: (self.html_enabled && !self.html.is_empty()).then(|| self.html.clone()),
			custom: if self.custom_enabled {
				self.custom.clone()
			} else {
				BTreeMap::new()
			},
			properties: PackageProperties {
				title: self.title.clone(),
				description: self.description.clone(),
			},
		}
	}

	pub fn options(&self) -> DiscoveryOptions {
		DiscoveryOptions {
			max_targets: self.max_targets.and_then(NonZeroUsize::new),
			allowed_apps: (!self.allowed_apps.is_empty())
				.then(|| self.allowed_apps.iter().cloned().collect::<HashSet<_>>()),
		}
	}

	/// Metadata advertised when this host registers as a target.
	pub fn metadata(&self) -> TargetMetadata {
		TargetMetadata {
			label: self.device_name.clone(),
			app_id: self.app_id.clone(),
			enabled: true,
			logo: self.logo.clone(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn missing_file_loads_defaults() {
		let dir = tempfile::tempdir().unwrap();
		let config = DemoConfig::load(&dir.path().join(CONFIG_FILE_NAME))
			.await
			.unwrap();
		assert_eq!(config, DemoConfig::default());
	}

	#[tokio::test]
	async fn save_then_load_roundtrip() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join(CONFIG_FILE_NAME);

		let mut config = DemoConfig::default();
		config.device_name = "kitchen".to_string();
		config.links.push("https://example.com".to_string());
		config.max_targets = Some(3);
		config.save(&path).await.unwrap();

		assert_eq!(DemoConfig::load(&path).await.unwrap(), config);
	}

	#[tokio::test]
	async fn newer_versions_are_refused() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join(CONFIG_FILE_NAME);
		tokio::fs::write(&path, r#"{"version": 999}"#).await.unwrap();

		assert!(matches!(
			DemoConfig::load(&path).await,
			Err(ConfigError::UnsupportedVersion(999))
		));
	}

	#[test]
	fn package_honors_the_enable_checkboxes() {
		let mut config = DemoConfig::default();
		config.text = "hello".to_string();
		config.html = "<b>hello</b>".to_string();
		config.html_enabled = false;
		config
			.custom
			.insert("x-beam/color".to_string(), "teal".to_string());
		config.custom_enabled = false;

		let package = config.package();
		assert_eq!(package.text.as_deref(), Some("hello"));
		assert_eq!(package.html, None);
		assert!(package.custom.is_empty());
	}

	#[test]
	fn empty_allow_list_means_no_filtering() {
		let options = DemoConfig::default().options();
		assert!(options.allowed_apps.is_none());
		assert!(options.max_targets.is_none());
	}
}
