//! Logo retrieval for discovered transfer targets.
//!
//! Targets advertise where their logo lives (a local path or an http(s) URL);
//! this crate fetches the bytes and decodes them to RGBA via the `image`
//! crate. Callers decide what a failed load means: the session layer turns
//! any [`Error`] into its sticky fallback visual state.

mod error;

pub use error::{Error, Result};

use std::path::PathBuf;

use tracing::trace;

/// Logos bigger than this are rejected before decoding. A target logo is a
/// list thumbnail, not a photo library.
pub const MAX_LOGO_SIZE: usize = 1024 * 1024;

/// Where a target's logo can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IconHandle {
	Path(PathBuf),
	Url(String),
}

impl IconHandle {
	/// Interpret a raw locator string from a target advertisement.
	pub fn parse(raw: &str) -> Self {
		if raw.starts_with("http://") || raw.starts_with("https://") {
			Self::Url(raw.to_string())
		} else {
			Self::Path(PathBuf::from(raw))
		}
	}
}

/// A decoded logo: RGBA8 pixels, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icon {
	width: u32,
	height: u32,
	rgba: Vec<u8>,
}

impl Icon {
	pub fn width(&self) -> u32 {
		self.width
	}

	pub fn height(&self) -> u32 {
		self.height
	}

	pub fn rgba(&self) -> &[u8] {
		&self.rgba
	}
}

/// Fetch and decode the logo behind a handle.
pub async fn load(handle: &IconHandle) -> Result<Icon> {
	let bytes = match handle {
		IconHandle::Path(path) => tokio::fs::read(path).await?,
		IconHandle::Url(url) => {
			trace!("fetching logo from '{url}'");
			reqwest::get(url)
				.await?
				.error_for_status()?
				.bytes()
				.await?
				.to_vec()
		}
	};

	if bytes.len() > MAX_LOGO_SIZE {
		return Err(Error::TooLarge);
	}

	decode(&bytes)
}

/// Decode raw image bytes to RGBA8.
pub fn decode(bytes: &[u8]) -> Result<Icon> {
	let image = image::load_from_memory(bytes)?;
	let rgba = image.to_rgba8();
	Ok(Icon {
		width: rgba.width(),
		height: rgba.height(),
		rgba: rgba.into_raw(),
	})
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use super::*;

	fn png_bytes(width: u32, height: u32) -> Vec<u8> {
		let image = image::RgbaImage::from_pixel(width, height, image::Rgba([0, 128, 255, 255]));
		let mut bytes = Vec::new();
		image
			.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
			.unwrap();
		bytes
	}

	#[test]
	fn parse_handle() {
		assert_eq!(
			IconHandle::parse("https://example.com/logo.png"),
			IconHandle::Url("https://example.com/logo.png".to_string())
		);
		assert_eq!(
			IconHandle::parse("/usr/share/icons/app.png"),
			IconHandle::Path(PathBuf::from("/usr/share/icons/app.png"))
		);
	}

	#[test]
	fn decode_png() {
		let icon = decode(&png_bytes(4, 2)).unwrap();
		assert_eq!((icon.width(), icon.height()), (4, 2));
		assert_eq!(icon.rgba().len(), 4 * 2 * 4);
	}

	#[test]
	fn garbage_bytes_fail_to_decode() {
		assert!(matches!(
			decode(b"definitely not an image"),
			Err(Error::Image(_))
		));
	}

	#[tokio::test]
	async fn load_from_path() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("logo.png");
		tokio::fs::write(&path, png_bytes(8, 8)).await.unwrap();

		let icon = load(&IconHandle::Path(path)).await.unwrap();
		assert_eq!(icon.width(), 8);
	}

	#[tokio::test]
	async fn missing_path_is_an_io_error() {
		let err = load(&IconHandle::Path(PathBuf::from("/nope/logo.png")))
			.await
			.unwrap_err();
		assert!(matches!(err, Error::Io(_)));
	}
}
