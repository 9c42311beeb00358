use std::path::PathBuf;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{DataPackage, PackageProperties};

/// Upper bound on the inline text/HTML bodies a manifest may carry. Anything
/// bigger belongs in a file entry.
const MAX_INLINE_LEN: u32 = 8 * 1024 * 1024; // 8 MiB

#[derive(Debug, Error)]
pub enum ManifestError {
	#[error("io error reading size of '{0}': {1}")]
	FileMetadata(PathBuf, std::io::Error),
	#[error("file '{0}' has no usable name")]
	FileName(PathBuf),
	#[error("field '{0}' is too long for the wire format")]
	FieldTooLong(&'static str),
	#[error("section '{0}' has too many entries for the wire format")]
	SectionTooLarge(&'static str),
	#[error("field '{0}' exceeds the inline size limit")]
	Oversized(&'static str),
	#[error("io error reading field '{0}': {1}")]
	Io(&'static str, std::io::Error),
	#[error("error utf-8 decoding field '{0}': {1}")]
	Utf8(&'static str, std::string::FromUtf8Error),
}

/// One file named by a manifest. The bytes themselves follow out of band as
/// [`Block`](crate::Block)s, in manifest order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
	pub name: String,
	pub size: u64,
}

/// The wire form of a [`DataPackage`].
///
/// Inline representations (links, text, HTML, custom entries) travel inside
/// the manifest itself; files are described by name and size only. All
/// integers are little-endian and all strings are length-prefixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
	pub properties: PackageProperties,
	pub text: Option<String>,
	pub html: Option<String>,
	pub links: Vec<String>,
	pub custom: Vec<(String, String)>,
	pub files: Vec<FileDescriptor>,
}

impl Manifest {
	/// Build the manifest for a package, stat'ing each file for its size.
	pub async fn from_package(package: &DataPackage) -> Result<Self, ManifestError> {
		let mut files = Vec::with_capacity(package.files.len());
		for path in &package.files {
			let metadata = tokio::fs::metadata(path)
				.await
				.map_err(|err| ManifestError::FileMetadata(path.clone(), err))?;
			let name = path
				.file_name()
				.and_then(|name| name.to_str())
				.ok_or_else(|| ManifestError::FileName(path.clone()))?
				.to_string();

			files.push(FileDescriptor {
				name,
				size: metadata.len(),
			});
		}

		Ok(Self {
			properties: package.properties.clone(),
			text: package.text.clone(),
			html: package.html.clone(),
			links: package.links.clone(),
			custom: package
				.custom
				.iter()
				.map(|(k, v)| (k.clone(), v.clone()))
				.collect(),
			files,
		})
	}

	pub fn total_file_size(&self) -> u64 {
		self.files.iter().map(|file| file.size).sum()
	}

	pub fn to_bytes(&self) -> Result<Vec<u8>, ManifestError> {
		let mut buf = Vec::new();

		put_str(&mut buf, "title", &self.properties.title)?;
		put_str(&mut buf, "description", &self.properties.description)?;
		put_body(&mut buf, "text", self.text.as_deref())?;
		put_body(&mut buf, "html", self.html.as_deref())?;

		put_count(&mut buf, "links", self.links.len())?;
		for link in &self.links {
			put_str(&mut buf, "link", link)?;
		}

		put_count(&mut buf, "custom", self.custom.len())?;
		for (key, value) in &self.custom {
			put_str(&mut buf, "custom key", key)?;
			put_str(&mut buf, "custom value", value)?;
		}

		put_count(&mut buf, "files", self.files.len())?;
		for file in &self.files {
			put_str(&mut buf, "file name", &file.name)?;
			buf.extend_from_slice(&file.size.to_le_bytes());
		}

		Ok(buf)
	}

	pub async fn from_stream(
		stream: &mut (impl AsyncRead + Unpin),
	) -> Result<Self, ManifestError> {
		let title = read_str(stream, "title").await?;
		let description = read_str(stream, "description").await?;
		let text = read_body(stream, "text").await?;
		let html = read_body(stream, "html").await?;

		let link_count = read_count(stream, "links").await?;
		let mut links = Vec::with_capacity(link_count);
		for _ in 0..link_count {
			links.push(read_str(stream, "link").await?);
		}

		let custom_count = read_count(stream, "custom").await?;
		let mut custom = Vec::with_capacity(custom_count);
		for _ in 0..custom_count {
			let key = read_str(stream, "custom key").await?;
			let value = read_str(stream, "custom value").await?;
			custom.push((key, value));
		}

		let file_count = read_count(stream, "files").await?;
		let mut files = Vec::with_capacity(file_count);
		for _ in 0..file_count {
			let name = read_str(stream, "file name").await?;
			let size = stream
				.read_u64_le()
				.await
				.map_err(|err| ManifestError::Io("file size", err))?;
			files.push(FileDescriptor { name, size });
		}

		Ok(Self {
			properties: PackageProperties { title, description },
			text,
			html,
			links,
			custom,
			files,
		})
	}
}

fn put_str(buf: &mut Vec<u8>, field: &'static str, value: &str) -> Result<(), ManifestError> {
	let len = u16::try_from(value.len()).map_err(|_| ManifestError::FieldTooLong(field))?;
	buf.extend_from_slice(&len.to_le_bytes());
	buf.extend_from_slice(value.as_bytes());
	Ok(())
}

fn put_body(
	buf: &mut Vec<u8>,
	field: &'static str,
	value: Option<&str>,
) -> Result<(), ManifestError> {
	match value {
		Some(value) => {
			let len = u32::try_from(value.len()).map_err(|_| ManifestError::FieldTooLong(field))?;
			if len > MAX_INLINE_LEN {
				return Err(ManifestError::Oversized(field));
			}
			buf.push(1);
			buf.extend_from_slice(&len.to_le_bytes());
			buf.extend_from_slice(value.as_bytes());
		}
		None => buf.push(0),
	}
	Ok(())
}

fn put_count(buf: &mut Vec<u8>, section: &'static str, len: usize) -> Result<(), ManifestError> {
	let len = u16::try_from(len).map_err(|_| ManifestError::SectionTooLarge(section))?;
	buf.extend_from_slice(&len.to_le_bytes());
	Ok(())
}

async fn read_str(
	stream: &mut (impl AsyncRead + Unpin),
	field: &'static str,
) -> Result<String, ManifestError> {
	let len = stream
		.read_u16_le()
		.await
		.map_err(|err| ManifestError::Io(field, err))?;
	let mut bytes = vec![0u8; len as usize];
	stream
		.read_exact(&mut bytes)
		.await
		.map_err(|err| ManifestError::Io(field, err))?;
	String::from_utf8(bytes).map_err(|err| ManifestError::Utf8(field, err))
}

async fn read_body(
	stream: &mut (impl AsyncRead + Unpin),
	field: &'static str,
) -> Result<Option<String>, ManifestError> {
	let present = stream
		.read_u8()
		.await
		.map_err(|err| ManifestError::Io(field, err))?;
	if present == 0 {
		return Ok(None);
	}

	let len = stream
		.read_u32_le()
		.await
		.map_err(|err| ManifestError::Io(field, err))?;
	if len > MAX_INLINE_LEN {
		return Err(ManifestError::Oversized(field));
	}
	let mut bytes = vec![0u8; len as usize];
	stream
		.read_exact(&mut bytes)
		.await
		.map_err(|err| ManifestError::Io(field, err))?;
	String::from_utf8(bytes)
		.map(Some)
		.map_err(|err| ManifestError::Utf8(field, err))
}

async fn read_count(
	stream: &mut (impl AsyncRead + Unpin),
	section: &'static str,
) -> Result<usize, ManifestError> {
	stream
		.read_u16_le()
		.await
		.map(usize::from)
		.map_err(|err| ManifestError::Io(section, err))
}
