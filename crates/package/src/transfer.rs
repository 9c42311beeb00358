use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::{FileDescriptor, Manifest};

/// Size of one transfer block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSize(u32);

impl BlockSize {
	pub fn from_file_size(_size: u64) -> Self {
		Self(131_072) // 128 KiB
	}

	pub fn size(&self) -> u32 {
		self.0
	}
}

/// One block of file content, framed as offset + length + payload.
#[derive(Debug)]
pub struct Block<'a> {
	pub offset: u64,
	pub size: u64,
	pub data: &'a [u8],
}

impl Block<'_> {
	pub fn to_bytes(&self) -> Vec<u8> {
		let mut buf = Vec::with_capacity(16 + self.data.len());
		buf.extend_from_slice(&self.offset.to_le_bytes());
		buf.extend_from_slice(&self.size.to_le_bytes());
		buf.extend_from_slice(self.data);
		buf
	}
}

#[derive(Debug, Error)]
pub enum TransferError {
	#[error("io error reading the source file: {0}")]
	SourceIo(std::io::Error),
	#[error("io error on the transfer stream: {0}")]
	StreamIo(std::io::Error),
	#[error("io error writing the destination file: {0}")]
	DestinationIo(std::io::Error),
	#[error("peer sent a block of {got} bytes where at most {max} were expected")]
	OversizedBlock { got: u64, max: u64 },
	#[error("peer sent a block at offset {got}, expected offset {expected}")]
	UnexpectedOffset { expected: u64, got: u64 },
	#[error("file changed size during transfer (expected {expected} bytes, got {actual})")]
	SizeMismatch { expected: u64, actual: u64 },
	#[error("the transfer was cancelled")]
	Cancelled,
}

/// Streams the files named by a manifest over any ordered byte stream,
/// reporting progress as a percentage of the whole package and honoring a
/// shared cancellation flag.
///
/// Files must be sent and received in manifest order; the block framing
/// carries no file identifier.
pub struct Transfer<'a, F> {
	block_size: BlockSize,
	on_progress: F,
	total: u64,
	transferred: u64,
	cancelled: &'a AtomicBool,
}

impl<'a, F> Transfer<'a, F>
where
	F: Fn(u8),
{
	pub fn new(manifest: &Manifest, on_progress: F, cancelled: &'a AtomicBool) -> Self {
		let total = manifest.total_file_size();
		Self {
			block_size: BlockSize::from_file_size(total),
			on_progress,
			total,
			transferred: 0,
			cancelled,
		}
	}

	fn progress(&mut self, bytes: u64) {
		self.transferred += bytes;
		let percent = if self.total == 0 {
			100
		} else {
			(self.transferred * 100 / self.total) as u8
		};
		(self.on_progress)(percent);
	}

	/// Send one file's content as a run of blocks. `descriptor` must be the
	/// manifest entry this file was announced under.
	pub async fn send(
		&mut self,
		stream: &mut (impl AsyncWrite + Unpin),
		mut file: impl AsyncBufRead + Unpin,
		descriptor: &FileDescriptor,
	) -> Result<(), TransferError> {
		let mut buf = vec![0u8; self.block_size.size() as usize];
		let mut offset: u64 = 0;

		loop {
			if self.cancelled.load(Ordering::Relaxed) {
				return Err(TransferError::Cancelled);
			}

			let read = file.read(&mut buf).await.map_err(TransferError::SourceIo)?;
			if read == 0 {
				if offset != descriptor.size {
					return Err(TransferError::SizeMismatch {
						expected: descriptor.size,
						actual: offset,
					});
				}
				break;
			}

			let block = Block {
				offset,
				size: read as u64,
				data: &buf[..read],
			};
			trace!(
				"sending block at offset {} of size {}",
				block.offset,
				block.size
			);
			stream
				.write_all(&block.to_bytes())
				.await
				.map_err(TransferError::StreamIo)?;

			offset += read as u64;
			if offset > descriptor.size {
				return Err(TransferError::SizeMismatch {
					expected: descriptor.size,
					actual: offset,
				});
			}
			self.progress(read as u64);
		}

		Ok(())
	}

	/// Receive one file's content. The destination is flushed before this
	/// returns so a buffered writer can be passed by value.
	pub async fn receive(
		&mut self,
		stream: &mut (impl AsyncRead + Unpin),
		mut file: impl AsyncWrite + Unpin,
		descriptor: &FileDescriptor,
	) -> Result<(), TransferError> {
		let max = u64::from(self.block_size.size());
		let mut buf = vec![0u8; self.block_size.size() as usize];
		let mut offset: u64 = 0;

		while offset < descriptor.size {
			if self.cancelled.load(Ordering::Relaxed) {
				return Err(TransferError::Cancelled);
			}

			let block_offset = stream
				.read_u64_le()
				.await
				.map_err(TransferError::StreamIo)?;
			let size = stream
				.read_u64_le()
				.await
				.map_err(TransferError::StreamIo)?;

			if block_offset != offset {
				return Err(TransferError::UnexpectedOffset {
					expected: offset,
					got: block_offset,
				});
			}
			if size > max {
				return Err(TransferError::OversizedBlock { got: size, max });
			}
			if offset + size > descriptor.size {
				return Err(TransferError::SizeMismatch {
					expected: descriptor.size,
					actual: offset + size,
				});
			}

			stream
				.read_exact(&mut buf[..size as usize])
				.await
				.map_err(TransferError::StreamIo)?;
			trace!("received block at offset {} of size {}", block_offset, size);
			file.write_all(&buf[..size as usize])
				.await
				.map_err(TransferError::DestinationIo)?;

			offset += size;
			self.progress(size);
		}

		file.flush().await.map_err(TransferError::DestinationIo)?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use std::sync::{
		atomic::{AtomicU8, Ordering},
		Arc,
	};

	use tokio::{io::BufReader, sync::oneshot};

	use super::*;
	use crate::PackageProperties;

	fn manifest_for(files: Vec<FileDescriptor>) -> Manifest {
		Manifest {
			properties: PackageProperties::default(),
			text: None,
			html: None,
			links: vec![],
			custom: vec![],
			files,
		}
	}

	#[tokio::test]
	async fn transfer_one_file() {
		let (mut client, mut server) = tokio::io::duplex(64);

		let data = b"transfer target discovery".to_vec();
		let manifest = manifest_for(vec![FileDescriptor {
			name: "demo.txt".to_string(),
			size: data.len() as u64,
		}]);

		let (tx, rx) = oneshot::channel();
		tokio::spawn({
			let manifest = manifest.clone();
			let data = data.clone();
			async move {
				let cancelled = AtomicBool::new(false);
				let mut transfer = Transfer::new(&manifest, |_| {}, &cancelled);
				let file = BufReader::new(std::io::Cursor::new(data));
				tx.send(()).unwrap();
				transfer
					.send(&mut client, file, &manifest.files[0])
					.await
					.unwrap();
			}
		});

		rx.await.unwrap();

		let last_percent = Arc::new(AtomicU8::new(0));
		let cancelled = AtomicBool::new(false);
		let mut transfer = Transfer::new(
			&manifest,
			{
				let last_percent = last_percent.clone();
				move |percent| last_percent.store(percent, Ordering::Relaxed)
			},
			&cancelled,
		);

		let mut result = Vec::new();
		transfer
			.receive(&mut server, &mut result, &manifest.files[0])
			.await
			.unwrap();

		assert_eq!(result, data);
		assert_eq!(last_percent.load(Ordering::Relaxed), 100);
	}

	#[tokio::test]
	async fn zero_length_file_completes_without_blocks() {
		let (_client, mut server) = tokio::io::duplex(64);

		let manifest = manifest_for(vec![FileDescriptor {
			name: "empty".to_string(),
			size: 0,
		}]);
		let cancelled = AtomicBool::new(false);
		let mut transfer = Transfer::new(&manifest, |_| {}, &cancelled);

		let mut result = Vec::new();
		transfer
			.receive(&mut server, &mut result, &manifest.files[0])
			.await
			.unwrap();
		assert!(result.is_empty());
	}

	#[tokio::test]
	async fn shrunk_source_file_is_a_size_mismatch() {
		let (mut client, _server) = tokio::io::duplex(1024);

		let manifest = manifest_for(vec![FileDescriptor {
			name: "demo.txt".to_string(),
			size: 10,
		}]);
		let cancelled = AtomicBool::new(false);
		let mut transfer = Transfer::new(&manifest, |_| {}, &cancelled);

		let file = BufReader::new(std::io::Cursor::new(b"short".to_vec()));
		let err = transfer
			.send(&mut client, file, &manifest.files[0])
			.await
			.unwrap_err();
		assert!(matches!(
			err,
			TransferError::SizeMismatch {
				expected: 10,
				actual: 5
			}
		));
	}

	#[tokio::test]
	async fn cancelled_flag_aborts_the_transfer() {
		let (mut client, _server) = tokio::io::duplex(64);

		let manifest = manifest_for(vec![FileDescriptor {
			name: "demo.txt".to_string(),
			size: 5,
		}]);
		let cancelled = AtomicBool::new(true);
		let mut transfer = Transfer::new(&manifest, |_| {}, &cancelled);

		let file = BufReader::new(std::io::Cursor::new(b"hello".to_vec()));
		let err = transfer
			.send(&mut client, file, &manifest.files[0])
			.await
			.unwrap_err();
		assert!(matches!(err, TransferError::Cancelled));
	}
}
