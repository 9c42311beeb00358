pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("error while loading the image (via the `image` crate): {0}")]
	Image(#[from] image::ImageError),
	#[error("there was an i/o error: {0}")]
	Io(#[from] std::io::Error),
	#[error("error fetching the image over http: {0}")]
	Http(#[from] reqwest::Error),
	#[error("the image provided is too large (over 1MiB)")]
	TooLarge,
}
