pub mod fetcher;
pub mod normalizer;
pub mod builder;

pub use fetcher::{FetchError, ImageFetcher};
pub use normalizer::{normalize, normalize_image, write_processed, NormalizeError, PROCESSED_SIZE};
pub use builder::{sample_urls, ClassManifest, DatasetBuilder, SampleError};
