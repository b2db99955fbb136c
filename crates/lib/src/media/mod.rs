//! Media handling: two-phase fetch from the platform API and safe placement
//! on local disk. Both stages are invoked only by the pipeline worker.

mod fetch;
mod store;

pub use fetch::{FetchError, FetchedMedia, MediaFetcher};
pub use store::{ensure_media_dirs, StorageWriter, StoreError, StoredFile};
