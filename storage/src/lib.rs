mod blob;
mod error;
mod store;
mod weights;

pub use blob::{BlobStore, HttpBlobStore, MemoryBlobStore};
pub use error::StoreError;
pub use store::{mint_run_id, DeleteStatus, RunStore};
pub use weights::{decode_snapshot, encode_snapshot};
