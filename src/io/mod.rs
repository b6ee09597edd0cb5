//! Storage layer: the read-only object store client and the local slide cache.

mod local_cache;
mod store;

pub use local_cache::{flatten_key, LocalSlideCache};
pub use store::{
    create_s3_client, normalize_endpoint, object_key, BucketStatus, ObjectReader, ObjectStore,
    S3Store,
};
