//! Storage client adapter - S3 bucket operations
//!
//! This module is organized into submodules:
//! - `types`: Listing rows, pages and object bodies
//! - `client`: S3 client creation from session credentials
//! - `list`: List operations (buckets, object pages, lazy lister)
//! - `objects`: Object operations (get, delete, bucket access)
//! - `store`: The `ObjectStore` seam and its S3 implementation

mod client;
mod list;
mod objects;
mod sdk_error;
mod store;
mod types;

#[cfg(test)]
pub(crate) mod memory;

pub use list::ObjectLister;
pub use store::{ObjectStore, S3Store};
pub use types::{is_folder_key, ByteChunks, ObjectBody, ObjectEntry, ObjectPage};
