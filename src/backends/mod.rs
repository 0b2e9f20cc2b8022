//! Backend implementations of the [`RangeReader`](crate::RangeReader)
//! contract: local files (positioned reads or mmap), in-memory buffers,
//! HTTP(S) servers, and cloud object stores.

mod file;
pub use file::FileReader;

mod memory;
pub use memory::MemoryReader;

mod mmap;
pub use mmap::MmapReader;

#[cfg(feature = "http")]
mod http;
#[cfg(feature = "http")]
pub use http::{HttpAuth, HttpReader, HttpReaderBuilder, RetryPolicy};

mod object_store;
pub use object_store::ObjectStoreReader;
