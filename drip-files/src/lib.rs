//! File sources, chunked reads, and the receiving side of transfers.

pub mod receiver;
pub mod source;

pub use receiver::Downloader;
pub use source::{ChunkReader, FileSource, CHUNK_SIZE};
