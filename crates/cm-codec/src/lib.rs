pub mod chunker;
pub mod error;
mod header;

pub use chunker::{chunk_by_headings, MemoryChunk};
pub use error::CodecError;
pub use header::{emit_document, parse_document, NAMESPACE};
