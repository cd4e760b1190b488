pub mod error;
pub mod fulltext;
pub mod manifest;
pub mod relational;

pub use error::StorageError;
pub use fulltext::{FullTextIndex, MemoryHit};
pub use manifest::ChunkManifest;
pub use relational::RelationalStore;
