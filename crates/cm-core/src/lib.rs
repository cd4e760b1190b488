mod error;
mod memory;
mod normalize;

pub use error::CoreError;
pub use memory::{MemoryMeta, MemoryRecord, NoteStatus, Scope, SymbolRef};
pub use normalize::{normalize, sanitize_file_path, slugify, trigrams, truncate_code_points};
