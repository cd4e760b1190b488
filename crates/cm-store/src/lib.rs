pub mod error;
pub mod manager;

pub use error::StoreError;
pub use manager::{
    AppendRequest, BulkIndexReport, GrepReplaceResult, IndexOutcome, MemoryElement,
    MemorySearchResult, MemoryStore, ReconcileReport, UpdateRequest,
};
