use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Whether a memory annotates the repository as a whole or one source file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    Project,
    File,
}

impl Scope {
    pub fn from_str(value: &str) -> Result<Self, CoreError> {
        match value {
            "project" => Ok(Self::Project),
            "file" => Ok(Self::File),
            other => Err(CoreError::InvalidScope {
                value: other.to_string(),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::File => "file",
        }
    }
}

/// Lifecycle status shared by memories, referenced source files, and symbol
/// references. `Deleted` is soft everywhere: bytes stay on disk, rows stay
/// in the relational store, only the full-text index drops the entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteStatus {
    #[default]
    Active,
    Deleted,
}

impl NoteStatus {
    pub fn from_str(value: &str) -> Result<Self, CoreError> {
        match value {
            "active" => Ok(Self::Active),
            "deleted" => Ok(Self::Deleted),
            other => Err(CoreError::InvalidStatus {
                value: other.to_string(),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deleted => "deleted",
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

/// A reference from a memory to a named entity in the code-symbol index.
///
/// The language tag is opaque here; it is compared for equality against the
/// code index's language column and nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRef {
    pub language: String,
    pub name: String,
    #[serde(default)]
    pub status: NoteStatus,
    #[serde(
        rename = "lastResolvedAt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_resolved_at: Option<String>,
}

/// Structured metadata carried in a memory file's frontmatter header.
///
/// Field names and defaults match the on-disk YAML form: absent `scope`,
/// `status`, and `fileStatus` default to `project`/`active`/`active`, and an
/// absent `id` deserializes to the empty string so the codec can report it
/// as a distinct failure instead of a generic YAML error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryMeta {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub status: NoteStatus,
    #[serde(rename = "fileStatus", default)]
    pub file_status: NoteStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symbols: Vec<SymbolRef>,
}

/// A memory row as stored in the relational index, symbol children included.
#[derive(Debug, Clone)]
pub struct MemoryRecord {
    pub row_id: i64,
    pub memory_uid: String,
    pub scope: Scope,
    pub file_path: Option<String>,
    pub md_rel_path: String,
    pub title: Option<String>,
    pub status: NoteStatus,
    pub file_status: NoteStatus,
    pub body_hash: String,
    pub created_at: String,
    pub updated_at: String,
    pub symbols: Vec<SymbolRef>,
}

impl MemoryRecord {
    /// Project the row back into header metadata, for degraded reads where
    /// the on-disk header no longer parses.
    pub fn to_meta(&self) -> MemoryMeta {
        MemoryMeta {
            id: self.memory_uid.clone(),
            scope: self.scope,
            file: self.file_path.clone(),
            title: self.title.clone(),
            status: self.status,
            file_status: self.file_status,
            symbols: self.symbols.clone(),
        }
    }
}
