use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use cm_codec::{emit_document, parse_document, NAMESPACE};
use cm_core::{sanitize_file_path, slugify, MemoryMeta, MemoryRecord, NoteStatus, Scope, SymbolRef};
use cm_storage::{FullTextIndex, MemoryHit, RelationalStore};
use regex::Regex;
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::StoreError;

/// Canonical salvage target inside the memory directory.
const CANONICAL_MD: &str = "project.md";

/// Title given to a freshly created canonical memory.
const CANONICAL_TITLE: &str = "Project Memory";

/// A memory as handed back to callers: header metadata, body, and the row
/// fields the relational store tracks alongside them.
#[derive(Debug, Clone)]
pub struct MemoryElement {
    pub meta: MemoryMeta,
    pub md_rel_path: String,
    pub body: String,
    pub created_at: String,
    pub updated_at: String,
    pub body_hash: String,
}

/// Inputs for creating a memory.
#[derive(Debug, Clone, Default)]
pub struct AppendRequest {
    /// Defaults to `project` when absent.
    pub scope: Option<Scope>,
    /// Repo-relative source file path; required when scope is `file`.
    pub file_path: Option<String>,
    pub title: Option<String>,
    pub body: String,
    pub symbols: Vec<SymbolRef>,
}

/// Partial update: only supplied fields are overridden.
#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    pub title: Option<String>,
    pub body: Option<String>,
    pub symbols: Option<Vec<SymbolRef>>,
}

/// One search result after chunk-level dedupe and hydration.
#[derive(Debug, Clone)]
pub struct MemorySearchResult {
    pub memory_uid: String,
    pub title: Option<String>,
    pub scope: Scope,
    pub file_path: Option<String>,
    pub md_rel_path: String,
    pub heading: String,
    pub score: f32,
    pub snippet: String,
}

/// Result of a grep-replace pass over one memory body.
#[derive(Debug, Clone)]
pub struct GrepReplaceResult {
    pub memory_uid: String,
    pub md_rel_path: String,
    pub replacements: usize,
}

/// How a single file fared during indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    Indexed,
    Salvaged,
}

/// Statistics from a full rebuild of the search index.
#[derive(Debug, Default)]
pub struct BulkIndexReport {
    pub files_indexed: usize,
    pub files_salvaged: usize,
    pub files_failed: usize,
    pub failed_details: Vec<(String, String)>,
}

/// Statistics from a reconciliation sweep.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Rows hard-deleted because their `.md` file vanished.
    pub removed: usize,
    pub file_status_flips: usize,
    pub symbol_status_flips: usize,
    /// Files whose headers were rewritten to persist status flips.
    pub rewritten: usize,
    /// Entries skipped because their file no longer parses.
    pub skipped: usize,
}

/// Orchestrates the three representations of a memory: the markdown file on
/// disk, its row in the relational store, and its chunk documents in the
/// full-text index. Single writer per project; a read-only handle serves
/// concurrent searchers from another process.
///
/// Persistence order within a write is file bytes, relational row, full-text
/// chunks, manifest. After a crash the on-disk file is canonical and
/// `bulk_index` restores the derived stores.
pub struct MemoryStore {
    db: RelationalStore,
    fulltext: Option<FullTextIndex>,
    repo_root: PathBuf,
    memory_dir: PathBuf,
    read_only: bool,
}

impl MemoryStore {
    /// Open a writable store. `memory_dir` is relative to the repo root.
    ///
    /// Fails with an `IndexLocked` storage error when another process holds
    /// the index writable; callers may fall back to `open_read_only`.
    pub fn open(
        conn: Connection,
        project_id: i64,
        repo_root: &Path,
        memory_dir: &str,
    ) -> Result<Self, StoreError> {
        let db = RelationalStore::from_connection(conn, project_id)?;
        let search_dir = search_dir(repo_root);
        std::fs::create_dir_all(&search_dir)?;
        let fulltext = FullTextIndex::open(&search_dir, project_id)?;

        Ok(Self {
            db,
            fulltext: Some(fulltext),
            repo_root: repo_root.to_path_buf(),
            memory_dir: repo_root.join(memory_dir),
            read_only: false,
        })
    }

    /// Open for search only: shared-read index handle, no writer lock, every
    /// mutating operation fails with `ReadOnly`.
    pub fn open_read_only(
        conn: Connection,
        project_id: i64,
        repo_root: &Path,
        memory_dir: &str,
    ) -> Result<Self, StoreError> {
        let db = RelationalStore::from_connection(conn, project_id)?;
        let fulltext = FullTextIndex::open_read_only(&search_dir(repo_root), project_id)?;

        Ok(Self {
            db,
            fulltext: Some(fulltext),
            repo_root: repo_root.to_path_buf(),
            memory_dir: repo_root.join(memory_dir),
            read_only: true,
        })
    }

    /// Persist the manifest and release the index handle (and its lock).
    /// Subsequent operations fail with `Closed`.
    pub fn close(&mut self) -> Result<(), StoreError> {
        if let Some(fulltext) = self.fulltext.take() {
            fulltext.persist_manifest()?;
        }
        Ok(())
    }

    pub fn memory_dir(&self) -> &Path {
        &self.memory_dir
    }

    /// Expose the relational store for advanced usage (e.g., testing).
    #[doc(hidden)]
    pub fn relational(&self) -> &RelationalStore {
        &self.db
    }

    // -- CRUD --

    /// Create a memory: write the file, index the row, index the chunks.
    /// On failure after the write, the on-disk file is left in place for the
    /// next bulk index to pick up.
    pub fn append(&mut self, request: AppendRequest) -> Result<MemoryElement, StoreError> {
        self.ensure_writable()?;

        let scope = request.scope.unwrap_or_default();
        let file_path = match scope {
            Scope::Project => None,
            Scope::File => {
                let file_path = request
                    .file_path
                    .as_deref()
                    .filter(|p| !p.trim().is_empty())
                    .ok_or_else(|| {
                        StoreError::InvalidInput(
                            "file-scoped memory requires a file path".to_string(),
                        )
                    })?;
                if !self.repo_root.join(file_path).exists() {
                    return Err(StoreError::InvalidInput(format!(
                        "referenced source file does not exist: {file_path}"
                    )));
                }
                Some(file_path.to_string())
            }
        };

        let uid = Uuid::new_v4().to_string();
        let now = now_rfc3339();

        let mut symbols = request.symbols;
        for symbol in &mut symbols {
            if symbol.last_resolved_at.is_none() {
                symbol.last_resolved_at = Some(now.clone());
            }
        }

        let md_rel_path = self.derive_filename(scope, file_path.as_deref(), request.title.as_deref(), &uid)?;

        let meta = MemoryMeta {
            id: uid.clone(),
            scope,
            file: file_path,
            title: request.title.clone().filter(|t| !t.is_empty()),
            status: NoteStatus::Active,
            file_status: NoteStatus::Active,
            symbols,
        };

        std::fs::create_dir_all(&self.memory_dir)?;
        set_file_mode(&self.memory_dir, 0o755)?;

        self.write_and_index(&meta, &md_rel_path, &request.body)?;
        self.element_for_uid(&uid)
    }

    /// Fetch a memory by uid. A file whose header no longer parses comes
    /// back degraded: row fields as metadata, raw bytes as body.
    pub fn read(&self, uid: &str) -> Result<MemoryElement, StoreError> {
        self.ensure_open()?;
        let record = self
            .db
            .get_by_uid(uid)?
            .ok_or_else(|| StoreError::NotFound(uid.to_string()))?;
        self.load_element(record)
    }

    /// Fetch a memory by its path under the memory directory.
    pub fn read_by_path(&self, md_rel_path: &str) -> Result<MemoryElement, StoreError> {
        self.ensure_open()?;
        let record = self
            .db
            .get_by_md_rel_path(md_rel_path)?
            .ok_or_else(|| StoreError::NotFound(md_rel_path.to_string()))?;
        self.load_element(record)
    }

    /// List memory rows, optionally narrowed by scope and referenced file.
    pub fn list(
        &self,
        scope: Option<Scope>,
        file_path: Option<&str>,
    ) -> Result<Vec<MemoryRecord>, StoreError> {
        self.ensure_open()?;
        Ok(self.db.list_memories(scope, file_path)?)
    }

    /// Apply the supplied overrides and re-run the write pipeline.
    pub fn update(&mut self, uid: &str, request: UpdateRequest) -> Result<MemoryElement, StoreError> {
        self.ensure_writable()?;
        let record = self
            .db
            .get_by_uid(uid)?
            .ok_or_else(|| StoreError::NotFound(uid.to_string()))?;

        let abs = self.memory_dir.join(&record.md_rel_path);
        let raw = std::fs::read(&abs)?;
        let text = String::from_utf8_lossy(&raw);
        let (mut meta, mut body) = parse_document(&text)?;

        if let Some(title) = request.title {
            meta.title = Some(title).filter(|t| !t.is_empty());
        }
        if let Some(new_body) = request.body {
            body = new_body;
        }
        if let Some(mut symbols) = request.symbols {
            let now = now_rfc3339();
            for symbol in &mut symbols {
                symbol.last_resolved_at = Some(now.clone());
            }
            meta.symbols = symbols;
        }

        self.write_and_index(&meta, &record.md_rel_path, &body)?;
        self.element_for_uid(uid)
    }

    /// Soft-delete: flip the header status, keep the file, drop the chunks.
    ///
    /// A failed file write is logged and the relational soft-delete still
    /// happens; so does an unparseable header. Index removal is best-effort.
    pub fn delete(&mut self, uid: &str) -> Result<(), StoreError> {
        self.ensure_writable()?;
        let record = self
            .db
            .get_by_uid(uid)?
            .ok_or_else(|| StoreError::NotFound(uid.to_string()))?;

        let abs = self.memory_dir.join(&record.md_rel_path);
        match std::fs::read(&abs) {
            Ok(raw) => {
                let text = String::from_utf8_lossy(&raw);
                match parse_document(&text) {
                    Ok((mut meta, body)) => {
                        meta.status = NoteStatus::Deleted;
                        match emit_document(&meta, &body) {
                            Ok(bytes) => {
                                if let Err(e) = std::fs::write(&abs, bytes.as_bytes()) {
                                    tracing::warn!(path = %abs.display(), error = %e, "could not persist deleted status to file");
                                }
                            }
                            Err(e) => {
                                tracing::warn!(uid, error = %e, "could not re-emit header for delete");
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(uid, error = %e, "header unparseable, skipping file rewrite");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(path = %abs.display(), error = %e, "memory file unreadable during delete");
            }
        }

        self.db.soft_delete_memory(uid)?;
        if let Err(e) = self.fulltext_mut()?.remove_by_md_rel_path(&record.md_rel_path) {
            tracing::warn!(uid, error = %e, "best-effort index removal failed");
        }
        Ok(())
    }

    /// Regex-replace across one memory's body, selected by uid or path
    /// (exactly one). Zero matches is a no-op.
    pub fn grep_replace(
        &mut self,
        uid: Option<&str>,
        md_rel_path: Option<&str>,
        pattern: &str,
        replacement: &str,
    ) -> Result<GrepReplaceResult, StoreError> {
        self.ensure_writable()?;

        let record = match (uid, md_rel_path) {
            (Some(uid), None) => self
                .db
                .get_by_uid(uid)?
                .ok_or_else(|| StoreError::NotFound(uid.to_string()))?,
            (None, Some(path)) => self
                .db
                .get_by_md_rel_path(path)?
                .ok_or_else(|| StoreError::NotFound(path.to_string()))?,
            _ => {
                return Err(StoreError::InvalidInput(
                    "grep-replace requires exactly one of uid or path".to_string(),
                ))
            }
        };

        let regex = Regex::new(pattern)?;

        let abs = self.memory_dir.join(&record.md_rel_path);
        let raw = std::fs::read(&abs)?;
        let text = String::from_utf8_lossy(&raw);
        let (meta, body) = parse_document(&text)?;

        let replacements = regex.find_iter(&body).count();
        if replacements == 0 {
            return Ok(GrepReplaceResult {
                memory_uid: record.memory_uid,
                md_rel_path: record.md_rel_path,
                replacements: 0,
            });
        }

        let new_body = regex.replace_all(&body, replacement).into_owned();
        self.write_and_index(&meta, &record.md_rel_path, &new_body)?;

        Ok(GrepReplaceResult {
            memory_uid: record.memory_uid,
            md_rel_path: record.md_rel_path,
            replacements,
        })
    }

    // -- Search --

    /// Full-text search over active memories, deduplicated per memory.
    pub fn search(
        &self,
        query: &str,
        scope: Option<Scope>,
        file_path: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemorySearchResult>, StoreError> {
        let fulltext = self.fulltext.as_ref().ok_or(StoreError::Closed)?;
        let hits = fulltext.search(query, scope, file_path, limit)?;
        Ok(hits.into_iter().map(wrap_hit).collect())
    }

    // -- Bulk index & reconciliation --

    /// Rebuild the full-text index and manifest from the memory directory.
    /// Per-file failures are logged and counted, never fatal.
    #[tracing::instrument(skip(self))]
    pub fn bulk_index(&mut self) -> Result<BulkIndexReport, StoreError> {
        self.ensure_writable()?;
        std::fs::create_dir_all(&self.memory_dir)?;
        self.fulltext_mut()?.reset()?;

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.memory_dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|ft| ft.is_file()).unwrap_or(false))
            .map(|entry| entry.path())
            .filter(|path| path.extension().map(|ext| ext == "md").unwrap_or(false))
            .collect();
        paths.sort();

        let mut report = BulkIndexReport::default();
        for path in paths {
            match self.index_file(&path) {
                Ok(IndexOutcome::Indexed) => report.files_indexed += 1,
                Ok(IndexOutcome::Salvaged) => report.files_salvaged += 1,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "indexing failed");
                    report.files_failed += 1;
                    report
                        .failed_details
                        .push((path.display().to_string(), e.to_string()));
                }
            }
        }

        tracing::info!(
            indexed = report.files_indexed,
            salvaged = report.files_salvaged,
            failed = report.files_failed,
            "bulk index finished"
        );
        Ok(report)
    }

    /// Index one memory file: parse, upsert the row, and pass it through the
    /// index gate. An unparseable file is salvaged into `project.md`.
    pub fn index_file(&mut self, abs_path: &Path) -> Result<IndexOutcome, StoreError> {
        self.ensure_writable()?;
        let md_rel_path = self.md_rel_path_of(abs_path)?;
        let raw = std::fs::read(abs_path)?;
        let text = String::from_utf8_lossy(&raw);

        let (mut meta, body) = match parse_document(&text) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(path = %md_rel_path, error = %e, "unparseable memory file, salvaging");
                self.salvage(&md_rel_path, &text)?;
                return Ok(IndexOutcome::Salvaged);
            }
        };

        // A file-scoped memory whose source file vanished while we were not
        // watching gets its ghost status recorded before the upsert.
        if meta.scope == Scope::File && !self.referenced_file_exists(&meta) {
            meta.file_status = NoteStatus::Deleted;
        }

        let body_hash = sha256_hex(&raw);
        self.db.upsert_memory(&meta, &md_rel_path, &body_hash)?;
        self.apply_index_gate(&meta, &md_rel_path, &body)?;
        Ok(IndexOutcome::Indexed)
    }

    /// Handle a memory file that disappeared from disk: hard-delete its row
    /// and chunks. The watcher calls this; the file is already gone.
    pub fn remove_file(&mut self, abs_path: &Path) -> Result<(), StoreError> {
        self.ensure_writable()?;
        let md_rel_path = self.md_rel_path_of(abs_path)?;
        self.fulltext_mut()?.remove_by_md_rel_path(&md_rel_path)?;
        self.db.delete_by_md_rel_path(&md_rel_path)?;
        Ok(())
    }

    /// Sweep every known memory and realign it with the filesystem and the
    /// code-symbol index. Per-entry failures are logged, never fatal.
    #[tracing::instrument(skip(self))]
    pub fn reconcile(&mut self) -> Result<ReconcileReport, StoreError> {
        self.ensure_writable()?;
        let mut paths: Vec<String> = self.db.all_memory_paths()?.into_keys().collect();
        paths.sort();

        let now = now_rfc3339();
        let mut report = ReconcileReport::default();
        for md_rel_path in paths {
            if let Err(e) = self.reconcile_entry(&md_rel_path, &now, &mut report) {
                tracing::warn!(path = %md_rel_path, error = %e, "reconcile entry failed");
                report.skipped += 1;
            }
        }

        tracing::info!(
            removed = report.removed,
            file_flips = report.file_status_flips,
            symbol_flips = report.symbol_status_flips,
            rewritten = report.rewritten,
            "reconcile finished"
        );
        Ok(report)
    }

    /// Reconcile only the memories referencing one source file, then
    /// re-assert their index presence. Invoked by the watcher on source
    /// file events.
    pub fn reconcile_file_ref(&mut self, file_rel_path: &str) -> Result<(), StoreError> {
        self.ensure_writable()?;
        let exists = self.repo_root.join(file_rel_path).exists();
        let records = self.db.list_memories(Some(Scope::File), Some(file_rel_path))?;

        for record in records {
            if let Err(e) = self.reconcile_one_ref(&record, exists) {
                tracing::warn!(path = %record.md_rel_path, error = %e, "file-ref reconcile failed");
            }
        }
        Ok(())
    }

    // -- Internals --

    fn reconcile_entry(
        &mut self,
        md_rel_path: &str,
        now: &str,
        report: &mut ReconcileReport,
    ) -> Result<(), StoreError> {
        let abs = self.memory_dir.join(md_rel_path);
        if !abs.exists() {
            self.db.delete_by_md_rel_path(md_rel_path)?;
            if let Err(e) = self.fulltext_mut()?.remove_by_md_rel_path(md_rel_path) {
                tracing::warn!(path = %md_rel_path, error = %e, "best-effort index removal failed");
            }
            report.removed += 1;
            return Ok(());
        }

        let raw = std::fs::read(&abs)?;
        let text = String::from_utf8_lossy(&raw);
        let (mut meta, body) = match parse_document(&text) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!(path = %md_rel_path, error = %e, "unparseable, skipping reconcile entry");
                report.skipped += 1;
                return Ok(());
            }
        };

        let mut changed = false;

        if meta.scope == Scope::File {
            let exists = self.referenced_file_exists(&meta);
            if !exists && meta.file_status != NoteStatus::Deleted {
                meta.file_status = NoteStatus::Deleted;
                self.db.update_file_status(&meta.id, NoteStatus::Deleted)?;
                if let Err(e) = self.fulltext_mut()?.remove_by_md_rel_path(md_rel_path) {
                    tracing::warn!(path = %md_rel_path, error = %e, "best-effort index removal failed");
                }
                report.file_status_flips += 1;
                changed = true;
            } else if exists && meta.file_status == NoteStatus::Deleted {
                meta.file_status = NoteStatus::Active;
                self.db.update_file_status(&meta.id, NoteStatus::Active)?;
                self.apply_index_gate(&meta, md_rel_path, &body)?;
                report.file_status_flips += 1;
                changed = true;
            }
        }

        for symbol in &mut meta.symbols {
            // The code index lives in external tables; when they are absent
            // the symbol sweep is skipped rather than failing the entry.
            let exists = match self.db.symbol_exists_in_index(&symbol.language, &symbol.name) {
                Ok(exists) => exists,
                Err(e) => {
                    tracing::debug!(symbol = %symbol.name, error = %e, "symbol index unavailable");
                    continue;
                }
            };
            if !exists && symbol.status != NoteStatus::Deleted {
                symbol.status = NoteStatus::Deleted;
                symbol.last_resolved_at = Some(now.to_string());
                self.db
                    .update_symbol_status(&meta.id, &symbol.language, &symbol.name, NoteStatus::Deleted, now)?;
                report.symbol_status_flips += 1;
                changed = true;
            } else if exists && symbol.status == NoteStatus::Deleted {
                symbol.status = NoteStatus::Active;
                symbol.last_resolved_at = Some(now.to_string());
                self.db
                    .update_symbol_status(&meta.id, &symbol.language, &symbol.name, NoteStatus::Active, now)?;
                report.symbol_status_flips += 1;
                changed = true;
            }
        }

        if changed {
            let bytes = emit_document(&meta, &body)?;
            std::fs::write(&abs, bytes.as_bytes())?;
            self.db
                .upsert_memory(&meta, md_rel_path, &sha256_hex(bytes.as_bytes()))?;
            report.rewritten += 1;
        }
        Ok(())
    }

    fn reconcile_one_ref(&mut self, record: &MemoryRecord, exists: bool) -> Result<(), StoreError> {
        let abs = self.memory_dir.join(&record.md_rel_path);
        let raw = std::fs::read(&abs)?;
        let text = String::from_utf8_lossy(&raw);
        let (mut meta, body) = parse_document(&text)?;

        let desired = if exists {
            NoteStatus::Active
        } else {
            NoteStatus::Deleted
        };
        if meta.file_status != desired {
            meta.file_status = desired;
            self.db.update_file_status(&meta.id, desired)?;
            let bytes = emit_document(&meta, &body)?;
            std::fs::write(&abs, bytes.as_bytes())?;
            self.db
                .upsert_memory(&meta, &record.md_rel_path, &sha256_hex(bytes.as_bytes()))?;
        }

        self.apply_index_gate(&meta, &record.md_rel_path, &body)
    }

    /// The single chokepoint deciding full-text presence: a memory is
    /// indexed iff it is active, its source file status is active, and a
    /// file-scoped memory's source file actually exists. Everything else is
    /// removed (idempotently).
    fn apply_index_gate(
        &mut self,
        meta: &MemoryMeta,
        md_rel_path: &str,
        body: &str,
    ) -> Result<(), StoreError> {
        let eligible = meta.status.is_active()
            && meta.file_status.is_active()
            && match meta.scope {
                Scope::Project => true,
                Scope::File => self.referenced_file_exists(meta),
            };

        let fulltext = self.fulltext_mut()?;
        if eligible {
            fulltext.index_memory(meta, md_rel_path, body)?;
        } else {
            fulltext.remove_by_md_rel_path(md_rel_path)?;
        }
        Ok(())
    }

    fn referenced_file_exists(&self, meta: &MemoryMeta) -> bool {
        match meta.file.as_deref() {
            Some(file) if !file.is_empty() => self.repo_root.join(file).exists(),
            _ => false,
        }
    }

    /// Preserve an unparseable memory file by appending its bytes to the
    /// canonical `project.md` as a timestamped import section; if the
    /// canonical file itself is the casualty, recreate its header around the
    /// prior bytes. The malformed source file is left on disk for repair.
    fn salvage(&mut self, source_md_rel_path: &str, raw: &str) -> Result<(), StoreError> {
        let canonical_abs = self.memory_dir.join(CANONICAL_MD);
        let now = now_rfc3339();

        let (meta, body) = if source_md_rel_path == CANONICAL_MD {
            (fresh_canonical_meta(), raw.trim().to_string())
        } else {
            let (meta, prior_body) = match std::fs::read(&canonical_abs) {
                Ok(prior_raw) => {
                    let prior_text = String::from_utf8_lossy(&prior_raw);
                    match parse_document(&prior_text) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            tracing::warn!(error = %e, "canonical memory unparseable, recreating header");
                            (fresh_canonical_meta(), prior_text.trim().to_string())
                        }
                    }
                }
                Err(_) => (fresh_canonical_meta(), String::new()),
            };

            let mut body = prior_body.trim_end().to_string();
            if !body.is_empty() {
                body.push_str("\n\n");
            }
            body.push_str(&format!(
                "## Imported (unparseable frontmatter): {source_md_rel_path}\n\n_Imported at: {now}_\n\n{}\n",
                raw.trim()
            ));
            (meta, body)
        };

        let bytes = emit_document(&meta, &body)?;
        std::fs::write(&canonical_abs, bytes.as_bytes())?;
        set_file_mode(&canonical_abs, 0o644)?;

        self.index_file(&canonical_abs)?;
        Ok(())
    }

    /// Emit, write, hash, upsert, and gate one memory. Shared tail of the
    /// append/update/grep-replace pipelines.
    fn write_and_index(
        &mut self,
        meta: &MemoryMeta,
        md_rel_path: &str,
        body: &str,
    ) -> Result<(), StoreError> {
        let bytes = emit_document(meta, body)?;
        let abs = self.memory_dir.join(md_rel_path);
        std::fs::write(&abs, bytes.as_bytes())?;
        set_file_mode(&abs, 0o644)?;

        let body_hash = sha256_hex(bytes.as_bytes());
        self.db.upsert_memory(meta, md_rel_path, &body_hash)?;
        self.apply_index_gate(meta, md_rel_path, body)
    }

    /// `file-<sanitized path>-<slug>.md` or `project-<slug>.md`; the slug
    /// falls back to the uid prefix when the title yields nothing. On a
    /// collision (disk or relational) the uid prefix is appended once.
    fn derive_filename(
        &self,
        scope: Scope,
        file_path: Option<&str>,
        title: Option<&str>,
        uid: &str,
    ) -> Result<String, StoreError> {
        let uid_prefix = &uid[..8];
        let slug = title
            .map(slugify)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| uid_prefix.to_string());

        let stem = match scope {
            Scope::File => format!(
                "file-{}-{}",
                sanitize_file_path(file_path.unwrap_or_default()),
                slug
            ),
            Scope::Project => format!("project-{slug}"),
        };

        let candidate = format!("{stem}.md");
        let collides = self.memory_dir.join(&candidate).exists()
            || self.db.get_by_md_rel_path(&candidate)?.is_some();
        if !collides {
            return Ok(candidate);
        }
        Ok(format!("{stem}-{uid_prefix}.md"))
    }

    fn load_element(&self, record: MemoryRecord) -> Result<MemoryElement, StoreError> {
        let abs = self.memory_dir.join(&record.md_rel_path);
        let raw = std::fs::read(&abs)?;
        let text = String::from_utf8_lossy(&raw);

        let (meta, body) = match parse_document(&text) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(path = %record.md_rel_path, error = %e, "degraded read: header unparseable");
                (record.to_meta(), text.into_owned())
            }
        };

        Ok(MemoryElement {
            meta,
            body,
            md_rel_path: record.md_rel_path,
            created_at: record.created_at,
            updated_at: record.updated_at,
            body_hash: record.body_hash,
        })
    }

    fn element_for_uid(&self, uid: &str) -> Result<MemoryElement, StoreError> {
        let record = self
            .db
            .get_by_uid(uid)?
            .ok_or_else(|| StoreError::NotFound(uid.to_string()))?;
        self.load_element(record)
    }

    fn md_rel_path_of(&self, abs_path: &Path) -> Result<String, StoreError> {
        let rel = abs_path.strip_prefix(&self.memory_dir).map_err(|_| {
            StoreError::InvalidInput(format!(
                "path is outside the memory directory: {}",
                abs_path.display()
            ))
        })?;
        Ok(rel.to_string_lossy().replace('\\', "/"))
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.fulltext.is_none() {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        Ok(())
    }

    fn fulltext_mut(&mut self) -> Result<&mut FullTextIndex, StoreError> {
        self.fulltext.as_mut().ok_or(StoreError::Closed)
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn search_dir(repo_root: &Path) -> PathBuf {
    repo_root.join(format!(".{NAMESPACE}")).join("search")
}

fn fresh_canonical_meta() -> MemoryMeta {
    MemoryMeta {
        id: Uuid::new_v4().to_string(),
        scope: Scope::Project,
        file: None,
        title: Some(CANONICAL_TITLE.to_string()),
        status: NoteStatus::Active,
        file_status: NoteStatus::Active,
        symbols: Vec::new(),
    }
}

fn wrap_hit(hit: MemoryHit) -> MemorySearchResult {
    MemorySearchResult {
        memory_uid: hit.memory_uid,
        title: hit.title,
        scope: hit.scope,
        file_path: hit.file_path,
        md_rel_path: hit.md_rel_path,
        heading: hit.heading,
        score: hit.score,
        snippet: hit.snippet,
    }
}

/// Hex-encoded SHA-256 of the file bytes as written.
fn sha256_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Current UTC time as an RFC 3339 string with seconds precision.
fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(unix)]
fn set_file_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_file_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
