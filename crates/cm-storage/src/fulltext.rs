use std::path::{Path, PathBuf};

use cm_codec::chunk_by_headings;
use cm_core::{truncate_code_points, MemoryMeta, Scope};
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, QueryParser, TermQuery};
use tantivy::schema::*;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

use crate::error::StorageError;
use crate::manifest::ChunkManifest;

/// Name of the tantivy directory under the search dir.
const INDEX_DIR: &str = "memory.tantivy";

/// Name of the manifest sidecar next to the index directory.
const MANIFEST_FILE: &str = "memory-manifest.json";

/// Writer heap budget.
const WRITER_HEAP_BYTES: usize = 50_000_000;

/// Result limit used when the caller passes zero.
const DEFAULT_SEARCH_LIMIT: usize = 20;

/// Maximum snippet length in code points.
const SNIPPET_MAX_CHARS: usize = 240;

/// Relevance boosts per analyzed field.
const TITLE_BOOST: f32 = 2.0;
const HEADING_BOOST: f32 = 1.5;

/// A deduplicated search hit: the best-scoring chunk of one memory.
#[derive(Debug, Clone)]
pub struct MemoryHit {
    pub memory_uid: String,
    pub title: Option<String>,
    pub scope: Scope,
    pub file_path: Option<String>,
    pub md_rel_path: String,
    pub heading: String,
    pub ordinal: u64,
    pub score: f32,
    pub snippet: String,
}

struct MemoryFields {
    doc_id: Field,
    project_key: Field,
    memory_uid: Field,
    scope: Field,
    file_path: Field,
    md_rel_path: Field,
    status: Field,
    file_status: Field,
    title: Field,
    chunk_heading: Field,
    chunk_text: Field,
    symbol_text: Field,
    chunk_ordinal: Field,
}

/// Chunked full-text index over memory bodies, backed by Tantivy.
///
/// Each memory contributes one document per body chunk; the manifest records
/// which document ids a memory file produced so re-indexing can delete them
/// deterministically. Writable handles own the single `IndexWriter` (and
/// with it the directory lockfile); read-only handles never create one.
pub struct FullTextIndex {
    index: Index,
    reader: IndexReader,
    writer: Option<IndexWriter>,
    fields: MemoryFields,
    manifest: ChunkManifest,
    manifest_path: Option<PathBuf>,
    project_id: i64,
}

fn build_schema() -> (Schema, MemoryFields) {
    let mut builder = Schema::builder();

    let doc_id = builder.add_text_field("doc_id", STRING | STORED);
    let project_key = builder.add_text_field("project_key", STRING);
    let memory_uid = builder.add_text_field("memory_uid", STRING | STORED);
    let scope = builder.add_text_field("scope", STRING | STORED);
    let file_path = builder.add_text_field("file_path", STRING | STORED);
    let md_rel_path = builder.add_text_field("md_rel_path", STRING | STORED);
    let status = builder.add_text_field("status", STRING);
    let file_status = builder.add_text_field("file_status", STRING);
    let title = builder.add_text_field("title", TEXT | STORED);
    let chunk_heading = builder.add_text_field("chunk_heading", TEXT | STORED);
    let chunk_text = builder.add_text_field("chunk_text", TEXT | STORED);
    let symbol_text = builder.add_text_field("symbol_text", TEXT);
    let chunk_ordinal = builder.add_u64_field("chunk_ordinal", INDEXED | STORED);

    let schema = builder.build();
    let fields = MemoryFields {
        doc_id,
        project_key,
        memory_uid,
        scope,
        file_path,
        md_rel_path,
        status,
        file_status,
        title,
        chunk_heading,
        chunk_text,
        symbol_text,
        chunk_ordinal,
    };
    (schema, fields)
}

impl FullTextIndex {
    /// Open or create a writable index under `search_dir`.
    ///
    /// Fails with `IndexLocked` when another process already holds the
    /// writer lock, so callers can fall back to a read-only open.
    pub fn open(search_dir: &Path, project_id: i64) -> Result<Self, StorageError> {
        let index_dir = search_dir.join(INDEX_DIR);
        std::fs::create_dir_all(&index_dir)?;

        let (schema, fields) = build_schema();
        let index = Index::open_in_dir(&index_dir)
            .or_else(|_| Index::create_in_dir(&index_dir, schema))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        let writer = index.writer(WRITER_HEAP_BYTES).map_err(lock_to_storage)?;

        let manifest_path = search_dir.join(MANIFEST_FILE);
        let manifest = ChunkManifest::load(&manifest_path);

        Ok(Self {
            index,
            reader,
            writer: Some(writer),
            fields,
            manifest,
            manifest_path: Some(manifest_path),
            project_id,
        })
    }

    /// Open an existing index for search only; no writer, no lock taken.
    pub fn open_read_only(search_dir: &Path, project_id: i64) -> Result<Self, StorageError> {
        let index_dir = search_dir.join(INDEX_DIR);
        let (_, fields) = build_schema();
        let index = Index::open_in_dir(&index_dir)?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        let manifest_path = search_dir.join(MANIFEST_FILE);
        let manifest = ChunkManifest::load(&manifest_path);

        Ok(Self {
            index,
            reader,
            writer: None,
            fields,
            manifest,
            manifest_path: Some(manifest_path),
            project_id,
        })
    }

    /// Create an in-memory index (for testing). The manifest is kept in
    /// memory only.
    pub fn create_in_ram(project_id: i64) -> Result<Self, StorageError> {
        let (schema, fields) = build_schema();
        let index = Index::create_in_ram(schema);

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        let writer = index.writer(15_000_000).map_err(lock_to_storage)?;

        Ok(Self {
            index,
            reader,
            writer: Some(writer),
            fields,
            manifest: ChunkManifest::default(),
            manifest_path: None,
            project_id,
        })
    }

    pub fn is_read_only(&self) -> bool {
        self.writer.is_none()
    }

    #[doc(hidden)]
    pub fn manifest(&self) -> &ChunkManifest {
        &self.manifest
    }

    /// Index one memory: delete every chunk document the manifest knows for
    /// this path, chunk the body, write the new documents as one batch, then
    /// replace and persist the manifest entry.
    pub fn index_memory(
        &mut self,
        meta: &MemoryMeta,
        md_rel_path: &str,
        body: &str,
    ) -> Result<usize, StorageError> {
        let writer = self.writer.as_mut().ok_or(StorageError::ReadOnlyIndex)?;

        for doc_id in self.manifest.doc_ids(md_rel_path) {
            writer.delete_term(Term::from_field_text(self.fields.doc_id, doc_id));
        }

        let chunks = chunk_by_headings(body);
        let symbol_text = meta
            .symbols
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let mut doc_ids = Vec::with_capacity(chunks.len());
        for (ordinal, chunk) in chunks.iter().enumerate() {
            let doc_id = format!("memory:{}:{}:{}", self.project_id, meta.id, ordinal);
            writer.add_document(doc!(
                self.fields.doc_id => doc_id.as_str(),
                self.fields.project_key => self.project_id.to_string(),
                self.fields.memory_uid => meta.id.as_str(),
                self.fields.scope => meta.scope.as_str(),
                self.fields.file_path => meta.file.as_deref().unwrap_or(""),
                self.fields.md_rel_path => md_rel_path,
                self.fields.status => meta.status.as_str(),
                self.fields.file_status => meta.file_status.as_str(),
                self.fields.title => meta.title.as_deref().unwrap_or(""),
                self.fields.chunk_heading => chunk.heading.as_str(),
                self.fields.chunk_text => chunk.text.as_str(),
                self.fields.symbol_text => symbol_text.as_str(),
                self.fields.chunk_ordinal => ordinal as u64,
            ))?;
            doc_ids.push(doc_id);
        }

        writer.commit()?;
        self.reader.reload()?;

        let written = doc_ids.len();
        self.manifest.replace(md_rel_path, doc_ids);
        self.persist_manifest()?;
        Ok(written)
    }

    /// Delete every chunk document registered for this path and drop the
    /// manifest entry. Idempotent.
    pub fn remove_by_md_rel_path(&mut self, md_rel_path: &str) -> Result<(), StorageError> {
        let writer = self.writer.as_mut().ok_or(StorageError::ReadOnlyIndex)?;

        for doc_id in self.manifest.doc_ids(md_rel_path) {
            writer.delete_term(Term::from_field_text(self.fields.doc_id, doc_id));
        }
        writer.commit()?;
        self.reader.reload()?;

        self.manifest.remove(md_rel_path);
        self.persist_manifest()?;
        Ok(())
    }

    /// Drop every document and reset the manifest to empty. Used before a
    /// full rebuild so no stale chunk documents survive.
    pub fn reset(&mut self) -> Result<(), StorageError> {
        let writer = self.writer.as_mut().ok_or(StorageError::ReadOnlyIndex)?;
        writer.delete_all_documents()?;
        writer.commit()?;
        self.reader.reload()?;

        self.manifest.clear();
        self.persist_manifest()?;
        Ok(())
    }

    /// Bag-of-terms search over title, headings, chunk text, and symbol
    /// names, filtered to this project's active memories.
    ///
    /// Hits are deduplicated to the best-scoring chunk per memory,
    /// preserving the engine's ranking order. A blank query yields nothing;
    /// a zero limit means the default of 20.
    #[tracing::instrument(skip(self), fields(result_count))]
    pub fn search(
        &self,
        query_text: &str,
        scope: Option<Scope>,
        file_path: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryHit>, StorageError> {
        let trimmed = query_text.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        let limit = if limit == 0 { DEFAULT_SEARCH_LIMIT } else { limit };

        // A read-only handle sees the writer process's commits only after a
        // reload; a failed reload degrades to the last visible state.
        if self.writer.is_none() {
            let _ = self.reader.reload();
        }

        let mut parser = QueryParser::for_index(
            &self.index,
            vec![
                self.fields.title,
                self.fields.chunk_heading,
                self.fields.chunk_text,
                self.fields.symbol_text,
            ],
        );
        parser.set_field_boost(self.fields.title, TITLE_BOOST);
        parser.set_field_boost(self.fields.chunk_heading, HEADING_BOOST);
        let (text_query, _errors) = parser.parse_query_lenient(trimmed);

        let mut clauses: Vec<(Occur, Box<dyn tantivy::query::Query>)> =
            vec![(Occur::Must, text_query)];

        clauses.push(term_filter(self.fields.project_key, &self.project_id.to_string()));
        clauses.push(term_filter(self.fields.status, "active"));
        clauses.push(term_filter(self.fields.file_status, "active"));
        if let Some(scope) = scope {
            clauses.push(term_filter(self.fields.scope, scope.as_str()));
        }
        if let Some(file_path) = file_path {
            clauses.push(term_filter(self.fields.file_path, file_path));
        }

        let final_query = BooleanQuery::new(clauses);
        let searcher = self.reader.searcher();
        let top_docs = searcher.search(&final_query, &TopDocs::with_limit(limit))?;

        let mut seen = std::collections::HashSet::new();
        let mut hits = Vec::new();
        for (score, doc_address) in top_docs {
            let retrieved: TantivyDocument = searcher.doc(doc_address)?;
            let memory_uid = stored_str(&retrieved, self.fields.memory_uid);
            if memory_uid.is_empty() || !seen.insert(memory_uid.clone()) {
                continue;
            }

            let scope = Scope::from_str(&stored_str(&retrieved, self.fields.scope))?;
            let chunk_text = stored_str(&retrieved, self.fields.chunk_text);
            hits.push(MemoryHit {
                memory_uid,
                title: non_empty(stored_str(&retrieved, self.fields.title)),
                scope,
                file_path: non_empty(stored_str(&retrieved, self.fields.file_path)),
                md_rel_path: stored_str(&retrieved, self.fields.md_rel_path),
                heading: stored_str(&retrieved, self.fields.chunk_heading),
                ordinal: stored_u64(&retrieved, self.fields.chunk_ordinal),
                score,
                snippet: make_snippet(&chunk_text),
            });
        }

        tracing::Span::current().record("result_count", hits.len());
        Ok(hits)
    }

    /// Persist the manifest if this index is backed by a directory.
    pub fn persist_manifest(&self) -> Result<(), StorageError> {
        if let Some(path) = &self.manifest_path {
            self.manifest.save(path)?;
        }
        Ok(())
    }
}

impl Drop for FullTextIndex {
    fn drop(&mut self) {
        let _ = self.persist_manifest();
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn lock_to_storage(err: tantivy::TantivyError) -> StorageError {
    match err {
        tantivy::TantivyError::LockFailure(_, _) => StorageError::IndexLocked {
            reason: err.to_string(),
        },
        other => StorageError::Tantivy(other),
    }
}

fn term_filter(field: Field, value: &str) -> (Occur, Box<dyn tantivy::query::Query>) {
    (
        Occur::Must,
        Box::new(TermQuery::new(
            Term::from_field_text(field, value),
            IndexRecordOption::Basic,
        )),
    )
}

fn stored_str(doc: &TantivyDocument, field: Field) -> String {
    match doc.get_first(field) {
        Some(OwnedValue::Str(s)) => s.clone(),
        _ => String::new(),
    }
}

fn stored_u64(doc: &TantivyDocument, field: Field) -> u64 {
    match doc.get_first(field) {
        Some(OwnedValue::U64(v)) => *v,
        _ => 0,
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn make_snippet(chunk_text: &str) -> String {
    let truncated = truncate_code_points(chunk_text, SNIPPET_MAX_CHARS);
    if truncated.len() < chunk_text.len() {
        format!("{truncated}…")
    } else {
        truncated.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cm_core::{NoteStatus, SymbolRef};

    fn make_meta(uid: &str, title: &str) -> MemoryMeta {
        MemoryMeta {
            id: uid.to_string(),
            scope: Scope::Project,
            file: None,
            title: Some(title.to_string()),
            status: NoteStatus::Active,
            file_status: NoteStatus::Active,
            symbols: Vec::new(),
        }
    }

    #[test]
    fn index_and_search_round_trip() {
        let mut index = FullTextIndex::create_in_ram(1).unwrap();
        let meta = make_meta("uid-1", "Authentication Flow");
        index
            .index_memory(&meta, "project-auth.md", "How the auth flow works with JWT tokens.")
            .unwrap();

        let hits = index.search("JWT tokens", None, None, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].memory_uid, "uid-1");
        assert_eq!(hits[0].title.as_deref(), Some("Authentication Flow"));
        assert_eq!(hits[0].md_rel_path, "project-auth.md");
    }

    #[test]
    fn empty_query_returns_nothing() {
        let mut index = FullTextIndex::create_in_ram(1).unwrap();
        let meta = make_meta("uid-1", "Anything");
        index.index_memory(&meta, "a.md", "some text").unwrap();

        assert!(index.search("", None, None, 10).unwrap().is_empty());
        assert!(index.search("   \t", None, None, 10).unwrap().is_empty());
    }

    #[test]
    fn chunked_body_produces_one_doc_per_chunk() {
        let mut index = FullTextIndex::create_in_ram(1).unwrap();
        let meta = make_meta("uid-1", "Guide");
        let body = "intro\n\n## Overview\nauthentication basics\n\n### JWT Handling\nRS256 signed JWT tokens";
        let written = index.index_memory(&meta, "guide.md", body).unwrap();
        assert_eq!(written, 3);
        assert_eq!(index.manifest().doc_ids("guide.md").len(), 3);
        assert_eq!(index.manifest().doc_ids("guide.md")[0], "memory:1:uid-1:0");
    }

    #[test]
    fn dedupe_returns_best_chunk_per_memory() {
        let mut index = FullTextIndex::create_in_ram(1).unwrap();
        let meta = make_meta("uid-1", "Guide");
        let body = "## Overview\nauthentication overview\n\n### JWT Handling\nRS256 signed JWT tokens here";
        index.index_memory(&meta, "guide.md", body).unwrap();

        let hits = index.search("JWT RS256 tokens", None, None, 10).unwrap();
        assert_eq!(hits.len(), 1, "one hit per memory after dedupe");
        assert_eq!(hits[0].memory_uid, "uid-1");
        assert_eq!(hits[0].heading, "JWT Handling");
    }

    #[test]
    fn reindex_deletes_prior_chunks() {
        let mut index = FullTextIndex::create_in_ram(1).unwrap();
        let meta = make_meta("uid-1", "Note");
        index
            .index_memory(&meta, "n.md", "## One\nfirstword\n\n## Two\nsecondword")
            .unwrap();
        assert_eq!(index.manifest().doc_ids("n.md").len(), 2);

        index.index_memory(&meta, "n.md", "replacement text only").unwrap();
        assert_eq!(index.manifest().doc_ids("n.md").len(), 1);

        assert!(index.search("firstword", None, None, 10).unwrap().is_empty());
        assert_eq!(index.search("replacement", None, None, 10).unwrap().len(), 1);
    }

    #[test]
    fn remove_by_md_rel_path_is_idempotent() {
        let mut index = FullTextIndex::create_in_ram(1).unwrap();
        let meta = make_meta("uid-1", "Note");
        index.index_memory(&meta, "n.md", "searchable body").unwrap();

        index.remove_by_md_rel_path("n.md").unwrap();
        assert!(index.search("searchable", None, None, 10).unwrap().is_empty());
        assert!(index.manifest().doc_ids("n.md").is_empty());

        index.remove_by_md_rel_path("n.md").unwrap();
    }

    #[test]
    fn inactive_statuses_are_filtered() {
        let mut index = FullTextIndex::create_in_ram(1).unwrap();

        let mut deleted = make_meta("uid-1", "Deleted note");
        deleted.status = NoteStatus::Deleted;
        index.index_memory(&deleted, "d.md", "tombstone body").unwrap();

        let mut ghost = make_meta("uid-2", "Ghost note");
        ghost.file_status = NoteStatus::Deleted;
        index.index_memory(&ghost, "g.md", "tombstone body").unwrap();

        assert!(index.search("tombstone", None, None, 10).unwrap().is_empty());
    }

    #[test]
    fn scope_and_file_filters() {
        let mut index = FullTextIndex::create_in_ram(1).unwrap();

        let project = make_meta("uid-1", "Project note");
        index.index_memory(&project, "p.md", "shared keyword").unwrap();

        let mut file_note = make_meta("uid-2", "File note");
        file_note.scope = Scope::File;
        file_note.file = Some("src/auth.go".to_string());
        index.index_memory(&file_note, "f.md", "shared keyword").unwrap();

        assert_eq!(index.search("shared", None, None, 10).unwrap().len(), 2);

        let project_only = index.search("shared", Some(Scope::Project), None, 10).unwrap();
        assert_eq!(project_only.len(), 1);
        assert_eq!(project_only[0].memory_uid, "uid-1");

        let by_file = index
            .search("shared", Some(Scope::File), Some("src/auth.go"), 10)
            .unwrap();
        assert_eq!(by_file.len(), 1);
        assert_eq!(by_file[0].memory_uid, "uid-2");

        let wrong_file = index
            .search("shared", Some(Scope::File), Some("src/other.go"), 10)
            .unwrap();
        assert!(wrong_file.is_empty());
    }

    #[test]
    fn project_key_isolates_projects() {
        let tmp = tempfile::TempDir::new().unwrap();
        let search_dir = tmp.path().join("search");
        std::fs::create_dir_all(&search_dir).unwrap();

        {
            let mut index = FullTextIndex::open(&search_dir, 1).unwrap();
            index
                .index_memory(&make_meta("uid-1", "A"), "a.md", "isolation keyword")
                .unwrap();
        }

        // A handle scoped to another project sees nothing in the same index.
        let other = FullTextIndex::open_read_only(&search_dir, 2).unwrap();
        assert!(other.search("isolation", None, None, 10).unwrap().is_empty());

        let same = FullTextIndex::open_read_only(&search_dir, 1).unwrap();
        assert_eq!(same.search("isolation", None, None, 10).unwrap().len(), 1);
    }

    #[test]
    fn title_boost_outranks_body_match() {
        let mut index = FullTextIndex::create_in_ram(1).unwrap();

        let titled = make_meta("uid-title", "authentication");
        index.index_memory(&titled, "t.md", "unrelated body words").unwrap();

        let body_only = make_meta("uid-body", "Other note");
        index
            .index_memory(&body_only, "b.md", "authentication mentioned in passing")
            .unwrap();

        let hits = index.search("authentication", None, None, 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].memory_uid, "uid-title");
    }

    #[test]
    fn symbol_names_are_searchable() {
        let mut index = FullTextIndex::create_in_ram(1).unwrap();
        let mut meta = make_meta("uid-1", "Auth");
        meta.symbols = vec![SymbolRef {
            language: "go".to_string(),
            name: "RefreshTokenStore".to_string(),
            status: NoteStatus::Active,
            last_resolved_at: None,
        }];
        index.index_memory(&meta, "a.md", "body without the symbol name").unwrap();

        let hits = index.search("RefreshTokenStore", None, None, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].memory_uid, "uid-1");
    }

    #[test]
    fn snippet_truncated_with_ellipsis() {
        let mut index = FullTextIndex::create_in_ram(1).unwrap();
        let meta = make_meta("uid-1", "Long");
        let mut body = String::from("needle ");
        body.push_str(&"filler ".repeat(100));
        index.index_memory(&meta, "l.md", &body).unwrap();

        let hits = index.search("needle", None, None, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].snippet.ends_with('…'));
        assert!(hits[0].snippet.chars().count() <= SNIPPET_MAX_CHARS + 1);
    }

    #[test]
    fn empty_body_indexes_no_documents() {
        let mut index = FullTextIndex::create_in_ram(1).unwrap();
        let meta = make_meta("uid-1", "Empty");
        let written = index.index_memory(&meta, "e.md", "").unwrap();
        assert_eq!(written, 0);
        assert!(index.manifest().doc_ids("e.md").is_empty());
    }

    #[test]
    fn reset_drops_everything() {
        let mut index = FullTextIndex::create_in_ram(1).unwrap();
        index
            .index_memory(&make_meta("uid-1", "A"), "a.md", "alpha body")
            .unwrap();
        index
            .index_memory(&make_meta("uid-2", "B"), "b.md", "beta body")
            .unwrap();

        index.reset().unwrap();
        assert!(index.search("alpha", None, None, 10).unwrap().is_empty());
        assert!(index.manifest().is_empty());
    }

    #[test]
    fn lenient_query_parsing_does_not_crash() {
        let mut index = FullTextIndex::create_in_ram(1).unwrap();
        index
            .index_memory(&make_meta("uid-1", "Note"), "n.md", "validate input data")
            .unwrap();

        let tricky_queries = [
            "how does validate() work?",
            "path/to/file.go:123",
            r#"fix the "bug" in validate"#,
            "validate + input - other",
            "field~2 boost^3",
        ];
        for q in &tricky_queries {
            let result = index.search(q, None, None, 10);
            assert!(result.is_ok(), "query {:?} should not error: {:?}", q, result.err());
        }
    }

    #[test]
    fn persistence_round_trip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let search_dir = tmp.path().join("search");
        std::fs::create_dir_all(&search_dir).unwrap();

        {
            let mut index = FullTextIndex::open(&search_dir, 1).unwrap();
            index
                .index_memory(&make_meta("uid-1", "Persisted"), "p.md", "durable body")
                .unwrap();
        }

        {
            let index = FullTextIndex::open(&search_dir, 1).unwrap();
            assert_eq!(index.search("durable", None, None, 10).unwrap().len(), 1);
            assert_eq!(index.manifest().doc_ids("p.md").len(), 1);
        }
    }

    #[test]
    fn second_writer_fails_with_lock_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let search_dir = tmp.path().join("search");
        std::fs::create_dir_all(&search_dir).unwrap();

        let _first = FullTextIndex::open(&search_dir, 1).unwrap();
        let second = FullTextIndex::open(&search_dir, 1);
        match second {
            Err(e @ StorageError::IndexLocked { .. }) => {
                assert!(e.to_string().to_lowercase().contains("lock"));
            }
            other => panic!("expected IndexLocked, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn read_only_handle_rejects_mutations_but_searches() {
        let tmp = tempfile::TempDir::new().unwrap();
        let search_dir = tmp.path().join("search");
        std::fs::create_dir_all(&search_dir).unwrap();

        {
            let mut writer = FullTextIndex::open(&search_dir, 1).unwrap();
            writer
                .index_memory(&make_meta("uid-1", "Shared"), "s.md", "visible to readers")
                .unwrap();
        }

        let mut reader = FullTextIndex::open_read_only(&search_dir, 1).unwrap();
        assert!(reader.is_read_only());
        assert_eq!(reader.search("visible", None, None, 10).unwrap().len(), 1);

        let meta = make_meta("uid-2", "Nope");
        assert!(matches!(
            reader.index_memory(&meta, "x.md", "body"),
            Err(StorageError::ReadOnlyIndex)
        ));
        assert!(matches!(
            reader.remove_by_md_rel_path("s.md"),
            Err(StorageError::ReadOnlyIndex)
        ));
        assert!(matches!(reader.reset(), Err(StorageError::ReadOnlyIndex)));
    }

    #[test]
    fn default_limit_applied_on_zero() {
        let mut index = FullTextIndex::create_in_ram(1).unwrap();
        for i in 0..30 {
            let meta = make_meta(&format!("uid-{i}"), "Note");
            index
                .index_memory(&meta, &format!("n{i}.md"), "common keyword body")
                .unwrap();
        }

        let hits = index.search("common", None, None, 0).unwrap();
        assert_eq!(hits.len(), DEFAULT_SEARCH_LIMIT);
    }
}
