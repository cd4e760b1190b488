use cm_core::MemoryMeta;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Fixed namespace tag wrapping the frontmatter mapping.
pub const NAMESPACE: &str = "codemem";

/// Frontmatter delimiter line.
const MARKER: &str = "---";

/// Root YAML envelope: a single mapping keyed by the namespace tag.
#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "codemem")]
    meta: MemoryMeta,
}

/// Parse a memory document into its header metadata and body.
///
/// The first non-blank line must be the `---` opener, followed by YAML under
/// the namespace key, a `---` closer, and the body. Defaults for absent
/// fields are injected by the metadata type itself; the body is returned
/// verbatim with leading blank lines trimmed.
pub fn parse_document(input: &str) -> Result<(MemoryMeta, String), CodecError> {
    let mut pos = 0usize;
    let mut header_start = None;

    for line in input.split_inclusive('\n') {
        let content = line.trim_end_matches('\n').trim_end_matches('\r');
        if content.trim().is_empty() {
            pos += line.len();
            continue;
        }
        if content == MARKER {
            header_start = Some(pos + line.len());
        }
        break;
    }

    let header_start = header_start.ok_or(CodecError::NoHeader)?;

    let mut yaml_end = None;
    let mut body_start = input.len();
    let mut cursor = header_start;
    for line in input[header_start..].split_inclusive('\n') {
        let content = line.trim_end_matches('\n').trim_end_matches('\r');
        if content == MARKER {
            yaml_end = Some(cursor);
            body_start = cursor + line.len();
            break;
        }
        cursor += line.len();
    }

    let yaml_end = yaml_end.ok_or_else(|| CodecError::InvalidHeader {
        reason: "unterminated frontmatter".to_string(),
    })?;

    let envelope: Envelope = serde_yaml::from_str(&input[header_start..yaml_end])
        .map_err(|e| CodecError::InvalidHeader {
            reason: e.to_string(),
        })?;

    let meta = envelope.meta;
    if meta.id.trim().is_empty() {
        return Err(CodecError::MissingId);
    }

    let mut body = &input[body_start..];
    while let Some(nl) = body.find('\n') {
        if body[..nl].trim().is_empty() {
            body = &body[nl + 1..];
        } else {
            break;
        }
    }
    if body.find('\n').is_none() && body.trim().is_empty() {
        body = "";
    }

    Ok((meta, body.to_string()))
}

/// Emit a memory document: opener, YAML envelope, closer, one blank line,
/// body, trailing newline. `parse_document(emit_document(m, b))` is an
/// identity on the metadata and on the body modulo trailing whitespace.
pub fn emit_document(meta: &MemoryMeta, body: &str) -> Result<String, CodecError> {
    let yaml = serde_yaml::to_string(&Envelope { meta: meta.clone() }).map_err(|e| {
        CodecError::Emit {
            reason: e.to_string(),
        }
    })?;

    let mut out = String::with_capacity(yaml.len() + body.len() + 16);
    out.push_str(MARKER);
    out.push('\n');
    out.push_str(&yaml);
    if !yaml.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(MARKER);
    out.push_str("\n\n");
    out.push_str(body);
    if !out.ends_with('\n') {
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cm_core::{NoteStatus, Scope, SymbolRef};

    fn sample_meta() -> MemoryMeta {
        MemoryMeta {
            id: "123e4567-e89b-42d3-a456-426614174000".to_string(),
            scope: Scope::File,
            file: Some("src/auth/login.go".to_string()),
            title: Some("Authentication Flow".to_string()),
            status: NoteStatus::Active,
            file_status: NoteStatus::Active,
            symbols: vec![SymbolRef {
                language: "go".to_string(),
                name: "Login".to_string(),
                status: NoteStatus::Active,
                last_resolved_at: Some("2026-01-15T10:00:00Z".to_string()),
            }],
        }
    }

    #[test]
    fn round_trip_identity() {
        let meta = sample_meta();
        let body = "How the auth flow works.\n\n## Details\n\nJWT tokens and refresh.";

        let emitted = emit_document(&meta, body).unwrap();
        let (parsed_meta, parsed_body) = parse_document(&emitted).unwrap();

        assert_eq!(parsed_meta, meta);
        assert_eq!(parsed_body.trim_end(), body.trim_end());
    }

    #[test]
    fn round_trip_empty_body() {
        let meta = sample_meta();
        let emitted = emit_document(&meta, "").unwrap();
        let (parsed_meta, parsed_body) = parse_document(&emitted).unwrap();
        assert_eq!(parsed_meta, meta);
        assert_eq!(parsed_body, "");
    }

    #[test]
    fn parse_applies_defaults() {
        let doc = "---\ncodemem:\n  id: abc-123\n---\n\nbody text\n";
        let (meta, body) = parse_document(doc).unwrap();
        assert_eq!(meta.id, "abc-123");
        assert_eq!(meta.scope, Scope::Project);
        assert_eq!(meta.status, NoteStatus::Active);
        assert_eq!(meta.file_status, NoteStatus::Active);
        assert!(meta.symbols.is_empty());
        assert_eq!(body, "body text\n");
    }

    #[test]
    fn parse_symbol_status_defaults() {
        let doc = "---\ncodemem:\n  id: abc\n  symbols:\n    - language: go\n      name: Login\n---\nx\n";
        let (meta, _) = parse_document(doc).unwrap();
        assert_eq!(meta.symbols.len(), 1);
        assert_eq!(meta.symbols[0].status, NoteStatus::Active);
        assert!(meta.symbols[0].last_resolved_at.is_none());
    }

    #[test]
    fn no_header_when_first_line_is_not_opener() {
        let doc = "# Just a Title\n\nSome content without frontmatter.\n";
        assert!(matches!(parse_document(doc), Err(CodecError::NoHeader)));
    }

    #[test]
    fn no_header_on_empty_input() {
        assert!(matches!(parse_document(""), Err(CodecError::NoHeader)));
        assert!(matches!(parse_document("\n\n  \n"), Err(CodecError::NoHeader)));
    }

    #[test]
    fn opener_found_after_leading_blank_lines() {
        let doc = "\n\n---\ncodemem:\n  id: abc\n---\nbody\n";
        let (meta, body) = parse_document(doc).unwrap();
        assert_eq!(meta.id, "abc");
        assert_eq!(body, "body\n");
    }

    #[test]
    fn invalid_header_on_unterminated_frontmatter() {
        let doc = "---\ncodemem:\n  id: abc\n";
        assert!(matches!(
            parse_document(doc),
            Err(CodecError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn invalid_header_on_malformed_yaml() {
        let doc = "---\ncodemem: [unclosed\n---\nbody\n";
        assert!(matches!(
            parse_document(doc),
            Err(CodecError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn invalid_header_on_missing_namespace() {
        let doc = "---\nother:\n  id: abc\n---\nbody\n";
        assert!(matches!(
            parse_document(doc),
            Err(CodecError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn missing_id_on_absent_or_empty_id() {
        let doc = "---\ncodemem:\n  scope: project\n---\nbody\n";
        assert!(matches!(parse_document(doc), Err(CodecError::MissingId)));

        let doc = "---\ncodemem:\n  id: \"\"\n---\nbody\n";
        assert!(matches!(parse_document(doc), Err(CodecError::MissingId)));
    }

    #[test]
    fn body_leading_blank_lines_trimmed() {
        let doc = "---\ncodemem:\n  id: abc\n---\n\n\n\nactual body\n";
        let (_, body) = parse_document(doc).unwrap();
        assert_eq!(body, "actual body\n");
    }

    #[test]
    fn crlf_line_endings_accepted() {
        let doc = "---\r\ncodemem:\r\n  id: abc\r\n---\r\nbody\r\n";
        let (meta, body) = parse_document(doc).unwrap();
        assert_eq!(meta.id, "abc");
        assert!(body.starts_with("body"));
    }

    #[test]
    fn emit_skips_absent_optionals() {
        let meta = MemoryMeta {
            id: "abc".to_string(),
            ..Default::default()
        };
        let emitted = emit_document(&meta, "x").unwrap();
        assert!(!emitted.contains("file:"));
        assert!(!emitted.contains("title:"));
        assert!(!emitted.contains("symbols:"));
    }
}
