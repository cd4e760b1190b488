/// A contiguous portion of a memory body delimited by markdown headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryChunk {
    /// Header text without the leading hashes; empty for the preamble.
    pub heading: String,
    /// Chunk text, header line included.
    pub text: String,
}

/// Split a memory body into chunks at markdown header lines.
///
/// A header line starts with one to six `#` characters followed by a space
/// and non-empty text; seven or more hashes do not open a chunk. Content
/// before the first header forms a preamble chunk with an empty heading.
/// Chunks whose trimmed text is empty are dropped; an empty body yields no
/// chunks.
pub fn chunk_by_headings(body: &str) -> Vec<MemoryChunk> {
    let mut chunks = Vec::new();
    let mut heading = String::new();
    let mut lines: Vec<&str> = Vec::new();

    for line in body.lines() {
        if let Some(text) = heading_text(line) {
            flush(&heading, &lines, &mut chunks);
            heading = text.to_string();
            lines = vec![line];
        } else {
            lines.push(line);
        }
    }
    flush(&heading, &lines, &mut chunks);

    chunks
}

fn flush(heading: &str, lines: &[&str], chunks: &mut Vec<MemoryChunk>) {
    let text = lines.join("\n");
    if text.trim().is_empty() {
        return;
    }
    chunks.push(MemoryChunk {
        heading: heading.to_string(),
        text,
    });
}

/// Header text of a markdown header line, or None if the line is not one.
fn heading_text(line: &str) -> Option<&str> {
    let hashes = line.chars().take_while(|&c| c == '#').count();
    if !(1..=6).contains(&hashes) {
        return None;
    }
    let rest = &line[hashes..];
    let text = rest.strip_prefix(' ')?.trim();
    if text.is_empty() {
        return None;
    }
    Some(text)
}
