/// Maximum length of a filename slug, in characters.
const SLUG_MAX_CHARS: usize = 50;

/// Maximum length of a sanitized file-path stem, in characters.
const SANITIZE_MAX_CHARS: usize = 60;

/// Normalize text for derived indices: Unicode lowercase, every run of
/// whitespace collapsed to a single space, leading/trailing space trimmed.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Turn a title into a filename slug: lowercase, letters and digits kept,
/// whitespace/`-`/`_` become `-`, runs collapsed, edges trimmed, capped at
/// 50 characters.
pub fn slugify(text: &str) -> String {
    let mut out = String::new();
    let mut pending_dash = false;

    for ch in text.to_lowercase().chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch);
        } else if ch.is_whitespace() || ch == '-' || ch == '_' {
            pending_dash = true;
        }
        // Anything else (punctuation, emoji) is dropped without a separator.
    }

    out.chars().take(SLUG_MAX_CHARS).collect()
}

/// Flatten a repo-relative path into a filename component: `/`, `\` and `.`
/// become `_`, capped at 60 characters.
pub fn sanitize_file_path(path: &str) -> String {
    path.chars()
        .map(|ch| match ch {
            '/' | '\\' | '.' => '_',
            other => other,
        })
        .take(SANITIZE_MAX_CHARS)
        .collect()
}

/// Unique character trigrams of the normalized text, in first-appearance
/// order. Inputs shorter than three characters after normalization yield
/// nothing. Used by the in-database ngram index variant.
pub fn trigrams(text: &str) -> Vec<String> {
    let normalized = normalize(text);
    let chars: Vec<char> = normalized.chars().collect();
    if chars.len() < 3 {
        return Vec::new();
    }

    let mut seen = std::collections::HashSet::new();
    let mut grams = Vec::new();
    for window in chars.windows(3) {
        let gram: String = window.iter().collect();
        if seen.insert(gram.clone()) {
            grams.push(gram);
        }
    }
    grams
}

/// Truncate a string to at most `max_chars` code points on a valid UTF-8
/// boundary. Returns a sub-slice of the input.
pub fn truncate_code_points(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}
