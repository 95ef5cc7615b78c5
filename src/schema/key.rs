use once_cell::sync::Lazy;
use regex::Regex;

static NON_KEY_CHARS: Lazy<Regex> = Lazy::new(|| {
    // Anything that is not a lower-case ascii letter, digit or underscore.
    // `-` is folded too so "AIR-POLLUTION" and "Air Pollution" share a key.
    Regex::new(r"[^a-z0-9_]").expect("static pattern")
});

/// Map an arbitrary category label to a filesystem-safe storage key.
///
/// Trims, lower-cases and replaces every character outside `[a-z0-9_]` with
/// `_`, one underscore per character. Total: a label with nothing usable in it
/// becomes a run of underscores (at least one).
pub fn normalize_key(label: &str) -> String {
    let lowered = label.trim().to_lowercase();
    let key = NON_KEY_CHARS.replace_all(&lowered, "_").into_owned();
    if key.is_empty() {
        "_".to_string()
    } else {
        key
    }
}

/// True when a key carries no alphanumeric content, so unrelated labels
/// are likely to alias onto the same dataset.
pub fn is_degenerate(key: &str) -> bool {
    key.chars().all(|c| c == '_')
}
