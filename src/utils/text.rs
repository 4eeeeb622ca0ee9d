/// Characters that cannot appear in a file name on common file systems.
const ILLEGAL_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Replaces file-system-illegal characters with spaces, collapses runs of
/// whitespace and trims. Case is preserved so the result can name files.
pub fn clean(input: &str) -> String {
    input
        .replace(ILLEGAL_CHARS, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// [`clean`] followed by lowercasing; the form every comparison works on.
pub fn normalize(input: &str) -> String {
    clean(input).to_lowercase()
}

/// Symmetric edit-distance similarity on a 0-100 scale.
pub fn similarity(a: &str, b: &str) -> u8 {
    (strsim::normalized_levenshtein(a, b) * 100.0).round() as u8
}

pub fn contains_any(haystack: &str, needles: &[String]) -> bool {
    let haystack = haystack.to_lowercase();
    needles
        .iter()
        .filter(|needle| !needle.is_empty())
        .any(|needle| haystack.contains(&needle.to_lowercase()))
}
