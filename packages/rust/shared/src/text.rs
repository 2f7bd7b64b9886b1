//! Character-counted string helpers.
//!
//! Budgets are measured in Unicode scalar values, so splitting must never land
//! inside a multi-byte character.

/// Length of `s` in characters.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte offset of the `n`-th character (or `s.len()` when `s` is shorter).
pub fn char_boundary(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map_or(s.len(), |(i, _)| i)
}

/// Split `s` after its first `n` characters.
pub fn split_at_chars(s: &str, n: usize) -> (&str, &str) {
    s.split_at(char_boundary(s, n))
}

/// The first `n` characters of `s`.
pub fn truncate_chars(s: &str, n: usize) -> &str {
    split_at_chars(s, n).0
}

/// Cut `s` into consecutive pieces of at most `max` characters each.
pub fn chunk_chars(s: &str, max: usize) -> Vec<String> {
    if max == 0 {
        return vec![s.to_string()];
    }
    let mut chunks = Vec::new();
    let mut rest = s;
    while !rest.is_empty() {
        let (head, tail) = split_at_chars(rest, max);
        chunks.push(head.to_string());
        rest = tail;
    }
    chunks
}
