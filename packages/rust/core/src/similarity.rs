//! Normalized string similarity used to pick the best page section.

use std::collections::HashMap;

/// Similarity score in `[0, 1]`; 1 means identical after normalization.
pub trait Similarity: Send + Sync {
    fn score(&self, a: &str, b: &str) -> f64;
}

/// Sørensen–Dice coefficient over character bigrams.
///
/// Inputs are lowercased and stripped of whitespace first. Bigrams are counted
/// as a multiset, so repeated pairs only match as often as they occur in both.
#[derive(Debug, Default, Clone, Copy)]
pub struct BigramSimilarity;

impl Similarity for BigramSimilarity {
    fn score(&self, a: &str, b: &str) -> f64 {
        let a = normalize(a);
        let b = normalize(b);

        if a == b {
            return if a.is_empty() { 0.0 } else { 1.0 };
        }
        if a.len() < 2 || b.len() < 2 {
            return 0.0;
        }

        let mut counts: HashMap<(char, char), usize> = HashMap::new();
        for pair in a.windows(2) {
            *counts.entry((pair[0], pair[1])).or_default() += 1;
        }

        let mut shared = 0usize;
        for pair in b.windows(2) {
            if let Some(n) = counts.get_mut(&(pair[0], pair[1])) {
                if *n > 0 {
                    *n -= 1;
                    shared += 1;
                }
            }
        }

        (2 * shared) as f64 / ((a.len() - 1) + (b.len() - 1)) as f64
    }
}

fn normalize(s: &str) -> Vec<char> {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}
