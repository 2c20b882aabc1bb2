// Copyright (c) 2026 Isprava Engineering
//! Fuzzy location-name resolution (`spec.md` SS4.8).
//!
//! Tool arguments often carry a user-typed place name that only loosely
//! matches the canonical names a downstream tool expects ("bombay" vs
//! "Mumbai"). `resolve` finds the closest canonical name by edit distance
//! and reports whether the match is close enough to trust silently.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationMatch {
    pub canonical_name: String,
    pub distance: usize,
    /// `true` when `distance <= min(3, floor(0.4*len)+1)` — the caller may
    /// substitute silently.
    pub confident: bool,
}

/// `spec.md` SS4.8's acceptance threshold for a token of length `len`.
fn acceptance_threshold(len: usize) -> usize {
    (3usize).min((len as f64 * 0.4).floor() as usize + 1)
}

/// Resolve `query` against `canonical_names`, case-insensitively, by
/// minimum Levenshtein distance. Returns `None` only when `canonical_names`
/// is empty.
pub fn resolve(query: &str, canonical_names: &[String]) -> Option<LocationMatch> {
    let query_lower = query.trim().to_lowercase();

    if let Some(exact) = canonical_names.iter().find(|name| name.to_lowercase() == query_lower) {
        return Some(LocationMatch { canonical_name: exact.clone(), distance: 0, confident: true });
    }

    canonical_names
        .iter()
        .map(|name| {
            let distance = levenshtein(&query_lower, &name.to_lowercase());
            LocationMatch {
                canonical_name: name.clone(),
                distance,
                confident: distance <= acceptance_threshold(query_lower.chars().count()),
            }
        })
        .min_by_key(|m| m.distance)
}

/// `spec.md` SS4.8: flatten comma-joined values, trim each token, resolve
/// each, and return the deduplicated set of canonical names for tokens
/// that resolved confidently.
pub fn resolve_many(raw: &str, canonical_names: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();

    for token in raw.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        if let Some(m) = resolve(token, canonical_names) {
            if m.confident && seen.insert(m.canonical_name.clone()) {
                out.push(m.canonical_name);
            }
        }
    }

    out
}

/// Classic Wagner-Fischer edit distance over Unicode scalar values.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (n, m) = (a.len(), b.len());

    if n == 0 {
        return m;
    }
    if m == 0 {
        return n;
    }

    let mut prev: Vec<usize> = (0..=m).collect();
    let mut curr = vec![0usize; m + 1];

    for i in 1..=n {
        curr[0] = i;
        for j in 1..=m {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[m]
}
