//! Heuristic entity matcher
//!
//! Two extraction strategies run together: a pattern for alphanumeric
//! tokens that look like equipment codes (contain a digit or a `+`, length
//! at least 3), and a membership test against a curated list of known
//! names. Every raw match is expanded into spelling-tolerant variants so
//! that queries like "rason+" still reach documents tagged "razon+".

use ahash::AHashSet;
use regex::Regex;

use super::EntityMatcher;

/// Upper bound on the returned variant list, keeps the store predicate small
const MAX_VARIANTS: usize = 12;

pub struct HeuristicEntityMatcher {
    code_pattern: Regex,
    known_names: Vec<String>,
}

impl HeuristicEntityMatcher {
    pub fn new(known_names: Vec<String>) -> Self {
        // Candidate tokens: letters/digits with code separators, length >= 3
        let code_pattern =
            Regex::new(r"[A-Za-z0-9+][A-Za-z0-9+_-]{2,}").expect("valid entity pattern");
        Self {
            code_pattern,
            known_names,
        }
    }

    fn raw_matches(&self, query: &str) -> Vec<String> {
        let mut matches = Vec::new();

        for token in self.code_pattern.find_iter(query) {
            let token = token.as_str();
            let looks_like_code =
                token.chars().any(|c| c.is_ascii_digit()) || token.contains('+');
            if looks_like_code {
                matches.push(token.to_lowercase());
            }
        }

        let query_lower = query.to_lowercase();
        for name in &self.known_names {
            let name_lower = name.to_lowercase();
            if query_lower.contains(&name_lower) {
                matches.push(name_lower);
            }
        }

        matches
    }
}

impl EntityMatcher for HeuristicEntityMatcher {
    fn detect(&self, query: &str) -> Vec<String> {
        let mut seen = AHashSet::new();
        let mut variants = Vec::new();

        for raw in self.raw_matches(query) {
            for variant in expand_variants(&raw) {
                if variants.len() >= MAX_VARIANTS {
                    return variants;
                }
                if seen.insert(variant.clone()) {
                    variants.push(variant);
                }
            }
        }

        variants
    }
}

/// Expand one raw match into its spelling-tolerant alternatives.
///
/// Produced forms: the match itself, separator-stripped, space-before-digit,
/// dash-before-digit, `+`-stripped, `+` spelled out, and the z/s confusion
/// pair applied to each of those.
pub fn expand_variants(raw: &str) -> Vec<String> {
    let base = raw.to_lowercase();
    let mut variants = vec![base.clone()];

    let stripped: String = base.chars().filter(|c| !matches!(c, ' ' | '-' | '_')).collect();
    variants.push(stripped.clone());

    if let Some(split) = split_before_first_digit(&stripped) {
        variants.push(format!("{} {}", split.0, split.1));
        variants.push(format!("{}-{}", split.0, split.1));
    }

    if base.contains('+') {
        variants.push(base.replace('+', ""));
        variants.push(base.replace('+', "plus"));
    }

    // Common transcription confusion observed in queries: z <-> s
    for variant in variants.clone() {
        if variant.contains('z') {
            variants.push(variant.replace('z', "s"));
        }
        if variant.contains('s') {
            variants.push(variant.replace('s', "z"));
        }
    }

    let mut seen = AHashSet::new();
    variants
        .into_iter()
        .filter(|v| !v.is_empty())
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

/// Split "ws600" into ("ws", "600"); None when the token does not switch
/// from letters to digits
fn split_before_first_digit(token: &str) -> Option<(String, String)> {
    let first_digit = token.find(|c: char| c.is_ascii_digit())?;
    if first_digit == 0 || first_digit == token.len() {
        return None;
    }
    let (head, tail) = token.split_at(first_digit);
    if !head.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some((head.to_string(), tail.to_string()))
}
