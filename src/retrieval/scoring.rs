//! Score fusion and acceptance
//!
//! Pure functions over candidate scores; no candidate ordering or I/O is
//! involved, so callers can fuse in any order.

/// Weighted combination of vector similarity and lexical rank.
///
/// The two weights are independently configurable and are not forced to sum
/// to one; keeping them balanced is an administrator responsibility.
pub fn hybrid_score(
    vector_score: f32,
    lexical_score: f32,
    vector_weight: f32,
    lexical_weight: f32,
) -> f32 {
    vector_weight * vector_score + lexical_weight * lexical_score
}

/// A candidate is kept when it clears either threshold — vector similarity
/// alone can carry a candidate whose hybrid score is dragged down, and vice
/// versa.
pub fn passes_acceptance(
    vector_score: f32,
    hybrid: f32,
    min_similarity: f32,
    min_hybrid_score: f32,
) -> bool {
    vector_score >= min_similarity || hybrid >= min_hybrid_score
}
