//! Gallery matching and the accept/reject decision.

use crate::types::{Embedding, Identity};
use serde::{Deserialize, Serialize};

pub const DEFAULT_THRESHOLD_PERCENT: f32 = 70.0;
pub const MIN_THRESHOLD_PERCENT: f32 = 50.0;
pub const MAX_THRESHOLD_PERCENT: f32 = 95.0;

/// Map cosine similarity [-1, 1] to a percentage confidence [0, 100].
///
/// This is the one fixed, monotonic mapping used by every decision:
/// `(similarity + 1) / 2 * 100`. Similarity 0 maps to the neutral 50%.
pub fn confidence_from_similarity(similarity: f32) -> f32 {
    (similarity + 1.0) / 2.0 * 100.0
}

/// Result of comparing a query embedding against the gallery.
///
/// `accepted` is true iff the mapped confidence of the unique best-scoring
/// identity strictly exceeds `threshold_percent`. A reject with an empty
/// identity is the NoMatch outcome — a valid decision, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchDecision {
    pub identity_key: Option<String>,
    pub display_name: Option<String>,
    /// Cosine similarity of the best candidate, [-1, 1] (0.0 for an empty gallery).
    pub similarity: f32,
    /// Mapped confidence of the best candidate, [0, 100].
    pub confidence: f32,
    /// Threshold the decision was taken against.
    pub threshold_percent: f32,
    pub accepted: bool,
}

/// Compare a query embedding against every enrolled identity.
///
/// Traversal is constant-time over the gallery: every identity and every
/// reference embedding is visited with no early exit, so timing leaks
/// neither gallery size nor match position. Per identity the maximum
/// similarity across its reference embeddings counts; exact ties between
/// identities break deterministically toward the lowest identity key.
/// Embeddings from a different encoder version or length never match
/// (their similarity contribution is skipped with a warning).
pub fn match_against(
    query: &Embedding,
    gallery: &[Identity],
    threshold_percent: f32,
) -> MatchDecision {
    let mut best: Option<(f32, &Identity)> = None;

    for identity in gallery {
        let mut identity_best = f32::NEG_INFINITY;
        for reference in &identity.embeddings {
            if reference.encoder_version != query.encoder_version
                || reference.values.len() != query.values.len()
            {
                tracing::warn!(
                    identity = %identity.key,
                    reference_version = %reference.encoder_version,
                    query_version = %query.encoder_version,
                    "skipping reference embedding from a different encoder version"
                );
                continue;
            }
            let sim = query.similarity(reference);
            if sim > identity_best {
                identity_best = sim;
            }
        }
        if identity_best == f32::NEG_INFINITY {
            continue;
        }

        let is_better = match best {
            None => true,
            Some((best_sim, best_identity)) => {
                identity_best > best_sim
                    || (identity_best == best_sim && identity.key < best_identity.key)
            }
        };
        if is_better {
            best = Some((identity_best, identity));
        }
    }

    match best {
        Some((similarity, identity)) => {
            let confidence = confidence_from_similarity(similarity);
            let accepted = confidence > threshold_percent;
            MatchDecision {
                identity_key: accepted.then(|| identity.key.clone()),
                display_name: accepted.then(|| identity.name.clone()),
                similarity,
                confidence,
                threshold_percent,
                accepted,
            }
        }
        None => MatchDecision {
            identity_key: None,
            display_name: None,
            similarity: 0.0,
            confidence: confidence_from_similarity(0.0),
            threshold_percent,
            accepted: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: Vec<f32>) -> Embedding {
        Embedding {
            values,
            encoder_version: "w600k_r50".into(),
        }
    }

    fn identity(key: &str, name: &str, embeddings: Vec<Embedding>) -> Identity {
        Identity {
            key: key.into(),
            name: name.into(),
            embeddings,
            enrolled_at: "2026-02-01T09:00:00Z".into(),
        }
    }

    #[test]
    fn self_similarity_maps_to_max_confidence() {
        let e = emb(vec![0.3, -0.4, 0.5]);
        let sim = e.similarity(&e);
        assert!((confidence_from_similarity(sim) - 100.0).abs() < 1e-4);
    }

    #[test]
    fn mapping_is_monotonic_and_bounded() {
        assert_eq!(confidence_from_similarity(-1.0), 0.0);
        assert_eq!(confidence_from_similarity(0.0), 50.0);
        assert_eq!(confidence_from_similarity(1.0), 100.0);
        assert!(confidence_from_similarity(0.2) < confidence_from_similarity(0.4));
    }

    #[test]
    fn empty_gallery_is_no_match() {
        let decision = match_against(&emb(vec![1.0, 0.0]), &[], 70.0);
        assert!(!decision.accepted);
        assert!(decision.identity_key.is_none());
        assert_eq!(decision.similarity, 0.0);
    }

    #[test]
    fn identical_embedding_accepts_at_max_confidence() {
        let reference = emb(vec![0.6, 0.8]);
        let gallery = vec![identity("E001", "Asha Rao", vec![reference.clone()])];
        let decision = match_against(&reference, &gallery, 70.0);
        assert!(decision.accepted);
        assert_eq!(decision.identity_key.as_deref(), Some("E001"));
        assert!((decision.confidence - 100.0).abs() < 1e-4);
    }

    #[test]
    fn high_threshold_rejects_a_decent_score() {
        // similarity 0.6 -> confidence 80, below a 95 threshold.
        let gallery = vec![identity("E001", "Asha Rao", vec![emb(vec![1.0, 0.0])])];
        let query = emb(vec![0.6, 0.8]);
        let decision = match_against(&query, &gallery, 95.0);
        assert!((decision.confidence - 80.0).abs() < 1e-3);
        assert!(!decision.accepted);
        assert!(decision.identity_key.is_none());

        let lenient = match_against(&query, &gallery, 70.0);
        assert!(lenient.accepted);
    }

    #[test]
    fn best_identity_wins_across_gallery() {
        let gallery = vec![
            identity("E001", "A", vec![emb(vec![0.0, 1.0])]),
            identity("E002", "B", vec![emb(vec![1.0, 0.0])]),
        ];
        let decision = match_against(&emb(vec![1.0, 0.0]), &gallery, 70.0);
        assert_eq!(decision.identity_key.as_deref(), Some("E002"));
    }

    #[test]
    fn exact_tie_breaks_toward_lowest_key() {
        let shared = emb(vec![1.0, 0.0]);
        let gallery = vec![
            identity("E900", "Late", vec![shared.clone()]),
            identity("E100", "Early", vec![shared.clone()]),
        ];
        let decision = match_against(&shared, &gallery, 70.0);
        assert_eq!(decision.identity_key.as_deref(), Some("E100"));
    }

    #[test]
    fn multiple_references_use_the_maximum() {
        let gallery = vec![identity(
            "E001",
            "A",
            vec![emb(vec![0.0, 1.0]), emb(vec![1.0, 0.0])],
        )];
        let decision = match_against(&emb(vec![1.0, 0.0]), &gallery, 70.0);
        assert!(decision.accepted);
        assert!((decision.similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_vectors_never_divide_by_zero() {
        let zero = emb(vec![0.0, 0.0]);
        let gallery = vec![identity("E001", "A", vec![zero.clone()])];
        let decision = match_against(&zero, &gallery, 70.0);
        assert!(decision.similarity == 0.0);
        assert!(decision.confidence.is_finite());
        assert!(!decision.accepted);
    }

    #[test]
    fn mismatched_encoder_version_never_matches() {
        let mut foreign = emb(vec![1.0, 0.0]);
        foreign.encoder_version = "glint360k_r100".into();
        let gallery = vec![identity("E001", "A", vec![foreign])];
        let decision = match_against(&emb(vec![1.0, 0.0]), &gallery, 70.0);
        assert!(!decision.accepted);
        assert!(decision.identity_key.is_none());
    }
}
