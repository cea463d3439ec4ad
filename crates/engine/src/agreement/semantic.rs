//! Stage 2: semantic similarity between the two turns.
//!
//! Primary signal is a cosine over curator embeddings; when the runtime
//! has no embedding support the whole analysis degrades to token-level
//! Jaccard. Aligned reasoning steps get pairwise scores, and the shared
//! high-content vocabulary becomes the topic clusters.

use std::collections::{HashMap, HashSet};

use sy_domain::agreement::{SemanticAnalysis, SimilarityMethod};

use crate::curator::Curator;

const STOPWORDS: &[&str] = &[
    "the", "and", "that", "this", "with", "from", "have", "which", "would", "there", "their",
    "about", "then", "them", "these", "than", "when", "what", "where", "will", "into", "because",
    "both", "each", "also", "thus", "some", "more", "very", "just", "over", "such",
];

const MAX_TOPIC_CLUSTERS: usize = 8;

/// Run the semantic stage over two turn contents.
pub async fn analyze(
    curator: &Curator,
    content_a: &str,
    content_b: &str,
    steps_a: &[String],
    steps_b: &[String],
) -> SemanticAnalysis {
    let (overall_similarity, method) =
        match (curator.embed(content_a).await, curator.embed(content_b).await) {
            (Ok(ea), Ok(eb)) => (cosine(&ea, &eb), SimilarityMethod::Embedding),
            (ra, rb) => {
                if let Some(e) = ra.err().or(rb.err()) {
                    tracing::debug!(error = %e, "embeddings unavailable, using jaccard fallback");
                }
                (jaccard(content_a, content_b), SimilarityMethod::Jaccard)
            }
        };

    let step_similarities = steps_a
        .iter()
        .zip(steps_b.iter())
        .map(|(a, b)| jaccard(a, b))
        .collect();

    SemanticAnalysis {
        overall_similarity: overall_similarity.clamp(0.0, 1.0),
        step_similarities,
        topic_clusters: topic_clusters(content_a, content_b),
        method,
    }
}

/// Mean of the aligned step similarities; 0 when no steps align.
pub fn reasoning_convergence(analysis: &SemanticAnalysis) -> f32 {
    if analysis.step_similarities.is_empty() {
        return 0.0;
    }
    analysis.step_similarities.iter().sum::<f32>() / analysis.step_similarities.len() as f32
}

pub(crate) fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Token-level Jaccard over lowercased alphanumeric words.
pub(crate) fn jaccard(a: &str, b: &str) -> f32 {
    let set_a = word_set(a);
    let set_b = word_set(b);
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f32 / union as f32
}

fn word_set(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// High-content words both turns use, most frequent first.
fn topic_clusters(a: &str, b: &str) -> Vec<String> {
    let counts = |text: &str| -> HashMap<String, usize> {
        let mut map = HashMap::new();
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .map(str::to_lowercase)
        {
            if word.len() >= 4 && !STOPWORDS.contains(&word.as_str()) {
                *map.entry(word).or_insert(0) += 1;
            }
        }
        map
    };

    let counts_a = counts(a);
    let counts_b = counts(b);
    let mut shared: Vec<(String, usize)> = counts_a
        .into_iter()
        .filter_map(|(word, n)| counts_b.get(&word).map(|m| (word, n + m)))
        .collect();
    shared.sort_by(|x, y| y.1.cmp(&x.1).then_with(|| x.0.cmp(&y.0)));
    shared.truncate(MAX_TOPIC_CLUSTERS);
    shared.into_iter().map(|(word, _)| word).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.3, 0.5, 0.1];
        assert!((cosine(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine(&[], &[]), 0.0);
        assert_eq!(cosine(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn jaccard_tracks_overlap() {
        assert!((jaccard("the cat sat", "the cat sat") - 1.0).abs() < 1e-6);
        assert_eq!(jaccard("alpha beta", "gamma delta"), 0.0);
        let partial = jaccard("multiply fifteen by seventeen", "multiply numbers by hand");
        assert!(partial > 0.0 && partial < 1.0);
    }

    #[test]
    fn topic_clusters_are_shared_content_words() {
        let a = "Decompose the multiplication: fifteen times seventeen equals 255.";
        let b = "The multiplication of fifteen and seventeen gives 255 overall.";
        let clusters = topic_clusters(a, b);
        assert!(clusters.contains(&"multiplication".to_owned()));
        assert!(clusters.contains(&"fifteen".to_owned()));
        assert!(!clusters.contains(&"the".to_owned()));
    }

    #[test]
    fn convergence_is_mean_of_step_scores() {
        let analysis = SemanticAnalysis {
            overall_similarity: 0.5,
            step_similarities: vec![1.0, 0.0, 0.5],
            topic_clusters: vec![],
            method: SimilarityMethod::Jaccard,
        };
        assert!((reasoning_convergence(&analysis) - 0.5).abs() < 1e-6);
    }
}
