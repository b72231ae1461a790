use std::cmp::Ordering;
use std::collections::HashMap;

/// Standard reciprocal-rank-fusion constant.
pub const RRF_K: f32 = 60.0;

/// Which sub-query produced a ranked list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Keyword,
    Code,
    Text,
}

impl Signal {
    pub fn label(self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Code => "code",
            Self::Text => "text",
        }
    }
}

/// One sub-query's output: (snippet_id, native score) in rank order. Keyword
/// scores are BM25 relevance (higher better), vector scores are L2 distances
/// (lower better); fusion only consumes the rank, the native score is carried
/// through for observability.
#[derive(Debug, Clone)]
pub struct RankedList {
    pub signal: Signal,
    pub hits: Vec<(String, f32)>,
}

/// Native per-index scores preserved on each fused result.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SubScores {
    pub bm25: Option<f32>,
    pub code_distance: Option<f32>,
    pub text_distance: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct FusedHit {
    pub snippet_id: String,
    pub score: f32,
    pub best_rank: usize,
    pub scores: SubScores,
    pub found_via: Vec<&'static str>,
}

/// Reciprocal rank fusion: every hit contributes `1/(k + rank)` with 1-based
/// ranks, summed per snippet across lists. Ordering is fused score descending,
/// then lowest rank seen, then snippet id ascending so equal inputs always
/// produce the same output.
pub fn reciprocal_rank_fusion(lists: Vec<RankedList>) -> Vec<FusedHit> {
    let mut fused: HashMap<String, FusedHit> = HashMap::new();

    for list in lists {
        for (index, (snippet_id, native_score)) in list.hits.into_iter().enumerate() {
            let rank = index + 1;
            let contribution = 1.0 / (RRF_K + rank as f32);

            let entry = fused
                .entry(snippet_id.clone())
                .or_insert_with(|| FusedHit {
                    snippet_id,
                    score: 0.0,
                    best_rank: rank,
                    scores: SubScores::default(),
                    found_via: Vec::new(),
                });
            entry.score += contribution;
            entry.best_rank = entry.best_rank.min(rank);
            entry.found_via.push(list.signal.label());
            match list.signal {
                Signal::Keyword => entry.scores.bm25 = Some(native_score),
                Signal::Code => entry.scores.code_distance = Some(native_score),
                Signal::Text => entry.scores.text_distance = Some(native_score),
            }
        }
    }

    let mut hits: Vec<FusedHit> = fused.into_values().collect();
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.best_rank.cmp(&b.best_rank))
            .then_with(|| a.snippet_id.cmp(&b.snippet_id))
    });

    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyword_list(ids: &[&str]) -> RankedList {
        RankedList {
            signal: Signal::Keyword,
            hits: ids
                .iter()
                .enumerate()
                .map(|(i, id)| (id.to_string(), 10.0 - i as f32))
                .collect(),
        }
    }

    fn code_list(ids: &[&str]) -> RankedList {
        RankedList {
            signal: Signal::Code,
            hits: ids
                .iter()
                .enumerate()
                .map(|(i, id)| (id.to_string(), 0.1 * (i as f32 + 1.0)))
                .collect(),
        }
    }

    #[test]
    fn single_list_degenerates_to_native_order() {
        let fused = reciprocal_rank_fusion(vec![keyword_list(&["a", "b", "c"])]);
        let order: Vec<_> = fused.iter().map(|h| h.snippet_id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert!(fused[0].score > fused[1].score);
    }

    #[test]
    fn agreement_across_lists_wins() {
        // "b" appears in both lists and must outrank the two singletons.
        let fused = reciprocal_rank_fusion(vec![
            keyword_list(&["a", "b"]),
            code_list(&["b", "c"]),
        ]);
        assert_eq!(fused[0].snippet_id, "b");
        let expected = 1.0 / (RRF_K + 2.0) + 1.0 / (RRF_K + 1.0);
        assert!((fused[0].score - expected).abs() < 1e-6);
        assert_eq!(fused[0].found_via, vec!["keyword", "code"]);
        assert!(fused[0].scores.bm25.is_some());
        assert!(fused[0].scores.code_distance.is_some());
    }

    #[test]
    fn appending_a_hit_adds_exactly_its_rank_contribution() {
        let without = reciprocal_rank_fusion(vec![
            keyword_list(&["a", "b"]),
            code_list(&["c"]),
        ]);
        let with = reciprocal_rank_fusion(vec![
            keyword_list(&["a", "b"]),
            code_list(&["c", "a"]),
        ]);

        let score_of = |hits: &[FusedHit], id: &str| {
            hits.iter()
                .find(|h| h.snippet_id == id)
                .map(|h| h.score)
                .unwrap_or(0.0)
        };

        // "a" gained a rank-2 entry in the code list: +1/(60+2).
        let delta = score_of(&with, "a") - score_of(&without, "a");
        assert!((delta - 1.0 / (RRF_K + 2.0)).abs() < 1e-6);
        // Everyone else is untouched.
        assert!((score_of(&with, "b") - score_of(&without, "b")).abs() < 1e-9);
        assert!((score_of(&with, "c") - score_of(&without, "c")).abs() < 1e-9);
    }

    #[test]
    fn ties_break_by_rank_then_id() {
        // Two snippets each appear once at rank 1 in different lists: equal
        // fused scores and equal best rank, so the id decides.
        let fused = reciprocal_rank_fusion(vec![
            keyword_list(&["zeta"]),
            code_list(&["alpha"]),
        ]);
        assert_eq!(fused[0].snippet_id, "alpha");
        assert_eq!(fused[1].snippet_id, "zeta");
    }

    #[test]
    fn empty_input_fuses_to_nothing() {
        assert!(reciprocal_rank_fusion(Vec::new()).is_empty());
        assert!(reciprocal_rank_fusion(vec![keyword_list(&[])]).is_empty());
    }
}
