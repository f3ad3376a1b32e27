//! Semantic question-to-region matching
//!
//! Assigns each flashcard question at most one region, by cosine similarity
//! between the question embedding and the region-description embedding.
//!
//! # Algorithm
//! 1. Cap the candidate regions to the most confident `max_regions`
//! 2. Embed questions and descriptions separately, in small batches
//! 3. Build the `questions x regions` cosine similarity matrix
//! 4. Greedy one-to-one assignment: questions in input order each claim the
//!    best unclaimed region scoring strictly above the confidence floor
//!
//! There is no fallback below the floor: an unmatched question stays unmatched.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use visual_region_common::{CancellationToken, MatchCandidate, RegionError, VisualRegion};
use visual_region_embeddings::{cosine_similarity, EmbedError, Embedder};

/// Errors raised while building the similarity matrix
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbedError),

    #[error("Question and region embeddings differ in size ({question} vs {region})")]
    DimensionMismatch { question: usize, region: usize },
}

impl From<MatchError> for RegionError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::Embedding(e) => e.into(),
            other => RegionError::CollaboratorUnavailable(other.to_string()),
        }
    }
}

/// Configuration for semantic matching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Minimum similarity a match must strictly exceed
    pub confidence_floor: f32,
    /// Maximum number of regions embedded per document
    pub max_regions: usize,
    pub question_batch_size: usize,
    /// Region batch size for at most 20 descriptions
    pub region_batch_small: usize,
    /// Region batch size for 21 to 40 descriptions
    pub region_batch_medium: usize,
    /// Region batch size for more than 40 descriptions
    pub region_batch_large: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.35,
            max_regions: 35,
            question_batch_size: 16,
            region_batch_small: 16,
            region_batch_medium: 12,
            region_batch_large: 10,
        }
    }
}

impl MatcherConfig {
    /// Batch size for embedding `count` region descriptions; shrinks as the count grows
    #[must_use]
    pub fn region_batch_size(&self, count: usize) -> usize {
        let size = if count > 40 {
            self.region_batch_large
        } else if count > 20 {
            self.region_batch_medium
        } else {
            self.region_batch_small
        };
        size.max(1)
    }
}

/// Matches produced by one run, plus why the run fell short (if it did)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchOutcome {
    pub matches: Vec<MatchCandidate>,
    pub degradation: Option<RegionError>,
}

/// Embeddings produced before a batch failed or the run was cancelled
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchedEmbeddings {
    pub vectors: Vec<Vec<f32>>,
    pub interruption: Option<RegionError>,
}

/// Keep the `max_regions` most confident regions, most confident first.
///
/// The sort is stable, so equally confident regions keep detection order.
#[must_use]
pub fn cap_regions(mut regions: Vec<VisualRegion>, max_regions: usize) -> Vec<VisualRegion> {
    if regions.len() <= max_regions {
        return regions;
    }
    info!(
        "Limiting {} candidate regions to the {} most confident",
        regions.len(),
        max_regions
    );
    regions.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()));
    regions.truncate(max_regions);
    regions
}

/// Embed `texts` in batches of `batch_size`, checking `cancel` before each batch.
///
/// A failure on the first batch yields no vectors; a failure on a later batch
/// keeps the vectors of the completed batches.
pub fn embed_in_batches(
    embedder: &mut dyn Embedder,
    texts: &[String],
    batch_size: usize,
    cancel: &CancellationToken,
) -> BatchedEmbeddings {
    let batch_size = batch_size.max(1);
    let mut result = BatchedEmbeddings {
        vectors: Vec::with_capacity(texts.len()),
        interruption: None,
    };

    for (batch_index, batch) in texts.chunks(batch_size).enumerate() {
        if let Err(e) = cancel.check() {
            warn!("Embedding cancelled before batch {}", batch_index + 1);
            result.interruption = Some(e);
            break;
        }

        match embedder.embed(batch) {
            Ok(vectors) if vectors.len() == batch.len() => {
                debug!(
                    "Embedded batch {} ({} texts) with {}",
                    batch_index + 1,
                    batch.len(),
                    embedder.name()
                );
                result.vectors.extend(vectors);
            }
            Ok(vectors) => {
                warn!(
                    "Embedder {} returned {} vectors for {} texts",
                    embedder.name(),
                    vectors.len(),
                    batch.len()
                );
                result.interruption = Some(RegionError::CollaboratorUnavailable(format!(
                    "embedder returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
                break;
            }
            Err(e) => {
                match &e {
                    EmbedError::ResourceExhausted(_) => warn!(
                        "Resource exhausted in embedding batch {}; keeping {} completed embeddings",
                        batch_index + 1,
                        result.vectors.len()
                    ),
                    _ => warn!("Embedding batch {} failed: {}", batch_index + 1, e),
                }
                result.interruption = Some(e.into());
                break;
            }
        }
    }

    result
}

/// Pairwise cosine similarity, `questions.len()` rows by `regions.len()` columns
///
/// # Errors
/// Returns [`MatchError::DimensionMismatch`] when the two sides disagree on vector size
pub fn similarity_matrix(
    questions: &[Vec<f32>],
    regions: &[Vec<f32>],
) -> Result<Vec<Vec<f32>>, MatchError> {
    // Every vector must share the dimension of the first one; `zip` would
    // otherwise truncate ragged rows silently
    if let Some(dim) = questions.first().or_else(|| regions.first()).map(Vec::len) {
        if let Some(q) = questions.iter().find(|q| q.len() != dim) {
            return Err(MatchError::DimensionMismatch {
                question: q.len(),
                region: dim,
            });
        }
        if let Some(r) = regions.iter().find(|r| r.len() != dim) {
            return Err(MatchError::DimensionMismatch {
                question: dim,
                region: r.len(),
            });
        }
    }

    Ok(questions
        .iter()
        .map(|q| {
            regions
                .iter()
                .map(|r| {
                    let score = cosine_similarity(q, r);
                    if score.is_finite() {
                        score
                    } else {
                        0.0
                    }
                })
                .collect()
        })
        .collect())
}

/// Greedy one-to-one assignment over a similarity matrix.
///
/// Questions are visited in row order; each takes the unclaimed region with
/// the highest score strictly above `floor`. Ties go to the lowest region index.
#[must_use]
pub fn greedy_assign(matrix: &[Vec<f32>], floor: f32) -> Vec<MatchCandidate> {
    let region_count = matrix.iter().map(Vec::len).max().unwrap_or(0);
    let mut used = vec![false; region_count];
    let mut matches = Vec::new();

    for (question_index, row) in matrix.iter().enumerate() {
        let mut best: Option<(usize, f32)> = None;
        let mut best_score = floor;

        for (region_index, &score) in row.iter().enumerate() {
            if !used[region_index] && score > best_score {
                best_score = score;
                best = Some((region_index, score));
            }
        }

        if let Some((region_index, score)) = best {
            used[region_index] = true;
            matches.push(MatchCandidate {
                question_index,
                region_index,
                score,
            });
        }
    }

    matches
}

/// Highest score in the matrix, if it has any entries
fn best_score(matrix: &[Vec<f32>]) -> Option<f32> {
    matrix
        .iter()
        .flatten()
        .copied()
        .fold(None, |best, s| Some(best.map_or(s, |b: f32| b.max(s))))
}

/// Embedding-based matcher
pub struct SemanticMatcher {
    config: MatcherConfig,
    embedder: Box<dyn Embedder>,
}

impl SemanticMatcher {
    #[must_use]
    pub fn new(config: MatcherConfig, embedder: Box<dyn Embedder>) -> Self {
        Self { config, embedder }
    }

    #[must_use]
    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    #[must_use]
    pub fn embedder_name(&self) -> &str {
        self.embedder.name()
    }

    /// Apply the capacity cap from the configuration
    #[must_use]
    pub fn select_regions(&self, regions: Vec<VisualRegion>) -> Vec<VisualRegion> {
        cap_regions(regions, self.config.max_regions)
    }

    /// Match questions to region descriptions.
    ///
    /// `descriptions[i]` describes region `i`. Never fails: embedding problems
    /// produce an empty (or partial) outcome with the cause in `degradation`.
    pub fn match_descriptions(
        &mut self,
        questions: &[String],
        descriptions: &[String],
        cancel: &CancellationToken,
    ) -> MatchOutcome {
        if questions.is_empty() || descriptions.is_empty() {
            debug!(
                "Nothing to match ({} questions, {} regions)",
                questions.len(),
                descriptions.len()
            );
            return MatchOutcome::default();
        }

        let descriptions = if descriptions.len() > self.config.max_regions {
            warn!(
                "Received {} region descriptions, only the first {} are matched",
                descriptions.len(),
                self.config.max_regions
            );
            &descriptions[..self.config.max_regions]
        } else {
            descriptions
        };

        let question_batch = self.config.question_batch_size;
        let region_batch = self.config.region_batch_size(descriptions.len());

        let question_embeddings =
            embed_in_batches(self.embedder.as_mut(), questions, question_batch, cancel);
        if question_embeddings.vectors.is_empty() {
            return MatchOutcome {
                matches: Vec::new(),
                degradation: question_embeddings.interruption,
            };
        }

        let region_embeddings =
            embed_in_batches(self.embedder.as_mut(), descriptions, region_batch, cancel);
        if region_embeddings.vectors.is_empty() {
            return MatchOutcome {
                matches: Vec::new(),
                degradation: region_embeddings.interruption,
            };
        }

        let mut degradation = question_embeddings
            .interruption
            .or(region_embeddings.interruption);

        let matrix = match similarity_matrix(
            &question_embeddings.vectors,
            &region_embeddings.vectors,
        ) {
            Ok(matrix) => matrix,
            Err(e) => {
                warn!("Cannot compare embeddings: {}", e);
                return MatchOutcome {
                    matches: Vec::new(),
                    degradation: Some(e.into()),
                };
            }
        };

        let floor = self.config.confidence_floor;
        let matches = greedy_assign(&matrix, floor);

        if matches.is_empty() {
            let best = best_score(&matrix).unwrap_or(0.0);
            info!(
                "No question/region pair above confidence floor {:.2} (best score {:.3})",
                floor, best
            );
            degradation.get_or_insert(RegionError::QualityFloorMiss { best, floor });
        } else {
            info!(
                "Matched {}/{} questions to regions (floor {:.2})",
                matches.len(),
                questions.len(),
                floor
            );
        }

        MatchOutcome {
            matches,
            degradation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};
    use visual_region_common::{BBox, RegionKind};
    use visual_region_embeddings::LexicalEmbedder;

    /// Fails with `error` once `fail_on_call` batches have succeeded
    struct FlakyEmbedder {
        calls: usize,
        fail_on_call: usize,
        error: EmbedError,
    }

    impl Embedder for FlakyEmbedder {
        fn name(&self) -> &str {
            "flaky"
        }

        fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            self.calls += 1;
            if self.calls > self.fail_on_call {
                return Err(self.error.clone());
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("text {i}")).collect()
    }

    fn region(confidence: f32) -> VisualRegion {
        VisualRegion::new(
            BBox::new(0, 0, 150, 100),
            0,
            RegionKind::Table,
            confidence,
            DynamicImage::ImageRgb8(RgbImage::new(1, 1)),
        )
    }

    #[test]
    fn test_region_batch_size() {
        let config = MatcherConfig::default();
        assert_eq!(config.region_batch_size(5), 16);
        assert_eq!(config.region_batch_size(20), 16);
        assert_eq!(config.region_batch_size(21), 12);
        assert_eq!(config.region_batch_size(40), 12);
        assert_eq!(config.region_batch_size(41), 10);
    }

    #[test]
    fn test_cap_regions_keeps_most_confident() {
        // 200 regions with distinct confidences 0.000 .. 0.995
        let regions: Vec<VisualRegion> = (0..200).map(|i| region(i as f32 / 200.0)).collect();
        let capped = cap_regions(regions, 50);

        assert_eq!(capped.len(), 50);
        let min_kept = capped.iter().map(VisualRegion::confidence).fold(f32::MAX, f32::min);
        assert!((min_kept - 150.0 / 200.0).abs() < 1e-6);
        assert!(capped.windows(2).all(|w| w[0].confidence() >= w[1].confidence()));
    }

    #[test]
    fn test_cap_regions_under_limit_untouched() {
        let regions = vec![region(0.2), region(0.9)];
        let capped = cap_regions(regions, 35);
        assert_eq!(capped[0].confidence(), 0.2);
    }

    #[test]
    fn test_greedy_one_to_one() {
        let matrix = vec![
            vec![0.9, 0.8, 0.1],
            vec![0.95, 0.7, 0.2],
            vec![0.6, 0.6, 0.65],
        ];
        let matches = greedy_assign(&matrix, 0.35);

        assert_eq!(
            matches,
            vec![
                MatchCandidate { question_index: 0, region_index: 0, score: 0.9 },
                MatchCandidate { question_index: 1, region_index: 1, score: 0.7 },
                MatchCandidate { question_index: 2, region_index: 2, score: 0.65 },
            ]
        );
    }

    #[test]
    fn test_greedy_floor_is_absolute() {
        let matrix = vec![vec![0.34, 0.2], vec![0.1, 0.35], vec![0.0, -0.5]];
        assert!(greedy_assign(&matrix, 0.35).is_empty());
    }

    #[test]
    fn test_greedy_ties_take_lowest_region() {
        let matrix = vec![vec![0.5, 0.5, 0.5], vec![0.5, 0.5, 0.5]];
        let matches = greedy_assign(&matrix, 0.35);
        assert_eq!(matches[0].region_index, 0);
        assert_eq!(matches[1].region_index, 1);
    }

    #[test]
    fn test_greedy_more_questions_than_regions() {
        let matrix = vec![vec![0.9], vec![0.8], vec![0.7]];
        let matches = greedy_assign(&matrix, 0.35);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].question_index, 0);
    }

    #[test]
    fn test_similarity_matrix_dimension_mismatch() {
        let result = similarity_matrix(&[vec![1.0, 0.0]], &[vec![1.0, 0.0, 0.0]]);
        assert_eq!(
            result,
            Err(MatchError::DimensionMismatch { question: 2, region: 3 })
        );
    }

    #[test]
    fn test_similarity_matrix_rejects_ragged_rows() {
        let questions = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let regions = vec![vec![1.0, 0.0], vec![0.5, 0.5], vec![1.0, 0.0, 0.0]];
        assert_eq!(
            similarity_matrix(&questions, &regions),
            Err(MatchError::DimensionMismatch {
                question: 2,
                region: 3
            })
        );

        let ragged_questions = vec![vec![1.0, 0.0], vec![1.0]];
        assert_eq!(
            similarity_matrix(&ragged_questions, &[vec![1.0, 0.0]]),
            Err(MatchError::DimensionMismatch {
                question: 1,
                region: 2
            })
        );
    }

    #[test]
    fn test_first_batch_failure_yields_nothing() {
        let mut embedder = FlakyEmbedder {
            calls: 0,
            fail_on_call: 0,
            error: EmbedError::ResourceExhausted("oom".to_string()),
        };
        let result = embed_in_batches(&mut embedder, &texts(30), 10, &CancellationToken::new());
        assert!(result.vectors.is_empty());
        assert_eq!(
            result.interruption,
            Some(RegionError::ResourceExhausted("oom".to_string()))
        );
    }

    #[test]
    fn test_later_batch_failure_keeps_partial() {
        let mut embedder = FlakyEmbedder {
            calls: 0,
            fail_on_call: 2,
            error: EmbedError::ResourceExhausted("oom".to_string()),
        };
        let result = embed_in_batches(&mut embedder, &texts(30), 10, &CancellationToken::new());
        assert_eq!(result.vectors.len(), 20);
        assert!(matches!(result.interruption, Some(RegionError::ResourceExhausted(_))));
    }

    #[test]
    fn test_embed_in_batches_cancelled() {
        let mut embedder = LexicalEmbedder::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = embed_in_batches(&mut embedder, &texts(5), 2, &cancel);
        assert!(result.vectors.is_empty());
        assert_eq!(result.interruption, Some(RegionError::Cancelled));
    }

    fn lexical_matcher() -> SemanticMatcher {
        SemanticMatcher::new(MatcherConfig::default(), Box::new(LexicalEmbedder::default()))
    }

    #[test]
    fn test_match_descriptions_shared_vocabulary() {
        let mut matcher = lexical_matcher();
        let questions = vec![
            "What is the ATP yield of the Krebs cycle?".to_string(),
            "Which European capital had the largest population in 1900?".to_string(),
        ];
        let descriptions = vec![
            "Population by capital city 1900 London Paris Berlin".to_string(),
            "Krebs cycle ATP yield per glucose molecule".to_string(),
        ];

        let outcome =
            matcher.match_descriptions(&questions, &descriptions, &CancellationToken::new());
        assert!(outcome.degradation.is_none());
        assert_eq!(outcome.matches.len(), 2);
        assert_eq!(outcome.matches[0].question_index, 0);
        assert_eq!(outcome.matches[0].region_index, 1);
        assert_eq!(outcome.matches[1].region_index, 0);
        assert!(outcome.matches.iter().all(|m| m.score > 0.35));
    }

    #[test]
    fn test_match_descriptions_is_deterministic() {
        let questions = texts(12);
        let descriptions: Vec<String> = (0..9).map(|i| format!("text {} table", i * 2)).collect();

        let run = || {
            let mut matcher = lexical_matcher();
            matcher.match_descriptions(&questions, &descriptions, &CancellationToken::new())
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_floor_miss_reported() {
        let mut matcher = lexical_matcher();
        let outcome = matcher.match_descriptions(
            &["Photosynthesis light reactions".to_string()],
            &["table visual element on page 1".to_string()],
            &CancellationToken::new(),
        );
        assert!(outcome.matches.is_empty());
        assert!(matches!(
            outcome.degradation,
            Some(RegionError::QualityFloorMiss { floor, .. }) if (floor - 0.35).abs() < 1e-6
        ));
    }

    #[test]
    fn test_backend_failure_returns_empty() {
        let embedder = FlakyEmbedder {
            calls: 0,
            fail_on_call: 0,
            error: EmbedError::Unavailable("model missing".to_string()),
        };
        let mut matcher = SemanticMatcher::new(MatcherConfig::default(), Box::new(embedder));
        let outcome = matcher.match_descriptions(&texts(3), &texts(3), &CancellationToken::new());
        assert!(outcome.matches.is_empty());
        assert!(matches!(
            outcome.degradation,
            Some(RegionError::CollaboratorUnavailable(_))
        ));
    }
}
