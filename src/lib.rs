//! Flashcard visuals
//!
//! Finds tables, graphs and diagrams in study documents and pairs each
//! flashcard question with the region that illustrates it, or with nothing
//! when no region is similar enough.
//!
//! This crate re-exports the pipeline; the building blocks live in the
//! `visual-region-*` workspace crates.

pub use visual_region_common::{
    BBox, CancellationToken, DocumentKind, MatchCandidate, RegionError, RegionKind, RegionMatch,
    RegionSummary, VisualRegion,
};
pub use visual_region_pipeline::{
    collaborators, ConfigError, PipelineConfig, PipelineReport, VisualRegionPipeline,
};

/// Match `questions` against a document using the default collaborators
/// for this build.
///
/// Returns an empty list when the document has no usable regions or any
/// collaborator fails.
pub fn match_questions(
    path: &std::path::Path,
    mime_type: Option<&str>,
    questions: &[String],
    config: PipelineConfig,
) -> Vec<RegionMatch> {
    VisualRegionPipeline::from_config(config).process_document(path, mime_type, questions)
}
