//! Visual region pipeline
//!
//! Orchestrates detection, capacity capping, description and matching for
//! one document and one ordered list of flashcard questions.
//!
//! The public entry points never fail and never panic outward: every
//! collaborator problem degrades to "no region" or "no match" for the unit of
//! work it affected. [`VisualRegionPipeline::process_document_report`] also
//! says which degradation occurred.
//!
//! # Example
//! ```no_run
//! use visual_region_pipeline::{PipelineConfig, VisualRegionPipeline};
//! use std::path::Path;
//!
//! let mut pipeline = VisualRegionPipeline::from_config(PipelineConfig::default());
//! let questions = vec!["What does the Krebs cycle yield?".to_string()];
//! for m in pipeline.process_document(Path::new("lecture.pdf"), None, &questions) {
//!     let page = m.region.page_index() + 1;
//!     println!("question {} -> page {} ({:.2})", m.question_index, page, m.score);
//! }
//! ```

pub mod collaborators;
pub mod config;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use tracing::{debug, error, info};
use visual_region_common::{
    panic_message, CancellationToken, DocumentKind, RegionError, RegionMatch, VisualRegion,
};
use visual_region_detector::{Detection, PageRenderer, RegionDetector};
use visual_region_embeddings::Embedder;
use visual_region_matcher::SemanticMatcher;
use visual_region_ocr::{OcrBackend, RegionTextDescriber};

pub use config::{ConfigError, PipelineConfig};

/// Outcome of one pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    /// Accepted matches, in question order
    pub matches: Vec<RegionMatch>,
    /// Regions found by the detector
    pub regions_detected: usize,
    /// Regions left after the capacity cap
    pub regions_considered: usize,
    /// The first degradation that affected this run, if any
    pub degradation: Option<RegionError>,
}

impl PipelineReport {
    fn degraded(err: RegionError) -> Self {
        Self {
            degradation: Some(err),
            ..Default::default()
        }
    }
}

/// Detection, description and matching for one document at a time
pub struct VisualRegionPipeline {
    config: PipelineConfig,
    detector: RegionDetector,
    describer: RegionTextDescriber,
    matcher: SemanticMatcher,
}

impl VisualRegionPipeline {
    /// Assemble a pipeline from explicit collaborators
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        renderer: Option<Box<dyn PageRenderer>>,
        ocr: Box<dyn OcrBackend>,
        embedder: Box<dyn Embedder>,
    ) -> Self {
        let detector = RegionDetector::new(config.detector.clone(), renderer);
        let describer = RegionTextDescriber::new(config.describer.clone(), ocr);
        let matcher = SemanticMatcher::new(config.matcher.clone(), embedder);
        Self {
            config,
            detector,
            describer,
            matcher,
        }
    }

    /// Assemble a pipeline with the default collaborators for this build
    #[must_use]
    pub fn from_config(config: PipelineConfig) -> Self {
        let renderer = collaborators::default_renderer();
        let ocr = collaborators::default_ocr(&config.describer);
        let embedder = collaborators::default_embedder(&config.embedding);
        Self::new(config, renderer, ocr, embedder)
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Match `questions` against the visual regions of one document.
    ///
    /// Returns an empty list for unsupported documents, documents without
    /// usable regions, and whenever a collaborator fails.
    pub fn process_document(
        &mut self,
        path: &Path,
        mime_type: Option<&str>,
        questions: &[String],
    ) -> Vec<RegionMatch> {
        self.process_document_report(path, mime_type, questions, &CancellationToken::new())
            .matches
    }

    /// Like [`Self::process_document`], also reporting what degraded
    pub fn process_document_report(
        &mut self,
        path: &Path,
        mime_type: Option<&str>,
        questions: &[String],
        cancel: &CancellationToken,
    ) -> PipelineReport {
        if !self.config.enabled {
            info!("Visual region pipeline disabled, skipping {}", path.display());
            return PipelineReport::default();
        }

        let result = catch_unwind(AssertUnwindSafe(|| {
            self.run(path, mime_type, questions, cancel)
        }));

        match result {
            Ok(report) => report,
            Err(payload) => {
                error!(
                    "Visual region pipeline panicked on {}: {}",
                    path.display(),
                    panic_message(&*payload)
                );
                PipelineReport::degraded(RegionError::CollaboratorUnavailable(
                    "region pipeline panicked".to_string(),
                ))
            }
        }
    }

    /// Run detection only
    pub fn detect_regions(
        &self,
        path: &Path,
        mime_type: Option<&str>,
        cancel: &CancellationToken,
    ) -> Detection {
        self.detect_kind(path, DocumentKind::detect(path, mime_type), cancel)
    }

    /// Describe regions in order; see [`RegionTextDescriber::describe_all`]
    pub fn describe_regions(
        &self,
        regions: &[VisualRegion],
        cancel: &CancellationToken,
    ) -> (Vec<String>, Option<RegionError>) {
        catch_unwind(AssertUnwindSafe(|| self.describer.describe_all(regions, cancel)))
            .unwrap_or_else(|payload| {
                error!("Region description panicked: {}", panic_message(&*payload));
                (
                    Vec::new(),
                    Some(RegionError::CollaboratorUnavailable(
                        "region description panicked".to_string(),
                    )),
                )
            })
    }

    fn detect_kind(
        &self,
        path: &Path,
        kind: DocumentKind,
        cancel: &CancellationToken,
    ) -> Detection {
        catch_unwind(AssertUnwindSafe(|| self.detector.detect(path, kind, cancel))).unwrap_or_else(
            |payload| {
                error!(
                    "Region detection panicked on {}: {}",
                    path.display(),
                    panic_message(&*payload)
                );
                Detection {
                    regions: Vec::new(),
                    degradation: Some(RegionError::CollaboratorUnavailable(
                        "region detection panicked".to_string(),
                    )),
                }
            },
        )
    }

    fn run(
        &mut self,
        path: &Path,
        mime_type: Option<&str>,
        questions: &[String],
        cancel: &CancellationToken,
    ) -> PipelineReport {
        let kind = DocumentKind::detect(path, mime_type);
        if kind == DocumentKind::Unsupported {
            info!("Skipping visual regions for unsupported document {}", path.display());
            return PipelineReport::degraded(RegionError::UnsupportedInput(
                path.display().to_string(),
            ));
        }

        let detection = self.detect_kind(path, kind, cancel);
        let regions_detected = detection.regions.len();
        if regions_detected == 0 {
            info!("No visual regions detected in {}", path.display());
            return PipelineReport {
                degradation: detection.degradation,
                ..Default::default()
            };
        }

        let regions = self.matcher.select_regions(detection.regions);
        let regions_considered = regions.len();
        let mut report = PipelineReport {
            matches: Vec::new(),
            regions_detected,
            regions_considered,
            degradation: detection.degradation,
        };

        if questions.is_empty() {
            debug!("No questions to match against {} regions", regions_considered);
            return report;
        }

        let (descriptions, described_with) = self.describe_regions(&regions, cancel);
        report.degradation = report.degradation.or(described_with);
        if descriptions.len() < regions.len() {
            return report;
        }

        let outcome = self.matcher.match_descriptions(questions, &descriptions, cancel);
        if report.degradation.is_none() {
            report.degradation = outcome.degradation;
        }
        if outcome.matches.is_empty() {
            return report;
        }

        let mut slots: Vec<Option<VisualRegion>> = regions.into_iter().map(Some).collect();
        report.matches = outcome
            .matches
            .into_iter()
            .filter_map(|candidate| {
                slots
                    .get_mut(candidate.region_index)
                    .and_then(Option::take)
                    .map(|region| RegionMatch {
                        question_index: candidate.question_index,
                        region,
                        score: candidate.score,
                    })
            })
            .collect();

        info!(
            "Matched {} of {} questions to visual regions in {}",
            report.matches.len(),
            questions.len(),
            path.display()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage};
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;
    use visual_region_detector::{RenderError, RenderedPage};
    use visual_region_embeddings::{EmbedError, LexicalEmbedder};
    use visual_region_ocr::{LayoutMode, NoopOcr, OcrError};

    /// One two-tone chart block per page; pages in `panicking` crash the renderer
    struct ChartRenderer {
        pages: usize,
        panicking: Vec<usize>,
    }

    impl ChartRenderer {
        fn single() -> Self {
            Self {
                pages: 1,
                panicking: Vec::new(),
            }
        }
    }

    impl PageRenderer for ChartRenderer {
        fn page_count(&self, _path: &Path) -> Result<usize, RenderError> {
            Ok(self.pages)
        }

        fn render_page(
            &self,
            _path: &Path,
            page_index: usize,
            _scale: f32,
        ) -> Result<RenderedPage, RenderError> {
            if self.panicking.contains(&page_index) {
                panic!("pdfium crashed on page {page_index}");
            }
            let mut page = RgbImage::from_pixel(1000, 1400, Rgb([255, 255, 255]));
            let blue = Rgb([40, 40, 160]);
            draw_filled_rect_mut(&mut page, Rect::at(200, 200).of_size(150, 200), blue);
            draw_filled_rect_mut(&mut page, Rect::at(350, 200).of_size(150, 200), Rgb([0, 0, 0]));
            Ok(RenderedPage::from_image(DynamicImage::ImageRgb8(page)))
        }
    }

    struct PanickingOcr;

    impl OcrBackend for PanickingOcr {
        fn extract_text(&self, _image: &RgbImage, _mode: LayoutMode) -> Result<String, OcrError> {
            panic!("native OCR library crashed");
        }
    }

    struct PanickingEmbedder;

    impl Embedder for PanickingEmbedder {
        fn name(&self) -> &str {
            "panicking"
        }

        fn embed(&mut self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            panic!("onnxruntime aborted");
        }
    }

    struct BrokenEmbedder;

    impl Embedder for BrokenEmbedder {
        fn name(&self) -> &str {
            "broken"
        }

        fn embed(&mut self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            Err(EmbedError::ResourceExhausted("allocation failed".to_string()))
        }
    }

    fn questions() -> Vec<String> {
        vec!["diagram visual element".to_string()]
    }

    #[test]
    fn test_disabled_pipeline_does_nothing() {
        let config = PipelineConfig {
            enabled: false,
            ..Default::default()
        };
        let mut pipeline = VisualRegionPipeline::new(
            config,
            Some(Box::new(ChartRenderer::single())),
            Box::new(NoopOcr),
            Box::new(LexicalEmbedder::default()),
        );
        let report = pipeline.process_document_report(
            Path::new("a.pdf"),
            None,
            &questions(),
            &CancellationToken::new(),
        );
        assert!(report.matches.is_empty());
        assert_eq!(report.regions_detected, 0);
        assert!(report.degradation.is_none());
    }

    #[test]
    fn test_unsupported_document() {
        let mut pipeline = VisualRegionPipeline::new(
            PipelineConfig::default(),
            Some(Box::new(ChartRenderer::single())),
            Box::new(NoopOcr),
            Box::new(LexicalEmbedder::default()),
        );
        let report = pipeline.process_document_report(
            Path::new("slides.pptx"),
            None,
            &questions(),
            &CancellationToken::new(),
        );
        assert!(report.matches.is_empty());
        assert!(matches!(report.degradation, Some(RegionError::UnsupportedInput(_))));
    }

    #[test]
    fn test_synthetic_description_can_match() {
        let mut pipeline = VisualRegionPipeline::new(
            PipelineConfig::default(),
            Some(Box::new(ChartRenderer::single())),
            Box::new(NoopOcr),
            Box::new(LexicalEmbedder::default()),
        );
        let matches = pipeline.process_document(Path::new("chart.pdf"), None, &questions());
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].question_index, 0);
        assert_eq!(matches[0].region.page_index(), 0);
    }

    #[test]
    fn test_panicking_ocr_falls_back_to_synthetic_description() {
        let mut pipeline = VisualRegionPipeline::new(
            PipelineConfig::default(),
            Some(Box::new(ChartRenderer::single())),
            Box::new(PanickingOcr),
            Box::new(LexicalEmbedder::default()),
        );
        let report = pipeline.process_document_report(
            Path::new("chart.pdf"),
            None,
            &questions(),
            &CancellationToken::new(),
        );
        assert_eq!(report.matches.len(), 1);
        assert!(matches!(
            report.degradation,
            Some(RegionError::CollaboratorUnavailable(_))
        ));
    }

    #[test]
    fn test_panicking_page_keeps_matches_from_other_pages() {
        let renderer = ChartRenderer {
            pages: 2,
            panicking: vec![1],
        };
        let mut pipeline = VisualRegionPipeline::new(
            PipelineConfig::default(),
            Some(Box::new(renderer)),
            Box::new(NoopOcr),
            Box::new(LexicalEmbedder::default()),
        );
        let report = pipeline.process_document_report(
            Path::new("chart.pdf"),
            None,
            &questions(),
            &CancellationToken::new(),
        );

        assert_eq!(report.regions_detected, 1);
        assert_eq!(report.matches.len(), 1);
        assert_eq!(report.matches[0].region.page_index(), 0);
        assert!(matches!(
            report.degradation,
            Some(RegionError::CollaboratorUnavailable(_))
        ));
    }

    #[test]
    fn test_panic_outside_units_is_contained() {
        let mut pipeline = VisualRegionPipeline::new(
            PipelineConfig::default(),
            Some(Box::new(ChartRenderer::single())),
            Box::new(NoopOcr),
            Box::new(PanickingEmbedder),
        );
        let report = pipeline.process_document_report(
            Path::new("chart.pdf"),
            None,
            &questions(),
            &CancellationToken::new(),
        );
        assert!(report.matches.is_empty());
        assert!(matches!(
            report.degradation,
            Some(RegionError::CollaboratorUnavailable(_))
        ));
    }

    #[test]
    fn test_embedding_exhaustion_reported() {
        let mut pipeline = VisualRegionPipeline::new(
            PipelineConfig::default(),
            Some(Box::new(ChartRenderer::single())),
            Box::new(NoopOcr),
            Box::new(BrokenEmbedder),
        );
        let report = pipeline.process_document_report(
            Path::new("chart.pdf"),
            None,
            &questions(),
            &CancellationToken::new(),
        );
        assert!(report.matches.is_empty());
        assert_eq!(report.regions_detected, 1);
        assert!(matches!(report.degradation, Some(RegionError::ResourceExhausted(_))));
    }

    #[test]
    fn test_cancelled_run_reports_cancellation() {
        let mut pipeline = VisualRegionPipeline::new(
            PipelineConfig::default(),
            Some(Box::new(ChartRenderer::single())),
            Box::new(NoopOcr),
            Box::new(LexicalEmbedder::default()),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report =
            pipeline.process_document_report(Path::new("chart.pdf"), None, &questions(), &cancel);
        assert!(report.matches.is_empty());
        assert_eq!(report.degradation, Some(RegionError::Cancelled));
    }
}
