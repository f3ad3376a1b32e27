//! Default collaborator selection
//!
//! Picks the best backend compiled into this build and available on this
//! machine, falling back to the always-available ones.

use tracing::{info, warn};
use visual_region_detector::PageRenderer;
use visual_region_embeddings::{Embedder, EmbeddingConfig, LexicalEmbedder};
use visual_region_ocr::{DescriberConfig, NoopOcr, OcrBackend};

/// pdfium renderer when the `pdf` feature is on and the library can be bound
#[must_use]
pub fn default_renderer() -> Option<Box<dyn PageRenderer>> {
    #[cfg(feature = "pdf")]
    {
        match visual_region_detector::PdfiumRenderer::new() {
            Ok(renderer) => return Some(Box::new(renderer)),
            Err(e) => warn!("PDF rendering disabled: {}", e),
        }
    }
    #[cfg(not(feature = "pdf"))]
    warn!("Built without the `pdf` feature; PDF documents yield no regions");

    None
}

/// Tesseract when compiled in and initialisable, otherwise [`NoopOcr`]
#[must_use]
pub fn default_ocr(config: &DescriberConfig) -> Box<dyn OcrBackend> {
    #[cfg(feature = "tesseract")]
    {
        match visual_region_ocr::TesseractOcr::new(&config.language) {
            Ok(ocr) => return Box::new(ocr),
            Err(e) => warn!("Tesseract unavailable, regions get synthetic descriptions: {}", e),
        }
    }
    #[cfg(not(feature = "tesseract"))]
    info!(
        "Built without the `tesseract` feature; regions get synthetic descriptions \
         (language {} ignored)",
        config.language
    );

    Box::new(NoopOcr)
}

/// ONNX sentence embedder when compiled in and a model is configured,
/// otherwise the lexical embedder
#[must_use]
pub fn default_embedder(config: &EmbeddingConfig) -> Box<dyn Embedder> {
    #[cfg(feature = "onnx")]
    {
        if config.model_path.is_some() {
            match visual_region_embeddings::OnnxTextEmbedder::new(config.clone()) {
                Ok(embedder) => return Box::new(embedder),
                Err(e) => warn!("Falling back to lexical embeddings: {}", e),
            }
        }
    }
    #[cfg(not(feature = "onnx"))]
    {
        if config.model_path.is_some() {
            warn!("Built without the `onnx` feature; ignoring model {}", config.model);
        }
    }

    info!("Using lexical embeddings ({} dimensions)", config.lexical_dimension);
    Box::new(LexicalEmbedder::new(config.lexical_dimension))
}
