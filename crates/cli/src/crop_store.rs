//! Persistence of matched region crops
//!
//! The pipeline never stores anything itself; the CLI hands each accepted
//! match to a [`CropStore`].

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;
use visual_region_common::{RegionMatch, RegionSummary};

/// One stored match, as written to `matches.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub question_index: usize,
    pub question: String,
    pub score: f32,
    pub region: RegionSummary,
    /// Crop file name relative to the store directory
    pub crop: String,
}

/// Destination for matched crops
pub trait CropStore {
    /// Persist the crop of `region_match`, illustrating `question`
    fn store(&mut self, region_match: &RegionMatch, question: &str) -> Result<MatchRecord>;

    /// Flush any index of stored crops
    fn finish(&mut self) -> Result<()>;
}

/// Writes `q{question:03}_p{page:03}.png` files plus a `matches.json` index
pub struct DirectoryCropStore {
    dir: PathBuf,
    records: Vec<MatchRecord>,
}

impl DirectoryCropStore {
    /// Create the directory if needed
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
        Ok(Self {
            dir,
            records: Vec::new(),
        })
    }

    #[must_use]
    pub fn records(&self) -> &[MatchRecord] {
        &self.records
    }
}

impl CropStore for DirectoryCropStore {
    fn store(&mut self, region_match: &RegionMatch, question: &str) -> Result<MatchRecord> {
        let region = &region_match.region;
        let file_name = format!(
            "q{:03}_p{:03}.png",
            region_match.question_index,
            region.page_index()
        );
        let path = self.dir.join(&file_name);
        region
            .image()
            .save_with_format(&path, image::ImageFormat::Png)
            .with_context(|| format!("Failed to write crop {}", path.display()))?;

        let record = MatchRecord {
            question_index: region_match.question_index,
            question: question.to_string(),
            score: region_match.score,
            region: region.summary(),
            crop: file_name,
        };
        self.records.push(record.clone());
        Ok(record)
    }

    fn finish(&mut self) -> Result<()> {
        let index = self.dir.join("matches.json");
        let json =
            serde_json::to_string_pretty(&self.records).context("Failed to serialize matches")?;
        std::fs::write(&index, json)
            .with_context(|| format!("Failed to write {}", index.display()))?;
        info!("Stored {} crops in {}", self.records.len(), self.dir.display());
        Ok(())
    }
}
