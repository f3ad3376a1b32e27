//! `detect` command

use super::{ensure_input_exists, PipelineArgs};
use anyhow::{Context as _, Result};
use clap::Args;
use std::path::PathBuf;
use tracing::{info, warn};
use visual_region_common::{CancellationToken, RegionSummary};
use visual_region_pipeline::VisualRegionPipeline;

#[derive(Args)]
pub struct DetectCommand {
    /// Input document (PDF or Word)
    #[arg(value_name = "FILE")]
    input: PathBuf,

    #[command(flatten)]
    pipeline: PipelineArgs,

    /// Save every region crop as PNG into this directory
    #[arg(long, value_name = "DIR")]
    save_crops: Option<PathBuf>,
}

impl DetectCommand {
    pub fn execute(self) -> Result<()> {
        ensure_input_exists(&self.input)?;
        let config = self.pipeline.load_config()?;
        if !config.enabled {
            info!("Visual region pipeline disabled");
            println!("[]");
            return Ok(());
        }

        let pipeline = VisualRegionPipeline::from_config(config);
        let detection = pipeline.detect_regions(
            &self.input,
            self.pipeline.mime.as_deref(),
            &CancellationToken::new(),
        );
        if let Some(reason) = &detection.degradation {
            warn!("Detection degraded: {}", reason);
        }
        info!("Detected {} regions in {}", detection.regions.len(), self.input.display());

        if let Some(dir) = &self.save_crops {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
            for (index, region) in detection.regions.iter().enumerate() {
                let path = dir.join(format!("p{:03}_r{:03}.png", region.page_index(), index));
                region
                    .image()
                    .save_with_format(&path, image::ImageFormat::Png)
                    .with_context(|| format!("Failed to write crop {}", path.display()))?;
            }
            info!("Saved {} crops to {}", detection.regions.len(), dir.display());
        }

        let summaries: Vec<RegionSummary> = detection.regions.iter().map(|r| r.summary()).collect();
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        Ok(())
    }
}
