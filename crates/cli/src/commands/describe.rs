//! `describe` command

use super::{ensure_input_exists, PipelineArgs};
use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};
use visual_region_common::{CancellationToken, RegionSummary};
use visual_region_matcher::cap_regions;
use visual_region_pipeline::VisualRegionPipeline;

#[derive(Args)]
pub struct DescribeCommand {
    /// Input document (PDF or Word)
    #[arg(value_name = "FILE")]
    input: PathBuf,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[derive(Serialize)]
struct DescribedRegion {
    region: RegionSummary,
    description: String,
}

impl DescribeCommand {
    pub fn execute(self) -> Result<()> {
        ensure_input_exists(&self.input)?;
        let config = self.pipeline.load_config()?;
        if !config.enabled {
            info!("Visual region pipeline disabled");
            println!("[]");
            return Ok(());
        }

        let max_regions = config.matcher.max_regions;
        let pipeline = VisualRegionPipeline::from_config(config);
        let cancel = CancellationToken::new();

        let mime = self.pipeline.mime.as_deref();
        let detection = pipeline.detect_regions(&self.input, mime, &cancel);
        if let Some(reason) = &detection.degradation {
            warn!("Detection degraded: {}", reason);
        }

        // Only the regions the matcher would see are worth describing
        let regions = cap_regions(detection.regions, max_regions);
        let (descriptions, degradation) = pipeline.describe_regions(&regions, &cancel);
        if let Some(reason) = degradation {
            warn!("Description degraded: {}", reason);
        }

        let described: Vec<DescribedRegion> = regions
            .iter()
            .zip(descriptions)
            .map(|(region, description)| DescribedRegion {
                region: region.summary(),
                description,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&described)?);
        Ok(())
    }
}
