pub mod describe;
pub mod detect;
pub mod matching;

use anyhow::{Context as _, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use tracing::info;
use visual_region_pipeline::PipelineConfig;

/// Options shared by every subcommand
#[derive(Args)]
pub struct PipelineArgs {
    /// Pipeline configuration file (YAML)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// MIME type of the document (overrides the file extension)
    #[arg(long)]
    pub mime: Option<String>,

    /// Minimum similarity a match must exceed
    #[arg(long)]
    pub floor: Option<f32>,

    /// Maximum number of regions considered per document
    #[arg(long)]
    pub max_regions: Option<usize>,

    /// Disable the pipeline entirely
    #[arg(long)]
    pub disable: bool,
}

impl PipelineArgs {
    /// Configuration file (or defaults) with command-line overrides applied
    pub fn load_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                PipelineConfig::from_yaml_file(path)
                    .with_context(|| format!("Failed to load config {}", path.display()))?
            }
            None => PipelineConfig::default(),
        };

        if let Some(floor) = self.floor {
            config.matcher.confidence_floor = floor;
        }
        if let Some(max_regions) = self.max_regions {
            config.matcher.max_regions = max_regions;
        }
        if self.disable {
            config.enabled = false;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

/// Fail early on a missing input instead of reporting an empty result
pub fn ensure_input_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("Input file does not exist: {}", path.display());
    }
    Ok(())
}
