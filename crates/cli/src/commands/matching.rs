//! `match` command

use super::{ensure_input_exists, PipelineArgs};
use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use visual_region_cli::{load_questions, CropStore, DirectoryCropStore};
use visual_region_common::{CancellationToken, RegionError, RegionSummary};
use visual_region_pipeline::VisualRegionPipeline;

#[derive(Args)]
pub struct MatchCommand {
    /// Input document (PDF or Word)
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// JSON array of questions (strings or {"question": ...} objects)
    #[arg(short, long, value_name = "FILE")]
    questions: PathBuf,

    #[command(flatten)]
    pipeline: PipelineArgs,

    /// Store matched crops and matches.json in this directory
    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Sentence-Transformers ONNX model (requires the `onnx` feature)
    #[arg(long, value_name = "FILE")]
    model: Option<PathBuf>,

    /// tokenizer.json for the ONNX model (defaults to the model's directory)
    #[arg(long, value_name = "FILE")]
    tokenizer: Option<PathBuf>,

    /// Give up after this many seconds
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Serialize)]
struct MatchOutput {
    question_index: usize,
    score: f32,
    region: RegionSummary,
}

#[derive(Serialize)]
struct Report {
    regions_detected: usize,
    regions_considered: usize,
    degradation: Option<String>,
    matches: Vec<MatchOutput>,
}

impl MatchCommand {
    pub fn execute(self) -> Result<()> {
        ensure_input_exists(&self.input)?;
        let questions = load_questions(&self.questions)?;
        info!("Loaded {} questions from {}", questions.len(), self.questions.display());

        let mut config = self.pipeline.load_config()?;
        if self.model.is_some() {
            config.embedding.model_path.clone_from(&self.model);
        }
        if self.tokenizer.is_some() {
            config.embedding.tokenizer_path.clone_from(&self.tokenizer);
        }

        let cancel = match self.timeout {
            Some(seconds) => CancellationToken::with_timeout(Duration::from_secs(seconds)),
            None => CancellationToken::new(),
        };

        let mut pipeline = VisualRegionPipeline::from_config(config);
        let report = pipeline.process_document_report(
            &self.input,
            self.pipeline.mime.as_deref(),
            &questions,
            &cancel,
        );

        match &report.degradation {
            Some(reason @ RegionError::QualityFloorMiss { .. }) => info!("{}", reason),
            Some(reason) => warn!("Matching degraded: {}", reason),
            None => {}
        }

        if let Some(dir) = &self.output_dir {
            let mut store = DirectoryCropStore::new(dir)?;
            for region_match in &report.matches {
                let question = questions
                    .get(region_match.question_index)
                    .map_or("", String::as_str);
                store.store(region_match, question)?;
            }
            store.finish()?;
        }

        let output = Report {
            regions_detected: report.regions_detected,
            regions_considered: report.regions_considered,
            degradation: report.degradation.as_ref().map(ToString::to_string),
            matches: report
                .matches
                .iter()
                .map(|m| MatchOutput {
                    question_index: m.question_index,
                    score: m.score,
                    region: m.region.summary(),
                })
                .collect(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        Ok(())
    }
}
