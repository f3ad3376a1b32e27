//! visual-regions - find and match illustrations in study documents
//!
//! Command-line interface for the visual region pipeline.

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod commands;

use commands::describe::DescribeCommand;
use commands::detect::DetectCommand;
use commands::matching::MatchCommand;

#[derive(Parser)]
#[command(
    name = "visual-regions",
    version,
    about = "Detect tables, graphs and diagrams in documents and match them to flashcard questions",
    long_about = "Find visual regions (tables, graphs, diagrams) in PDF and Word documents,\n\
                  describe them with OCR, and pair each flashcard question with the region\n\
                  that illustrates it best. Questions without a sufficiently similar region\n\
                  stay unmatched.",
    after_help = "EXAMPLES:\n  \
                  # List detected regions and save their crops\n  \
                  visual-regions detect lecture.pdf --save-crops ./crops\n\n  \
                  # Show the text each region is matched on\n  \
                  visual-regions describe notes.docx\n\n  \
                  # Match questions and store the illustrating crops\n  \
                  visual-regions match lecture.pdf -q cards.json --output-dir ./matched\n  \
                  visual-regions match lecture.pdf -q cards.json --floor 0.4 --max-regions 60\n\n\
                  For more details on a specific command:\n  \
                  visual-regions <COMMAND> --help"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect visual regions and print them as JSON
    Detect(DetectCommand),

    /// Detect and describe regions, printing the text used for matching
    Describe(DescribeCommand),

    /// Match flashcard questions to regions
    Match(MatchCommand),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let builder = FmtSubscriber::builder()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    // RUST_LOG wins over --verbose when set
    match EnvFilter::try_from_default_env() {
        Ok(filter) => {
            tracing::subscriber::set_global_default(builder.with_env_filter(filter).finish())
        }
        Err(_) => {
            tracing::subscriber::set_global_default(builder.with_max_level(log_level).finish())
        }
    }
    .context("Failed to set tracing subscriber")?;

    match cli.command {
        Commands::Detect(cmd) => cmd.execute(),
        Commands::Describe(cmd) => cmd.execute(),
        Commands::Match(cmd) => cmd.execute(),
    }
}
