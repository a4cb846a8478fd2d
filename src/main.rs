use anyhow::Result;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;

mod batch;
mod error;
mod io;
mod labeler;
mod llm;
mod ner;
mod output;
mod pipeline;
mod telemetry;
mod tokenizer;

#[derive(Parser)]
#[command(name = "petroterm", about = "Petroleum-geology term extraction pipeline")]
struct Cli {
    /// Emit a single JSON envelope to stdout; logs go to stderr
    #[arg(global = true, long, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Windowed NER over a paper corpus
    Ner(ner::NerCmd),
    /// Per-paper term extraction with an LLM
    LlmExtract(pipeline::llm_extract::LlmExtractCmd),
    /// Merge term variants by stem and count them
    Consolidate(pipeline::consolidate::ConsolidateCmd),
    /// Correct terms and generate natural language definitions
    Define(pipeline::define::DefineCmd),
    /// Classify defined terms against the ontology categories
    Categorize(pipeline::categorize::CategorizeCmd),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    telemetry::config::set_json_mode(cli.json);

    // logs go to stderr; RUST_LOG and PETROTERM_LOG_FORMAT apply
    telemetry::config::init_tracing();

    match cli.command {
        Commands::Ner(args) => ner::run(args)?,
        Commands::LlmExtract(args) => pipeline::llm_extract::run(args).await?,
        Commands::Consolidate(args) => pipeline::consolidate::run(args)?,
        Commands::Define(args) => pipeline::define::run(args).await?,
        Commands::Categorize(args) => pipeline::categorize::run(args).await?,
    }

    Ok(())
}
