//! Run a configured pipeline on a fixed question and print the report.
//!
//! ```text
//! cargo run --example pipeline_demo -- config/pipeline.mock.json
//! RUST_LOG=prompt_pipeline=debug cargo run --example pipeline_demo -- config/pipeline.example.json
//! ```

use anyhow::Context;
use prompt_pipeline::{Pipeline, PipelineConfig, StageData};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "config/pipeline.mock.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("prompt_pipeline=info")),
        )
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = PipelineConfig::from_path(&path)
        .with_context(|| format!("loading pipeline config from {}", path))?;
    let pipeline = Pipeline::from_config(config)?;

    let result = pipeline
        .execute(StageData::from_text("what is your favorite food"))
        .await?;

    println!("success: {} ({:?})", result.success, result.status);
    println!("execution report:");
    for entry in &result.execution_report {
        println!("  stage_id: {}", entry.stage_id);
        println!("  prompt: {}", entry.prompt);
        println!("  raw_reply: {}", entry.raw_reply);
        println!("  processed_output: {}", serde_json::to_string(&entry.processed_output)?);
        println!("  success: {}", entry.success);
        if let Some(error) = &entry.error {
            println!("  error: {}", error);
        }
        println!("  tokens: {}", entry.tokens.total());
        println!();
    }
    println!("final output: {}", result.final_output.text());
    Ok(())
}
