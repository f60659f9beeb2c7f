/*
cargo run --release --bin generate_rubrics -- \
    --model-name ds \
    --model-api-config configs/api_config.json \
    --role Logician --role Physicist --role Critic
*/

use anyhow::{Context, Result};
use clap::Parser;
use std::{path::PathBuf, time::Duration};

use g_cras_score::{
    config::load_api_config,
    judge::{ChatClient, GenParams},
    logging::init_file_logger,
    rubric_gen::generate_rubrics,
};

#[derive(Parser, Debug)]
#[command(version, about = "Rubric generator for role-adherence scoring")]
struct Cli {
    #[arg(long, default_value = "ds")]
    model_name: String,

    #[arg(long, default_value = "configs/api_config.json")]
    model_api_config: PathBuf,

    #[arg(long, default_value_t = 0.3)]
    model_temperature: f32,

    #[arg(long, default_value_t = 3054)]
    model_max_tokens: u32,

    // seconds
    #[arg(long, default_value_t = 1000)]
    model_timeout: u64,

    #[arg(long, default_value = "Rubric_outputs")]
    output_dir: PathBuf,

    #[arg(long = "role", default_values = ["Logician", "Physicist"])]
    roles: Vec<String>,

    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_file_logger(&cli.log_dir, "generate_rubrics").context("failed to set up logging")?;
    log::info!("Program started: {cli:?}");

    let model_cfg = load_api_config(&cli.model_api_config, &cli.model_name)
        .with_context(|| format!("failed to load model '{}'", cli.model_name))?;
    let judge = ChatClient::new(&model_cfg, Duration::from_secs(cli.model_timeout))
        .context("failed to build judge client")?;

    let params = GenParams {
        temperature: cli.model_temperature,
        max_tokens: cli.model_max_tokens,
    };
    let report = generate_rubrics(&judge, &cli.roles, &cli.output_dir, params)
        .await
        .with_context(|| format!("failed writing rubrics to {}", cli.output_dir.display()))?;

    log::info!(
        "{} rubric files written, {} raw fallbacks, {} failed roles",
        report.written.len(),
        report.raw_fallbacks.len(),
        report.failed.len()
    );
    if !report.failed.is_empty() {
        println!("[!] No rubric generated for: {}", report.failed.join(", "));
    }
    Ok(())
}
