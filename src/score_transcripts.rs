/*
cargo run --release --bin score_transcripts -- \
    --model-name "USD-guiji/deepseek-r1" \
    --api-config configs/api_config.json \
    --agent-output-root ./agent_outputs \
    --rubric-dir ./Rubric_outputs \
    --output-root ./scores \
    --max-budget 20 \
    --concurrency 4
*/

use anyhow::{Context, Result};
use clap::Parser;
use std::{path::PathBuf, sync::Arc, time::Duration};

use g_cras_score::{
    config::load_api_config,
    cost::{rate_for_config, CostManager},
    driver::{Driver, DriverConfig},
    judge::{ChatClient, GenParams},
    logging::{init_file_logger, CostLog, FinalReport},
    rubric::RubricStore,
    scorer::{ScoreParams, Scorer},
};

#[derive(Parser, Debug)]
#[command(version, about = "Score multi-agent transcripts for role adherence with an LLM judge")]
struct Cli {
    // key into the API config
    #[arg(long, default_value = "USD-guiji/deepseek-r1")]
    model_name: String,

    #[arg(long, default_value = "./configs/api_config.json")]
    api_config: PathBuf,

    // <root>/<dataset>/<model>/<run>/<query_id>.json
    #[arg(long, default_value = "./agent_outputs")]
    agent_output_root: PathBuf,

    #[arg(long, default_value = "./Rubric_outputs")]
    rubric_dir: PathBuf,

    #[arg(long, default_value = "./scores")]
    output_root: PathBuf,

    #[arg(long, default_value_t = 0.3)]
    temperature: f32,

    #[arg(long, default_value_t = 10240)]
    max_tokens: u32,

    // USD; the run halts once the estimated spend goes above it
    #[arg(long, default_value_t = 20.0)]
    max_budget: f64,

    // parallel judge calls per query
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    concurrency: u16,

    #[arg(long, default_value_t = 3)]
    max_attempts: u8,

    #[arg(long, default_value_t = 120)]
    timeout_secs: u64,

    #[arg(long, default_value = "logs/scoring_run.log")]
    cost_log: PathBuf,

    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_path = init_file_logger(&cli.log_dir, "score_transcripts").context("failed to set up logging")?;
    log::info!("Program started: {cli:?}");

    let model_cfg = load_api_config(&cli.api_config, &cli.model_name)
        .with_context(|| format!("failed to load model '{}'", cli.model_name))?;
    let rate = rate_for_config(&model_cfg);
    log::info!(
        "judge {} at {} (${}/1K prompt, ${}/1K completion)",
        model_cfg.model_name,
        model_cfg.model_url,
        rate.prompt_per_1k,
        rate.completion_per_1k
    );

    let cost = Arc::new(CostManager::new(cli.max_budget).with_rate(model_cfg.model_name.clone(), rate));
    let cost_log = match CostLog::open(&cli.cost_log) {
        Ok(l) => Some(l),
        Err(e) => {
            log::warn!("cost log unavailable: {e}");
            None
        }
    };
    let report = FinalReport::new(cost.clone(), cost_log);

    let judge = ChatClient::new(&model_cfg, Duration::from_secs(cli.timeout_secs))
        .context("failed to build judge client")?;
    let scorer = Scorer::new(
        Arc::new(judge),
        Arc::new(RubricStore::new(&cli.rubric_dir)),
        cost.clone(),
        ScoreParams {
            gen: GenParams {
                temperature: cli.temperature,
                max_tokens: cli.max_tokens,
            },
            max_attempts: cli.max_attempts,
            ..ScoreParams::default()
        },
    );
    let driver = Driver::new(
        Arc::new(scorer),
        DriverConfig {
            input_root: cli.agent_output_root.clone(),
            output_root: cli.output_root.clone(),
            concurrency: usize::from(cli.concurrency),
        },
    );

    println!("Scoring {} with {}", cli.agent_output_root.display(), model_cfg.model_name);
    println!("  - Budget: ${:.2}, concurrency: {}", cli.max_budget, cli.concurrency);
    println!("  - Log file: {}", log_path.display());

    match driver.run().await {
        Ok(summary) => {
            println!(
                "\nDone: {} transcripts in {} runs, {} new scores ({} raw, {} API errors), \
                 {} already complete, {} unreadable",
                summary.transcripts,
                summary.run_dirs,
                summary.scored,
                summary.raw_text,
                summary.api_errors,
                summary.fully_scored,
                summary.unreadable
            );
            drop(report);
            Ok(())
        }
        Err(e) if e.is_budget_exceeded() => {
            log::error!("halting: {e}");
            drop(report);
            std::process::exit(1);
        }
        Err(e) => Err(e).context("scoring run failed"),
    }
}
