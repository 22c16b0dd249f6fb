//! `mcpmark` — evaluate LLM agents against stateful MCP tasks.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use mark_agent::LoopVariant;
use mark_domain::ServiceKind;
use mark_harness::{aggregate, Evaluator, EvaluatorOptions};

#[derive(Parser)]
#[command(name = "mcpmark", about = "Benchmark LLM agents on stateful MCP tasks", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AgentVariant {
    /// Provider-native function calling.
    Direct,
    /// Strict-JSON ReAct protocol.
    React,
}

#[derive(Subcommand)]
enum Command {
    /// Run an evaluation for one model on one service.
    Eval {
        /// Short model name from the catalog (e.g. gpt-4o, claude-sonnet-4).
        #[arg(long)]
        model: String,

        /// Service to evaluate (filesystem, postgres, supabase, insforge,
        /// notion, github, playwright, playwright_webarena).
        #[arg(long)]
        service: String,

        /// Task filter: "all", "<category>", or "<category>/<task>".
        #[arg(long, default_value = "all")]
        tasks: String,

        /// Per-task wall clock in seconds.
        #[arg(long, default_value_t = 300)]
        timeout: u64,

        /// Experiment name (results subdirectory).
        #[arg(long, default_value = "test-run")]
        exp_name: String,

        /// Root directory for results.
        #[arg(long, default_value = "./results")]
        output_dir: PathBuf,

        /// Reasoning effort forwarded to the provider.
        #[arg(long, default_value = "default")]
        reasoning_effort: String,

        /// Agent loop variant.
        #[arg(long, value_enum, default_value_t = AgentVariant::Direct)]
        agent: AgentVariant,

        /// Root directory holding tasks/<service>/.
        #[arg(long, default_value = "./tasks")]
        tasks_root: PathBuf,
    },

    /// Aggregate k runs of a result directory into a summary.
    Aggregate {
        /// Result directory (e.g. results/exp/model__service).
        #[arg(long)]
        result_dir: PathBuf,

        /// Number of runs to aggregate.
        #[arg(long, default_value_t = 4)]
        k: u32,

        /// Output file (defaults to <result-dir>/summary.json).
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Eval {
            model,
            service,
            tasks,
            timeout,
            exp_name,
            output_dir,
            reasoning_effort,
            agent,
            tasks_root,
        } => {
            let service = ServiceKind::parse(&service)
                .with_context(|| format!("unknown service '{service}'"))?;
            let options = EvaluatorOptions {
                model,
                service,
                timeout: Duration::from_secs(timeout),
                exp_name,
                output_dir,
                reasoning_effort,
                loop_variant: match agent {
                    AgentVariant::Direct => LoopVariant::Direct,
                    AgentVariant::React => LoopVariant::React,
                },
                tasks_root,
            };

            let mut evaluator = Evaluator::new(options)
                .await
                .context("failed to initialize evaluator")?;
            let report = evaluator.run(&tasks).await.context("evaluation failed")?;

            println!(
                "Tasks passed: {}/{} ({:.1}%)",
                report.successful_tasks,
                report.total_tasks,
                report.success_rate()
            );
        }

        Command::Aggregate {
            result_dir,
            k,
            output,
        } => {
            let summary = aggregate::aggregate(&result_dir, k).context("aggregation failed")?;
            let output_path = output.unwrap_or_else(|| result_dir.join("summary.json"));
            std::fs::write(&output_path, serde_json::to_string_pretty(&summary)?)
                .with_context(|| format!("cannot write {}", output_path.display()))?;

            println!("Summary saved to {}", output_path.display());
            if let Some(pass1) = summary.pointer("/pass@1/avg").and_then(|v| v.as_f64()) {
                let std = summary
                    .pointer("/pass@1/std")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0);
                println!("Pass@1: {:.1}% ± {:.1}%", pass1 * 100.0, std * 100.0);
            }
        }
    }

    Ok(())
}
