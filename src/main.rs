//! translate-dispatch 命令行
//!
//! 从标准输入逐行读取文本，整体交给编排器翻译，按原顺序逐行输出；
//! 失败的行输出为 `!! <错误>`。Ctrl-C 会中止当前作业。
//!
//! ```bash
//! printf 'Hello\nWorld\n' | translate-dispatch --from en --to de
//! translate-dispatch --print-example-config > translate-dispatch.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use translate_dispatch::error::warn_best_effort;
use translate_dispatch::{DispatchConfig, Orchestrator, TranslateParams};

/// Rate-limited, retrying, batched translation of stdin lines
#[derive(Parser)]
#[command(name = "translate-dispatch")]
#[command(version)]
struct Cli {
    /// TOML configuration file (defaults to the usual locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Source language tag
    #[arg(long, default_value = "auto")]
    from: String,

    /// Target language tag
    #[arg(long, default_value = "zh")]
    to: String,

    /// Job id used for cancellation
    #[arg(long, default_value = "cli")]
    job: String,

    /// Print the default configuration as TOML and exit
    #[arg(long)]
    print_example_config: bool,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("translate_dispatch={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.print_example_config {
        print!("{}", DispatchConfig::default().to_toml_string()?);
        return Ok(());
    }

    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => DispatchConfig::from_file(path)?,
        None => DispatchConfig::load_from_default_locations(),
    };
    let orchestrator = Arc::new(Orchestrator::from_config(&config)?);

    let mut lines = BufReader::new(io::stdin()).lines();
    let mut inputs = Vec::new();
    while let Some(line) = lines.next_line().await? {
        inputs.push(line);
    }
    info!(lines = inputs.len(), from = %cli.from, to = %cli.to, "read input");

    let interrupt = {
        let orchestrator = Arc::clone(&orchestrator);
        let job = cli.job.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!(job_id = %job, "interrupted, aborting job");
                orchestrator.abort(&job);
            }
        })
    };

    let params = TranslateParams::new(&cli.from, &cli.to, &cli.job);
    let results = orchestrator.translate(&inputs, &params).await;
    interrupt.abort();

    let mut stdout = io::stdout();
    let mut failed = 0usize;
    for result in results {
        let line = match result {
            Ok(text) => text,
            Err(e) => {
                failed += 1;
                format!("!! {e}")
            }
        };
        stdout.write_all(line.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
    }
    warn_best_effort("flush stdout", stdout.flush().await);

    let stats = orchestrator.stats();
    info!(
        failed,
        cache_hits = stats.cache.hits,
        throttle_activations = stats.scheduler.throttle_activations,
        "done"
    );
    Ok(())
}
