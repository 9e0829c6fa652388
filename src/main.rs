use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use mapping_stage::{
    config::{Config, ProcessorConfig},
    message::{Batch, Part},
    observability::{Observability, init_logging},
    pipeline::{PipelineRunner, StageRegistry},
};

#[derive(Parser)]
#[command(name = "mapping-stage")]
#[command(version)]
#[command(about = "Apply a mapping to newline-delimited records")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path, `$CONFIG_FILE` or `config.toml` when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Mapping text (replaces configured processors)
    #[arg(short, long, conflicts_with = "mapping_file")]
    mapping: Option<String>,

    /// File containing the mapping (replaces configured processors)
    #[arg(short = 'f', long, value_name = "PATH")]
    mapping_file: Option<PathBuf>,

    /// Input file, stdin when omitted
    #[arg(short, long, value_name = "PATH")]
    input: Option<PathBuf>,

    /// Records per batch
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Log level (overrides config file)
    #[arg(short = 'v', long)]
    log_level: Option<String>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::config_path);
    let mut config = match &cli.config {
        Some(path) => Config::load_from_file(path),
        None => Config::load(),
    }
    .with_context(|| format!("loading {}", config_path.display()))?;

    init_logging(&config.logging, cli.log_level.as_deref())?;
    info!("Starting mapping-stage v{}", env!("CARGO_PKG_VERSION"));

    // Override config with CLI arguments
    if let Some(mapping) = cli.mapping {
        config.processors = vec![ProcessorConfig::mapping(mapping)];
    } else if let Some(path) = &cli.mapping_file {
        let mapping = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading mapping file {}", path.display()))?;
        config.processors = vec![ProcessorConfig::mapping(mapping)];
    }
    if let Some(batch_size) = cli.batch_size {
        config.pipeline.batch_size = batch_size;
    }
    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }
    config.validate()?;

    let observability = Observability::init(&config.observability)?;
    let runner = PipelineRunner::from_config(&config, &StageRegistry::with_defaults())?;

    let mut stdout = tokio::io::stdout();
    let totals = match &cli.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening input {}", path.display()))?;
            process_lines(BufReader::new(file), &runner, config.pipeline.batch_size, &mut stdout)
                .await?
        }
        None => {
            process_lines(
                BufReader::new(tokio::io::stdin()),
                &runner,
                config.pipeline.batch_size,
                &mut stdout,
            )
            .await?
        }
    };
    stdout.flush().await?;

    info!(
        "Processed {} record(s): {} emitted, {} flagged",
        totals.received, totals.emitted, totals.flagged
    );

    runner.shutdown(config.pipeline.shutdown_timeout).await?;
    observability.shutdown()?;
    Ok(())
}

#[derive(Default)]
struct Totals {
    received: usize,
    emitted: usize,
    flagged: usize,
}

async fn process_lines<R, W>(
    reader: BufReader<R>,
    runner: &PipelineRunner,
    batch_size: usize,
    out: &mut W,
) -> Result<Totals>
where
    R: tokio::io::AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut totals = Totals::default();
    let mut lines = reader.lines();
    let mut pending = Batch::with_capacity(batch_size);

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        totals.received += 1;
        pending.push(Part::new(line));

        if pending.len() >= batch_size {
            let batch = std::mem::replace(&mut pending, Batch::with_capacity(batch_size));
            flush_batch(runner, batch, out, &mut totals).await?;
        }
    }
    if !pending.is_empty() {
        flush_batch(runner, pending, out, &mut totals).await?;
    }

    Ok(totals)
}

async fn flush_batch<W>(
    runner: &PipelineRunner,
    batch: Batch,
    out: &mut W,
    totals: &mut Totals,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    for part in runner.run_batch(batch) {
        if let Some(reason) = part.error() {
            totals.flagged += 1;
            warn!("Record flagged: {}", reason);
        }
        out.write_all(part.payload()).await?;
        out.write_all(b"\n").await?;
        totals.emitted += 1;
    }
    Ok(())
}
