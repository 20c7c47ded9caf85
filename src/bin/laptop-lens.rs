#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use laptop_lens::gateway::{ProviderGateway, TracingUsageSink};
use laptop_lens::{
    Advisor, AdvisorError, ComparisonResult, ComponentKind, LaptopRecord, ModelConfig,
    SelectedBenchmark,
};

#[derive(Parser)]
#[command(name = "laptop-lens", version, about = "Laptop comparison CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search-grounded comparison for a free-text request
    Compare {
        #[arg(long)]
        query: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Components within ±15% of a benchmark score, ranked
    Benchmarks {
        #[arg(long)]
        name: String,
        #[arg(long)]
        score: u64,
        #[arg(long, value_enum)]
        kind: CliKind,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Structured analysis of one CPU or GPU
    Analyze {
        #[arg(long)]
        component: String,
        #[arg(long, value_enum)]
        kind: CliKind,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Recommendation among previously compared laptops
    Verdict {
        /// JSON file with a comparison result or an array of laptops
        #[arg(long)]
        laptops: PathBuf,
        #[arg(long)]
        priorities: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CliKind {
    Cpu,
    Gpu,
}

impl From<CliKind> for ComponentKind {
    fn from(kind: CliKind) -> Self {
        match kind {
            CliKind::Cpu => ComponentKind::Cpu,
            CliKind::Gpu => ComponentKind::Gpu,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<AdvisorError>() {
                Some(advisor_err) => {
                    eprintln!("{}", advisor_err.user_message());
                    eprintln!("  caused by: {advisor_err}");
                }
                None => eprintln!("error: {err}"),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let gateway = ProviderGateway::from_env(Arc::new(TracingUsageSink))?;
    let advisor = Advisor::new(Arc::new(gateway), ModelConfig::from_env());

    match cli.command {
        Commands::Compare { query, out } => {
            let result = advisor.compare(&query).await?;
            emit(out.as_deref(), &result)?;
        }
        Commands::Benchmarks {
            name,
            score,
            kind,
            out,
        } => {
            let base = SelectedBenchmark::new(name, score, kind.into());
            let points = advisor.benchmark_peers(&base).await?;
            emit(out.as_deref(), &points)?;
        }
        Commands::Analyze {
            component,
            kind,
            out,
        } => {
            let analysis = advisor.analyze_component(&component, kind.into()).await?;
            emit(out.as_deref(), &analysis)?;
        }
        Commands::Verdict {
            laptops,
            priorities,
            out,
        } => {
            let laptops = load_laptops(&laptops)?;
            let verdict = advisor.verdict(&laptops, &priorities).await?;
            emit(out.as_deref(), &verdict)?;
        }
    }

    Ok(())
}

fn load_laptops(path: &Path) -> Result<Vec<LaptopRecord>, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    if let Ok(result) = serde_json::from_str::<ComparisonResult>(&raw) {
        return Ok(result.laptops);
    }
    Ok(serde_json::from_str::<Vec<LaptopRecord>>(&raw)?)
}

fn emit<T: Serialize>(out: Option<&Path>, value: &T) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string_pretty(value)?;
    match out {
        Some(path) => {
            std::fs::write(path, json)?;
            eprintln!("wrote {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
