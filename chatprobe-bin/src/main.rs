use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use chatprobe_core::{
    config::Config,
    endpoint::{ChatEndpoint, OpenAiCompatible},
    harness::{CheckReport, Outcome, SmokeHarness},
    model::{ChatRequest, extract_message_content},
};
use clap::{Parser, Subcommand, ValueEnum};
use futures_util::StreamExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "chatprobe: smoke checks for chat-completion endpoints", long_about = None)]
struct Cli {
    /// Config file (JSON or TOML). Defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override the endpoint base URL, e.g. http://localhost:3000
    #[arg(long, global = true)]
    endpoint: Option<String>,
    #[arg(long, global = true)]
    model: Option<String>,
    /// Override the total request timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the non-streaming and the streaming check
    Suite,
    /// Run a single check
    Check {
        #[arg(value_enum)]
        which: Which,
    },
    /// Send a chat completion request
    Chat {
        #[arg(short, long, help = "Message from the user")]
        message: String,
    },
    /// Stream a chat completion (prints deltas live)
    ChatStream {
        #[arg(short, long, help = "Message from the user")]
        message: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Which {
    Stream,
    NonStream,
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut cfg = match &cli.config {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    };
    if let Some(endpoint) = &cli.endpoint {
        cfg.target.endpoint = endpoint.clone();
    }
    if let Some(model) = &cli.model {
        cfg.target.model = model.clone();
    }
    if let Some(ms) = cli.timeout_ms {
        cfg.http.request_timeout_ms = ms;
    }
    Ok(cfg)
}

fn print_live(piece: &str) {
    print!("{piece}");
    io::stdout().flush().ok();
}

fn print_report(report: &CheckReport) {
    let mark = if report.passed() { "ok" } else { "FAIL" };
    println!(
        "[{mark}] {} ({}, {} ms): {}",
        report.check.as_str(),
        report.outcome.as_str(),
        report.latency_ms,
        report.message
    );
    if let Some(kind) = report.error_kind {
        println!("       error kind: {kind}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli)?;

    match cli.command {
        Commands::Suite => {
            let harness = SmokeHarness::from_config(&cfg)?;
            println!(
                "probing {} with model {}",
                harness.endpoint().name(),
                harness.endpoint().model()
            );
            let suite = harness.run_suite_with(print_live).await;
            println!();
            for report in &suite.checks {
                print_report(report);
            }
            if suite.passed() {
                println!("all checks passed");
                Ok(ExitCode::SUCCESS)
            } else {
                println!("some checks failed");
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::Check { which } => {
            let harness = SmokeHarness::from_config(&cfg)?;
            let report = match which {
                Which::NonStream => harness.check_non_streaming().await,
                Which::Stream => {
                    let r = harness.check_streaming_with(print_live).await;
                    println!();
                    r
                }
            };
            print_report(&report);
            Ok(if report.passed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Chat { message } => {
            let endpoint = OpenAiCompatible::from_target(cfg.target()?, &cfg.http)?;
            let req = ChatRequest::single(endpoint.model(), message, false);
            let body = endpoint.complete(&req).await?;
            println!("{}", extract_message_content(&body));
            Ok(ExitCode::SUCCESS)
        }
        Commands::ChatStream { message } => {
            let endpoint = OpenAiCompatible::from_target(cfg.target()?, &cfg.http)?;
            let req = ChatRequest::single(endpoint.model(), message, true);
            let mut stream = endpoint.stream(&req).await?;
            let mut saw_delta = false;
            while let Some(item) = stream.next().await {
                match item {
                    Ok(txt) => {
                        saw_delta = true;
                        print_live(&txt);
                    }
                    Err(err) => {
                        if saw_delta {
                            println!();
                        }
                        eprintln!("[error: {err}]");
                        return Ok(ExitCode::FAILURE);
                    }
                }
            }
            if saw_delta {
                println!();
            }
            eprintln!("[stop: {:?}]", stream.stop_reason());
            Ok(if saw_delta {
                ExitCode::SUCCESS
            } else {
                eprintln!("[{}]", Outcome::NoContent.as_str());
                ExitCode::FAILURE
            })
        }
    }
}
