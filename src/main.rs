//! Webpilot - an LLM-driven browser agent
//!
//! Main entry point for the CLI application.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use webpilot::agent::{Services, TaskRunner};
use webpilot::browser::CdpConnection;
use webpilot::llm::OpenAiClient;
use webpilot::oracle::LlmOracle;
use webpilot::Config;

/// Webpilot - drive a browser from a natural-language prompt
#[derive(Parser, Debug)]
#[command(name = "webpilot")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (defaults to ~/.config/webpilot/config.toml)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// DevTools host
    #[arg(long)]
    host: Option<String>,

    /// DevTools port
    #[arg(long)]
    port: Option<u16>,

    /// Oracle model
    #[arg(long, short = 'm')]
    model: Option<String>,

    /// Stop after this many loop iterations
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Stop after this many consecutive failed steps
    #[arg(long)]
    max_failures: Option<usize>,

    /// Enable debug output
    #[arg(long, short = 'd')]
    debug: bool,

    /// Print the default configuration and exit
    #[arg(long)]
    show_config: bool,

    /// Write the effective configuration to the default location and exit
    #[arg(long)]
    init_config: bool,

    /// What to do
    #[arg(required_unless_present_any = ["show_config", "init_config"])]
    prompt: Option<String>,
}

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _ = dotenvy::dotenv();

    if args.show_config {
        print!("{}", Config::default_config_toml());
        return Ok(());
    }

    // Build configuration
    let mut config = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load(),
    };

    // Apply CLI overrides
    if let Some(host) = args.host {
        config.browser.host = host;
    }
    if let Some(port) = args.port {
        config.browser.port = port;
    }
    if let Some(model) = args.model {
        config.oracle.model = model;
    }
    if args.max_iterations.is_some() {
        config.agent.max_iterations = args.max_iterations;
    }
    if args.max_failures.is_some() {
        config.agent.max_consecutive_failures = args.max_failures;
    }
    if args.debug {
        config.agent.debug = true;
    }

    if args.init_config {
        let path = config.save()?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    let Some(prompt) = args.prompt else {
        anyhow::bail!("a prompt is required");
    };

    init_logging(config.agent.debug);
    config.validate()?;

    let cdp = CdpConnection::connect_to(
        &config.browser.host,
        config.browser.port,
        config.browser.command_timeout(),
    )
    .await
    .with_context(|| format!("no browser at {}", config.devtools_url()))?;
    info!("Connected to browser at {}", config.devtools_url());

    let llm = Arc::new(OpenAiClient::from_config(&config.oracle)?);
    let oracle = Arc::new(LlmOracle::new(llm, &config.oracle));
    let services = Services::new(Arc::new(cdp), oracle, &config);
    let runner = TaskRunner::new(services, config.agent.clone());

    let stop = CancellationToken::new();
    let on_signal = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current step");
            on_signal.cancel();
        }
    });

    let outcome = runner.run(&prompt, stop).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
