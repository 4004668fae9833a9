pub mod cli;
pub mod config;
pub mod language;
pub mod logging;
pub mod model;
pub mod model_gateway;
pub mod providers;
pub mod quality;
pub mod refiner;
pub mod repl;
pub mod server;
pub mod session;
pub mod templates;

use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Client;
use std::io::{self, Write};
use std::time::Duration;
use tracing::info;

use cli::{Cli, OutputMode};
use config::Config;
use model_gateway::OllamaGateway;
use refiner::Refiner;
use repl::run_repl;
use server::ServerState;
use templates::TemplateSet;

pub async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = logging::init();

    let cli = Cli::parse();
    let cfg = Config::load(cli.config.as_deref())?;
    info!(
        model = %cfg.model,
        num_ctx = cfg.num_ctx,
        base_url = %cfg.model_base_url,
        timeout_secs = ?cfg.model_timeout_secs,
        "loaded runtime configuration"
    );

    let templates = match &cfg.templates_dir {
        Some(dir) => TemplateSet::load_dir(dir)?,
        None => TemplateSet::builtin(),
    };
    let client = build_client(&cfg)?;
    if let Some(addr) = cli.serve {
        return server::serve(addr, ServerState::new(client, cfg, templates)).await;
    }

    let gateway = OllamaGateway::new(&client, &cfg);

    if cli.chat {
        return run_repl(&gateway, &cfg, &templates).await;
    }

    let prompt = cli.prompt.as_deref().unwrap_or_default();
    let refiner = Refiner::new(&gateway, &cfg, &templates);
    let options = cli.refine_options();
    let mut stdout = io::stdout();

    match cli.output {
        OutputMode::Buffered => {
            let answer = refiner.refine(prompt, &options, None).await?;
            print_response(&mut stdout, &answer)
        }
        OutputMode::Stream => {
            let answer = refiner.refine(prompt, &options, Some(&mut stdout)).await?;
            finish_line(&mut stdout, &answer)
        }
    }
}

fn build_client(cfg: &Config) -> Result<Client> {
    let mut builder = Client::builder();
    if let Some(secs) = cfg.model_timeout_secs {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    builder.build().context("Failed to initialize HTTP client")
}

/// Writes the answer unmodified, ending the line if the model did not.
fn print_response(out: &mut impl Write, answer: &str) -> Result<()> {
    out.write_all(answer.as_bytes())
        .context("Failed to write model output")?;
    finish_line(out, answer)
}

fn finish_line(out: &mut impl Write, answer: &str) -> Result<()> {
    if !answer.ends_with('\n') {
        writeln!(out).context("Failed to write model output")?;
    }
    out.flush().context("Failed to flush stdout")
}
