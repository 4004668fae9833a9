use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::refiner::{Profile, RefineOptions};
use crate::templates::Mode;

#[derive(Parser, Debug)]
#[command(
    name = "refiner",
    version,
    about = "Turn a raw Uzbek or Russian request into a structured prompt using an Ollama model"
)]
pub struct Cli {
    /// Raw request text
    #[arg(
        value_parser = non_empty_prompt,
        required_unless_present_any = ["chat", "serve"],
        conflicts_with_all = ["chat", "serve"]
    )]
    pub prompt: Option<String>,

    #[arg(long, value_enum, default_value_t = Mode::Chatgpt)]
    pub mode: Mode,

    /// Model preset; `max` uses the configured model
    #[arg(long, value_enum, default_value_t = Profile::Max)]
    pub profile: Profile,

    /// Override the profile's model
    #[arg(long)]
    pub model: Option<String>,

    /// Override the profile's context window
    #[arg(long)]
    pub num_ctx: Option<u32>,

    /// Regenerate with the configured model when the output looks incomplete
    #[arg(long, default_value_t = false)]
    pub cascade: bool,

    #[arg(long, value_enum, default_value_t = OutputMode::Buffered)]
    pub output: OutputMode,

    /// YAML configuration file [default: config.yaml, optional]
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Start the interactive chat shell
    #[arg(long, default_value_t = false)]
    pub chat: bool,

    /// Serve `POST /refine` over HTTP on this address
    #[arg(long, value_name = "ADDR", conflicts_with = "chat")]
    pub serve: Option<SocketAddr>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum OutputMode {
    Buffered,
    Stream,
}

impl Cli {
    pub fn refine_options(&self) -> RefineOptions {
        RefineOptions {
            mode: self.mode,
            profile: self.profile,
            model: self.model.clone(),
            num_ctx: self.num_ctx,
            cascade: self.cascade,
        }
    }
}

fn non_empty_prompt(raw: &str) -> Result<String, String> {
    if raw.trim().is_empty() {
        Err("prompt text must not be empty".to_string())
    } else {
        Ok(raw.to_string())
    }
}
