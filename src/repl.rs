use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use crate::config::Config;
use crate::model_gateway::ModelGateway;
use crate::refiner::{RefineOptions, Refiner};
use crate::session::{ChatSession, default_transcript_path};
use crate::templates::{Mode, TemplateSet};

const HELP: &str = "Commands:
  /mode raw                - normal assistant chat (default)
  /mode engineer [m]       - prompt-engineering, m in {coding,image,video,chatgpt}
  /reset                   - clear memory
  /save [path]             - save transcript to JSONL
  /help                    - show commands
  /exit                    - quit
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShellMode {
    Raw,
    Engineer(Mode),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ModeArg {
    Raw,
    Engineer(Option<Mode>),
    Missing,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Help,
    Reset,
    Mode(ModeArg),
    Save(Option<PathBuf>),
    Exit,
    Unknown,
}

fn parse_command(line: &str) -> Command {
    let mut parts = line.split_whitespace();
    let name = parts.next().unwrap_or_default().to_ascii_lowercase();

    match name.as_str() {
        "/help" => Command::Help,
        "/reset" => Command::Reset,
        "/exit" | "/quit" => Command::Exit,
        "/save" => Command::Save(parts.next().map(PathBuf::from)),
        "/mode" => Command::Mode(match parts.next() {
            None => ModeArg::Missing,
            Some("raw") => ModeArg::Raw,
            Some("engineer") => ModeArg::Engineer(parts.next().and_then(Mode::from_name)),
            Some(_) => ModeArg::Unknown,
        }),
        _ => Command::Unknown,
    }
}

/// Interactive shell on stdin/stdout.
pub async fn run_repl<G>(gateway: &G, cfg: &Config, templates: &TemplateSet) -> Result<()>
where
    G: ModelGateway,
{
    let stdin = io::stdin();
    run_repl_with(gateway, cfg, templates, stdin.lock(), io::stdout()).await
}

async fn run_repl_with<G, R, W>(
    gateway: &G,
    cfg: &Config,
    templates: &TemplateSet,
    mut input: R,
    mut output: W,
) -> Result<()>
where
    G: ModelGateway,
    R: BufRead,
    W: Write + Send,
{
    gateway.prewarm(&cfg.model).await;

    let refiner = Refiner::new(gateway, cfg, templates);
    let mut session = ChatSession::new(gateway, cfg);
    let mut mode = ShellMode::Raw;

    writeln!(
        output,
        "[model: {} | num_ctx: {} | host: {}]",
        cfg.model, cfg.num_ctx, cfg.model_base_url
    )?;
    writeln!(output, "{HELP}")?;

    loop {
        write!(output, "you › ")?;
        output.flush().context("Failed to flush stdout")?;

        let mut line = String::new();
        let read = input
            .read_line(&mut line)
            .context("Failed to read stdin")?;
        if read == 0 {
            writeln!(output, "\nbye!")?;
            break;
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('/') {
            match parse_command(line) {
                Command::Exit => break,
                command => {
                    handle_command(command, cfg, &mut session, &mut mode, &mut output)?;
                    continue;
                }
            }
        }

        match mode {
            ShellMode::Engineer(submode) => {
                match refiner.refine(line, &RefineOptions::new(submode), None).await {
                    Ok(text) => {
                        writeln!(output, "\n{text}\n")?;
                        session.record(line, &text);
                    }
                    Err(err) => writeln!(output, "[engineer error] {err:#}")?,
                }
            }
            ShellMode::Raw => {
                write!(output, "assistant › ")?;
                output.flush().context("Failed to flush stdout")?;
                match session.run_turn(line, Some(&mut output)).await {
                    Ok(_) => writeln!(output)?,
                    Err(err) => writeln!(output, "\n[chat error] {err:#}")?,
                }
            }
        }
    }

    Ok(())
}

fn handle_command<G, W>(
    command: Command,
    cfg: &Config,
    session: &mut ChatSession<'_, G>,
    mode: &mut ShellMode,
    output: &mut W,
) -> Result<()>
where
    G: ModelGateway,
    W: Write,
{
    match command {
        Command::Help => writeln!(output, "{HELP}")?,
        Command::Reset => {
            session.reset();
            writeln!(output, "[memory cleared]")?;
        }
        Command::Mode(ModeArg::Missing) => {
            writeln!(output, "usage: /mode raw | /mode engineer [submode]")?
        }
        Command::Mode(ModeArg::Raw) => {
            *mode = ShellMode::Raw;
            writeln!(output, "[mode=raw: {}]", cfg.model)?;
        }
        Command::Mode(ModeArg::Engineer(submode)) => {
            let current = match *mode {
                ShellMode::Engineer(current) => current,
                ShellMode::Raw => Mode::Chatgpt,
            };
            let submode = submode.unwrap_or(current);
            *mode = ShellMode::Engineer(submode);
            writeln!(
                output,
                "[mode=engineer:{} on {}]",
                submode.as_str(),
                cfg.model
            )?;
        }
        Command::Mode(ModeArg::Unknown) => writeln!(output, "unknown mode")?,
        Command::Save(path) => {
            let path = path.unwrap_or_else(default_transcript_path);
            match session.save_transcript(&path) {
                Ok(()) => writeln!(output, "[saved → {}]", path.display())?,
                Err(err) => writeln!(output, "[save error] {err:#}")?,
            }
        }
        Command::Unknown => writeln!(output, "unknown command; /help")?,
        Command::Exit => {}
    }
    Ok(())
}
