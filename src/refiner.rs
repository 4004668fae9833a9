use anyhow::{Context, Result};
use clap::ValueEnum;
use std::io::Write;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::language;
use crate::model::{GenerationOptions, GenerationRequest};
use crate::model_gateway::{ModelGateway, reborrow_echo};
use crate::quality;
use crate::templates::{Mode, TemplateSet};

const SPEED_MODEL: &str = "qwen2.5:7b";
const SPEED_NUM_CTX: u32 = 2048;
const BALANCED_MODEL: &str = "mistral:latest";
const BALANCED_NUM_CTX: u32 = 4096;

/// Model presets, fastest first. `Max` is whatever the config names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Profile {
    Speed,
    Balanced,
    Max,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Speed => "speed",
            Self::Balanced => "balanced",
            Self::Max => "max",
        }
    }

    pub fn preset(&self, cfg: &Config) -> (String, u32) {
        match self {
            Self::Speed => (SPEED_MODEL.to_string(), SPEED_NUM_CTX),
            Self::Balanced => (BALANCED_MODEL.to_string(), BALANCED_NUM_CTX),
            Self::Max => (cfg.model.clone(), cfg.num_ctx),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefineOptions {
    pub mode: Mode,
    pub profile: Profile,
    pub model: Option<String>,
    pub num_ctx: Option<u32>,
    pub cascade: bool,
}

impl RefineOptions {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            profile: Profile::Max,
            model: None,
            num_ctx: None,
            cascade: false,
        }
    }
}

pub struct Refiner<'a, G> {
    gateway: &'a G,
    cfg: &'a Config,
    templates: &'a TemplateSet,
}

impl<'a, G> Refiner<'a, G>
where
    G: ModelGateway,
{
    pub fn new(gateway: &'a G, cfg: &'a Config, templates: &'a TemplateSet) -> Self {
        Self {
            gateway,
            cfg,
            templates,
        }
    }

    /// Wraps the raw input in the mode's template, instructing the model to
    /// answer in the input's language.
    pub fn compose(&self, input: &str, mode: Mode) -> String {
        let language = language::detect(input);
        debug!(
            language = language.code(),
            mode = mode.as_str(),
            input_len = input.len(),
            "composing prompt"
        );
        self.templates
            .compose(input, mode, language, self.cfg.max_bullets)
    }

    pub async fn run_once(
        &self,
        model: &str,
        num_ctx: u32,
        prompt: &str,
        echo: Option<&mut (dyn Write + Send)>,
    ) -> Result<String> {
        let mut echo = echo;
        let request = GenerationRequest {
            model: model.to_string(),
            prompt: prompt.to_string(),
            options: GenerationOptions::from_config(self.cfg, num_ctx),
        };
        self.gateway
            .generate(request, reborrow_echo(&mut echo))
            .await
    }

    pub async fn refine(
        &self,
        input: &str,
        options: &RefineOptions,
        echo: Option<&mut (dyn Write + Send)>,
    ) -> Result<String> {
        let mut echo = echo;
        let (preset_model, preset_num_ctx) = options.profile.preset(self.cfg);
        let model = options.model.clone().unwrap_or(preset_model);
        let num_ctx = options.num_ctx.unwrap_or(preset_num_ctx);
        let prompt = self.compose(input, options.mode);

        info!(
            model = %model,
            num_ctx,
            host = %self.cfg.model_base_url,
            profile = options.profile.as_str(),
            mode = options.mode.as_str(),
            cascade = options.cascade,
            "refining prompt"
        );

        let text = self
            .run_once(&model, num_ctx, &prompt, reborrow_echo(&mut echo))
            .await?;
        if !options.cascade {
            return Ok(text);
        }

        if !quality::needs_fallback(options.mode, &text) {
            debug!("output passed quality check");
            return Ok(text);
        }
        if model == self.cfg.model && num_ctx == self.cfg.num_ctx {
            debug!("low-scoring output already came from the configured model");
            return Ok(text);
        }

        warn!(
            score = quality::score(options.mode, &text),
            fallback_model = %self.cfg.model,
            "output below quality threshold; regenerating with configured model"
        );
        if let Some(out) = echo.as_deref_mut() {
            writeln!(out).context("Failed to write model output")?;
        }
        self.run_once(
            &self.cfg.model,
            self.cfg.num_ctx,
            &prompt,
            reborrow_echo(&mut echo),
        )
        .await
    }
}
