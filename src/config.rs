use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";
pub const DEFAULT_MODEL_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "gpt-oss:20b";
const DEFAULT_TEMPERATURE: f32 = 0.3;
const DEFAULT_TOP_P: f32 = 0.9;
const DEFAULT_NUM_CTX: u32 = 2048;
const DEFAULT_KEEP_ALIVE: &str = "30m";
const DEFAULT_MAX_BULLETS: u32 = 10;
const DEFAULT_CORS_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://127.0.0.1:5500"];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    ollama: OllamaSection,
    refiner: RefinerSection,
    templates: TemplatesSection,
    server: ServerSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OllamaSection {
    model: Option<String>,
    temperature: Option<f32>,
    top_p: Option<f32>,
    num_ctx: Option<u32>,
    keep_alive: Option<serde_yaml::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RefinerSection {
    max_bullets: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TemplatesSection {
    dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServerSection {
    cors_origins: Option<Vec<String>>,
    cors_origin_regex: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub num_ctx: u32,
    pub keep_alive: String,
    pub max_bullets: u32,
    pub templates_dir: Option<PathBuf>,
    /// Browser origins allowed to call the HTTP server.
    pub cors_origins: Vec<String>,
    /// Additional origins, matched against the whole origin string.
    pub cors_origin_regex: Option<String>,
    pub model_base_url: String,
    pub model_timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_parts(FileConfig::default(), |_| None)
    }
}

impl Config {
    /// Loads the YAML file and applies environment overrides.
    ///
    /// With `path == None` the default `config.yaml` is optional; an explicit
    /// path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, |key| env::var(key).ok())
    }

    fn load_with(
        path: Option<&Path>,
        get_var: impl FnMut(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut file = read_file_config(path)?;
        let config_path = path.unwrap_or(Path::new(DEFAULT_CONFIG_PATH));
        file.templates.dir = file
            .templates
            .dir
            .map(|dir| relative_to_config(config_path, dir));
        Ok(Self::from_parts(file, get_var))
    }

    fn from_parts(file: FileConfig, mut get_var: impl FnMut(&str) -> Option<String>) -> Self {
        let FileConfig {
            ollama,
            refiner,
            templates,
            server,
        } = file;

        Self {
            model: ollama
                .model
                .filter(|model| !model.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            temperature: ollama.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            top_p: ollama.top_p.unwrap_or(DEFAULT_TOP_P),
            num_ctx: ollama.num_ctx.unwrap_or(DEFAULT_NUM_CTX),
            keep_alive: ollama
                .keep_alive
                .as_ref()
                .and_then(scalar_to_string)
                .unwrap_or_else(|| DEFAULT_KEEP_ALIVE.to_string()),
            max_bullets: refiner.max_bullets.unwrap_or(DEFAULT_MAX_BULLETS),
            templates_dir: templates.dir,
            cors_origins: server.cors_origins.unwrap_or_else(|| {
                DEFAULT_CORS_ORIGINS
                    .iter()
                    .map(|origin| origin.to_string())
                    .collect()
            }),
            cors_origin_regex: server
                .cors_origin_regex
                .filter(|pattern| !pattern.trim().is_empty()),
            model_base_url: parse_base_url(get_var("OLLAMA_HOST").as_deref()),
            model_timeout_secs: parse_model_timeout_secs(get_var("MODEL_TIMEOUT_SECS").as_deref()),
        }
    }
}

fn read_file_config(path: Option<&Path>) -> Result<FileConfig> {
    let (path, required) = match path {
        Some(path) => (path, true),
        None => (Path::new(DEFAULT_CONFIG_PATH), false),
    };

    if !required && !path.exists() {
        return Ok(FileConfig::default());
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_file_config(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

/// Relative `templates.dir` values are read from the config file's directory.
fn relative_to_config(config_path: &Path, dir: PathBuf) -> PathBuf {
    if dir.is_absolute() {
        return dir;
    }
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(dir),
        _ => dir,
    }
}

fn parse_file_config(raw: &str) -> Result<FileConfig> {
    if raw.trim().is_empty() {
        return Ok(FileConfig::default());
    }
    let parsed: Option<FileConfig> = serde_yaml::from_str(raw)?;
    Ok(parsed.unwrap_or_default())
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(text) => Some(text.clone()),
        serde_yaml::Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn parse_base_url(raw: Option<&str>) -> String {
    let Some(value) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return DEFAULT_MODEL_BASE_URL.to_string();
    };

    let value = value.trim_end_matches('/');
    if value.contains("://") {
        value.to_string()
    } else {
        format!("http://{value}")
    }
}

fn parse_model_timeout_secs(raw: Option<&str>) -> Option<u64> {
    raw.and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
}
