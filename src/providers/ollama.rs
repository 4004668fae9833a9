use anyhow::{Context, Result, anyhow};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::model::{ChatRequest, GenerationOptions, GenerationRequest, Message};
use crate::providers::http_errors::model_api_request_error;

const PREWARM_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    keep_alive: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<&'a GenerationOptions>,
}

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    keep_alive: &'a str,
    options: &'a GenerationOptions,
}

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    message: Option<ChatMessageResponse>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: String,
}

/// One JSON object of an Ollama reply, either whole or as an NDJSON line.
trait ReplyChunk: DeserializeOwned {
    /// Returns the text piece and whether the reply is complete.
    fn into_piece(self) -> Result<(String, bool)>;
}

impl ReplyChunk for GenerateChunk {
    fn into_piece(self) -> Result<(String, bool)> {
        if let Some(error) = self.error {
            return Err(anyhow!("Model API returned an error: {}", error));
        }
        Ok((self.response, self.done))
    }
}

impl ReplyChunk for ChatChunk {
    fn into_piece(self) -> Result<(String, bool)> {
        if let Some(error) = self.error {
            return Err(anyhow!("Model API returned an error: {}", error));
        }
        let content = self.message.map(|message| message.content).unwrap_or_default();
        Ok((content, self.done))
    }
}

fn endpoint_url(base_url: &str, path: &str) -> String {
    format!("{}/api/{}", base_url.trim_end_matches('/'), path)
}

pub fn generate_url(base_url: &str) -> String {
    endpoint_url(base_url, "generate")
}

pub fn chat_url(base_url: &str) -> String {
    endpoint_url(base_url, "chat")
}

/// Calls `/api/generate`. With `echo` the reply is streamed and every piece
/// is written to it as it arrives.
pub async fn generate(
    client: &Client,
    cfg: &Config,
    request: &GenerationRequest,
    echo: Option<&mut (dyn Write + Send)>,
) -> Result<String> {
    let api_url = generate_url(&cfg.model_base_url);
    let body = GenerateBody {
        model: &request.model,
        prompt: &request.prompt,
        stream: echo.is_some(),
        keep_alive: &cfg.keep_alive,
        options: Some(&request.options),
    };
    debug!(
        api_url = %api_url,
        model = %request.model,
        num_ctx = request.options.num_ctx,
        prompt_len = request.prompt.len(),
        stream = body.stream,
        "sending ollama generate request"
    );

    let response = post_json(client, cfg, &api_url, &body).await?;
    let text = match echo {
        Some(echo) => read_stream::<GenerateChunk>(response, cfg, &api_url, echo).await?,
        None => read_whole::<GenerateChunk>(response).await?,
    };
    debug!(
        model = %request.model,
        response_len = text.len(),
        "received ollama generate response"
    );
    Ok(text)
}

/// Calls `/api/chat` with the full message history.
pub async fn chat(
    client: &Client,
    cfg: &Config,
    request: &ChatRequest,
    echo: Option<&mut (dyn Write + Send)>,
) -> Result<String> {
    let api_url = chat_url(&cfg.model_base_url);
    let body = ChatBody {
        model: &request.model,
        messages: &request.messages,
        stream: echo.is_some(),
        keep_alive: &cfg.keep_alive,
        options: &request.options,
    };
    debug!(
        api_url = %api_url,
        model = %request.model,
        message_count = request.messages.len(),
        stream = body.stream,
        "sending ollama chat request"
    );

    let response = post_json(client, cfg, &api_url, &body).await?;
    let text = match echo {
        Some(echo) => read_stream::<ChatChunk>(response, cfg, &api_url, echo).await?,
        None => read_whole::<ChatChunk>(response).await?,
    };
    debug!(
        model = %request.model,
        response_len = text.len(),
        "received ollama chat response"
    );
    Ok(text)
}

/// Loads `model` into memory ahead of the first real request. Best effort.
pub async fn prewarm(client: &Client, cfg: &Config, model: &str) {
    let api_url = generate_url(&cfg.model_base_url);
    let body = GenerateBody {
        model,
        prompt: " ",
        stream: false,
        keep_alive: &cfg.keep_alive,
        options: None,
    };

    match client
        .post(&api_url)
        .json(&body)
        .timeout(PREWARM_TIMEOUT)
        .send()
        .await
    {
        Ok(response) => debug!(
            api_url = %api_url,
            model = %model,
            status = %response.status(),
            "prewarm request completed"
        ),
        Err(err) => debug!(
            api_url = %api_url,
            model = %model,
            error = %err,
            "prewarm request failed"
        ),
    }
}

async fn post_json<B: Serialize>(
    client: &Client,
    cfg: &Config,
    api_url: &str,
    body: &B,
) -> Result<Response> {
    let response = client
        .post(api_url)
        .json(body)
        .send()
        .await
        .map_err(|err| {
            warn!(api_url = %api_url, error = %err, "ollama request failed");
            model_api_request_error(err, api_url, cfg.model_timeout_secs)
        })?;

    if !response.status().is_success() {
        let status = response.status();
        let response_body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read response body>".to_string());
        warn!(
            api_url = %api_url,
            status = %status,
            response_body_len = response_body.len(),
            "ollama returned non-success status"
        );
        return Err(anyhow!(
            "Model request failed with status {}: {}",
            status,
            response_body
        ));
    }

    Ok(response)
}

async fn read_whole<C: ReplyChunk>(response: Response) -> Result<String> {
    let parsed: C = response
        .json()
        .await
        .context("Failed to parse model response")?;
    let (text, _) = parsed.into_piece()?;
    Ok(text)
}

async fn read_stream<C: ReplyChunk>(
    mut response: Response,
    cfg: &Config,
    api_url: &str,
    echo: &mut (dyn Write + Send),
) -> Result<String> {
    let mut decoder = LineDecoder::default();
    let mut text = String::new();

    while let Some(bytes) = response
        .chunk()
        .await
        .map_err(|err| model_api_request_error(err, api_url, cfg.model_timeout_secs))?
    {
        for line in decoder.push(&bytes) {
            if apply_line::<C>(&line, &mut text, echo)? {
                return Ok(text);
            }
        }
    }

    if let Some(line) = decoder.finish() {
        apply_line::<C>(&line, &mut text, echo)?;
    }
    Ok(text)
}

/// Feeds one NDJSON line into `text` and `echo`; returns true once `done`.
fn apply_line<C: ReplyChunk>(
    line: &str,
    text: &mut String,
    echo: &mut (dyn Write + Send),
) -> Result<bool> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(false);
    }

    let chunk: C = serde_json::from_str(line).context("Failed to parse model stream chunk")?;
    let (piece, done) = chunk.into_piece()?;
    if !piece.is_empty() {
        echo.write_all(piece.as_bytes())
            .and_then(|_| echo.flush())
            .context("Failed to write model output")?;
        text.push_str(&piece);
    }
    Ok(done)
}

/// Splits a byte stream on `\n`, holding partial lines between chunks.
#[derive(Debug, Default)]
struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = String::from_utf8_lossy(&rest).into_owned();
        (!rest.trim().is_empty()).then_some(rest)
    }
}
