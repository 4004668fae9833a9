use anyhow::Result;
use reqwest::Client;
use std::future::Future;
use std::io::Write;
use std::pin::Pin;

use crate::config::Config;
use crate::model::{ChatRequest, GenerationRequest};
use crate::providers::ollama;

pub type ModelGatewayFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Seam between the prompt pipeline and the model-serving endpoint.
///
/// Passing `echo` asks for a streamed reply written to it piece by piece;
/// the full text is returned either way.
pub trait ModelGateway {
    fn generate<'a>(
        &'a self,
        request: GenerationRequest,
        echo: Option<&'a mut (dyn Write + Send)>,
    ) -> ModelGatewayFuture<'a, String>;

    fn chat<'a>(
        &'a self,
        request: ChatRequest,
        echo: Option<&'a mut (dyn Write + Send)>,
    ) -> ModelGatewayFuture<'a, String>;

    fn prewarm<'a>(&'a self, model: &'a str) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Reborrows an optional echo sink for one gateway call.
pub fn reborrow_echo<'b>(
    echo: &'b mut Option<&mut (dyn Write + Send)>,
) -> Option<&'b mut (dyn Write + Send)> {
    match echo {
        Some(out) => Some(&mut **out),
        None => None,
    }
}

pub struct OllamaGateway<'a> {
    client: &'a Client,
    cfg: &'a Config,
}

impl<'a> OllamaGateway<'a> {
    pub fn new(client: &'a Client, cfg: &'a Config) -> Self {
        Self { client, cfg }
    }
}

impl ModelGateway for OllamaGateway<'_> {
    fn generate<'a>(
        &'a self,
        request: GenerationRequest,
        echo: Option<&'a mut (dyn Write + Send)>,
    ) -> ModelGatewayFuture<'a, String> {
        Box::pin(async move { ollama::generate(self.client, self.cfg, &request, echo).await })
    }

    fn chat<'a>(
        &'a self,
        request: ChatRequest,
        echo: Option<&'a mut (dyn Write + Send)>,
    ) -> ModelGatewayFuture<'a, String> {
        Box::pin(async move { ollama::chat(self.client, self.cfg, &request, echo).await })
    }

    fn prewarm<'a>(&'a self, model: &'a str) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(ollama::prewarm(self.client, self.cfg, model))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedGateway;
    use super::{ModelGateway, OllamaGateway};
    use crate::config::Config;
    use crate::model::{GenerationOptions, GenerationRequest};

    fn request(prompt: &str) -> GenerationRequest {
        GenerationRequest {
            model: "qwen2.5:7b".to_string(),
            prompt: prompt.to_string(),
            options: GenerationOptions::from_config(&Config::default(), 2048),
        }
    }

    #[tokio::test]
    async fn scripted_gateway_echoes_when_streaming() {
        let gateway = ScriptedGateway::replying(&["salom"]);
        let mut echo = Vec::new();
        let text = gateway
            .generate(request("hi"), Some(&mut echo))
            .await
            .expect("generate should succeed");
        assert_eq!(text, "salom");
        assert_eq!(echo, b"salom");
        assert_eq!(gateway.generations.borrow()[0].prompt, "hi");
    }

    #[tokio::test]
    async fn ollama_gateway_reports_unreachable_endpoint() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
        let addr = listener.local_addr().expect("address should be available");
        drop(listener);

        let cfg = Config {
            model_base_url: format!("http://{addr}"),
            ..Config::default()
        };
        let client = reqwest::Client::new();
        let gateway = OllamaGateway::new(&client, &cfg);

        let err = gateway
            .generate(request("ping"), None)
            .await
            .expect_err("closed port should fail");
        let msg = format!("{err:#}");
        assert!(msg.contains("/api/generate"), "unexpected message: {msg}");
        assert!(msg.contains("OLLAMA_HOST"), "unexpected message: {msg}");
    }
}
