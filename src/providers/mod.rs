mod http_errors;
pub mod ollama;
