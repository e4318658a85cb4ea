pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use futures::{ Stream, StreamExt };
use log::{ error, warn };
use reqwest::Client as HttpClient;
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{ LlmConfig, LlmType };
use self::ollama::OllamaClient;
use self::openai::OpenAIChatClient;
use crate::models::chat::WireMessage;
use crate::stream::{ LineBuffer, Utf8Decoder };

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0} API key is not configured")]
    MissingApiKey(&'static str),
    #[error("Invalid API key format: {0}")]
    InvalidApiKey(String),
    #[error("{0}")]
    Request(#[from] reqwest::Error),
    #[error("{message}")]
    Upstream {
        status: u16,
        message: String,
    },
}

pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String, RelayError>> + Send>>;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProviderMessage {
    pub role: String,
    pub content: String,
}

pub fn provider_messages(system_message: &str, messages: &[WireMessage]) -> Vec<ProviderMessage> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    if !system_message.trim().is_empty() {
        out.push(ProviderMessage {
            role: "system".to_string(),
            content: system_message.to_string(),
        });
    }
    out.extend(
        messages.iter().map(|m| ProviderMessage {
            role: m.role.as_str().to_string(),
            content: m.content.clone(),
        })
    );
    out
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Opens a streaming completion. Errors returned here happened before any
    /// output was produced.
    async fn stream_chat(&self, messages: Vec<ProviderMessage>) -> Result<ChatStream, RelayError>;

    fn get_model(&self) -> String;
    fn get_base_url(&self) -> Option<String>;
}

pub fn new_client(config: &LlmConfig) -> Result<Arc<dyn ChatClient>, RelayError> {
    let client: Arc<dyn ChatClient> = match config.llm_type {
        LlmType::Ollama => {
            let specific_client = OllamaClient::from_config(config)?;
            Arc::new(specific_client)
        }
        LlmType::OpenAI => {
            let specific_client = OpenAIChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
    };
    Ok(client)
}

pub fn upstream_error(status: u16, body: &str) -> RelayError {
    let message = serde_json
        ::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            let err = v.get("error")?;
            err.as_str()
                .map(str::to_string)
                .or_else(|| err.get("message").and_then(|m| m.as_str()).map(str::to_string))
        })
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| format!("LLM provider returned status {}", status));
    RelayError::Upstream { status, message }
}

#[derive(Debug, PartialEq)]
pub enum StreamLine {
    Token(String),
    Skip,
    Error(String),
}

/// Posts `payload` and streams the tokens `line_parser` extracts from each
/// complete line of the response body. An error line ends the stream with
/// `RelayError::Upstream`.
pub async fn http_stream_generate(
    http: &HttpClient,
    url: &str,
    payload: impl Serialize + Send,
    line_parser: fn(&str) -> StreamLine,
    headers: Option<Vec<(String, String)>>
) -> Result<ChatStream, RelayError> {
    let mut req = http.post(url).json(&payload);
    if let Some(header_list) = headers {
        for (name, value) in header_list {
            req = req.header(name, value);
        }
    }

    let resp = req.send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        let err = upstream_error(status.as_u16(), &body);
        error!("LLM provider rejected request: {}", err);
        return Err(err);
    }

    let (tx, rx) = mpsc::channel(32);
    let mut bytes = resp.bytes_stream();
    let status = status.as_u16();

    tokio::spawn(async move {
        let mut decoder = Utf8Decoder::new();
        let mut lines = LineBuffer::new();
        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(buf) => {
                    for line in lines.push(&decoder.push(&buf)) {
                        if !forward_line(&tx, status, line_parser(&line)).await {
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!("LLM provider stream interrupted: {}", e);
                    let _ = tx.send(Err(RelayError::Request(e))).await;
                    return;
                }
            }
        }
        let tail = decoder.finish();
        let mut rest = lines.push(&tail);
        rest.extend(lines.finish());
        for line in rest {
            if !forward_line(&tx, status, line_parser(&line)).await {
                return;
            }
        }
    });

    Ok(Box::pin(ReceiverStream::new(rx)))
}

// false once the stream should stop.
async fn forward_line(
    tx: &mpsc::Sender<Result<String, RelayError>>,
    status: u16,
    line: StreamLine
) -> bool {
    match line {
        StreamLine::Token(tok) => tx.send(Ok(tok)).await.is_ok(),
        StreamLine::Skip => true,
        StreamLine::Error(message) => {
            warn!("LLM provider reported an error mid-stream: {}", message);
            let _ = tx.send(Err(RelayError::Upstream { status, message })).await;
            false
        }
    }
}
