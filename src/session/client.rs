use async_trait::async_trait;
use futures::{ Stream, StreamExt };
use log::{ error, info };
use reqwest::Client as HttpClient;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use url::Url;

use crate::models::chat::{ ChatRequest, ErrorBody, STREAM_ERROR_MARKER };
use crate::stream::Utf8Decoder;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0}")]
    Request(#[from] reqwest::Error),
    #[error("{message}")]
    Remote {
        status: u16,
        message: String,
    },
    #[error("Invalid conversation endpoint URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("{0}")]
    Stream(String),
}

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

#[async_trait]
pub trait ConversationBackend: Send + Sync {
    async fn open_stream(&self, request: &ChatRequest) -> Result<TokenStream, ChatError>;
}

#[derive(Clone, Debug)]
pub struct HttpConversationClient {
    http: HttpClient,
    url: Url,
}

impl HttpConversationClient {
    pub fn new(url: &str, timeout: Option<Duration>) -> Result<Self, ChatError> {
        let url = Url::parse(url)?;
        let mut builder = HttpClient::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
            url,
        })
    }
}

pub fn remote_error(status: u16, body: &str) -> ChatError {
    let message = serde_json
        ::from_str::<ErrorBody>(body)
        .ok()
        .map(|b| b.error)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| format!("request failed with status {}", status));
    ChatError::Remote { status, message }
}

/// Separates streamed text from the error trailer the relay appends after a
/// provider failure.
#[derive(Debug, Default)]
struct ErrorTrailer {
    error: Option<String>,
}

impl ErrorTrailer {
    fn push(&mut self, text: &str) -> String {
        if let Some(error) = &mut self.error {
            error.push_str(text);
            return String::new();
        }
        match text.find(STREAM_ERROR_MARKER) {
            Some(pos) => {
                self.error = Some(text[pos + STREAM_ERROR_MARKER.len_utf8()..].to_string());
                text[..pos].to_string()
            }
            None => text.to_string(),
        }
    }

    fn finish(self) -> Option<String> {
        self.error.map(|message| {
            let message = message.trim().to_string();
            if message.is_empty() { "The conversation service stopped responding".to_string() } else { message }
        })
    }
}

#[async_trait]
impl ConversationBackend for HttpConversationClient {
    async fn open_stream(&self, request: &ChatRequest) -> Result<TokenStream, ChatError> {
        info!("POST {} ({} messages)", self.url, request.messages.len());
        let resp = self.http.post(self.url.clone()).json(request).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let err = remote_error(status.as_u16(), &body);
            error!("Conversation request rejected: {}", err);
            return Err(err);
        }

        let (tx, rx) = mpsc::channel(32);
        let mut bytes = resp.bytes_stream();

        tokio::spawn(async move {
            let mut decoder = Utf8Decoder::new();
            let mut trailer = ErrorTrailer::default();
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(buf) => {
                        let text = trailer.push(&decoder.push(&buf));
                        if !text.is_empty() && tx.send(Ok(text)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(ChatError::Request(e))).await;
                        return;
                    }
                }
            }
            let rest = trailer.push(&decoder.finish());
            if !rest.is_empty() && tx.send(Ok(rest)).await.is_err() {
                return;
            }
            if let Some(message) = trailer.finish() {
                error!("Conversation stream ended with an error: {}", message);
                let _ = tx.send(Err(ChatError::Stream(message))).await;
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_prefers_json_message() {
        let err = remote_error(401, r#"{"error":"Invalid API key"}"#);
        assert_eq!(err.to_string(), "Invalid API key");
    }

    #[test]
    fn trailer_splits_text_from_error() {
        let mut trailer = ErrorTrailer::default();
        assert_eq!(trailer.push("Brady"), "Brady");
        assert_eq!(trailer.push("card\u{1e}model "), "card");
        assert_eq!(trailer.push("crashed"), "");
        assert_eq!(trailer.finish().as_deref(), Some("model crashed"));
    }

    #[test]
    fn clean_body_has_no_trailer() {
        let mut trailer = ErrorTrailer::default();
        assert_eq!(trailer.push("All good."), "All good.");
        assert_eq!(trailer.finish(), None);
    }

    #[test]
    fn remote_error_falls_back_to_status() {
        let err = remote_error(503, "Service Unavailable");
        assert_eq!(err.to_string(), "request failed with status 503");
        assert!(matches!(err, ChatError::Remote { status: 503, .. }));
    }
}
