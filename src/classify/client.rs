use async_trait::async_trait;
use log::info;
use reqwest::multipart::{ Form, Part };
use reqwest::Client as HttpClient;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::normalize::{ failed_batch, normalize_batch, transport_failure };
use crate::models::verdict::{ BatchVerdict, ClassList, HealthStatus };

#[derive(Debug, Error)]
pub enum InputError {
    #[error("No file selected")]
    NoFileSelected,
    #[error("Invalid file type for '{0}'. Please upload a CSV file")]
    NotCsv(String),
    #[error("Failed to read '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{0}")]
    Request(#[from] reqwest::Error),
    #[error("Invalid classification service URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("{0}")]
    Other(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct CsvUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl CsvUpload {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Result<Self, InputError> {
        let filename = filename.into();
        if !is_csv(&filename) {
            return Err(InputError::NotCsv(filename));
        }
        Ok(Self { filename, bytes })
    }

    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, InputError> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or(InputError::NoFileSelected)?;
        if !is_csv(&filename) {
            return Err(InputError::NotCsv(filename));
        }
        let bytes = tokio::fs::read(path).await.map_err(|source| InputError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self { filename, bytes })
    }

    fn part(&self) -> Result<Part, reqwest::Error> {
        Part::bytes(self.bytes.clone()).file_name(self.filename.clone()).mime_str("text/csv")
    }
}

pub fn is_csv(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}

#[derive(Clone, Debug, PartialEq)]
pub struct RawReply {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait ClassificationBackend: Send + Sync {
    async fn predict(&self, upload: &CsvUpload) -> Result<RawReply, TransportError>;
}

#[derive(Clone, Debug)]
pub struct HttpClassifier {
    http: HttpClient,
    base_url: Url,
}

impl HttpClassifier {
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self, TransportError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let mut builder = HttpClient::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
            base_url: base,
        })
    }

    fn endpoint(&self, route: &str) -> Result<Url, TransportError> {
        Ok(self.base_url.join(route.trim_start_matches('/'))?)
    }

    pub async fn health(&self) -> Result<HealthStatus, TransportError> {
        let url = self.endpoint("health")?;
        let resp = self.http.get(url).send().await?.error_for_status()?;
        Ok(resp.json::<HealthStatus>().await?)
    }

    pub async fn classes(&self) -> Result<ClassList, TransportError> {
        let url = self.endpoint("classes")?;
        let resp = self.http.get(url).send().await?.error_for_status()?;
        Ok(resp.json::<ClassList>().await?)
    }

    /// Submits several files in one request. Never fails: transport errors
    /// become one error verdict per file.
    pub async fn predict_batch(&self, uploads: &[CsvUpload]) -> BatchVerdict {
        let filenames: Vec<String> = uploads.iter().map(|u| u.filename.clone()).collect();
        info!("Submitting batch of {} files", uploads.len());
        match self.send_batch(uploads).await {
            Ok(reply) => normalize_batch(reply.status, &reply.body, &filenames),
            Err(e) => failed_batch(&transport_failure(&e, None), &filenames),
        }
    }

    async fn send_batch(&self, uploads: &[CsvUpload]) -> Result<RawReply, TransportError> {
        let url = self.endpoint("predict_batch")?;
        let mut form = Form::new();
        for upload in uploads {
            form = form.part("files", upload.part()?);
        }
        let resp = self.http.post(url).multipart(form).send().await?;
        read_reply(resp).await
    }
}

async fn read_reply(resp: reqwest::Response) -> Result<RawReply, TransportError> {
    let status = resp.status().as_u16();
    let body = resp.text().await?;
    Ok(RawReply { status, body })
}

#[async_trait]
impl ClassificationBackend for HttpClassifier {
    async fn predict(&self, upload: &CsvUpload) -> Result<RawReply, TransportError> {
        let url = self.endpoint("predict")?;
        let form = Form::new().part("file", upload.part()?);
        info!("POST {} ({}, {} bytes)", url, upload.filename, upload.bytes.len());
        let resp = self.http.post(url).multipart(form).send().await?;
        read_reply(resp).await
    }
}
