use crate::domain::entities::{Headers, UploadFile};
use crate::domain::value_objects::HttpMethod;
use crate::shared::error::AppError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartBody {
    pub file_field: String,
    pub file: UploadFile,
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Empty,
    Text(String),
    Multipart(MultipartBody),
}

impl RequestBody {
    pub fn from_optional(body: Option<String>) -> Self {
        match body {
            Some(text) => RequestBody::Text(text),
            None => RequestBody::Empty,
        }
    }

    pub fn is_multipart(&self) -> bool {
        matches!(self, RequestBody::Multipart(_))
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub method: HttpMethod,
    pub headers: Headers,
    pub body: RequestBody,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The host could not be reached at all.
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("transport error: {0}")]
    Other(String),
}

impl From<TransportError> for AppError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout(after) => AppError::Timeout(format!("{after:?}")),
            TransportError::Connection(message) => AppError::Network(message),
            TransportError::Other(message) => AppError::Network(message),
        }
    }
}

/// One HTTP round trip. Non-2xx statuses are responses, not errors.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}
