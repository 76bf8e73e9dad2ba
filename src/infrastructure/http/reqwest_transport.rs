use crate::application::ports::{
    HttpRequest, HttpResponse, HttpTransport, MultipartBody, RequestBody, TransportError,
};
use crate::domain::entities::Headers;
use crate::domain::value_objects::HttpMethod;
use crate::shared::error::AppError;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::Method;
use std::time::Duration;

/// [`HttpTransport`] over a shared `reqwest::Client`.
///
/// Relative urls are resolved against `base_url` when one is configured.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|err| AppError::Configuration(err.to_string()))?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    fn resolve(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            return url.to_string();
        }
        match &self.base_url {
            Some(base) if url.starts_with('/') => format!("{base}{url}"),
            Some(base) => format!("{base}/{url}"),
            None => url.to_string(),
        }
    }
}

fn to_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

fn multipart_form(body: MultipartBody) -> Result<Form, TransportError> {
    let part = Part::bytes(body.file.bytes)
        .file_name(body.file.file_name)
        .mime_str(&body.file.mime_type)
        .map_err(|err| TransportError::Other(err.to_string()))?;

    let form = body
        .fields
        .into_iter()
        .fold(Form::new(), |form, (name, value)| form.text(name, value));
    Ok(form.part(body.file_field, part))
}

fn classify(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout)
    } else if err.is_connect() || err.is_request() {
        TransportError::Connection(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

fn has_content_type(headers: &Headers) -> bool {
    headers
        .keys()
        .any(|name| name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()))
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let timeout = request.timeout;
        let multipart = request.body.is_multipart();
        let mut builder = self
            .client
            .request(to_method(request.method), self.resolve(&request.url))
            .timeout(timeout);

        for (name, value) in &request.headers {
            // reqwest sets the multipart boundary itself
            if multipart && name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()) {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Text(text) => {
                if has_content_type(&request.headers) {
                    builder.body(text)
                } else {
                    builder.header(CONTENT_TYPE, "application/json").body(text)
                }
            }
            RequestBody::Multipart(body) => builder.multipart(multipart_form(body)?),
        };

        let response = builder
            .send()
            .await
            .map_err(|err| classify(err, timeout))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|err| classify(err, timeout))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
