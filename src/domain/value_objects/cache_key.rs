use super::HttpMethod;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(value: String) -> Result<Self, String> {
        Self::validate(&value)?;
        Ok(Self(value))
    }

    /// Key shared by the response cache and in-flight de-duplication.
    ///
    /// Url and body are length-prefixed so no two requests share a key;
    /// a missing body is `-`, distinct from an empty one.
    pub fn for_request(method: HttpMethod, url: &str, body: Option<&str>) -> Self {
        let body = match body {
            Some(body) => format!("{}:{body}", body.len()),
            None => "-".to_string(),
        };
        Self(format!("{}:{}:{url}:{body}", method.as_str(), url.len()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(value: &str) -> Result<(), String> {
        if value.trim().is_empty() {
            return Err("Cache key cannot be empty".to_string());
        }
        Ok(())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}
