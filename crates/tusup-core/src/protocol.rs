//! tus 1.0.0 wire driver
//!
//! Implements the three protocol exchanges an upload needs: resource
//! creation (POST), offset query (HEAD) and chunked append (PATCH).
//! Network I/O only; the session owns all local state mutation.

use crate::error::TusError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use reqwest::{header::HeaderMap, Client, Response, StatusCode};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const TUS_VERSION: &str = "1.0.0";

/// The protocol exchanges a session drives.
///
/// Behind a trait so sessions can be exercised against a scripted driver
/// in tests.
#[async_trait]
pub trait ProtocolDriver: Send + Sync {
    /// Create the remote upload resource. Returns its location URL.
    async fn create_resource(
        &self,
        size: u64,
        metadata: &HashMap<String, String>,
        headers: &HashMap<String, String>,
    ) -> Result<String, TusError>;

    /// Ask the server for the confirmed offset of an existing resource.
    async fn query_offset(
        &self,
        resource_url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<u64, TusError>;

    /// Append one chunk at `offset`. Returns the new confirmed offset.
    async fn append_chunk(
        &self,
        resource_url: &str,
        offset: u64,
        chunk: Bytes,
        headers: &HashMap<String, String>,
    ) -> Result<u64, TusError>;
}

/// reqwest-backed tus driver bound to one endpoint.
#[derive(Debug, Clone)]
pub struct TusProtocol {
    client: Client,
    endpoint: Url,
}

impl TusProtocol {
    pub fn new(endpoint: &str, request_timeout: Duration) -> Result<Self, TusError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|_| TusError::InvalidEndpoint(endpoint.to_string()))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(TusError::InvalidEndpoint(endpoint.to_string()));
        }

        let client = Client::builder()
            .user_agent("tusup/0.1.0")
            .connect_timeout(Duration::from_secs(30))
            .timeout(request_timeout)
            .build()
            .map_err(|e| TusError::NetworkFailure(e.to_string()))?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn apply_custom_headers(
        mut req: reqwest::RequestBuilder,
        headers: &HashMap<String, String>,
    ) -> reqwest::RequestBuilder {
        for (name, value) in headers {
            req = req.header(name, value);
        }
        req
    }
}

#[async_trait]
impl ProtocolDriver for TusProtocol {
    async fn create_resource(
        &self,
        size: u64,
        metadata: &HashMap<String, String>,
        headers: &HashMap<String, String>,
    ) -> Result<String, TusError> {
        let mut req = self
            .client
            .post(self.endpoint.clone())
            .header("Tus-Resumable", TUS_VERSION)
            .header("Upload-Length", size)
            .header("Content-Length", 0u64);

        if !metadata.is_empty() {
            req = req.header("Upload-Metadata", encode_metadata(metadata));
        }
        req = Self::apply_custom_headers(req, headers);

        let response = req.send().await?;
        let status = response.status();
        debug!(%status, "create resource response");

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(TusError::AuthRequired);
        }
        if !status.is_success() {
            return Err(server_rejected(response).await);
        }

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| TusError::ServerRejected {
                status: status.as_u16(),
                message: "creation response missing Location header".into(),
            })?;

        let resolved = resolve_location(&self.endpoint, location)?;
        Ok(resolved.to_string())
    }

    async fn query_offset(
        &self,
        resource_url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<u64, TusError> {
        let req = self
            .client
            .head(resource_url)
            .header("Tus-Resumable", TUS_VERSION);
        let req = Self::apply_custom_headers(req, headers);

        let response = req.send().await?;
        let status = response.status();
        debug!(%status, resource_url, "offset query response");

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(TusError::AuthRequired)
            }
            StatusCode::NOT_FOUND | StatusCode::GONE => return Err(TusError::ResourceGone),
            s if !s.is_success() => return Err(server_rejected(response).await),
            _ => {}
        }

        parse_upload_offset(response.headers()).ok_or_else(|| TusError::ServerRejected {
            status: status.as_u16(),
            message: "offset query response missing Upload-Offset header".into(),
        })
    }

    async fn append_chunk(
        &self,
        resource_url: &str,
        offset: u64,
        chunk: Bytes,
        headers: &HashMap<String, String>,
    ) -> Result<u64, TusError> {
        let req = self
            .client
            .patch(resource_url)
            .header("Tus-Resumable", TUS_VERSION)
            .header("Upload-Offset", offset)
            .header(reqwest::header::CONTENT_TYPE, "application/offset+octet-stream")
            .body(chunk);
        let req = Self::apply_custom_headers(req, headers);

        let response = req.send().await?;
        let status = response.status();
        debug!(%status, offset, "append chunk response");

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(TusError::AuthRequired)
            }
            StatusCode::CONFLICT => return Err(TusError::OffsetMismatch { local: offset }),
            StatusCode::NOT_FOUND | StatusCode::GONE => return Err(TusError::ResourceGone),
            s if !s.is_success() => return Err(server_rejected(response).await),
            _ => {}
        }

        parse_upload_offset(response.headers()).ok_or_else(|| TusError::ServerRejected {
            status: status.as_u16(),
            message: "append response missing Upload-Offset header".into(),
        })
    }
}

async fn server_rejected(response: Response) -> TusError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    TusError::ServerRejected {
        status,
        message: if message.is_empty() {
            "no message from server".into()
        } else {
            message
        },
    }
}

fn parse_upload_offset(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("Upload-Offset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// `Upload-Metadata`: comma-separated `key base64(value)` pairs.
fn encode_metadata(metadata: &HashMap<String, String>) -> String {
    let mut pairs: Vec<_> = metadata.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    pairs
        .into_iter()
        .map(|(k, v)| {
            if v.is_empty() {
                k.clone()
            } else {
                format!("{} {}", k, BASE64.encode(v))
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// The Location header may be relative to the creation endpoint.
fn resolve_location(endpoint: &Url, location: &str) -> Result<Url, TusError> {
    endpoint
        .join(location)
        .map_err(|_| TusError::InvalidEndpoint(location.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_encoding() {
        let mut metadata = HashMap::new();
        metadata.insert("filename".to_string(), "cat.jpg".to_string());
        metadata.insert("filetype".to_string(), "image/jpeg".to_string());

        let encoded = encode_metadata(&metadata);
        assert_eq!(
            encoded,
            format!(
                "filename {},filetype {}",
                BASE64.encode("cat.jpg"),
                BASE64.encode("image/jpeg")
            )
        );
    }

    #[test]
    fn metadata_empty_value_has_no_encoding() {
        let mut metadata = HashMap::new();
        metadata.insert("is_confidential".to_string(), String::new());
        assert_eq!(encode_metadata(&metadata), "is_confidential");
    }

    #[test]
    fn location_resolution() {
        let endpoint = Url::parse("https://tus.example.com/files/").unwrap();

        let abs = resolve_location(&endpoint, "https://tus.example.com/files/abc123").unwrap();
        assert_eq!(abs.as_str(), "https://tus.example.com/files/abc123");

        let rel = resolve_location(&endpoint, "abc123").unwrap();
        assert_eq!(rel.as_str(), "https://tus.example.com/files/abc123");

        let rooted = resolve_location(&endpoint, "/files/abc123").unwrap();
        assert_eq!(rooted.as_str(), "https://tus.example.com/files/abc123");
    }

    #[test]
    fn rejects_non_http_endpoint() {
        assert!(matches!(
            TusProtocol::new("ftp://example.com/files", Duration::from_secs(1)),
            Err(TusError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            TusProtocol::new("not a url", Duration::from_secs(1)),
            Err(TusError::InvalidEndpoint(_))
        ));
    }
}
