use bytes::Bytes;
use streaming::{Transport, TransportError};

/// [`Transport`] over a shared reqwest client.
#[derive(Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn request_err(url: &str, e: reqwest::Error) -> TransportError {
    TransportError::Request {
        url: url.to_string(),
        reason: e.to_string(),
    }
}

impl Transport for ReqwestTransport {
    async fn get_body(&self, url: &str) -> Result<Bytes, TransportError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| request_err(url, e))?;
        if !resp.status().is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }
        resp.bytes().await.map_err(|e| request_err(url, e))
    }

    async fn get_header(&self, url: &str, name: &str) -> Result<Option<String>, TransportError> {
        let resp = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| request_err(url, e))?;
        if !resp.status().is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }
        Ok(resp
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string))
    }
}
