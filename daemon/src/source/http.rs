use reqwest::{Client, StatusCode};

use crate::handler::{HandlerError, SourceError};

/// Shared HTTP client used by every module instance.
pub fn client() -> Result<Client, HandlerError> {
    Client::builder()
        .user_agent(concat!("deckhand/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| HandlerError::Connection {
            backend: "http client",
            reason: e.to_string(),
        })
}

/// GET `url` and return the body. Anything but 200 is a query error.
pub async fn fetch(client: &Client, url: &str) -> Result<Vec<u8>, SourceError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| SourceError::Query(format!("GET {}: {}", url, e)))?;

    let status = response.status();
    if status != StatusCode::OK {
        return Err(SourceError::Query(format!("GET {}: status {}", url, status)));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| SourceError::Query(format!("GET {}: {}", url, e)))?;
    Ok(body.to_vec())
}

/// A URL serving a decodable image, such as a camera snapshot.
#[derive(Debug, Clone)]
pub struct HttpImage {
    client: Client,
    url: String,
}

impl HttpImage {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// Fetch the current image bytes. Decoding is left to the renderer.
    pub async fn fetch(&self) -> Result<Vec<u8>, SourceError> {
        fetch(&self.client, &self.url).await
    }
}
