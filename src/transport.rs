//! HTTP transport seam.
//!
//! The client only needs one operation from the network: issue a request with
//! a method, a URL and an optional JSON body, and hand back the status and the
//! body text. [`ReqwestTransport`] is the default implementation; tests and
//! embedders can plug in their own.

use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use thiserror::Error;

pub use reqwest::Method;

/// A single outbound request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportRequest {
    /// HTTP method.
    pub method: Method,
    /// Fully built URL including the query string.
    pub url: String,
    /// JSON body; sent with `Content-Type: application/json` when present.
    pub body: Option<String>,
}

/// Status and body text returned by the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Errors raised below the HTTP status line: DNS, TLS, connect, read.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("transport error: {0}")]
    Other(String),
}

/// Minimal async HTTP client used by [`crate::client::SmallBot`].
pub trait Transport: Send + Sync {
    /// Executes `request` and returns the raw response.
    fn execute(
        &self,
        request: TransportRequest,
    ) -> BoxFuture<'_, Result<TransportResponse, TransportError>>;
}

/// [`reqwest`]-backed [`Transport`].
///
/// Only the connect phase is bounded; long-poll requests are held open for as
/// long as the server decides.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    http: Client,
}

impl ReqwestTransport {
    pub fn new(connect_timeout: Duration) -> Result<Self, TransportError> {
        let http = Client::builder().connect_timeout(connect_timeout).build()?;
        Ok(Self { http })
    }

    /// Wraps an already configured client.
    pub fn from_client(http: Client) -> Self {
        Self { http }
    }
}

impl Transport for ReqwestTransport {
    fn execute(
        &self,
        request: TransportRequest,
    ) -> BoxFuture<'_, Result<TransportResponse, TransportError>> {
        let mut builder = self.http.request(request.method, &request.url);
        if let Some(body) = request.body {
            builder = builder.header(CONTENT_TYPE, "application/json").body(body);
        }

        async move {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let body = response.text().await?;
            Ok(TransportResponse { status, body })
        }
        .boxed()
    }
}
