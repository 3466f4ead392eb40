//! Minimal HTTP/1 JSON transport over hyper.
//!
//! One TCP connection per request, the whole round trip bounded by a
//! timeout. Only plain `http://` base URLs are supported.

use std::time::Duration;

use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE, HOST, USER_AGENT};
use http::{HeaderName, HeaderValue, Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{ClientError, TransportError};

const AGENT: &str = concat!("sparkscale/", env!("CARGO_PKG_VERSION"));

/// Longest response body excerpt carried in a `ClientError::Status`.
const MAX_ERROR_BODY: usize = 512;

/// A raw response: status plus the fully collected body.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl HttpResponse {
    /// Decode a 2xx body as JSON; non-2xx becomes `ClientError::Status`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        self.ensure_success()?;
        serde_json::from_slice(&self.body).map_err(|e| ClientError::Decode(e.to_string()))
    }

    pub fn ensure_success(&self) -> Result<(), ClientError> {
        if self.status.is_success() {
            return Ok(());
        }
        let mut body = String::from_utf8_lossy(&self.body).into_owned();
        if body.len() > MAX_ERROR_BODY {
            let mut end = MAX_ERROR_BODY;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            body.truncate(end);
        }
        Err(ClientError::Status {
            status: self.status.as_u16(),
            body,
        })
    }
}

/// HTTP client bound to one upstream base URL.
#[derive(Debug, Clone)]
pub struct HttpClient {
    /// `host:port` to connect to.
    address: String,
    /// Value of the `Host` header.
    authority: String,
    /// Path prefix from the base URL, without a trailing slash.
    base_path: String,
    timeout: Duration,
}

impl HttpClient {
    /// Create a client for `base_url` (e.g. `http://spark-master:8080`).
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let uri: Uri = base_url
            .trim()
            .parse()
            .map_err(|e| TransportError::InvalidUrl(format!("{base_url}: {e}")))?;

        match uri.scheme_str() {
            Some("http") => {}
            Some(other) => {
                return Err(TransportError::InvalidUrl(format!(
                    "{base_url}: unsupported scheme '{other}'"
                )));
            }
            None => {
                return Err(TransportError::InvalidUrl(format!("{base_url}: missing scheme")));
            }
        }

        let authority = uri
            .authority()
            .ok_or_else(|| TransportError::InvalidUrl(format!("{base_url}: missing host")))?;
        let port = authority.port_u16().unwrap_or(80);

        Ok(Self {
            address: format!("{}:{port}", authority.host()),
            authority: authority.as_str().to_string(),
            base_path: uri.path().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// The base URL this client talks to.
    pub fn base_url(&self) -> String {
        format!("http://{}{}", self.authority, self.base_path)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// GET `path` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        headers: &[(String, String)],
    ) -> Result<T, ClientError> {
        let resp = self.send(Method::GET, path, headers, None).await?;
        resp.json()
    }

    /// POST `body` as JSON to `path` and return the raw response.
    pub async fn post_json<B: Serialize>(
        &self,
        path: &str,
        headers: &[(String, String)],
        body: &B,
    ) -> Result<HttpResponse, ClientError> {
        let payload = serde_json::to_vec(body).map_err(|e| ClientError::Encode(e.to_string()))?;
        Ok(self
            .send(Method::POST, path, headers, Some(Bytes::from(payload)))
            .await?)
    }

    /// Perform one request, bounded by the client timeout.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        headers: &[(String, String)],
        body: Option<Bytes>,
    ) -> Result<HttpResponse, TransportError> {
        let target = format!("{}{}", self.base_path, path);

        match tokio::time::timeout(self.timeout, self.round_trip(method, &target, headers, body)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(address = %self.address, %target, "request timed out");
                Err(TransportError::Timeout(self.timeout))
            }
        }
    }

    async fn round_trip(
        &self,
        method: Method,
        target: &str,
        headers: &[(String, String)],
        body: Option<Bytes>,
    ) -> Result<HttpResponse, TransportError> {
        let req = self.build_request(method.clone(), target, headers, body)?;

        let stream = tokio::net::TcpStream::connect(self.address.as_str())
            .await
            .map_err(|e| TransportError::Connect(format!("{}: {e}", self.address)))?;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| TransportError::Request(format!("handshake with {}: {e}", self.address)))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "upstream connection closed with error");
            }
        });

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| TransportError::Request(format!("{method} {target}: {e}")))?;

        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))?
            .to_bytes();

        debug!(%method, %target, %status, bytes = body.len(), "upstream response");
        Ok(HttpResponse { status, body })
    }

    fn build_request(
        &self,
        method: Method,
        target: &str,
        headers: &[(String, String)],
        body: Option<Bytes>,
    ) -> Result<Request<Full<Bytes>>, TransportError> {
        let mut builder = Request::builder()
            .method(method.clone())
            .uri(target)
            .header(HOST, self.authority.as_str())
            .header(USER_AGENT, AGENT)
            .header(ACCEPT, "application/json");
        if body.is_some() {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder
            .body(Full::new(body.unwrap_or_default()))
            .map_err(|e| TransportError::InvalidRequest(format!("{method} {target}: {e}")))
    }
}

/// Check that `name: value` can be sent as an HTTP header.
pub fn validate_header(name: &str, value: &str) -> Result<(), TransportError> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| TransportError::InvalidRequest(format!("header name '{name}': {e}")))?;
    HeaderValue::from_str(value)
        .map_err(|e| TransportError::InvalidRequest(format!("header '{name}' value: {e}")))?;
    Ok(())
}
