//! The inbound request as the resolver sees it.
use axum::body::Body as AxumBody;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, Uri, header::IntoHeaderName};
use tokio_util::sync::CancellationToken;

/// A body buffered once so it can be handed to middleware and later to the
/// final handler.
#[derive(Debug, Clone, Default)]
pub struct ReplayableBody(Bytes);

impl ReplayableBody {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Buffer `body`, failing when it exceeds `limit` bytes.
    pub async fn buffer(body: AxumBody, limit: usize) -> Result<Self, axum::Error> {
        axum::body::to_bytes(body, limit).await.map(Self)
    }

    /// A fresh body stream over the buffered bytes.
    pub fn replay(&self) -> AxumBody {
        AxumBody::from(self.0.clone())
    }

    pub fn bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Bytes> for ReplayableBody {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<&'static str> for ReplayableBody {
    fn from(text: &'static str) -> Self {
        Self(Bytes::from_static(text.as_bytes()))
    }
}

/// Connection metadata captured by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// TLS was terminated for this connection.
    pub encrypted: bool,
    /// Port the server is listening on, used when no host is trusted.
    pub local_port: Option<u16>,
}

/// One request to resolve.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    /// Raw request target: path and query as received.
    pub target: String,
    pub headers: HeaderMap,
    pub body: ReplayableBody,
    pub connection: ConnectionInfo,
    /// Cancelled when the inbound connection goes away.
    pub cancellation: CancellationToken,
}

impl InboundRequest {
    /// A `GET` for `target` with no headers.
    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::GET, target)
    }

    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: HeaderMap::new(),
            body: ReplayableBody::empty(),
            connection: ConnectionInfo::default(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Build from an `http::Uri`; only the path and query are kept.
    pub fn from_uri(method: Method, uri: &Uri) -> Self {
        let target = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        Self::new(method, target)
    }

    /// Add a header; invalid values are ignored.
    pub fn header<K: IntoHeaderName>(mut self, key: K, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.append(key, value);
        }
        self
    }

    pub fn body(mut self, body: impl Into<ReplayableBody>) -> Self {
        self.body = body.into();
        self
    }

    pub fn encrypted(mut self, encrypted: bool) -> Self {
        self.connection.encrypted = encrypted;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;

    #[tokio::test]
    async fn replayable_body_can_be_read_twice() {
        let body = ReplayableBody::buffer(AxumBody::from("payload"), 1024)
            .await
            .unwrap();
        let first = body.replay().collect().await.unwrap().to_bytes();
        let second = body.replay().collect().await.unwrap().to_bytes();
        assert_eq!(first, "payload");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let result = ReplayableBody::buffer(AxumBody::from("0123456789"), 4).await;
        assert!(result.is_err());
    }

    #[test]
    fn from_uri_keeps_path_and_query() {
        let uri: Uri = "http://example.com/a/b?x=1".parse().unwrap();
        let request = InboundRequest::from_uri(Method::GET, &uri);
        assert_eq!(request.target, "/a/b?x=1");
    }
}
