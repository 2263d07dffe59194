//! HTTP wire mapping for the remote adaptor.
//!
//! The record version travels in the `ETag` header as a decimal integer;
//! the last-modified time in the `Last-Modified` header as an RFC1123
//! date. Mutations and reads carry `If-None-Match: <expected_version>`
//! for the optimistic-lock check. Status codes 404, 409 and 410 map to
//! `NotFound`, `Conflict` and `Tombstone`.
//!
//! The actual HTTP client is abstracted behind [`HttpClient`] so different
//! libraries (or an in-process loopback for tests) can provide transport.

use crate::adaptor::{RemoteAdaptor, RemoteHead, RemoteKeyInfo, RemoteKeyState};
use crate::error::{RemoteError, RemoteStatus};
use crate::keylist::decode_key_list;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tracing::debug;

/// A bare HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method (`GET`, `HEAD`, `PUT`, `DELETE`).
    pub method: &'static str,
    /// Request path, starting with `/`.
    pub path: String,
    /// Request headers.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Vec<u8>,
}

impl HttpRequest {
    fn new(method: &'static str, path: String) -> Self {
        Self {
            method,
            path,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_owned(), value.into()));
        self
    }
}

/// A bare HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Returns a header value by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The record version carried in the `ETag` header.
    #[must_use]
    pub fn kv_version(&self) -> Option<u64> {
        self.header("ETag").and_then(|v| v.parse().ok())
    }

    /// The last-modified time carried in the `Last-Modified` header.
    #[must_use]
    pub fn kv_timestamp_ms(&self) -> Option<u64> {
        self.header("Last-Modified").and_then(parse_rfc1123_ms)
    }

    /// The remote status implied by the HTTP status code.
    #[must_use]
    pub fn kv_status(&self) -> RemoteStatus {
        RemoteStatus::from_http_status(self.status)
    }
}

/// HTTP client abstraction.
///
/// Implement this to provide the actual transport (reqwest, hyper, ureq)
/// or an in-process loopback for tests. Errors are opaque strings; the
/// adaptor maps them all to [`RemoteError::Unknown`].
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Executes a request against the service and returns its response.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, String>;
}

/// Formats a millisecond epoch timestamp as an RFC1123 date.
#[must_use]
pub fn format_rfc1123_ms(timestamp_ms: u64) -> String {
    let dt = Utc
        .timestamp_millis_opt(timestamp_ms as i64)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH);
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parses an RFC1123 date into a millisecond epoch timestamp.
#[must_use]
pub fn parse_rfc1123_ms(value: &str) -> Option<u64> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.timestamp_millis().max(0) as u64)
}

/// A [`RemoteAdaptor`] speaking the HTTP wire protocol.
pub struct HttpRemote<C: HttpClient> {
    client: C,
}

impl<C: HttpClient> HttpRemote<C> {
    /// Creates an adaptor over the given client.
    pub fn new(client: C) -> Self {
        Self { client }
    }

    fn key_path(key: &str) -> String {
        format!("/kv/1/{key}")
    }

    /// Interprets a response's version headers, or `Unknown` when the
    /// server did not send them.
    fn head_of(response: &HttpResponse) -> Result<RemoteHead, RemoteError> {
        match (response.kv_version(), response.kv_timestamp_ms()) {
            (Some(version), Some(timestamp_ms)) => Ok(RemoteHead {
                version,
                timestamp_ms,
            }),
            _ => Err(RemoteError::Unknown),
        }
    }

    fn check_status(response: &HttpResponse) -> Result<(), RemoteError> {
        match response.kv_status().as_error() {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}

#[async_trait]
impl<C: HttpClient> RemoteAdaptor for HttpRemote<C> {
    async fn ver(&self, key: &str) -> RemoteKeyState {
        let request = HttpRequest::new("HEAD", Self::key_path(key));
        let response = match self.client.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!(key, error = %e, "HEAD failed");
                return RemoteKeyState::unknown();
            }
        };

        match Self::head_of(&response) {
            Ok(head) => RemoteKeyState {
                version: head.version,
                timestamp_ms: head.timestamp_ms,
                status: response.kv_status(),
            },
            Err(_) => RemoteKeyState::unknown(),
        }
    }

    async fn put(
        &self,
        key: &str,
        value: &[u8],
        expected_version: u64,
    ) -> Result<RemoteHead, RemoteError> {
        let request = HttpRequest::new("PUT", Self::key_path(key))
            .header("If-None-Match", expected_version.to_string())
            .header("Content-Type", "application/octet-stream")
            .header("Content-Length", value.len().to_string());
        let request = HttpRequest {
            body: value.to_vec(),
            ..request
        };

        let response = self.client.execute(request).await.map_err(|e| {
            debug!(key, error = %e, "PUT failed");
            RemoteError::Unknown
        })?;

        Self::check_status(&response)?;
        Self::head_of(&response)
    }

    async fn del(&self, key: &str, expected_version: u64) -> Result<RemoteHead, RemoteError> {
        let request = HttpRequest::new("DELETE", Self::key_path(key))
            .header("If-None-Match", expected_version.to_string());

        let response = self.client.execute(request).await.map_err(|e| {
            debug!(key, error = %e, "DELETE failed");
            RemoteError::Unknown
        })?;

        Self::check_status(&response)?;
        Self::head_of(&response)
    }

    async fn get(
        &self,
        key: &str,
        expected_version: u64,
    ) -> Result<(RemoteHead, Vec<u8>), RemoteError> {
        let request = HttpRequest::new("GET", Self::key_path(key))
            .header("If-None-Match", expected_version.to_string());

        let response = self.client.execute(request).await.map_err(|e| {
            debug!(key, error = %e, "GET failed");
            RemoteError::Unknown
        })?;

        Self::check_status(&response)?;
        let head = Self::head_of(&response)?;
        Ok((head, response.body))
    }

    async fn keys(&self) -> Result<Vec<RemoteKeyInfo>, RemoteError> {
        let request = HttpRequest::new("GET", "/kv/_all_keys".to_owned());

        let response = self.client.execute(request).await.map_err(|e| {
            debug!(error = %e, "KEYS failed");
            RemoteError::Unknown
        })?;

        if response.status != 200 {
            return Err(RemoteError::Unknown);
        }

        decode_key_list(&response.body).map_err(|e| {
            debug!(error = %e, "key listing decode failed");
            RemoteError::Unknown
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keylist::encode_key_list;
    use parking_lot::Mutex;

    /// Records requests and replays canned responses.
    struct ScriptedClient {
        responses: Mutex<Vec<HttpResponse>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<HttpResponse>) -> Self {
            Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().clone()
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedClient {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, String> {
            self.requests.lock().push(request);
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                return Err("no scripted response".into());
            }
            Ok(responses.remove(0))
        }
    }

    fn ok_response(version: u64, timestamp_ms: u64, body: Vec<u8>) -> HttpResponse {
        HttpResponse {
            status: 200,
            headers: vec![
                ("ETag".into(), version.to_string()),
                ("Last-Modified".into(), format_rfc1123_ms(timestamp_ms)),
            ],
            body,
        }
    }

    #[test]
    fn rfc1123_roundtrip() {
        let ms = 1_700_000_000_000u64;
        let formatted = format_rfc1123_ms(ms);
        assert!(formatted.ends_with("GMT"));
        assert_eq!(parse_rfc1123_ms(&formatted), Some(ms));
    }

    #[test]
    fn rfc1123_known_date() {
        assert_eq!(
            parse_rfc1123_ms("Sun, 06 Nov 1994 08:49:37 GMT"),
            Some(784_111_777_000)
        );
        assert_eq!(format_rfc1123_ms(784_111_777_000), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[tokio::test]
    async fn ver_maps_headers_and_status() {
        let client = ScriptedClient::new(vec![HttpResponse {
            status: 410,
            headers: vec![
                ("etag".into(), "7".into()),
                ("last-modified".into(), format_rfc1123_ms(5000)),
            ],
            body: Vec::new(),
        }]);
        let remote = HttpRemote::new(client);

        let state = remote.ver("hello").await;
        assert_eq!(state.version, 7);
        assert_eq!(state.timestamp_ms, 5000);
        assert_eq!(state.status, RemoteStatus::Tombstone);

        let requests = remote.client.requests();
        assert_eq!(requests[0].method, "HEAD");
        assert_eq!(requests[0].path, "/kv/1/hello");
    }

    #[tokio::test]
    async fn ver_without_headers_is_unknown() {
        let client = ScriptedClient::new(vec![HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: Vec::new(),
        }]);
        let remote = HttpRemote::new(client);
        assert_eq!(remote.ver("hello").await, RemoteKeyState::unknown());
    }

    #[tokio::test]
    async fn put_sends_lock_headers_and_body() {
        let client = ScriptedClient::new(vec![ok_response(2, 9000, Vec::new())]);
        let remote = HttpRemote::new(client);

        let head = remote.put("hello", &[1, 2, 3], 1).await.unwrap();
        assert_eq!(head.version, 2);
        assert_eq!(head.timestamp_ms, 9000);

        let requests = remote.client.requests();
        let request = &requests[0];
        assert_eq!(request.method, "PUT");
        assert_eq!(request.path, "/kv/1/hello");
        assert_eq!(request.body, vec![1, 2, 3]);

        let headers: Vec<_> = request
            .headers
            .iter()
            .map(|(n, v)| (n.as_str(), v.as_str()))
            .collect();
        assert!(headers.contains(&("If-None-Match", "1")));
        assert!(headers.contains(&("Content-Type", "application/octet-stream")));
        assert!(headers.contains(&("Content-Length", "3")));
    }

    #[tokio::test]
    async fn conflict_status_is_reported() {
        let client = ScriptedClient::new(vec![HttpResponse {
            status: 409,
            headers: Vec::new(),
            body: Vec::new(),
        }]);
        let remote = HttpRemote::new(client);
        assert_eq!(
            remote.put("hello", &[1], 1).await.unwrap_err(),
            RemoteError::Conflict
        );
    }

    #[tokio::test]
    async fn del_maps_not_found() {
        let client = ScriptedClient::new(vec![HttpResponse {
            status: 404,
            headers: Vec::new(),
            body: Vec::new(),
        }]);
        let remote = HttpRemote::new(client);
        assert_eq!(
            remote.del("hello", 3).await.unwrap_err(),
            RemoteError::NotFound
        );

        let requests = remote.client.requests();
        assert_eq!(requests[0].method, "DELETE");
        assert_eq!(requests[0].headers[0], ("If-None-Match".into(), "3".into()));
    }

    #[tokio::test]
    async fn get_returns_head_and_body() {
        let client = ScriptedClient::new(vec![ok_response(4, 1234000, vec![0xAB])]);
        let remote = HttpRemote::new(client);

        let (head, body) = remote.get("hello", 4).await.unwrap();
        assert_eq!(head.version, 4);
        assert_eq!(body, vec![0xAB]);
    }

    #[tokio::test]
    async fn keys_decodes_listing() {
        let listing = vec![
            RemoteKeyInfo {
                key: "hello".into(),
                version: 1,
                timestamp_ms: 1000,
                status: RemoteStatus::Ok,
            },
            RemoteKeyInfo {
                key: "removed".into(),
                version: 2,
                timestamp_ms: 2000,
                status: RemoteStatus::Tombstone,
            },
        ];
        let client = ScriptedClient::new(vec![HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: encode_key_list(&listing).unwrap(),
        }]);
        let remote = HttpRemote::new(client);

        let decoded = remote.keys().await.unwrap();
        assert_eq!(decoded, listing);

        let requests = remote.client.requests();
        assert_eq!(requests[0].path, "/kv/_all_keys");
    }

    #[tokio::test]
    async fn transport_error_is_unknown() {
        let client = ScriptedClient::new(Vec::new());
        let remote = HttpRemote::new(client);

        assert_eq!(remote.ver("hello").await.status, RemoteStatus::Unknown);
        assert_eq!(
            remote.put("hello", &[], 1).await.unwrap_err(),
            RemoteError::Unknown
        );
        assert_eq!(remote.keys().await.unwrap_err(), RemoteError::Unknown);
    }
}
