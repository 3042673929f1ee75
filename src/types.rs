//! Snapshot types for captured HTTP requests and responses.
//!
//! A snapshot is built once per request or response and serialized straight to JSON. Field
//! order in the serialized object follows the declaration order of each struct.

use axum::extract::ConnectInfo;
use axum::http::{header, request, HeaderMap, StatusCode, Uri};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;

/// Sender reported when the host did not expose the peer address.
pub const UNKNOWN_SENDER: &str = "unknown";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Category attached to an emitted record.
///
/// The same name doubles as the message prefix label (`REQUEST: ...`) unless prefixes are
/// disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    Request,
    Response,
}

impl Marker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Marker::Request => "REQUEST",
            Marker::Response => "RESPONSE",
        }
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data captured from an HTTP request.
///
/// # Examples
///
/// ```rust
/// use axum::http::Request;
/// use logging_filter::types::RequestSnapshot;
///
/// let (parts, ()) = Request::get("http://localhost:8080/test?param1=1000")
///     .header("Accept", "application/json")
///     .body(())
///     .unwrap()
///     .into_parts();
///
/// let snapshot = RequestSnapshot::from_parts(&parts, Some(b"hello"));
/// assert_eq!(snapshot.path, "http://localhost:8080/test");
/// assert_eq!(snapshot.params["param1"], "1000");
/// assert_eq!(snapshot.headers["Accept"], "application/json");
/// assert_eq!(snapshot.body.as_deref(), Some("hello"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestSnapshot {
    /// Peer IP address, or [`UNKNOWN_SENDER`]
    pub sender: String,
    /// HTTP method (GET, POST, etc.)
    pub method: String,
    /// Request URL without the query string
    pub path: String,
    /// Query and form parameters; the last value wins on duplicate names
    pub params: BTreeMap<String, String>,
    /// Request headers keyed by canonical name; the first value wins on repeated headers
    pub headers: BTreeMap<String, String>,
    /// Decoded request body, absent when it was not read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl RequestSnapshot {
    /// Build a snapshot from the request head and, if it was read, the request payload.
    pub fn from_parts(parts: &request::Parts, body: Option<&[u8]>) -> Self {
        Self {
            sender: sender(parts),
            method: parts.method.to_string(),
            path: request_url(&parts.uri, &parts.headers),
            params: params(&parts.uri, &parts.headers, body),
            headers: header_map(&parts.headers),
            body: body.map(decode_body),
        }
    }
}

/// Data captured from an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseSnapshot {
    /// HTTP status code (200, 404, 500, etc.)
    pub status: u16,
    /// Response headers keyed by canonical name
    pub headers: BTreeMap<String, String>,
    /// Decoded response body, absent when response capture is disabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl ResponseSnapshot {
    pub fn new(status: StatusCode, headers: BTreeMap<String, String>, body: Option<&[u8]>) -> Self {
        Self {
            status: status.as_u16(),
            headers,
            body: body.map(decode_body),
        }
    }
}

/// Collapse a header map to one value per name.
///
/// Names are rendered in canonical form (`content-type` becomes `Content-Type`) and only the
/// first value of a repeated header is kept.
pub fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .keys()
        .filter_map(|name| {
            let value = headers.get(name)?;
            Some((
                canonical_header_name(name.as_str()),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            ))
        })
        .collect()
}

/// Registered header names whose usual spelling is not plain Title-Case.
const IRREGULAR_HEADER_NAMES: &[&str] = &[
    "Content-MD5",
    "DNT",
    "ETag",
    "TE",
    "WWW-Authenticate",
    "X-XSS-Protection",
];

/// Title-case every dash separated segment of a header name.
///
/// A few registered names keep their usual spelling (`etag` becomes `ETag`). Any other name
/// with acronym segments is title-cased too, so `x-api-id` is rendered as `X-Api-Id`.
pub fn canonical_header_name(name: &str) -> String {
    if let Some(irregular) = IRREGULAR_HEADER_NAMES
        .iter()
        .find(|known| known.eq_ignore_ascii_case(name))
    {
        return (*irregular).to_string();
    }

    name.split('-')
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join("-")
}

fn decode_body(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn sender(parts: &request::Parts) -> String {
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_SENDER.to_string())
}

/// Reconstruct the URL the client asked for, without the query string.
fn request_url(uri: &Uri, headers: &HeaderMap) -> String {
    if let (Some(scheme), Some(authority)) = (uri.scheme_str(), uri.authority()) {
        return format!("{scheme}://{authority}{}", uri.path());
    }

    match headers.get(header::HOST).and_then(|host| host.to_str().ok()) {
        Some(host) => format!("http://{host}{}", uri.path()),
        None => uri.path().to_string(),
    }
}

fn params(uri: &Uri, headers: &HeaderMap, body: Option<&[u8]>) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();

    if let Some(query) = uri.query() {
        params.extend(url::form_urlencoded::parse(query.as_bytes()).into_owned());
    }

    let is_form = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim_start().starts_with(FORM_CONTENT_TYPE));
    if let (true, Some(body)) = (is_form, body) {
        params.extend(url::form_urlencoded::parse(body).into_owned());
    }

    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use std::net::{IpAddr, Ipv4Addr};

    fn parts(request: Request<()>) -> request::Parts {
        request.into_parts().0
    }

    #[test]
    fn test_canonical_header_name() {
        assert_eq!(canonical_header_name("content-type"), "Content-Type");
        assert_eq!(canonical_header_name("accept"), "Accept");
        assert_eq!(canonical_header_name("x-request-id"), "X-Request-Id");
        assert_eq!(canonical_header_name("x-api-id"), "X-Api-Id");
    }

    #[test]
    fn test_canonical_header_name_irregular_spellings() {
        assert_eq!(canonical_header_name("etag"), "ETag");
        assert_eq!(canonical_header_name("WWW-AUTHENTICATE"), "WWW-Authenticate");
        assert_eq!(canonical_header_name("www-authenticate"), "WWW-Authenticate");
        assert_eq!(canonical_header_name("te"), "TE");
        assert_eq!(canonical_header_name("dnt"), "DNT");
        assert_eq!(canonical_header_name("x-xss-protection"), "X-XSS-Protection");
    }

    #[test]
    fn test_header_map_keeps_first_value() {
        let mut headers = HeaderMap::new();
        headers.append("x-tag", "first".parse().unwrap());
        headers.append("x-tag", "second".parse().unwrap());
        headers.insert("accept", "text/plain".parse().unwrap());

        let map = header_map(&headers);
        assert_eq!(map.len(), 2);
        assert_eq!(map["X-Tag"], "first");
        assert_eq!(map["Accept"], "text/plain");
    }

    #[test]
    fn test_request_url_forms() {
        let absolute = parts(Request::get("http://localhost:8080/test?a=1").body(()).unwrap());
        assert_eq!(
            request_url(&absolute.uri, &absolute.headers),
            "http://localhost:8080/test"
        );

        let with_host = parts(
            Request::get("/items/7?x=y")
                .header("host", "example.com")
                .body(())
                .unwrap(),
        );
        assert_eq!(
            request_url(&with_host.uri, &with_host.headers),
            "http://example.com/items/7"
        );

        let bare = parts(Request::get("/items/7").body(()).unwrap());
        assert_eq!(request_url(&bare.uri, &bare.headers), "/items/7");
    }

    #[test]
    fn test_params_last_value_wins_and_form_body() {
        let head = parts(
            Request::post("/submit?name=a&name=b&q=hello%20world")
                .header("content-type", "application/x-www-form-urlencoded")
                .body(())
                .unwrap(),
        );

        let params = params(&head.uri, &head.headers, Some(b"city=Oslo&q=form"));
        assert_eq!(params["name"], "b");
        assert_eq!(params["city"], "Oslo");
        // form parameters are read after the query string
        assert_eq!(params["q"], "form");
    }

    #[test]
    fn test_params_ignore_non_form_body() {
        let head = parts(
            Request::post("/submit")
                .header("content-type", "text/plain")
                .body(())
                .unwrap(),
        );
        assert!(params(&head.uri, &head.headers, Some(b"a=1")).is_empty());
    }

    #[test]
    fn test_sender_from_connect_info() {
        let mut head = parts(Request::get("/").body(()).unwrap());
        assert_eq!(sender(&head), UNKNOWN_SENDER);

        head.extensions.insert(ConnectInfo(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            51234,
        )));
        assert_eq!(sender(&head), "127.0.0.1");
    }

    #[test]
    fn test_request_snapshot_json_field_order() {
        let head = parts(
            Request::get("http://localhost:8080/test?param1=1000")
                .header("accept", "application/json")
                .body(())
                .unwrap(),
        );

        let with_body = RequestSnapshot::from_parts(&head, Some(b"payload"));
        assert_eq!(
            serde_json::to_string(&with_body).unwrap(),
            r#"{"sender":"unknown","method":"GET","path":"http://localhost:8080/test","params":{"param1":"1000"},"headers":{"Accept":"application/json"},"body":"payload"}"#
        );

        let without_body = RequestSnapshot::from_parts(&head, None);
        let json = serde_json::to_string(&without_body).unwrap();
        assert!(!json.contains("body"));
        assert!(!json.contains("null"));
    }

    #[test]
    fn test_response_snapshot_lossy_body() {
        let snapshot = ResponseSnapshot::new(
            StatusCode::NOT_FOUND,
            BTreeMap::new(),
            Some(&[b'o', 0xff, b'k']),
        );
        assert_eq!(snapshot.status, 404);
        assert_eq!(snapshot.body.as_deref(), Some("o\u{fffd}k"));
        assert_eq!(
            serde_json::to_string(&snapshot).unwrap(),
            "{\"status\":404,\"headers\":{},\"body\":\"o\u{fffd}k\"}"
        );
    }

    #[test]
    fn test_json_escaping() {
        let snapshot =
            ResponseSnapshot::new(StatusCode::OK, BTreeMap::new(), Some(b"say \"hi\"\n"));
        assert_eq!(
            serde_json::to_string(&snapshot).unwrap(),
            r#"{"status":200,"headers":{},"body":"say \"hi\"\n"}"#
        );
    }
}
