use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};

use crate::error::ProxyError;

/// A request captured off the wire, ready to be queued and later replayed
/// against the forward target (spec.md §4.6).
pub struct ParsedFrame {
    pub method: Method,
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Serialize a request to the standard HTTP/1.1 wire form — request line,
/// headers, blank line, body — exactly as `httputil.DumpRequest` does in
/// the original (original_source `federation-buffer/buffer.go`).
pub fn serialize_request(
    method: &Method,
    path_and_query: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 256);
    out.extend_from_slice(method.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(path_and_query.as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\n");

    for (name, value) in headers {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

/// Parse a wire-form request back into its parts. The caller (the drain
/// worker) is responsible for clearing/rewriting the scheme and authority
/// to the forward target — this function only reconstructs what was on the
/// wire (spec.md §4.6: "deserialization must be the exact inverse").
pub fn deserialize_request(buf: &[u8]) -> Result<ParsedFrame, ProxyError> {
    let mut header_storage = [httparse::EMPTY_HEADER; 64];
    let mut req = httparse::Request::new(&mut header_storage);

    let body_offset = match req.parse(buf) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => {
            return Err(ProxyError::Deserialization(
                "incomplete request frame".to_string(),
            ))
        }
        Err(e) => return Err(ProxyError::Deserialization(e.to_string())),
    };

    let method = req
        .method
        .ok_or_else(|| ProxyError::Deserialization("missing method".to_string()))?
        .parse::<Method>()
        .map_err(|e| ProxyError::Deserialization(e.to_string()))?;

    let path_and_query = req
        .path
        .ok_or_else(|| ProxyError::Deserialization("missing request target".to_string()))?
        .to_string();

    let mut headers = HeaderMap::new();
    for h in req.headers.iter() {
        if h.name.is_empty() {
            continue;
        }
        let name = HeaderName::from_bytes(h.name.as_bytes())
            .map_err(|e| ProxyError::Deserialization(e.to_string()))?;
        let value = HeaderValue::from_bytes(h.value)
            .map_err(|e| ProxyError::Deserialization(e.to_string()))?;
        headers.append(name, value);
    }

    let body = Bytes::copy_from_slice(&buf[body_offset..]);

    Ok(ParsedFrame {
        method,
        path_and_query,
        headers,
        body,
    })
}

/// Rewrite a parsed frame's destination to the forward target, producing
/// the `Uri` the drain worker dispatches against. Scheme/authority are
/// always plain HTTP (spec.md §4.6: "over plain HTTP").
pub fn rewrite_destination(frame: &ParsedFrame, forward_host: &str) -> Result<Uri, ProxyError> {
    format!("http://{forward_host}{}", frame.path_and_query)
        .parse()
        .map_err(|e: http::uri::InvalidUri| ProxyError::Deserialization(e.to_string()))
}
