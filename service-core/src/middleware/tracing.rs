use axum::http::{HeaderMap, HeaderValue};
use axum::{extract::Request, middleware::Next, response::Response};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_REQUEST_ID_LEN: usize = 128;

/// Accepts a caller-supplied id only when it is short printable ASCII;
/// anything else is replaced so it can be logged and echoed verbatim.
fn inbound_request_id(headers: &HeaderMap) -> Option<HeaderValue> {
    let value = headers.get(REQUEST_ID_HEADER)?;
    let bytes = value.as_bytes();
    let printable = bytes.iter().all(|b| b.is_ascii_graphic());
    (printable && !bytes.is_empty() && bytes.len() <= MAX_REQUEST_ID_LEN).then(|| value.clone())
}

fn fresh_request_id() -> HeaderValue {
    // A simple uuid is always a valid header value.
    HeaderValue::from_str(&Uuid::new_v4().simple().to_string())
        .unwrap_or_else(|_| HeaderValue::from_static("-"))
}

/// Ensures every request and response carries a correlation id so that the
/// audit trail and the access log can be joined.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = inbound_request_id(req.headers()).unwrap_or_else(fresh_request_id);
    req.headers_mut()
        .insert(REQUEST_ID_HEADER, request_id.clone());

    let mut response = next.run(req).await;
    response
        .headers_mut()
        .entry(REQUEST_ID_HEADER)
        .or_insert(request_id);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn printable_ids_are_kept() {
        let id = inbound_request_id(&headers_with("req-123")).unwrap();
        assert_eq!(id, "req-123");
    }

    #[test]
    fn oversized_or_spaced_ids_are_replaced() {
        assert!(inbound_request_id(&headers_with(&"a".repeat(129))).is_none());
        assert!(inbound_request_id(&headers_with("two words")).is_none());
        assert!(inbound_request_id(&HeaderMap::new()).is_none());
    }

    #[test]
    fn generated_ids_are_compact() {
        assert_eq!(fresh_request_id().len(), 32);
    }
}
