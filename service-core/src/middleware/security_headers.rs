use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};

type HeaderSet = &'static [(&'static str, &'static str)];

/// Applied to every response. Bodies may carry one-time secrets such as a
/// freshly issued passphrase, so nothing is cacheable.
const BASELINE: HeaderSet = &[
    ("x-content-type-options", "nosniff"),
    (
        "strict-transport-security",
        "max-age=31536000; includeSubDomains",
    ),
    ("cache-control", "no-store"),
    ("referrer-policy", "no-referrer"),
];

const API: HeaderSet = &[
    (
        "content-security-policy",
        "default-src 'none'; frame-ancestors 'none'",
    ),
    ("x-frame-options", "DENY"),
];

/// Swagger UI needs inline scripts and styles.
const DOCS: HeaderSet = &[
    (
        "content-security-policy",
        "default-src 'self'; script-src 'self' 'unsafe-inline'; \
         style-src 'self' 'unsafe-inline'; img-src 'self' data:",
    ),
    ("x-frame-options", "SAMEORIGIN"),
];

fn is_docs_path(path: &str) -> bool {
    path.starts_with("/docs") || path == "/.well-known/openapi.json"
}

pub async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let route_set = if is_docs_path(req.uri().path()) {
        DOCS
    } else {
        API
    };

    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    for &(name, value) in BASELINE.iter().chain(route_set) {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docs_paths_are_recognised() {
        assert!(is_docs_path("/docs/"));
        assert!(is_docs_path("/.well-known/openapi.json"));
        assert!(!is_docs_path("/credentials"));
        assert!(!is_docs_path("/portal/grant"));
    }
}
