use axum::extract::MatchedPath;
use axum::http::{HeaderValue, Request, header};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::MakeSpan;
use tracing::Span;

/// Paths whose query strings or bodies carry credentials.
const SENSITIVE_PATHS: [&str; 4] = ["/login", "/register", "/api/v1/login", "/calendar/callback"];

/// Request span that leaves out the query string of credential-bearing routes.
#[derive(Clone, Debug, Default)]
pub struct RequestSpan;

impl<B> MakeSpan<B> for RequestSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let method = request.method();
        let path = request.uri().path();
        let matched_path = request
            .extensions()
            .get::<MatchedPath>()
            .map(MatchedPath::as_str);

        if SENSITIVE_PATHS.contains(&path) {
            tracing::info_span!(
                "request",
                method = %method,
                path = %path,
                matched_path,
                sensitive_route = true,
            )
        } else {
            tracing::info_span!(
                "request",
                method = %method,
                uri = %request.uri(),
                matched_path,
            )
        }
    }
}

/// Sets `cache-control: no-store` on every response, replacing what the handler set.
pub fn no_store_layer() -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::overriding(header::CACHE_CONTROL, HeaderValue::from_static("no-store"))
}
