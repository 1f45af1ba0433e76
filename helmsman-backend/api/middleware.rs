use axum::{
    body::Body,
    http::{Request, Uri},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use tracing::Span;

pub async fn enrich_current_span_middleware(req: Request<Body>, next: Next) -> Response {
    let uri: &Uri = req.uri();

    let host = req
        .headers()
        .get("host")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("UNKNOWN");

    let current_span = Span::current();

    current_span.record("http.uri", uri.path());
    current_span.record("http.host", host);
    if let Some(query) = uri.query() {
        current_span.record("http.query", query);
    }

    next.run(req).await
}

pub async fn strip_trailing_slash(req: Request<Body>, next: Next) -> Response {
    let uri = req.uri();

    if let Some(path) = uri.path().strip_suffix('/') {
        if path.is_empty() {
            return next.run(req).await;
        }
        let mut parts = uri.clone().into_parts();
        let rewritten = if let Some(query) = uri.query() {
            format!("{path}?{query}")
        } else {
            path.to_string()
        };
        match rewritten.parse() {
            Ok(path_and_query) => {
                parts.path_and_query = Some(path_and_query);
                match Uri::from_parts(parts) {
                    Ok(new_uri) => Redirect::permanent(&new_uri.to_string()).into_response(),
                    Err(_) => next.run(req).await,
                }
            }
            Err(_) => next.run(req).await,
        }
    } else {
        next.run(req).await
    }
}
