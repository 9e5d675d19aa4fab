//! HTTP front end
//!
//! One listener serves two roles:
//! - the control surface (`POST /control`, `GET /rules`, `GET /metrics`, `GET /healthz`)
//! - a redirecting proxy: absolute-form requests (`GET http://host/a.css`) are
//!   looked up in the rule table and answered with a `307` to the dev server
//!
//! The proxy never forwards. Requests that match no rule get a `404` so the
//! browser's PAC/proxy configuration should only route the intercepted assets here.

use anyhow::Result;
use http::header::{CACHE_CONTROL, CONTENT_TYPE, LOCATION};
use http::{HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::control::{ControlResponse, Engine};
use crate::metrics::EngineMetrics;
use crate::rules::{InMemoryRuleStore, ResourceKind, RuleStore};

/// Control message bodies larger than this are rejected
const MAX_CONTROL_BODY_SIZE: usize = 64 * 1024;

/// Shared state for every connection
pub struct AppState {
    pub engine: Arc<Engine>,
    /// Route table consulted for proxied requests
    pub routes: Arc<InMemoryRuleStore>,
}

/// Configured targets this front end can never redirect
///
/// HTTPS requests reach a proxy as CONNECT tunnels, which are refused here,
/// so an https target is only redirected by an interception layer in front.
pub async fn unredirectable_targets(engine: &Engine) -> Vec<String> {
    let (css, js) = engine.controller().resolver().get_targets().await;
    let https: Vec<String> = [css, js]
        .into_iter()
        .filter(|t| t.original_url.starts_with("https://"))
        .map(|t| t.original_url)
        .collect();

    for url in &https {
        warn!(
            url = %url,
            "Target is https; CONNECT is not intercepted so this asset will not be redirected"
        );
    }
    https
}

/// Accept connections until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        debug!("Accepted connection from {}", peer_addr);
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            serve_http1(stream, state).await;
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutting down listener");
                return Ok(());
            }
        }
    }
}

/// Serve one HTTP/1.1 connection
pub async fn serve_http1(stream: TcpStream, state: Arc<AppState>) {
    let io = TokioIo::new(stream);

    let conn = hyper::server::conn::http1::Builder::new().serve_connection(
        io,
        service_fn(move |req| {
            let state = Arc::clone(&state);
            async move { handle_request(req, state).await }
        }),
    );

    if let Err(e) = conn.await {
        debug!("HTTP/1.1 connection error: {}", e);
    }
}

async fn handle_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let uri = req.uri().clone();

    debug!("Received {} request for {}", method, uri);

    if method == Method::CONNECT {
        return Ok(text_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "CONNECT tunnels are not intercepted; route only plain asset requests here\n",
        ));
    }

    // Absolute-form target means we are being used as a proxy
    if uri.scheme().is_some() {
        return Ok(handle_proxied(req, state).await);
    }

    let response = match (&method, uri.path()) {
        (&Method::POST, "/control") => handle_control(req, &state.engine).await,
        (&Method::GET, "/rules") => match state.engine.store().list_rules().await {
            Ok(rules) => json_response(StatusCode::OK, &serde_json::json!({ "rules": rules })),
            Err(e) => json_response(StatusCode::BAD_GATEWAY, &ControlResponse::failure(e)),
        },
        (&Method::GET, "/metrics") => {
            let mut response = text_response(StatusCode::OK, EngineMetrics::render());
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        (&Method::GET, "/healthz") => text_response(StatusCode::OK, "ok\n"),
        (_, path) => {
            debug!("No route for {}", path);
            text_response(StatusCode::NOT_FOUND, "not found\n")
        }
    };

    Ok(response)
}

async fn handle_control(req: Request<Incoming>, engine: &Engine) -> Response<Full<Bytes>> {
    let body = match Limited::new(req.into_body(), MAX_CONTROL_BODY_SIZE)
        .collect()
        .await
    {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("Rejected control body: {}", e);
            return json_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                &ControlResponse::failure(format!("unreadable control body: {}", e)),
            );
        }
    };

    let response = engine.dispatch_json(&body).await;

    // Failures are still answered; the status only distinguishes malformed input
    let status = match &response.error {
        Some(e) if e.starts_with("invalid control message") => StatusCode::BAD_REQUEST,
        _ => StatusCode::OK,
    };
    json_response(status, &response)
}

async fn handle_proxied(req: Request<Incoming>, state: Arc<AppState>) -> Response<Full<Bytes>> {
    let url = req.uri().to_string();

    if *req.method() != Method::GET && *req.method() != Method::HEAD {
        return text_response(StatusCode::METHOD_NOT_ALLOWED, "only GET and HEAD are redirected\n");
    }

    let kind = request_kind(&req, &url);
    let Some(kind) = kind else {
        debug!(url = %url, "Proxied request is neither stylesheet nor script");
        return text_response(StatusCode::NOT_FOUND, "no redirect rule for this request\n");
    };

    let Some(rule) = state.routes.evaluate(&url, kind).await else {
        debug!(url = %url, kind = %kind, "No redirect rule matched");
        return text_response(StatusCode::NOT_FOUND, "no redirect rule for this request\n");
    };

    let location = match HeaderValue::from_str(&rule.action.redirect_to) {
        Ok(v) => v,
        Err(e) => {
            error!(rule_id = rule.id, error = %e, "Redirect target is not a valid header value");
            return text_response(StatusCode::INTERNAL_SERVER_ERROR, "invalid redirect target\n");
        }
    };

    info!(rule_id = rule.id, from = %url, to = %rule.action.redirect_to, "Redirecting");

    let mut response = text_response(StatusCode::TEMPORARY_REDIRECT, "");
    let headers = response.headers_mut();
    headers.insert(LOCATION, location);
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert("x-rerouted-rule", HeaderValue::from(rule.id));
    response
}

/// A concrete `Sec-Fetch-Dest` decides alone; the file extension is only
/// consulted when the header is missing or `empty`
fn request_kind<B>(req: &Request<B>, url: &str) -> Option<ResourceKind> {
    let dest = req
        .headers()
        .get("sec-fetch-dest")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|d| !d.is_empty() && !d.eq_ignore_ascii_case("empty"));

    match dest {
        Some(dest) => ResourceKind::from_fetch_dest(dest),
        None => ResourceKind::from_url_path(url),
    }
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(body) {
        Ok(bytes) => {
            let mut response = Response::new(Full::new(Bytes::from(bytes)));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => {
            error!("Failed to encode JSON response: {}", e);
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "encoding error\n")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_kind_prefers_fetch_dest() {
        let req = Request::builder()
            .uri("http://h/bundle")
            .header("sec-fetch-dest", "script")
            .body(())
            .unwrap();
        assert_eq!(request_kind(&req, "http://h/bundle"), Some(ResourceKind::Script));

        let req = Request::builder().uri("http://h/a.css").body(()).unwrap();
        assert_eq!(request_kind(&req, "http://h/a.css"), Some(ResourceKind::Stylesheet));

        let req = Request::builder()
            .uri("http://h/a.css")
            .header("sec-fetch-dest", "image")
            .body(())
            .unwrap();
        assert_eq!(request_kind(&req, "http://h/a.css"), None);
    }

    #[test]
    fn test_text_response_sets_status() {
        let response = text_response(StatusCode::NOT_FOUND, "x");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
    }
}
