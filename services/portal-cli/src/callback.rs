//! Local listener for the portal's authorization redirect
//!
//! Serves one route at the configured callback path. The first redirect that
//! carries the expected `state` is handed to the waiting command; redirects
//! with a wrong or missing `state` are answered 400 and otherwise ignored.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use portal_auth::QueryParams;
use portal_auth::params::wire;
use portal_auth::state::state_matches;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tracing::{info, warn};

use crate::error::{Error, Result};

type Outcome = Result<QueryParams>;

#[derive(Clone)]
struct CallbackState {
    expected_state: Arc<str>,
    outcome: Arc<Mutex<Option<oneshot::Sender<Outcome>>>>,
}

/// Router serving `path`, and the receiver for the first accepted redirect.
pub fn build_router(path: &str, expected_state: &str) -> (Router, oneshot::Receiver<Outcome>) {
    let (tx, rx) = oneshot::channel();
    let state = CallbackState {
        expected_state: Arc::from(expected_state),
        outcome: Arc::new(Mutex::new(Some(tx))),
    };
    let router = Router::new()
        .route(path, get(callback_handler))
        .with_state(state);
    (router, rx)
}

async fn callback_handler(
    State(state): State<CallbackState>,
    RawQuery(query): RawQuery,
) -> Response {
    let params = QueryParams::parse(query.as_deref().unwrap_or_default());

    if !state_matches(&state.expected_state, params.get(wire::STATE)) {
        warn!("authorization redirect with unexpected state, ignoring");
        return (StatusCode::BAD_REQUEST, "Unexpected state parameter.").into_response();
    }

    let (outcome, status, body) = if let Some(error) = params.get("error") {
        let description = params.get("error_description").unwrap_or_default();
        let reason = format!("{error} {description}").trim().to_owned();
        (
            Err(Error::AuthorizationDenied(reason)),
            StatusCode::OK,
            "Authorization was denied. You can close this window.",
        )
    } else if params.get(wire::CODE).is_none_or(str::is_empty) {
        return (StatusCode::BAD_REQUEST, "Missing authorization code.").into_response();
    } else {
        (
            Ok(params),
            StatusCode::OK,
            "Authorization received. You can close this window.",
        )
    };

    match state.outcome.lock().await.take() {
        Some(tx) => {
            let _ = tx.send(outcome);
            (status, body).into_response()
        }
        None => (StatusCode::GONE, "Authorization already completed.").into_response(),
    }
}

/// Serve the callback on `listener` until one redirect is accepted or `wait` elapses.
pub async fn wait_for_redirect(
    listener: TcpListener,
    path: &str,
    expected_state: &str,
    wait: Duration,
) -> Result<QueryParams> {
    let (app, outcome_rx) = build_router(path, expected_state);
    let addr = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });
    info!(addr = %addr, wait_secs = wait.as_secs(), "waiting for authorization redirect");

    let outcome = tokio::time::timeout(wait, outcome_rx).await;

    let _ = shutdown_tx.send(());
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "callback server error during shutdown"),
        Err(e) => warn!(error = %e, "callback server task panicked"),
    }

    match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(Error::Io(std::io::Error::other(
            "callback server stopped before a redirect arrived",
        ))),
        Err(_) => Err(Error::CallbackTimeout(wait.as_secs())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tower::ServiceExt;

    const PATH: &str = "/authorization/";

    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn accepted_redirect_delivers_query() {
        let (app, mut rx) = build_router(PATH, "xyz");

        let (status, body) = get(
            app,
            "/authorization/?code=c0de&state=xyz&domain=d.example&member_id=m",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Authorization received"));
        let params = rx.try_recv().unwrap().unwrap();
        assert_eq!(params.get("code"), Some("c0de"));
        assert_eq!(params.get("domain"), Some("d.example"));
    }

    #[tokio::test]
    async fn wrong_state_is_rejected_and_not_delivered() {
        let (app, mut rx) = build_router(PATH, "xyz");

        let (status, _) = get(app.clone(), "/authorization/?code=c0de&state=forged").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = get(app, "/authorization/?code=c0de").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert!(rx.try_recv().is_err(), "nothing must be delivered");
    }

    #[tokio::test]
    async fn missing_code_is_rejected() {
        let (app, mut rx) = build_router(PATH, "xyz");
        let (status, body) = get(app, "/authorization/?state=xyz").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("Missing authorization code"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn portal_error_is_delivered_as_denial() {
        let (app, mut rx) = build_router(PATH, "xyz");

        let (status, _) = get(
            app,
            "/authorization/?error=access_denied&error_description=user+declined&state=xyz",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        match rx.try_recv().unwrap() {
            Err(Error::AuthorizationDenied(reason)) => {
                assert_eq!(reason, "access_denied user declined");
            }
            other => panic!("expected AuthorizationDenied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_redirect_is_gone() {
        let (app, _rx) = build_router(PATH, "xyz");
        let (status, _) = get(app.clone(), "/authorization/?code=a&state=xyz").await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = get(app, "/authorization/?code=b&state=xyz").await;
        assert_eq!(status, StatusCode::GONE);
    }

    #[tokio::test]
    async fn other_paths_are_not_found() {
        let (app, _rx) = build_router(PATH, "xyz");
        let (status, _) = get(app, "/elsewhere?code=a&state=xyz").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn wait_for_redirect_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let err = wait_for_redirect(listener, PATH, "xyz", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CallbackTimeout(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn wait_for_redirect_returns_first_accepted_redirect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let waiter = tokio::spawn(async move {
            wait_for_redirect(listener, PATH, "xyz", Duration::from_secs(5)).await
        });

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(
                b"GET /authorization/?code=c0de&state=xyz HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            )
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"), "got: {response}");

        let params = waiter.await.unwrap().unwrap();
        assert_eq!(params.get("code"), Some("c0de"));
    }
}
