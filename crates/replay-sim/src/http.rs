use std::future::Future;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use havoc_debug_proto::{ApiResult, SessionKey};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::error::ServerError;
use crate::server::ReplayServer;

type SessionPath = Path<(String, u64, String)>;

fn session_key(Path((project, run_id, testcase)): SessionPath) -> SessionKey {
    SessionKey::new(project, run_id, testcase)
}

async fn health() -> &'static str {
    "ok"
}

async fn start(State(server): State<ReplayServer>, path: SessionPath) -> Json<ApiResult<()>> {
    let key = session_key(path);
    Json(server.open(&key).into())
}

async fn stop(State(server): State<ReplayServer>, path: SessionPath) -> Json<ApiResult<()>> {
    let key = session_key(path);
    Json(server.close(&key).into())
}

async fn command(
    State(server): State<ReplayServer>,
    path: SessionPath,
    body: String,
) -> impl IntoResponse {
    let key = session_key(path);
    let reply = tokio::task::spawn_blocking(move || server.dispatch(&key, &body)).await;
    match reply {
        Ok(encoded) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            encoded,
        ),
        Err(err) => {
            warn!(target: "havoc::replay", error = %err, "command task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                err.to_string(),
            )
        }
    }
}

pub fn router(server: ReplayServer) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route(
            "/api/project/:project/run/:run_id/testcase/:testcase/debug/start",
            post(start),
        )
        .route(
            "/api/project/:project/run/:run_id/testcase/:testcase/debug/command",
            post(command),
        )
        .route(
            "/api/project/:project/run/:run_id/testcase/:testcase/debug/stop",
            post(stop),
        )
        .with_state(server)
}

/// Serve the debug API on an already bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, server: ReplayServer, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local = listener.local_addr()?;
    info!(
        target: "havoc::replay",
        addr = %local,
        testcases = server.testcases().len(),
        "replay server listening"
    );
    axum::serve(listener, router(server))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!(target: "havoc::replay", "replay server stopped");
    Ok(())
}

pub async fn bind(addr: &str) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::Fixture;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> Router {
        let server = ReplayServer::new();
        server.add_fixture(&Fixture::demo().unwrap());
        router(server)
    }

    async fn post_text(app: Router, uri: &str, body: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(
                Request::post(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[havoc_test_support::async_test]
    async fn health_is_plain_ok() {
        let response = app()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"ok");
    }

    #[havoc_test_support::async_test]
    async fn start_reports_missing_testcases_in_the_envelope() {
        let (status, body) = post_text(
            app(),
            "/api/project/demo/run/1/testcase/missing/debug/start",
            "",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"Err":"testcase not found: missing"}"#);
    }

    #[havoc_test_support::async_test]
    async fn start_then_command() {
        let app = app();
        let (_, body) = post_text(
            app.clone(),
            "/api/project/demo/run/1/testcase/clean_exit/debug/start",
            "",
        )
        .await;
        assert_eq!(body, r#"{"Ok":null}"#);

        let (status, body) = post_text(
            app,
            "/api/project/demo/run/1/testcase/clean_exit/debug/command",
            r#"{"c":"step"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with(r#"{"data":{"exit_reason":"#), "{body}");
    }
}
