//! Local HTTP origin serving prebuilt archives for integration tests.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Clone)]
struct OriginState {
    archive: Arc<Vec<u8>>,
    hits: Arc<AtomicUsize>,
}

/// Serves `archive` under `/archive/*`, a 404 under `/missing/*`, a body
/// that stalls after its first chunk under `/stall/*`, and a response head
/// that never arrives under `/slow/*`.
pub struct Origin {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl Origin {
    pub async fn start(archive: Vec<u8>) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let state = OriginState {
            archive: Arc::new(archive),
            hits: Arc::clone(&hits),
        };
        let app = Router::new()
            .route("/archive/{name}", get(serve_archive))
            .route("/missing/{name}", get(serve_missing))
            .route("/stall/{name}", get(serve_stalled))
            .route("/slow/{name}", get(serve_slow))
            .with_state(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind origin");
        let addr = listener.local_addr().expect("origin address");
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve origin");
        });
        Self { addr, hits, handle }
    }

    /// Returns a download template rooted at `route` on this origin.
    pub fn template(&self, route: &str) -> String {
        format!(
            "http://{}/{route}/{{name}}-v{{version}}-{{runtime}}-v{{abi}}-{{platform}}{{libc}}-{{arch}}.tar.gz",
            self.addr
        )
    }

    /// Number of requests served so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for Origin {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_archive(State(state): State<OriginState>) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    (StatusCode::OK, state.archive.as_ref().clone()).into_response()
}

async fn serve_missing(State(state): State<OriginState>) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    StatusCode::NOT_FOUND.into_response()
}

async fn serve_stalled(State(state): State<OriginState>) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let head = state.archive.iter().take(16).copied().collect::<Vec<u8>>();
    let body = futures::stream::once(async move { Ok::<_, Infallible>(Bytes::from(head)) })
        .chain(futures::stream::pending());
    (StatusCode::OK, Body::from_stream(body)).into_response()
}

async fn serve_slow(State(state): State<OriginState>) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(60)).await;
    StatusCode::OK.into_response()
}

/// Returns an address nothing is listening on.
pub async fn closed_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind probe");
    listener.local_addr().expect("probe address")
}
