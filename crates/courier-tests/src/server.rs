//! In-process HTTP server used by the integration tests

use crate::test_utils::{generate_test_data, TestDataPattern};
use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::Router;
use futures::StreamExt;
use parking_lot::Mutex;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One part received by the upload endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedPart {
    /// Form field name
    pub name: String,
    /// Announced file name, for file parts
    pub file_name: Option<String>,
    /// Part content type
    pub content_type: Option<String>,
    /// Raw part bytes
    pub data: Vec<u8>,
}

/// What the server has seen so far
#[derive(Debug, Default)]
pub struct ServerLog {
    hits: AtomicUsize,
    ranges: Mutex<Vec<Option<String>>>,
    parts: Mutex<Vec<ReceivedPart>>,
    uploaded_bytes: AtomicUsize,
    dropped_once: AtomicBool,
}

impl ServerLog {
    fn record(&self, headers: &HeaderMap) {
        self.hits.fetch_add(1, Ordering::SeqCst);
        let range = headers
            .get(RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.ranges.lock().push(range);
    }

    /// Number of requests served
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// `Range` header of every request, in order
    pub fn ranges(&self) -> Vec<Option<String>> {
        self.ranges.lock().clone()
    }

    /// Parts received by the upload endpoint
    pub fn parts(&self) -> Vec<ReceivedPart> {
        self.parts.lock().clone()
    }

    /// Body bytes consumed by the status endpoint
    pub fn uploaded_bytes(&self) -> usize {
        self.uploaded_bytes.load(Ordering::SeqCst)
    }
}

/// A running test server bound to an ephemeral local port
pub struct TestServer {
    addr: SocketAddr,
    log: Arc<ServerLog>,
}

impl TestServer {
    /// Bind to `127.0.0.1:0` and serve in the background
    ///
    /// Routes:
    /// - `GET /bytes/{n}`: `n` bytes of pattern data, honouring `Range: bytes=p-`
    /// - `GET /norange/{n}`: the same data, always answered with `200`
    /// - `GET /named`: a small body with a `Content-Disposition` file name
    /// - `GET /latin1`: ISO-8859-1 text
    /// - `GET /slow/{n}`: `n` bytes trickled in 1 KiB chunks every 50 ms
    /// - `GET /flaky/{n}`: promises `n` bytes but drops the first connection
    ///   after half of them; later requests get the full body
    /// - `GET /broken/{n}`: drops every connection after half of `n` bytes
    /// - `GET /silent`: accepts the request and never answers
    /// - `ANY /status/{code}`: consumes the body and answers `code`
    /// - `POST /upload`: parses a multipart form and records its parts
    pub async fn start() -> Self {
        let log = Arc::new(ServerLog::default());
        let app = Router::new()
            .route("/bytes/{n}", get(bytes))
            .route("/norange/{n}", get(no_range))
            .route("/named", get(named))
            .route("/latin1", get(latin1))
            .route("/slow/{n}", get(slow))
            .route("/flaky/{n}", get(flaky))
            .route("/broken/{n}", get(broken))
            .route("/silent", get(silent))
            .route("/status/{code}", any(status))
            .route("/upload", post(upload))
            .layer(DefaultBodyLimit::disable())
            .with_state(Arc::clone(&log));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test server");
        let addr = listener.local_addr().expect("test server address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve test server");
        });

        Self { addr, log }
    }

    /// Absolute URL of `path` on this server
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Request log
    pub fn log(&self) -> &ServerLog {
        &self.log
    }
}

/// Bytes served for `/bytes/{n}` and `/norange/{n}`
pub fn served_data(n: usize) -> Vec<u8> {
    generate_test_data(n, TestDataPattern::Realistic)
}

fn range_start(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(RANGE)?
        .to_str()
        .ok()?
        .strip_prefix("bytes=")?
        .strip_suffix('-')?
        .parse()
        .ok()
}

async fn bytes(
    State(log): State<Arc<ServerLog>>,
    Path(n): Path<usize>,
    headers: HeaderMap,
) -> Response {
    log.record(&headers);
    let data = served_data(n);
    match range_start(&headers) {
        Some(start) if start < n => (
            StatusCode::PARTIAL_CONTENT,
            [(CONTENT_RANGE, format!("bytes {}-{}/{}", start, n - 1, n))],
            data[start..].to_vec(),
        )
            .into_response(),
        Some(_) => StatusCode::RANGE_NOT_SATISFIABLE.into_response(),
        None => data.into_response(),
    }
}

async fn no_range(
    State(log): State<Arc<ServerLog>>,
    Path(n): Path<usize>,
    headers: HeaderMap,
) -> Vec<u8> {
    log.record(&headers);
    served_data(n)
}

async fn named(State(log): State<Arc<ServerLog>>, headers: HeaderMap) -> Response {
    log.record(&headers);
    (
        [(CONTENT_DISPOSITION, "attachment; filename=\"report.txt\"")],
        "hello",
    )
        .into_response()
}

async fn latin1(State(log): State<Arc<ServerLog>>, headers: HeaderMap) -> Response {
    log.record(&headers);
    (
        [(CONTENT_TYPE, "text/plain; charset=iso-8859-1")],
        vec![b'c', b'a', b'f', 0xE9],
    )
        .into_response()
}

async fn slow(
    State(log): State<Arc<ServerLog>>,
    Path(n): Path<usize>,
    headers: HeaderMap,
) -> Response {
    log.record(&headers);
    let stream = futures::stream::unfold(0usize, move |sent| async move {
        if sent >= n {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        let len = 1024.min(n - sent);
        Some((Ok::<_, Infallible>(Bytes::from(vec![0u8; len])), sent + len))
    });
    ([(CONTENT_LENGTH, n.to_string())], Body::from_stream(stream)).into_response()
}

/// Headers for `n` bytes, then half of them, then an aborted connection
fn cut_short(n: usize) -> Response {
    let data = served_data(n);
    let half = Bytes::copy_from_slice(&data[..n / 2]);
    let stream = futures::stream::iter([Ok::<_, io::Error>(half)]).chain(futures::stream::once(async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "dropped mid-body"))
    }));
    ([(CONTENT_LENGTH, n.to_string())], Body::from_stream(stream)).into_response()
}

async fn flaky(
    State(log): State<Arc<ServerLog>>,
    Path(n): Path<usize>,
    headers: HeaderMap,
) -> Response {
    log.record(&headers);
    if log.dropped_once.swap(true, Ordering::SeqCst) {
        served_data(n).into_response()
    } else {
        cut_short(n)
    }
}

async fn broken(
    State(log): State<Arc<ServerLog>>,
    Path(n): Path<usize>,
    headers: HeaderMap,
) -> Response {
    log.record(&headers);
    cut_short(n)
}

async fn silent(State(log): State<Arc<ServerLog>>, headers: HeaderMap) -> StatusCode {
    log.record(&headers);
    tokio::time::sleep(Duration::from_secs(60)).await;
    StatusCode::OK
}

async fn status(
    State(log): State<Arc<ServerLog>>,
    Path(code): Path<u16>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    log.record(&headers);
    log.uploaded_bytes.fetch_add(body.len(), Ordering::SeqCst);
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn upload(
    State(log): State<Arc<ServerLog>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    log.record(&headers);
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                let name = field.name().unwrap_or_default().to_string();
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                match field.bytes().await {
                    Ok(data) => log.parts.lock().push(ReceivedPart {
                        name,
                        file_name,
                        content_type,
                        data: data.to_vec(),
                    }),
                    Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
                }
            }
            Ok(None) => break,
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        }
    }
    (StatusCode::CREATED, "stored").into_response()
}
