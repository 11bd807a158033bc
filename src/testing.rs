//! An in-process HTTP server recording every request it receives.
use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response, body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use tokio::{net::TcpListener, task::JoinHandle};

/// A request as received by the server.
#[derive(Clone, Debug)]
pub(crate) struct Recorded {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A canned response.
#[derive(Clone, Debug)]
pub(crate) struct TestResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    delay: Option<Duration>,
}

impl TestResponse {
    pub fn header(mut self, name: &'static str, value: &str) -> Self {
        let value = HeaderValue::from_str(value).expect("valid header value");
        self.headers.append(HeaderName::from_static(name), value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl From<StatusCode> for TestResponse {
    fn from(status: StatusCode) -> Self {
        Self { status, headers: HeaderMap::new(), body: Bytes::new(), delay: None }
    }
}

type Handler = dyn Fn(&Recorded) -> TestResponse + Send + Sync;

/// HTTP/1 server bound to an ephemeral local port; stops when dropped.
pub(crate) struct TestServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Recorded>>>,
    task: JoinHandle<()>,
}

impl TestServer {
    /// Answers `200 OK` with an empty body to everything.
    pub async fn ok() -> Self {
        Self::start(|_| StatusCode::OK).await
    }

    /// Answers every request with `handler`.
    pub async fn start<F, R>(handler: F) -> Self
    where
        F: Fn(&Recorded) -> R + Send + Sync + 'static,
        R: Into<TestResponse>,
    {
        let handler: Arc<Handler> = Arc::new(move |r| handler(r).into());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind test server");
        let addr = listener.local_addr().expect("test server address");

        let recorded = requests.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let handler = handler.clone();
                let recorded = recorded.clone();
                let service = service_fn(move |req| respond(req, handler.clone(), recorded.clone()));
                tokio::spawn(async move {
                    let _ = http1::Builder::new().serve_connection(TokioIo::new(stream), service).await;
                });
            }
        });

        Self { addr, requests, task }
    }

    /// Absolute URL of `path` on this server.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn respond(
    req: Request<Incoming>,
    handler: Arc<Handler>,
    requests: Arc<Mutex<Vec<Recorded>>>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = body.collect().await.map(|b| b.to_bytes()).unwrap_or_default();
    let recorded = Recorded { method: parts.method, path: parts.uri.path().to_string(), headers: parts.headers, body };

    let response = handler(&recorded);
    requests.lock().push(recorded);
    if let Some(delay) = response.delay {
        tokio::time::sleep(delay).await;
    }

    let mut resp = Response::new(Full::new(response.body));
    *resp.status_mut() = response.status;
    *resp.headers_mut() = response.headers;
    Ok(resp)
}
