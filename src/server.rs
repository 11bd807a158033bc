//! HTTP front-end running benchmarks on request.
//!
//! | Route             | Answer                                    |
//! |-------------------|-------------------------------------------|
//! | `GET /isAlive`    | `OK`                                      |
//! | `GET /help`       | usage text                                |
//! | `POST /benchmark` | JSON report of the `{ runOptions, flow }` |
//!
//! Invalid requests answer `400` and failed runs `500`, both with a
//! `{ "message": ... }` body.
use std::{convert::Infallible, net::SocketAddr};

use anyhow::Context;
use bytes::Bytes;
use http::{HeaderValue, Method, Request, Response, StatusCode, header::CONTENT_TYPE};
use http_body_util::{BodyExt, Full};
use hyper::{body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use crate::{error::BenchError, opts::BenchRequest, report::BenchReport};

const HELP: &str = "\
POST /benchmark with a JSON body:

{
  \"runOptions\": {
    \"limit\": 10,          concurrent iterations (required)
    \"iterations\": 1000,   total iterations (required)
    \"prealloc\": 100,      iterations queued ahead of admission (optional)
    \"user\": \"joe\",        basic authentication (optional)
    \"password\": \"secret\",
    \"timeout\": 60000,     request timeout in ms, 0 waits forever (optional)
    \"dynamicInputArrays\": { \"ids\": [1, 2, 3] }
  },
  \"flow\": {
    \"before\": [], \"beforeMain\": [], \"main\": [], \"afterMain\": [], \"after\": []
  }
}

The flow may also be a single operation or an array of main operations:

  { \"head\": \"http://localhost:8000/\" }
  [ { \"put\": \"http://localhost:8000/foo\", \"json\": \"mydata\" },
    { \"get\": \"http://localhost:8000/foo\" } ]

An operation names its method with one of get, head, put, post, patch or del
pointing to the URI, or with method and uri. It may carry headers, one of json,
body or formData, and beforeHooks/afterHooks among useEtag, saveEtag,
ignoreStatus, verify2XX, startStepTimer and endStepTimer.

#{INDEX}, #{GUID} and #{INDEX.<name>} in the uri and the payload are replaced
per iteration. Headers are sent as written.
";

type HttpResponse = Response<Full<Bytes>>;

/// Serves benchmark requests on `addr` until `Ctrl+C`.
pub async fn serve(addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await.with_context(|| format!("failed to listen on {addr}"))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");
    tokio::select! {
        r = accept_loop(listener) => r,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            Ok(())
        }
    }
}

pub(crate) async fn accept_loop(listener: TcpListener) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new().serve_connection(TokioIo::new(stream), service_fn(route)).await {
                tracing::debug!(%peer, "connection closed: {e}");
            }
        });
    }
}

async fn route(req: Request<Incoming>) -> Result<HttpResponse, Infallible> {
    let resp = match (req.method(), req.uri().path()) {
        (_, "/isAlive") => text(StatusCode::OK, "OK"),
        (_, "/help") => text(StatusCode::OK, HELP),
        (&Method::POST, "/benchmark") => benchmark(req).await,
        (_, "/benchmark") => message(StatusCode::METHOD_NOT_ALLOWED, "use POST /benchmark"),
        (_, path) => message(StatusCode::NOT_FOUND, &format!("no route for {path}")),
    };
    Ok(resp)
}

async fn benchmark(req: Request<Incoming>) -> HttpResponse {
    let body = match req.into_body().collect().await {
        Ok(body) => body.to_bytes(),
        Err(e) => return message(StatusCode::BAD_REQUEST, &format!("failed to read request body: {e}")),
    };
    match run_request(&body).await {
        Ok(report) => {
            tracing::info!(errors = report.error_count, total_failure = report.total_failure, "benchmark finished");
            json_body(StatusCode::OK, &report)
        }
        Err(e) => {
            let status = if is_bad_request(&e) { StatusCode::BAD_REQUEST } else { StatusCode::INTERNAL_SERVER_ERROR };
            tracing::error!(%status, "benchmark failed: {e:#}");
            message(status, &format!("{e:#}"))
        }
    }
}

async fn run_request(body: &[u8]) -> anyhow::Result<BenchReport> {
    let doc: Value = serde_json::from_slice(body).context("request body is not JSON")?;
    let request = BenchRequest::from_json(doc)?;
    crate::run(&request.flow, &request.run_options).await
}

fn is_bad_request(e: &anyhow::Error) -> bool {
    e.is::<serde_json::Error>() || matches!(e.downcast_ref::<BenchError>(), Some(BenchError::Configuration(_)))
}

fn text(status: StatusCode, body: &'static str) -> HttpResponse {
    respond(status, "text/plain; charset=utf-8", Bytes::from_static(body.as_bytes()))
}

fn message(status: StatusCode, msg: &str) -> HttpResponse {
    json_body(status, &json!({ "message": msg }))
}

fn json_body(status: StatusCode, body: &impl Serialize) -> HttpResponse {
    match serde_json::to_vec(body) {
        Ok(body) => respond(status, "application/json", body.into()),
        Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", format!("{e}").into()),
    }
}

fn respond(status: StatusCode, content_type: &'static str, body: Bytes) -> HttpResponse {
    let mut resp = Response::new(Full::new(body));
    *resp.status_mut() = status;
    resp.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestServer;

    async fn start() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(accept_loop(listener));
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn is_alive_and_help() {
        let base = start().await;
        let resp = reqwest::get(format!("{base}/isAlive")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.text().await.unwrap(), "OK");

        let help = reqwest::get(format!("{base}/help")).await.unwrap().text().await.unwrap();
        assert!(help.contains("runOptions"));
        assert!(help.contains("in the uri and the payload"));
        assert!(!help.contains("headers and payload"));
    }

    #[tokio::test]
    async fn benchmark_answers_the_report() {
        let target = TestServer::ok().await;
        let base = start().await;
        let body = json!({
            "runOptions": { "limit": 2, "iterations": 4 },
            "flow": { "main": [{ "get": target.url("/item/#{INDEX}") }] },
        });

        let resp = reqwest::Client::new().post(format!("{base}/benchmark")).json(&body).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let report: Value = resp.json().await.unwrap();
        assert_eq!(report["errorCount"], 0);
        assert_eq!(report["totalFailure"], false);
        assert_eq!(report["stats"]["timers"]["main"]["meter"]["count"], 4);
        assert_eq!(target.requests().len(), 4);
    }

    #[tokio::test]
    async fn invalid_requests_answer_400() {
        let base = start().await;
        let client = reqwest::Client::new();
        let cases = [
            "not json".to_string(),
            json!({ "flow": [{ "get": "http://localhost/" }] }).to_string(),
            json!({ "runOptions": { "limit": 1, "iterations": 1 }, "flow": { "before": [] } }).to_string(),
        ];
        for body in cases {
            let resp = client.post(format!("{base}/benchmark")).body(body.clone()).send().await.unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{body}");
            let msg: Value = resp.json().await.unwrap();
            assert!(msg["message"].is_string());
        }
    }

    #[tokio::test]
    async fn unknown_routes() {
        let base = start().await;
        assert_eq!(reqwest::get(format!("{base}/nope")).await.unwrap().status(), StatusCode::NOT_FOUND);
        assert_eq!(reqwest::get(format!("{base}/benchmark")).await.unwrap().status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
