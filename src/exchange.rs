//! Execution of a single HTTP exchange.
use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use http::{
    HeaderMap, HeaderValue, Method, StatusCode,
    header::{AUTHORIZATION, CONNECTION, COOKIE, SET_COOKIE},
};
use reqwest::{Url, cookie::CookieStore, multipart};
use serde_json::Value;

use crate::{
    context::{Credentials, IterationEnv},
    error::ExchangeError,
    hooks,
    template::CompiledOperation,
};

/// Body of a resolved request.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestBody {
    /// No body.
    Empty,
    /// JSON document.
    Json(Value),
    /// Raw text.
    Text(String),
    /// Multipart form fields.
    Form(Vec<(String, String)>),
}

/// A fully resolved request, as seen by the hooks.
#[derive(Clone, Debug)]
pub struct Request {
    /// Request method.
    pub method: Method,
    /// Target URI.
    pub uri: Url,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body.
    pub body: RequestBody,
}

/// Status and headers of a received response.
#[derive(Clone, Debug)]
pub struct Response {
    /// Response status; after-hooks may rewrite it.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
}

/// State of one operation while it passes through the hooks.
pub struct Exchange<'a> {
    /// The request to send; before-hooks may change it.
    pub request: Request,
    /// Context of the iteration the operation belongs to.
    pub env: &'a mut IterationEnv,
    /// Position of the operation within its phase.
    pub op_index: usize,
    /// Transport failure, if the request could not be completed.
    pub error: Option<reqwest::Error>,
    /// Response, once received.
    pub response: Option<Response>,
    /// Response body, once read.
    pub body: Bytes,
}

impl Exchange<'_> {
    /// Response status, if a response was received.
    pub fn status(&self) -> Option<StatusCode> {
        self.response.as_ref().map(|r| r.status)
    }

    async fn send(&mut self) {
        let url = self.request.uri.clone();
        let env = &*self.env;

        let mut builder = env
            .client()
            .request(self.request.method.clone(), url.clone())
            .headers(self.request.headers.clone());
        if let Some(cookies) = env.jar().cookies(&url) {
            builder = builder.header(COOKIE, cookies);
        }
        if let Some(timeout) = env.timeout() {
            builder = builder.timeout(timeout);
        }
        builder = match &self.request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(json) => builder.json(json),
            RequestBody::Text(text) => builder.body(text.clone()),
            RequestBody::Form(fields) => builder.multipart(
                fields
                    .iter()
                    .fold(multipart::Form::new(), |form, (name, value)| form.text(name.clone(), value.clone())),
            ),
        };

        let resp = match builder.send().await {
            Ok(resp) => resp,
            Err(e) => {
                env.stats().record_exchange(None, 0);
                self.error = Some(e);
                return;
            }
        };

        let status = resp.status();
        let headers = resp.headers().clone();
        env.jar().set_cookies(&mut headers.get_all(SET_COOKIE).iter(), resp.url());
        let body = resp.bytes().await;
        env.stats()
            .record_exchange(Some(status), body.as_ref().map_or(0, |b| b.len() as u64));

        self.response = Some(Response { status, headers });
        match body {
            Ok(body) => self.body = body,
            Err(e) => self.error = Some(e),
        }
    }
}

impl std::fmt::Debug for Exchange<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exchange")
            .field("request", &self.request)
            .field("op_index", &self.op_index)
            .field("error", &self.error)
            .field("response", &self.response)
            .field("body_len", &self.body.len())
            .finish_non_exhaustive()
    }
}

fn basic_auth(credentials: &Credentials) -> Result<HeaderValue, ExchangeError> {
    let password = credentials.password.as_deref().unwrap_or_default();
    let token = STANDARD.encode(format!("{}:{password}", credentials.user));
    let mut value = HeaderValue::from_str(&format!("Basic {token}"))
        .map_err(|e| ExchangeError::InvalidRequest(format!("authorization header: {e}")))?;
    value.set_sensitive(true);
    Ok(value)
}

/// Resolves `op` for the iteration of `env`, runs it through its hooks and
/// sends it exactly once.
///
/// Returns the index of the next operation of the phase.
pub(crate) async fn execute(
    env: &mut IterationEnv,
    op: &CompiledOperation,
    op_index: usize,
) -> Result<usize, ExchangeError> {
    let mut request = op.resolve(env.index())?;
    request.headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    if let Some(credentials) = env.credentials() {
        request.headers.insert(AUTHORIZATION, basic_auth(credentials)?);
    }

    let mut ex = Exchange { request, env, op_index, error: None, response: None, body: Bytes::new() };
    hooks::apply_hooks(&op.before_hooks, &mut ex).await?;
    ex.send().await;
    hooks::apply_hooks(&op.after_hooks, &mut ex).await?;

    if let Some(source) = ex.error {
        return Err(ExchangeError::Transport { uri: ex.request.uri.to_string(), source });
    }
    match ex.status() {
        Some(status) if status.as_u16() >= 400 => Err(ExchangeError::Status(status)),
        _ => Ok(op_index + 1),
    }
}
