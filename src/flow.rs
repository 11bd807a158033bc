//! The flow model: operations grouped into the five phases of a benchmark.
//!
//! Flows are usually written as JSON and normalized with [`Flow::from_json`],
//! which accepts several shorthands:
//!
//! ```
//! use restbench::Flow;
//! use serde_json::json;
//!
//! // a single URI is one GET in `main`
//! let flow = Flow::from_json(json!("http://localhost:8000/")).unwrap();
//! assert_eq!(flow.main.len(), 1);
//!
//! // an array is the `main` phase
//! let flow = Flow::from_json(json!([
//!     { "put": "http://localhost:8000/foo", "json": "mydata" },
//!     { "get": "http://localhost:8000/foo" }
//! ]))
//! .unwrap();
//! assert_eq!(flow.main.len(), 2);
//!
//! // or spell out the phases
//! let flow = Flow::from_json(json!({
//!     "before": [{ "put": "http://localhost:8000/init" }],
//!     "main": [{ "get": "http://localhost:8000/foo_#{INDEX}" }],
//! }))
//! .unwrap();
//! assert_eq!(flow.before.len(), 1);
//! ```
use std::str::FromStr;

use http::Method;
use itertools::Itertools;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use strum::IntoEnumIterator;

use crate::{
    error::{BenchError, Result},
    hooks::Hook,
    phase::Phase,
};

/// Method shortcut keys and the methods they stand for. `del` is `DELETE`.
const METHOD_KEYS: [(&str, Method); 6] = [
    ("get", Method::GET),
    ("head", Method::HEAD),
    ("put", Method::PUT),
    ("post", Method::POST),
    ("del", Method::DELETE),
    ("patch", Method::PATCH),
];

/// Request payload of an operation.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Payload {
    /// No body.
    #[default]
    None,
    /// A JSON document, sent with `Content-Type: application/json`.
    Json(Value),
    /// A raw string body.
    Body(String),
    /// Text fields sent as `multipart/form-data`.
    Form(Vec<(String, String)>),
}

/// One HTTP request template.
#[derive(Clone, Debug)]
pub struct Operation {
    pub(crate) method: Method,
    pub(crate) uri: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) payload: Payload,
    pub(crate) before_hooks: Vec<Hook>,
    pub(crate) after_hooks: Vec<Hook>,
}

impl Operation {
    /// Creates an operation sending `method` to `uri`.
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: Vec::new(),
            payload: Payload::None,
            before_hooks: Vec::new(),
            after_hooks: Vec::new(),
        }
    }

    /// A `GET` operation.
    pub fn get(uri: impl Into<String>) -> Self {
        Self::new(Method::GET, uri)
    }

    /// A `HEAD` operation.
    pub fn head(uri: impl Into<String>) -> Self {
        Self::new(Method::HEAD, uri)
    }

    /// A `PUT` operation.
    pub fn put(uri: impl Into<String>) -> Self {
        Self::new(Method::PUT, uri)
    }

    /// A `POST` operation.
    pub fn post(uri: impl Into<String>) -> Self {
        Self::new(Method::POST, uri)
    }

    /// A `DELETE` operation.
    pub fn delete(uri: impl Into<String>) -> Self {
        Self::new(Method::DELETE, uri)
    }

    /// A `PATCH` operation.
    pub fn patch(uri: impl Into<String>) -> Self {
        Self::new(Method::PATCH, uri)
    }

    /// Adds a request header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sends `json` as the request body.
    pub fn json(mut self, json: Value) -> Self {
        self.payload = Payload::Json(json);
        self
    }

    /// Sends `body` as the raw request body.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.payload = Payload::Body(body.into());
        self
    }

    /// Adds a multipart form field, replacing any other payload.
    pub fn form_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let field = (name.into(), value.into());
        match &mut self.payload {
            Payload::Form(fields) => fields.push(field),
            payload => *payload = Payload::Form(vec![field]),
        }
        self
    }

    /// Appends a hook run before the request is sent.
    pub fn before_hook(mut self, hook: Hook) -> Self {
        self.before_hooks.push(hook);
        self
    }

    /// Appends a hook run after the response was read.
    pub fn after_hook(mut self, hook: Hook) -> Self {
        self.after_hooks.push(hook);
        self
    }

    /// Request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Target URI template.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Request payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Parses one operation object.
    pub fn from_json(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| BenchError::config(format!("operation must be an object, got `{value}`")))?;

        let shortcuts: Vec<_> = METHOD_KEYS.iter().filter(|(key, _)| obj.contains_key(*key)).collect();
        let mut op = match shortcuts.as_slice() {
            [(key, method)] => Operation::new(method.clone(), string_field(obj, key)?),
            [_, _, ..] => {
                let keys = shortcuts.iter().map(|(k, _)| *k).join(", ");
                return Err(BenchError::config(format!("operation has more than one method shortcut: {keys}")));
            }
            [] => {
                let uri = obj.get("uri").ok_or_else(|| {
                    BenchError::config(format!("operation needs one of get, head, put, post, del, patch or uri: `{value}`"))
                })?;
                let uri = as_string("uri", uri)?;
                let method = match obj.get("method") {
                    Some(m) => {
                        let m = as_string("method", m)?;
                        Method::from_str(&m).map_err(|_| BenchError::config(format!("invalid method `{m}`")))?
                    }
                    None => Method::GET,
                };
                Operation::new(method, uri)
            }
        };

        if let Some(headers) = obj.get("headers") {
            let headers = headers
                .as_object()
                .ok_or_else(|| BenchError::config("`headers` must be an object"))?;
            for (name, v) in headers {
                let v = match v {
                    Value::String(s) => s.clone(),
                    Value::Number(_) | Value::Bool(_) => v.to_string(),
                    _ => return Err(BenchError::config(format!("header `{name}` must be a string"))),
                };
                op.headers.push((name.clone(), v));
            }
        }

        let payloads = ["json", "body", "formData"].into_iter().filter(|k| obj.contains_key(*k)).count();
        if payloads > 1 {
            return Err(BenchError::config("operation can only have one of json, body or formData"));
        }
        if let Some(json) = obj.get("json") {
            op.payload = Payload::Json(json.clone());
        }
        if obj.contains_key("body") {
            op.payload = Payload::Body(string_field(obj, "body")?);
        }
        if let Some(form) = obj.get("formData") {
            let form = form
                .as_object()
                .ok_or_else(|| BenchError::config("`formData` must be an object"))?;
            let fields = form
                .iter()
                .map(|(k, v)| Ok((k.clone(), as_string(k, v)?)))
                .collect::<Result<Vec<_>>>()?;
            op.payload = Payload::Form(fields);
        }

        op.before_hooks = hooks_field(obj, "beforeHooks")?;
        op.after_hooks = hooks_field(obj, "afterHooks")?;
        Ok(op)
    }
}

fn as_string(field: &str, v: &Value) -> Result<String> {
    match v {
        Value::String(s) => Ok(s.clone()),
        _ => Err(BenchError::config(format!("`{field}` must be a string, got `{v}`"))),
    }
}

fn string_field(obj: &Map<String, Value>, field: &str) -> Result<String> {
    as_string(field, &obj[field])
}

fn hooks_field(obj: &Map<String, Value>, field: &str) -> Result<Vec<Hook>> {
    let Some(hooks) = obj.get(field) else {
        return Ok(Vec::new());
    };
    let hooks = hooks
        .as_array()
        .ok_or_else(|| BenchError::config(format!("`{field}` must be an array of hook names")))?;

    let mut out = Vec::with_capacity(hooks.len());
    for hook in hooks {
        let name = hook
            .as_str()
            .ok_or_else(|| BenchError::config(format!("`{field}` entries must be hook names, got `{hook}`")))?;
        match Hook::from_str(name) {
            Ok(hook) => out.push(hook),
            Err(_) => log::warn!("ignoring unknown hook `{name}` in {field}"),
        }
    }
    Ok(out)
}

/// Operations of a benchmark, grouped by phase.
#[derive(Clone, Debug, Default)]
pub struct Flow {
    /// Run once before any iteration.
    pub before: Vec<Operation>,
    /// Run at the start of every iteration.
    pub before_main: Vec<Operation>,
    /// The measured operations of every iteration.
    pub main: Vec<Operation>,
    /// Run at the end of every iteration.
    pub after_main: Vec<Operation>,
    /// Run once after every iteration finished.
    pub after: Vec<Operation>,
}

impl Flow {
    /// A flow with only `main` operations.
    pub fn new(main: Vec<Operation>) -> Self {
        Self { main, ..Default::default() }
    }

    /// Sets the one-time setup operations.
    pub fn with_before(mut self, ops: Vec<Operation>) -> Self {
        self.before = ops;
        self
    }

    /// Sets the per-iteration setup operations.
    pub fn with_before_main(mut self, ops: Vec<Operation>) -> Self {
        self.before_main = ops;
        self
    }

    /// Sets the per-iteration teardown operations.
    pub fn with_after_main(mut self, ops: Vec<Operation>) -> Self {
        self.after_main = ops;
        self
    }

    /// Sets the one-time teardown operations.
    pub fn with_after(mut self, ops: Vec<Operation>) -> Self {
        self.after = ops;
        self
    }

    /// Operations of `phase`.
    pub fn phase(&self, phase: Phase) -> &[Operation] {
        match phase {
            Phase::Before => &self.before,
            Phase::BeforeMain => &self.before_main,
            Phase::Main => &self.main,
            Phase::AfterMain => &self.after_main,
            Phase::After => &self.after,
        }
    }

    fn phase_mut(&mut self, phase: Phase) -> &mut Vec<Operation> {
        match phase {
            Phase::Before => &mut self.before,
            Phase::BeforeMain => &mut self.before_main,
            Phase::Main => &mut self.main,
            Phase::AfterMain => &mut self.after_main,
            Phase::After => &mut self.after,
        }
    }

    /// Normalizes a JSON flow description and validates it.
    ///
    /// Accepts a URI string (one `main` GET), an array (the `main` phase), a
    /// single operation object, or an object keyed by phase names.
    pub fn from_json(input: Value) -> Result<Self> {
        let phases = match input {
            Value::String(uri) if !uri.is_empty() => {
                Map::from_iter([("main".to_string(), Value::Array(vec![Value::Object(
                    Map::from_iter([("get".to_string(), Value::String(uri))]),
                )]))])
            }
            Value::Array(ops) => Map::from_iter([("main".to_string(), Value::Array(ops))]),
            Value::Object(obj) if !obj.is_empty() && !is_phase_object(&obj) => {
                Map::from_iter([("main".to_string(), Value::Array(vec![Value::Object(obj)]))])
            }
            Value::Object(obj) => obj,
            Value::Null | Value::String(_) => Map::new(),
            other => return Err(BenchError::config(format!("unsupported flow `{other}`"))),
        };

        let mut flow = Flow::default();
        for phase in Phase::iter() {
            let key: &'static str = phase.into();
            let Some(ops) = phases.get(key) else { continue };
            let ops = ops
                .as_array()
                .ok_or_else(|| BenchError::config(format!("flow.{key} must be an array of operations")))?;
            *flow.phase_mut(phase) = ops.iter().map(Operation::from_json).collect::<Result<_>>()?;
        }
        flow.validate()?;
        Ok(flow)
    }

    /// Checks that `main` has at least one operation.
    pub fn validate(&self) -> Result<()> {
        if self.main.is_empty() {
            return Err(BenchError::config("benchmark flow requires main operations, missing flow.main?"));
        }
        Ok(())
    }
}

fn is_phase_object(obj: &Map<String, Value>) -> bool {
    ["before", "beforeMain", "main", "afterMain", "after"].iter().any(|k| obj.contains_key(*k))
}

impl<'de> Deserialize<'de> for Flow {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Flow::from_json(value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn uri_string_is_a_main_get() {
        let flow = Flow::from_json(json!("http://localhost:8000/")).unwrap();
        assert_eq!(flow.main.len(), 1);
        assert_eq!(flow.main[0].method, Method::GET);
        assert_eq!(flow.main[0].uri, "http://localhost:8000/");
        assert!(flow.before.is_empty() && flow.after.is_empty());
    }

    #[test]
    fn array_is_the_main_phase() {
        let flow = Flow::from_json(json!([
            { "put": "http://x/foo", "json": "mydata" },
            { "get": "http://x/foo" },
        ]))
        .unwrap();
        assert_eq!(flow.main.len(), 2);
        assert_eq!(flow.main[0].method, Method::PUT);
        assert_eq!(flow.main[0].payload, Payload::Json(json!("mydata")));
    }

    #[test]
    fn object_without_phase_keys_is_one_operation() {
        let flow = Flow::from_json(json!({ "head": "http://x/" })).unwrap();
        assert_eq!(flow.main.len(), 1);
        assert_eq!(flow.main[0].method, Method::HEAD);
    }

    #[test]
    fn phase_object_keeps_phases() {
        let flow = Flow::from_json(json!({
            "before": [{ "put": "http://x/init" }],
            "beforeMain": [{ "post": "http://x/items" }],
            "main": [{ "get": "http://x/items" }],
            "afterMain": [{ "del": "http://x/items" }],
        }))
        .unwrap();
        assert_eq!(flow.phase(Phase::Before)[0].method, Method::PUT);
        assert_eq!(flow.phase(Phase::BeforeMain)[0].method, Method::POST);
        assert_eq!(flow.phase(Phase::AfterMain)[0].method, Method::DELETE);
        assert!(flow.after.is_empty());
    }

    #[test]
    fn empty_flows_are_rejected() {
        for input in [Value::Null, json!(""), json!({}), json!([]), json!({ "before": [] })] {
            let err = Flow::from_json(input.clone()).unwrap_err();
            assert!(matches!(err, BenchError::Configuration(_)), "{input}: {err}");
        }
    }

    #[test]
    fn phase_must_be_an_array() {
        let err = Flow::from_json(json!({ "main": { "get": "http://x/" } })).unwrap_err();
        assert!(err.to_string().contains("flow.main must be an array"));
    }

    #[test]
    fn explicit_method_and_uri() {
        let op = Operation::from_json(&json!({ "method": "OPTIONS", "uri": "http://x/" })).unwrap();
        assert_eq!(op.method, Method::OPTIONS);
        let op = Operation::from_json(&json!({ "uri": "http://x/" })).unwrap();
        assert_eq!(op.method, Method::GET);
    }

    #[test]
    fn malformed_operations() {
        for op in [
            json!({ "get": "http://x/", "post": "http://x/" }),
            json!({ "headers": {} }),
            json!({ "get": 42 }),
            json!({ "get": "http://x/", "headers": { "X-A": ["a"] } }),
            json!({ "post": "http://x/", "json": {}, "body": "b" }),
            json!({ "get": "http://x/", "afterHooks": "verify2XX" }),
            json!({ "method": "BAD METHOD", "uri": "http://x/" }),
        ] {
            assert!(Operation::from_json(&op).is_err(), "{op}");
        }
    }

    #[test]
    fn headers_body_and_hooks() {
        let op = Operation::from_json(&json!({
            "post": "http://x/",
            "headers": { "Accept-Encoding": "gzip", "X-Num": 3 },
            "body": "raw",
            "beforeHooks": ["useEtag", "noSuchHook"],
            "afterHooks": ["saveEtag", "verify2XX"],
        }))
        .unwrap();
        assert_eq!(
            op.headers,
            [("Accept-Encoding".to_string(), "gzip".to_string()), ("X-Num".to_string(), "3".to_string())]
        );
        assert_eq!(op.payload, Payload::Body("raw".into()));
        assert_eq!(op.before_hooks.len(), 1);
        assert_eq!(op.after_hooks.iter().map(Hook::name).collect::<Vec<_>>(), ["saveEtag", "verify2XX"]);
    }

    #[test]
    fn form_data() {
        let op = Operation::from_json(&json!({ "post": "http://x/", "formData": { "name": "a" } })).unwrap();
        assert_eq!(op.payload, Payload::Form(vec![("name".into(), "a".into())]));
        let op = Operation::post("http://x/").form_field("a", "1").form_field("b", "2");
        assert_eq!(op.payload, Payload::Form(vec![("a".into(), "1".into()), ("b".into(), "2".into())]));
    }

    #[test]
    fn deserializes_through_normalization() {
        let flow: Flow = serde_json::from_value(json!([{ "get": "http://x/a" }])).unwrap();
        assert_eq!(flow.main[0].uri, "http://x/a");
        assert!(serde_json::from_value::<Flow>(json!({})).is_err());
    }
}
