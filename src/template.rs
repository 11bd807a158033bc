//! Per-iteration token substitution.
//!
//! Operation fields are scanned once, when the flow is compiled. A field
//! without placeholders stays a [`Field::Literal`]; any other field becomes a
//! [`Field::Deferred`] template rendered with the iteration index right before
//! the request is built.
//!
//! Supported placeholders:
//!
//! - `#{INDEX}`: the zero-based iteration number.
//! - `#{GUID}`: a random UUID, the same one for every occurrence within one
//!   rendering.
//! - `#{INDEX.<name>}`: element `INDEX` of the named input array, clamped to
//!   the last element.
use std::{collections::HashMap, sync::Arc};

use http::{HeaderMap, HeaderName, HeaderValue, Method};
use reqwest::Url;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    error::{BenchError, ExchangeError, Result},
    exchange::{Request, RequestBody},
    flow::{Flow, Operation, Payload},
    hooks::Hook,
};

const OPEN: &str = "#{";

#[derive(Clone, Debug, PartialEq)]
enum Segment {
    Text(String),
    Index,
    Guid,
    Input { name: String, values: Arc<[String]> },
}

/// A field body with placeholders, split into segments at compile time.
#[derive(Clone, Debug, PartialEq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Parses `text`, returning `None` when it has no placeholder.
    fn parse(text: &str, inputs: &HashMap<String, Arc<[String]>>) -> Result<Option<Self>> {
        let mut segments = Vec::new();
        let mut text_start = 0;
        let mut pos = 0;

        while let Some(found) = text[pos..].find(OPEN) {
            let start = pos + found;
            let Some(len) = text[start..].find('}') else { break };
            let token = &text[start + OPEN.len()..start + len];
            let segment = match token {
                "INDEX" => Some(Segment::Index),
                "GUID" => Some(Segment::Guid),
                _ => match token.strip_prefix("INDEX.") {
                    Some(name) if is_word(name) => {
                        let values = inputs.get(name).filter(|v| !v.is_empty()).ok_or_else(|| {
                            BenchError::config(format!("`#{{INDEX.{name}}}` needs a non-empty dynamicInputArrays.{name}"))
                        })?;
                        Some(Segment::Input { name: name.to_string(), values: values.clone() })
                    }
                    _ => None,
                },
            };

            let Some(segment) = segment else {
                pos = start + OPEN.len();
                continue;
            };
            if start > text_start {
                segments.push(Segment::Text(text[text_start..start].to_string()));
            }
            segments.push(segment);
            pos = start + len + 1;
            text_start = pos;
        }

        if segments.is_empty() {
            return Ok(None);
        }
        if text_start < text.len() {
            segments.push(Segment::Text(text[text_start..].to_string()));
        }
        Ok(Some(Self { segments }))
    }

    /// Renders the template for iteration `index`.
    pub fn render(&self, index: u64) -> String {
        let mut guid = None;
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Index => out.push_str(&index.to_string()),
                Segment::Guid => out.push_str(guid.get_or_insert_with(|| Uuid::new_v4().to_string())),
                Segment::Input { values, .. } => {
                    let i = usize::try_from(index).unwrap_or(usize::MAX).min(values.len() - 1);
                    out.push_str(&values[i]);
                }
            }
        }
        out
    }

    /// Names of the input arrays the template reads.
    pub fn inputs(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Input { name, .. } => Some(name.as_str()),
            _ => None,
        })
    }
}

fn is_word(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A field that is either known at compile time or rendered per iteration.
#[derive(Clone, Debug, PartialEq)]
pub enum Field<T> {
    /// Static value used as is by every iteration.
    Literal(T),
    /// Template rendered with the iteration index.
    Deferred(Template),
}

impl<T: Clone> Field<T> {
    fn resolve(
        &self,
        index: u64,
        field: &'static str,
        parse: impl FnOnce(String) -> Result<T, String>,
    ) -> Result<T, ExchangeError> {
        match self {
            Field::Literal(v) => Ok(v.clone()),
            Field::Deferred(t) => {
                let rendered = t.render(index);
                log::debug!("resolved {field} for iteration {index}: {rendered}");
                parse(rendered).map_err(|reason| ExchangeError::Substitution { field, reason })
            }
        }
    }

    /// Returns `true` if the field is rendered per iteration.
    pub fn is_deferred(&self) -> bool {
        matches!(self, Field::Deferred(_))
    }
}

#[derive(Clone, Debug)]
enum CompiledBody {
    Empty,
    Json(Field<Value>),
    Text(Field<String>),
    Form(Vec<(String, String)>),
}

/// An [`Operation`] with validated headers and substitution fields compiled.
#[derive(Clone, Debug)]
pub struct CompiledOperation {
    method: Method,
    uri: Field<Url>,
    headers: HeaderMap,
    body: CompiledBody,
    pub(crate) before_hooks: Vec<Hook>,
    pub(crate) after_hooks: Vec<Hook>,
}

impl CompiledOperation {
    /// Builds the concrete request of iteration `index`.
    pub(crate) fn resolve(&self, index: u64) -> Result<Request, ExchangeError> {
        let uri = self.uri.resolve(index, "uri", |s| Url::parse(&s).map_err(|e| format!("`{s}`: {e}")))?;
        let body = match &self.body {
            CompiledBody::Empty => RequestBody::Empty,
            CompiledBody::Json(json) => RequestBody::Json(
                json.resolve(index, "json", |s| serde_json::from_str(&s).map_err(|e| format!("`{s}`: {e}")))?,
            ),
            CompiledBody::Text(text) => RequestBody::Text(text.resolve(index, "body", Ok)?),
            CompiledBody::Form(fields) => RequestBody::Form(fields.clone()),
        };
        Ok(Request { method: self.method.clone(), uri, headers: self.headers.clone(), body })
    }

    /// The URI field.
    pub fn uri(&self) -> &Field<Url> {
        &self.uri
    }
}

/// The five phases of a flow, compiled.
#[derive(Clone, Debug, Default)]
pub struct CompiledFlow {
    pub(crate) before: Vec<CompiledOperation>,
    pub(crate) before_main: Vec<CompiledOperation>,
    pub(crate) main: Vec<CompiledOperation>,
    pub(crate) after_main: Vec<CompiledOperation>,
    pub(crate) after: Vec<CompiledOperation>,
}

/// Compiles operations against a fixed set of named input arrays.
#[derive(Clone, Debug, Default)]
pub struct Compiler {
    inputs: HashMap<String, Arc<[String]>>,
}

impl Compiler {
    /// Creates a compiler for `#{INDEX.<name>}` lookups into `inputs`.
    ///
    /// String elements are inserted as is, other elements as JSON text.
    pub fn new(inputs: &HashMap<String, Vec<Value>>) -> Self {
        let inputs = inputs
            .iter()
            .map(|(name, values)| {
                let values: Arc<[String]> = values
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        v => v.to_string(),
                    })
                    .collect();
                (name.clone(), values)
            })
            .collect();
        Self { inputs }
    }

    fn template(&self, text: &str) -> Result<Option<Template>> {
        Template::parse(text, &self.inputs)
    }

    /// Validates `op` and compiles its substitution fields.
    pub fn operation(&self, op: &Operation) -> Result<CompiledOperation> {
        let uri = match self.template(&op.uri)? {
            Some(t) => Field::Deferred(t),
            None => Field::Literal(
                Url::parse(&op.uri).map_err(|e| BenchError::config(format!("invalid uri `{}`: {e}", op.uri)))?,
            ),
        };

        let mut headers = HeaderMap::with_capacity(op.headers.len());
        for (name, value) in &op.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| BenchError::config(format!("invalid header name `{name}`: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| BenchError::config(format!("invalid value for header `{name}`: {e}")))?;
            headers.append(name, value);
        }

        let body = match &op.payload {
            Payload::None => CompiledBody::Empty,
            Payload::Json(json) => {
                let text = json.to_string();
                CompiledBody::Json(match self.template(&text)? {
                    Some(t) => Field::Deferred(t),
                    None => Field::Literal(json.clone()),
                })
            }
            Payload::Body(body) => CompiledBody::Text(match self.template(body)? {
                Some(t) => Field::Deferred(t),
                None => Field::Literal(body.clone()),
            }),
            Payload::Form(fields) => CompiledBody::Form(fields.clone()),
        };

        Ok(CompiledOperation {
            method: op.method.clone(),
            uri,
            headers,
            body,
            before_hooks: op.before_hooks.clone(),
            after_hooks: op.after_hooks.clone(),
        })
    }

    fn operations(&self, ops: &[Operation]) -> Result<Vec<CompiledOperation>> {
        ops.iter().map(|op| self.operation(op)).collect()
    }

    /// Compiles every phase of `flow`.
    pub fn flow(&self, flow: &Flow) -> Result<CompiledFlow> {
        flow.validate()?;
        Ok(CompiledFlow {
            before: self.operations(&flow.before)?,
            before_main: self.operations(&flow.before_main)?,
            main: self.operations(&flow.main)?,
            after_main: self.operations(&flow.after_main)?,
            after: self.operations(&flow.after)?,
        })
    }
}
