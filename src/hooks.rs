//! Hooks run around every exchange.
//!
//! Before-hooks see the resolved request and may change it; after-hooks see
//! the response (or the transport error) and may rewrite the status or fail
//! the exchange. Hooks of one stage run left to right and the first failure
//! ends the stage.
use std::{fmt, str::FromStr, sync::Arc};

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use http::{
    Method, StatusCode,
    header::{ETAG, IF_MATCH, IF_NONE_MATCH, LOCATION},
};

use crate::{error::ExchangeError, exchange::Exchange};

/// A user supplied hook.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use restbench::{CustomHook, Exchange};
///
/// struct RememberLocation;
///
/// #[async_trait]
/// impl CustomHook for RememberLocation {
///     fn name(&self) -> &str {
///         "rememberLocation"
///     }
///
///     async fn call(&self, ex: &mut Exchange<'_>) -> anyhow::Result<()> {
///         let location = ex.response.as_ref().and_then(|r| r.headers.get("location"));
///         if let Some(location) = location.and_then(|v| v.to_str().ok()) {
///             let location = location.to_string();
///             ex.env.iter_ctx_mut().insert("location", location.into());
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait CustomHook: Send + Sync {
    /// Name used in error messages.
    fn name(&self) -> &str {
        "custom"
    }

    /// Runs the hook; an error fails the exchange.
    async fn call(&self, ex: &mut Exchange<'_>) -> anyhow::Result<()>;
}

struct FnHook<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> CustomHook for FnHook<F>
where
    F: Fn(&mut Exchange<'_>) -> anyhow::Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, ex: &mut Exchange<'_>) -> anyhow::Result<()> {
        (self.f)(ex)
    }
}

/// A hook of an operation.
#[derive(Clone)]
pub enum Hook {
    /// Sends the cached entity tag of the URI as `If-None-Match` for `GET`
    /// and `HEAD`, as `If-Match` otherwise.
    UseEtag,
    /// Caches the `ETag` of a 2xx response, under `Location` for `POST`.
    SaveEtag,
    /// Turns a 4xx status into 200.
    IgnoreStatus,
    /// Fails unless the status is within 200-299.
    Verify2xx,
    /// Starts the timer `step_<op index>`.
    StartStepTimer,
    /// Stops the timer `step_<op index>` and records it.
    EndStepTimer,
    /// A user supplied hook.
    Custom(Arc<dyn CustomHook>),
}

impl Hook {
    /// Wraps a synchronous closure.
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut Exchange<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Hook::Custom(Arc::new(FnHook { name: name.into(), f }))
    }

    /// Wraps a [`CustomHook`].
    pub fn custom(hook: impl CustomHook + 'static) -> Self {
        Hook::Custom(Arc::new(hook))
    }

    /// Name of the hook as used in flow files.
    pub fn name(&self) -> &str {
        match self {
            Hook::UseEtag => "useEtag",
            Hook::SaveEtag => "saveEtag",
            Hook::IgnoreStatus => "ignoreStatus",
            Hook::Verify2xx => "verify2XX",
            Hook::StartStepTimer => "startStepTimer",
            Hook::EndStepTimer => "endStepTimer",
            Hook::Custom(hook) => hook.name(),
        }
    }

    async fn call(&self, ex: &mut Exchange<'_>) -> anyhow::Result<()> {
        match self {
            Hook::UseEtag => use_etag(ex),
            Hook::SaveEtag => save_etag(ex),
            Hook::IgnoreStatus => {
                if ex.error.is_none()
                    && let Some(resp) = ex.response.as_mut()
                    && resp.status.is_client_error()
                {
                    resp.status = StatusCode::OK;
                }
            }
            Hook::Verify2xx => {
                if ex.error.is_none() {
                    match ex.status() {
                        Some(status) if status.is_success() => {}
                        Some(status) => {
                            bail!("statusCode was not in 200-299 range, statusCode: {}", status.as_u16())
                        }
                        None => bail!("no response to verify"),
                    }
                }
            }
            Hook::StartStepTimer => ex.env.iter_ctx_mut().start_step(ex.op_index),
            Hook::EndStepTimer => {
                let step = ex.op_index;
                let elapsed = ex
                    .env
                    .iter_ctx_mut()
                    .end_step(step)
                    .ok_or_else(|| anyhow!("step timer step_{step} was never started"))?;
                ex.env.stats().record(&format!("step_{step}"), elapsed)?;
            }
            Hook::Custom(hook) => hook.call(ex).await?,
        }
        Ok(())
    }
}

fn use_etag(ex: &mut Exchange<'_>) {
    if let Some(tag) = ex.env.etags().get(ex.request.uri.as_str()) {
        let header = match ex.request.method {
            Method::GET | Method::HEAD => IF_NONE_MATCH,
            _ => IF_MATCH,
        };
        ex.request.headers.insert(header, tag);
    }
}

fn save_etag(ex: &mut Exchange<'_>) {
    if ex.error.is_some() {
        return;
    }
    let Some(resp) = &ex.response else { return };
    let Some(tag) = resp.headers.get(ETAG).filter(|_| resp.status.is_success()) else { return };

    let location = (ex.request.method == Method::POST)
        .then(|| resp.headers.get(LOCATION))
        .flatten()
        .and_then(|l| l.to_str().ok())
        .and_then(|l| ex.request.uri.join(l).ok());
    let uri = location.as_ref().unwrap_or(&ex.request.uri);
    ex.env.etags().insert(uri.as_str(), tag.clone());
}

impl FromStr for Hook {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "useEtag" => Ok(Hook::UseEtag),
            "saveEtag" => Ok(Hook::SaveEtag),
            "ignoreStatus" => Ok(Hook::IgnoreStatus),
            "verify2XX" => Ok(Hook::Verify2xx),
            "startStepTimer" => Ok(Hook::StartStepTimer),
            "endStepTimer" => Ok(Hook::EndStepTimer),
            _ => Err(format!("unknown hook `{s}`")),
        }
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hook::Custom(hook) => f.debug_tuple("Custom").field(&hook.name()).finish(),
            hook => f.write_str(hook.name()),
        }
    }
}

/// Runs `hooks` in order over `ex`, stopping at the first failure.
pub(crate) async fn apply_hooks(hooks: &[Hook], ex: &mut Exchange<'_>) -> Result<(), ExchangeError> {
    for hook in hooks {
        hook.call(ex)
            .await
            .map_err(|source| ExchangeError::Hook { hook: hook.name().to_string(), source })?;
    }
    Ok(())
}
