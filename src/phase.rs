use serde::Serialize;
use strum::{Display, EnumIter, IntoStaticStr};

use crate::{context::IterationEnv, error::ExchangeError, exchange, template::CompiledOperation};

/// A phase of the benchmark flow.
///
/// `Before` and `After` run once per benchmark, the other three run once per
/// iteration in declaration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter, IntoStaticStr, Serialize)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    /// One-time setup before any iteration.
    Before,
    /// Per-iteration setup.
    BeforeMain,
    /// The measured operations of an iteration.
    Main,
    /// Per-iteration teardown.
    AfterMain,
    /// One-time teardown after every iteration completed.
    After,
}

/// Current state of the scheduler.
///
/// State transitions: `Idle → Filling → Draining → Complete` (Complete is terminal)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display)]
pub enum SchedulerState {
    /// Nothing queued yet; the one-time `before` phase may be running.
    #[default]
    Idle,
    /// Iteration tasks are still being created.
    Filling,
    /// Every task was created; waiting for the outstanding ones.
    Draining,
    /// No iteration is left; teardown and the terminal notification follow.
    Complete,
}

/// Runs the operations of one phase strictly in order.
///
/// Each successful exchange yields the index of the next operation; the first
/// failure aborts the remaining operations and is returned.
pub(crate) async fn run_phase(
    env: &mut IterationEnv,
    phase: Phase,
    ops: &[CompiledOperation],
) -> Result<(), ExchangeError> {
    env.phase = phase;
    let mut next = 0;
    for op in ops {
        next = exchange::execute(env, op, next).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use http::StatusCode;
    use serde_json::json;
    use strum::IntoEnumIterator;

    use super::*;
    use crate::{context::tests::test_env, flow::Operation, hooks::Hook, template::Compiler, testing::TestServer};

    fn compile(ops: Vec<Operation>) -> Vec<CompiledOperation> {
        let compiler = Compiler::default();
        ops.iter().map(|op| compiler.operation(op)).collect::<Result<_, _>>().unwrap()
    }

    #[test]
    fn phase_names_match_flow_keys() {
        let names: Vec<&'static str> = Phase::iter().map(Into::into).collect();
        assert_eq!(names, ["before", "beforeMain", "main", "afterMain", "after"]);
        assert_eq!(Phase::BeforeMain.to_string(), "beforeMain");
        assert_eq!(serde_json::to_value(Phase::AfterMain).unwrap(), json!("afterMain"));
    }

    #[tokio::test]
    async fn operations_run_in_order() {
        let server = TestServer::ok().await;
        let ops = compile(vec![
            Operation::post(server.url("/items")),
            Operation::get(server.url("/items/1")),
            Operation::delete(server.url("/items/1")),
        ]);
        let mut env = test_env(0);

        run_phase(&mut env, Phase::Main, &ops).await.unwrap();

        let seen: Vec<_> = server.requests().into_iter().map(|r| (r.method, r.path)).collect();
        assert_eq!(
            seen,
            [
                (http::Method::POST, "/items".to_string()),
                (http::Method::GET, "/items/1".to_string()),
                (http::Method::DELETE, "/items/1".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn first_failure_aborts_the_phase() {
        let server = TestServer::start(|r| {
            if r.path == "/missing" { StatusCode::NOT_FOUND } else { StatusCode::OK }
        })
        .await;
        let ops = compile(vec![
            Operation::get(server.url("/ok")),
            Operation::get(server.url("/missing")),
            Operation::get(server.url("/never")),
        ]);
        let mut env = test_env(0);

        let err = run_phase(&mut env, Phase::BeforeMain, &ops).await.unwrap_err();

        assert!(matches!(err, ExchangeError::Status(StatusCode::NOT_FOUND)));
        assert_eq!(server.requests().len(), 2);
        assert_eq!(env.phase(), Phase::BeforeMain);
    }

    #[tokio::test]
    async fn op_index_follows_position() {
        let server = TestServer::ok().await;
        let seen = Arc::new(AtomicUsize::new(usize::MAX));
        let record = seen.clone();
        let ops = compile(vec![
            Operation::get(server.url("/a")),
            Operation::get(server.url("/b")).before_hook(Hook::from_fn("record", move |ex| {
                record.store(ex.op_index, Ordering::SeqCst);
                Ok(())
            })),
        ]);
        let mut env = test_env(0);

        run_phase(&mut env, Phase::Main, &ops).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
