//! Flow chain: ordered forward steps with reverse-order rollback.

use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use serde::Serialize;

use crate::error::FlowFailure;
use crate::state::SagaState;

type ForwardFn<C, E> =
    Box<dyn for<'a> FnOnce(&'a mut C) -> BoxFuture<'a, Result<(), E>> + Send>;
type RollbackFn<C> = Box<dyn for<'a> FnOnce(&'a mut C) -> BoxFuture<'a, ()> + Send>;

/// One step of a flow chain.
///
/// The forward action either proceeds (`Ok`) or fails the chain (`Err`).
/// The optional rollback undoes the forward action once a later step fails;
/// it cannot fail, so problems inside it are logged by the rollback itself.
/// A step without a rollback is non-compensable.
pub struct Step<C, E> {
    name: String,
    forward: ForwardFn<C, E>,
    rollback: Option<RollbackFn<C>>,
}

impl<C, E> Step<C, E> {
    /// Creates a non-compensable step.
    pub fn new<F>(name: impl Into<String>, forward: F) -> Self
    where
        F: for<'a> FnOnce(&'a mut C) -> BoxFuture<'a, Result<(), E>> + Send + 'static,
    {
        Self {
            name: name.into(),
            forward: Box::new(forward),
            rollback: None,
        }
    }

    /// Attaches the action that undoes this step.
    pub fn with_rollback<R>(mut self, rollback: R) -> Self
    where
        R: for<'a> FnOnce(&'a mut C) -> BoxFuture<'a, ()> + Send + 'static,
    {
        self.rollback = Some(Box::new(rollback));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_compensable(&self) -> bool {
        self.rollback.is_some()
    }
}

impl<C, E> std::fmt::Debug for Step<C, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("compensable", &self.is_compensable())
            .finish()
    }
}

/// What happened during one run of a flow chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowReport {
    pub chain: String,
    pub state: SagaState,
    /// Steps whose forward action proceeded, in execution order.
    pub completed_steps: Vec<String>,
    pub failed_step: Option<String>,
    /// Steps whose rollback ran, in rollback order.
    pub rolled_back: Vec<String>,
    pub elapsed: Duration,
}

impl FlowReport {
    fn new(chain: &str) -> Self {
        Self {
            chain: chain.to_string(),
            state: SagaState::NotStarted,
            completed_steps: Vec::new(),
            failed_step: None,
            rolled_back: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    fn transition(&mut self, next: SagaState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal flow transition {} -> {}",
            self.state,
            next
        );
        self.state = next;
    }
}

/// An ordered list of steps run against a shared context.
pub struct FlowChain<C, E> {
    name: String,
    steps: Vec<Step<C, E>>,
}

impl<C, E> FlowChain<C, E>
where
    C: Send,
    E: std::fmt::Display,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Appends a step.
    pub fn then(mut self, step: Step<C, E>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs the steps in order.
    ///
    /// On success every forward action has proceeded. On failure at step
    /// `k`, the rollbacks of steps `k-1..0` have run in that order and the
    /// returned [`FlowFailure`] carries step `k`'s error. Rollbacks never
    /// trigger further rollback.
    #[tracing::instrument(skip_all, fields(chain = %self.name, steps = self.steps.len()))]
    pub async fn run(self, ctx: &mut C) -> Result<FlowReport, FlowFailure<E>> {
        metrics::counter!("saga_executions_total").increment(1);
        let start = Instant::now();

        let mut report = FlowReport::new(&self.name);
        report.transition(SagaState::Running);

        let mut undo: Vec<(String, Option<RollbackFn<C>>)> = Vec::with_capacity(self.steps.len());

        for step in self.steps {
            let Step {
                name,
                forward,
                rollback,
            } = step;

            tracing::debug!(step = %name, "flow step started");
            match forward(&mut *ctx).await {
                Ok(()) => {
                    tracing::debug!(step = %name, "flow step completed");
                    report.completed_steps.push(name.clone());
                    undo.push((name, rollback));
                }
                Err(error) => {
                    tracing::warn!(step = %name, %error, "flow step failed, rolling back");
                    report.transition(SagaState::RollingBack);

                    while let Some((done, rollback)) = undo.pop() {
                        let Some(rollback) = rollback else {
                            continue;
                        };
                        tracing::debug!(step = %done, "rolling back flow step");
                        rollback(&mut *ctx).await;
                        metrics::counter!("saga_rollback_steps_total").increment(1);
                        report.rolled_back.push(done);
                    }

                    report.failed_step = Some(name);
                    report.transition(SagaState::Failed);
                    report.elapsed = start.elapsed();

                    metrics::histogram!("saga_duration_seconds")
                        .record(report.elapsed.as_secs_f64());
                    metrics::counter!("saga_failed").increment(1);
                    tracing::warn!(
                        rolled_back = report.rolled_back.len(),
                        "flow chain failed"
                    );

                    return Err(FlowFailure { report, error });
                }
            }
        }

        report.transition(SagaState::Completed);
        report.elapsed = start.elapsed();

        metrics::histogram!("saga_duration_seconds").record(report.elapsed.as_secs_f64());
        metrics::counter!("saga_completed").increment(1);
        tracing::info!(
            duration = report.elapsed.as_secs_f64(),
            "flow chain completed"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Ctx {
        log: Vec<String>,
    }

    impl Ctx {
        async fn record(&mut self, entry: &str) {
            self.log.push(entry.to_string());
        }
    }

    fn ok_step(name: &'static str) -> Step<Ctx, String> {
        Step::new(name, move |ctx: &mut Ctx| {
            Box::pin(async move {
                ctx.record(name).await;
                Ok::<(), String>(())
            })
        })
    }

    fn undoable(name: &'static str) -> Step<Ctx, String> {
        ok_step(name).with_rollback(move |ctx: &mut Ctx| {
            Box::pin(async move { ctx.record(&format!("undo {name}")).await })
        })
    }

    fn failing(name: &'static str) -> Step<Ctx, String> {
        Step::new(name, move |_: &mut Ctx| {
            Box::pin(async move { Err::<(), _>(format!("{name} broke")) })
        })
    }

    #[tokio::test]
    async fn test_all_steps_run_in_order() {
        let mut ctx = Ctx::default();
        let report = FlowChain::new("ok")
            .then(undoable("a"))
            .then(ok_step("b"))
            .then(undoable("c"))
            .run(&mut ctx)
            .await
            .unwrap();

        assert_eq!(ctx.log, vec!["a", "b", "c"]);
        assert_eq!(report.state, SagaState::Completed);
        assert_eq!(report.completed_steps, vec!["a", "b", "c"]);
        assert!(report.failed_step.is_none());
        assert!(report.rolled_back.is_empty());
    }

    #[tokio::test]
    async fn test_failure_rolls_back_in_reverse_order() {
        let mut ctx = Ctx::default();
        let failure = FlowChain::new("broken")
            .then(undoable("a"))
            .then(undoable("b"))
            .then(failing("c"))
            .then(undoable("d"))
            .run(&mut ctx)
            .await
            .unwrap_err();

        assert_eq!(ctx.log, vec!["a", "b", "undo b", "undo a"]);
        assert_eq!(failure.report.state, SagaState::Failed);
        assert_eq!(failure.failed_step(), "c");
        assert_eq!(failure.report.rolled_back, vec!["b", "a"]);
        assert_eq!(failure.into_error(), "c broke");
    }

    #[tokio::test]
    async fn test_non_compensable_steps_are_skipped_on_rollback() {
        let mut ctx = Ctx::default();
        let failure = FlowChain::new("mixed")
            .then(undoable("a"))
            .then(ok_step("b"))
            .then(failing("c"))
            .run(&mut ctx)
            .await
            .unwrap_err();

        assert_eq!(ctx.log, vec!["a", "b", "undo a"]);
        assert_eq!(failure.report.completed_steps, vec!["a", "b"]);
        assert_eq!(failure.report.rolled_back, vec!["a"]);
    }

    #[tokio::test]
    async fn test_first_step_failure_rolls_back_nothing() {
        let mut ctx = Ctx::default();
        let failure = FlowChain::new("early")
            .then(failing("a"))
            .then(undoable("b"))
            .run(&mut ctx)
            .await
            .unwrap_err();

        assert!(ctx.log.is_empty());
        assert!(failure.report.rolled_back.is_empty());
        assert_eq!(failure.to_string(), "flow 'early' failed at step 'a': a broke");
    }

    #[tokio::test]
    async fn test_empty_chain_completes() {
        let mut ctx = Ctx::default();
        let chain: FlowChain<Ctx, String> = FlowChain::new("empty");
        assert!(chain.is_empty());

        let report = chain.run(&mut ctx).await.unwrap();
        assert_eq!(report.state, SagaState::Completed);
    }

    #[tokio::test]
    async fn test_steps_see_earlier_context_writes() {
        #[derive(Default)]
        struct Counter {
            value: u32,
        }

        let bump = |n: u32| {
            Step::<Counter, String>::new(format!("bump-{n}"), move |ctx: &mut Counter| {
                Box::pin(async move {
                    if ctx.value != n - 1 {
                        return Err(format!("expected {}, saw {}", n - 1, ctx.value));
                    }
                    ctx.value = n;
                    Ok(())
                })
            })
        };

        let mut ctx = Counter::default();
        FlowChain::new("counter")
            .then(bump(1))
            .then(bump(2))
            .then(bump(3))
            .run(&mut ctx)
            .await
            .unwrap();
        assert_eq!(ctx.value, 3);
    }

    #[test]
    fn test_step_debug_shows_compensability() {
        let step = undoable("lock");
        assert!(step.is_compensable());
        assert_eq!(step.name(), "lock");
        assert_eq!(
            format!("{step:?}"),
            "Step { name: \"lock\", compensable: true }"
        );
        assert!(!ok_step("call").is_compensable());
    }
}
