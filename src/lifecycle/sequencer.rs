//! Ordered subsystem startup and reverse-ordered teardown.
//!
//! # Responsibilities
//! - Run start actions one at a time, in declared order
//! - Abort on the first failing start and report that step
//! - Run stop actions in exact reverse order, continuing past failures

use std::fmt;
use std::future::Future;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use thiserror::Error;

use crate::lifecycle::startup::StartupError;
use crate::observability::metrics;

/// Failure reported by a subsystem's start or stop action.
#[derive(Debug, Error)]
pub enum SubsystemError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{context}: {source}")]
    Wrapped {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl SubsystemError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn wrap<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Wrapped {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

pub type StepFuture = BoxFuture<'static, Result<(), SubsystemError>>;
type StepAction = Box<dyn Fn() -> StepFuture + Send + Sync>;

/// One named unit of startup/shutdown work.
pub struct SubsystemStep {
    name: String,
    index: usize,
    start: StepAction,
    stop: Option<StepAction>,
}

impl SubsystemStep {
    pub fn new<F, Fut>(name: impl Into<String>, start: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), SubsystemError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            index: 0,
            start: Box::new(move || start().boxed()),
            stop: None,
        }
    }

    pub fn with_stop<F, Fut>(mut self, stop: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), SubsystemError>> + Send + 'static,
    {
        self.stop = Some(Box::new(move || stop().boxed()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position in the start order.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn has_stop(&self) -> bool {
        self.stop.is_some()
    }
}

impl fmt::Debug for SubsystemStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubsystemStep")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("has_stop", &self.has_stop())
            .finish()
    }
}

/// A stop action that returned an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopFailure {
    pub step: String,
    pub error: String,
}

/// Outcome of a teardown pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Steps whose stop action succeeded, in the order they ran.
    pub stopped: Vec<String>,
    pub failures: Vec<StopFailure>,
}

impl StopReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Executes a fixed list of steps.
#[derive(Debug)]
pub struct SubsystemSequencer {
    steps: Vec<SubsystemStep>,
    /// Number of leading steps whose start action succeeded.
    started: usize,
}

impl SubsystemSequencer {
    pub fn new(steps: impl IntoIterator<Item = SubsystemStep>) -> Self {
        let steps = steps
            .into_iter()
            .enumerate()
            .map(|(index, mut step)| {
                step.index = index;
                step
            })
            .collect();
        Self { steps, started: 0 }
    }

    pub fn steps(&self) -> impl Iterator<Item = &SubsystemStep> {
        self.steps.iter()
    }

    pub fn started(&self) -> usize {
        self.started
    }

    /// Run every start action in order.
    ///
    /// The first failure stops the sequence; later steps are never attempted.
    pub async fn start(&mut self) -> Result<(), StartupError> {
        for step in self.steps.iter().skip(self.started) {
            tracing::info!(step = %step.name, index = step.index, "Starting subsystem");
            match (step.start)().await {
                Ok(()) => {
                    self.started += 1;
                    metrics::record_step(&step.name, "start", "ok");
                }
                Err(source) => {
                    tracing::error!(step = %step.name, error = %source, "Subsystem failed to start");
                    metrics::record_step(&step.name, "start", "error");
                    return Err(StartupError::StepFailed {
                        step: step.name.clone(),
                        source,
                    });
                }
            }
        }
        tracing::info!(count = self.started, "All subsystems started");
        Ok(())
    }

    /// Run the stop action of every started step, last started first.
    ///
    /// A failing stop action is recorded and the remaining ones still run.
    pub async fn stop(&mut self) -> StopReport {
        let started = std::mem::take(&mut self.started);
        let mut report = StopReport::default();

        for step in self.steps[..started].iter().rev() {
            let Some(stop) = &step.stop else {
                continue;
            };
            tracing::info!(step = %step.name, "Stopping subsystem");
            match stop().await {
                Ok(()) => {
                    metrics::record_step(&step.name, "stop", "ok");
                    report.stopped.push(step.name.clone());
                }
                Err(e) => {
                    tracing::warn!(step = %step.name, error = %e, "Subsystem failed to stop cleanly");
                    metrics::record_step(&step.name, "stop", "error");
                    report.failures.push(StopFailure {
                        step: step.name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::{Arc, Mutex};

    type Journal = Arc<Mutex<Vec<String>>>;

    fn step(journal: &Journal, name: &str, fail_start: bool, stop: Option<bool>) -> SubsystemStep {
        let start_journal = journal.clone();
        let start_name = format!("start:{name}");
        let mut step = SubsystemStep::new(name, move || {
            let journal = start_journal.clone();
            let entry = start_name.clone();
            async move {
                journal.lock().unwrap().push(entry);
                if fail_start {
                    Err(SubsystemError::msg("boom"))
                } else {
                    Ok(())
                }
            }
        });
        if let Some(fail_stop) = stop {
            let stop_journal = journal.clone();
            let stop_name = format!("stop:{name}");
            step = step.with_stop(move || {
                let journal = stop_journal.clone();
                let entry = stop_name.clone();
                async move {
                    journal.lock().unwrap().push(entry);
                    if fail_stop {
                        Err(SubsystemError::msg("stuck"))
                    } else {
                        Ok(())
                    }
                }
            });
        }
        step
    }

    fn entries(journal: &Journal, prefix: &str) -> Vec<String> {
        journal
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| e.strip_prefix(prefix).map(str::to_string))
            .collect()
    }

    #[tokio::test]
    async fn starts_in_declared_order() {
        let journal = Journal::default();
        let mut sequencer = SubsystemSequencer::new([
            step(&journal, "storage", false, Some(false)),
            step(&journal, "crypto", false, None),
            step(&journal, "admin", false, Some(false)),
        ]);

        sequencer.start().await.unwrap();

        assert_eq!(entries(&journal, "start:"), ["storage", "crypto", "admin"]);
        assert_eq!(sequencer.started(), 3);
        let indexes: Vec<usize> = sequencer.steps().map(SubsystemStep::index).collect();
        assert_eq!(indexes, [0, 1, 2]);
    }

    #[tokio::test]
    async fn first_failure_halts_startup() {
        let journal = Journal::default();
        let mut sequencer = SubsystemSequencer::new([
            step(&journal, "storage", false, Some(false)),
            step(&journal, "crypto", true, Some(false)),
            step(&journal, "admin", true, Some(false)),
            step(&journal, "modules", false, Some(false)),
        ]);

        let err = sequencer.start().await.unwrap_err();

        match err {
            StartupError::StepFailed { step, .. } => assert_eq!(step, "crypto"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(entries(&journal, "start:"), ["storage", "crypto"]);
        assert_eq!(sequencer.started(), 1);
    }

    #[tokio::test]
    async fn stop_continues_past_failures() {
        let journal = Journal::default();
        let mut sequencer = SubsystemSequencer::new([
            step(&journal, "a", false, Some(false)),
            step(&journal, "b", false, Some(true)),
            step(&journal, "c", false, Some(false)),
            step(&journal, "d", false, Some(false)),
        ]);
        sequencer.start().await.unwrap();

        let report = sequencer.stop().await;

        assert_eq!(entries(&journal, "stop:"), ["d", "c", "b", "a"]);
        assert_eq!(report.stopped, ["d", "c", "a"]);
        assert_eq!(
            report.failures,
            [StopFailure {
                step: "b".into(),
                error: "stuck".into()
            }]
        );
    }

    #[tokio::test]
    async fn stop_only_covers_started_steps_and_runs_once() {
        let journal = Journal::default();
        let mut sequencer = SubsystemSequencer::new([
            step(&journal, "a", false, Some(false)),
            step(&journal, "b", true, Some(false)),
        ]);
        assert!(sequencer.start().await.is_err());

        let report = sequencer.stop().await;
        assert_eq!(report.stopped, ["a"]);

        let again = sequencer.stop().await;
        assert!(again.stopped.is_empty());
        assert_eq!(entries(&journal, "stop:"), ["a"]);
    }

    proptest! {
        #[test]
        fn stop_order_reverses_start_order(stops in proptest::collection::vec(any::<Option<bool>>(), 0..12)) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let journal = Journal::default();
            let names: Vec<String> = (0..stops.len()).map(|i| format!("step{i}")).collect();
            let steps: Vec<SubsystemStep> = names
                .iter()
                .zip(&stops)
                .map(|(name, stop)| step(&journal, name, false, *stop))
                .collect();
            let mut sequencer = SubsystemSequencer::new(steps);

            let report = runtime.block_on(async {
                sequencer.start().await.unwrap();
                sequencer.stop().await
            });

            let expected: Vec<String> = names
                .iter()
                .zip(&stops)
                .filter(|(_, stop)| stop.is_some())
                .map(|(name, _)| name.clone())
                .rev()
                .collect();
            prop_assert_eq!(entries(&journal, "start:"), names.clone());
            prop_assert_eq!(entries(&journal, "stop:"), expected);
            let failing = stops.iter().filter(|s| **s == Some(true)).count();
            prop_assert_eq!(report.failures.len(), failing);
        }
    }
}
