//! Runs a task's steps in order against an engine

use tracing::debug;

use crate::protocol::{Task, TaskOutcome};

use super::engine::ExecutionEngine;
use super::error::ExecutionError;

pub struct Interpreter<E> {
    engine: E,
}

impl<E: ExecutionEngine> Interpreter<E> {
    pub fn new(engine: E) -> Self {
        Self { engine }
    }

    /// Execute every step; the last value produced is the task's result
    ///
    /// Stops at the first failing step.
    pub async fn run(&mut self, task: &Task) -> Result<f64, ExecutionError> {
        debug!(task_id = %task.id, steps = task.steps.len(), "Interpreter::run: called");
        if task.steps.is_empty() {
            return Err(ExecutionError::EmptyTask);
        }

        let mut last = None;
        for (index, op) in task.steps.iter().enumerate() {
            match self.engine.execute(op).await {
                Ok(Some(value)) => last = Some(value),
                Ok(None) => {}
                Err(source) => {
                    return Err(ExecutionError::StepFailed {
                        index: index + 1,
                        op: op.name(),
                        source,
                    });
                }
            }
        }
        last.ok_or(ExecutionError::NoResult)
    }

    /// Like [`run`](Self::run), folded into a wire outcome
    pub async fn outcome(&mut self, task: &Task) -> TaskOutcome {
        match self.run(task).await {
            Ok(value) => TaskOutcome::Completed { value },
            Err(e) => TaskOutcome::Failed { error: e.to_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Operation;
    use crate::worker::SimulatedEngine;
    use std::time::Duration;

    fn interpreter() -> Interpreter<SimulatedEngine> {
        Interpreter::new(SimulatedEngine::seeded(Duration::ZERO, 3).with_case("case.pwb"))
    }

    fn solve(contingency: &str) -> Operation {
        Operation::TsSolve {
            contingency: contingency.to_string(),
        }
    }

    fn results(contingency: &str) -> Operation {
        Operation::TsGetResults {
            contingency: contingency.to_string(),
            fields: vec!["Bus 4 | frequency".to_string()],
        }
    }

    #[tokio::test]
    async fn test_last_value_is_result() {
        let mut interpreter = interpreter();
        let task = Task::with_id(
            "t1",
            vec![
                Operation::SolvePowerFlow {
                    method: "RECTNEWT".to_string(),
                },
                solve("ctg"),
                results("ctg"),
                Operation::SaveCase { path: None },
            ],
        );
        let value = interpreter.run(&task).await.unwrap();
        assert!(value > 59.0);
    }

    #[tokio::test]
    async fn test_failing_step_is_reported() {
        let mut interpreter = interpreter();
        let task = Task::with_id("t1", vec![solve("a"), results("b")]);

        let err = interpreter.run(&task).await.unwrap_err();
        assert!(matches!(err, ExecutionError::StepFailed { index: 2, op: "ts-get-results", .. }));

        let outcome = interpreter.outcome(&task).await;
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_no_value_and_empty_task() {
        let mut interpreter = interpreter();
        let task = Task::with_id("t1", vec![solve("a")]);
        assert_eq!(interpreter.run(&task).await.unwrap_err(), ExecutionError::NoResult);

        let task = Task::with_id("t2", vec![]);
        assert_eq!(interpreter.run(&task).await.unwrap_err(), ExecutionError::EmptyTask);
    }
}
