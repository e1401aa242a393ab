//! Execution engines run the individual operations of a task

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::protocol::Operation;

use super::error::EngineError;

const POWER_FLOW_METHODS: &[&str] = &["RECTNEWT", "POLARNEWT", "GAUSSSEIDEL", "FASTDEC", "DC"];

/// Backend that performs engine operations
///
/// An operation either yields a value (`Some`), succeeds silently (`None`) or
/// fails with a typed error.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn execute(&mut self, op: &Operation) -> Result<Option<f64>, EngineError>;
}

/// In-process stand-in for the simulation backend
///
/// Tracks just enough state to reject operations that a real engine would
/// reject: nothing works before a case is open, results need a solved
/// contingency, and delete needs existing objects.
pub struct SimulatedEngine {
    latency: Duration,
    rng: StdRng,
    case: Option<String>,
    /// object type -> records of (field, value)
    objects: HashMap<String, Vec<Vec<(String, String)>>>,
    solved: HashSet<String>,
}

impl SimulatedEngine {
    pub fn new(latency: Duration) -> Self {
        Self::with_rng(latency, StdRng::from_os_rng())
    }

    /// Deterministic engine for tests
    pub fn seeded(latency: Duration, seed: u64) -> Self {
        Self::with_rng(latency, StdRng::seed_from_u64(seed))
    }

    fn with_rng(latency: Duration, rng: StdRng) -> Self {
        Self {
            latency,
            rng,
            case: None,
            objects: HashMap::new(),
            solved: HashSet::new(),
        }
    }

    /// Start with a case already open
    pub fn with_case(mut self, path: impl Into<String>) -> Self {
        self.case = Some(path.into());
        self
    }

    pub fn case(&self) -> Option<&str> {
        self.case.as_deref()
    }

    pub fn object_count(&self, object_type: &str) -> usize {
        self.objects.get(object_type).map_or(0, Vec::len)
    }

    fn require_case(&self) -> Result<(), EngineError> {
        match self.case {
            Some(_) => Ok(()),
            None => Err(EngineError::NoCaseOpen),
        }
    }

    fn record(fields: &[String], values: &[String]) -> Result<Vec<(String, String)>, EngineError> {
        if fields.len() != values.len() {
            return Err(EngineError::FieldMismatch {
                fields: fields.len(),
                values: values.len(),
            });
        }
        Ok(fields.iter().cloned().zip(values.iter().cloned()).collect())
    }

    fn apply(&mut self, op: &Operation) -> Result<Option<f64>, EngineError> {
        match op {
            Operation::OpenCase { path } => {
                if path.trim().is_empty() {
                    return Err(EngineError::InvalidArgument("empty case path".to_string()));
                }
                self.case = Some(path.clone());
                self.objects.clear();
                self.solved.clear();
                Ok(None)
            }
            Operation::RunScript { command } => {
                self.require_case()?;
                if command.trim().is_empty() {
                    return Err(EngineError::InvalidArgument("empty script command".to_string()));
                }
                Ok(None)
            }
            Operation::CreateData {
                object_type,
                fields,
                values,
            } => {
                self.require_case()?;
                let record = Self::record(fields, values)?;
                self.objects.entry(object_type.clone()).or_default().push(record);
                Ok(None)
            }
            Operation::ChangeParameters {
                object_type,
                fields,
                values,
            } => {
                self.require_case()?;
                let changes = Self::record(fields, values)?;
                let records = self
                    .objects
                    .get_mut(object_type)
                    .ok_or_else(|| EngineError::NoObjects(object_type.clone()))?;
                for record in records.iter_mut() {
                    for (field, value) in &changes {
                        match record.iter().position(|(f, _)| f == field) {
                            Some(i) => record[i].1 = value.clone(),
                            None => record.push((field.clone(), value.clone())),
                        }
                    }
                }
                Ok(None)
            }
            Operation::SolvePowerFlow { method } => {
                self.require_case()?;
                if !POWER_FLOW_METHODS.iter().any(|m| m.eq_ignore_ascii_case(method)) {
                    return Err(EngineError::UnknownMethod(method.clone()));
                }
                // Largest bus mismatch in MVA
                Ok(Some(self.rng.random_range(0.0..0.01)))
            }
            Operation::TsSolve { contingency } => {
                self.require_case()?;
                self.solved.insert(contingency.clone());
                Ok(None)
            }
            Operation::TsGetResults { contingency, fields } => {
                self.require_case()?;
                if !self.solved.contains(contingency) {
                    return Err(EngineError::NotSolved(contingency.clone()));
                }
                if fields.is_empty() {
                    return Err(EngineError::InvalidArgument("no result fields requested".to_string()));
                }
                // Final sample of the first requested channel, e.g. a bus frequency in Hz
                let value: f64 = 59.9 + self.rng.random_range(0.0..0.2);
                Ok(Some((value * 10_000.0).round() / 10_000.0))
            }
            Operation::Delete { object_type } => {
                self.require_case()?;
                match self.objects.remove(object_type) {
                    Some(_) => Ok(None),
                    None => Err(EngineError::NoObjects(object_type.clone())),
                }
            }
            Operation::SaveCase { path } => {
                self.require_case()?;
                if let Some(path) = path {
                    self.case = Some(path.clone());
                }
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl ExecutionEngine for SimulatedEngine {
    async fn execute(&mut self, op: &Operation) -> Result<Option<f64>, EngineError> {
        debug!(op = op.name(), "SimulatedEngine::execute: called");
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.apply(op)
    }
}
