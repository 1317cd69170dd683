//! Experiment persistence
//!
//! The engine talks to storage only through [`ExperimentStore`]. The
//! in-memory [`MemoryExperimentStore`] is the default backend.

use crate::error::ExperimentError;
use crate::types::{Assignment, Experiment, ExperimentEvent, ExperimentId, ExperimentStatus};
use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt::Debug;

/// Storage backend for experiments, assignments and events
#[async_trait]
pub trait ExperimentStore: Send + Sync + Debug {
    /// Persist a new experiment
    async fn insert_experiment(&self, experiment: Experiment) -> Result<(), ExperimentError>;

    /// Replace a stored experiment
    async fn update_experiment(&self, experiment: Experiment) -> Result<(), ExperimentError>;

    /// Fetch one experiment
    async fn experiment(&self, id: ExperimentId) -> Result<Option<Experiment>, ExperimentError>;

    /// All experiments, oldest first
    async fn list_experiments(&self) -> Result<Vec<Experiment>, ExperimentError>;

    /// Experiments currently running
    async fn running_experiments(&self) -> Result<Vec<Experiment>, ExperimentError> {
        Ok(self
            .list_experiments()
            .await?
            .into_iter()
            .filter(|e| e.status == ExperimentStatus::Running)
            .collect())
    }

    /// Existing assignment of a subject
    async fn assignment(
        &self,
        experiment_id: ExperimentId,
        subject_id: &str,
    ) -> Result<Option<Assignment>, ExperimentError>;

    /// Store `assignment` unless one exists for the same experiment and
    /// subject; returns whichever is stored afterwards
    async fn insert_assignment_if_absent(
        &self,
        assignment: Assignment,
    ) -> Result<Assignment, ExperimentError>;

    /// All assignments of an experiment
    async fn assignments(&self, experiment_id: ExperimentId) -> Result<Vec<Assignment>, ExperimentError>;

    /// Append an outcome event
    async fn append_event(&self, event: ExperimentEvent) -> Result<(), ExperimentError>;

    /// All events of an experiment, in append order
    async fn events(&self, experiment_id: ExperimentId) -> Result<Vec<ExperimentEvent>, ExperimentError>;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryExperimentStore {
    experiments: DashMap<ExperimentId, Experiment>,
    assignments: DashMap<(ExperimentId, String), Assignment>,
    events: DashMap<ExperimentId, Vec<ExperimentEvent>>,
}

impl MemoryExperimentStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored assignments across experiments
    #[inline]
    #[must_use]
    pub fn assignment_count(&self) -> usize {
        self.assignments.len()
    }
}

#[async_trait]
impl ExperimentStore for MemoryExperimentStore {
    async fn insert_experiment(&self, experiment: Experiment) -> Result<(), ExperimentError> {
        self.experiments.insert(experiment.id, experiment);
        Ok(())
    }

    async fn update_experiment(&self, experiment: Experiment) -> Result<(), ExperimentError> {
        match self.experiments.get_mut(&experiment.id) {
            Some(mut stored) => {
                *stored = experiment;
                Ok(())
            }
            None => Err(ExperimentError::NotFound(experiment.id)),
        }
    }

    async fn experiment(&self, id: ExperimentId) -> Result<Option<Experiment>, ExperimentError> {
        Ok(self.experiments.get(&id).map(|e| e.value().clone()))
    }

    async fn list_experiments(&self) -> Result<Vec<Experiment>, ExperimentError> {
        let mut all: Vec<Experiment> = self.experiments.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(all)
    }

    async fn assignment(
        &self,
        experiment_id: ExperimentId,
        subject_id: &str,
    ) -> Result<Option<Assignment>, ExperimentError> {
        Ok(self
            .assignments
            .get(&(experiment_id, subject_id.to_string()))
            .map(|a| a.value().clone()))
    }

    async fn insert_assignment_if_absent(
        &self,
        assignment: Assignment,
    ) -> Result<Assignment, ExperimentError> {
        let key = (assignment.experiment_id, assignment.subject_id.clone());
        Ok(self.assignments.entry(key).or_insert(assignment).value().clone())
    }

    async fn assignments(&self, experiment_id: ExperimentId) -> Result<Vec<Assignment>, ExperimentError> {
        Ok(self
            .assignments
            .iter()
            .filter(|a| a.experiment_id == experiment_id)
            .map(|a| a.value().clone())
            .collect())
    }

    async fn append_event(&self, event: ExperimentEvent) -> Result<(), ExperimentError> {
        self.events
            .entry(event.experiment_id)
            .or_default()
            .push(event);
        Ok(())
    }

    async fn events(&self, experiment_id: ExperimentId) -> Result<Vec<ExperimentEvent>, ExperimentError> {
        Ok(self
            .events
            .get(&experiment_id)
            .map(|events| events.value().clone())
            .unwrap_or_default())
    }
}
