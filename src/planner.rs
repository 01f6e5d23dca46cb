use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::config::{ConfigError, RunConfig};
use crate::provenance::ProvenanceNote;
use crate::reducers::ReducerRegistry;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Identity of a job: the (subject, atlas, metric) triple.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub subject_id: String,
    pub atlas_name: String,
    pub metric_name: String,
}

impl JobKey {
    pub fn new(
        subject_id: impl Into<String>,
        atlas_name: impl Into<String>,
        metric_name: impl Into<String>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            atlas_name: atlas_name.into(),
            metric_name: metric_name.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sub-{}/atlas-{}/{}",
            self.subject_id, self.atlas_name, self.metric_name
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// One scheduled parcellation, run at most once.
#[derive(Clone, Debug)]
pub struct Job {
    pub key: JobKey,
    pub reducers: Arc<[String]>,
    state: JobState,
}

impl Job {
    pub fn new(key: JobKey, reducers: Arc<[String]>) -> Self {
        Self {
            key,
            reducers,
            state: JobState::Pending,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub(crate) fn start(&mut self) {
        debug_assert_eq!(self.state, JobState::Pending, "job {} started twice", self.key);
        self.state = JobState::Running;
    }

    pub(crate) fn finish(&mut self, succeeded: bool) {
        debug_assert_eq!(self.state, JobState::Running, "job {} was not running", self.key);
        self.state = if succeeded {
            JobState::Succeeded
        } else {
            JobState::Failed
        };
    }
}

/// Jobs in submission order, plus the notes raised while planning.
#[derive(Clone, Debug, Default)]
pub struct JobPlan {
    pub jobs: Vec<Job>,
    pub notes: Vec<ProvenanceNote>,
}

impl JobPlan {
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

pub struct Planner;

impl Planner {
    /// Expand a validated config into jobs.
    ///
    /// # Errors
    ///
    /// Configuration problems, including reducers missing from `registry`.
    pub fn plan(config: &RunConfig, registry: &ReducerRegistry) -> Result<JobPlan, ConfigError> {
        config.validate()?;
        Self::expand(
            &config.subjects,
            config.atlases.iter().map(|a| a.name.as_str()),
            config.metrics.iter().map(|m| m.name.as_str()),
            &config.reducers,
            registry,
        )
    }

    /// Cartesian product subjects x atlases x metrics, subject-major.
    ///
    /// A repeated triple is scheduled once; each repeat leaves a warning note.
    pub fn expand<'a, A, M>(
        subjects: &[String],
        atlases: A,
        metrics: M,
        reducers: &[String],
        registry: &ReducerRegistry,
    ) -> Result<JobPlan, ConfigError>
    where
        A: IntoIterator<Item = &'a str>,
        M: IntoIterator<Item = &'a str>,
    {
        if let Some(unknown) = reducers.iter().find(|name| !registry.contains(name)) {
            return Err(ConfigError::UnknownReducer(unknown.clone()));
        }
        let atlases: Vec<&str> = atlases.into_iter().collect();
        let metrics: Vec<&str> = metrics.into_iter().collect();
        let reducers: Arc<[String]> = reducers.into();

        let mut plan = JobPlan::default();
        let mut seen = HashSet::new();
        for subject in subjects {
            for atlas in &atlases {
                for metric in &metrics {
                    let key = JobKey::new(subject.as_str(), *atlas, *metric);
                    if !seen.insert(key.clone()) {
                        warn!(job = %key, "duplicate job in configuration, keeping the first");
                        plan.notes.push(ProvenanceNote::warning(
                            Some(key),
                            "duplicate (subject, atlas, metric) in configuration; only the first occurrence is scheduled",
                        ));
                        continue;
                    }
                    plan.jobs.push(Job::new(key, reducers.clone()));
                }
            }
        }
        Ok(plan)
    }
}
