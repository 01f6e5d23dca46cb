use std::collections::BTreeMap;

use crate::enums::ResampleDecision;
use crate::error::ErrorKind;
use crate::planner::{JobKey, JobState};
use crate::volume::Grid;

use serde::Serialize;
use web_time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteLevel {
    Info,
    Warning,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProvenanceNote {
    pub level: NoteLevel,
    pub job: Option<JobKey>,
    pub message: String,
}

impl ProvenanceNote {
    pub fn warning(job: Option<JobKey>, message: impl Into<String>) -> Self {
        Self {
            level: NoteLevel::Warning,
            job,
            message: message.into(),
        }
    }

    pub fn info(job: Option<JobKey>, message: impl Into<String>) -> Self {
        Self {
            level: NoteLevel::Info,
            job,
            message: message.into(),
        }
    }
}

/// How one job's result was produced. Never mutated once logged.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProvenanceRecord {
    pub job: JobKey,
    pub atlas_source: Option<String>,
    pub metric_source: Option<String>,
    pub atlas_grid: Option<Grid>,
    pub metric_grid: Option<Grid>,
    pub resample: Option<ResampleDecision>,
    pub reducers: Vec<String>,
    /// Unix seconds at job start.
    pub started_at: f64,
    pub duration_ms: f64,
    pub state: JobState,
    pub rows: usize,
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FailureRecord {
    pub job: JobKey,
    pub kind: ErrorKind,
    pub detail: String,
}

/// Append-only audit trail of a run.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ProvenanceLog {
    pub started_at: f64,
    pub finished_at: Option<f64>,
    pub parameters: BTreeMap<String, String>,
    records: Vec<ProvenanceRecord>,
    notes: Vec<ProvenanceNote>,
}

impl ProvenanceLog {
    pub fn start() -> Self {
        Self {
            started_at: unix_now(),
            ..Default::default()
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.parameters.insert(key.into(), value.to_string());
        self
    }

    pub fn record(&mut self, record: ProvenanceRecord) {
        self.records.push(record);
    }

    pub fn note(&mut self, note: ProvenanceNote) {
        self.notes.push(note);
    }

    pub fn mark_finished(&mut self) {
        self.finished_at = Some(unix_now());
    }

    pub fn records(&self) -> &[ProvenanceRecord] {
        &self.records
    }

    pub fn notes(&self) -> &[ProvenanceNote] {
        &self.notes
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ProvenanceNote> {
        self.notes.iter().filter(|n| n.level == NoteLevel::Warning)
    }
}
