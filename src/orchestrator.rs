//! Fans parcellation out over subjects x atlases x metrics.
//!
//! Every job is isolated: its errors (and panics) are caught at the job
//! boundary and land in the failure ledger, so one bad input never costs
//! the rows of any other job.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::{ConfigError, RunConfig};
use crate::enums::{ResampleDecision, ResamplePolicy};
use crate::error::{ErrorKind, ParcelError};
use crate::parcellator::{ParcellateOptions, ParcellationResult, Parcellator};
use crate::planner::{Job, JobPlan, JobState, Planner};
use crate::provenance::{FailureRecord, ProvenanceLog, ProvenanceNote, ProvenanceRecord, unix_now};
use crate::source::VolumeSource;

use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{info, warn};
use web_time::Instant;

/// Cooperative whole-run cancellation. Jobs already running finish; jobs
/// not yet started stay pending.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RunOptions {
    pub policy: ResamplePolicy,
    pub parallel: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            policy: ResamplePolicy::default(),
            parallel: true,
        }
    }
}

/// All rows of the succeeded jobs, in submission then label order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultTable {
    pub rows: Vec<ParcellationResult>,
}

impl ResultTable {
    /// Reducer column names, first seen first.
    pub fn reducer_columns(&self) -> Vec<&str> {
        let mut columns: Vec<&str> = Vec::new();
        for row in &self.rows {
            for (name, _) in &row.stats {
                if !columns.contains(&name.as_str()) {
                    columns.push(name);
                }
            }
        }
        columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct RunOutput {
    pub table: ResultTable,
    pub provenance: ProvenanceLog,
    pub failures: Vec<FailureRecord>,
    pub jobs: Vec<Job>,
    /// The run was cancelled before every job started.
    pub cancelled: bool,
}

impl RunOutput {
    pub fn succeeded(&self) -> usize {
        self.count(JobState::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(JobState::Failed)
    }

    fn count(&self, state: JobState) -> usize {
        self.jobs.iter().filter(|job| job.state() == state).count()
    }

    /// True when every planned job ran and none failed.
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.failures.is_empty()
    }
}

struct JobOutcome {
    record: ProvenanceRecord,
    result: Result<Vec<ParcellationResult>, (ErrorKind, String)>,
}

/// Completed jobs, slotted by submission index.
struct Accumulator {
    slots: Vec<Option<JobOutcome>>,
}

impl Accumulator {
    fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| None).collect(),
        }
    }

    fn commit(&mut self, index: usize, outcome: JobOutcome) {
        self.slots[index] = Some(outcome);
    }
}

pub struct Orchestrator<S> {
    source: S,
    parcellator: Parcellator,
    options: RunOptions,
    cancel: CancelFlag,
}

impl<S: VolumeSource> Orchestrator<S> {
    pub fn new(source: S, parcellator: Parcellator, options: RunOptions) -> Self {
        Self {
            source,
            parcellator,
            options,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn parcellator(&self) -> &Parcellator {
        &self.parcellator
    }

    /// Plan and execute a configured run.
    ///
    /// # Errors
    ///
    /// Only planning errors; job failures go to the ledger.
    pub fn run(&self, config: &RunConfig) -> Result<RunOutput, ConfigError> {
        let plan = Planner::plan(config, self.parcellator.registry())?;
        Ok(self.execute(plan))
    }

    /// Execute every planned job. Never fails as a whole.
    pub fn execute(&self, plan: JobPlan) -> RunOutput {
        let JobPlan { mut jobs, notes } = plan;
        let mut provenance = ProvenanceLog::start()
            .with_parameter("jobs", jobs.len())
            .with_parameter("resample", format!("{:?}", self.options.policy))
            .with_parameter("parallel", self.options.parallel);
        for note in notes {
            provenance.note(note);
        }
        info!(jobs = jobs.len(), parallel = self.options.parallel, "starting run");

        let accumulator = Mutex::new(Accumulator::new(jobs.len()));
        let run_one = |(index, job): (usize, &mut Job)| {
            if self.cancel.is_cancelled() {
                return;
            }
            let outcome = self.execute_job(job);
            accumulator.lock().commit(index, outcome);
        };
        if self.options.parallel {
            jobs.par_iter_mut().enumerate().for_each(run_one);
        } else {
            jobs.iter_mut().enumerate().for_each(run_one);
        }

        let mut table = ResultTable::default();
        let mut failures = Vec::new();
        let mut cancelled = false;
        let slots = accumulator.into_inner().slots;
        for (job, slot) in jobs.iter().zip(slots) {
            let Some(JobOutcome { record, result }) = slot else {
                cancelled = true;
                provenance.note(ProvenanceNote::warning(
                    Some(job.key.clone()),
                    "run cancelled before this job started",
                ));
                continue;
            };
            match record.resample {
                Some(ResampleDecision::MetricToAtlas) => provenance.note(ProvenanceNote::info(
                    Some(job.key.clone()),
                    "metric map resampled onto the atlas grid (trilinear)",
                )),
                Some(ResampleDecision::AtlasToMetric) => provenance.note(ProvenanceNote::info(
                    Some(job.key.clone()),
                    "atlas resampled onto the metric grid (nearest neighbour)",
                )),
                _ => {}
            }
            provenance.record(record);
            match result {
                Ok(rows) => table.rows.extend(rows),
                Err((kind, detail)) => failures.push(FailureRecord {
                    job: job.key.clone(),
                    kind,
                    detail,
                }),
            }
        }
        provenance.mark_finished();

        info!(
            rows = table.len(),
            failed = failures.len(),
            cancelled,
            "run finished"
        );
        RunOutput {
            table,
            provenance,
            failures,
            jobs,
            cancelled,
        }
    }

    fn execute_job(&self, job: &mut Job) -> JobOutcome {
        job.start();
        let started_at = unix_now();
        let clock = Instant::now();
        let mut record = ProvenanceRecord {
            job: job.key.clone(),
            atlas_source: None,
            metric_source: None,
            atlas_grid: None,
            metric_grid: None,
            resample: None,
            reducers: job.reducers.to_vec(),
            started_at,
            duration_ms: 0.0,
            state: JobState::Running,
            rows: 0,
            error: None,
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.process(job, &mut record)))
            .unwrap_or_else(|payload| Err(JobFailure::Panicked(panic_message(payload))));

        let result = match result {
            Ok(rows) => {
                job.finish(true);
                record.rows = rows.len();
                info!(job = %job.key, rows = rows.len(), "job succeeded");
                Ok(rows)
            }
            Err(failure) => {
                job.finish(false);
                let (kind, detail) = failure.into_parts();
                warn!(job = %job.key, ?kind, %detail, "job failed");
                record.error = Some(detail.clone());
                Err((kind, detail))
            }
        };
        record.state = job.state();
        record.duration_ms = clock.elapsed().as_secs_f64() * 1000.0;
        JobOutcome { record, result }
    }

    fn process(
        &self,
        job: &Job,
        record: &mut ProvenanceRecord,
    ) -> Result<Vec<ParcellationResult>, JobFailure> {
        let key = &job.key;
        let atlas = self
            .source
            .atlas(&key.subject_id, &key.atlas_name)
            .map_err(ParcelError::from)?;
        record.atlas_source = Some(atlas.origin.clone());
        record.atlas_grid = Some(atlas.volume.grid());

        let metric = self
            .source
            .metric(&key.subject_id, &key.metric_name)
            .map_err(ParcelError::from)?;
        record.metric_source = Some(metric.origin.clone());
        record.metric_grid = Some(metric.volume.grid());

        let mask = self
            .source
            .mask(&key.subject_id)
            .map_err(ParcelError::from)?;

        let parcellation = self.parcellator.parcellate(
            key,
            &atlas.volume,
            &metric.volume,
            ParcellateOptions {
                reducers: &job.reducers,
                roi_names: atlas.lookup.as_ref(),
                policy: self.options.policy,
                mask: mask.as_deref(),
            },
        )?;
        record.resample = Some(parcellation.decision);
        Ok(parcellation.rows)
    }
}

enum JobFailure {
    Parcel(ParcelError),
    Panicked(String),
}

impl From<ParcelError> for JobFailure {
    fn from(err: ParcelError) -> Self {
        JobFailure::Parcel(err)
    }
}

impl JobFailure {
    fn into_parts(self) -> (ErrorKind, String) {
        match self {
            JobFailure::Parcel(err) => (err.kind(), err.to_string()),
            JobFailure::Panicked(msg) => (ErrorKind::Panicked, format!("job panicked: {msg}")),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
