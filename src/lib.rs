//! # Parcel-volume library
//!
//! This crate summarises voxel-wise scalar maps (e.g. diffusion MRI metrics
//! such as FA or MD) per region of interest of a labeled atlas volume.

//!
//! Each positive integer in an atlas names one ROI, `0` is background.
//! For every ROI the metric values inside it are reduced with named
//! reducers (mean, median, std, count, ...). When the atlas and the metric
//! map sit on different grids, the metric map is resampled trilinearly onto
//! the atlas grid; nearest-neighbour resampling of the atlas onto the
//! metric grid is available on request. Grids that already match are used
//! as they are, without interpolation.
//!
//! On top of the single-pair [`Parcellator`] sits an [`Orchestrator`] that
//! runs every (subject, atlas, metric) combination of a run configuration,
//! in parallel using rayon where enabled, and returns:
//!  - the combined result table
//!  - a provenance log of how each row was produced
//!  - a failure ledger; one failing job never aborts the run
//!
//! # Roadmap
//!
//!  - Higher-order scalar interpolation
//!  - Session-level (`ses-*`) inputs
//!
//! # Examples
//!
//! ## Running a configured parcellation
//!
//! ```no_run
//! # use parcel_volume::{NiftiSource, Orchestrator, Parcellator, RunConfig, RunOptions};
//! # use std::path::Path;
//! let config = RunConfig::load(Path::new("parcellation.toml"))
//!     .expect("should have loaded the configuration");
//! let orchestrator = Orchestrator::new(
//!     NiftiSource::from_config(&config),
//!     Parcellator::default(),
//!     RunOptions { policy: config.resample, parallel: config.parallel },
//! );
//! let output = orchestrator.run(&config).expect("configuration should be valid");
//! for failure in &output.failures {
//!     eprintln!("{}: {}", failure.job, failure.detail);
//! }
//! ```
//!
//! ## Parcellating volumes already in memory
//!
//! ```
//! # use parcel_volume::{Affine, JobKey, ParcellateOptions, Parcellator, Volume};
//! # use ndarray::Array3;
//! let atlas = Volume::new(
//!     Array3::from_shape_fn((4, 4, 4), |(i, _, _)| if i < 2 { 1 } else { 2 }),
//!     Affine::identity(),
//! )
//! .unwrap();
//! let fa = Volume::new(Array3::from_elem((4, 4, 4), 0.4), Affine::identity()).unwrap();
//! let reducers = vec!["mean".to_string(), "count".to_string()];
//! let out = Parcellator::default()
//!     .parcellate(
//!         &JobKey::new("01", "toy", "fa"),
//!         &atlas,
//!         &fa,
//!         ParcellateOptions { reducers: &reducers, ..Default::default() },
//!     )
//!     .unwrap();
//! assert_eq!(out.rows.len(), 2);
//! assert_eq!(out.rows[0].stat("count"), Some(32.0));
//! ```

pub mod affine;
pub mod config;
pub mod enums;
pub mod error;
mod interpolator;
pub mod lookup;
pub mod orchestrator;
pub mod output;
pub mod parcellator;
pub mod planner;
pub mod provenance;
pub mod reducers;
pub mod resampler;
pub mod source;
pub mod volume;
pub mod volume_loader;

pub use affine::Affine;
pub use config::{ConfigError, RunConfig};
pub use enums::{ResampleDecision, ResamplePolicy, VolumeKind};
pub use error::{ErrorKind, JobIoError, ParcelError};
pub use lookup::RoiLookup;
pub use orchestrator::{CancelFlag, Orchestrator, ResultTable, RunOptions, RunOutput};
pub use parcellator::{ParcellateOptions, Parcellation, ParcellationResult, Parcellator};
pub use planner::{Job, JobKey, JobPlan, JobState, Planner};
pub use provenance::{FailureRecord, ProvenanceLog, ProvenanceNote, ProvenanceRecord};
pub use reducers::ReducerRegistry;
pub use resampler::Resampler;
pub use source::{InMemorySource, NiftiSource, VolumeSource};
pub use volume::{Grid, LabelVolume, ScalarVolume, Volume};
