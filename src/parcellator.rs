use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::enums::{ResampleDecision, ResamplePolicy};
use crate::error::{ParcelError, ParcelResult};
use crate::lookup::RoiLookup;
use crate::planner::JobKey;
use crate::reducers::ReducerRegistry;
use crate::resampler::Resampler;
use crate::volume::{Grid, LabelVolume, ScalarVolume};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

/// Summary statistics for one ROI of one job.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ParcellationResult {
    pub subject_id: String,
    pub atlas_name: String,
    pub metric_name: String,
    pub roi_label: i32,
    pub roi_name: Option<String>,
    /// Reducer name and value, in the order the reducers were requested.
    pub stats: Vec<(String, f64)>,
    /// Voxels carrying this label, NaN samples included.
    pub voxel_count: usize,
}

impl ParcellationResult {
    pub fn stat(&self, reducer: &str) -> Option<f64> {
        self.stats
            .iter()
            .find(|(name, _)| name == reducer)
            .map(|(_, value)| *value)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ParcellateOptions<'a> {
    pub reducers: &'a [String],
    pub roi_names: Option<&'a RoiLookup>,
    pub policy: ResamplePolicy,
    /// Nonzero voxels are kept; may sit on any grid.
    pub mask: Option<&'a LabelVolume>,
}

/// Rows for one job plus the grid decision taken to produce them.
#[derive(Clone, Debug)]
pub struct Parcellation {
    pub decision: ResampleDecision,
    pub grid: Grid,
    pub rows: Vec<ParcellationResult>,
}

/// Stateless between calls; every call is a pure function of its inputs.
#[derive(Clone, Debug, Default)]
pub struct Parcellator {
    registry: ReducerRegistry,
}

impl Parcellator {
    pub fn new(registry: ReducerRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ReducerRegistry {
        &self.registry
    }

    /// Reduce `metric` over every ROI of `atlas`.
    ///
    /// Rows come out in ascending label order. Background (0) and negative
    /// labels never produce a row.
    ///
    /// # Errors
    ///
    /// - `UnknownReducer` for a reducer name missing from the registry
    /// - `EmptyAtlas` when the atlas holds nothing but background
    /// - `ShapeMismatch` when the grids differ and cannot be reconciled
    pub fn parcellate(
        &self,
        key: &JobKey,
        atlas: &LabelVolume,
        metric: &ScalarVolume,
        options: ParcellateOptions<'_>,
    ) -> ParcelResult<Parcellation> {
        let reducers = self.registry.resolve(options.reducers)?;
        if !atlas.has_labels() {
            return Err(ParcelError::EmptyAtlas);
        }

        let (atlas, metric, decision) = align(atlas, metric, options.policy)?;
        let atlas = match options.mask {
            Some(mask) => {
                let mask = Resampler::resample(mask, &atlas.grid())?;
                Cow::Owned(atlas.masked(&mask))
            }
            None => atlas,
        };

        let mut groups: BTreeMap<i32, (usize, Vec<f64>)> = BTreeMap::new();
        for (&label, &value) in atlas.data().iter().zip(metric.data().iter()) {
            if label <= 0 {
                continue;
            }
            let (voxels, values) = groups.entry(label).or_default();
            *voxels += 1;
            if !value.is_nan() {
                values.push(value);
            }
        }
        if groups.is_empty() {
            warn!(
                subject = %key.subject_id,
                atlas = %key.atlas_name,
                metric = %key.metric_name,
                "no labelled voxels left after resampling and masking"
            );
        }

        let rows = groups
            .into_par_iter()
            .map(|(label, (voxel_count, values))| ParcellationResult {
                subject_id: key.subject_id.clone(),
                atlas_name: key.atlas_name.clone(),
                metric_name: key.metric_name.clone(),
                roi_label: label,
                roi_name: options
                    .roi_names
                    .and_then(|lut| lut.name(label))
                    .map(str::to_string),
                stats: reducers
                    .iter()
                    .map(|(name, f)| (name.to_string(), f(&values)))
                    .collect(),
                voxel_count,
            })
            .collect::<Vec<_>>();

        debug!(rois = rows.len(), ?decision, "parcellated");
        Ok(Parcellation {
            decision,
            grid: atlas.grid(),
            rows,
        })
    }
}

/// Bring atlas and metric onto one grid, moving the atlas only when asked to.
fn align<'a>(
    atlas: &'a LabelVolume,
    metric: &'a ScalarVolume,
    policy: ResamplePolicy,
) -> ParcelResult<(Cow<'a, LabelVolume>, Cow<'a, ScalarVolume>, ResampleDecision)> {
    let atlas_grid = atlas.grid();
    let metric_grid = metric.grid();
    if atlas_grid.matches(&metric_grid) {
        return Ok((Cow::Borrowed(atlas), Cow::Borrowed(metric), ResampleDecision::None));
    }

    match policy {
        ResamplePolicy::Strict => Err(ParcelError::ShapeMismatch(format!(
            "atlas grid {:?} differs from metric grid {:?} and resampling is disabled",
            atlas_grid.shape, metric_grid.shape
        ))),
        ResamplePolicy::MetricToAtlas => {
            warn!(
                atlas_shape = ?atlas_grid.shape,
                metric_shape = ?metric_grid.shape,
                "grids differ, resampling metric map onto the atlas grid"
            );
            let metric = Resampler::resample(metric, &atlas_grid)?;
            Ok((Cow::Borrowed(atlas), metric, ResampleDecision::MetricToAtlas))
        }
        ResamplePolicy::AtlasToMetric => {
            warn!(
                atlas_shape = ?atlas_grid.shape,
                metric_shape = ?metric_grid.shape,
                "grids differ, resampling atlas onto the metric grid"
            );
            let atlas = Resampler::resample(atlas, &metric_grid)?;
            Ok((atlas, Cow::Borrowed(metric), ResampleDecision::AtlasToMetric))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affine::Affine;
    use crate::volume::Volume;
    use ndarray::Array3;

    fn key() -> JobKey {
        JobKey::new("01", "toy", "fa")
    }

    fn reducers() -> Vec<String> {
        ["mean", "median", "std", "count"].map(String::from).to_vec()
    }

    /// Label 1 fills x < 2, label 2 fills x >= 2 except the x = 3 plane,
    /// which is background.
    fn two_label_atlas() -> LabelVolume {
        let data = Array3::from_shape_fn((4, 4, 4), |(i, _, _)| match i {
            0 | 1 => 1,
            2 => 2,
            _ => 0,
        });
        Volume::new(data, Affine::identity()).unwrap()
    }

    fn metric_from_atlas(atlas: &LabelVolume) -> ScalarVolume {
        let data = atlas.data().mapv(|label| label as f64);
        Volume::new(data, *atlas.affine()).unwrap()
    }

    #[test]
    fn constant_labels_give_exact_stats() {
        let atlas = two_label_atlas();
        let metric = metric_from_atlas(&atlas);
        let reducers = reducers();
        let out = Parcellator::default()
            .parcellate(&key(), &atlas, &metric, ParcellateOptions {
                reducers: &reducers,
                ..Default::default()
            })
            .unwrap();

        assert_eq!(out.decision, ResampleDecision::None);
        let labels: Vec<_> = out.rows.iter().map(|r| r.roi_label).collect();
        assert_eq!(labels, vec![1, 2]);

        let one = &out.rows[0];
        assert_eq!(one.stat("mean"), Some(1.0));
        assert_eq!(one.stat("std"), Some(0.0));
        assert_eq!(one.stat("count"), Some(32.0));
        assert_eq!(one.voxel_count, 32);
        let two = &out.rows[1];
        assert_eq!(two.stat("mean"), Some(2.0));
        assert_eq!(two.stat("median"), Some(2.0));
        assert_eq!(two.stat("count"), Some(16.0));
        assert_eq!(two.subject_id, "01");
        assert_eq!(two.roi_name, None);
    }

    #[test]
    fn background_only_atlas_is_an_error() {
        let atlas = Volume::new(Array3::zeros((3, 3, 3)), Affine::identity()).unwrap();
        let metric = metric_from_atlas(&atlas);
        let reducers = reducers();
        let err = Parcellator::default()
            .parcellate(&key(), &atlas, &metric, ParcellateOptions {
                reducers: &reducers,
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, ParcelError::EmptyAtlas));
    }

    #[test]
    fn all_nan_roi_reports_nan_with_zero_count() {
        let atlas = two_label_atlas();
        let mut metric = metric_from_atlas(&atlas).into_data();
        metric.indexed_iter_mut().for_each(|((i, _, _), v)| {
            if i == 2 {
                *v = f64::NAN;
            }
        });
        metric[[0, 0, 0]] = f64::NAN;
        let metric = Volume::new(metric, Affine::identity()).unwrap();
        let reducers = reducers();
        let out = Parcellator::default()
            .parcellate(&key(), &atlas, &metric, ParcellateOptions {
                reducers: &reducers,
                ..Default::default()
            })
            .unwrap();

        let one = &out.rows[0];
        assert_eq!(one.stat("count"), Some(31.0));
        assert_eq!(one.voxel_count, 32);

        let two = &out.rows[1];
        assert_eq!(two.stat("count"), Some(0.0));
        assert_eq!(two.voxel_count, 16);
        for name in ["mean", "median", "std"] {
            assert!(two.stat(name).unwrap().is_nan());
        }
    }

    #[test]
    fn unknown_reducer_fails_before_any_work() {
        let atlas = two_label_atlas();
        let metric = metric_from_atlas(&atlas);
        let reducers = vec!["mean".to_string(), "kurtosis".to_string()];
        let err = Parcellator::default()
            .parcellate(&key(), &atlas, &metric, ParcellateOptions {
                reducers: &reducers,
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, ParcelError::UnknownReducer(name) if name == "kurtosis"));
    }

    #[test]
    fn roi_names_come_from_the_lookup_when_present() {
        let atlas = two_label_atlas();
        let metric = metric_from_atlas(&atlas);
        let lut: RoiLookup = [(2, "Thalamus".to_string()), (9, "Unused".to_string())]
            .into_iter()
            .collect();
        let reducers = vec!["mean".to_string()];
        let out = Parcellator::default()
            .parcellate(&key(), &atlas, &metric, ParcellateOptions {
                reducers: &reducers,
                roi_names: Some(&lut),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(out.rows[0].roi_name, None);
        assert_eq!(out.rows[1].roi_name.as_deref(), Some("Thalamus"));
    }

    #[test]
    fn coarser_metric_is_resampled_onto_the_atlas() {
        let atlas = two_label_atlas();
        // 2mm metric, constant 5.0, covering the atlas field of view
        let metric = Volume::new(
            Array3::from_elem((2, 2, 2), 5.0),
            Affine::from_diagonal(2.0, 2.0, 2.0),
        )
        .unwrap();
        let reducers = vec!["mean".to_string(), "count".to_string()];
        let out = Parcellator::default()
            .parcellate(&key(), &atlas, &metric, ParcellateOptions {
                reducers: &reducers,
                ..Default::default()
            })
            .unwrap();

        assert_eq!(out.decision, ResampleDecision::MetricToAtlas);
        assert_eq!(out.grid, atlas.grid());
        // atlas voxels at index 3 fall outside the 2mm centres and become NaN
        assert_eq!(out.rows[0].stat("mean"), Some(5.0));
        assert_eq!(out.rows[0].stat("count"), Some(18.0));
        assert_eq!(out.rows[0].voxel_count, 32);
    }

    #[test]
    fn atlas_moves_only_when_configured() {
        let atlas = two_label_atlas();
        let metric = Volume::new(
            Array3::from_elem((2, 2, 2), 1.5),
            Affine::from_diagonal(2.0, 2.0, 2.0),
        )
        .unwrap();
        let reducers = vec!["mean".to_string()];
        let out = Parcellator::default()
            .parcellate(&key(), &atlas, &metric, ParcellateOptions {
                reducers: &reducers,
                policy: ResamplePolicy::AtlasToMetric,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(out.decision, ResampleDecision::AtlasToMetric);
        assert_eq!(out.grid, metric.grid());
        assert!(out.rows.iter().all(|row| row.stat("mean") == Some(1.5)));

        let err = Parcellator::default()
            .parcellate(&key(), &atlas, &metric, ParcellateOptions {
                reducers: &reducers,
                policy: ResamplePolicy::Strict,
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, ParcelError::ShapeMismatch(_)));
    }

    #[test]
    fn mask_drops_voxels_before_reduction() {
        let atlas = two_label_atlas();
        let metric = Volume::new(
            Array3::from_shape_fn((4, 4, 4), |(_, j, _)| j as f64),
            Affine::identity(),
        )
        .unwrap();
        let mask = Volume::new(
            Array3::from_shape_fn((4, 4, 4), |(_, j, _)| i32::from(j >= 2)),
            Affine::identity(),
        )
        .unwrap();
        let reducers = vec!["mean".to_string()];
        let out = Parcellator::default()
            .parcellate(&key(), &atlas, &metric, ParcellateOptions {
                reducers: &reducers,
                mask: Some(&mask),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(out.rows[0].stat("mean"), Some(2.5));
        assert_eq!(out.rows[0].voxel_count, 16);
    }
}
