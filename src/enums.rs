use serde::{Deserialize, Serialize};

/// What a volume holds, which decides how it may be resampled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeKind {
    /// Integer labels, resampled with nearest neighbour.
    Label,
    /// Continuous values, resampled trilinearly.
    Scalar,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interpolation {
    Nearest,
    Trilinear,
}

impl VolumeKind {
    pub fn interpolation(self) -> Interpolation {
        match self {
            VolumeKind::Label => Interpolation::Nearest,
            VolumeKind::Scalar => Interpolation::Trilinear,
        }
    }
}

/// Which side moves when the atlas and metric grids differ.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResamplePolicy {
    /// Resample the metric map onto the atlas grid.
    #[default]
    #[serde(alias = "labels", alias = "atlas")]
    MetricToAtlas,
    /// Resample the atlas onto the metric grid with nearest neighbour.
    #[serde(alias = "data", alias = "scalar")]
    AtlasToMetric,
    /// Refuse to resample; differing grids are an error.
    #[serde(alias = "none")]
    Strict,
}

/// The resampling actually performed for one job.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResampleDecision {
    #[default]
    None,
    AtlasToMetric,
    MetricToAtlas,
}
