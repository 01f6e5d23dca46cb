//! Run configuration loaded from TOML.
//!
//! ```toml
//! [parcellation]
//! input_root = "/data/derivatives/qsirecon"
//! subjects = ["01", "02"]
//! reducers = ["mean", "median", "std", "count"]
//! resample = "labels"
//!
//! [[parcellation.atlases]]
//! name = "4S156Parcels"
//! path = "atlases/4S156Parcels.nii.gz"
//! lut = "atlases/4S156Parcels.tsv"
//!
//! [[parcellation.metrics]]
//! name = "dti_fa"
//! path = "sub-{subject}/dwi/sub-{subject}_space-ACPC_model-tensor_param-fa_dwimap.nii.gz"
//! ```
//!
//! The settings may also sit at the top level without the `[parcellation]`
//! table. `{subject}` in any path is replaced with the subject id.

use std::fs;
use std::path::{Path, PathBuf};

use crate::enums::ResamplePolicy;
use crate::reducers::DEFAULT_REDUCERS;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("unknown reducer in config: {0}")]
    UnknownReducer(String),
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for Vec<String> {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::One(one) => vec![one],
            OneOrMany::Many(many) => many,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
enum AtlasEntry {
    Name(String),
    Table {
        name: String,
        path: Option<String>,
        lut: Option<String>,
    },
}

/// An atlas requested for the run.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(from = "AtlasEntry")]
pub struct AtlasSelection {
    pub name: String,
    /// Label volume path; defaults to `<atlas_root>/<name>.nii.gz`.
    pub path: Option<String>,
    /// Optional TSV lookup with `index` and `label` columns.
    pub lut: Option<String>,
}

impl From<AtlasEntry> for AtlasSelection {
    fn from(entry: AtlasEntry) -> Self {
        match entry {
            AtlasEntry::Name(name) => Self {
                name,
                path: None,
                lut: None,
            },
            AtlasEntry::Table { name, path, lut } => Self { name, path, lut },
        }
    }
}

/// A metric map, located per subject by a path template.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricSelection {
    pub name: String,
    pub path: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    #[serde(default)]
    pub input_root: Option<PathBuf>,
    #[serde(default)]
    pub atlas_root: Option<PathBuf>,
    #[serde(default)]
    pub output_root: Option<PathBuf>,
    #[serde(deserialize_with = "one_or_many")]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub atlases: Vec<AtlasSelection>,
    #[serde(default)]
    pub metrics: Vec<MetricSelection>,
    #[serde(default = "default_reducers")]
    pub reducers: Vec<String>,
    #[serde(default)]
    pub resample: ResamplePolicy,
    #[serde(default = "default_parallel")]
    pub parallel: bool,
    /// Brain mask path template applied in atlas space.
    #[serde(default)]
    pub mask: Option<String>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    OneOrMany::deserialize(deserializer).map(Into::into)
}

fn default_reducers() -> Vec<String> {
    DEFAULT_REDUCERS.iter().map(|s| s.to_string()).collect()
}

fn default_parallel() -> bool {
    true
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let mut table: toml::Table = toml::from_str(text)?;
        let section = match table.remove("parcellation") {
            Some(section) => section,
            None => toml::Value::Table(table),
        };
        let config: RunConfig = section.try_into()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if self.subjects.is_empty() {
            return invalid("no subjects configured".into());
        }
        if let Some(blank) = self.subjects.iter().find(|s| s.trim().is_empty()) {
            return invalid(format!("blank subject id {blank:?}"));
        }
        if self.atlases.is_empty() {
            return invalid("no atlases configured".into());
        }
        if self.metrics.is_empty() {
            return invalid("no metrics configured".into());
        }
        if self.reducers.is_empty() {
            return invalid("no reducers configured".into());
        }
        for (i, reducer) in self.reducers.iter().enumerate() {
            if self.reducers[..i].contains(reducer) {
                return invalid(format!("reducer '{reducer}' is listed more than once"));
            }
        }
        for atlas in &self.atlases {
            if atlas.name.trim().is_empty() {
                return invalid("atlas entries must include a name".into());
            }
            if atlas.path.is_none() && self.atlas_root.is_none() {
                return invalid(format!(
                    "atlas '{}' has no path and no atlas_root is set",
                    atlas.name
                ));
            }
        }
        for metric in &self.metrics {
            if metric.name.trim().is_empty() || metric.path.trim().is_empty() {
                return invalid("metric entries need a name and a path".into());
            }
        }
        Ok(())
    }
}
