//! Where a job's volumes come from.
//!
//! The orchestrator only sees [`VolumeSource`]. [`NiftiSource`] resolves
//! paths from the run configuration and reads NIfTI files;
//! [`InMemorySource`] serves volumes that are already loaded.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::RunConfig;
use crate::error::JobIoError;
use crate::lookup::RoiLookup;
use crate::volume::{LabelVolume, ScalarVolume};
use crate::volume_loader::VolumeLoader;

#[derive(Clone, Debug)]
pub struct LoadedAtlas {
    pub volume: LabelVolume,
    pub lookup: Option<RoiLookup>,
    /// Path or other description of where the atlas came from.
    pub origin: String,
}

#[derive(Clone, Debug)]
pub struct LoadedMetric {
    pub volume: ScalarVolume,
    pub origin: String,
}

pub trait VolumeSource: Send + Sync {
    fn atlas(&self, subject_id: &str, atlas_name: &str) -> Result<Arc<LoadedAtlas>, JobIoError>;

    fn metric(&self, subject_id: &str, metric_name: &str)
    -> Result<Arc<LoadedMetric>, JobIoError>;

    /// Optional brain mask for a subject.
    fn mask(&self, _subject_id: &str) -> Result<Option<Arc<LabelVolume>>, JobIoError> {
        Ok(None)
    }
}

/// Reads NIfTI files at paths templated by the run configuration.
#[derive(Clone, Debug)]
pub struct NiftiSource {
    input_root: Option<PathBuf>,
    atlas_root: Option<PathBuf>,
    atlases: HashMap<String, (Option<String>, Option<String>)>,
    metrics: HashMap<String, String>,
    mask: Option<String>,
}

impl NiftiSource {
    /// First entry wins when a name is configured twice.
    pub fn from_config(config: &RunConfig) -> Self {
        let mut atlases = HashMap::new();
        for atlas in &config.atlases {
            atlases
                .entry(atlas.name.clone())
                .or_insert_with(|| (atlas.path.clone(), atlas.lut.clone()));
        }
        let mut metrics = HashMap::new();
        for metric in &config.metrics {
            metrics
                .entry(metric.name.clone())
                .or_insert_with(|| metric.path.clone());
        }
        Self {
            input_root: config.input_root.clone(),
            atlas_root: config.atlas_root.clone(),
            atlases,
            metrics,
            mask: config.mask.clone(),
        }
    }

    fn resolve(&self, root: Option<&Path>, template: &str, subject_id: &str) -> PathBuf {
        let path = PathBuf::from(template.replace("{subject}", subject_id));
        match root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path,
        }
    }

    fn atlas_root(&self) -> Option<&Path> {
        self.atlas_root.as_deref().or(self.input_root.as_deref())
    }
}

impl VolumeSource for NiftiSource {
    fn atlas(&self, subject_id: &str, atlas_name: &str) -> Result<Arc<LoadedAtlas>, JobIoError> {
        let (path, lut) = self.atlases.get(atlas_name).ok_or_else(|| JobIoError::NotFound {
            what: "atlas".to_string(),
            location: format!("no atlas named '{atlas_name}' is configured"),
        })?;
        let path = match path {
            Some(template) => self.resolve(self.atlas_root(), template, subject_id),
            None => self.resolve(
                self.atlas_root(),
                &format!("{atlas_name}.nii.gz"),
                subject_id,
            ),
        };
        let lookup = lut
            .as_ref()
            .map(|template| RoiLookup::from_tsv(&self.resolve(self.atlas_root(), template, subject_id)))
            .transpose()?;
        Ok(Arc::new(LoadedAtlas {
            volume: VolumeLoader::load_labels(&path)?,
            lookup,
            origin: path.display().to_string(),
        }))
    }

    fn metric(
        &self,
        subject_id: &str,
        metric_name: &str,
    ) -> Result<Arc<LoadedMetric>, JobIoError> {
        let template = self.metrics.get(metric_name).ok_or_else(|| JobIoError::NotFound {
            what: "metric map".to_string(),
            location: format!("no metric named '{metric_name}' is configured"),
        })?;
        let path = self.resolve(self.input_root.as_deref(), template, subject_id);
        Ok(Arc::new(LoadedMetric {
            volume: VolumeLoader::load_scalars(&path)?,
            origin: path.display().to_string(),
        }))
    }

    fn mask(&self, subject_id: &str) -> Result<Option<Arc<LabelVolume>>, JobIoError> {
        self.mask
            .as_ref()
            .map(|template| {
                let path = self.resolve(self.input_root.as_deref(), template, subject_id);
                VolumeLoader::load_mask(path).map(Arc::new)
            })
            .transpose()
    }
}

/// Volumes handed over already loaded. Atlases are shared by all subjects
/// unless a subject-specific one is registered.
#[derive(Clone, Debug, Default)]
pub struct InMemorySource {
    atlases: HashMap<String, Arc<LoadedAtlas>>,
    subject_atlases: HashMap<(String, String), Arc<LoadedAtlas>>,
    metrics: HashMap<(String, String), Arc<LoadedMetric>>,
    masks: HashMap<String, Arc<LabelVolume>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_atlas(
        mut self,
        name: impl Into<String>,
        volume: LabelVolume,
        lookup: Option<RoiLookup>,
    ) -> Self {
        let name = name.into();
        let origin = format!("memory:atlas/{name}");
        self.atlases.insert(
            name,
            Arc::new(LoadedAtlas {
                volume,
                lookup,
                origin,
            }),
        );
        self
    }

    pub fn with_subject_atlas(
        mut self,
        subject_id: impl Into<String>,
        name: impl Into<String>,
        volume: LabelVolume,
    ) -> Self {
        let key = (subject_id.into(), name.into());
        let origin = format!("memory:sub-{}/atlas/{}", key.0, key.1);
        self.subject_atlases.insert(
            key,
            Arc::new(LoadedAtlas {
                volume,
                lookup: None,
                origin,
            }),
        );
        self
    }

    pub fn with_metric(
        mut self,
        subject_id: impl Into<String>,
        name: impl Into<String>,
        volume: ScalarVolume,
    ) -> Self {
        let key = (subject_id.into(), name.into());
        let origin = format!("memory:sub-{}/{}", key.0, key.1);
        self.metrics
            .insert(key, Arc::new(LoadedMetric { volume, origin }));
        self
    }

    pub fn with_mask(mut self, subject_id: impl Into<String>, mask: LabelVolume) -> Self {
        self.masks.insert(subject_id.into(), Arc::new(mask));
        self
    }
}

impl VolumeSource for InMemorySource {
    fn atlas(&self, subject_id: &str, atlas_name: &str) -> Result<Arc<LoadedAtlas>, JobIoError> {
        self.subject_atlases
            .get(&(subject_id.to_string(), atlas_name.to_string()))
            .or_else(|| self.atlases.get(atlas_name))
            .cloned()
            .ok_or_else(|| JobIoError::NotFound {
                what: "atlas".to_string(),
                location: format!("memory:atlas/{atlas_name}"),
            })
    }

    fn metric(
        &self,
        subject_id: &str,
        metric_name: &str,
    ) -> Result<Arc<LoadedMetric>, JobIoError> {
        self.metrics
            .get(&(subject_id.to_string(), metric_name.to_string()))
            .cloned()
            .ok_or_else(|| JobIoError::NotFound {
                what: "metric map".to_string(),
                location: format!("memory:sub-{subject_id}/{metric_name}"),
            })
    }

    fn mask(&self, subject_id: &str) -> Result<Option<Arc<LabelVolume>>, JobIoError> {
        Ok(self.masks.get(subject_id).cloned())
    }
}
