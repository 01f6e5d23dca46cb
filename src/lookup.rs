use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use crate::error::JobIoError;

/// Label value to human-readable ROI name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoiLookup {
    names: BTreeMap<i32, String>,
}

impl FromIterator<(i32, String)> for RoiLookup {
    fn from_iter<I: IntoIterator<Item = (i32, String)>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().collect(),
        }
    }
}

impl RoiLookup {
    pub fn name(&self, label: i32) -> Option<&str> {
        self.names.get(&label).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Read a tab-separated lookup with an `index` column and a `label` or
    /// `name` column.
    pub fn from_tsv(path: &Path) -> Result<Self, JobIoError> {
        let text = fs::read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => JobIoError::NotFound {
                what: "ROI lookup".to_string(),
                location: path.display().to_string(),
            },
            _ => unreadable(path, e.to_string()),
        })?;
        Self::parse_tsv(&text).map_err(|reason| unreadable(path, reason))
    }

    pub fn parse_tsv(text: &str) -> Result<Self, String> {
        let mut lines = text.lines().filter(|line| !line.trim().is_empty());
        let header: Vec<&str> = lines
            .next()
            .ok_or_else(|| "empty lookup table".to_string())?
            .split('\t')
            .map(str::trim)
            .collect();
        let column = |wanted: &[&str]| header.iter().position(|h| wanted.contains(h));
        let index_col = column(&["index"]).ok_or("missing 'index' column")?;
        let name_col = column(&["label", "name"]).ok_or("missing 'label' or 'name' column")?;

        let mut names = BTreeMap::new();
        for (row, line) in lines.enumerate() {
            let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
            let (Some(index), Some(name)) = (fields.get(index_col), fields.get(name_col)) else {
                return Err(format!("row {} has too few columns", row + 1));
            };
            let label = index
                .parse::<i32>()
                .map_err(|e| format!("row {}: bad index '{index}': {e}", row + 1))?;
            names.insert(label, name.to_string());
        }
        Ok(Self { names })
    }
}

fn unreadable(path: &Path, reason: String) -> JobIoError {
    JobIoError::Unreadable {
        what: "ROI lookup".to_string(),
        path: path.to_path_buf(),
        reason,
    }
}
