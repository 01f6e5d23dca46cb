//! Named per-ROI aggregations.
//!
//! A reducer is any function from the non-NaN values inside one ROI to a
//! single number. The registry maps names to reducers; names are
//! case-sensitive and unique per registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{ParcelError, ParcelResult};

/// Signature every reducer satisfies. Input never contains NaN.
pub type ReducerFn = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;

pub const DEFAULT_REDUCERS: [&str; 4] = ["mean", "median", "std", "count"];

const ZSCORE_CUTOFF: f64 = 3.0;

#[derive(Clone)]
pub struct ReducerRegistry {
    reducers: HashMap<String, ReducerFn>,
}

impl fmt::Debug for ReducerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.names();
        names.sort_unstable();
        f.debug_struct("ReducerRegistry").field("reducers", &names).finish()
    }
}

impl Default for ReducerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ReducerRegistry {
    pub fn empty() -> Self {
        Self {
            reducers: HashMap::new(),
        }
    }

    /// Registry holding mean, median, std, count, min, max, zfmean,
    /// iqrmean and mad_median.
    pub fn with_builtins() -> Self {
        let builtins: [(&str, fn(&[f64]) -> f64); 9] = [
            ("mean", mean),
            ("median", median),
            ("std", std_dev),
            ("count", count),
            ("min", min),
            ("max", max),
            ("zfmean", zfiltered_mean),
            ("iqrmean", iqr_mean),
            ("mad_median", mad_median),
        ];
        let reducers = builtins
            .into_iter()
            .map(|(name, f)| (name.to_string(), Arc::new(f) as ReducerFn))
            .collect();
        Self { reducers }
    }

    /// # Errors
    ///
    /// `DuplicateReducer` if `name` is already taken.
    pub fn register<F>(&mut self, name: impl Into<String>, reducer: F) -> ParcelResult<()>
    where
        F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
    {
        let name = name.into();
        if self.reducers.contains_key(&name) {
            return Err(ParcelError::DuplicateReducer(name));
        }
        self.reducers.insert(name, Arc::new(reducer));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ReducerFn> {
        self.reducers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.reducers.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.reducers.keys().map(String::as_str).collect()
    }

    /// Look up every requested name, in order.
    ///
    /// # Errors
    ///
    /// `UnknownReducer` naming the first name that is not registered.
    pub fn resolve<'a, S: AsRef<str>>(
        &'a self,
        names: &[S],
    ) -> ParcelResult<Vec<(&'a str, &'a ReducerFn)>> {
        names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                self.reducers
                    .get_key_value(name)
                    .map(|(k, f)| (k.as_str(), f))
                    .ok_or_else(|| ParcelError::UnknownReducer(name.to_string()))
            })
            .collect()
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn median(values: &[f64]) -> f64 {
    percentile(&sorted(values), 50.0)
}

/// Population standard deviation (ddof = 0).
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

pub fn count(values: &[f64]) -> f64 {
    values.len() as f64
}

pub fn min(values: &[f64]) -> f64 {
    values.iter().copied().reduce(f64::min).unwrap_or(f64::NAN)
}

pub fn max(values: &[f64]) -> f64 {
    values.iter().copied().reduce(f64::max).unwrap_or(f64::NAN)
}

/// Mean after dropping values three or more standard deviations out.
pub fn zfiltered_mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let m = mean(values);
    let s = std_dev(values);
    if s == 0.0 {
        return m;
    }
    let kept: Vec<f64> = values
        .iter()
        .copied()
        .filter(|v| ((v - m) / s).abs() < ZSCORE_CUTOFF)
        .collect();
    mean(&kept)
}

/// Mean of the values between the first and third quartiles, inclusive.
pub fn iqr_mean(values: &[f64]) -> f64 {
    let sorted = sorted(values);
    if sorted.is_empty() {
        return f64::NAN;
    }
    let q1 = percentile(&sorted, 25.0);
    let q3 = percentile(&sorted, 75.0);
    let kept: Vec<f64> = sorted.into_iter().filter(|v| *v >= q1 && *v <= q3).collect();
    mean(&kept)
}

/// Median absolute deviation from the median.
pub fn mad_median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let m = median(values);
    let deviations: Vec<f64> = values.iter().map(|v| (v - m).abs()).collect();
    median(&deviations)
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut v = values.to_vec();
    v.sort_unstable_by(f64::total_cmp);
    v
}

/// Linear-interpolated percentile of an already sorted slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let rank = q / 100.0 * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let t = rank - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * t
        }
    }
}
