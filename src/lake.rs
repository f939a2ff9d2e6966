//! Data lake: a named collection of series

use crate::average::AveragingParams;
use crate::error::StreamError;
use crate::merge::RawBlock;
use crate::series::Series;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named series, kept in name order so listings and snapshots are stable
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataLake {
    streams: BTreeMap<String, Series>,
}

impl DataLake {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list_streams(&self) -> Vec<&str> {
        self.streams.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.streams.contains_key(name)
    }

    /// Insert a series, returning the one it replaced
    pub fn insert(&mut self, name: impl Into<String>, series: Series) -> Option<Series> {
        self.streams.insert(name.into(), series)
    }

    pub fn remove(&mut self, name: &str) -> Option<Series> {
        self.streams.remove(name)
    }

    pub fn get(&self, name: &str) -> Result<&Series, StreamError> {
        match self.streams.get(name) {
            Some(series) => Ok(series),
            None => Err(self.unknown(name)),
        }
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut Series, StreamError> {
        let known: Vec<String> = if self.streams.contains_key(name) {
            Vec::new()
        } else {
            self.streams.keys().cloned().collect()
        };
        match self.streams.get_mut(name) {
            Some(series) => Ok(series),
            None => Err(StreamError::UnknownStream {
                name: name.to_string(),
                known,
            }),
        }
    }

    fn unknown(&self, name: &str) -> StreamError {
        StreamError::UnknownStream {
            name: name.to_string(),
            known: self.streams.keys().cloned().collect(),
        }
    }

    /// Store processed data as a new stream, replacing any stream of that name.
    pub fn add_processed_stream(
        &mut self,
        name: impl Into<String>,
        block: RawBlock,
        params: AveragingParams,
    ) -> Result<(), StreamError> {
        let name = name.into();
        let mut series = Series::new(params)?;
        series.append_derived(block)?;
        log::info!("added processed stream '{name}' with {} channel(s)", series.n_channels());
        self.streams.insert(name, series);
        Ok(())
    }

    /// Recompute the bucketed view of `keys` (every stream when `None`).
    ///
    /// Each stream keeps its own parameters except where overridden. The call
    /// is all-or-nothing: keys and combined parameters are checked first, and
    /// the recomputed streams replace the originals only once all succeed.
    pub fn reaverage_streams(
        &mut self,
        bucket_width_sec: Option<f64>,
        keys: Option<&[&str]>,
        window_start: Option<f64>,
        window_end: Option<f64>,
    ) -> Result<(), StreamError> {
        let keys: Vec<String> = match keys {
            Some(keys) => keys.iter().map(|k| k.to_string()).collect(),
            None => self.streams.keys().cloned().collect(),
        };

        let mut planned = Vec::with_capacity(keys.len());
        for key in &keys {
            let params = self
                .get(key)?
                .params()
                .with_overrides(bucket_width_sec, window_start, window_end);
            params.validate()?;
            planned.push((key, params));
        }

        let mut staged = Vec::with_capacity(planned.len());
        for (key, params) in planned {
            let mut series = self.get(key)?.clone();
            series.reaverage_with(params)?;
            staged.push((key.clone(), series));
        }
        for (key, series) in staged {
            self.streams.insert(key, series);
        }
        log::info!("reaveraged {} stream(s)", keys.len());
        Ok(())
    }

    /// Drop zero/calibration periods from `stream` using its flag channels.
    pub fn drop_zero_periods(&mut self, stream: &str, flag_channels: &[&str]) -> Result<usize, StreamError> {
        let removed = self.get_mut(stream)?.drop_flagged(flag_channels)?;
        if removed > 0 {
            log::info!("dropped {removed} flagged sample(s) from '{stream}'");
        }
        Ok(removed)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Series)> {
        self.streams.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Load a lake snapshot from JSON
    pub fn from_json(json: &str) -> Result<Self, StreamError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Save the lake, raw data and bucketed views included, as JSON
    pub fn to_json(&self) -> Result<String, StreamError> {
        Ok(serde_json::to_string(self)?)
    }
}
