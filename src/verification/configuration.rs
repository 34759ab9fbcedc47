/*
Copyright 2022 Jakub Lewandowski

This file is part of FLS Satellite Verification (fls-verif).

FLS Satellite Verification (fls-verif) is a free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation; either version 3 of the License, or
(at your option) any later version.

FLS Satellite Verification (fls-verif) is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with FLS Satellite Verification (fls-verif). If not, see https://www.gnu.org/licenses/.
*/

//! Module responsible for parsing and checking the configuration file.
//!
//! To provide meaningful error messages the configuration file uses
//! [YAML](https://en.wikipedia.org/wiki/YAML) and `serde` to enforce
//! strong typing and automatic type checking.
//!
//! The structures and their fields in this module directly correspond to
//! the fields inside `config.yaml` so you can check this documentation
//! for more details how to set the config file.

use crate::constants::{
    DEFAULT_INIT_INTERVAL, DEFAULT_LSCL_THRESHOLD, DEFAULT_MAX_LEAD_TIME, DEFAULT_TQC_THRESHOLD,
    SWISS_PLATEAU,
};
use crate::errors::ConfigError;
use crate::Float;
use chrono::{NaiveDateTime, Timelike};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Fields with information about the verification period.
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize)]
pub struct Period {
    /// First forecast initialisation (and first valid time) to verify.
    /// Must be a full hour.
    pub start: NaiveDateTime,

    /// Last forecast initialisation to verify. Valid times are
    /// computed up to `end + max_lead_time`.
    ///
    /// Cannot be earlier than `start`.
    pub end: NaiveDateTime,

    /// _(Optional)_ Hours between forecast initialisations.
    /// Used only to retrieve forecast files.
    ///
    /// Defaults to `12`. Cannot be less than `1`.
    #[serde(default = "Period::default_interval")]
    pub interval: u32,

    /// _(Optional)_ Maximal lead time (in hours) to verify.
    ///
    /// Defaults to `33`.
    #[serde(default = "Period::default_max_lead_time")]
    pub max_lead_time: u32,
}

impl Period {
    fn default_interval() -> u32 {
        DEFAULT_INIT_INTERVAL
    }

    fn default_max_lead_time() -> u32 {
        DEFAULT_MAX_LEAD_TIME
    }

    /// Checks if the period is ordered and aligned to full hours.
    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        if self.start > self.end {
            return Err(ConfigError::OutOfBounds(
                "Period start cannot be later than its end",
            ));
        }

        if !is_full_hour(&self.start) || !is_full_hour(&self.end) {
            return Err(ConfigError::OutOfBounds(
                "Period start and end must be full hours",
            ));
        }

        if self.interval < 1 {
            return Err(ConfigError::OutOfBounds(
                "Interval between initialisations cannot be less than 1 h",
            ));
        }

        Ok(())
    }
}

fn is_full_hour(datetime: &NaiveDateTime) -> bool {
    datetime.minute() == 0 && datetime.second() == 0 && datetime.nanosecond() == 0
}

/// Fields describing the verified model experiment.
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize)]
pub struct Experiment {
    /// Experiment identifier. Forecast files are searched for in
    /// `model_dir/name` and forecast table is saved as `fcst_name.p`.
    pub name: String,

    /// _(Optional)_ Directory with raw model output of the experiment.
    /// Needed only when forecast files are retrieved.
    #[serde(default)]
    pub model_source: Option<PathBuf>,

    /// _(Optional)_ Program extracting the liquid water field from
    /// raw model output, called as `<command> -o <out> -s TQC <in>`.
    ///
    /// Defaults to `fxfilter`.
    #[serde(default = "Experiment::default_filter_command")]
    pub filter_command: String,
}

impl Experiment {
    fn default_filter_command() -> String {
        "fxfilter".to_string()
    }

    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() || self.name.contains(std::path::MAIN_SEPARATOR) {
            return Err(ConfigError::OutOfBounds(
                "Experiment name must be non-empty and cannot contain path separators",
            ));
        }

        Ok(())
    }
}

/// Fields with directories used by the verification.
///
/// Each of `obs_dir`, `model_dir` and `fls_dir` defaults to
/// a subdirectory of `work_dir`.
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize)]
pub struct Paths {
    pub work_dir: PathBuf,

    /// _(Optional)_ Directory with satellite low stratus confidence level files.
    /// Defaults to `work_dir/sat`.
    #[serde(default)]
    pub obs_dir: Option<PathBuf>,

    /// _(Optional)_ Directory with filtered model files (one subdirectory per experiment).
    /// Defaults to `work_dir/tqc`.
    #[serde(default)]
    pub model_dir: Option<PathBuf>,

    /// _(Optional)_ Directory where FLS fraction tables are stored.
    /// Defaults to `work_dir/fls`.
    #[serde(default)]
    pub fls_dir: Option<PathBuf>,
}

impl Paths {
    pub fn obs_dir(&self) -> PathBuf {
        self.obs_dir
            .clone()
            .unwrap_or_else(|| self.work_dir.join("sat"))
    }

    pub fn model_dir(&self) -> PathBuf {
        self.model_dir
            .clone()
            .unwrap_or_else(|| self.work_dir.join("tqc"))
    }

    pub fn fls_dir(&self) -> PathBuf {
        self.fls_dir
            .clone()
            .unwrap_or_else(|| self.work_dir.join("fls"))
    }

    pub fn plot_dir(&self) -> PathBuf {
        self.work_dir.join("plots")
    }
}

/// _(Optional)_ Switches selecting what the program does.
#[derive(Copy, Clone, PartialEq, PartialOrd, Debug, Deserialize)]
pub struct Tasks {
    /// Extract the liquid water field from raw model output
    /// before computing fractions. Defaults to `false`.
    #[serde(default)]
    pub retrieve_forecasts: bool,

    /// Compute FLS fractions. Defaults to `true`.
    #[serde(default = "Tasks::default_calc_fractions")]
    pub calc_fractions: bool,

    /// Load previously saved tables and update them instead of
    /// starting from empty ones. Defaults to `false`.
    #[serde(default)]
    pub extend_previous: bool,
}

impl Tasks {
    fn default_calc_fractions() -> bool {
        true
    }
}

impl Default for Tasks {
    fn default() -> Self {
        Tasks {
            retrieve_forecasts: false,
            calc_fractions: Tasks::default_calc_fractions(),
            extend_previous: false,
        }
    }
}

/// _(Optional)_ Classification thresholds.
#[derive(Copy, Clone, PartialEq, PartialOrd, Debug, Deserialize)]
pub struct Thresholds {
    /// Low stratus confidence level above which an observed gridpoint is FLS.
    ///
    /// Defaults to `0.7`. Must be within `[0, 1]`.
    #[serde(default = "Thresholds::default_lscl")]
    pub lscl: Float,

    /// Total column liquid water (kg m-2) above which a forecasted gridpoint is FLS.
    ///
    /// Defaults to `0.0001`. Cannot be negative.
    #[serde(default = "Thresholds::default_tqc")]
    pub tqc: Float,
}

impl Thresholds {
    fn default_lscl() -> Float {
        DEFAULT_LSCL_THRESHOLD
    }

    fn default_tqc() -> Float {
        DEFAULT_TQC_THRESHOLD
    }

    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.lscl) {
            return Err(ConfigError::OutOfBounds(
                "LSCL threshold must be between 0 and 1",
            ));
        }

        if !(self.tqc >= 0.0) {
            return Err(ConfigError::OutOfBounds("TQC threshold cannot be negative"));
        }

        Ok(())
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            lscl: Thresholds::default_lscl(),
            tqc: Thresholds::default_tqc(),
        }
    }
}

/// _(Optional)_ Region of interest over which fractions are computed.
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize)]
pub struct Region {
    /// Polygon vertices as `[lat, lon]` pairs in degrees. The polygon
    /// is closed back to the first vertex.
    ///
    /// Defaults to the Swiss Plateau. At least 3 vertices are needed.
    #[serde(default = "Region::default_vertices")]
    pub vertices: Vec<(Float, Float)>,
}

impl Region {
    fn default_vertices() -> Vec<(Float, Float)> {
        SWISS_PLATEAU.to_vec()
    }

    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        if self.vertices.len() < 3 {
            return Err(ConfigError::OutOfBounds(
                "Region polygon needs at least 3 vertices",
            ));
        }

        if self
            .vertices
            .iter()
            .any(|(lat, lon)| !(-90.0..=90.0).contains(lat) || !(-180.0..=360.0).contains(lon))
        {
            return Err(ConfigError::OutOfBounds(
                "Region vertex latitude or longitude is too low or too high",
            ));
        }

        Ok(())
    }
}

impl Default for Region {
    fn default() -> Self {
        Region {
            vertices: Region::default_vertices(),
        }
    }
}

/// _(Optional)_ Fields with information about
/// resources available for the program.
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize)]
pub struct Resources {
    /// _(Optional)_ Thread count used to compute fractions.
    ///
    /// Cannot be less than `1`. Defaults to `1`.
    #[serde(default = "Resources::default_threads")]
    pub threads: u16,

    /// _(Optional)_ Heap memory limit in MB.
    /// Useful for enabling meaningful Out-of-memory error messages
    /// when long periods are processed with many threads.
    ///
    /// Cannot be less than `128`. Defaults to whole addressable-space.
    #[serde(default = "Resources::default_memory")]
    pub memory: usize,
}

impl Resources {
    fn default_threads() -> u16 {
        1
    }

    fn default_memory() -> usize {
        usize::MAX / (1024 * 1024)
    }

    /// Checks if thread count and memory limit are
    /// above limits.
    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        if self.threads < 1 {
            return Err(ConfigError::OutOfBounds(
                "Available threads cannot be less than 1",
            ));
        }

        if self.memory < 128 {
            return Err(ConfigError::OutOfBounds(
                "Available memory cannot be less than 128 MB",
            ));
        }

        Ok(())
    }
}

impl Default for Resources {
    fn default() -> Self {
        Resources {
            threads: Resources::default_threads(),
            memory: Resources::default_memory(),
        }
    }
}

/// Main config structure representing the fields in
/// configuration file.
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize)]
pub struct Config {
    pub period: Period,

    pub experiment: Experiment,

    pub paths: Paths,

    #[serde(default)]
    pub tasks: Tasks,

    #[serde(default)]
    pub thresholds: Thresholds,

    #[serde(default)]
    pub region: Region,

    #[serde(default)]
    pub resources: Resources,
}

impl Config {
    /// Config structure constructor, responsible for
    /// deserializing configuration and checking it.
    pub fn new_from_file(file_path: &Path) -> Result<Config, ConfigError> {
        let data = fs::read(file_path)?;
        Config::new_from_slice(data.as_slice())
    }

    fn new_from_slice(data: &[u8]) -> Result<Config, ConfigError> {
        let config: Config = serde_yaml::from_slice(data)?;

        config.period.check_bounds()?;
        config.experiment.check_bounds()?;
        config.thresholds.check_bounds()?;
        config.region.check_bounds()?;
        config.resources.check_bounds()?;

        Ok(config)
    }
}
