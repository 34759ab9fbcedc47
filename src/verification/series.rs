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

//! Module with the tables of observed and forecasted FLS fractions
//! and their persistent storage.
//!
//! Tables are stored as CSV files with a header row, rows sorted
//! by valid time and missing values as empty fields. Floats are
//! written in their shortest exact representation so that a table
//! reads back identical to the saved one.

use crate::constants::OBS_TABLE_FILE;
use crate::{errors::StoreError, Float};
use chrono::NaiveDateTime;
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Valid time column of both tables, in [`TIME_FORMAT`].
mod table_time {
    use super::TIME_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(time: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&time.format(TIME_FORMAT))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let time = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&time, TIME_FORMAT).map_err(D::Error::custom)
    }
}

/// Observed fractions at one valid time.
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct ObservationRecord {
    pub fls_fraction: Option<Float>,
    pub high_cloud_fraction: Option<Float>,
}

/// Row of the observation table file.
#[derive(Serialize, Deserialize)]
struct ObservationRow {
    #[serde(rename = "validTime", with = "table_time")]
    valid_time: NaiveDateTime,
    #[serde(rename = "flsFraction")]
    fls_fraction: Option<Float>,
    #[serde(rename = "highCloudFraction")]
    high_cloud_fraction: Option<Float>,
}

/// Observed fractions indexed by valid time.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct ObservationSeries {
    rows: BTreeMap<NaiveDateTime, ObservationRecord>,
}

impl ObservationSeries {
    /// Creates a table with all-missing row for each valid time.
    pub fn new(valid_times: &[NaiveDateTime]) -> Self {
        let mut series = ObservationSeries::default();
        series.ensure_rows(valid_times);
        series
    }

    /// Adds all-missing rows for valid times not yet in the table.
    pub fn ensure_rows(&mut self, valid_times: &[NaiveDateTime]) {
        for valid_time in valid_times {
            self.rows.entry(*valid_time).or_default();
        }
    }

    pub fn get(&self, valid_time: &NaiveDateTime) -> Option<&ObservationRecord> {
        self.rows.get(valid_time)
    }

    pub fn set(&mut self, valid_time: NaiveDateTime, record: ObservationRecord) {
        self.rows.insert(valid_time, record);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Count of rows with observed values.
    pub fn observed_count(&self) -> usize {
        self.rows
            .values()
            .filter(|r| r.fls_fraction.is_some())
            .count()
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        write_atomically(path, |tmp_path| {
            let mut out_file = csv::Writer::from_path(tmp_path)?;

            for (valid_time, record) in &self.rows {
                out_file.serialize(ObservationRow {
                    valid_time: *valid_time,
                    fls_fraction: record.fls_fraction,
                    high_cloud_fraction: record.high_cloud_fraction,
                })?;
            }

            out_file.flush()?;
            Ok(())
        })
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let mut in_file = csv::Reader::from_path(path)?;
        let mut series = ObservationSeries::default();

        for row in in_file.deserialize() {
            let row: ObservationRow = row?;
            series.rows.insert(
                row.valid_time,
                ObservationRecord {
                    fls_fraction: row.fls_fraction,
                    high_cloud_fraction: row.high_cloud_fraction,
                },
            );
        }

        Ok(series)
    }
}

/// Forecasted fractions indexed by valid time, with one
/// column per lead time from `0` to `max_lead_time`.
#[derive(Clone, PartialEq, Debug)]
pub struct ForecastSeries {
    max_lead_time: u32,
    rows: BTreeMap<NaiveDateTime, Vec<Option<Float>>>,
}

impl ForecastSeries {
    /// Creates a table with all-missing row for each valid time.
    pub fn new(valid_times: &[NaiveDateTime], max_lead_time: u32) -> Self {
        let mut series = ForecastSeries {
            max_lead_time,
            rows: BTreeMap::new(),
        };
        series.ensure_rows(valid_times);
        series
    }

    fn columns(&self) -> usize {
        self.max_lead_time as usize + 1
    }

    /// Adds all-missing rows for valid times not yet in the table.
    pub fn ensure_rows(&mut self, valid_times: &[NaiveDateTime]) {
        let columns = self.columns();

        for valid_time in valid_times {
            self.rows
                .entry(*valid_time)
                .or_insert_with(|| vec![None; columns]);
        }
    }

    /// Adds all-missing lead time columns up to `max_lead_time`.
    /// Existing columns are never removed.
    pub fn ensure_lead_times(&mut self, max_lead_time: u32) {
        if max_lead_time <= self.max_lead_time {
            return;
        }

        self.max_lead_time = max_lead_time;
        let columns = self.columns();

        for row in self.rows.values_mut() {
            row.resize(columns, None);
        }
    }

    pub fn max_lead_time(&self) -> u32 {
        self.max_lead_time
    }

    pub fn get(&self, valid_time: &NaiveDateTime, lead_time: u32) -> Option<Float> {
        self.rows
            .get(valid_time)
            .and_then(|row| row.get(lead_time as usize).copied().flatten())
    }

    /// Sets the value at existing row and lead time column.
    ///
    /// Missing row is created, lead time above `max_lead_time` extends the table.
    pub fn set(&mut self, valid_time: NaiveDateTime, lead_time: u32, value: Float) {
        self.ensure_lead_times(lead_time);
        let columns = self.columns();

        let row = self
            .rows
            .entry(valid_time)
            .or_insert_with(|| vec![None; columns]);
        row[lead_time as usize] = Some(value);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn row(&self, valid_time: &NaiveDateTime) -> Option<&[Option<Float>]> {
        self.rows.get(valid_time).map(Vec::as_slice)
    }

    /// Count of cells with forecasted values.
    pub fn forecast_count(&self) -> usize {
        self.rows
            .values()
            .map(|row| row.iter().filter(|v| v.is_some()).count())
            .sum()
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        write_atomically(path, |tmp_path| {
            let mut out_file = csv::Writer::from_path(tmp_path)?;

            let mut header = vec!["validTime".to_string()];
            header.extend((0..=self.max_lead_time).map(|lt| lt.to_string()));
            out_file.write_record(&header)?;

            for (valid_time, row) in &self.rows {
                let mut record = vec![valid_time.format(TIME_FORMAT).to_string()];
                record.extend(
                    row.iter()
                        .map(|value| value.map(|v| v.to_string()).unwrap_or_default()),
                );
                out_file.write_record(&record)?;
            }

            out_file.flush()?;
            Ok(())
        })
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let malformed = |reason: String| StoreError::MalformedTable(path.to_path_buf(), reason);

        let mut in_file = csv::Reader::from_path(path)?;

        let header = in_file.headers()?.clone();
        if header.get(0) != Some("validTime") || header.len() < 2 {
            return Err(malformed("header must start with validTime".to_string()));
        }

        for (expected, column) in header.iter().skip(1).enumerate() {
            if column.parse::<usize>() != Ok(expected) {
                return Err(malformed(format!(
                    "lead time column {} found where {} was expected",
                    column, expected
                )));
            }
        }

        let mut series = ForecastSeries {
            max_lead_time: (header.len() - 2) as u32,
            rows: BTreeMap::new(),
        };

        for record in in_file.records() {
            let record = record?;

            let valid_time = NaiveDateTime::parse_from_str(&record[0], TIME_FORMAT)
                .map_err(|e| malformed(format!("invalid time {}: {}", &record[0], e)))?;

            let row = record
                .iter()
                .skip(1)
                .map(|field| {
                    if field.is_empty() {
                        Ok(None)
                    } else {
                        field
                            .parse::<Float>()
                            .map(Some)
                            .map_err(|e| malformed(format!("invalid value {}: {}", field, e)))
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;

            series.rows.insert(valid_time, row);
        }

        Ok(series)
    }
}

/// Writes to a temporary file first so that an interrupted
/// save does not damage the previous table.
fn write_atomically<F>(path: &Path, write: F) -> Result<(), StoreError>
where
    F: FnOnce(&Path) -> Result<(), StoreError>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    write(&tmp_path)?;
    fs::rename(&tmp_path, path)?;

    info!("Saved {}", path.display());

    Ok(())
}

/// Both tables of a verification run.
#[derive(Clone, PartialEq, Debug)]
pub struct FlsTables {
    pub obs: ObservationSeries,
    pub fcst: ForecastSeries,
}

pub fn obs_table_path(fls_dir: &Path) -> PathBuf {
    fls_dir.join(OBS_TABLE_FILE)
}

pub fn fcst_table_path(fls_dir: &Path, exp: &str) -> PathBuf {
    fls_dir.join(format!("fcst_{}.p", exp))
}

impl FlsTables {
    /// Loads previously saved tables of experiment `exp`.
    pub fn load(fls_dir: &Path, exp: &str) -> Result<Self, StoreError> {
        Ok(FlsTables {
            obs: ObservationSeries::load(&obs_table_path(fls_dir))?,
            fcst: ForecastSeries::load(&fcst_table_path(fls_dir, exp))?,
        })
    }

    /// Loads previously saved tables when `extend_previous` is set
    /// and they exist, otherwise creates empty ones. Each table
    /// is handled separately.
    ///
    /// Returned tables have a row for each of `valid_times`
    /// and a column for each lead time up to `max_lead_time`.
    pub fn load_or_create(
        fls_dir: &Path,
        exp: &str,
        valid_times: &[NaiveDateTime],
        max_lead_time: u32,
        extend_previous: bool,
    ) -> Result<Self, StoreError> {
        let obs_path = obs_table_path(fls_dir);
        let obs = if extend_previous && obs_path.is_file() {
            let mut obs = ObservationSeries::load(&obs_path)?;
            obs.ensure_rows(valid_times);
            info!("Loaded obs table: {}", obs_path.display());
            obs
        } else {
            info!("Created new obs table: {}", obs_path.display());
            ObservationSeries::new(valid_times)
        };

        let fcst_path = fcst_table_path(fls_dir, exp);
        let fcst = if extend_previous && fcst_path.is_file() {
            let mut fcst = ForecastSeries::load(&fcst_path)?;
            fcst.ensure_lead_times(max_lead_time);
            fcst.ensure_rows(valid_times);
            info!("Loaded fcst table: {}", fcst_path.display());
            fcst
        } else {
            info!("Created new fcst table: {}", fcst_path.display());
            ForecastSeries::new(valid_times, max_lead_time)
        };

        Ok(FlsTables { obs, fcst })
    }

    /// Saves both tables, overwriting previous files.
    pub fn save(&self, fls_dir: &Path, exp: &str) -> Result<(), StoreError> {
        self.obs.save(&obs_table_path(fls_dir))?;
        self.fcst.save(&fcst_table_path(fls_dir, exp))?;

        Ok(())
    }
}
