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

//! Module retrieving forecast files from raw model output.
//!
//! Raw COSMO-1E output is too large to be read for every valid time,
//! so the liquid water field is first extracted into small files with
//! an external filter program. Retrieval runs before fraction
//! computation and never overwrites existing files.

use super::configuration::Config;
use super::forecast::filtered_file_name;
use crate::constants::FILTERED_FIELD;
use crate::errors::RetrievalError;
use chrono::{Duration, NaiveDateTime};
use log::{debug, info, warn};
use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
};

/// Parameters of retrieval of one experiment.
#[derive(Clone, PartialEq, Debug)]
pub struct RetrievalSettings {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub interval: u32,
    pub max_lead_time: u32,
    pub model_source: PathBuf,

    /// Experiment-specific directory for filtered files.
    pub out_dir: PathBuf,
    pub filter_command: String,
}

impl RetrievalSettings {
    pub fn new(config: &Config) -> Result<Self, RetrievalError> {
        let model_source = config
            .experiment
            .model_source
            .clone()
            .ok_or(RetrievalError::NoModelSource)?;

        Ok(RetrievalSettings {
            start: config.period.start,
            end: config.period.end,
            interval: config.period.interval,
            max_lead_time: config.period.max_lead_time,
            model_source,
            out_dir: config.paths.model_dir().join(&config.experiment.name),
            filter_command: config.experiment.filter_command.clone(),
        })
    }

    /// Initialisation times every `interval` hours from `start` to `end`.
    pub fn init_times(&self) -> Vec<NaiveDateTime> {
        let mut init_times = vec![];
        let mut init_time = self.start;

        while init_time <= self.end {
            init_times.push(init_time);
            init_time += Duration::hours(i64::from(self.interval.max(1)));
        }

        init_times
    }
}

/// What happened to a single forecast file.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum RetrievalOutcome {
    Extracted,
    AlreadyExists,
    NoModelFile,
}

/// Extracts the liquid water field for every initialisation time
/// and lead time of the period. Returns the count of newly extracted files.
pub fn retrieve_forecast_files(settings: &RetrievalSettings) -> Result<usize, RetrievalError> {
    let init_times = settings.init_times();

    info!(
        "Retrieving COSMO files from {} from +0h to +{}h lead time",
        settings.model_source.display(),
        settings.max_lead_time
    );

    if let (Some(first), Some(last)) = (init_times.first(), init_times.last()) {
        info!(
            "   for {} to {} into {}",
            first.format("%b %d, %Y, %H UTC"),
            last.format("%b %d, %Y, %H UTC"),
            settings.out_dir.display()
        );
    }

    fs::create_dir_all(&settings.out_dir)?;

    let mut extracted = 0;

    for init_time in init_times {
        for lead_time in 0..=settings.max_lead_time {
            if retrieve_forecast_file(settings, init_time, lead_time)?
                == RetrievalOutcome::Extracted
            {
                extracted += 1;
            }
        }
    }

    info!("Extracted {} new forecast files", extracted);

    Ok(extracted)
}

fn retrieve_forecast_file(
    settings: &RetrievalSettings,
    init_time: NaiveDateTime,
    lead_time: u32,
) -> Result<RetrievalOutcome, RetrievalError> {
    match find_model_file(&settings.model_source, init_time, lead_time)? {
        Some(model_file) => {
            let out_file = settings
                .out_dir
                .join(filtered_file_name(init_time, lead_time));
            extract_field(&settings.filter_command, &model_file, &out_file)
        }
        None => {
            warn!(
                "No file found for {}: +{}h.",
                init_time.format("%y%m%d%H"),
                lead_time
            );
            Ok(RetrievalOutcome::NoModelFile)
        }
    }
}

/// Finds the raw model file matching
/// `FCST{YY}/{YYMMDDHH}_???/grib/c1effsurf{LLL}_000`.
///
/// More than one match means the run cannot be identified.
pub fn find_model_file(
    model_source: &Path,
    init_time: NaiveDateTime,
    lead_time: u32,
) -> Result<Option<PathBuf>, RetrievalError> {
    let year_dir = model_source.join(format!("FCST{}", init_time.format("%y")));

    if !year_dir.is_dir() {
        return Ok(None);
    }

    let run_prefix = format!("{}_", init_time.format("%y%m%d%H"));
    let file_name = format!("c1effsurf{:03}_000", lead_time);

    let mut found = vec![];

    for entry in fs::read_dir(&year_dir)? {
        let entry = entry?;
        let run_name = entry.file_name();
        let run_name = run_name.to_string_lossy();

        // the run directory suffix is exactly three characters long
        if run_name.starts_with(&run_prefix)
            && run_name.chars().count() == run_prefix.chars().count() + 3
        {
            let candidate = entry.path().join("grib").join(&file_name);
            if candidate.is_file() {
                found.push(candidate);
            }
        }
    }

    match found.len() {
        0 => Ok(None),
        1 => Ok(found.pop()),
        _ => Err(RetrievalError::AmbiguousModelFile(
            init_time.format("%y%m%d%H").to_string(),
            lead_time,
        )),
    }
}

/// Runs the filter program to extract the liquid water field
/// from `model_file` into `out_file`, unless `out_file` exists.
pub fn extract_field(
    filter_command: &str,
    model_file: &Path,
    out_file: &Path,
) -> Result<RetrievalOutcome, RetrievalError> {
    debug!("Apply {} to: {}", filter_command, model_file.display());
    info!("Creating: {}", out_file.display());

    if out_file.is_file() {
        info!("  ...exists already!");
        return Ok(RetrievalOutcome::AlreadyExists);
    }

    let status = Command::new(filter_command)
        .arg("-o")
        .arg(out_file)
        .arg("-s")
        .arg(FILTERED_FIELD)
        .arg(model_file)
        .status()?;

    if !status.success() {
        return Err(RetrievalError::FilterFailed(out_file.to_path_buf()));
    }

    Ok(RetrievalOutcome::Extracted)
}

#[cfg(test)]
mod tests {
    use super::{
        extract_field, find_model_file, retrieve_forecast_files, RetrievalOutcome,
        RetrievalSettings,
    };
    use crate::errors::RetrievalError;
    use chrono::{NaiveDate, NaiveDateTime};
    use std::{fs, path::Path};
    use tempfile::tempdir;

    fn init_time(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 11, day)
            .and_then(|d| d.and_hms_opt(hour, 0, 0))
            .unwrap()
    }

    fn add_model_file(model_source: &Path, run: &str, lead_time: u32) {
        let grib_dir = model_source.join("FCST21").join(run).join("grib");
        fs::create_dir_all(&grib_dir).unwrap();
        fs::write(grib_dir.join(format!("c1effsurf{:03}_000", lead_time)), b"GRIB").unwrap();
    }

    fn settings(root: &Path, filter_command: &str) -> RetrievalSettings {
        RetrievalSettings {
            start: init_time(1, 0),
            end: init_time(2, 0),
            interval: 12,
            max_lead_time: 1,
            model_source: root.join("store"),
            out_dir: root.join("tqc").join("ref"),
            filter_command: filter_command.to_string(),
        }
    }

    #[test]
    fn init_times_by_interval() {
        let dir = tempdir().unwrap();

        assert_eq!(
            settings(dir.path(), "true").init_times(),
            vec![init_time(1, 0), init_time(1, 12), init_time(2, 0)]
        );
    }

    #[test]
    fn finds_single_run() {
        let dir = tempdir().unwrap();
        add_model_file(dir.path(), "21110100_101", 3);
        add_model_file(dir.path(), "21110112_101", 3);
        add_model_file(dir.path(), "21110100_1010", 3);

        let found = find_model_file(dir.path(), init_time(1, 0), 3).unwrap();

        assert_eq!(
            found,
            Some(dir.path().join("FCST21/21110100_101/grib/c1effsurf003_000"))
        );
        assert_eq!(find_model_file(dir.path(), init_time(1, 0), 4).unwrap(), None);
        assert_eq!(find_model_file(dir.path(), init_time(3, 0), 3).unwrap(), None);
    }

    #[test]
    fn ambiguous_runs() {
        let dir = tempdir().unwrap();
        add_model_file(dir.path(), "21110100_101", 0);
        add_model_file(dir.path(), "21110100_102", 0);

        let result = find_model_file(dir.path(), init_time(1, 0), 0);

        assert!(matches!(
            result,
            Err(RetrievalError::AmbiguousModelFile(_, 0))
        ));
    }

    #[test]
    fn existing_file_is_not_extracted() {
        let dir = tempdir().unwrap();
        let out_file = dir.path().join("tqc_21110100_000.grb2");
        fs::write(&out_file, b"GRIB").unwrap();

        // a failing filter would return an error if it was called
        let outcome = extract_field("false", Path::new("model"), &out_file).unwrap();

        assert_eq!(outcome, RetrievalOutcome::AlreadyExists);
    }

    #[test]
    fn failing_filter() {
        let dir = tempdir().unwrap();
        let out_file = dir.path().join("tqc_21110100_000.grb2");

        let result = extract_field("false", Path::new("model"), &out_file);

        assert!(matches!(result, Err(RetrievalError::FilterFailed(_))));
    }

    #[test]
    fn retrieves_available_files() {
        let dir = tempdir().unwrap();
        let settings = settings(dir.path(), "true");
        add_model_file(&settings.model_source, "21110100_101", 0);
        add_model_file(&settings.model_source, "21110100_101", 1);
        add_model_file(&settings.model_source, "21110112_101", 1);

        let existing = settings.out_dir.join("tqc_21110100_001.grb2");
        fs::create_dir_all(&settings.out_dir).unwrap();
        fs::write(&existing, b"GRIB").unwrap();

        let extracted = retrieve_forecast_files(&settings).unwrap();

        assert_eq!(extracted, 2);
    }
}
