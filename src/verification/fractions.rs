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

//! Module driving the computation of FLS fractions over
//! the verification period.
//!
//! Valid times are processed sequentially until the first satellite
//! file is found, from which the region mask is built. Remaining
//! valid times depend only on that mask, so they are computed in
//! parallel on the thread pool, each task producing one table row.
//! Rows are written to the tables afterwards, in order.

use super::configuration::{Config, Thresholds};
use super::forecast;
use super::input::{Extraction, GridReader, ObservationGrid};
use super::observation::{self, compute_observed_fractions, observation_file_path};
use super::region::{GeoMask, Polygon};
use super::series::{FlsTables, ObservationRecord};
use crate::errors::{RegionError, VerifError};
use crate::Float;
use chrono::{Duration, NaiveDateTime};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use rayon::{prelude::*, ThreadPool};
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Everything needed to compute fractions of one experiment.
#[derive(Clone, PartialEq, Debug)]
pub struct FractionSettings {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub max_lead_time: u32,
    pub obs_dir: PathBuf,
    pub model_dir: PathBuf,
    pub fls_dir: PathBuf,
    pub experiment: String,
    pub extend_previous: bool,
    pub thresholds: Thresholds,
    pub region: Polygon,
}

impl FractionSettings {
    pub fn new(config: &Config) -> Result<Self, RegionError> {
        Ok(FractionSettings {
            start: config.period.start,
            end: config.period.end,
            max_lead_time: config.period.max_lead_time,
            obs_dir: config.paths.obs_dir(),
            model_dir: config.paths.model_dir(),
            fls_dir: config.paths.fls_dir(),
            experiment: config.experiment.name.clone(),
            extend_previous: config.tasks.extend_previous,
            thresholds: config.thresholds,
            region: Polygon::new(&config.region.vertices)?,
        })
    }

    /// Every hour from `start` to `end + max_lead_time`, as forecasts
    /// initialised at `end` are still valid `max_lead_time` hours later.
    pub fn valid_times(&self) -> Vec<NaiveDateTime> {
        let last = self.end + Duration::hours(i64::from(self.max_lead_time));

        let mut valid_times = vec![];
        let mut valid_time = self.start;

        while valid_time <= last {
            valid_times.push(valid_time);
            valid_time += Duration::hours(1);
        }

        valid_times
    }
}

/// Flag for stopping the computation between valid times.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Values computed for one valid time with an existing observation.
#[derive(Clone, PartialEq, Debug)]
struct ComputedRow {
    valid_time: NaiveDateTime,
    obs: ObservationRecord,

    /// Indexed by lead time, `None` where no forecast exists.
    fcst: Vec<Option<Float>>,
}

impl FlsTables {
    /// Valid times without observation are left untouched.
    fn write_row(&mut self, row: ComputedRow) {
        self.obs.set(row.valid_time, row.obs);

        for (lead_time, value) in row.fcst.into_iter().enumerate() {
            if let Some(value) = value {
                self.fcst.set(row.valid_time, lead_time as u32, value);
            }
        }
    }
}

/// Computes observed and forecasted FLS fractions for all valid
/// times of the period and saves the tables.
///
/// Tables are saved only when the whole period has been processed.
/// After an error or cancellation previously saved tables stay intact.
///
/// `cancel` is only read. A failure inside the run stops the remaining
/// valid times with a flag of its own, so the token can be reused.
pub fn calc_fls_fractions<R: GridReader>(
    settings: &FractionSettings,
    reader: &R,
    threadpool: &ThreadPool,
    cancel: &CancelToken,
) -> Result<FlsTables, VerifError> {
    let valid_times = settings.valid_times();

    // valid_times is never empty as start <= end
    info!(
        "Calculating FLS fractions for {} to {}",
        valid_times[0].format("%b %d, %Y, %H UTC"),
        valid_times[valid_times.len() - 1].format("%b %d, %Y, %H UTC")
    );

    let mut tables = FlsTables::load_or_create(
        &settings.fls_dir,
        &settings.experiment,
        &valid_times,
        settings.max_lead_time,
        settings.extend_previous,
    )?;

    let progress_bar = ProgressBar::new(valid_times.len() as u64);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("{prefix} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}")
            .progress_chars("#>-"),
    );
    progress_bar.set_prefix("Processed valid times");

    let (mask, next_index) = abandon_on_error(
        &progress_bar,
        find_region_mask(
            settings,
            reader,
            &valid_times,
            &mut tables,
            &progress_bar,
            cancel,
        ),
    )?;

    if let Some(mask) = mask {
        let rows = abandon_on_error(
            &progress_bar,
            compute_rows(
                settings,
                reader,
                &mask,
                &valid_times[next_index..],
                threadpool,
                &progress_bar,
                cancel,
            ),
        )?;

        for row in rows {
            tables.write_row(row);
        }
    } else {
        info!("No satellite files found in the period, tables are not updated with new values");
    }

    progress_bar.finish_with_message("All valid times processed");

    tables.save(&settings.fls_dir, &settings.experiment)?;

    info!(
        "Tables contain {} observed valid times and {} forecasted values",
        tables.obs.observed_count(),
        tables.fcst.forecast_count()
    );

    Ok(tables)
}

/// Leaves the progress bar where it stopped when the run fails.
fn abandon_on_error<T>(
    progress_bar: &ProgressBar,
    result: Result<T, VerifError>,
) -> Result<T, VerifError> {
    if result.is_err() {
        progress_bar.abandon();
    }

    result
}

/// Processes valid times in order until the first satellite file
/// is found and builds the region mask from it.
///
/// Returns the mask, if any file was found, and the index
/// of the first valid time not processed yet.
fn find_region_mask<R: GridReader>(
    settings: &FractionSettings,
    reader: &R,
    valid_times: &[NaiveDateTime],
    tables: &mut FlsTables,
    progress_bar: &ProgressBar,
    cancel: &CancelToken,
) -> Result<(Option<GeoMask>, usize), VerifError> {
    for (index, &valid_time) in valid_times.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(VerifError::Cancelled);
        }

        if let Extraction::Found(grid) =
            observation::load_observation(reader, &settings.obs_dir, valid_time)?
        {
            let mask = GeoMask::new(grid.lats.view(), grid.lons.view(), &settings.region)?;
            debug!("{} grid points in region.", mask.region_size());

            let row = compute_row(settings, reader, &mask, &grid, valid_time)?;
            tables.write_row(row);

            progress_bar.inc(1);
            return Ok((Some(mask), index + 1));
        }

        progress_bar.inc(1);
    }

    Ok((None, valid_times.len()))
}

/// Computes rows of `valid_times` in parallel on the thread pool.
///
/// The first failing valid time stops the ones not started yet
/// and its error is returned.
fn compute_rows<R: GridReader>(
    settings: &FractionSettings,
    reader: &R,
    mask: &GeoMask,
    valid_times: &[NaiveDateTime],
    threadpool: &ThreadPool,
    progress_bar: &ProgressBar,
    cancel: &CancelToken,
) -> Result<Vec<ComputedRow>, VerifError> {
    let failed = CancelToken::default();

    let results: Vec<Result<Option<ComputedRow>, VerifError>> = threadpool.install(|| {
        valid_times
            .par_iter()
            .map(|&valid_time| {
                if cancel.is_cancelled() || failed.is_cancelled() {
                    return Err(VerifError::Cancelled);
                }

                let result = process_valid_time(settings, reader, mask, valid_time);

                if result.is_err() {
                    failed.cancel();
                }

                progress_bar.inc(1);
                result
            })
            .collect()
    });

    let mut rows = Vec::with_capacity(results.len());
    let mut failure = None;

    for result in results {
        match result {
            Ok(row) => rows.extend(row),
            // keep the error that caused cancellation rather than its consequence
            Err(VerifError::Cancelled) => {
                failure.get_or_insert(VerifError::Cancelled);
            }
            Err(err) => {
                if matches!(failure, None | Some(VerifError::Cancelled)) {
                    failure = Some(err);
                }
            }
        }
    }

    match failure {
        Some(err) => Err(err),
        None => Ok(rows),
    }
}

/// Computes the row of one valid time with the already known mask.
fn process_valid_time<R: GridReader>(
    settings: &FractionSettings,
    reader: &R,
    mask: &GeoMask,
    valid_time: NaiveDateTime,
) -> Result<Option<ComputedRow>, VerifError> {
    match observation::load_observation(reader, &settings.obs_dir, valid_time)? {
        Extraction::Found(grid) => Ok(Some(compute_row(
            settings, reader, mask, &grid, valid_time,
        )?)),
        Extraction::Missing => Ok(None),
    }
}

fn compute_row<R: GridReader>(
    settings: &FractionSettings,
    reader: &R,
    mask: &GeoMask,
    grid: &ObservationGrid,
    valid_time: NaiveDateTime,
) -> Result<ComputedRow, VerifError> {
    let obs_file = observation_file_path(&settings.obs_dir, valid_time);
    let observed = compute_observed_fractions(grid, mask, settings.thresholds.lscl, &obs_file)?;

    let fcst = forecast::extract_forecasts(
        reader,
        &settings.model_dir,
        &settings.experiment,
        valid_time,
        settings.max_lead_time,
        observed.high_cloud.view(),
        mask,
        settings.thresholds.tqc,
    )?;

    Ok(ComputedRow {
        valid_time,
        obs: ObservationRecord {
            fls_fraction: Some(observed.fls_fraction),
            high_cloud_fraction: Some(observed.high_cloud_fraction),
        },
        fcst,
    })
}
