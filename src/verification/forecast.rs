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

//! Module extracting forecasted FLS fractions from filtered
//! model files containing total column liquid water (TQC).
//!
//! A forecast gridpoint is FLS when its liquid water exceeds
//! the threshold. Gridpoints obscured by high clouds in the
//! observation valid at the same time are excluded, as the
//! forecast cannot be verified there.

use super::input::{Extraction, GridReader};
use super::region::GeoMask;
use crate::{errors::InputError, Float};
use chrono::{Duration, NaiveDateTime};
use ndarray::{ArrayD, ArrayViewD, Zip};
use std::path::{Path, PathBuf};

/// Name of the filtered file of forecast initialised
/// at `init_time` for `lead_time` hours ahead.
pub fn filtered_file_name(init_time: NaiveDateTime, lead_time: u32) -> String {
    format!("tqc_{}_{:03}.grb2", init_time.format("%y%m%d%H"), lead_time)
}

/// Path of the forecast of experiment `exp` valid at `valid_time`
/// with the given lead time.
pub fn forecast_file_path(
    model_dir: &Path,
    exp: &str,
    valid_time: NaiveDateTime,
    lead_time: u32,
) -> PathBuf {
    let init_time = valid_time - Duration::hours(i64::from(lead_time));

    model_dir
        .join(exp)
        .join(filtered_file_name(init_time, lead_time))
}

/// Computes the forecasted FLS fraction on a loaded TQC field.
///
/// `high_cloud` is the missing data indicator of the observation
/// valid at the same time, on the whole grid.
pub fn compute_forecast_fraction(
    mut tqc: ArrayD<Float>,
    high_cloud: ArrayViewD<bool>,
    mask: &GeoMask,
    threshold: Float,
    fcst_file: &Path,
) -> Result<Float, InputError> {
    if tqc.shape() != mask.shape() || high_cloud.shape() != mask.shape() {
        return Err(InputError::ShapeMismatch(
            fcst_file.to_path_buf(),
            tqc.shape().to_vec(),
            mask.shape().to_vec(),
        ));
    }

    Zip::from(&mut tqc)
        .and(&high_cloud)
        .for_each(|value, &obscured| {
            if obscured {
                *value = Float::NAN;
            }
        });

    Ok(mask.fraction_where(tqc.view(), |v| v > threshold))
}

/// Computes forecasted FLS fractions valid at `valid_time` for
/// every lead time from `0` to `max_lead_time`.
///
/// Returned vector is indexed by lead time, with `None` where the
/// forecast file does not exist. Absent forecasts are the usual
/// case and are not logged.
#[allow(clippy::too_many_arguments)]
pub fn extract_forecasts<R: GridReader>(
    reader: &R,
    model_dir: &Path,
    exp: &str,
    valid_time: NaiveDateTime,
    max_lead_time: u32,
    high_cloud: ArrayViewD<bool>,
    mask: &GeoMask,
    threshold: Float,
) -> Result<Vec<Option<Float>>, InputError> {
    let mut fractions = Vec::with_capacity(max_lead_time as usize + 1);

    for lead_time in 0..=max_lead_time {
        let fcst_file = forecast_file_path(model_dir, exp, valid_time, lead_time);

        let fraction = match reader.read_forecast(&fcst_file)? {
            Extraction::Found(tqc) => Some(compute_forecast_fraction(
                tqc,
                high_cloud.view(),
                mask,
                threshold,
                &fcst_file,
            )?),
            Extraction::Missing => None,
        };

        fractions.push(fraction);
    }

    Ok(fractions)
}
