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

//! Module containing constants used by the verification.

use crate::Float;

/// Vertices (lat, lon) of the polygon approximating the Swiss Plateau.
/// The polygon is closed back to the first vertex.
pub const SWISS_PLATEAU: [(Float, Float); 19] = [
    (46.12, 5.89),
    (46.06, 6.10),
    (46.33, 6.78),
    (46.55, 7.01),
    (46.64, 7.31),
    (46.65, 7.65),
    (46.62, 7.79),
    (46.81, 8.33),
    (47.09, 9.78),
    (47.82, 10.02),
    (47.81, 8.34),
    (47.38, 7.87),
    (47.29, 7.68),
    (47.25, 7.45),
    (47.13, 7.06),
    (47.07, 6.87),
    (46.73, 6.36),
    (46.59, 6.30),
    (46.18, 5.86),
];

/// Low stratus confidence level above which a gridpoint is classified as FLS.
pub const DEFAULT_LSCL_THRESHOLD: Float = 0.7;

/// Total column liquid water (kg m-2) above which a forecast gridpoint is
/// classified as FLS. Equals 0.1 g m-2.
pub const DEFAULT_TQC_THRESHOLD: Float = 0.0001;

/// Satellite scans are stamped this many minutes before the valid time.
pub const SAT_SCAN_OFFSET_MINUTES: i64 = 15;

/// Hours between forecast initialisations.
pub const DEFAULT_INIT_INTERVAL: u32 = 12;

/// Maximal lead time (in hours) of COSMO-1E forecasts.
pub const DEFAULT_MAX_LEAD_TIME: u32 = 33;

pub const OBS_LAT_VAR: &str = "lat_1";
pub const OBS_LON_VAR: &str = "lon_1";
pub const OBS_LSCL_VAR: &str = "LSCL";

/// Name of the field extracted from model output by `fxfilter`.
pub const FILTERED_FIELD: &str = "TQC";

/// Name of the observation table file in the fls directory.
pub const OBS_TABLE_FILE: &str = "obs.p";
