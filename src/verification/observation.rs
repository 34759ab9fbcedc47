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

//! Module extracting observed FLS and high cloud fractions
//! from satellite low stratus confidence level (LSCL) files.

use super::input::{Extraction, GridReader, ObservationGrid};
use super::region::GeoMask;
use crate::constants::SAT_SCAN_OFFSET_MINUTES;
use crate::{errors::InputError, Float};
use chrono::{Duration, NaiveDateTime};
use log::{debug, warn};
use ndarray::ArrayD;
use std::path::{Path, PathBuf};

/// Fractions observed at one valid time together with the
/// indicator of gridpoints obscured by high clouds.
#[derive(Clone, PartialEq, Debug)]
pub struct ObservedFractions {
    pub fls_fraction: Float,
    pub high_cloud_fraction: Float,

    /// `true` where LSCL is missing, on the whole (unmasked) grid.
    pub high_cloud: ArrayD<bool>,
}

/// Path of the satellite file for the given valid time.
///
/// Satellite scans are stamped 15 minutes before the
/// full hour they are verified against.
pub fn observation_file_path(obs_dir: &Path, valid_time: NaiveDateTime) -> PathBuf {
    let scan_time = valid_time - Duration::minutes(SAT_SCAN_OFFSET_MINUTES);

    obs_dir.join(format!(
        "MSG_lscl-cosmo1eqc3km_{}_c1e.nc",
        scan_time.format("%y%m%d%H%M")
    ))
}

/// Loads the satellite grid valid at `valid_time`.
///
/// An absent file is reported with a warning and returned as
/// [`Extraction::Missing`].
pub fn load_observation<R: GridReader>(
    reader: &R,
    obs_dir: &Path,
    valid_time: NaiveDateTime,
) -> Result<Extraction<ObservationGrid>, InputError> {
    let obs_file = observation_file_path(obs_dir, valid_time);
    debug!("SAT file: {}", obs_file.display());

    let grid = reader.read_observation(&obs_file)?;

    if matches!(grid, Extraction::Missing) {
        warn!(
            "No sat file for {}.",
            (valid_time - Duration::minutes(SAT_SCAN_OFFSET_MINUTES)).format("%y%m%d%H%M")
        );
        debug!(" -> {}", obs_file.display());
    }

    Ok(grid)
}

/// Computes the fraction of region gridpoints classified as FLS
/// (LSCL above `threshold`) and obscured by high clouds (LSCL missing).
pub fn compute_observed_fractions(
    grid: &ObservationGrid,
    mask: &GeoMask,
    threshold: Float,
    obs_file: &Path,
) -> Result<ObservedFractions, InputError> {
    if grid.lscl.shape() != mask.shape() {
        return Err(InputError::ShapeMismatch(
            obs_file.to_path_buf(),
            grid.lscl.shape().to_vec(),
            mask.shape().to_vec(),
        ));
    }

    let high_cloud_fraction = mask.fraction_where(grid.lscl.view(), |v| v.is_nan());
    let fls_fraction = mask.fraction_where(grid.lscl.view(), |v| v > threshold);
    let high_cloud = grid.lscl.mapv(|v| v.is_nan());

    Ok(ObservedFractions {
        fls_fraction,
        high_cloud_fraction,
        high_cloud,
    })
}

#[cfg(test)]
mod tests {
    use super::{compute_observed_fractions, observation_file_path};
    use crate::errors::InputError;
    use crate::verification::{
        input::ObservationGrid,
        region::{GeoMask, Polygon},
    };
    use chrono::NaiveDate;
    use float_cmp::approx_eq;
    use ndarray::arr2;
    use std::path::{Path, PathBuf};

    fn grid(lscl: [[f64; 3]; 2]) -> ObservationGrid {
        ObservationGrid {
            lats: arr2(&[[0.5, 0.5, 0.5], [1.5, 1.5, 1.5]]).into_dyn(),
            lons: arr2(&[[0.5, 1.5, 5.0], [0.5, 1.5, 5.0]]).into_dyn(),
            lscl: arr2(&lscl).into_dyn(),
        }
    }

    fn mask(grid: &ObservationGrid) -> GeoMask {
        let polygon = Polygon::new(&[(0.0, 0.0), (0.0, 2.0), (2.0, 2.0), (2.0, 0.0)]).unwrap();
        GeoMask::new(grid.lats.view(), grid.lons.view(), &polygon).unwrap()
    }

    #[test]
    fn file_path() {
        let valid_time = NaiveDate::from_ymd_opt(2021, 11, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();

        assert_eq!(
            observation_file_path(Path::new("/data/sat"), valid_time),
            PathBuf::from("/data/sat/MSG_lscl-cosmo1eqc3km_2110312345_c1e.nc")
        );
    }

    #[test]
    fn fractions() {
        // outside gridpoints (third column) must not count
        let grid = grid([[0.9, f64::NAN, 0.9], [0.7, 0.1, f64::NAN]]);
        let mask = mask(&grid);

        let obs = compute_observed_fractions(&grid, &mask, 0.7, Path::new("obs.nc")).unwrap();

        assert!(approx_eq!(f64, obs.fls_fraction, 0.25));
        assert!(approx_eq!(f64, obs.high_cloud_fraction, 0.25));
        assert_eq!(
            obs.high_cloud,
            arr2(&[[false, true, false], [false, false, true]]).into_dyn()
        );
    }

    #[test]
    fn grid_changed_during_run() {
        let grid_a = grid([[0.0; 3]; 2]);
        let mask = mask(&grid_a);
        let grid_b = ObservationGrid {
            lats: arr2(&[[0.5, 0.5]]).into_dyn(),
            lons: arr2(&[[0.5, 1.5]]).into_dyn(),
            lscl: arr2(&[[0.9, 0.9]]).into_dyn(),
        };

        let result = compute_observed_fractions(&grid_b, &mask, 0.7, Path::new("obs.nc"));

        assert!(matches!(result, Err(InputError::ShapeMismatch(_, _, _))));
    }
}
