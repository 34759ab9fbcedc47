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

//! Module responsible for reading gridded fields from
//! satellite (NetCDF) and model (GRIB) files.
//!
//! Files that do not exist are not errors, they are reported
//! as [`Extraction::Missing`] so that the caller can decide
//! how to handle the gap. Any other failure is fatal.

use crate::constants::{OBS_LAT_VAR, OBS_LON_VAR, OBS_LSCL_VAR};
use crate::{errors::InputError, Float};
use eccodes::{
    CodesHandle, FallibleIterator,
    KeyType::{Float as KeyFloat, FloatArray, Int},
    KeyedMessage,
    ProductKind::GRIB,
};
use ndarray::{ArrayD, Axis, IxDyn};
use std::{path::Path, sync::Mutex};

/// ecCodes keeps global state which is not thread-safe in default
/// builds, so only one GRIB file is decoded at a time.
static GRIB_LOCK: Mutex<()> = Mutex::new(());

/// Outcome of reading a file which is allowed to be absent.
#[derive(Clone, PartialEq, Debug)]
pub enum Extraction<T> {
    Found(T),
    Missing,
}

/// Coordinates and low stratus confidence level read
/// from one satellite file.
#[derive(Clone, PartialEq, Debug)]
pub struct ObservationGrid {
    pub lats: ArrayD<Float>,
    pub lons: ArrayD<Float>,
    pub lscl: ArrayD<Float>,
}

/// Source of observation and forecast grids.
///
/// All returned arrays have their length-1 dimensions
/// removed and use NaN for missing values.
pub trait GridReader: Sync {
    fn read_observation(&self, path: &Path) -> Result<Extraction<ObservationGrid>, InputError>;

    fn read_forecast(&self, path: &Path) -> Result<Extraction<ArrayD<Float>>, InputError>;
}

/// Reader of actual files on disk.
#[derive(Copy, Clone, Debug, Default)]
pub struct FileReader;

impl GridReader for FileReader {
    fn read_observation(&self, path: &Path) -> Result<Extraction<ObservationGrid>, InputError> {
        if !path.is_file() {
            return Ok(Extraction::Missing);
        }

        let file = netcdf::open(path).map_err(|e| InputError::NetCdf(path.to_path_buf(), e))?;

        let lats = read_nc_variable(&file, path, OBS_LAT_VAR)?;
        let lons = read_nc_variable(&file, path, OBS_LON_VAR)?;
        let lscl = read_nc_variable(&file, path, OBS_LSCL_VAR)?;

        if lscl.shape() != lats.shape() || lons.shape() != lats.shape() {
            return Err(InputError::ShapeMismatch(
                path.to_path_buf(),
                lscl.shape().to_vec(),
                lats.shape().to_vec(),
            ));
        }

        Ok(Extraction::Found(ObservationGrid { lats, lons, lscl }))
    }

    fn read_forecast(&self, path: &Path) -> Result<Extraction<ArrayD<Float>>, InputError> {
        if !path.is_file() {
            return Ok(Extraction::Missing);
        }

        let grib_err = |e| InputError::Grib(path.to_path_buf(), e);

        // the lock guards no data, so poisoning is ignored
        let _guard = GRIB_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut handle = CodesHandle::new_from_file(path, GRIB).map_err(grib_err)?;

        // filtered files contain exactly one field
        let message = handle
            .next()
            .map_err(grib_err)?
            .ok_or_else(|| InputError::MissingVariable(path.to_path_buf(), "values"))?;

        let field = read_grib_field(&message, path)?;

        Ok(Extraction::Found(squeeze(field)))
    }
}

/// Reads a NetCDF variable as floats, decoding fill values
/// and packing attributes the same way CF-aware readers do.
fn read_nc_variable(
    file: &netcdf::File,
    path: &Path,
    name: &'static str,
) -> Result<ArrayD<Float>, InputError> {
    let var = file
        .variable(name)
        .ok_or_else(|| InputError::MissingVariable(path.to_path_buf(), name))?;

    let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();

    let raw: Vec<Float> = var
        .get_values(..)
        .map_err(|e| InputError::NetCdf(path.to_path_buf(), e))?;

    let fill_value = get_float_attr(&var, "_FillValue").or_else(|| get_float_attr(&var, "missing_value"));
    let scale = get_float_attr(&var, "scale_factor").unwrap_or(1.0);
    let offset = get_float_attr(&var, "add_offset").unwrap_or(0.0);

    let values: Vec<Float> = raw
        .into_iter()
        .map(|v| {
            if Some(v) == fill_value {
                Float::NAN
            } else {
                v * scale + offset
            }
        })
        .collect();

    let values_len = values.len();
    let field = ArrayD::from_shape_vec(IxDyn(&shape), values).map_err(|_| {
        InputError::ShapeMismatch(path.to_path_buf(), vec![values_len], shape.clone())
    })?;

    Ok(squeeze(field))
}

/// Checking for the attribute first avoids HDF5 error output
/// when an optional attribute is absent.
fn get_float_attr(var: &netcdf::Variable, name: &str) -> Option<Float> {
    if !var.attributes().any(|attr| attr.name() == name) {
        return None;
    }

    match var.attribute_value(name)?.ok()? {
        netcdf::AttributeValue::Double(v) => Some(v),
        netcdf::AttributeValue::Float(v) => Some(Float::from(v)),
        netcdf::AttributeValue::Int(v) => Some(Float::from(v)),
        netcdf::AttributeValue::Short(v) => Some(Float::from(v)),
        netcdf::AttributeValue::Schar(v) => Some(Float::from(v)),
        netcdf::AttributeValue::Uchar(v) => Some(Float::from(v)),
        netcdf::AttributeValue::Ushort(v) => Some(Float::from(v)),
        netcdf::AttributeValue::Uint(v) => Some(Float::from(v)),
        _ => None,
    }
}

/// Reads the data values of GRIB message as a 2D field.
fn read_grib_field(message: &KeyedMessage, path: &Path) -> Result<ArrayD<Float>, InputError> {
    let grib_err = |e| InputError::Grib(path.to_path_buf(), e);

    let ni = read_grib_int(message, path, "Ni")?;
    let nj = read_grib_int(message, path, "Nj")?;

    let values = if let FloatArray(v) = message.read_key("values").map_err(grib_err)?.value {
        v
    } else {
        return Err(InputError::IncorrectKeyType(path.to_path_buf(), "values"));
    };

    let bitmap_present = read_grib_int(message, path, "bitmapPresent").unwrap_or(0) == 1;

    let missing_value = match message.read_key("missingValue").map_err(grib_err)?.value {
        KeyFloat(v) => Some(v),
        Int(v) => Some(v as Float),
        _ => None,
    };

    decode_grib_values(values, ni, nj, bitmap_present, missing_value, path)
}

/// Arranges GRIB data values into a field of shape `(Nj, Ni)`.
///
/// Values are stored row-by-row with `Ni` points along each row,
/// which is the same layout as in the satellite files, so no
/// transposition is needed. With a bitmap present, values equal
/// to `missing_value` are replaced with NaN.
fn decode_grib_values(
    values: Vec<Float>,
    ni: usize,
    nj: usize,
    bitmap_present: bool,
    missing_value: Option<Float>,
    path: &Path,
) -> Result<ArrayD<Float>, InputError> {
    let values: Vec<Float> = values
        .into_iter()
        .map(|v| {
            if bitmap_present && Some(v) == missing_value {
                Float::NAN
            } else {
                v
            }
        })
        .collect();

    let values_len = values.len();
    ArrayD::from_shape_vec(IxDyn(&[nj, ni]), values)
        .map_err(|_| InputError::ShapeMismatch(path.to_path_buf(), vec![values_len], vec![nj, ni]))
}

fn read_grib_int(
    message: &KeyedMessage,
    path: &Path,
    key: &'static str,
) -> Result<usize, InputError> {
    let value = message
        .read_key(key)
        .map_err(|e| InputError::Grib(path.to_path_buf(), e))?
        .value;

    match value {
        Int(v) if v >= 0 => Ok(v as usize),
        _ => Err(InputError::IncorrectKeyType(path.to_path_buf(), key)),
    }
}

/// Removes all dimensions of length 1.
pub fn squeeze(mut field: ArrayD<Float>) -> ArrayD<Float> {
    while let Some(axis) = field.shape().iter().position(|&len| len == 1) {
        field = field.index_axis_move(Axis(axis), 0);
    }

    field
}

#[cfg(test)]
mod tests {
    use super::{decode_grib_values, squeeze, Extraction, FileReader, GridReader};
    use crate::errors::InputError;
    use ndarray::{arr2, ArrayD, IxDyn};
    use rayon::prelude::*;
    use std::path::Path;
    use tempfile::tempdir;

    fn write_observation(path: &Path, with_lscl: bool) {
        let mut file = netcdf::create(path).unwrap();

        file.add_dimension("time", 1).unwrap();
        file.add_dimension("y", 2).unwrap();
        file.add_dimension("x", 3).unwrap();

        let mut lat = file.add_variable::<f64>("lat_1", &["y", "x"]).unwrap();
        lat.put_values(&[46.0, 46.0, 46.0, 47.0, 47.0, 47.0], ..)
            .unwrap();

        let mut lon = file.add_variable::<f64>("lon_1", &["y", "x"]).unwrap();
        lon.put_values(&[7.0, 7.5, 8.0, 7.0, 7.5, 8.0], ..).unwrap();

        if with_lscl {
            let mut lscl = file
                .add_variable::<f32>("LSCL", &["time", "y", "x"])
                .unwrap();
            lscl.put_attribute("missing_value", -1.0f32).unwrap();
            lscl.put_values(&[0.9f32, 0.1, -1.0, 0.5, f32::NAN, 0.75], ..)
                .unwrap();
        }
    }

    /// LSCL packed as 16-bit integers in hundredths with an offset.
    fn write_packed_observation(path: &Path) {
        let mut file = netcdf::create(path).unwrap();

        file.add_dimension("y", 2).unwrap();
        file.add_dimension("x", 2).unwrap();

        let mut lat = file.add_variable::<f64>("lat_1", &["y", "x"]).unwrap();
        lat.put_values(&[46.0, 46.0, 47.0, 47.0], ..).unwrap();

        let mut lon = file.add_variable::<f64>("lon_1", &["y", "x"]).unwrap();
        lon.put_values(&[7.0, 8.0, 7.0, 8.0], ..).unwrap();

        let mut lscl = file.add_variable::<i16>("LSCL", &["y", "x"]).unwrap();
        lscl.put_attribute("_FillValue", -999i16).unwrap();
        lscl.put_attribute("scale_factor", 0.01f32).unwrap();
        lscl.put_attribute("add_offset", 0.5f64).unwrap();
        lscl.put_values(&[40i16, -50, -999, 0], ..).unwrap();
    }

    #[test]
    fn unpack_scaled_observation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("packed.nc");
        write_packed_observation(&path);

        let grid = match FileReader.read_observation(&path).unwrap() {
            Extraction::Found(grid) => grid,
            Extraction::Missing => panic!("written file reported as missing"),
        };

        assert_eq!(grid.lscl.shape(), &[2, 2]);
        assert!((grid.lscl[[0, 0]] - 0.9).abs() < 1e-6);
        assert!(grid.lscl[[0, 1]].abs() < 1e-6);
        assert!(grid.lscl[[1, 0]].is_nan());
        assert!((grid.lscl[[1, 1]] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn grib_values_row_major() {
        let field = decode_grib_values(
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            3,
            2,
            false,
            Some(9999.0),
            Path::new("f.grb2"),
        )
        .unwrap();

        assert_eq!(field, arr2(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]).into_dyn());
    }

    #[test]
    fn grib_missing_values_with_bitmap() {
        let values = vec![0.5, 9999.0, 0.0, 9999.0];

        let masked =
            decode_grib_values(values.clone(), 2, 2, true, Some(9999.0), Path::new("f.grb2"))
                .unwrap();
        assert!(masked[[0, 1]].is_nan());
        assert!(masked[[1, 1]].is_nan());
        assert_eq!(masked[[0, 0]], 0.5);
        assert_eq!(masked[[1, 0]], 0.0);

        // without bitmap the missing value is a regular value
        let unmasked =
            decode_grib_values(values, 2, 2, false, Some(9999.0), Path::new("f.grb2")).unwrap();
        assert_eq!(unmasked[[0, 1]], 9999.0);
    }

    #[test]
    fn grib_values_wrong_count() {
        let result = decode_grib_values(
            vec![1.0, 2.0, 3.0],
            2,
            2,
            false,
            None,
            Path::new("f.grb2"),
        );

        assert!(matches!(result, Err(InputError::ShapeMismatch(_, _, _))));
    }

    #[test]
    fn concurrent_forecast_reads() {
        let dir = tempdir().unwrap();
        let paths: Vec<_> = (0..8)
            .map(|i| {
                let path = dir.path().join(format!("tqc_2111010{}_000.grb2", i));
                std::fs::write(&path, b"not a grib file").unwrap();
                path
            })
            .collect();

        let results: Vec<_> = paths
            .par_iter()
            .map(|path| FileReader.read_forecast(path))
            .collect();

        assert!(results.iter().all(|r| r.is_err()));
        // failed reads must not keep other readers waiting
        assert!(FileReader.read_forecast(&paths[0]).is_err());
    }

    #[test]
    fn squeeze_dims() {
        let field = ArrayD::<f64>::zeros(IxDyn(&[1, 4, 1, 3]));

        assert_eq!(squeeze(field).shape(), &[4, 3]);
        assert_eq!(squeeze(ArrayD::<f64>::zeros(IxDyn(&[1, 1]))).ndim(), 0);
    }

    #[test]
    fn read_observation_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("obs.nc");
        write_observation(&path, true);

        let grid = match FileReader.read_observation(&path).unwrap() {
            Extraction::Found(grid) => grid,
            Extraction::Missing => panic!("written file reported as missing"),
        };

        assert_eq!(grid.lats.shape(), &[2, 3]);
        assert_eq!(grid.lscl.shape(), &[2, 3]);
        assert!((grid.lscl[[0, 0]] - 0.9).abs() < 1e-6);
        assert!(grid.lscl[[0, 2]].is_nan());
        assert!(grid.lscl[[1, 1]].is_nan());
        assert_eq!(grid.lons[[1, 2]], 8.0);
    }

    #[test]
    fn missing_observation_variable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("obs.nc");
        write_observation(&path, false);

        let result = FileReader.read_observation(&path);

        assert!(matches!(result, Err(InputError::MissingVariable(_, "LSCL"))));
    }

    #[test]
    fn absent_files() {
        let dir = tempdir().unwrap();

        let obs = FileReader.read_observation(&dir.path().join("none.nc"));
        let fcst = FileReader.read_forecast(&dir.path().join("none.grb2"));

        assert!(matches!(obs, Ok(Extraction::Missing)));
        assert!(matches!(fcst, Ok(Extraction::Missing)));
    }

    #[test]
    fn malformed_forecast_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tqc_21110100_000.grb2");
        std::fs::write(&path, b"not a grib file").unwrap();

        assert!(FileReader.read_forecast(&path).is_err());
    }
}
