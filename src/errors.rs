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

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VerifError {
    #[error("Error while reading config.yaml: {0}")]
    Config(#[from] ConfigError),

    #[error("Error while creating ThreadPool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Cannot set memory limit of {0} MB")]
    MemoryLimit(usize),

    #[error("Error while preparing working directories: {0}")]
    WorkingDirs(#[from] std::io::Error),

    #[error("Error while reading input data: {0}")]
    Input(#[from] InputError),

    #[error("Error while building region mask: {0}")]
    Region(#[from] RegionError),

    #[error("Error while handling FLS tables: {0}")]
    Store(#[from] StoreError),

    #[error("Error while retrieving forecast files: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Computation cancelled before completion")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot open config.yaml: {0}")]
    CantOpenFile(#[from] std::io::Error),

    #[error("Cannot deserialize config.yaml: {0}")]
    CantDeserialize(#[from] serde_yaml::Error),

    #[error("Configuration component is out of bounds {0}")]
    OutOfBounds(&'static str),
}

/// Errors of malformed input files. Absent files are not errors.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("NetCDF error in {0}: {1}")]
    NetCdf(PathBuf, netcdf::Error),

    #[error("GRIB error in {0}: {1}")]
    Grib(PathBuf, eccodes::errors::CodesError),

    #[error("Variable {1} not found in {0}")]
    MissingVariable(PathBuf, &'static str),

    #[error("Incorrect type of key {1} in {0}")]
    IncorrectKeyType(PathBuf, &'static str),

    #[error("Grid of {0} has shape {1:?} but {2:?} was expected")]
    ShapeMismatch(PathBuf, Vec<usize>, Vec<usize>),
}

#[derive(Error, Debug)]
pub enum RegionError {
    #[error("Region polygon selects no grid points")]
    NoGridPoints,

    #[error("Latitudes of shape {0:?} do not match longitudes of shape {1:?}")]
    ShapeMismatch(Vec<usize>, Vec<usize>),

    #[error("Region polygon needs at least 3 vertices, got {0}")]
    DegeneratePolygon(usize),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Cannot access table file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot read or write table: {0}")]
    Csv(#[from] csv::Error),

    #[error("Table {0} is malformed: {1}")]
    MalformedTable(PathBuf, String),
}

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Cannot access model files: {0}")]
    Io(#[from] std::io::Error),

    #[error("Model file description ambiguous for {0} +{1}h")]
    AmbiguousModelFile(String, u32),

    #[error("fxfilter failed to extract {0}")]
    FilterFailed(PathBuf),

    #[error("No model source directory configured for the experiment")]
    NoModelSource,
}
