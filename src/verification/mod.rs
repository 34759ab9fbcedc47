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

//! Module containing the actual verification code.
//!
//! The verification consists of two tasks, both selected
//! in the configuration file:
//!
//! 1. Retrieval of forecast files, which extracts the total column
//!    liquid water field from raw model output with external filter.
//! 2. Computation of FLS fractions, which for every hour compares
//!    the satellite observation over the region with all forecasts
//!    valid at that hour and stores the results in two tables.

mod configuration;
mod forecast;
mod fractions;
mod input;
mod observation;
mod region;
mod retrieval;
mod series;

use self::{
    configuration::{Config, Paths},
    fractions::{CancelToken, FractionSettings},
    input::FileReader,
    retrieval::RetrievalSettings,
    series::FlsTables,
};
use crate::{errors::VerifError, ALLOCATOR};
use log::{debug, info};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::{fs, io, path::Path};

/// Main verification function, responsible for all steps.
///
/// It reads the provided configuration, prepares the working
/// directories and runs the requested tasks in order.
pub fn main() -> Result<(), VerifError> {
    info!("Preparing the verification core");

    let core = Core::new()?;

    prepare_working_dirs(&core.config.paths)?;

    if core.config.tasks.retrieve_forecasts {
        let settings = RetrievalSettings::new(&core.config)?;
        retrieval::retrieve_forecast_files(&settings)?;
    }

    if core.config.tasks.calc_fractions {
        let settings = FractionSettings::new(&core.config)?;

        let tables = fractions::calc_fls_fractions(
            &settings,
            &FileReader,
            &core.threadpool,
            &CancelToken::default(),
        )?;

        info!(
            "Tables cover {} valid times with up to +{}h lead time",
            tables.obs.len(),
            tables.fcst.max_lead_time()
        );
    } else {
        report_saved_tables(&core.config)?;
    }

    Ok(())
}

/// Logs the coverage of tables saved by previous runs.
fn report_saved_tables(config: &Config) -> Result<(), VerifError> {
    let fls_dir = config.paths.fls_dir();

    if !series::obs_table_path(&fls_dir).is_file()
        || !series::fcst_table_path(&fls_dir, &config.experiment.name).is_file()
    {
        info!("No saved FLS tables of experiment {}", config.experiment.name);
        return Ok(());
    }

    let tables = FlsTables::load(&fls_dir, &config.experiment.name)?;

    info!(
        "Saved tables contain {} of {} observed valid times and {} forecasted values",
        tables.obs.observed_count(),
        tables.obs.len(),
        tables.fcst.forecast_count()
    );

    Ok(())
}

/// Structure containing the verification resources.
#[derive(Debug)]
pub struct Core {
    pub config: Config,
    pub threadpool: ThreadPool,
}

impl Core {
    /// Verification [`Core`] constructor.
    ///
    /// Before the verification can start configuration
    /// provided by the user must be loaded and checked.
    pub fn new() -> Result<Self, VerifError> {
        debug!("Reading configuration from config.yaml");
        let config = Config::new_from_file(Path::new("config.yaml"))?;

        debug!("Setting memory limit");
        ALLOCATOR
            .set_limit(config.resources.memory.saturating_mul(1024 * 1024))
            .map_err(|_| VerifError::MemoryLimit(config.resources.memory))?;

        debug!("Setting up ThreadPool");
        let threadpool = ThreadPoolBuilder::new()
            .num_threads(config.resources.threads as usize)
            .stack_size(2 * 1024 * 1024)
            .build()?;

        Ok(Core { config, threadpool })
    }
}

/// Creates directories for satellite data, filtered model data,
/// FLS tables and plots if they do not exist yet.
fn prepare_working_dirs(paths: &Paths) -> Result<(), io::Error> {
    info!("Your working directories:");

    for dir in [
        paths.obs_dir(),
        paths.model_dir(),
        paths.fls_dir(),
        paths.plot_dir(),
    ] {
        fs::create_dir_all(&dir)?;
        info!("   {}", dir.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{configuration::Paths, prepare_working_dirs};
    use tempfile::tempdir;

    #[test]
    fn working_dirs() {
        let dir = tempdir().unwrap();
        let paths = Paths {
            work_dir: dir.path().join("wd"),
            obs_dir: Some(dir.path().join("store").join("sat")),
            model_dir: None,
            fls_dir: None,
        };

        prepare_working_dirs(&paths).unwrap();
        // second call finds everything in place
        prepare_working_dirs(&paths).unwrap();

        assert!(dir.path().join("store/sat").is_dir());
        assert!(dir.path().join("wd/tqc").is_dir());
        assert!(dir.path().join("wd/fls").is_dir());
        assert!(dir.path().join("wd/plots").is_dir());
        assert!(!dir.path().join("wd/sat").exists());
    }
}
