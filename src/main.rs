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

//! FLS Satellite Verification (fls-verif) compares fog and low stratus (FLS)
//! coverage over the Swiss Plateau as seen by the satellite-based low stratus
//! confidence level product with the coverage predicted by the numerical
//! weather model at every lead time.
//!
//! For each hour in the verification period the fraction of the region
//! covered by FLS is computed from the observation and from every forecast
//! valid at that hour. Results are stored in two tables that can be
//! extended by subsequent runs.

mod constants;
mod errors;
mod verification;

use cap::Cap;
use env_logger::Env;
use log::{error, info};
use std::alloc;

type Float = f64;

/// Global allocator used by the program.
///
/// Use of static global allocator allows for capping the memory to the limit set by user
/// in configuration file and in effect provide better [OOM error](https://en.wikipedia.org/wiki/Out_of_memory) handling.
#[global_allocator]
static ALLOCATOR: Cap<alloc::System> = Cap::new(alloc::System, usize::MAX);

/// The main program function.
/// Prepares the runtime environment and calls the [`verification::main`].
///
/// The `env_logger` needs to be initiated before any log messages
/// are possible to occur, so it is done first.
fn main() {
    #[cfg(not(feature = "debug"))]
    let logger_env = Env::new().filter_or("FLS_LOG_LEVEL", "info");

    #[cfg(feature = "debug")]
    let logger_env = Env::new().filter_or("FLS_LOG_LEVEL", "debug");

    env_logger::Builder::from_env(logger_env)
        .format_timestamp_millis()
        .init();

    match verification::main() {
        Ok(_) => info!("Verification finished. Check the fls directory and log."),
        Err(err) => {
            error!("Verification failed with error: {}", err);
            std::process::exit(1);
        }
    }
}
