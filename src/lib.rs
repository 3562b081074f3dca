//! Automatic first-arrival picking of active-source seismic surveys
//!
//! A [`survey::Survey`] holds every shot of a survey. Each [`shot::Shot`] holds one trace per
//! receiver together with its pick. The onsets are picked with a higher-order-statistics (HOS)
//! characteristic function, optionally refined with the Akaike information criterion (AIC), and
//! are given an earliest and latest possible pick from the signal-to-noise ratio.
pub mod charfuns;
pub mod cli;
pub mod config;
pub mod error;
pub mod estimator;
pub mod io;
pub mod picker;
pub mod shot;
pub mod survey;
pub mod tools;
pub mod waveform;

#[cfg(test)]
mod synthetic;

pub const PROGRAM_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PROGRAM_NAME: &str = env!("CARGO_PKG_NAME");
