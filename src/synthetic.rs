//! Deterministic synthetic shots for tests
use std::collections::BTreeMap;

use ndarray::Array1;

use crate::shot::{Coordinate, Shot, ShotParameters};
use crate::survey::Survey;
use crate::waveform::Channel;

pub const SAMPLING_RATE: f64 = 2000.;
pub const NPTS: usize = 400;
pub const VELOCITY: f64 = 1500.;
pub const NOISE_AMPLITUDE: f64 = 0.01;

/// Pseudo-random value in [-1, 1] that only depends on its inputs
pub fn noise(i: usize, seed: u32) -> f64 {
    let v = ((i as f64 + 1.) * 12.9898 + seed as f64 * 78.233).sin() * 43758.5453;
    2. * (v - v.floor()) - 1.
}

/// A trace with noise and a damped 50 Hz sine starting at `onset` seconds
pub fn onset_channel(trace_id: u32, onset: f64, seed: u32) -> Channel {
    let data = Array1::from_iter((0..NPTS).map(|i| {
        let t = i as f64 / SAMPLING_RATE;
        let signal = match t >= onset {
            true => {
                let dt = t - onset;
                (2. * std::f64::consts::PI * 50. * dt).sin() * (-dt / 0.05).exp()
            }
            false => 0.,
        };
        signal + NOISE_AMPLITUDE * noise(i, seed + trace_id)
    }));
    Channel::new(trace_id, SAMPLING_RATE, 0., data)
}

pub fn receivers(n_traces: u32, spacing: f64) -> BTreeMap<u32, Coordinate> {
    (1..=n_traces)
        .map(|id| (id, Coordinate::new(id as f64 * spacing, 0., 0.)))
        .collect()
}

/// A shot with its source at the origin shifted by the shot number
pub fn shot(shotnumber: u32, n_traces: u32, spacing: f64) -> Shot {
    let source = Coordinate::new(shotnumber as f64 * 2., 0., 0.);
    let parameters = ShotParameters {
        tmovwind: 0.03,
        ..ShotParameters::default()
    };
    let mut shot = Shot::new(shotnumber, source, parameters);

    for (trace_id, receiver) in receivers(n_traces, spacing) {
        let onset = source.distance(&receiver) / VELOCITY;
        shot.add_trace(onset_channel(trace_id, onset, shotnumber * 1000), receiver);
    }
    shot
}

pub fn survey(n_shots: u32, n_traces: u32) -> Survey {
    Survey::from_shots((1..=n_shots).map(|n| shot(n, n_traces, 6.)).collect())
        .expect("non-empty synthetic survey")
}
