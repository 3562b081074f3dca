//! Noise/signal windows, signal-to-noise ratios and pick uncertainties
//!
//! The earliest and latest possible picks follow Diehl & Kissling (2009): the latest possible
//! pick is where the signal first exceeds the noise level, the earliest is half a signal period
//! in front of the most likely pick.
use std::ops::Range;

use ndarray::{s, Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::PickError;
use crate::tools;

/// Lengths of the windows around an onset in seconds
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tsnr {
    pub noise: f64,
    pub gap: f64,
    pub signal: f64,
}

impl Tsnr {
    pub fn new(noise: f64, gap: f64, signal: f64) -> Self {
        Self { noise, gap, signal }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Snr {
    /// Signal level over noise level. NaN if the noise level is zero.
    pub ratio: f64,
    pub db: f64,
    pub noise_level: f64,
}

impl Snr {
    /// Whether the ratio reaches a threshold. An undefined ratio never does.
    pub fn passes(&self, threshold: f64) -> bool {
        self.ratio >= threshold
    }
}

/// Earliest and latest possible pick around a most likely pick
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct EarlLate {
    pub earliest: f64,
    pub latest: f64,
    pub symmetric_error: f64,
    /// How many times the signal window had to be doubled to find the earliest pick
    pub doublings: usize,
}

pub fn time_axis(npts: usize, delta: f64) -> Array1<f64> {
    Array1::from_iter((0..npts).map(|i| i as f64 * delta))
}

/// Indices of the samples with start <= t <= end
fn window(t: ArrayView1<f64>, start: f64, end: f64) -> Range<usize> {
    let tolerance = match t.len() {
        0 | 1 => 0.,
        _ => 1e-9 * (t[1] - t[0]).abs(),
    };

    let first = t.iter().position(|v| *v >= start - tolerance);
    let last = t.iter().rposition(|v| *v <= end + tolerance);

    match (first, last) {
        (Some(first), Some(last)) if first <= last => first..last + 1,
        _ => 0..0,
    }
}

/// Indices of the noise window in front of an onset
///
/// The window spans `t1 - tnoise - tgap <= t <= t1 - tgap`, cropped at t = 0. If the window
/// would end before t = 0, it is empty.
///
/// # Arguments
/// - `t`: The time axis
/// - `t1`: The onset time
/// - `tnoise`: Length of the noise window
/// - `tgap`: Safety gap between the noise window and the onset
pub fn noise_window(t: ArrayView1<f64>, t1: f64, tnoise: f64, tgap: f64) -> Range<usize> {
    let end = t1 - tgap;
    let indices = match end < 0. {
        true => 0..0,
        false => window(t, (t1 - tnoise - tgap).max(0.), end),
    };
    if indices.is_empty() {
        tracing::debug!("Empty noise window for onset {t1} s, check the noise window");
    };
    indices
}

/// Indices of the signal window `t1 <= t <= t1 + tsignal` after an onset
pub fn signal_window(t: ArrayView1<f64>, t1: f64, tsignal: f64) -> Range<usize> {
    let indices = window(t, t1, t1 + tsignal);
    if indices.is_empty() {
        tracing::debug!("Empty signal window for onset {t1} s, check the signal window");
    };
    indices
}

fn windows(
    t: ArrayView1<f64>,
    tsnr: &Tsnr,
    t1: f64,
) -> Result<(Range<usize>, Range<usize>), PickError> {
    let inoise = noise_window(t, t1, tsnr.noise, tsnr.gap);
    if inoise.is_empty() {
        return Err(PickError::EmptyWindow { window: "noise" });
    };
    let isignal = signal_window(t, t1, tsnr.signal);
    if isignal.is_empty() {
        return Err(PickError::EmptyWindow { window: "signal" });
    };
    Ok((inoise, isignal))
}

fn max_abs(x: ArrayView1<f64>) -> f64 {
    x.iter().fold(0., |max, v| v.abs().max(max))
}

/// Signal-to-noise ratio around an onset
///
/// The data are demeaned with the mean of the noise window. The levels are the maximum
/// absolute amplitudes of the noise and signal windows.
///
/// # Arguments
/// - `x`: The samples of the trace
/// - `delta`: The sample interval in seconds
/// - `tsnr`: The noise, gap and signal window lengths
/// - `t1`: The onset time relative to the trace start
///
/// # Returns
/// The SNR, or `PickError::EmptyWindow` if either window is empty.
pub fn snr(x: ArrayView1<f64>, delta: f64, tsnr: &Tsnr, t1: f64) -> Result<Snr, PickError> {
    let t = time_axis(x.len(), delta);
    let (inoise, isignal) = windows(t.view(), tsnr, t1)?;

    let noise_mean = x.slice(s![inoise.clone()]).mean().unwrap_or(0.);
    let x = x.mapv(|v| v - noise_mean);

    let noise_level = max_abs(x.slice(s![inoise]));
    let signal_level = max_abs(x.slice(s![isignal]));

    let ratio = match noise_level == 0. {
        true => f64::NAN,
        false => signal_level / noise_level,
    };

    Ok(Snr {
        ratio,
        db: 10. * ratio.log10(),
        noise_level,
    })
}

/// Combine the earliest and latest pick offsets into one symmetric error
///
/// The latest pick offset is weighted twice the earliest.
///
/// # Arguments
/// - `dte`: Offset between the earliest and the most likely pick
/// - `dtl`: Offset between the most likely and the latest pick
pub fn symmetrize_error(dte: f64, dtl: f64) -> f64 {
    (dte + 2. * dtl) / 3.
}

/// Derive the earliest and latest possible pick around a most likely pick
///
/// The latest pick is the first sample of the signal window that exceeds `nfac` times the noise
/// RMS. The earliest pick is the most likely pick minus the mean half period between zero
/// crossings of the signal window. If the window holds too few crossings, it is doubled until it
/// would reach past the end of the data.
///
/// # Arguments
/// - `x`: The samples of the trace
/// - `delta`: The sample interval in seconds
/// - `nfac`: The noise factor
/// - `tsnr`: The noise, gap and signal window lengths
/// - `pick1`: The most likely pick relative to the trace start
pub fn earllatepicker(
    x: ArrayView1<f64>,
    delta: f64,
    nfac: f64,
    tsnr: &Tsnr,
    pick1: f64,
) -> Result<EarlLate, PickError> {
    let t = time_axis(x.len(), delta);
    let (inoise, isignal) = windows(t.view(), tsnr, pick1)?;

    let noise_mean = x.slice(s![inoise.clone()]).mean().unwrap_or(0.);
    let x = x.mapv(|v| v - noise_mean);

    let noise_rms = x
        .slice(s![inoise])
        .mapv(|v| v.powi(2))
        .mean()
        .unwrap_or(0.)
        .sqrt();
    let noise_level = noise_rms * nfac;

    let first_above = x
        .slice(s![isignal.clone()])
        .iter()
        .position(|v| *v > noise_level || *v < -noise_level)
        .ok_or(PickError::SignalBelowNoise)?;
    let latest = t[isignal.start + first_above];

    let mut signal = isignal;
    let mut doublings = 0_usize;
    let half_period = loop {
        let segment = x.slice(s![signal.clone()]);
        let segment_mean = segment.mean().unwrap_or(0.);
        let crossings = tools::zero_crossings(segment.mapv(|v| v - segment_mean).view());

        if let Some(spacing) = tools::mean_spacing(&crossings) {
            break spacing * delta;
        };

        let doubled_end = signal.end + signal.len();
        if doubled_end >= x.len() {
            tracing::debug!(
                "Could not double the signal window at {pick1} s: out of bounds after {doublings} doubling(s)"
            );
            return Err(PickError::InsufficientSignal { doublings });
        };
        signal = signal.start..doubled_end;
        doublings += 1;
        tracing::debug!("Doubled the signal window at {pick1} s ({doublings} time(s))");
    };

    let earliest = pick1 - half_period;

    Ok(EarlLate {
        earliest,
        latest,
        symmetric_error: symmetrize_error(pick1 - earliest, latest - pick1),
        doublings,
    })
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, Array1};

    use super::Tsnr;
    use crate::error::PickError;

    /// Alternating noise followed by a sine with a 20 sample period from index 100
    fn onset_trace(signal: impl Fn(usize) -> f64) -> Array1<f64> {
        Array1::from_iter((0..200).map(|i| match i < 100 {
            true => 0.01 * if i % 2 == 0 { 1. } else { -1. },
            false => signal(i - 100),
        }))
    }

    fn shifted_sine(k: usize) -> f64 {
        (2. * std::f64::consts::PI * k as f64 / 20. + std::f64::consts::PI / 20.).sin()
    }

    #[test]
    fn test_windows() {
        let t = super::time_axis(10, 1.);

        assert_eq!(super::noise_window(t.view(), 5., 3., 1.), 1..5);
        assert_eq!(super::noise_window(t.view(), 5., 10., 1.), 0..5);
        assert_eq!(super::signal_window(t.view(), 5., 2.), 5..8);
        assert_eq!(super::signal_window(t.view(), 8., 5.), 8..10);
    }

    #[test]
    fn test_windows_out_of_bounds() {
        let t = super::time_axis(10, 1.);

        // The onset is earlier than the gap
        assert!(super::noise_window(t.view(), 0.5, 3., 1.).is_empty());
        assert!(super::signal_window(t.view(), 20., 2.).is_empty());
    }

    #[test]
    fn test_snr() {
        let x = arr1(&[-1., 1., -1., 1., 0., 5.]);
        let snr = super::snr(x.view(), 1., &Tsnr::new(3.5, 1.5, 0.), 5.).unwrap();

        assert_eq!(snr.noise_level, 1.);
        assert_eq!(snr.ratio, 5.);
        assert_abs_diff_eq!(snr.db, 6.9897, epsilon = 1e-4);
        assert!(snr.passes(5.));
        assert!(!snr.passes(5.1));
    }

    #[test]
    fn test_snr_silent_noise() {
        let x = arr1(&[2., 2., 2., 2., 2., 5.]);
        let snr = super::snr(x.view(), 1., &Tsnr::new(3.5, 1.5, 0.), 5.).unwrap();

        assert!(snr.ratio.is_nan());
        assert!(!snr.passes(0.));
    }

    #[test]
    fn test_snr_empty_window() {
        let x = arr1(&[-1., 1., -1., 1., 0., 5.]);
        assert_eq!(
            super::snr(x.view(), 1., &Tsnr::new(3.5, 1.5, 0.), 1.),
            Err(PickError::EmptyWindow { window: "noise" })
        );
    }

    #[test]
    fn test_symmetrize_error() {
        let (earliest, pick, latest) = (9.7, 10.0, 10.6);
        assert_abs_diff_eq!(
            super::symmetrize_error(pick - earliest, latest - pick),
            0.5,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_earllatepicker() {
        let x = onset_trace(shifted_sine);
        let result =
            super::earllatepicker(x.view(), 0.01, 1.5, &Tsnr::new(0.5, 0.05, 0.2), 1.0).unwrap();

        assert_abs_diff_eq!(result.latest, 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(result.earliest, 0.9, epsilon = 1e-9);
        assert_abs_diff_eq!(result.symmetric_error, 0.1 / 3., epsilon = 1e-9);
        assert_eq!(result.doublings, 0);
        assert!(result.earliest <= 1.0 && 1.0 <= result.latest);
    }

    #[test]
    fn test_earllatepicker_window_doubling() {
        let x = onset_trace(shifted_sine);
        let result =
            super::earllatepicker(x.view(), 0.01, 1.5, &Tsnr::new(0.5, 0.05, 0.05), 1.0).unwrap();

        // Six samples hold one crossing of the demeaned window, twelve hold two, six samples
        // apart.
        assert_eq!(result.doublings, 1);
        assert_abs_diff_eq!(result.earliest, 0.94, epsilon = 1e-9);
    }

    #[test]
    fn test_earllatepicker_insufficient_signal() {
        let x = onset_trace(|_| 1.);
        let result = super::earllatepicker(x.view(), 0.01, 1.5, &Tsnr::new(0.5, 0.05, 0.05), 1.0);

        assert!(matches!(result, Err(PickError::InsufficientSignal { .. })));
    }

    #[test]
    fn test_earllatepicker_below_noise() {
        let x = onset_trace(|_| 0.);
        let result = super::earllatepicker(x.view(), 0.01, 1.5, &Tsnr::new(0.5, 0.05, 0.05), 1.0);

        assert_eq!(result, Err(PickError::SignalBelowNoise));
    }
}
