//! Characteristic functions that turn a waveform segment into a function whose extremum marks
//! an onset candidate.
//!
//! Two kinds are implemented:
//! - AIC: the Akaike Information Criterion after Maeda (1985). The onset is the global minimum.
//! - HOS: running skewness or kurtosis after Kueperkoch et al. (2010). The onset is where the
//!   function first rises above a fraction of its local maximum.
use std::ops::Range;

use ndarray::{s, Array1, ArrayView1, Axis};
use ndarray_stats::QuantileExt;
use serde::{Deserialize, Serialize};

use crate::error::PickError;
use crate::waveform::Waveform;

/// Statistical order of the higher-order-statistics function
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum HosOrder {
    Skewness,
    Kurtosis,
}

impl HosOrder {
    pub fn order(&self) -> u8 {
        match self {
            HosOrder::Skewness => 3,
            HosOrder::Kurtosis => 4,
        }
    }
}

impl TryFrom<u8> for HosOrder {
    type Error = String;

    fn try_from(order: u8) -> Result<Self, Self::Error> {
        match order {
            3 => Ok(HosOrder::Skewness),
            4 => Ok(HosOrder::Kurtosis),
            _ => Err(format!("Unsupported HOS order: {order}. Must be 3 or 4")),
        }
    }
}

impl From<HosOrder> for u8 {
    fn from(order: HosOrder) -> Self {
        order.order()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CfKind {
    Aic,
    Hos(HosOrder),
}

#[derive(Debug, Clone)]
pub struct CharacteristicFunction {
    kind: CfKind,
    cut: (f64, f64),
    t2: f64,
    delta: f64,
    /// Time of the first value relative to the start of the trace
    start: f64,
    values: Array1<f64>,
    /// Running mean of x² (HOS only)
    second_moment: Option<Array1<f64>>,
}

impl CharacteristicFunction {
    /// Calculate a characteristic function from the first channel of a waveform
    ///
    /// # Arguments
    /// - `waveform`: The waveform. Only the first channel is used.
    /// - `kind`: The kind of function to calculate
    /// - `cut`: Time window (start, end) in seconds from the trace start. (0, 0) uses all data.
    /// - `t2`: Length of the long moving window in seconds (HOS only)
    ///
    /// # Returns
    /// The function, with one value per sample of the cut segment, or
    /// `PickError::InvalidInputKind` if the waveform cannot be used.
    pub fn new(
        waveform: &Waveform,
        kind: CfKind,
        cut: (f64, f64),
        t2: f64,
    ) -> Result<Self, PickError> {
        let channel = waveform.primary()?;
        let start = channel.cut_range(cut).start as f64 * channel.stats.delta;

        let mut cf = Self::from_samples(
            kind,
            channel.cut(cut),
            channel.stats.delta,
            start,
            t2,
        )?;
        cf.cut = cut;
        Ok(cf)
    }

    /// Calculate a characteristic function from raw samples
    ///
    /// This is used to stack functions, e.g. an AIC on top of a HOS function.
    pub fn from_samples(
        kind: CfKind,
        samples: ArrayView1<f64>,
        delta: f64,
        start: f64,
        t2: f64,
    ) -> Result<Self, PickError> {
        if !(delta.is_finite() && delta > 0.) {
            return Err(PickError::InvalidInputKind(format!(
                "invalid sample interval: {delta}"
            )));
        };

        let (values, second_moment) = match kind {
            CfKind::Aic => (aic(samples), None),
            CfKind::Hos(order) => {
                let ilta = (t2 / delta).round().max(1.) as usize;
                let (values, second_moment) = hos(samples, order, ilta);
                (values, Some(second_moment))
            }
        };

        let end = start + samples.len() as f64 * delta;
        Ok(Self {
            kind,
            cut: (start, end),
            t2,
            delta,
            start,
            values,
            second_moment,
        })
    }

    pub fn kind(&self) -> CfKind {
        self.kind
    }

    pub fn cut(&self) -> (f64, f64) {
        self.cut
    }

    pub fn t2(&self) -> f64 {
        self.t2
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }

    /// Time of the first value relative to the trace start
    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn values(&self) -> ArrayView1<f64> {
        self.values.view()
    }

    pub fn second_moment(&self) -> Option<ArrayView1<f64>> {
        self.second_moment.as_ref().map(|m| m.view())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn time_at(&self, index: usize) -> Option<f64> {
        (index < self.len()).then(|| self.start + index as f64 * self.delta)
    }

    /// Index of the value closest to a time, clamped to the function
    pub fn index_at(&self, time: f64) -> usize {
        (((time - self.start) / self.delta + 1e-9).max(0.) as usize).min(self.len())
    }

    /// Index of the global minimum (the AIC onset candidate)
    pub fn argmin(&self) -> Option<usize> {
        self.argmin_in(0..self.len())
    }

    /// Index of the minimum within a range of indices
    pub fn argmin_in(&self, range: Range<usize>) -> Option<usize> {
        let range = clamp_range(range, self.len());
        let offset = range.start;
        self.values
            .slice(s![range])
            .argmin()
            .ok()
            .map(|i| i + offset)
    }

    /// First index within a range where the function reaches a fraction of the range maximum
    ///
    /// # Arguments
    /// - `range`: The range of indices to search
    /// - `folm`: Fraction of the local maximum, e.g. 0.6 for 60%
    ///
    /// # Returns
    /// The index, or `None` if the range is empty or holds no finite maximum.
    pub fn first_exceeding(&self, range: Range<usize>, folm: f64) -> Option<usize> {
        let range = clamp_range(range, self.len());
        let offset = range.start;
        let window = self.values.slice(s![range]);

        let max = *window.max().ok()?;
        if !max.is_finite() {
            return None;
        };
        let threshold = folm * max;

        window
            .iter()
            .position(|v| *v >= threshold)
            .map(|i| i + offset)
    }
}

fn clamp_range(range: Range<usize>, len: usize) -> Range<usize> {
    let end = range.end.min(len);
    range.start.min(end)..end
}

fn zero_nan(x: ArrayView1<f64>) -> Array1<f64> {
    x.mapv(|v| if v.is_nan() { 0. } else { v })
}

/// Akaike Information Criterion of every split point of a segment
///
/// The result is mean-subtracted; non-finite values are reset to zero first.
fn aic(x: ArrayView1<f64>) -> Array1<f64> {
    let x = zero_nan(x);
    let n = x.len();
    let mut cf = Array1::<f64>::zeros(n);
    if n < 2 {
        return cf;
    };

    let mut energy = x.mapv(|v| v.powi(2));
    energy.accumulate_axis_inplace(Axis(0), |prev, cur| *cur += prev);
    energy.mapv_inplace(|e| if e == 0. { f64::EPSILON } else { e });

    let total = energy[n - 1];
    for k in 1..n {
        let before = k as f64;
        let after = (n - k) as f64;
        cf[k] = (before - 1.) * (energy[k] / before).ln()
            + after * ((total - energy[k - 1]) / after).ln();
    }
    cf[0] = cf[1];

    cf.mapv_inplace(|v| if v.is_finite() { v } else { 0. });
    let mean = cf.mean().unwrap_or(0.);
    cf -= mean;
    cf
}

/// Running skewness or kurtosis with one long moving window of `ilta` samples
///
/// The moments are updated incrementally: a growing mean until the window is filled, then a
/// sliding update. The first four values are zero.
///
/// # Returns
/// The characteristic function and the running mean of x².
fn hos(x: ArrayView1<f64>, order: HosOrder, ilta: usize) -> (Array1<f64>, Array1<f64>) {
    let x = zero_nan(x);
    let n = x.len();
    let y = x.mapv(|v| v.powi(order.order() as i32));
    let y1 = x.mapv(|v| v.powi(2));

    let mut lta = y.first().copied().unwrap_or(0.);
    let mut lta1 = y1.first().copied().unwrap_or(0.);

    let mut cf = Array1::<f64>::zeros(n);
    let mut second_moment = Array1::<f64>::zeros(n);

    for j in 4..n {
        if j <= ilta {
            let jf = j as f64;
            lta = (y[j] + lta * (jf - 1.)) / jf;
            lta1 = (y1[j] + lta1 * (jf - 1.)) / jf;
        } else {
            lta += (y[j] - y[j - ilta]) / ilta as f64;
            lta1 += (y1[j] - y1[j - ilta]) / ilta as f64;
        };

        cf[j] = match order {
            HosOrder::Skewness => lta / lta1.powf(1.5),
            HosOrder::Kurtosis => lta / lta1.powi(2),
        };
        second_moment[j] = lta1;
    }

    cf.mapv_inplace(|v| if v.is_finite() { v } else { 0. });
    (cf, second_moment)
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::Array1;

    use super::{CfKind, CharacteristicFunction, HosOrder};
    use crate::error::PickError;
    use crate::waveform::{Channel, Waveform};

    fn waveform(data: Vec<f64>, sampling_rate: f64) -> Waveform {
        Waveform::single(Channel::new(1, sampling_rate, 0., Array1::from_vec(data)))
    }

    #[test]
    fn test_aic_zero_segment() {
        let cf = CharacteristicFunction::new(
            &waveform(vec![0.; 50], 100.),
            CfKind::Aic,
            (0., 0.),
            0.1,
        )
        .unwrap();

        assert_eq!(cf.len(), 50);
        assert!(cf.values().iter().all(|v| *v == 0.));
    }

    #[test]
    fn test_aic_step_minimum() {
        // Ten silent samples followed by a ramp. Every split inside the silent part has a
        // log-energy of ln(eps), which weighs heaviest at the last silent sample.
        let mut data = vec![0.; 10];
        data.extend((1..=10).map(|v| v as f64));

        let cf =
            CharacteristicFunction::new(&waveform(data, 1.), CfKind::Aic, (0., 0.), 0.).unwrap();

        assert_eq!(cf.argmin(), Some(9));
        assert_abs_diff_eq!(cf.values().sum(), 0., epsilon = 1e-9);
    }

    #[test]
    fn test_aic_nan_input() {
        let data = vec![0., f64::NAN, 1., 2., f64::NAN, 3., 4.];
        let cf =
            CharacteristicFunction::new(&waveform(data, 1.), CfKind::Aic, (0., 0.), 0.).unwrap();

        assert!(cf.values().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_hos_second_moment_sine() {
        let amplitude = 2.;
        // 20 samples per period
        let data = (0..2000)
            .map(|i| amplitude * (2. * std::f64::consts::PI * i as f64 / 20.).sin())
            .collect::<Vec<f64>>();

        for t2 in [1., 2.] {
            let cf = CharacteristicFunction::new(
                &waveform(data.clone(), 100.),
                CfKind::Hos(HosOrder::Kurtosis),
                (0., 0.),
                t2,
            )
            .unwrap();

            let second_moment = cf.second_moment().unwrap();
            assert_abs_diff_eq!(
                second_moment[second_moment.len() - 1],
                amplitude.powi(2) / 2.,
                epsilon = 0.1
            );
        }
    }

    #[test]
    fn test_hos_onset() {
        let mut data = vec![0.; 30];
        data.extend(vec![1.; 70]);

        let kurtosis = CharacteristicFunction::new(
            &waveform(data.clone(), 100.),
            CfKind::Hos(HosOrder::Kurtosis),
            (0., 0.),
            10.,
        )
        .unwrap();
        // The kurtosis is j / m for m samples after the onset
        assert_abs_diff_eq!(kurtosis.values()[30], 30., epsilon = 1e-9);
        assert_abs_diff_eq!(kurtosis.values()[31], 15.5, epsilon = 1e-9);
        assert!(kurtosis.values().slice(ndarray::s![..30]).iter().all(|v| *v == 0.));
        assert_eq!(kurtosis.first_exceeding(0..100, 0.6), Some(30));

        let skewness = CharacteristicFunction::new(
            &waveform(data, 100.),
            CfKind::Hos(HosOrder::Skewness),
            (0., 0.),
            10.,
        )
        .unwrap();
        assert_abs_diff_eq!(skewness.values()[30], 30_f64.sqrt(), epsilon = 1e-9);
        assert_eq!(skewness.first_exceeding(0..100, 0.6), Some(30));
    }

    #[test]
    fn test_cut_and_times() {
        let data = (0..40).map(|v| v as f64).collect::<Vec<f64>>();
        let cf = CharacteristicFunction::new(
            &waveform(data, 4.),
            CfKind::Hos(HosOrder::Kurtosis),
            (1., 5.),
            1.,
        )
        .unwrap();

        assert_eq!(cf.len(), 16);
        assert_eq!(cf.time_at(0), Some(1.));
        assert_eq!(cf.time_at(4), Some(2.));
        assert_eq!(cf.index_at(2.), 4);
        assert_eq!(cf.time_at(16), None);
        assert_eq!(cf.cut(), (1., 5.));
    }

    #[test]
    fn test_invalid_input() {
        let result =
            CharacteristicFunction::new(&Waveform::new(vec![]), CfKind::Aic, (0., 0.), 0.1);
        assert!(matches!(result, Err(PickError::InvalidInputKind(_))));
    }

    #[test]
    fn test_empty_segment() {
        let cf = CharacteristicFunction::new(
            &waveform(vec![], 100.),
            CfKind::Hos(HosOrder::Kurtosis),
            (0., 0.),
            0.1,
        )
        .unwrap();
        assert!(cf.is_empty());
        assert_eq!(cf.argmin(), None);
        assert_eq!(cf.first_exceeding(0..10, 0.6), None);
    }

    #[test]
    fn test_hos_order() {
        assert_eq!(HosOrder::try_from(3), Ok(HosOrder::Skewness));
        assert_eq!(HosOrder::try_from(4), Ok(HosOrder::Kurtosis));
        assert!(HosOrder::try_from(5).is_err());
    }
}
