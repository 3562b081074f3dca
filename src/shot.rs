//! One source excitation and the picks of all of its traces
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::charfuns::{CfKind, CharacteristicFunction, HosOrder};
use crate::error::PickError;
use crate::estimator::{self, EarlLate, Snr, Tsnr};
use crate::waveform::{Channel, Waveform};

#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Coordinate {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Coordinate) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2))
            .sqrt()
    }
}

/// Which characteristic function decides the final pick
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PickMethod {
    #[default]
    Hos,
    Aic,
}

impl FromStr for PickMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hos" => Ok(PickMethod::Hos),
            "aic" => Ok(PickMethod::Aic),
            _ => Err(format!("Unknown picking method: {s}. Choices: hos, aic")),
        }
    }
}

impl std::fmt::Display for PickMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PickMethod::Hos => "hos",
            PickMethod::Aic => "aic",
        })
    }
}

/// The SNR a pick needs to count as valid
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SnrThreshold {
    Constant(f64),
    /// Decays from `near` at the source towards `far` with increasing distance
    Distance {
        near: f64,
        far: f64,
        decay_length: f64,
    },
}

impl Default for SnrThreshold {
    fn default() -> Self {
        SnrThreshold::Constant(2.)
    }
}

impl SnrThreshold {
    pub fn at(&self, distance: f64) -> f64 {
        match *self {
            SnrThreshold::Constant(value) => value,
            SnrThreshold::Distance {
                near,
                far,
                decay_length,
            } => far + (near - far) * (-distance / decay_length).exp(),
        }
    }
}

/// Timing and picking parameters shared by all traces of a shot
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotParameters {
    /// Time window (start, end) in seconds that the characteristic functions are calculated on
    pub cut: (f64, f64),
    /// Length of the HOS moving window in seconds
    pub tmovwind: f64,
    pub tsignal: f64,
    pub tgap: f64,
    pub order: HosOrder,
    pub nfac: f64,
    pub vmin: f64,
    pub vmax: f64,
    /// Fraction of the local maximum that the HOS function has to reach
    pub folm: f64,
    pub method: PickMethod,
    /// Samples (left, right) around the HOS pick that the AIC minimum is searched in
    pub aicwindow: (usize, usize),
}

impl Default for ShotParameters {
    fn default() -> Self {
        Self {
            cut: (0., 0.2),
            tmovwind: 0.3,
            tsignal: 0.03,
            tgap: 0.0007,
            order: HosOrder::Kurtosis,
            nfac: 1.5,
            vmin: 333.,
            vmax: 5500.,
            folm: 0.6,
            method: PickMethod::Hos,
            aicwindow: (15, 0),
        }
    }
}

/// The pick state of one trace
///
/// A pick is valid only if its time is set. The symmetric pick error only changes together with
/// the earliest and latest bounds.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pick {
    time: Option<f64>,
    valid: bool,
    revised: bool,
    earllate: Option<EarlLate>,
    snr: Option<Snr>,
    snr_threshold: f64,
    manual: Option<f64>,
}

impl Pick {
    /// The pick time, regardless of whether the pick is valid
    pub fn time(&self) -> Option<f64> {
        self.time
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn is_revised(&self) -> bool {
        self.revised
    }

    pub fn earliest(&self) -> Option<f64> {
        self.earllate.map(|e| e.earliest)
    }

    pub fn latest(&self) -> Option<f64> {
        self.earllate.map(|e| e.latest)
    }

    pub fn symmetric_error(&self) -> Option<f64> {
        self.earllate.map(|e| e.symmetric_error)
    }

    pub fn snr(&self) -> Option<Snr> {
        self.snr
    }

    pub fn snr_threshold(&self) -> f64 {
        self.snr_threshold
    }

    pub fn manual(&self) -> Option<f64> {
        self.manual
    }
}

#[derive(Debug, Clone)]
struct Trace {
    waveform: Arc<Waveform>,
    receiver: Coordinate,
    pickwindow: Option<(f64, f64)>,
    pick: Pick,
}

#[derive(Debug, Clone)]
pub struct Shot {
    shotnumber: u32,
    source: Coordinate,
    parameters: ShotParameters,
    snr_policy: SnrThreshold,
    traces: BTreeMap<u32, Trace>,
}

impl Shot {
    pub fn new(shotnumber: u32, source: Coordinate, parameters: ShotParameters) -> Self {
        Self {
            shotnumber,
            source,
            parameters,
            snr_policy: SnrThreshold::default(),
            traces: BTreeMap::new(),
        }
    }

    /// Add (or replace) a trace
    pub fn add_trace(&mut self, channel: Channel, receiver: Coordinate) {
        let trace_id = channel.stats.trace_id;
        let snr_threshold = self.snr_policy.at(self.source.distance(&receiver));
        self.traces.insert(
            trace_id,
            Trace {
                waveform: Arc::new(Waveform::single(channel)),
                receiver,
                pickwindow: None,
                pick: Pick {
                    snr_threshold,
                    ..Pick::default()
                },
            },
        );
    }

    pub fn remove_trace(&mut self, trace_id: u32) -> bool {
        self.traces.remove(&trace_id).is_some()
    }

    pub fn shotnumber(&self) -> u32 {
        self.shotnumber
    }

    pub fn source(&self) -> Coordinate {
        self.source
    }

    pub fn parameters(&self) -> &ShotParameters {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut ShotParameters {
        &mut self.parameters
    }

    /// The trace IDs in ascending order
    pub fn trace_ids(&self) -> Vec<u32> {
        self.traces.keys().copied().collect()
    }

    pub fn num_traces(&self) -> usize {
        self.traces.len()
    }

    pub fn waveform(&self, trace_id: u32) -> Option<&Arc<Waveform>> {
        self.traces.get(&trace_id).map(|trace| &trace.waveform)
    }

    pub fn receiver(&self, trace_id: u32) -> Option<Coordinate> {
        self.traces.get(&trace_id).map(|trace| trace.receiver)
    }

    /// Source-receiver distance of a trace
    pub fn distance(&self, trace_id: u32) -> Option<f64> {
        self.receiver(trace_id)
            .map(|receiver| self.source.distance(&receiver))
    }

    /// The full pick state of a trace
    pub fn trace_pick(&self, trace_id: u32) -> Option<&Pick> {
        self.traces.get(&trace_id).map(|trace| &trace.pick)
    }

    fn pick_mut(&mut self, trace_id: u32) -> Option<&mut Pick> {
        self.traces.get_mut(&trace_id).map(|trace| &mut trace.pick)
    }

    /// Restrict the window that onsets of a trace are searched in
    pub fn set_pickwindow(&mut self, trace_id: u32, pickwindow: (f64, f64)) {
        if let Some(trace) = self.traces.get_mut(&trace_id) {
            trace.pickwindow = Some(pickwindow);
        };
    }

    /// The window that onsets of a trace are searched in
    ///
    /// This is the apparent velocity window `(distance / vmax, distance / vmin)`, intersected with
    /// the cut and a manually set pick window.
    pub fn pickwindow(&self, trace_id: u32) -> Option<(f64, f64)> {
        let trace = self.traces.get(&trace_id)?;
        let distance = self.source.distance(&trace.receiver);

        let mut left = (distance / self.parameters.vmax).max(self.parameters.cut.0);
        let mut right = distance / self.parameters.vmin;
        if self.parameters.cut.1 > 0. {
            right = right.min(self.parameters.cut.1);
        };
        if let Some((start, end)) = trace.pickwindow {
            left = left.max(start);
            right = right.min(end);
        };
        Some((left, right))
    }

    /// Pick the onset of one trace with the parameters of the shot
    pub fn pick_trace(&self, trace_id: u32) -> Result<f64, PickError> {
        let trace = self.traces.get(&trace_id).ok_or_else(|| {
            PickError::InvalidInputKind(format!("no trace {trace_id} in shot {}", self.shotnumber))
        })?;
        let pickwindow = self.pickwindow(trace_id).unwrap_or_default();
        pick_onset(&trace.waveform, &self.parameters, pickwindow)
    }

    /// Set the pick of a trace and mark it as valid (or clear it with `None`)
    pub fn set_pick(&mut self, trace_id: u32, time: Option<f64>, revised: bool) {
        if let Some(pick) = self.pick_mut(trace_id) {
            pick.time = time;
            pick.valid = time.is_some();
            pick.revised = revised;
            pick.earllate = None;
        };
    }

    /// The pick time if the pick is valid
    pub fn pick(&self, trace_id: u32) -> Option<f64> {
        self.trace_pick(trace_id)
            .filter(|pick| pick.valid)
            .and_then(|pick| pick.time)
    }

    pub fn pick_including_removed(&self, trace_id: u32) -> Option<f64> {
        self.trace_pick(trace_id).and_then(|pick| pick.time)
    }

    pub fn pick_flag(&self, trace_id: u32) -> bool {
        self.trace_pick(trace_id)
            .map(|pick| pick.valid)
            .unwrap_or(false)
    }

    /// Validate or invalidate a pick. A missing pick time cannot be validated.
    pub fn set_pick_flag(&mut self, trace_id: u32, flag: bool) {
        if let Some(pick) = self.pick_mut(trace_id) {
            pick.valid = flag && pick.time.is_some();
        };
    }

    /// Invalidate a pick but keep its time, so it can be recovered
    pub fn remove_pick(&mut self, trace_id: u32) {
        self.set_pick_flag(trace_id, false);
    }

    /// Reset the pick of a trace. Its manual pick and SNR threshold are kept.
    pub fn clear_pick(&mut self, trace_id: u32) {
        if let Some(pick) = self.pick_mut(trace_id) {
            *pick = Pick {
                snr_threshold: pick.snr_threshold,
                manual: pick.manual,
                ..Pick::default()
            };
        };
    }

    pub fn revised(&self, trace_id: u32) -> bool {
        self.trace_pick(trace_id)
            .map(|pick| pick.revised)
            .unwrap_or(false)
    }

    pub fn set_revised(&mut self, trace_id: u32, revised: bool) {
        if let Some(pick) = self.pick_mut(trace_id) {
            pick.revised = revised;
        };
    }

    /// The noise, gap and signal windows around the current pick of a trace
    ///
    /// The noise window spans from the trace start to the gap in front of the pick.
    fn tsnr(&self, pick: f64) -> Tsnr {
        Tsnr::new(
            pick - self.parameters.tgap,
            self.parameters.tgap,
            self.parameters.tsignal,
        )
    }

    /// Calculate and store the SNR around the current pick of a trace
    ///
    /// # Returns
    /// The SNR, or `None` if the trace has no pick time or the windows are empty.
    pub fn set_snr(&mut self, trace_id: u32) -> Option<Snr> {
        let time = self.pick_including_removed(trace_id);
        let snr = match (time, self.waveform(trace_id)) {
            (Some(time), Some(waveform)) => {
                let channel = waveform.primary().ok()?;
                estimator::snr(
                    channel.data.view(),
                    channel.stats.delta,
                    &self.tsnr(time),
                    time,
                )
                .map_err(|e| {
                    tracing::debug!("SNR of shot {} trace {trace_id}: {e}", self.shotnumber)
                })
                .ok()
            }
            _ => None,
        };
        if let Some(pick) = self.pick_mut(trace_id) {
            pick.snr = snr;
        };
        snr
    }

    pub fn snr(&self, trace_id: u32) -> Option<Snr> {
        self.trace_pick(trace_id).and_then(|pick| pick.snr)
    }

    pub fn snr_threshold(&self, trace_id: u32) -> Option<f64> {
        self.trace_pick(trace_id).map(|pick| pick.snr_threshold)
    }

    /// Override the SNR threshold of one trace
    pub fn set_snr_threshold(&mut self, trace_id: u32, threshold: f64) {
        if let Some(pick) = self.pick_mut(trace_id) {
            pick.snr_threshold = threshold;
        };
    }

    /// Set the SNR threshold policy and re-derive the threshold of every trace
    pub fn set_snr_threshold_policy(&mut self, policy: SnrThreshold) {
        self.snr_policy = policy;
        let source = self.source;
        for trace in self.traces.values_mut() {
            trace.pick.snr_threshold = policy.at(source.distance(&trace.receiver));
        }
    }

    /// Calculate and store the earliest and latest possible pick of a trace
    pub fn set_earllatepick(&mut self, trace_id: u32) -> Result<EarlLate, PickError> {
        let time = self
            .pick_including_removed(trace_id)
            .ok_or_else(|| {
                PickError::DegenerateSignal(format!(
                    "no pick to bound in shot {} trace {trace_id}",
                    self.shotnumber
                ))
            })?;
        let waveform = self
            .waveform(trace_id)
            .ok_or_else(|| PickError::InvalidInputKind(format!("no trace {trace_id}")))?;
        let channel = waveform.primary()?;

        let earllate = estimator::earllatepicker(
            channel.data.view(),
            channel.stats.delta,
            self.parameters.nfac,
            &self.tsnr(time),
            time,
        )?;
        if let Some(pick) = self.pick_mut(trace_id) {
            pick.earllate = Some(earllate);
        };
        Ok(earllate)
    }

    pub fn symmetric_pick_error(&self, trace_id: u32) -> Option<f64> {
        self.trace_pick(trace_id)
            .and_then(|pick| pick.symmetric_error())
    }

    pub fn earliest_pick(&self, trace_id: u32) -> Option<f64> {
        self.trace_pick(trace_id).and_then(|pick| pick.earliest())
    }

    pub fn latest_pick(&self, trace_id: u32) -> Option<f64> {
        self.trace_pick(trace_id).and_then(|pick| pick.latest())
    }

    pub fn set_manual_pick(&mut self, trace_id: u32, time: f64) {
        if let Some(pick) = self.pick_mut(trace_id) {
            pick.manual = Some(time);
        };
    }

    pub fn manual_pick(&self, trace_id: u32) -> Option<f64> {
        self.trace_pick(trace_id).and_then(|pick| pick.manual)
    }

    /// Number of traces with a valid pick
    pub fn count_picked(&self) -> usize {
        self.traces.values().filter(|trace| trace.pick.valid).count()
    }

    pub fn count_revised(&self) -> usize {
        self.traces.values().filter(|trace| trace.pick.revised).count()
    }
}

/// Pick the onset of a waveform
///
/// The HOS function of the cut is searched for the first value that reaches `folm` of its
/// maximum within the pick window. With the AIC method, the pick is refined to the minimum of an
/// AIC function calculated on the HOS function, searched in `aicwindow` samples around the HOS
/// pick.
///
/// # Arguments
/// - `waveform`: The waveform to pick
/// - `parameters`: The picking parameters
/// - `pickwindow`: The window (start, end) in seconds to search the onset in
///
/// # Returns
/// The onset time relative to the trace start, or a `PickError` if no onset could be found.
pub fn pick_onset(
    waveform: &Waveform,
    parameters: &ShotParameters,
    pickwindow: (f64, f64),
) -> Result<f64, PickError> {
    let hos = CharacteristicFunction::new(
        waveform,
        CfKind::Hos(parameters.order),
        parameters.cut,
        parameters.tmovwind,
    )?;

    let search = hos.index_at(pickwindow.0)..hos.index_at(pickwindow.1);
    if search.is_empty() {
        return Err(PickError::DegenerateSignal(format!(
            "empty pick window: {:.4} to {:.4} s",
            pickwindow.0, pickwindow.1
        )));
    };

    let hos_index = hos
        .first_exceeding(search, parameters.folm)
        .ok_or_else(|| PickError::DegenerateSignal("no maximum in the pick window".to_string()))?;

    let index = match parameters.method {
        PickMethod::Hos => hos_index,
        PickMethod::Aic => {
            let aic = CharacteristicFunction::from_samples(
                CfKind::Aic,
                hos.values(),
                hos.delta(),
                hos.start(),
                parameters.tmovwind,
            )?;
            let (left, right) = parameters.aicwindow;
            aic.argmin_in(hos_index.saturating_sub(left)..hos_index + right + 1)
                .ok_or_else(|| PickError::DegenerateSignal("empty AIC window".to_string()))?
        }
    };

    hos.time_at(index)
        .ok_or_else(|| PickError::DegenerateSignal(format!("pick index {index} out of bounds")))
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::Array1;

    use super::{Coordinate, PickMethod, Shot, ShotParameters, SnrThreshold};
    use crate::error::PickError;
    use crate::synthetic;
    use crate::waveform::Channel;

    /// One trace at 30 m from the source, with its onset at 0.02 s
    fn single_trace_shot(method: PickMethod) -> Shot {
        let parameters = ShotParameters {
            tmovwind: 0.03,
            method,
            ..ShotParameters::default()
        };
        let mut shot = Shot::new(1, Coordinate::default(), parameters);
        shot.add_trace(
            synthetic::onset_channel(1, 0.02, 0),
            Coordinate::new(30., 0., 0.),
        );
        shot
    }

    #[test]
    fn test_pick_trace_hos() {
        let shot = single_trace_shot(PickMethod::Hos);
        let pick = shot.pick_trace(1).unwrap();

        assert_abs_diff_eq!(pick, 0.02, epsilon = 0.003);
        assert!(shot.pick_trace(2).is_err());
    }

    #[test]
    fn test_pick_trace_aic() {
        let hos_pick = single_trace_shot(PickMethod::Hos).pick_trace(1).unwrap();

        let mut shot = single_trace_shot(PickMethod::Aic);
        shot.parameters_mut().aicwindow = (5, 0);
        let pick = shot.pick_trace(1).unwrap();

        // The AIC minimum is searched up to five samples in front of the HOS pick
        assert!(pick <= hos_pick + 1e-12);
        assert!(pick >= hos_pick - 5. / synthetic::SAMPLING_RATE - 1e-12);
        assert_abs_diff_eq!(pick, 0.02, epsilon = 0.003);
    }

    #[test]
    fn test_pick_trace_empty_window() {
        let mut shot = single_trace_shot(PickMethod::Hos);
        shot.add_trace(
            synthetic::onset_channel(2, 0.02, 0),
            Coordinate::default(),
        );

        // The receiver is at the source, so the velocity window is empty
        assert!(matches!(
            shot.pick_trace(2),
            Err(PickError::DegenerateSignal(_))
        ));
    }

    #[test]
    fn test_pickwindow() {
        let mut shot = single_trace_shot(PickMethod::Hos);

        let (left, right) = shot.pickwindow(1).unwrap();
        assert_abs_diff_eq!(left, 30. / 5500., epsilon = 1e-12);
        assert_abs_diff_eq!(right, 30. / 333., epsilon = 1e-12);

        shot.parameters_mut().cut = (0.01, 0.05);
        assert_eq!(shot.pickwindow(1), Some((0.01, 0.05)));

        shot.set_pickwindow(1, (0., 0.03));
        assert_eq!(shot.pickwindow(1), Some((0.01, 0.03)));
        assert_eq!(shot.pickwindow(5), None);
    }

    #[test]
    fn test_pick_state() {
        let mut shot = single_trace_shot(PickMethod::Hos);

        assert_eq!(shot.pick(1), None);
        assert!(!shot.pick_flag(1));

        shot.set_pick(1, Some(0.02), false);
        assert_eq!(shot.pick(1), Some(0.02));
        assert!(shot.pick_flag(1));
        assert!(!shot.revised(1));

        shot.remove_pick(1);
        assert_eq!(shot.pick(1), None);
        assert_eq!(shot.pick_including_removed(1), Some(0.02));

        shot.set_pick_flag(1, true);
        assert_eq!(shot.pick(1), Some(0.02));

        shot.set_manual_pick(1, 0.021);
        shot.set_revised(1, true);
        assert_eq!(shot.count_revised(), 1);

        shot.clear_pick(1);
        assert_eq!(shot.pick_including_removed(1), None);
        assert!(!shot.revised(1));
        assert_eq!(shot.manual_pick(1), Some(0.021));

        // A pick without a time cannot be valid
        shot.set_pick_flag(1, true);
        assert!(!shot.pick_flag(1));

        // Unknown traces are ignored
        shot.set_pick(9, Some(0.1), false);
        assert_eq!(shot.pick(9), None);
    }

    #[test]
    fn test_snr_and_earllate() {
        let mut shot = single_trace_shot(PickMethod::Hos);
        let pick = shot.pick_trace(1).unwrap();
        shot.set_pick(1, Some(pick), false);

        let snr = shot.set_snr(1).unwrap();
        assert!(snr.ratio > 10.);
        assert_eq!(shot.snr(1), Some(snr));
        assert_eq!(shot.snr_threshold(1), Some(2.));

        let earllate = shot.set_earllatepick(1).unwrap();
        assert!(earllate.earliest <= pick && pick <= earllate.latest);
        assert!(earllate.symmetric_error >= 0.);
        assert_eq!(shot.symmetric_pick_error(1), Some(earllate.symmetric_error));
        assert_eq!(shot.earliest_pick(1), Some(earllate.earliest));
        assert_eq!(shot.latest_pick(1), Some(earllate.latest));

        // A new pick discards the old bounds
        shot.set_pick(1, Some(pick), false);
        assert_eq!(shot.symmetric_pick_error(1), None);
    }

    #[test]
    fn test_set_snr_without_pick() {
        let mut shot = single_trace_shot(PickMethod::Hos);

        assert_eq!(shot.set_snr(1), None);
        assert!(shot.set_earllatepick(1).is_err());
    }

    #[test]
    fn test_snr_threshold_policy() {
        let policy = SnrThreshold::Distance {
            near: 5.,
            far: 1.,
            decay_length: 30.,
        };
        assert_abs_diff_eq!(policy.at(0.), 5., epsilon = 1e-12);
        assert_abs_diff_eq!(policy.at(30.), 1. + 4. / std::f64::consts::E, epsilon = 1e-12);
        assert_eq!(SnrThreshold::Constant(1.5).at(100.), 1.5);

        let mut shot = single_trace_shot(PickMethod::Hos);
        shot.set_snr_threshold_policy(policy);
        assert_abs_diff_eq!(shot.snr_threshold(1).unwrap(), policy.at(30.), epsilon = 1e-12);

        shot.set_snr_threshold(1, 0.3);
        assert_eq!(shot.snr_threshold(1), Some(0.3));
    }

    #[test]
    fn test_distance_and_traces() {
        let mut shot = Shot::new(4, Coordinate::new(0., 0., 1.), ShotParameters::default());
        for trace_id in [3, 1, 2] {
            shot.add_trace(
                Channel::new(trace_id, 100., 0., Array1::zeros(10)),
                Coordinate::new(3., 4., 1.),
            );
        }

        assert_eq!(shot.trace_ids(), vec![1, 2, 3]);
        assert_eq!(shot.distance(2), Some(5.));
        assert_eq!(shot.distance(7), None);
        assert!(shot.remove_trace(2));
        assert_eq!(shot.num_traces(), 2);
    }

    #[test]
    fn test_pick_method() {
        assert_eq!("AIC".parse::<PickMethod>(), Ok(PickMethod::Aic));
        assert_eq!("hos".parse::<PickMethod>(), Ok(PickMethod::Hos));
        assert!("sta/lta".parse::<PickMethod>().is_err());
        assert_eq!(PickMethod::Aic.to_string(), "aic");
    }
}
