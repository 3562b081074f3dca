//! Read-only waveform container consumed by the pickers
use ndarray::{s, Array1, ArrayView1};

use crate::error::PickError;
use crate::tools;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Stats {
    pub trace_id: u32,
    pub sampling_rate: f64,
    pub delta: f64,
    pub npts: usize,
    /// Seconds since UNIX epoch
    pub starttime: f64,
}

impl Stats {
    pub fn new(trace_id: u32, sampling_rate: f64, npts: usize, starttime: f64) -> Self {
        Self {
            trace_id,
            sampling_rate,
            delta: 1. / sampling_rate,
            npts,
            starttime,
        }
    }

    pub fn endtime(&self) -> f64 {
        self.starttime + self.duration()
    }

    pub fn duration(&self) -> f64 {
        self.npts.saturating_sub(1) as f64 * self.delta
    }
}

#[derive(Debug, Clone)]
pub struct Channel {
    pub data: Array1<f64>,
    pub stats: Stats,
}

impl Channel {
    pub fn new(trace_id: u32, sampling_rate: f64, starttime: f64, data: Array1<f64>) -> Self {
        let stats = Stats::new(trace_id, sampling_rate, data.len(), starttime);
        Self { data, stats }
    }

    /// Sample index range of a cut window given in seconds relative to the channel start.
    ///
    /// `(0, 0)` selects the full channel and `(0, end)` cuts from the first sample. The range is
    /// clamped to the data.
    pub fn cut_range(&self, cut: (f64, f64)) -> std::ops::Range<usize> {
        let len = self.data.len();
        // The small offset keeps e.g. 0.7 / 0.1 from flooring to 6.
        let to_index = |t: f64| ((t / self.stats.delta + 1e-9).max(0.) as usize).min(len);

        let start = to_index(cut.0);
        let stop = if cut.1 <= 0. { len } else { to_index(cut.1) };

        start..stop.max(start)
    }

    pub fn cut(&self, cut: (f64, f64)) -> ArrayView1<f64> {
        let range = self.cut_range(cut);
        self.data.slice(s![range])
    }
}

/// A sequence of 1..3 channel records of one recording
#[derive(Debug, Clone)]
pub struct Waveform {
    pub channels: Vec<Channel>,
}

impl Waveform {
    pub fn new(channels: Vec<Channel>) -> Self {
        Self { channels }
    }

    pub fn single(channel: Channel) -> Self {
        Self {
            channels: vec![channel],
        }
    }

    /// The first channel, which all pickers operate on.
    ///
    /// # Returns
    /// The channel, or `PickError::InvalidInputKind` if the waveform cannot be picked on.
    pub fn primary(&self) -> Result<&Channel, PickError> {
        let channel = self
            .channels
            .first()
            .ok_or_else(|| PickError::InvalidInputKind("waveform has no channels".to_string()))?;

        if !(channel.stats.delta.is_finite() && channel.stats.delta > 0.) {
            return Err(PickError::InvalidInputKind(format!(
                "invalid sample interval: {}",
                channel.stats.delta
            )));
        };
        Ok(channel)
    }

    /// Find the channel of a trace ID.
    pub fn channel(&self, trace_id: u32) -> Option<&Channel> {
        self.channels
            .iter()
            .find(|channel| channel.stats.trace_id == trace_id)
    }

    pub fn trace_ids(&self) -> Vec<u32> {
        self.channels
            .iter()
            .map(|channel| channel.stats.trace_id)
            .collect()
    }

    /// The earliest start and latest end time of all channels.
    pub fn full_range(&self) -> Option<(f64, f64)> {
        let min_start = self
            .channels
            .iter()
            .map(|channel| channel.stats.starttime)
            .reduce(f64::min)?;
        let max_end = self
            .channels
            .iter()
            .map(|channel| channel.stats.endtime())
            .reduce(f64::max)?;
        Some((min_start, max_end))
    }
}

impl std::fmt::Display for Waveform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (start, end) = self.full_range().unwrap_or((0., 0.));
        let sampling_rate = self
            .channels
            .first()
            .map(|channel| channel.stats.sampling_rate)
            .unwrap_or(0.);
        write!(
            f,
            "
Waveform
--------
Channels:\t\t{}
Sampling rate:\t\t{} Hz
Start time:\t\t{}
Stop time:\t\t{}
",
            self.channels.len(),
            sampling_rate,
            tools::seconds_to_rfc3339(start),
            tools::seconds_to_rfc3339(end),
        )
    }
}
