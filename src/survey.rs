//! Survey-wide picking and quality control of many shots
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use ndarray::Array1;
use ndarray_stats::{interpolate::Midpoint, Quantile1dExt};
use noisy_float::types::n64;

use crate::config::{PickOptions, SurveyConfig, WindowsConfig};
use crate::error::{PickError, SurveyError};
use crate::io;
use crate::picker::{self, BatchControl, PickUnit};
use crate::shot::{Shot, ShotParameters, SnrThreshold};

/// Picking state of a survey
///
/// `Unpicked -> Picking -> Picked`. A re-pick goes back to `Picking`, and only clearing all picks
/// returns to `Unpicked`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SurveyState {
    Unpicked,
    Picking,
    Picked,
}

/// The outcome of a picking run
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PickSummary {
    /// Traces with a valid pick after quality filtering
    pub picked: usize,
    pub total: usize,
    /// Traces that could not be picked at all
    pub failed: usize,
}

impl PickSummary {
    pub fn percent(&self) -> f64 {
        match self.total {
            0 => 0.,
            total => 100. * self.picked as f64 / total as f64,
        }
    }
}

impl std::fmt::Display for PickSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Picked {} / {} traces ({:.2} %)",
            self.picked,
            self.total,
            self.percent()
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShotStats {
    pub shotnumber: u32,
    pub numtraces: usize,
    pub picked_traces: usize,
    pub picked_percent: f64,
    /// Mean of all defined SNRs
    pub mean_snr: Option<f64>,
    pub mean_distance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SurveyStats {
    pub shots: Vec<ShotStats>,
    pub median_snr: Option<f64>,
}

impl std::fmt::Display for SurveyStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Shot\tTraces\tPicked\t\tMean SNR\tMean distance")?;
        for stats in &self.shots {
            writeln!(
                f,
                "{}\t{}\t{} ({:.1} %)\t{}\t\t{:.1} m",
                stats.shotnumber,
                stats.numtraces,
                stats.picked_traces,
                stats.picked_percent,
                stats
                    .mean_snr
                    .map(|snr| format!("{snr:.1}"))
                    .unwrap_or_else(|| "-".to_string()),
                stats.mean_distance,
            )?;
        }
        match self.median_snr {
            Some(median) => write!(f, "Median SNR:\t{median:.2}"),
            None => write!(f, "Median SNR:\t-"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Survey {
    shots: BTreeMap<u32, Shot>,
    state: SurveyState,
    snr_policy: SnrThreshold,
    obsdir: Option<PathBuf>,
    pub log: Vec<String>,
}

impl Survey {
    pub fn from_shots(shots: Vec<Shot>) -> Result<Self, SurveyError> {
        if shots.is_empty() {
            return Err(SurveyError::Configuration(
                "A survey needs at least one shot".to_string(),
            ));
        };
        Ok(Self {
            shots: shots
                .into_iter()
                .map(|shot| (shot.shotnumber(), shot))
                .collect(),
            state: SurveyState::Unpicked,
            snr_policy: SnrThreshold::default(),
            obsdir: None,
            log: Vec::new(),
        })
    }

    /// Load a survey from shot files and source/receiver coordinate files
    ///
    /// Shots without a file are skipped. Traces without receiver coordinates are removed, and
    /// receivers without a trace are ignored.
    ///
    /// # Returns
    /// The survey, or `SurveyError::NoShotFiles` if not a single shot file was found.
    pub fn load(config: &SurveyConfig, windows: &WindowsConfig) -> Result<Self, SurveyError> {
        let start_time = SystemTime::now();
        let sources = io::load_coordinates(&config.source_file)?;
        let receivers = io::load_coordinates(&config.receiver_file)?;

        let mut shots = Vec::<Shot>::new();
        let mut missing_files = 0_usize;
        let mut removed_traces = 0_usize;
        let mut missing_traces = 0_usize;
        for (shotnumber, source) in sources {
            let filepath = config.shot_path(shotnumber);
            if !filepath.is_file() {
                tracing::warn!("No file for shot {shotnumber}: {filepath:?}");
                missing_files += 1;
                continue;
            };
            let waveform = io::load_shot(&filepath)?;

            let data_ids = waveform.trace_ids();
            let mut shot = Shot::new(shotnumber, source, ShotParameters::default());
            let mut removed = Vec::<u32>::new();
            for channel in waveform.channels {
                match receivers.get(&channel.stats.trace_id) {
                    Some(receiver) => shot.add_trace(channel, *receiver),
                    None => removed.push(channel.stats.trace_id),
                };
            }
            if !removed.is_empty() {
                tracing::warn!(
                    "Shot {shotnumber}: removed trace(s) {removed:?} without receiver coordinates"
                );
                removed_traces += removed.len();
            };

            let missing = receivers
                .keys()
                .filter(|id| !data_ids.contains(*id))
                .count();
            if missing > 0 {
                tracing::debug!("Shot {shotnumber}: {missing} receiver(s) without a trace");
                missing_traces += missing;
            };
            shots.push(shot);
        }

        if shots.is_empty() {
            return Err(SurveyError::NoShotFiles {
                obsdir: config.obsdir.clone(),
            });
        };

        let mut survey = Self::from_shots(shots)?;
        survey.obsdir = Some(config.obsdir.clone());
        survey.log_event(
            "load",
            &format!(
                "Loaded {} shots from {:?} ({} missing shot files, {} traces without receiver, \
                 {} receivers without trace)",
                survey.shots.len(),
                config.obsdir,
                missing_files,
                removed_traces,
                missing_traces
            ),
            start_time,
        );
        tracing::info!(
            "Loaded {} shots with {} traces",
            survey.shots.len(),
            survey.count_all_traces()
        );

        survey.set_initial_pickwindow();
        survey.set_parameters_for_all_shots(windows);
        Ok(survey)
    }

    pub fn shots(&self) -> impl Iterator<Item = &Shot> {
        self.shots.values()
    }

    pub fn shot(&self, shotnumber: u32) -> Option<&Shot> {
        self.shots.get(&shotnumber)
    }

    pub fn shot_mut(&mut self, shotnumber: u32) -> Option<&mut Shot> {
        self.shots.get_mut(&shotnumber)
    }

    pub fn shotnumbers(&self) -> Vec<u32> {
        self.shots.keys().copied().collect()
    }

    pub fn state(&self) -> SurveyState {
        self.state
    }

    pub fn is_picked(&self) -> bool {
        self.state == SurveyState::Picked
    }

    fn log_event(&mut self, step_name: &str, event: &str, start_time: SystemTime) {
        let duration = SystemTime::now()
            .duration_since(start_time)
            .map(|d| d.as_secs_f32())
            .unwrap_or(0.);
        self.log
            .push(format!("{step_name} (duration: {duration:.2}s):\t{event}"));
    }

    /// Restrict the pick window of every trace to its length and cut every shot to its traces
    pub fn set_initial_pickwindow(&mut self) {
        for shot in self.shots.values_mut() {
            let durations = shot
                .trace_ids()
                .into_iter()
                .filter_map(|trace_id| {
                    let duration = shot.waveform(trace_id)?.primary().ok()?.stats.duration();
                    Some((trace_id, duration))
                })
                .collect::<Vec<(u32, f64)>>();

            for (trace_id, duration) in &durations {
                shot.set_pickwindow(*trace_id, (0., *duration));
            }
            if let Some((_, first)) = durations.first() {
                if durations.iter().any(|(_, d)| d != first) {
                    tracing::warn!(
                        "Trace lengths differ in shot {}. The cut window is set from the first trace.",
                        shot.shotnumber()
                    );
                };
                shot.parameters_mut().cut = (0., *first);
            };
        }
    }

    /// Set the timing parameters of all shots
    pub fn set_parameters_for_all_shots(&mut self, windows: &WindowsConfig) {
        let start_time = SystemTime::now();
        if windows == &WindowsConfig::default() {
            tracing::warn!(
                "Setting default timing parameters for all shots. Make sure they suit the data."
            );
        };
        for shot in self.shots.values_mut() {
            windows.apply(shot.parameters_mut());
        }
        self.log_event(
            "set_parameters",
            &format!(
                "cut: {:?} s, tmovwind: {} s, tsignal: {} s, tgap: {} s, order: {}",
                windows.cutwindow,
                windows.tmovwind,
                windows.tsignal,
                windows.tgap,
                windows.order.order()
            ),
            start_time,
        );
    }

    /// Set the SNR threshold policy of all shots
    ///
    /// Stored thresholds are updated immediately, and valid automatic picks whose SNR no longer
    /// reaches their threshold are removed. Call [`Survey::recover`] to re-validate picks that
    /// were removed with an older, higher threshold.
    ///
    /// # Returns
    /// The number of removed picks.
    pub fn set_snr_threshold(&mut self, policy: SnrThreshold) -> usize {
        self.snr_policy = policy;
        let mut removed = 0_usize;
        for shot in self.shots.values_mut() {
            shot.set_snr_threshold_policy(policy);

            for trace_id in shot.trace_ids() {
                if !shot.pick_flag(trace_id) || shot.revised(trace_id) {
                    continue;
                };
                // Picks without an SNR are left to the next SNR filter
                let (Some(snr), Some(threshold)) =
                    (shot.snr(trace_id), shot.snr_threshold(trace_id))
                else {
                    continue;
                };
                if !snr.passes(threshold) {
                    shot.remove_pick(trace_id);
                    removed += 1;
                };
            }
        }
        if removed > 0 {
            tracing::info!("Removed {removed} picks below the new SNR threshold");
        };
        removed
    }

    pub fn snr_threshold(&self) -> SnrThreshold {
        self.snr_policy
    }

    /// Pick all traces of all shots
    pub fn pick_all_shots(&mut self, options: &PickOptions) -> Result<PickSummary, SurveyError> {
        self.pick_all_shots_with(options, &BatchControl::default())
    }

    /// Pick all traces of all shots with progress reporting and cancellation
    ///
    /// Revised (manual) picks are kept. After picking, picks are filtered by their SNR and the
    /// earliest and latest possible picks are derived. If the survey is already picked and
    /// `options.repick` is false, nothing is recomputed.
    ///
    /// # Returns
    /// A summary of the picked traces. A cancelled batch keeps the merged picks, leaves the survey
    /// unpicked and returns `SurveyError::Cancelled`.
    pub fn pick_all_shots_with(
        &mut self,
        options: &PickOptions,
        control: &BatchControl,
    ) -> Result<PickSummary, SurveyError> {
        self.pick_all_shots_by(options, control, PickUnit::run)
    }

    fn pick_all_shots_by<F>(
        &mut self,
        options: &PickOptions,
        control: &BatchControl,
        job: F,
    ) -> Result<PickSummary, SurveyError>
    where
        F: Fn(&PickUnit) -> Result<f64, PickError> + Sync,
    {
        options.validate()?;

        if self.is_picked() && !options.repick {
            tracing::info!("The survey is already picked. Use repick to pick it again.");
            return Ok(self.summary(0));
        };
        let start_time = SystemTime::now();

        if options.repick {
            self.clear_all_picks();
        };
        self.state = SurveyState::Picking;

        let mut units = Vec::<PickUnit>::new();
        for shot in self.shots.values_mut() {
            options.apply(shot.parameters_mut());
            let shot: &Shot = shot;
            units.extend(
                shot.trace_ids()
                    .into_iter()
                    .filter(|trace_id| !shot.revised(*trace_id))
                    .filter_map(|trace_id| PickUnit::from_shot(shot, trace_id)),
            );
        }

        match options.cores {
            1 => tracing::info!("Picking {} traces serially", units.len()),
            cores => tracing::info!("Picking {} traces in parallel on {cores} cores", units.len()),
        };

        let batch = match picker::run_units(&units, options.cores, control, job) {
            Ok(batch) => batch,
            Err(e) => {
                self.state = SurveyState::Unpicked;
                return Err(e);
            }
        };

        let mut failed = 0_usize;
        for result in &batch.results {
            let Some(shot) = self.shots.get_mut(&result.shotnumber) else {
                continue;
            };
            match &result.outcome {
                Ok(time) => shot.set_pick(result.trace_id, Some(*time), false),
                Err(e) => {
                    tracing::debug!(
                        "Could not pick shot {} trace {}: {e}",
                        result.shotnumber,
                        result.trace_id
                    );
                    failed += 1;
                    shot.set_pick(result.trace_id, None, false);
                }
            };
        }

        if !batch.is_complete() {
            self.state = SurveyState::Unpicked;
            self.log_event(
                "pick_all_shots",
                &format!(
                    "Cancelled after {} of {} traces",
                    batch.results.len(),
                    batch.total
                ),
                start_time,
            );
            return Err(SurveyError::Cancelled {
                completed: batch.results.len(),
                total: batch.total,
            });
        };

        let removed = self.filter_snr();
        self.set_earllate();
        self.state = SurveyState::Picked;

        let summary = self.summary(failed);
        self.log_event(
            "pick_all_shots",
            &format!(
                "method: {}, vmin: {} m/s, vmax: {} m/s, folm: {}, aicwindow: {:?}. \
                 {} ({} failed, {} removed by SNR)",
                options.method,
                options.vmin,
                options.vmax,
                options.folm,
                options.aicwindow,
                summary,
                failed,
                removed
            ),
            start_time,
        );
        tracing::info!("{summary}");
        Ok(summary)
    }

    fn summary(&self, failed: usize) -> PickSummary {
        PickSummary {
            picked: self.shots.values().map(|shot| shot.count_picked()).sum(),
            total: self.count_all_traces(),
            failed,
        }
    }

    /// Calculate the SNR of all picks and invalidate automatic picks that are not positive or
    /// have a too low SNR
    ///
    /// Revised picks get an SNR but are never invalidated.
    ///
    /// # Returns
    /// The number of invalidated picks.
    pub fn filter_snr(&mut self) -> usize {
        let mut removed = 0_usize;
        for shot in self.shots.values_mut() {
            for trace_id in shot.trace_ids() {
                let snr = shot.set_snr(trace_id);
                if shot.revised(trace_id) {
                    continue;
                };
                let Some(time) = shot.pick(trace_id) else {
                    continue;
                };
                let threshold = shot.snr_threshold(trace_id).unwrap_or(f64::INFINITY);
                if time <= 0. || !snr.map(|s| s.passes(threshold)).unwrap_or(false) {
                    shot.remove_pick(trace_id);
                    removed += 1;
                };
            }
        }
        tracing::debug!("Removed {removed} picks with a too low SNR");
        removed
    }

    /// Derive the earliest and latest possible picks of all traces with an SNR above 1
    ///
    /// # Returns
    /// The number of traces that got bounds.
    pub fn set_earllate(&mut self) -> usize {
        let mut count = 0_usize;
        for shot in self.shots.values_mut() {
            for trace_id in shot.trace_ids() {
                if !shot.snr(trace_id).map(|s| s.ratio > 1.).unwrap_or(false) {
                    continue;
                };
                match shot.set_earllatepick(trace_id) {
                    Ok(_) => count += 1,
                    Err(e) => tracing::debug!(
                        "No earliest/latest pick for shot {} trace {trace_id}: {e}",
                        shot.shotnumber()
                    ),
                };
            }
        }
        count
    }

    /// Re-validate removed picks that pass the current SNR threshold
    ///
    /// # Returns
    /// The number of recovered picks.
    pub fn recover(&mut self) -> usize {
        let start_time = SystemTime::now();
        let mut recovered = 0_usize;
        for shot in self.shots.values_mut() {
            for trace_id in shot.trace_ids() {
                if shot.pick_flag(trace_id) || shot.revised(trace_id) {
                    continue;
                };
                let Some(time) = shot.pick_including_removed(trace_id) else {
                    continue;
                };
                let snr = shot.set_snr(trace_id);
                let threshold = shot.snr_threshold(trace_id).unwrap_or(f64::INFINITY);
                if time > 0. && snr.map(|s| s.passes(threshold)).unwrap_or(false) {
                    shot.set_pick_flag(trace_id, true);
                    recovered += 1;
                };
            }
        }
        self.log_event("recover", &format!("Recovered {recovered} picks"), start_time);
        tracing::info!("Recovered {recovered} picks");
        recovered
    }

    /// Invalidate picks with a symmetric pick error larger than `max_spe`
    ///
    /// # Returns
    /// The number of invalidated picks.
    pub fn clean_by_spe(&mut self, max_spe: f64) -> usize {
        let start_time = SystemTime::now();
        let mut removed = 0_usize;
        for shot in self.shots.values_mut() {
            for trace_id in shot.trace_ids() {
                if !shot.pick_flag(trace_id) || shot.revised(trace_id) {
                    continue;
                };
                if shot
                    .symmetric_pick_error(trace_id)
                    .map(|spe| spe > max_spe)
                    .unwrap_or(false)
                {
                    shot.set_pick_flag(trace_id, false);
                    removed += 1;
                };
            }
        }
        self.log_event(
            "clean_by_spe",
            &format!("Removed {removed} picks with a symmetric pick error above {max_spe} s"),
            start_time,
        );
        removed
    }

    /// Clear all automatic picks. Revised picks are kept.
    pub fn clear_all_picks(&mut self) {
        for shot in self.shots.values_mut() {
            for trace_id in shot.trace_ids() {
                if !shot.revised(trace_id) {
                    shot.clear_pick(trace_id);
                };
            }
        }
        self.state = SurveyState::Unpicked;
    }

    /// Set a revised pick of one receiver on every shot
    pub fn set_artificial_pick(&mut self, trace_id: u32, time: f64) {
        for shot in self.shots.values_mut() {
            shot.set_pick(trace_id, Some(time), true);
            let cut = shot.parameters().cut;
            shot.set_pickwindow(trace_id, cut);
        }
    }

    pub fn count_all_traces(&self) -> usize {
        self.shots.values().map(|shot| shot.num_traces()).sum()
    }

    /// The number of valid picks, or zero if the survey is not picked
    pub fn count_all_picked_traces(&self) -> usize {
        match self.is_picked() {
            true => self.shots.values().map(|shot| shot.count_picked()).sum(),
            false => 0,
        }
    }

    /// The number of revised picks, or zero if the survey is not picked
    pub fn count_all_revised_traces(&self) -> usize {
        match self.is_picked() {
            true => self.shots.values().map(|shot| shot.count_revised()).sum(),
            false => 0,
        }
    }

    pub fn count_picked_traces(&self, shotnumber: u32) -> Option<usize> {
        self.shots.get(&shotnumber).map(|shot| shot.count_picked())
    }

    pub fn stats(&self) -> SurveyStats {
        let mut all_snrs = Vec::<f64>::new();

        let shots = self
            .shots
            .values()
            .map(|shot| {
                let trace_ids = shot.trace_ids();
                let snrs = trace_ids
                    .iter()
                    .filter_map(|trace_id| shot.snr(*trace_id))
                    .map(|snr| snr.ratio)
                    .filter(|ratio| ratio.is_finite())
                    .collect::<Vec<f64>>();
                let distances = Array1::from_iter(
                    trace_ids
                        .iter()
                        .filter_map(|trace_id| shot.distance(*trace_id)),
                );
                all_snrs.extend(&snrs);

                let numtraces = trace_ids.len();
                let picked_traces = shot.count_picked();
                ShotStats {
                    shotnumber: shot.shotnumber(),
                    numtraces,
                    picked_traces,
                    picked_percent: match numtraces {
                        0 => 0.,
                        n => 100. * picked_traces as f64 / n as f64,
                    },
                    mean_snr: Array1::from_vec(snrs).mean(),
                    mean_distance: distances.mean().unwrap_or(0.),
                }
            })
            .collect();

        let mut snrs = Array1::from_iter(all_snrs.into_iter().map(n64));
        let median_snr = snrs
            .quantile_mut(n64(0.5), &Midpoint)
            .ok()
            .map(|median| median.raw());

        SurveyStats { shots, median_snr }
    }

    /// Read manual picks from "<shotnumber>.pck" files in a directory
    ///
    /// # Returns
    /// The number of manual picks that matched a trace of the survey.
    pub fn set_manual_picks_from_files(&mut self, directory: &Path) -> Result<usize, SurveyError> {
        let mut count = 0_usize;
        for (shotnumber, picks) in io::load_manual_picks(directory)? {
            let Some(shot) = self.shots.get_mut(&shotnumber) else {
                tracing::warn!("Manual picks for unknown shot {shotnumber}");
                continue;
            };
            for (trace_id, time) in picks {
                if shot.waveform(trace_id).is_some() {
                    shot.set_manual_pick(trace_id, time);
                    count += 1;
                };
            }
        }
        tracing::info!("Read {count} manual picks from {directory:?}");
        Ok(count)
    }

    /// Automatic minus manual pick of every trace with a valid pick and a manual pick
    pub fn diffs_from_manual(&self) -> BTreeMap<u32, BTreeMap<u32, f64>> {
        self.shots
            .values()
            .map(|shot| {
                let diffs = shot
                    .trace_ids()
                    .into_iter()
                    .filter_map(|trace_id| {
                        Some((trace_id, shot.pick(trace_id)? - shot.manual_pick(trace_id)?))
                    })
                    .collect();
                (shot.shotnumber(), diffs)
            })
            .collect()
    }
}

impl std::fmt::Display for Survey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            SurveyState::Unpicked => "unpicked",
            SurveyState::Picking => "picking",
            SurveyState::Picked => "picked",
        };
        write!(
            f,
            "
Survey
------
Observation directory:\t{}
Shots:\t\t\t{}
Traces:\t\t\t{}
State:\t\t\t{}
Picked traces:\t\t{}
Revised traces:\t\t{}
",
            self.obsdir
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string()),
            self.shots.len(),
            self.count_all_traces(),
            state,
            self.count_all_picked_traces(),
            self.count_all_revised_traces(),
        )
    }
}
