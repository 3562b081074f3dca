//! Parallel fan-out of per-trace picking
//!
//! Every (shot, trace) pair becomes an owned work unit. Units are picked on a worker pool and
//! return plain results, which the survey merges serially in (shot, trace) order.
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

use crate::error::{PickError, SurveyError};
use crate::shot::{self, Shot, ShotParameters};
use crate::waveform::Waveform;

/// Everything needed to pick one trace
#[derive(Debug, Clone)]
pub struct PickUnit {
    pub shotnumber: u32,
    pub trace_id: u32,
    waveform: Arc<Waveform>,
    parameters: ShotParameters,
    pickwindow: (f64, f64),
}

impl PickUnit {
    pub fn from_shot(shot: &Shot, trace_id: u32) -> Option<Self> {
        Some(Self {
            shotnumber: shot.shotnumber(),
            trace_id,
            waveform: Arc::clone(shot.waveform(trace_id)?),
            parameters: *shot.parameters(),
            pickwindow: shot.pickwindow(trace_id)?,
        })
    }

    pub fn run(&self) -> Result<f64, PickError> {
        shot::pick_onset(&self.waveform, &self.parameters, self.pickwindow)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PickResult {
    pub shotnumber: u32,
    pub trace_id: u32,
    pub outcome: Result<f64, PickError>,
}

/// Handle for cancelling a running batch
///
/// Units that have not started when the batch is cancelled are skipped. The flag stays set, so
/// a control has to be reset before it is used for another batch.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Clear a cancellation so that the next batch runs
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

type ProgressFn = dyn Fn(usize, usize) + Send + Sync;

/// Progress and cancellation hooks of a batch
#[derive(Clone, Default)]
pub struct BatchControl {
    cancel: CancelHandle,
    progress: Option<Arc<ProgressFn>>,
}

impl BatchControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `progress(completed, total)` after each finished unit
    pub fn with_progress(
        mut self,
        progress: impl Fn(usize, usize) + Send + Sync + 'static,
    ) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    fn report(&self, completed: usize, total: usize) {
        if let Some(progress) = &self.progress {
            progress(completed, total);
        };
    }
}

/// The results of a batch, sorted by shot number and trace ID
#[derive(Debug, Clone)]
pub struct Batch {
    pub results: Vec<PickResult>,
    pub total: usize,
}

impl Batch {
    pub fn is_complete(&self) -> bool {
        self.results.len() == self.total
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run a job on all units on a pool of `cores` threads
///
/// With one core, the units run on the calling thread. A panicking unit does not stop the other
/// units, but fails the whole batch.
///
/// # Returns
/// The results in (shot, trace) order, or `SurveyError::WorkerFailure` naming the first unit that
/// panicked.
pub fn run_units<F>(
    units: &[PickUnit],
    cores: usize,
    control: &BatchControl,
    job: F,
) -> Result<Batch, SurveyError>
where
    F: Fn(&PickUnit) -> Result<f64, PickError> + Sync,
{
    if cores < 1 {
        return Err(SurveyError::Configuration(format!(
            "The number of cores must be at least 1, got {cores}"
        )));
    };
    let total = units.len();
    let completed = AtomicUsize::new(0);

    let work = |unit: &PickUnit| -> Option<Result<PickResult, (u32, u32, String)>> {
        if control.cancel.is_cancelled() {
            return None;
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| job(unit)))
            .map(|outcome| PickResult {
                shotnumber: unit.shotnumber,
                trace_id: unit.trace_id,
                outcome,
            })
            .map_err(|payload| (unit.shotnumber, unit.trace_id, panic_message(payload)));

        control.report(completed.fetch_add(1, Ordering::SeqCst) + 1, total);
        Some(result)
    };

    let collected: Vec<Option<Result<PickResult, (u32, u32, String)>>> = match cores {
        1 => units.iter().map(&work).collect(),
        _ => rayon::ThreadPoolBuilder::new()
            .num_threads(cores)
            .build()?
            .install(|| units.par_iter().map(&work).collect()),
    };

    let mut results = Vec::<PickResult>::with_capacity(total);
    let mut failures = Vec::<(u32, u32, String)>::new();
    for item in collected.into_iter().flatten() {
        match item {
            Ok(result) => results.push(result),
            Err(failure) => failures.push(failure),
        }
    }

    if !failures.is_empty() {
        failures.sort_by_key(|(shotnumber, trace_id, _)| (*shotnumber, *trace_id));
        let failed_units = failures.len();
        let (shotnumber, trace_id, message) = failures.swap_remove(0);
        return Err(SurveyError::WorkerFailure {
            shotnumber,
            trace_id,
            message,
            failed_units,
        });
    };

    results.sort_by_key(|result| (result.shotnumber, result.trace_id));
    Ok(Batch { results, total })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::{BatchControl, PickUnit};
    use crate::error::SurveyError;
    use crate::synthetic;

    fn units() -> Vec<PickUnit> {
        (1..=2)
            .flat_map(|shotnumber| {
                let shot = synthetic::shot(shotnumber, 5, 6.);
                shot.trace_ids()
                    .into_iter()
                    .filter_map(|trace_id| PickUnit::from_shot(&shot, trace_id))
                    .collect::<Vec<PickUnit>>()
            })
            .collect()
    }

    #[test]
    fn test_run_units_deterministic() {
        let units = units();
        let serial = super::run_units(&units, 1, &BatchControl::new(), PickUnit::run).unwrap();
        let parallel = super::run_units(&units, 4, &BatchControl::new(), PickUnit::run).unwrap();

        assert!(serial.is_complete());
        assert_eq!(serial.total, 10);
        assert_eq!(serial.results, parallel.results);

        let order = serial
            .results
            .iter()
            .map(|r| (r.shotnumber, r.trace_id))
            .collect::<Vec<(u32, u32)>>();
        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(order, sorted);
    }

    #[test]
    fn test_zero_cores() {
        let result = super::run_units(&units(), 0, &BatchControl::new(), PickUnit::run);
        assert!(matches!(result, Err(SurveyError::Configuration(_))));
    }

    #[test]
    fn test_worker_failure() {
        let units = units();
        let result = super::run_units(&units, 3, &BatchControl::new(), |unit| {
            if unit.shotnumber == 2 && unit.trace_id >= 3 {
                panic!("corrupt trace");
            };
            unit.run()
        });

        match result {
            Err(SurveyError::WorkerFailure {
                shotnumber,
                trace_id,
                message,
                failed_units,
            }) => {
                assert_eq!((shotnumber, trace_id), (2, 3));
                assert_eq!(message, "corrupt trace");
                assert_eq!(failed_units, 3);
            }
            other => panic!("Expected a worker failure, got {other:?}"),
        }
    }

    #[test]
    fn test_progress() {
        let units = units();
        let calls = Arc::new(AtomicUsize::new(0));
        let last_total = Arc::new(AtomicUsize::new(0));

        let control = {
            let calls = Arc::clone(&calls);
            let last_total = Arc::clone(&last_total);
            BatchControl::new().with_progress(move |_, total| {
                calls.fetch_add(1, Ordering::SeqCst);
                last_total.store(total, Ordering::SeqCst);
            })
        };
        super::run_units(&units, 2, &control, PickUnit::run).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), units.len());
        assert_eq!(last_total.load(Ordering::SeqCst), units.len());
    }

    #[test]
    fn test_cancel() {
        let units = units();
        let control = BatchControl::new();
        let handle = control.cancel_handle();

        // Cancel from within the first unit. Serial execution makes the cut-off exact.
        let batch = super::run_units(&units, 1, &control, |unit| {
            handle.cancel();
            unit.run()
        })
        .unwrap();

        assert_eq!(batch.results.len(), 1);
        assert!(!batch.is_complete());
        assert!(control.cancel_handle().is_cancelled());

        // A cancelled control skips everything until it is reset
        let skipped = super::run_units(&units, 1, &control, PickUnit::run).unwrap();
        assert!(skipped.results.is_empty());

        control.cancel_handle().reset();
        let batch = super::run_units(&units, 1, &control, PickUnit::run).unwrap();
        assert!(batch.is_complete());
    }
}
