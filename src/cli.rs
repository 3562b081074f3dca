/// Functions to handle the command line interface (CLI)
use std::path::PathBuf;

use clap::Parser;

use crate::config::PickingConfig;
use crate::error::SurveyError;
use crate::io;
use crate::picker::BatchControl;
use crate::shot::{PickMethod, SnrThreshold};
use crate::survey::{PickSummary, Survey};
use crate::tools;

#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(group(
        clap::ArgGroup::new("exit_choice")
        .required(false)
        .args(&["show_config", "info", "output"]),
    ))
]
pub struct Args {
    /// Picking configuration (TOML). See "--show-config" for the defaults.
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Directory of the shot files
    #[clap(long)]
    obsdir: Option<PathBuf>,

    /// Picking method: "hos" or "aic"
    #[clap(short, long)]
    method: Option<PickMethod>,

    /// Number of cores to pick on
    #[clap(long)]
    cores: Option<usize>,

    /// Lowest apparent velocity in m/s
    #[clap(long)]
    vmin: Option<f64>,

    /// Highest apparent velocity in m/s
    #[clap(long)]
    vmax: Option<f64>,

    /// Fraction of the local maximum of the HOS function that marks the onset, e.g. 0.6
    #[clap(long)]
    folm: Option<f64>,

    /// Samples (left,right) around the HOS pick to search the AIC minimum in, e.g. "15,0"
    #[clap(long)]
    aic_window: Option<String>,

    /// Length of the signal window (e.g. "30 ms")
    #[clap(long)]
    tsignal: Option<String>,

    /// Gap between the noise window and the pick (e.g. "0.7 ms")
    #[clap(long)]
    tgap: Option<String>,

    /// Length of the moving window of the HOS function (e.g. "300 ms")
    #[clap(long)]
    tmovwind: Option<String>,

    /// Constant SNR threshold that picks have to reach
    #[clap(long)]
    snr_threshold: Option<f64>,

    /// Invalidate picks with a larger symmetric pick error (in seconds)
    #[clap(long)]
    max_spe: Option<f64>,

    /// Directory of manual "<shotnumber>.pck" picks to compare with
    #[clap(long)]
    manual_picks: Option<PathBuf>,

    /// Output CSV filename. Defaults to "picks.csv" in the observation directory
    #[clap(short, long)]
    output: Option<PathBuf>,

    /// Only load the survey and show its metadata
    #[clap(short, long)]
    info: bool,

    /// Suppress progress messages
    #[clap(short, long)]
    quiet: bool,

    /// Show the default configuration and exit
    #[clap(long)]
    show_config: bool,
}

/// Everything needed to load, pick and export a survey
#[derive(Debug, Clone)]
pub struct RunParams {
    pub config: PickingConfig,
    pub output_path: Option<PathBuf>,
    pub manual_picks: Option<PathBuf>,
    pub only_info: bool,
    pub quiet: bool,
}

enum ParsedArgs {
    Params(Box<RunParams>),
    Error(String),
    Done,
}

fn parse_seconds(name: &str, value: &Option<String>) -> Result<Option<f64>, String> {
    match value {
        Some(string) => parse_duration::parse(string)
            .map(|d| Some(d.as_secs_f64()))
            .map_err(|e| format!("Error parsing --{name} string: {e:?}")),
        None => Ok(None),
    }
}

impl Args {
    pub fn quiet(&self) -> bool {
        self.quiet
    }

    fn parse_params(&self) -> ParsedArgs {
        // If the user only wants to show the default configuration, stop here.
        if self.show_config {
            return match PickingConfig::default().to_toml() {
                Ok(content) => {
                    println!("{content}");
                    ParsedArgs::Done
                }
                Err(e) => ParsedArgs::Error(e.to_string()),
            };
        };

        let mut config = match &self.config {
            Some(filepath) => match PickingConfig::from_file(filepath) {
                Ok(c) => c,
                Err(e) => return ParsedArgs::Error(e.to_string()),
            },
            None => PickingConfig::default(),
        };

        if let Some(obsdir) = &self.obsdir {
            config.survey.obsdir = obsdir.clone();
        };
        if let Some(method) = self.method {
            config.picking.method = method;
        };
        if let Some(cores) = self.cores {
            config.picking.cores = cores;
        };
        if let Some(vmin) = self.vmin {
            config.picking.vmin = vmin;
        };
        if let Some(vmax) = self.vmax {
            config.picking.vmax = vmax;
        };
        if let Some(folm) = self.folm {
            config.picking.folm = folm;
        };
        if let Some(aic_window) = &self.aic_window {
            match tools::parse_pair::<usize>(aic_window) {
                Ok(pair) => config.picking.aicwindow = pair,
                Err(e) => return ParsedArgs::Error(format!("Error parsing --aic-window: {e}")),
            };
        };

        for (name, value, target) in [
            ("tsignal", &self.tsignal, &mut config.windows.tsignal),
            ("tgap", &self.tgap, &mut config.windows.tgap),
            ("tmovwind", &self.tmovwind, &mut config.windows.tmovwind),
        ] {
            match parse_seconds(name, value) {
                Ok(Some(seconds)) => *target = seconds,
                Ok(None) => (),
                Err(e) => return ParsedArgs::Error(e),
            };
        }

        if let Some(threshold) = self.snr_threshold {
            config.quality.snr_threshold = SnrThreshold::Constant(threshold);
        };
        if let Some(max_spe) = self.max_spe {
            config.quality.max_spe = Some(max_spe);
        };

        if let Err(e) = config.validate() {
            return ParsedArgs::Error(e.to_string());
        };

        ParsedArgs::Params(Box::new(RunParams {
            config,
            output_path: self.output.clone(),
            manual_picks: self.manual_picks.clone(),
            only_info: self.info,
            quiet: self.quiet,
        }))
    }
}

/// Load, pick, filter and export a survey
pub fn run(params: RunParams) -> Result<(), SurveyError> {
    let config = params.config;
    let mut survey = Survey::load(&config.survey, &config.windows)?;
    survey.set_snr_threshold(config.quality.snr_threshold);

    if params.only_info {
        println!("{survey}");
        return Ok(());
    };

    if let Some(directory) = &params.manual_picks {
        survey.set_manual_picks_from_files(directory)?;
    };

    let mut control = BatchControl::new();
    if !params.quiet {
        control = control.with_progress(|completed, total| {
            if completed == total || completed % (total / 100).max(1) == 0 {
                eprint!("\rPicked {completed} / {total} traces");
                if completed == total {
                    eprintln!();
                };
            };
        });
    };
    let summary = survey.pick_all_shots_with(&config.picking, &control)?;

    if let Some(max_spe) = config.quality.max_spe {
        survey.clean_by_spe(max_spe);
    };

    // The summary is always shown, also when nothing could be picked.
    println!(
        "{}",
        PickSummary {
            picked: survey.count_all_picked_traces(),
            ..summary
        }
    );

    if !params.quiet {
        println!("{}", survey.stats());

        if params.manual_picks.is_some() {
            let diffs = survey
                .diffs_from_manual()
                .into_values()
                .flat_map(|diffs| diffs.into_values())
                .collect::<Vec<f64>>();
            if !diffs.is_empty() {
                println!(
                    "Mean difference to manual picks: {:.4} s ({} picks)",
                    diffs.iter().sum::<f64>() / diffs.len() as f64,
                    diffs.len()
                );
            };
        };
    };

    let output_path = params
        .output_path
        .unwrap_or_else(|| config.survey.obsdir.join("picks.csv"));
    io::export_picks(&survey, &output_path)?;
    if !params.quiet {
        println!("Exported picks to {output_path:?}");
    };
    Ok(())
}

/// Run the main CLI functionality based on the given arguments
///
/// # Arguments
/// - `arguments`: The Args object containing the parsed arguments.
///
/// # Returns
/// The appropriate exit code.
pub fn main(arguments: Args) -> i32 {
    match arguments.parse_params() {
        ParsedArgs::Params(params) => match run(*params) {
            Ok(_) => 0,
            Err(e) => error(&e.to_string(), 1),
        },
        ParsedArgs::Error(message) => error(&message, 1),
        ParsedArgs::Done => 0,
    }
}

/// Print an error to /dev/stderr and return an exit code
///
/// # Arguments
/// - `message`: The message to print to /dev/stderr
/// - `code`: The exit code
///
/// # Returns
/// The same exit code that was provided
fn error(message: &str, code: i32) -> i32 {
    eprintln!("{}", message);
    code
}
