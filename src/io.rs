//! Functions to read shot files, coordinates and manual picks, and to export picks
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

use ndarray::Array1;

use crate::error::SurveyError;
use crate::shot::Coordinate;
use crate::survey::Survey;
use crate::waveform::{Channel, Waveform};
use crate::{tools, PROGRAM_NAME, PROGRAM_VERSION};

/// Metadata of a shot file
#[derive(Debug, Clone, PartialEq)]
pub struct ShotHeader {
    pub sampling_rate: f64,
    pub samples: usize,
    /// Seconds since UNIX epoch
    pub start_time: f64,
    pub trace_ids: Vec<u32>,
    pub bin_filepath: PathBuf,
}

/// Load the header of a shot file
///
/// The header has one `KEY: value` pair per line. The samples are in a ".bin" file of the same
/// name.
pub fn load_header(filepath: &Path) -> Result<ShotHeader, SurveyError> {
    let content = std::fs::read_to_string(filepath).map_err(|e| SurveyError::io(filepath, e))?;

    let data: HashMap<&str, &str> = content
        .lines()
        .filter_map(|s| s.split_once(':'))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect();

    let get = |key: &str| {
        data.get(key)
            .copied()
            .ok_or_else(|| SurveyError::parse(filepath, 0, format!("No '{key}' key in metadata")))
    };
    let invalid = |key: &str, value: &str| {
        SurveyError::parse(filepath, 0, format!("Invalid '{key}' value: {value}"))
    };

    let value = get("SAMPLING RATE")?;
    let sampling_rate = value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.)
        .ok_or_else(|| invalid("SAMPLING RATE", value))?;

    let value = get("SAMPLES")?;
    let samples = value
        .parse::<usize>()
        .map_err(|_| invalid("SAMPLES", value))?;

    let start_time = match data.get("START TIME") {
        Some(value) => {
            let datetime = chrono::DateTime::parse_from_rfc3339(value)
                .map_err(|_| invalid("START TIME", value))?;
            datetime.timestamp() as f64 + datetime.timestamp_subsec_nanos() as f64 * 1e-9
        }
        None => 0.,
    };

    let value = get("TRACE IDS")?;
    let trace_ids = value
        .split(',')
        .map(|s| s.trim().parse::<u32>())
        .collect::<Result<Vec<u32>, _>>()
        .map_err(|_| invalid("TRACE IDS", value))?;

    let bin_filepath = filepath.with_extension("bin");
    if !bin_filepath.is_file() {
        return Err(SurveyError::io(
            &bin_filepath,
            std::io::Error::new(std::io::ErrorKind::NotFound, "File not found"),
        ));
    };

    Ok(ShotHeader {
        sampling_rate,
        samples,
        start_time,
        trace_ids,
        bin_filepath,
    })
}

/// Load the samples of a shot, stored as little-endian f32 values trace after trace
pub fn load_bin(header: &ShotHeader) -> Result<Vec<Array1<f64>>, SurveyError> {
    let bytes =
        std::fs::read(&header.bin_filepath).map_err(|e| SurveyError::io(&header.bin_filepath, e))?;

    let expected = header.samples * header.trace_ids.len() * 4;
    if bytes.len() != expected {
        return Err(SurveyError::parse(
            &header.bin_filepath,
            0,
            format!("Expected {expected} bytes, found {}", bytes.len()),
        ));
    };

    let data: Vec<f64> = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64)
        .collect();

    Ok(data
        .chunks(header.samples.max(1))
        .take(header.trace_ids.len())
        .map(|trace| Array1::from_vec(trace.to_vec()))
        .collect())
}

/// Load a shot file (header and samples) into a waveform with one channel per trace
pub fn load_shot(filepath: &Path) -> Result<Waveform, SurveyError> {
    let header = load_header(filepath)?;
    let traces = match header.samples {
        0 => vec![Array1::<f64>::zeros(0); header.trace_ids.len()],
        _ => load_bin(&header)?,
    };

    Ok(Waveform::new(
        header
            .trace_ids
            .iter()
            .zip(traces)
            .map(|(trace_id, data)| {
                Channel::new(*trace_id, header.sampling_rate, header.start_time, data)
            })
            .collect(),
    ))
}

/// Write a waveform as a shot file. All channels need the same length and sampling rate.
pub fn write_shot(filepath: &Path, waveform: &Waveform) -> Result<(), SurveyError> {
    let first = waveform
        .channels
        .first()
        .ok_or_else(|| SurveyError::Configuration("Cannot write a shot without traces".into()))?;
    if waveform
        .channels
        .iter()
        .any(|c| {
            c.stats.npts != first.stats.npts || c.stats.sampling_rate != first.stats.sampling_rate
        })
    {
        return Err(SurveyError::Configuration(
            "All traces of a shot need the same length and sampling rate".into(),
        ));
    };

    let trace_ids = waveform
        .trace_ids()
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<String>>()
        .join(",");
    let header = format!(
        "SAMPLING RATE: {}\nSAMPLES: {}\nSTART TIME: {}\nTRACE IDS: {}\n",
        first.stats.sampling_rate,
        first.stats.npts,
        tools::seconds_to_rfc3339(first.stats.starttime),
        trace_ids
    );
    std::fs::write(filepath, header).map_err(|e| SurveyError::io(filepath, e))?;

    let bytes: Vec<u8> = waveform
        .channels
        .iter()
        .flat_map(|c| c.data.iter().flat_map(|v| (*v as f32).to_le_bytes()))
        .collect();
    let bin_filepath = filepath.with_extension("bin");
    std::fs::write(&bin_filepath, bytes).map_err(|e| SurveyError::io(&bin_filepath, e))
}

fn content_lines(content: &str) -> impl Iterator<Item = (usize, &str)> {
    content
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !(line.is_empty() || line.starts_with('#')))
}

/// Load a coordinate file with `<id> <x> <y> <z>` per line
///
/// Empty lines and lines starting with '#' are skipped.
pub fn load_coordinates(filepath: &Path) -> Result<BTreeMap<u32, Coordinate>, SurveyError> {
    let content = std::fs::read_to_string(filepath).map_err(|e| SurveyError::io(filepath, e))?;

    let mut coordinates = BTreeMap::new();
    for (line_n, line) in content_lines(&content) {
        let values: Vec<&str> = line.split_whitespace().collect();
        if values.len() != 4 {
            return Err(SurveyError::parse(
                filepath,
                line_n,
                format!("Expected 4 columns (id x y z), found {}", values.len()),
            ));
        };
        let id = values[0]
            .parse::<u32>()
            .map_err(|e| SurveyError::parse(filepath, line_n, format!("Invalid ID: {e}")))?;
        let xyz = values[1..]
            .iter()
            .map(|v| v.parse::<f64>())
            .collect::<Result<Vec<f64>, _>>()
            .map_err(|e| SurveyError::parse(filepath, line_n, format!("Invalid coordinate: {e}")))?;

        coordinates.insert(id, Coordinate::new(xyz[0], xyz[1], xyz[2]));
    }
    Ok(coordinates)
}

/// Load manual picks with `<trace ID> <time>` per line
pub fn load_picks(filepath: &Path) -> Result<BTreeMap<u32, f64>, SurveyError> {
    let content = std::fs::read_to_string(filepath).map_err(|e| SurveyError::io(filepath, e))?;

    let mut picks = BTreeMap::new();
    for (line_n, line) in content_lines(&content) {
        let parsed = line.split_once(char::is_whitespace).and_then(|(id, time)| {
            Some((id.parse::<u32>().ok()?, time.trim().parse::<f64>().ok()?))
        });
        match parsed {
            Some((trace_id, time)) => {
                picks.insert(trace_id, time);
            }
            None => {
                return Err(SurveyError::parse(
                    filepath,
                    line_n,
                    format!("Expected '<trace ID> <time>', found '{line}'"),
                ))
            }
        };
    }
    Ok(picks)
}

/// Find and load all "<shotnumber>.pck" files in a directory
///
/// Files whose names are not shot numbers are skipped with a warning.
pub fn load_manual_picks(
    directory: &Path,
) -> Result<BTreeMap<u32, BTreeMap<u32, f64>>, SurveyError> {
    let pattern = directory.join("*.pck");
    let paths = glob::glob(&pattern.to_string_lossy()).map_err(|e| {
        SurveyError::Configuration(format!("Invalid pick directory {directory:?}: {e}"))
    })?;

    let mut all_picks = BTreeMap::new();
    for entry in paths {
        let filepath = entry.map_err(|e| {
            let path = e.path().to_path_buf();
            SurveyError::io(path, e.into_error())
        })?;

        let shotnumber = filepath
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.parse::<u32>().ok());
        match shotnumber {
            Some(shotnumber) => {
                all_picks.insert(shotnumber, load_picks(&filepath)?);
            }
            None => tracing::warn!("Skipping pick file without a shot number: {filepath:?}"),
        };
    }
    Ok(all_picks)
}

fn optional(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Export all picks of a survey to a comma separated values (CSV) file
///
/// The table is preceded by '#' header lines with the program version and the processing log.
pub fn export_picks(survey: &Survey, filepath: &Path) -> Result<(), SurveyError> {
    let file = std::fs::File::create(filepath).map_err(|e| SurveyError::io(filepath, e))?;
    let mut writer = std::io::BufWriter::new(file);

    let mut lines = vec![
        format!("# {PROGRAM_NAME} {PROGRAM_VERSION}"),
        format!("# exported: {}", chrono::Local::now().to_rfc3339()),
    ];
    lines.extend(survey.log.iter().map(|line| format!("# {line}")));
    lines.push(
        "shotnumber,trace_id,distance,pick,flag,revised,earliest,latest,spe,snr,snr_db,noise_level,snr_threshold"
            .to_string(),
    );

    for shot in survey.shots() {
        for trace_id in shot.trace_ids() {
            let Some(pick) = shot.trace_pick(trace_id) else {
                continue;
            };
            let snr = pick.snr();
            lines.push(format!(
                "{},{},{},{},{},{},{},{},{},{},{},{},{}",
                shot.shotnumber(),
                trace_id,
                optional(shot.distance(trace_id)),
                optional(pick.time()),
                pick.is_valid() as u8,
                pick.is_revised() as u8,
                optional(pick.earliest()),
                optional(pick.latest()),
                optional(pick.symmetric_error()),
                optional(snr.map(|s| s.ratio)),
                optional(snr.map(|s| s.db)),
                optional(snr.map(|s| s.noise_level)),
                pick.snr_threshold(),
            ));
        }
    }

    for line in lines {
        writeln!(writer, "{line}").map_err(|e| SurveyError::io(filepath, e))?;
    }
    writer.flush().map_err(|e| SurveyError::io(filepath, e))
}
