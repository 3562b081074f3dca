/// Miscellaneous functions that are used in other parts of the program
use std::str::FromStr;

use ndarray::ArrayView1;

/// Find the indices where a signal changes sign
///
/// A sample counts as positive if it is strictly larger than zero, so a run of zeros belongs to
/// the negative side.
///
/// # Arguments
/// - `data`: The signal to search
///
/// # Examples
/// ```
/// use ndarray::arr1;
/// assert_eq!(seispick::tools::zero_crossings(arr1(&[1., -1., -2., 3.]).view()), vec![0, 2]);
/// ```
///
/// # Returns
/// The index of the last sample before each crossing.
pub fn zero_crossings(data: ArrayView1<f64>) -> Vec<usize> {
    let positive = data.iter().map(|v| *v > 0.).collect::<Vec<bool>>();

    positive
        .windows(2)
        .enumerate()
        .filter_map(|(i, pair)| (pair[0] != pair[1]).then_some(i))
        .collect()
}

/// The mean distance between consecutive indices
///
/// # Returns
/// `None` if fewer than two indices are given.
pub fn mean_spacing(indices: &[usize]) -> Option<f64> {
    if indices.len() < 2 {
        return None;
    };
    let total: usize = indices.windows(2).map(|pair| pair[1] - pair[0]).sum();
    Some(total as f64 / (indices.len() - 1) as f64)
}

/// Convert numbers of seconds since UNIX epoch into an RFC3339 datetime string in UTC
///
/// # Arguments
/// - `seconds`: The number of seconds since UNIX epoch
///
/// # Returns
/// A string representation of the datetime
pub fn seconds_to_rfc3339(seconds: f64) -> String {
    match chrono::DateTime::<chrono::Utc>::from_timestamp(
        seconds.floor() as i64,
        ((seconds - seconds.floor()) * 1e9) as u32,
    ) {
        Some(datetime) => datetime.to_rfc3339(),
        None => format!("{seconds} s"),
    }
}

/// Parse a pair of comma separated values, e.g. "15,0"
///
/// # Examples
/// ```
/// assert_eq!(seispick::tools::parse_pair::<usize>("15, 0"), Ok((15, 0)));
/// ```
///
/// # Returns
/// - Ok((a, b)) if both values could be parsed
/// - Err(e) if the string has not exactly two values or a value could not be parsed
pub fn parse_pair<T: FromStr>(string: &str) -> Result<(T, T), String> {
    let parts = string.split(',').map(|s| s.trim()).collect::<Vec<&str>>();

    if parts.len() != 2 {
        return Err(format!(
            "Expected two comma separated values, got: {}",
            string
        ));
    };

    let parse = |s: &str| {
        s.parse::<T>()
            .map_err(|_| format!("Could not parse value in string {}: {}", string, s))
    };

    Ok((parse(parts[0])?, parse(parts[1])?))
}
