use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::ArgMatches;
use dialoguer::Confirm;
use dialoguer::theme::ColorfulTheme;
use indicatif::{ProgressBar, ProgressStyle};
use num_format::{Locale, ToFormattedString};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::detector::DetectorConfig;
use crate::feature_extraction::segment::WindowConfig;
use crate::shared_interface::ColumnRoles;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Missing input argument: {0}.")]
    MissingInputArg(String),
    #[error("Invalid value for {0}: {1}.")]
    InvalidArg(String, String),
    #[error("Could not find file \"{0}\".")]
    FileNotFound(String),
    #[error("Provided file \"{0}\" is a directory.")]
    FileIsDirectory(String),
    #[error("File \"{0}\" already exists.")]
    FileExists(String),
    #[error("I/O error for {0}: {1}.")]
    IO(String, #[source] std::io::Error),
}

/// Parse an optional argument value, rejecting values that do not parse as `T`.
pub fn parse_arg<T: FromStr>(m: &ArgMatches, name: &str) -> Result<Option<T>, CliError> {
    match m.value_of(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>()
            .map(Some)
            .map_err(|_| CliError::InvalidArg(name.to_string(), raw.to_string())),
    }
}

pub fn required_arg<'a>(m: &'a ArgMatches, name: &str) -> Result<&'a str, CliError> {
    m.value_of(name).ok_or_else(|| CliError::MissingInputArg(name.to_string()))
}

/// Column roles from the shared `--*-col` arguments, falling back to the defaults.
pub fn parse_column_roles(m: &ArgMatches) -> Result<ColumnRoles, CliError> {
    let mut roles = ColumnRoles::default();

    if let Some(ts) = m.value_of("timestamp_col") { roles.timestamp = ts.to_string(); }
    if let Some(vid) = m.value_of("vehicle_col") { roles.vehicle_id = vid.to_string(); }
    if let Some(label) = m.value_of("label_col") { roles.label = label.to_string(); }

    if let Some(values) = m.values_of("sensor_cols") {
        let sensors: Vec<&str> = values.collect();
        if sensors.len() != 3 {
            return Err(CliError::InvalidArg("sensor_cols".to_string(), sensors.join(",")));
        }
        roles.sensors = [sensors[0].to_string(), sensors[1].to_string(), sensors[2].to_string()];
    }

    if m.is_present("no_severity") {
        roles.severity = None;
    } else if let Some(severity) = m.value_of("severity_col") {
        roles.severity = Some(severity.to_string());
    }

    if let Some(values) = m.values_of("metadata_col") {
        roles.metadata = values.map(|s| s.to_string()).collect();
    }

    Ok(roles)
}

/// Window configuration from `--sampling-rate`, `--window-size` and `--step-size`.
pub fn parse_window_config(m: &ArgMatches) -> Result<WindowConfig, CliError> {
    let defaults = WindowConfig::default();
    Ok(WindowConfig {
        sampling_rate: parse_arg(m, "sampling_rate")?.unwrap_or(defaults.sampling_rate),
        window_size: parse_arg(m, "window_size")?.unwrap_or(defaults.window_size),
        step_size: parse_arg(m, "step_size")?,
    })
}

/// Detector hyperparameters from the train arguments, falling back to the defaults.
/// Ranges are checked later by `AccidentDetector::new`.
pub fn parse_detector_config(m: &ArgMatches) -> Result<DetectorConfig, CliError> {
    let defaults = DetectorConfig::default();
    let mut boosting = defaults.boosting.clone();

    if let Some(n) = parse_arg(m, "n_estimators")? { boosting.n_estimators = n; }
    if let Some(lr) = parse_arg(m, "learning_rate")? { boosting.learning_rate = lr; }
    if let Some(depth) = parse_arg(m, "max_depth")? { boosting.max_depth = depth; }
    if let Some(ratio) = parse_arg(m, "subsample")? { boosting.subsample = ratio; }
    if let Some(ratio) = parse_arg(m, "colsample_bytree")? { boosting.colsample_bytree = ratio; }
    if let Some(w) = parse_arg(m, "min_child_weight")? { boosting.min_child_weight = w; }
    if let Some(gamma) = parse_arg(m, "gamma")? { boosting.gamma = gamma; }
    if let Some(lambda) = parse_arg(m, "reg_lambda")? { boosting.reg_lambda = lambda; }
    if let Some(alpha) = parse_arg(m, "reg_alpha")? { boosting.reg_alpha = alpha; }

    Ok(DetectorConfig {
        boosting,
        target_recall: parse_arg(m, "target_recall")?.unwrap_or(defaults.target_recall),
        test_size: parse_arg(m, "test_size")?.unwrap_or(defaults.test_size),
        seed: parse_arg(m, "seed")?.unwrap_or(defaults.seed),
        n_splits: parse_arg(m, "n_splits")?.unwrap_or(defaults.n_splits),
    })
}

/// Check an output path, asking before overwriting an existing file unless `force` is set.
/// Missing parent directories are created. The file itself is left untouched until
/// `write_output` replaces it.
pub fn parse_output_path(input: &str, force: bool) -> Result<PathBuf, CliError> {
    let path = PathBuf::from(input);

    if path.is_dir() {
        Err(CliError::FileIsDirectory(input.to_string()))
    } else if path.exists() {
        let overwrite = force || matches!(
            Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt(format!("File \"{}\" exists, overwrite?", input))
                .default(false).wait_for_newline(true).interact_opt(),
            Ok(Some(true))
        );

        if overwrite { Ok(path) } else { Err(CliError::FileExists(input.to_string())) }
    } else {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| CliError::IO(input.to_string(), e))?;
        }
        Ok(path)
    }
}

/// Write `path` through a temporary file in the same directory, renamed into place
/// only when `write` succeeds. On failure any existing file at `path` is kept.
pub fn write_output<F, E>(path: &Path, write: F) -> Result<(), E>
where
    F: FnOnce(&mut dyn Write) -> Result<(), E>,
    E: From<io::Error>,
{
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let mut writer = BufWriter::new(NamedTempFile::new_in(dir)?);
    write(&mut writer)?;

    let tmp = writer.into_inner().map_err(|e| e.into_error())?;
    tmp.persist(path).map_err(|e| e.error)?;
    debug!(path = %path.display(), "wrote output");
    Ok(())
}

pub fn parse_input_file(input: &str) -> Result<File, CliError> {
    let path = PathBuf::from(input);

    if !path.exists() {
        Err(CliError::FileNotFound(input.to_string()))
    } else if path.is_dir() {
        Err(CliError::FileIsDirectory(input.to_string()))
    } else {
        File::open(path).map_err(|e| CliError::IO(input.to_string(), e))
    }
}

/// Number of data rows (lines minus header) of a CSV file, for progress bar sizing.
pub fn count_rows(input: &str) -> Result<u64, CliError> {
    let lines = linecount::count_lines(parse_input_file(input)?).map_err(|e| CliError::IO(input.to_string(), e))?;
    Ok(lines.saturating_sub(1) as u64)
}

/// `path` with its file name replaced by `file_name`.
pub fn sibling_path(path: &str, file_name: &str) -> PathBuf {
    Path::new(path).with_file_name(file_name)
}

pub fn print_output<S: AsRef<str>>(msg: S, quiet: bool) {
    if !quiet { eprint!("{}", msg.as_ref()); }
}

pub fn make_progress_bar(len: u64, quiet: bool) -> Option<ProgressBar> {
    if quiet { return None; }

    let pb = ProgressBar::new(len);
    pb.set_style(ProgressStyle::default_bar()
        .template("        {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        .progress_chars("#>-"));
    Some(pb)
}

pub fn format_count<N: ToFormattedString>(n: N) -> String {
    n.to_formatted_string(&Locale::en)
}

/// Structured diagnostics to stderr, filtered by `RUST_LOG` (default: warn).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

pub fn exit_with_error(e: Box<dyn std::error::Error>) -> ! {
    eprintln!("Error: {}", e);
    std::process::exit(1)
}


#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Write;

    use clap::{App, Arg, ArgMatches};

    use crate::cli::{CliError, count_rows, format_count, parse_detector_config, parse_input_file, parse_output_path, sibling_path, write_output};
    use crate::detector::{AccidentDetector, DetectorConfig};
    use crate::error::Error;

    fn detector_matches(args: &[&str]) -> ArgMatches<'static> {
        let names = [
            "n_estimators", "learning_rate", "max_depth", "subsample", "colsample_bytree",
            "min_child_weight", "gamma", "reg_lambda", "reg_alpha", "target_recall", "test_size", "seed", "n_splits",
        ];
        let app = names.iter().fold(App::new("train"), |app, &name| app.arg(Arg::with_name(name).long(name).takes_value(true)));
        app.get_matches_from(std::iter::once("train").chain(args.iter().cloned()))
    }

    #[test]
    fn input_file_checks() {
        let dir = tempfile::tempdir().unwrap();
        let dir_str = dir.path().to_str().unwrap();

        assert!(matches!(parse_input_file(dir_str), Err(CliError::FileIsDirectory(_))));
        let missing = dir.path().join("missing.csv");
        assert!(matches!(parse_input_file(missing.to_str().unwrap()), Err(CliError::FileNotFound(_))));
    }

    #[test]
    fn output_path_creates_parents_and_keeps_existing() {
        let dir = tempfile::tempdir().unwrap();
        let dir_str = dir.path().to_str().unwrap();
        assert!(matches!(parse_output_path(dir_str, true), Err(CliError::FileIsDirectory(_))));

        let path = dir.path().join("nested").join("out.csv");
        let path_str = path.to_str().unwrap();

        assert_eq!(parse_output_path(path_str, false).unwrap(), path);
        assert!(path.parent().unwrap().is_dir());
        assert!(!path.exists());

        fs::write(&path, b"a\n1\n2\n").unwrap();
        // Existing file, no prompt with force, and no truncation yet
        parse_output_path(path_str, true).unwrap();
        assert_eq!(count_rows(path_str).unwrap(), 2);
    }

    #[test]
    fn failed_write_keeps_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        fs::write(&path, b"previous").unwrap();

        let result: Result<(), Error> = write_output(&path, |out| {
            out.write_all(b"partial")?;
            Err(Error::validation("fit failed"))
        });
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(fs::read(&path).unwrap(), b"previous");
        // The temporary file is cleaned up
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);

        write_output::<_, Error>(&path, |out| Ok(out.write_all(b"replaced")?)).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"replaced");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn write_creates_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.csv");

        write_output::<_, Error>(&path, |out| Ok(out.write_all(b"a\n1\n")?)).unwrap();
        assert_eq!(count_rows(path.to_str().unwrap()).unwrap(), 1);
    }

    #[test]
    fn detector_config_defaults() {
        assert_eq!(parse_detector_config(&detector_matches(&[])).unwrap(), DetectorConfig::default());
    }

    #[test]
    fn detector_config_boosting_args() {
        let m = detector_matches(&[
            "--subsample", "0.5", "--colsample_bytree", "0.6", "--min_child_weight", "2",
            "--gamma", "0", "--reg_lambda", "3.5", "--reg_alpha", "0.25", "--max_depth", "3", "--seed", "7",
        ]);
        let config = parse_detector_config(&m).unwrap();
        let b = &config.boosting;

        assert_eq!((b.subsample, b.colsample_bytree, b.min_child_weight), (0.5, 0.6, 2.));
        assert_eq!((b.gamma, b.reg_lambda, b.reg_alpha), (0., 3.5, 0.25));
        assert_eq!(b.max_depth, 3);
        assert_eq!(b.n_estimators, DetectorConfig::default().boosting.n_estimators);
        assert_eq!(config.seed, 7);
    }

    #[test]
    fn detector_config_bad_values() {
        let m = detector_matches(&["--gamma", "lots"]);
        assert!(matches!(parse_detector_config(&m), Err(CliError::InvalidArg(_, _))));

        // Parses, but is out of range
        let config = parse_detector_config(&detector_matches(&["--subsample", "1.5"])).unwrap();
        assert!(matches!(AccidentDetector::new(config), Err(Error::Configuration(_))));
    }

    #[test]
    fn helpers() {
        assert_eq!(format_count(1234567u64), "1,234,567");
        assert_eq!(sibling_path("models/model.bin", "metrics.json"), std::path::PathBuf::from("models/metrics.json"));
    }
}
