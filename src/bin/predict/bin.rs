#[macro_use]
extern crate clap;

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Instant;

use clap::App;
use dialoguer::console::{Emoji, style};

use accel_accident_pipeline::cli;
use accel_accident_pipeline::cli::CliError;
use accel_accident_pipeline::detector::artifact::{DetectorPipeline, resolve_threshold};
use accel_accident_pipeline::feature_extraction::extract_features;
use accel_accident_pipeline::feature_extraction::feature_vector::FeatureTable;
use accel_accident_pipeline::feature_extraction::segment::WindowConfig;
use accel_accident_pipeline::ingest::{IngestOpts, MissingLabel, read_samples};

static LOADING: Emoji<'_, '_> = Emoji("⏳ ", "");
static WORKING: Emoji<'_, '_> = Emoji("🛠️ ", "");
static SCORING: Emoji<'_, '_> = Emoji("🚨 ", "");
static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");

const DEFAULT_METRICS: &str = "accelerometer_metrics.json";
// Windows at or above this probability are reported separately
const HIGH_RISK: f64 = 0.7;

#[derive(Debug)]
pub struct Opts {
    pub ingest_opts: IngestOpts,
    pub window_config: WindowConfig,
    pub threshold: Option<f64>,
    pub metrics_path: String,
    pub input_path: String,
    pub in_model: File,
    pub in_samples: File,
    pub out_predictions: PathBuf,
    quiet: bool,
}

fn parse_opts() -> Result<Opts, CliError> {
    let yml = load_yaml!("cli_args.yaml");
    let m = App::from_yaml(yml).get_matches();

    let quiet = m.is_present("quiet");
    let window_config = cli::parse_window_config(&m)?;
    let model_path = cli::required_arg(&m, "model")?;
    let input_path = cli::required_arg(&m, "input")?.to_string();

    Ok(Opts {
        ingest_opts: IngestOpts {
            roles: cli::parse_column_roles(&m)?,
            sampling_rate: window_config.sampling_rate,
            missing_label: MissingLabel::Synthesize,
        },
        window_config,
        threshold: cli::parse_arg(&m, "threshold")?,
        metrics_path: match m.value_of("metrics") {
            Some(path) => path.to_string(),
            None => cli::sibling_path(model_path, DEFAULT_METRICS).to_string_lossy().into_owned(),
        },
        in_model: cli::parse_input_file(model_path)?,
        in_samples: cli::parse_input_file(&input_path)?,
        input_path,
        out_predictions: cli::parse_output_path(cli::required_arg(&m, "output")?, m.is_present("force"))?,
        quiet,
    })
}

fn load_features(opts: &Opts) -> Result<(DetectorPipeline, FeatureTable), Box<dyn std::error::Error>> {
    cli::print_output(format!("\n{}   {}Loading model and samples...\n", style("[1/3]").bold().dim(), LOADING), opts.quiet);

    let pipeline = DetectorPipeline::read(BufReader::new(&opts.in_model))?;

    let pb = cli::make_progress_bar(cli::count_rows(&opts.input_path)?, opts.quiet);
    let stream = read_samples(BufReader::new(&opts.in_samples), &opts.ingest_opts, pb.as_ref())?;
    if let Some(pb) = pb { pb.finish(); }

    cli::print_output(format!("\n{}   {}Extracting features...\n", style("[2/3]").bold().dim(), WORKING), opts.quiet);
    let table = extract_features(&opts.window_config, stream)?;

    Ok((pipeline, table))
}

fn run(opts: &Opts) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();

    let threshold = resolve_threshold(opts.threshold, &opts.metrics_path)?;
    let (pipeline, table) = load_features(opts)?;

    cli::print_output(format!("\n{}   {}Scoring windows (threshold {:.4})...\n", style("[3/3]").bold().dim(), SCORING, threshold), opts.quiet);
    let probabilities = pipeline.predict_proba(&table)?;

    cli::write_output(&opts.out_predictions, |out| table.write_predictions_csv(out, &probabilities, threshold))?;

    let n = probabilities.len();
    let predicted = probabilities.iter().filter(|&&p| p >= threshold).count();
    let high_risk = probabilities.iter().filter(|&&p| p >= HIGH_RISK).count();
    let mean = probabilities.iter().sum::<f64>() / n.max(1) as f64;
    let max = probabilities.iter().cloned().fold(0., f64::max);

    cli::print_output(format!(
        "\n        Windows:            {}\n        Predicted accidents: {}\n        Probability >= {}:  {}\n        Mean probability:   {:.4}\n        Max probability:    {:.4}\n",
        cli::format_count(n), cli::format_count(predicted), HIGH_RISK, cli::format_count(high_risk), mean, max
    ), opts.quiet);

    // Print total duration
    eprint!("\n        {}Finished in {:.1?}\n", SPARKLE, start.elapsed());
    Ok(())
}

fn main() {
    cli::init_tracing();

    let opts = parse_opts().unwrap_or_else(|e| cli::exit_with_error(Box::new(e)));
    if let Err(e) = run(&opts) {
        cli::exit_with_error(e);
    }
}
