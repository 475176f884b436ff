#[macro_use]
extern crate clap;

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Instant;

use clap::App;
use dialoguer::console::{Emoji, style};
use flate2::Compression;
use flate2::write::GzEncoder;

use accel_accident_pipeline::cli;
use accel_accident_pipeline::cli::CliError;
use accel_accident_pipeline::detector::{AccidentDetector, DetectorConfig};
use accel_accident_pipeline::error::Error;
use accel_accident_pipeline::detector::artifact::TrainingArtifact;
use accel_accident_pipeline::feature_extraction::extract_features;
use accel_accident_pipeline::feature_extraction::feature_vector::FeatureTable;
use accel_accident_pipeline::feature_extraction::segment::WindowConfig;
use accel_accident_pipeline::ingest::{IngestOpts, MissingLabel, read_samples};

static LOADING: Emoji<'_, '_> = Emoji("⏳ ", "");
static WORKING: Emoji<'_, '_> = Emoji("🛠️ ", "");
static TRAINING: Emoji<'_, '_> = Emoji("🧠 ", "");
static SAVING: Emoji<'_, '_> = Emoji("💾 ", "");
static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");

const DEFAULT_MODEL: &str = "accelerometer_detector.bin";
const DEFAULT_METRICS: &str = "accelerometer_metrics.json";

#[derive(Debug)]
pub struct Opts {
    pub ingest_opts: IngestOpts,
    pub window_config: WindowConfig,
    pub detector_config: DetectorConfig,
    pub cross_validate: bool,
    pub input_path: String,
    pub in_samples: File,
    pub out_model: PathBuf,
    pub out_metrics: PathBuf,
    pub out_features: Option<PathBuf>,
    quiet: bool,
}

fn parse_opts() -> Result<Opts, CliError> {
    let yml = load_yaml!("cli_args.yaml");
    let m = App::from_yaml(yml).get_matches();

    let quiet = m.is_present("quiet");
    let force = m.is_present("force");
    let window_config = cli::parse_window_config(&m)?;
    let input_path = cli::required_arg(&m, "input")?.to_string();

    let model_path = m.value_of("model").unwrap_or(DEFAULT_MODEL);
    let metrics_path = match m.value_of("metrics") {
        Some(path) => path.to_string(),
        None => cli::sibling_path(model_path, DEFAULT_METRICS).to_string_lossy().into_owned(),
    };

    Ok(Opts {
        ingest_opts: IngestOpts {
            roles: cli::parse_column_roles(&m)?,
            sampling_rate: window_config.sampling_rate,
            missing_label: MissingLabel::Reject,
        },
        window_config,
        detector_config: cli::parse_detector_config(&m)?,
        cross_validate: m.is_present("cross_validate"),
        in_samples: cli::parse_input_file(&input_path)?,
        input_path,
        out_model: cli::parse_output_path(model_path, force)?,
        out_metrics: cli::parse_output_path(&metrics_path, force)?,
        out_features: match m.value_of("dump_features") {
            Some(path) => Some(cli::parse_output_path(path, force)?),
            None => None,
        },
        quiet,
    })
}

fn load_features(opts: &Opts) -> Result<FeatureTable, Box<dyn std::error::Error>> {
    cli::print_output(format!("\n{}   {}Loading accelerometer samples...\n", style("[1/4]").bold().dim(), LOADING), opts.quiet);

    let pb = cli::make_progress_bar(cli::count_rows(&opts.input_path)?, opts.quiet);
    let stream = read_samples(BufReader::new(&opts.in_samples), &opts.ingest_opts, pb.as_ref())?;
    if let Some(pb) = pb { pb.finish(); }

    cli::print_output(format!("\n{}   {}Extracting features...\n", style("[2/4]").bold().dim(), WORKING), opts.quiet);
    let table = extract_features(&opts.window_config, stream)?;

    Ok(table)
}

fn train(opts: &Opts, table: &FeatureTable) -> Result<TrainingArtifact, Box<dyn std::error::Error>> {
    let n_positive = table.labels().iter().filter(|&&l| l != 0).count();
    cli::print_output(format!(
        "\n{}   {}Training on {} windows ({} accidents)...\n",
        style("[3/4]").bold().dim(), TRAINING, cli::format_count(table.len()), cli::format_count(n_positive)
    ), opts.quiet);

    let detector = AccidentDetector::new(opts.detector_config.clone())?;
    let artifact = if opts.cross_validate {
        detector.fit_cross_validated(table)?
    } else {
        detector.fit(table)?
    };

    Ok(artifact)
}

// Nothing is written until training succeeded
fn save(opts: &Opts, table: &FeatureTable, artifact: &TrainingArtifact) -> Result<(), Box<dyn std::error::Error>> {
    cli::print_output(format!("\n{}   {}Saving model and metrics...\n", style("[4/4]").bold().dim(), SAVING), opts.quiet);

    cli::write_output(&opts.out_model, |out| artifact.pipeline().write(out))?;
    cli::write_output(&opts.out_metrics, |out| artifact.write_metrics(out))?;

    if let Some(path) = &opts.out_features {
        cli::write_output(path, |out| -> Result<(), Error> {
            let mut gz_writer = GzEncoder::new(out, Compression::fast());
            table.write_csv(&mut gz_writer)?;
            gz_writer.finish()?;
            Ok(())
        })?;
    }

    Ok(())
}

fn print_summary(opts: &Opts, artifact: &TrainingArtifact) {
    let m = artifact.metrics();
    let c = &m.classification;
    let t = &m.thresholds;
    let model = artifact.pipeline().model();
    let params = model.params();

    let mut summary = format!(
        "\n        Model:     {} trees over {} features (max depth {}, learning rate {})\n",
        model.n_trees(), model.n_features(), params.max_depth, params.learning_rate
    );
    summary.push_str(&format!(
        "\n        Accuracy:  {:.4}\n        Precision: {:.4}\n        Recall:    {:.4}\n        F1:        {:.4}\n        ROC-AUC:   {:.4}\n\
         \n        Optimal threshold: {:.4} (precision {:.4}, recall {:.4})\
         \n        Recall threshold:  {:.4} (precision {:.4}, recall {:.4})\n",
        c.accuracy, c.precision, c.recall, c.f1, c.roc_auc,
        t.optimal.threshold, t.optimal.precision, t.optimal.recall,
        t.at_recall.threshold, t.at_recall.precision, t.at_recall.recall,
    ));
    if let Some(cv) = &m.cross_validation {
        summary.push_str(&format!(
            "\n        CV ROC-AUC: {:.4} ± {:.4}\n        CV recall:  {:.4} ± {:.4}\n",
            cv.auc_mean, cv.auc_std, cv.recall_mean, cv.recall_std
        ));
    }

    cli::print_output(summary, opts.quiet);
}

fn run(opts: &Opts) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();

    let table = load_features(opts)?;
    let artifact = train(opts, &table)?;
    save(opts, &table, &artifact)?;
    print_summary(opts, &artifact);

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
