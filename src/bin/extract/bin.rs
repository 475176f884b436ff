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
use accel_accident_pipeline::error::Error;
use accel_accident_pipeline::feature_extraction::extract_features;
use accel_accident_pipeline::feature_extraction::feature_vector::FeatureTable;
use accel_accident_pipeline::feature_extraction::segment::WindowConfig;
use accel_accident_pipeline::ingest::{IngestOpts, MissingLabel, read_samples};
use accel_accident_pipeline::shared_interface::SensorStream;

static LOADING: Emoji<'_, '_> = Emoji("⏳ ", "");
static WORKING: Emoji<'_, '_> = Emoji("🛠️ ", "");
static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");

#[derive(Debug)]
pub struct Opts {
    pub ingest_opts: IngestOpts,
    pub window_config: WindowConfig,
    pub input_path: String,
    pub in_samples: File,
    pub out_features: PathBuf,
    quiet: bool,
}

fn parse_opts() -> Result<Opts, CliError> {
    let yml = load_yaml!("cli_args.yaml");
    let m = App::from_yaml(yml).get_matches();

    let quiet = m.is_present("quiet");
    let window_config = cli::parse_window_config(&m)?;
    let input_path = cli::required_arg(&m, "input")?.to_string();

    Ok(Opts {
        ingest_opts: IngestOpts {
            roles: cli::parse_column_roles(&m)?,
            sampling_rate: window_config.sampling_rate,
            missing_label: MissingLabel::Reject,
        },
        window_config,
        in_samples: cli::parse_input_file(&input_path)?,
        input_path,
        out_features: cli::parse_output_path(cli::required_arg(&m, "output")?, m.is_present("force"))?,
        quiet,
    })
}

fn consume_input(opts: &Opts) -> Result<SensorStream, Box<dyn std::error::Error>> {
    cli::print_output(format!("\n{}   {}Loading accelerometer samples...\n", style("[1/2]").bold().dim(), LOADING), opts.quiet);

    let pb = cli::make_progress_bar(cli::count_rows(&opts.input_path)?, opts.quiet);
    let stream = read_samples(BufReader::new(&opts.in_samples), &opts.ingest_opts, pb.as_ref())?;
    if let Some(pb) = pb { pb.finish(); }

    Ok(stream)
}

fn write_features(opts: &Opts, stream: SensorStream) -> Result<FeatureTable, Box<dyn std::error::Error>> {
    cli::print_output(format!("\n{}   {}Extracting features...\n", style("[2/2]").bold().dim(), WORKING), opts.quiet);

    let table = extract_features(&opts.window_config, stream)?;

    cli::write_output(&opts.out_features, |out| -> Result<(), Error> {
        let mut gz_writer = GzEncoder::new(out, Compression::fast());
        table.write_csv(&mut gz_writer)?;
        gz_writer.finish()?;
        Ok(())
    })?;

    Ok(table)
}

fn run(opts: &Opts) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();

    let stream = consume_input(opts)?;
    let n_samples = stream.samples.len();

    let table = write_features(opts, stream)?;

    let n_positive = table.labels().iter().filter(|&&l| l != 0).count();
    cli::print_output(format!(
        "\n        Samples:          {}\n        Windows:          {}\n        Accident windows: {}\n        Features:         {}\n",
        cli::format_count(n_samples), cli::format_count(table.len()), cli::format_count(n_positive), table.schema.len()
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
