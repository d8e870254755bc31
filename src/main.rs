mod commands;

use clap::{Args, Parser, Subcommand, ValueEnum};
use routegpx::RecordPolicy;
use std::error::Error;
use std::io;
use std::path::PathBuf;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "routegpx", about = "A CLI tool for converting routes into GPX waypoint files")]
struct Cli {
    #[arg(short, long, global = true, help = "Log every skipped record and synthesized leg")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OnBadRecord {
    Skip,
    Fail,
}

impl From<OnBadRecord> for RecordPolicy {
    fn from(value: OnBadRecord) -> Self {
        match value {
            OnBadRecord::Skip => RecordPolicy::Skip,
            OnBadRecord::Fail => RecordPolicy::FailFast,
        }
    }
}

#[derive(Args)]
struct ConvertArgs {
    #[arg(help = "File to convert")]
    input: PathBuf,

    #[arg(default_value = ".", help = "Directory the converted file is written to")]
    output_dir: PathBuf,

    #[arg(long, help = "Output file name [default: route.gpx, or route.json for gpx]")]
    file_name: Option<String>,

    #[arg(long, value_enum, help = "What to do with a record that cannot be converted")]
    on_bad_record: Option<OnBadRecord>,
}

impl ConvertArgs {
    fn policy(&self, default: RecordPolicy) -> RecordPolicy {
        self.on_bad_record.map_or(default, RecordPolicy::from)
    }

    fn output_file<'a>(&'a self, default: &'a str) -> &'a str {
        self.file_name.as_deref().unwrap_or(default)
    }
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Convert a JSON point log, sorted by timestamp")]
    Json {
        #[command(flatten)]
        args: ConvertArgs,

        #[arg(long, help = "Write the route name and description as GPX metadata")]
        metadata: bool,
    },
    #[command(about = "Convert every KML <coordinates> tuple, inventing times from distance")]
    Kml {
        #[command(flatten)]
        args: ConvertArgs,

        #[arg(long, value_parser = parse_start_time, help = "RFC 3339 time the route starts at [default: now]")]
        start_time: Option<OffsetDateTime>,

        #[arg(long, help = "Seed for the random travel speeds")]
        seed: Option<u64>,

        #[arg(long, help = "Give the first point the start time instead of none")]
        stamp_first_point: bool,
    },
    #[command(about = "Convert the placemarks of a KMZ archive")]
    Kmz {
        #[command(flatten)]
        args: ConvertArgs,

        #[arg(long, help = "Also unpack the archive into the output directory")]
        extract: bool,
    },
    #[command(about = "Convert the track points of a GPX file into a JSON point log")]
    Gpx {
        #[command(flatten)]
        args: ConvertArgs,

        #[arg(long, help = "Route name [default: output file name without extension]")]
        name: Option<String>,

        #[arg(long, value_parser = parse_start_time, help = "RFC 3339 route start, also used for untimed points [default: now]")]
        start_time: Option<OffsetDateTime>,
    },
}

fn parse_start_time(s: &str) -> Result<OffsetDateTime, String> {
    OffsetDateTime::parse(s, &Rfc3339).map_err(|e| format!("invalid start time: {e}"))
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    match cli.command {
        Commands::Json { args, metadata } => commands::json::json_command(&args, metadata),
        Commands::Kml {
            args,
            start_time,
            seed,
            stamp_first_point,
        } => commands::kml::kml_command(&args, start_time, seed, stamp_first_point),
        Commands::Kmz { args, extract } => commands::kmz::kmz_command(&args, extract),
        Commands::Gpx {
            args,
            name,
            start_time,
        } => commands::gpx::gpx_command(&args, name, start_time),
    }
}
