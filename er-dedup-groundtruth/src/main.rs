use clap::Parser;
use csv::{ReaderBuilder, Writer};
use er_dedup::error::ServiceError;
use er_dedup::util::{read_object, write_object};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Derives a ground-truth file from labelled `leftId,rightId,label` pairs.
#[derive(Debug, Parser)]
#[command(name = "er-dedup-groundtruth", version)]
struct Args {
    /// Labelled pairs, for example Y1.csv.
    #[arg(short = 'y', long = "input", value_name = "PATH")]
    input: PathBuf,
    /// Defaults to the input name with `Y` replaced by `GT`.
    #[arg(short = 'o', long, value_name = "PATH")]
    output: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(count) => {
            info!("Kept {} matching pairs", count);
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{}", err);
            ExitCode::from(err.kind.code())
        }
    }
}

fn run(args: &Args) -> Result<usize, ServiceError> {
    let output = match &args.output {
        Some(path) => path.clone(),
        None => default_output(&args.input)?,
    };
    let bytes = read_object(&args.input)?;
    let (object, count) = derive_ground_truth(&bytes)?;
    write_object(&output, object)?;
    info!("Wrote {}", output.display());
    Ok(count)
}

/// `Y1.csv` becomes `GT1.csv` next to the input.
fn default_output(input: &Path) -> Result<PathBuf, ServiceError> {
    let name = input
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| name.contains('Y'))
        .ok_or_else(|| {
            ServiceError::configuration(format!(
                "Cannot derive an output name from {}; pass -o",
                input.display()
            ))
        })?;
    Ok(input.with_file_name(name.replacen('Y', "GT", 1)))
}

///
/// Keeps the identifier pairs of rows whose label starts with `1`. Returns
/// the headerless CSV and the number of pairs kept.
///
fn derive_ground_truth(input: &[u8]) -> Result<(Vec<u8>, usize), ServiceError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(input);
    let mut writer = Writer::from_writer(vec![]);
    let mut count = 0;
    for result in reader.records() {
        let record = match result {
            Ok(record) => record,
            Err(err) => {
                warn!("Skipping unparsable row: {}", err);
                continue;
            }
        };
        if record.len() < 3 {
            let line = record.position().map_or(0, |pos| pos.line());
            warn!("Skipping row {} with {} fields", line, record.len());
            continue;
        }
        if record[2].trim_start().starts_with('1') {
            writer
                .write_record([record[0].trim(), record[1].trim()])
                .map_err(ServiceError::internal)?;
            count += 1;
        }
    }
    let object = writer.into_inner().map_err(ServiceError::internal)?;
    Ok((object, count))
}
