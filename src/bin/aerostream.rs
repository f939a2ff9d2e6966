//! Aerostream CLI - Command-line interface for Aerostream
//!
//! Commands:
//! - average: Ingest raw batches and export bucket averages
//! - validate: Validate raw batch schema
//! - round: Round values to a base
//! - doctor: Diagnose configuration and snapshot health
//! - schema: Print schema information

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;

use aerostream::export::{AveragedExport, ExportEncoder};
use aerostream::pipeline::{ErrorPolicy, IngestPipeline};
use aerostream::rounding::{round_slice, RoundMode};
use aerostream::schema::{BatchAdapter, RawBatchRecord, SCHEMA_VERSION};
use aerostream::{DataLake, LakeConfig, StreamError, AEROSTREAM_VERSION, PRODUCER_NAME};

/// Aerostream - time-series alignment and averaging for instrument data
#[derive(Parser)]
#[command(name = "aerostream")]
#[command(version = AEROSTREAM_VERSION)]
#[command(about = "Merge raw instrument batches and average them onto time buckets", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest raw batches and export bucket averages
    Average {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Stream configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Input format
        #[arg(long, default_value = "auto")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Override the bucket width of every stream (seconds)
        #[arg(long)]
        width: Option<f64>,

        /// Fixed grid start (epoch seconds or RFC 3339)
        #[arg(long)]
        window_start: Option<String>,

        /// Fixed grid end (epoch seconds or RFC 3339)
        #[arg(long)]
        window_end: Option<String>,

        /// Only export these streams
        #[arg(long = "stream")]
        streams: Vec<String>,

        /// Export raw samples instead of bucket averages
        #[arg(long)]
        raw: bool,

        /// Round exported values to this base (values that would become zero are kept)
        #[arg(long)]
        display_base: Option<f64>,

        /// Skip batches that fail instead of aborting
        #[arg(long)]
        skip_bad: bool,

        /// Continue from a saved lake snapshot
        #[arg(long)]
        load_snapshot: Option<PathBuf>,

        /// Save the lake snapshot after processing
        #[arg(long)]
        save_snapshot: Option<PathBuf>,
    },

    /// Validate raw batch schema
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "auto")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Round values to a multiple of a base
    Round {
        /// Values to round
        #[arg(required = true, allow_negative_numbers = true)]
        values: Vec<f64>,

        /// Rounding base
        #[arg(short, long, default_value = "1")]
        base: f64,

        /// Rounding mode (round, floor, ceil)
        #[arg(short, long, default_value = "round")]
        mode: String,

        /// Keep the original value where the result would be zero
        #[arg(long)]
        nonzero_edge: bool,
    },

    /// Diagnose configuration and snapshot health
    Doctor {
        /// Check a configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Check a lake snapshot file
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print schema information
    Schema {
        /// Schema to print
        #[arg(value_enum)]
        schema_type: SchemaType,

        /// Output as JSON schema
        #[arg(long)]
        json_schema: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Detect from the first character
    Auto,
    /// Newline-delimited JSON (one batch per line)
    Ndjson,
    /// JSON array of batches
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one stream per line)
    Ndjson,
    /// JSON array of streams
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Input schema (stream.raw_batch.v1)
    Input,
    /// Output schema (averaged export)
    Output,
    /// Stream configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string()));
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<(), AeroCliError> {
    match command {
        Commands::Average {
            input,
            output,
            config,
            input_format,
            output_format,
            width,
            window_start,
            window_end,
            streams,
            raw,
            display_base,
            skip_bad,
            load_snapshot,
            save_snapshot,
        } => {
            let window = (
                window_start.as_deref().map(parse_time).transpose()?,
                window_end.as_deref().map(parse_time).transpose()?,
            );
            let options = AverageOptions {
                width,
                window,
                streams,
                raw,
                display_base,
                policy: if skip_bad { ErrorPolicy::Skip } else { ErrorPolicy::Abort },
            };
            cmd_average(
                &input,
                &output,
                config.as_deref(),
                input_format,
                output_format,
                options,
                load_snapshot.as_deref(),
                save_snapshot.as_deref(),
            )
        }

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::Round {
            values,
            base,
            mode,
            nonzero_edge,
        } => cmd_round(&values, base, &mode, nonzero_edge),

        Commands::Doctor { config, snapshot, json } => {
            cmd_doctor(config.as_deref(), snapshot.as_deref(), json)
        }

        Commands::Schema { schema_type, json_schema } => cmd_schema(schema_type, json_schema),
    }
}

struct AverageOptions {
    width: Option<f64>,
    window: (Option<f64>, Option<f64>),
    streams: Vec<String>,
    raw: bool,
    display_base: Option<f64>,
    policy: ErrorPolicy,
}

#[allow(clippy::too_many_arguments)]
fn cmd_average(
    input: &Path,
    output: &Path,
    config: Option<&Path>,
    input_format: InputFormat,
    output_format: OutputFormat,
    options: AverageOptions,
    load_snapshot: Option<&Path>,
    save_snapshot: Option<&Path>,
) -> Result<(), AeroCliError> {
    let config = match config {
        Some(path) => LakeConfig::from_json(&fs::read_to_string(path)?)?,
        None => LakeConfig::default(),
    };
    let mut pipeline = IngestPipeline::new(config)?;

    // Load existing lake if provided
    if let Some(snapshot_path) = load_snapshot {
        pipeline.load_snapshot(&fs::read_to_string(snapshot_path)?)?;
    }

    let records = parse_records(&read_input(input)?, &input_format)?;
    if records.is_empty() && pipeline.lake().is_empty() {
        return Err(AeroCliError::NoBatches);
    }

    let report = pipeline.ingest_all(records, options.policy)?;
    if report.skipped > 0 {
        log::warn!("{} batch(es) skipped", report.skipped);
    }
    pipeline.finish()?;

    let (window_start, window_end) = options.window;
    if options.width.is_some() || window_start.is_some() || window_end.is_some() {
        pipeline
            .lake_mut()
            .reaverage_streams(options.width, None, window_start, window_end)?;
    }

    // Save lake if requested
    if let Some(snapshot_path) = save_snapshot {
        fs::write(snapshot_path, pipeline.save_snapshot()?)?;
    }

    let mut encoder = ExportEncoder::new();
    if let Some(base) = options.display_base {
        encoder = encoder.with_display_rounding(base);
    }
    let exports = export_streams(pipeline.lake_mut(), &encoder, &options.streams, options.raw)?;

    // Write output
    let output_data = format_output(&exports, &output_format)?;
    if output.to_string_lossy() == "-" {
        print!("{}", output_data);
    } else {
        fs::write(output, output_data)?;
    }
    Ok(())
}

fn export_streams(
    lake: &mut DataLake,
    encoder: &ExportEncoder,
    only: &[String],
    raw: bool,
) -> Result<Vec<AveragedExport>, AeroCliError> {
    let names: Vec<String> = if only.is_empty() {
        lake.list_streams().iter().map(|s| s.to_string()).collect()
    } else {
        only.to_vec()
    };
    let mut exports = Vec::with_capacity(names.len());
    for name in names {
        let series = lake.get_mut(&name)?;
        let export = if raw {
            encoder.encode_raw(&name, series)?
        } else {
            encoder.encode(&name, series)?
        };
        exports.push(export);
    }
    Ok(exports)
}

fn cmd_validate(input: &Path, input_format: InputFormat, json: bool) -> Result<(), AeroCliError> {
    let records = parse_records(&read_input(input)?, &input_format)?;

    // Validate each record
    let results = BatchAdapter::validate_batches(&records);

    let report = ValidationReport {
        total_batches: records.len(),
        valid_batches: records.len() - results.len(),
        invalid_batches: results.len(),
        errors: results
            .iter()
            .map(|r| ValidationErrorDetail {
                index: r.index,
                stream: r.stream.clone(),
                error: r.result.as_ref().map(|e| e.to_string()).unwrap_or_default(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total batches:   {}", report.total_batches);
        println!("Valid batches:   {}", report.valid_batches);
        println!("Invalid batches: {}", report.invalid_batches);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!("  - Batch {} ({}): {}", err.index, err.stream, err.error);
            }
        }
    }

    if report.invalid_batches > 0 {
        Err(AeroCliError::ValidationFailed(report.invalid_batches))
    } else {
        Ok(())
    }
}

fn cmd_round(values: &[f64], base: f64, mode: &str, nonzero_edge: bool) -> Result<(), AeroCliError> {
    let mode = RoundMode::from_str(mode)?;
    for value in round_slice(values, base, mode, nonzero_edge)? {
        println!("{value}");
    }
    Ok(())
}

fn cmd_doctor(config: Option<&Path>, snapshot: Option<&Path>, json: bool) -> Result<(), AeroCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck::ok(
        "aerostream_version",
        format!("Aerostream version {}", AEROSTREAM_VERSION),
    ));
    checks.push(DoctorCheck::ok("schema_version", format!("Input schema: {}", SCHEMA_VERSION)));

    if let Some(path) = config {
        checks.push(check_file("config", path, |content| {
            let config = LakeConfig::from_json(content)?;
            Ok(format!("Configuration valid ({} stream(s))", config.streams.len()))
        }));
    }

    if let Some(path) = snapshot {
        checks.push(check_file("snapshot", path, |content| {
            let lake = DataLake::from_json(content)?;
            let samples: usize = lake.iter().map(|(_, s)| s.n_samples()).sum();
            Ok(format!(
                "Snapshot valid ({} stream(s), {} raw sample(s))",
                lake.len(),
                samples
            ))
        }));
    }

    // Check stdin is available (for piped input)
    checks.push(if atty::is(atty::Stream::Stdin) {
        DoctorCheck::ok("stdin", "stdin is a TTY (interactive mode)".to_string())
    } else {
        DoctorCheck::ok("stdin", "stdin is a pipe (ready for --input -)".to_string())
    });

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: AEROSTREAM_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Aerostream Doctor Report");
        println!("========================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");
        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(AeroCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn check_file(
    name: &str,
    path: &Path,
    check: impl FnOnce(&str) -> Result<String, StreamError>,
) -> DoctorCheck {
    if !path.exists() {
        return DoctorCheck {
            name: name.to_string(),
            status: CheckStatus::Warning,
            message: format!("{} does not exist", path.display()),
        };
    }
    match fs::read_to_string(path) {
        Ok(content) => match check(&content) {
            Ok(message) => DoctorCheck::ok(name, message),
            Err(e) => DoctorCheck {
                name: name.to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            },
        },
        Err(e) => DoctorCheck {
            name: name.to_string(),
            status: CheckStatus::Error,
            message: format!("Cannot read {}: {}", path.display(), e),
        },
    }
}

fn cmd_schema(schema_type: SchemaType, json_schema: bool) -> Result<(), AeroCliError> {
    match schema_type {
        SchemaType::Input => {
            if json_schema {
                println!("{}", get_input_json_schema());
            } else {
                println!("Input Schema: {}", SCHEMA_VERSION);
                println!();
                println!("One record per batch of raw samples for a single stream:");
                println!();
                println!("- stream: target stream name");
                println!("- times: sample timestamps in epoch seconds");
                println!("- channels: channel names (optional, falls back to the stream configuration)");
                println!("- values: value matrix, null for missing samples");
                println!("- layout: channel_major (rows are channels) or time_major (rows are samples)");
                println!("- bins: {{ names, values }} per-bin block for sizer instruments (optional)");
                println!("- source: {{ instrument, file }} (optional)");
            }
        }
        SchemaType::Output => {
            if json_schema {
                println!("{}", get_output_json_schema());
            } else {
                println!("Output Schema: averaged export");
                println!();
                println!("- producer: {{ name, version, instance_id }}");
                println!("- stream, computed_at_utc, raw");
                println!("- bucket_width_sec: bucket width (absent for raw exports)");
                println!("- times / times_utc: bucket starts in epoch seconds and RFC 3339");
                println!("- channels: channel names, one row each in mean and std");
                println!("- mean, std: per-bucket NaN-ignoring mean and population std, null when empty");
            }
        }
        SchemaType::Config => {
            let mut example = aerostream::StreamSettings::new("CAPS_dual");
            example.channels = vec!["Ext_dry".to_string(), "Zero_dry_CAPS".to_string()];
            example.zero_flag_channels = vec!["Zero_dry_CAPS".to_string()];
            let config = LakeConfig { streams: vec![example] };
            println!("{}", config.to_json_pretty()?);
        }
    }
    Ok(())
}

// Helper functions

fn read_input(input: &Path) -> Result<String, AeroCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn parse_records(data: &str, format: &InputFormat) -> Result<Vec<RawBatchRecord>, AeroCliError> {
    Ok(match format {
        InputFormat::Auto => BatchAdapter::parse_auto(data)?,
        InputFormat::Ndjson => BatchAdapter::parse_ndjson(data)?,
        InputFormat::Json => BatchAdapter::parse_array(data)?,
    })
}

/// Epoch seconds or an RFC 3339 timestamp
fn parse_time(value: &str) -> Result<f64, AeroCliError> {
    if let Ok(seconds) = value.parse::<f64>() {
        return Ok(seconds);
    }
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_nanos()) * 1e-9)
        .map_err(|e| AeroCliError::InvalidTime(format!("'{value}': {e}")))
}

fn format_output(exports: &[AveragedExport], format: &OutputFormat) -> Result<String, AeroCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for export in exports {
                lines.push(serde_json::to_string(export)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(exports)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(exports)?),
    }
}

fn get_input_json_schema() -> String {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "stream.raw_batch.v1",
        "description": "Batch of raw instrument samples for one stream",
        "type": "object",
        "required": ["schema_version", "stream", "times", "values"],
        "properties": {
            "schema_version": { "type": "string", "const": SCHEMA_VERSION },
            "stream": { "type": "string" },
            "times": { "type": "array", "items": { "type": "number" } },
            "channels": { "type": "array", "items": { "type": "string" } },
            "values": {
                "type": "array",
                "items": { "type": "array", "items": { "type": ["number", "null"] } }
            },
            "layout": { "type": "string", "enum": ["channel_major", "time_major"] },
            "bins": {
                "type": "object",
                "required": ["names", "values"],
                "properties": {
                    "names": { "type": "array", "items": { "type": "string" } },
                    "values": {
                        "type": "array",
                        "items": { "type": "array", "items": { "type": ["number", "null"] } }
                    }
                }
            },
            "source": {
                "type": "object",
                "properties": {
                    "instrument": { "type": "string" },
                    "file": { "type": "string" }
                }
            }
        }
    }).to_string()
}

fn get_output_json_schema() -> String {
    let matrix = serde_json::json!({
        "type": "array",
        "items": { "type": "array", "items": { "type": ["number", "null"] } }
    });
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "aerostream averaged export",
        "type": "object",
        "required": ["export_version", "producer", "computed_at_utc", "stream", "times", "times_utc", "channels", "mean"],
        "properties": {
            "export_version": { "type": "string" },
            "producer": {
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "version": { "type": "string" },
                    "instance_id": { "type": "string" }
                }
            },
            "computed_at_utc": { "type": "string", "format": "date-time" },
            "stream": { "type": "string" },
            "raw": { "type": "boolean" },
            "bucket_width_sec": { "type": "number" },
            "times": { "type": "array", "items": { "type": "number" } },
            "times_utc": { "type": "array", "items": { "type": "string", "format": "date-time" } },
            "channels": { "type": "array", "items": { "type": "string" } },
            "mean": matrix.clone(),
            "std": matrix
        }
    }).to_string()
}

// Error types

#[derive(Debug)]
enum AeroCliError {
    Io(io::Error),
    Stream(StreamError),
    Json(serde_json::Error),
    NoBatches,
    ValidationFailed(usize),
    DoctorFailed,
    InvalidTime(String),
}

impl From<io::Error> for AeroCliError {
    fn from(e: io::Error) -> Self {
        AeroCliError::Io(e)
    }
}

impl From<StreamError> for AeroCliError {
    fn from(e: StreamError) -> Self {
        AeroCliError::Stream(e)
    }
}

impl From<serde_json::Error> for AeroCliError {
    fn from(e: serde_json::Error) -> Self {
        AeroCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<AeroCliError> for CliError {
    fn from(e: AeroCliError) -> Self {
        let (code, hint) = match &e {
            AeroCliError::Io(_) => ("IO_ERROR", Some("Check file paths and permissions")),
            AeroCliError::Stream(inner) => stream_error_code(inner),
            AeroCliError::Json(_) => ("JSON_ERROR", Some("Check JSON syntax")),
            AeroCliError::NoBatches => ("NO_BATCHES", Some("Ensure the input file is not empty")),
            AeroCliError::ValidationFailed(_) => ("VALIDATION_FAILED", Some("Fix validation errors and retry")),
            AeroCliError::DoctorFailed => ("DOCTOR_FAILED", Some("Review the doctor report for details")),
            AeroCliError::InvalidTime(_) => (
                "INVALID_TIME",
                Some("Use epoch seconds or RFC 3339, e.g. 2024-01-15T08:00:00Z"),
            ),
        };
        let message = match e {
            AeroCliError::Io(e) => e.to_string(),
            AeroCliError::Stream(e) => e.to_string(),
            AeroCliError::Json(e) => e.to_string(),
            AeroCliError::NoBatches => "No batches found in input".to_string(),
            AeroCliError::ValidationFailed(count) => format!("{} batches failed validation", count),
            AeroCliError::DoctorFailed => "One or more health checks failed".to_string(),
            AeroCliError::InvalidTime(msg) => format!("Invalid time {}", msg),
        };
        CliError {
            code: code.to_string(),
            message,
            hint: hint.map(str::to_string),
        }
    }
}

fn stream_error_code(e: &StreamError) -> (&'static str, Option<&'static str>) {
    match e {
        StreamError::ShapeMismatch { .. } => ("SHAPE_MISMATCH", Some("Check that channel names match the value rows")),
        StreamError::DuplicateName(_) => ("DUPLICATE_NAME", Some("Channel names must be unique within a stream")),
        StreamError::UnknownChannel { .. } => ("UNKNOWN_CHANNEL", None),
        StreamError::UnknownStream { .. } => ("UNKNOWN_STREAM", Some("Run without --stream to export every stream")),
        StreamError::InvalidArgument(_) => ("INVALID_ARGUMENT", None),
        StreamError::Config(_) => ("CONFIG_ERROR", Some("Run 'aerostream doctor --config <file>' for details")),
        StreamError::Validation(_) => ("VALIDATION_ERROR", Some("Run 'aerostream validate' for details")),
        StreamError::Parse(_) => ("PARSE_ERROR", Some("Ensure input matches stream.raw_batch.v1 schema")),
        StreamError::Json(_) => ("JSON_ERROR", Some("Check JSON syntax")),
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_batches: usize,
    valid_batches: usize,
    invalid_batches: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    stream: String,
    error: String,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

impl DoctorCheck {
    fn ok(name: &str, message: String) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message,
        }
    }
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
