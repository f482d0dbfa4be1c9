use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use recordmapper::{
    BatchOutput, ConfigError, CsvOptions, MapperConfig, RECORD_COUNT_ATTRIBUTE, RecordMapper,
    Value, parse_mapper_config, read_csv_records, read_json_records, validate_config,
};
use serde_json::{Value as JsonValue, json};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "recordmapper")]
#[command(version, about = "Map input records onto schema-typed output tables")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Map an input file and print the output tables as JSON.
    Map {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        input: PathBuf,
        #[arg(long, value_enum)]
        format: Option<InputFormatArg>,
        /// CSV input has no header row; columns follow the input schema.
        #[arg(long, default_value_t = false)]
        no_header: bool,
        #[arg(long, default_value_t = ',')]
        delimiter: char,
        /// Skip invalid mappings instead of refusing the configuration.
        #[arg(long, default_value_t = false)]
        lenient: bool,
        #[arg(long, default_value_t = false)]
        pretty: bool,
    },
    /// Check a configuration and report every problem found.
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum InputFormatArg {
    Json,
    Csv,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Map {
            config,
            input,
            format,
            no_header,
            delimiter,
            lenient,
            pretty,
        } => {
            let config = load_config(&config)?;
            let format = format.unwrap_or_else(|| guess_format(&input));
            let delimiter = u8::try_from(delimiter).context("delimiter must be a single-byte character")?;
            let csv = CsvOptions {
                has_header: !no_header,
                delimiter,
            };
            let records = read_input(&input, format, &config, &csv)?;
            info!(records = records.len(), "input loaded");

            let mapper = if lenient {
                RecordMapper::lenient(config)
            } else {
                RecordMapper::new(config).map_err(config_failure)?
            };
            let output = mapper.map_batch(&records);
            for warning in &output.warnings {
                warn!("{}", warning);
            }

            let rendered = render_output(&output);
            let text = if pretty {
                serde_json::to_string_pretty(&rendered)?
            } else {
                serde_json::to_string(&rendered)?
            };
            println!("{}", text);
            Ok(())
        }
        Command::Validate { config } => {
            let config = load_config(&config)?;
            validate_config(&config).map_err(config_failure)?;
            println!("ok");
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> Result<MapperConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    parse_mapper_config(&text).with_context(|| format!("failed to parse config {}", path.display()))
}

fn guess_format(path: &Path) -> InputFormatArg {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => InputFormatArg::Csv,
        _ => InputFormatArg::Json,
    }
}

fn read_input(
    path: &Path,
    format: InputFormatArg,
    config: &MapperConfig,
    csv: &CsvOptions,
) -> Result<Vec<Value>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read input {}", path.display()))?;
    let schema = config.input.schema.as_ref();
    let records = match format {
        InputFormatArg::Json => read_json_records(&text, schema),
        InputFormatArg::Csv => read_csv_records(&text, schema, csv),
    };
    records.with_context(|| format!("failed to read records from {}", path.display()))
}

fn config_failure(errors: Vec<ConfigError>) -> anyhow::Error {
    let lines: Vec<String> = errors.iter().map(ToString::to_string).collect();
    anyhow::anyhow!("invalid config:\n{}", lines.join("\n"))
}

fn render_output(output: &BatchOutput) -> JsonValue {
    let tables: Vec<JsonValue> = output
        .tables
        .iter()
        .map(|table| {
            json!({
                "id": table.id,
                "name": table.name,
                RECORD_COUNT_ATTRIBUTE: table.count,
                "records": table.records.iter().map(Value::to_json).collect::<Vec<_>>(),
            })
        })
        .collect();
    json!({
        "tables": tables,
        "warnings": output.warnings.iter().map(ToString::to_string).collect::<Vec<_>>(),
    })
}

