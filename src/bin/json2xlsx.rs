//! Command-line front-end: convert one JSON array into a workbook

use clap::Parser;
use json_excelstream::logger;
use json_excelstream::{
    ConversionService, ConvertConfig, ConvertError, ErrorCategory, JobRequest, UploadedFile,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "json2xlsx")]
#[command(about = "Stream a JSON array into an Excel workbook using a two-row template")]
struct Cli {
    /// Template workbook: row 1 output headers, row 2 JSON property names
    #[arg(short, long)]
    template: PathBuf,

    /// JSON file whose top level is an array of objects
    #[arg(short, long)]
    data: PathBuf,

    /// Directory for the generated workbook
    #[arg(short, long, default_value = "public")]
    out_dir: PathBuf,

    /// Name of the output worksheet
    #[arg(long, default_value = json_excelstream::config::DEFAULT_SHEET_NAME)]
    sheet_name: String,

    /// Rows buffered between flushes
    #[arg(long, default_value_t = json_excelstream::config::DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Deflate level (0-9)
    #[arg(long, default_value_t = 6)]
    compression_level: u32,

    /// Render the header row bold
    #[arg(long)]
    bold_header: bool,

    /// Delete the template and data files after a successful run
    #[arg(long)]
    remove_inputs: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn exit_code(err: &ConvertError) -> i32 {
    match err.category() {
        ErrorCategory::Configuration => 2,
        ErrorCategory::SourceParse => 3,
        ErrorCategory::Finalization => 4,
        ErrorCategory::NotFound | ErrorCategory::Io => 1,
    }
}

// Inputs are the user's own files here, so they are kept unless asked otherwise
fn build_config(cli: &Cli) -> ConvertConfig {
    ConvertConfig::new(&cli.out_dir)
        .sheet_name(cli.sheet_name.as_str())
        .batch_size(cli.batch_size)
        .compression_level(cli.compression_level)
        .bold_header(cli.bold_header)
        .remove_inputs_on_success(cli.remove_inputs)
}

fn run(cli: Cli) -> json_excelstream::Result<PathBuf> {
    let service = ConversionService::new(build_config(&cli));
    let outcome = service.convert(JobRequest {
        template: UploadedFile::from_path(&cli.template),
        data: UploadedFile::from_path(&cli.data),
    })?;

    let artifact = service.retrieve(&outcome.artifact)?;
    let destination = cli.out_dir.join(&artifact.file_name);
    std::fs::write(&destination, &artifact.bytes)?;

    println!("📊 Progress: {:.2}%", outcome.progress);
    println!(
        "✅ {} rows written ({} skipped)",
        outcome.rows_written, outcome.skipped
    );
    Ok(destination)
}

fn main() {
    let cli = Cli::parse();
    logger::init_cli_logger(cli.verbose, cli.json_logs);
    tracing::debug!("CLI args: {:?}", cli);

    match run(cli) {
        Ok(path) => println!("📁 Output saved to: {}", path.display()),
        Err(e) => {
            eprintln!("❌ {}", e.user_message());
            std::process::exit(exit_code(&e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inputs_kept_by_default() {
        let cli = Cli::parse_from(["json2xlsx", "--template", "t.xlsx", "--data", "d.json"]);
        let config = build_config(&cli);
        assert!(!config.remove_inputs_on_success);
        assert_eq!(config.output_dir, PathBuf::from("public"));
        assert_eq!(config.sheet_name, "Applicants");
    }

    #[test]
    fn test_remove_inputs_flag() {
        let cli = Cli::parse_from([
            "json2xlsx",
            "-t",
            "t.xlsx",
            "-d",
            "d.json",
            "--remove-inputs",
            "--batch-size",
            "0",
        ]);
        let config = build_config(&cli);
        assert!(config.remove_inputs_on_success);
        assert_eq!(config.batch_size, 1);
    }

    #[test]
    fn test_exit_codes() {
        let mismatch = ConvertError::ConfigurationMismatch {
            headers: 2,
            fields: 1,
        };
        assert_eq!(exit_code(&mismatch), 2);
        assert_eq!(exit_code(&ConvertError::SinkFinalization("x".into())), 4);
    }
}
