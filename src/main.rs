use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;

use merit_ingest::db::{self, PgStore};
use merit_ingest::normalize::{normalize_row, student_identity};
use merit_ingest::{ingest_upload, parse_upload, report};
use merit_ingest::{IngestConfig, ReportConvention, UploadRequest, UploadType};

#[derive(Parser)]
#[command(name = "merit-ingest")]
#[command(about = "Behaviour event ingestion for the merit points platform", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a small demo student directory
    Seed,
    /// Ingest a CSV or Discipline Event Summary PDF
    Ingest {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        source_system: Option<String>,
        #[arg(long, default_value = "append")]
        upload_type: UploadType,
        #[arg(long)]
        start_date: Option<NaiveDate>,
        #[arg(long)]
        end_date: Option<NaiveDate>,
        /// Overrides content sniffing, e.g. `application/pdf`
        #[arg(long)]
        content_type: Option<String>,
        #[arg(long)]
        uploaded_by: Option<String>,
        /// Write rejected rows to this CSV file
        #[arg(long)]
        errors_out: Option<PathBuf>,
        /// Write a markdown summary to this file
        #[arg(long)]
        report: Option<PathBuf>,
        /// JSON file describing the discipline report convention
        #[arg(long)]
        convention: Option<PathBuf>,
    },
    /// Parse and validate a file without touching the database
    Preview {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        content_type: Option<String>,
        #[arg(long)]
        convention: Option<PathBuf>,
    },
}

fn load_config(convention: Option<&Path>) -> anyhow::Result<IngestConfig> {
    let config = IngestConfig::default();
    match convention {
        Some(path) => Ok(config.with_convention(ReportConvention::from_json_file(path)?)),
        None => Ok(config),
    }
}

fn read_request(file: &Path, content_type: Option<String>) -> anyhow::Result<UploadRequest> {
    let payload =
        std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let file_name = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());

    let mut request = UploadRequest::new(file_name, payload);
    request.content_type = content_type;
    Ok(request)
}

async fn connect() -> anyhow::Result<sqlx::PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to the merit platform Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");
    let cli = Cli::parse();

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect().await?;
            let count = db::seed(&pool).await?;
            println!("Seeded {count} students.");
        }
        Commands::Ingest {
            file,
            source_system,
            upload_type,
            start_date,
            end_date,
            content_type,
            uploaded_by,
            errors_out,
            report: report_path,
            convention,
        } => {
            let config = load_config(convention.as_deref())?;
            let mut request = read_request(&file, content_type)?;
            request.source_system = source_system;
            request.upload_type = upload_type;
            request.range_start = start_date;
            request.range_end = end_date;
            request.uploaded_by = uploaded_by;

            let pool = connect().await?;
            let store = PgStore::new(pool);
            let summary = ingest_upload(&store, request, &config)
                .await
                .with_context(|| format!("ingestion of {} failed", file.display()))?;

            println!(
                "Upload {}: accepted {} of {} rows ({} rejected).",
                summary.upload_id,
                summary.accepted,
                summary.rows_parsed,
                summary.errors.len()
            );
            for error in summary.errors.iter().take(10) {
                println!("- row {}: {}", error.row_number, error.message);
            }

            if let Some(path) = errors_out {
                report::write_errors_csv_file(&path, &summary.errors)?;
                println!("Row errors written to {}.", path.display());
            }
            if let Some(path) = report_path {
                std::fs::write(&path, report::build_report(&summary))?;
                println!("Report written to {}.", path.display());
            }
        }
        Commands::Preview {
            file,
            content_type,
            convention,
        } => {
            let config = load_config(convention.as_deref())?;
            let request = read_request(&file, content_type)?;
            let (format, rows) =
                parse_upload(&request, config.max_upload_bytes, &config.convention)?;

            println!("{} rows parsed as {format:?}.", rows.len());
            for (index, row) in rows.iter().enumerate() {
                let identity = student_identity(row);
                let student = identity.explicit_id.or(identity.name).unwrap_or_default();
                let problem = normalize_row(row, &student, &config.default_source_system)
                    .err()
                    .map(|p| p.to_string());
                let line = serde_json::json!({
                    "row_number": index + 2,
                    "fields": row.to_map(),
                    "problem": problem,
                });
                println!("{line}");
            }
        }
    }

    Ok(())
}
