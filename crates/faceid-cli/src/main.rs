use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use faceid_core::{DetectorError, PersonDetails};
use faceid_detect::OnnxFaceAnalyzer;
use faceid_service::{
    spawn_analysis_pool, AnalysisHandle, Config, IngestError, IngestService, RegistrationRequest,
    SearchService,
};
use faceid_store::{DiskImageStore, SnapshotStore};

#[derive(Parser)]
#[command(name = "faceid", about = "Face identification: register people, search by photo")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a person from one or more photos
    Register {
        /// Photo file; repeat for multiple photos of the same person
        #[arg(long = "photo", required = true)]
        photos: Vec<PathBuf>,
        /// Full name
        #[arg(long)]
        name: String,
        /// Document (passport) number
        #[arg(long)]
        document: String,
        /// Sex: 1 or 2
        #[arg(long)]
        sex: Option<u8>,
        #[arg(long)]
        citizenship: Option<String>,
        /// Birth date, YYYY-MM-DD
        #[arg(long)]
        birth_date: Option<String>,
        #[arg(long)]
        visa_type: Option<String>,
        #[arg(long)]
        visa_number: Option<String>,
        #[arg(long)]
        entry_date: Option<String>,
        #[arg(long)]
        exit_date: Option<String>,
    },
    /// Search the registered corpus for the person in a photo
    Search {
        /// Query photo file
        #[arg(long)]
        photo: PathBuf,
        /// Similarity threshold in [0, 1]
        #[arg(long)]
        threshold: Option<f32>,
        /// Maximum number of results
        #[arg(long)]
        top_k: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    let analysis = spawn_analysis(&config)?;
    let store = SnapshotStore::open(&config.db_path)
        .await
        .with_context(|| format!("opening snapshot store at {}", config.db_path.display()))?;

    match cli.command {
        Commands::Register {
            photos,
            name,
            document,
            sex,
            citizenship,
            birth_date,
            visa_type,
            visa_number,
            entry_date,
            exit_date,
        } => {
            let images = DiskImageStore::open(&config.images_dir)
                .await
                .with_context(|| format!("opening image store at {}", config.images_dir.display()))?;
            let service = IngestService::new(analysis, store, images);

            let mut payloads = Vec::with_capacity(photos.len());
            for path in &photos {
                payloads.push(
                    std::fs::read(path).with_context(|| format!("reading {}", path.display()))?,
                );
            }

            let request = RegistrationRequest {
                photos: payloads,
                details: PersonDetails {
                    full_name: name,
                    document_number: document,
                    sex,
                    citizenship,
                    birth_date,
                    visa_type,
                    visa_number,
                    entry_date,
                    exit_date,
                },
            };

            match service.ingest(request).await {
                Ok(person_id) => {
                    print_json(&serde_json::json!({
                        "status": "ok",
                        "person_id": person_id,
                    }));
                }
                Err(err @ (IngestError::Rejected(_) | IngestError::Decode(_) | IngestError::NoPhoto)) => {
                    print_json(&serde_json::json!({
                        "status": "rejected",
                        "message": err.to_string(),
                    }));
                    std::process::exit(1);
                }
                Err(err) => return Err(err.into()),
            }
        }
        Commands::Search {
            photo,
            threshold,
            top_k,
        } => {
            let service = SearchService::new(analysis, store);
            let payload =
                std::fs::read(&photo).with_context(|| format!("reading {}", photo.display()))?;

            let outcome = service
                .search(
                    payload,
                    threshold.unwrap_or(config.search_threshold),
                    top_k.unwrap_or(config.top_k),
                )
                .await?;

            let matches: Vec<serde_json::Value> = outcome
                .matches
                .iter()
                .map(|m| {
                    serde_json::json!({
                        "person_id": m.person_id,
                        "full_name": m.details.full_name,
                        "document_number": m.details.document_number,
                        "citizenship": m.details.citizenship,
                        "birth_date": m.details.birth_date,
                        "face_ref": m.face_ref,
                        "similarity": percent(m.similarity),
                    })
                })
                .collect();

            print_json(&serde_json::json!({
                "status": "ok",
                "message": match &outcome.rejection {
                    Some(rejection) => rejection.to_string(),
                    None => "search completed".to_string(),
                },
                "scanned": outcome.scanned,
                "matches": matches,
            }));
        }
    }

    Ok(())
}

/// Start the analysis pool, loading one model pair per worker.
fn spawn_analysis(config: &Config) -> Result<AnalysisHandle> {
    let scrfd = config.scrfd_model_path();
    let arcface = config.arcface_model_path();
    let handle = spawn_analysis_pool(config.analysis_workers, config.queue_depth, |worker| {
        tracing::debug!(worker, "loading analyzer");
        OnnxFaceAnalyzer::load(&scrfd, &arcface).map_err(DetectorError::from)
    })
    .context("starting analysis workers")?;
    Ok(handle)
}

/// Similarity as a percentage with two decimals, the shape callers expect.
fn percent(similarity: f32) -> f64 {
    (similarity as f64 * 10000.0).round() / 100.0
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value}"),
    }
}
