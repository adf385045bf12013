use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use counterscan::assets::CloudinaryStore;
use counterscan::core::{CounterDb, DocumentStore, FsModelStorage, ModelCatalog, ModelRegistry};
use counterscan::detection::model::RtenModelLoader;
use counterscan::detection::ocr::OcrsReader;
use counterscan::models::DataRecordFilter;
use counterscan::sink::{GoogleSheetsClient, SinkLayouts, SinkWriter};
use counterscan::{
    Config, ExtractionPipeline, ExtractionResult, IngestRequest, IngestionWorkflow, WorkerSettings,
};

#[derive(Parser)]
#[command(name = "counterscan")]
#[command(about = "Read production counter panels from photos")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read the labeled values from one image with a registered model
    Extract {
        #[arg(value_name = "IMAGE")]
        image_path: PathBuf,

        /// Model file name as stored in the model directory
        #[arg(long)]
        model: String,

        /// Labels to read, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        labels: Vec<String>,
    },

    /// Ingest a photo for a counter: read it, record it and upload it
    Ingest {
        #[arg(value_name = "IMAGE")]
        image_path: PathBuf,

        #[arg(long)]
        counter: String,

        #[arg(long)]
        flavor: String,

        #[arg(long)]
        size: String,

        #[arg(long)]
        uploader: String,

        /// JSON object of label values to store instead of reading the image
        #[arg(long, value_name = "JSON")]
        values: Option<String>,
    },

    /// Manage the models bound to counters
    Models {
        #[command(subcommand)]
        command: ModelsCommand,
    },

    /// List stored data records
    Records {
        #[arg(long)]
        counter: Option<String>,

        #[arg(long)]
        uploader: Option<String>,
    },
}

#[derive(Subcommand)]
enum ModelsCommand {
    List {
        #[arg(long)]
        counter: Option<String>,
    },
    Register {
        #[arg(value_name = "MODEL_FILE")]
        model_path: PathBuf,

        #[arg(long)]
        counter: String,

        /// Labels the model reads, comma separated, in class index order
        #[arg(long, value_delimiter = ',', required = true)]
        labels: Vec<String>,
    },
    Retire {
        #[arg(value_name = "OCR_MODEL_ID")]
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("counterscan=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Extract {
            image_path,
            model,
            labels,
        } => {
            let registry = open_registry(&config)?;
            let pipeline = build_pipeline(&config, registry)?;
            let img = image::open(&image_path)
                .with_context(|| format!("failed to decode {}", image_path.display()))?;
            let results = pipeline.extract(&img, &model, &labels)?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Command::Ingest {
            image_path,
            counter,
            flavor,
            size,
            uploader,
            values,
        } => {
            let assets = config
                .assets
                .as_ref()
                .context("ingest needs COUNTERSCAN_CLOUD_NAME, COUNTERSCAN_CLOUD_API_KEY and COUNTERSCAN_CLOUD_API_SECRET")?;
            let assets = Arc::new(CloudinaryStore::new(assets, config.remote_timeout)?);
            let sink = match &config.sheets {
                Some(sheets) => {
                    let client =
                        GoogleSheetsClient::new(&sheets.api_base, &sheets.token, config.remote_timeout)?;
                    Some(SinkWriter::new(
                        Arc::new(client),
                        SinkLayouts::load(&sheets.layout_path)?,
                    ))
                }
                None => None,
            };

            let values_override = values
                .map(|raw| serde_json::from_str::<ExtractionResult>(&raw))
                .transpose()
                .context("--values must be a JSON object of strings")?;
            let image = tokio::fs::read(&image_path)
                .await
                .with_context(|| format!("failed to read {}", image_path.display()))?;

            let db = Arc::new(CounterDb::open(&config.database_path).await?);
            let registry = open_registry(&config)?;
            let workflow = IngestionWorkflow::start(
                db.clone(),
                build_pipeline(&config, registry)?,
                &config.upload_dir,
                assets,
                sink,
                WorkerSettings {
                    remote_timeout: config.remote_timeout,
                    ..WorkerSettings::default()
                },
                config.queue_capacity,
            )?;

            let record = workflow
                .ingest(IngestRequest {
                    image,
                    file_name: file_name_of(&image_path),
                    counter_id: counter,
                    flavor,
                    size,
                    values_override,
                    uploader,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&record)?);

            let stats = workflow.shutdown().await;
            if stats.failed > 0 {
                eprintln!("background upload failed, the local copy was kept (see log)");
            }
            db.close().await;
        }
        Command::Models { command } => {
            let db = Arc::new(CounterDb::open(&config.database_path).await?);
            let catalog = ModelCatalog::new(db.clone(), Arc::new(open_registry(&config)?));
            match command {
                ModelsCommand::List { counter } => {
                    let models = match counter {
                        Some(counter) => catalog.models_for_counter(&counter).await?,
                        None => catalog.all_models().await?,
                    };
                    println!("{}", serde_json::to_string_pretty(&models)?);
                }
                ModelsCommand::Register {
                    model_path,
                    counter,
                    labels,
                } => {
                    let bytes = tokio::fs::read(&model_path)
                        .await
                        .with_context(|| format!("failed to read {}", model_path.display()))?;
                    let record = catalog
                        .register(&counter, &file_name_of(&model_path), bytes, labels)
                        .await?;
                    println!("{}", serde_json::to_string_pretty(&record)?);
                }
                ModelsCommand::Retire { id } => {
                    let record = catalog.retire(&id).await?;
                    println!("Retired {} ({})", record.id, record.model_name());
                }
            }
            db.close().await;
        }
        Command::Records { counter, uploader } => {
            let db = CounterDb::open(&config.database_path).await?;
            let filter = DataRecordFilter {
                counter_id: counter,
                uploader_identity: uploader,
                ..DataRecordFilter::default()
            };
            let records = db.list_data_records(&filter).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
            db.close().await;
        }
    }

    Ok(())
}

fn open_registry(config: &Config) -> anyhow::Result<ModelRegistry> {
    let storage = Arc::new(FsModelStorage::new(&config.model_dir)?);
    let loader = Arc::new(RtenModelLoader::new(config.detection.clone()));
    Ok(ModelRegistry::open(storage, loader)?)
}

fn build_pipeline(config: &Config, registry: ModelRegistry) -> anyhow::Result<ExtractionPipeline> {
    let reader = OcrsReader::from_dir(&config.ocr.model_dir, config.ocr.preprocess)?;
    Ok(ExtractionPipeline::new(Arc::new(registry), Arc::new(reader)).with_crop_margin(config.crop_margin))
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string()
}
