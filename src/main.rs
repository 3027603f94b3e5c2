//! # Prompt Gallery CLI (`pgen`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pgen serve` | Start the generation server |
//! | `pgen parse <file>` | Print the prompts found in a `.txt`, `.csv`, or `.xlsx` file |
//! | `pgen generate "<prompt>"` | Generate one image through the running server |
//! | `pgen batch <file>` | Generate one image per prompt, optionally zipping the results |
//!
//! ## Examples
//!
//! ```bash
//! # Start the server (reads STABILITY_API_KEY and PORT)
//! pgen serve --config ./config/pgen.toml
//!
//! # Check what a spreadsheet will submit
//! pgen parse prompts.xlsx
//!
//! # Run a batch against the server and download everything as a zip
//! pgen batch prompts.csv --zip generated-images.zip
//!
//! # Same, without a server: call the provider in-process
//! pgen batch prompts.txt --local --zip out.zip
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use prompt_gallery::archive::{package_archive, LocationFetcher, ARCHIVE_FILENAME};
use prompt_gallery::batch::{run_batch, ImageGenerator};
use prompt_gallery::blob_store::BlobStore;
use prompt_gallery::client::EndpointClient;
use prompt_gallery::config::{self, Config};
use prompt_gallery::generate::{ImageLocation, ImageService};
use prompt_gallery::models::{Gallery, GeneratedImage, Prompt};
use prompt_gallery::progress::ProgressMode;
use prompt_gallery::prompts::load_prompts;
use prompt_gallery::provider::create_provider;
use prompt_gallery::server;

/// Prompt Gallery: batch AI image generation from prompt files.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. The file is optional; defaults plus `PORT` and
/// `STABILITY_API_KEY` from the environment are enough to run.
#[derive(Parser)]
#[command(name = "pgen", version, about = "Batch AI image generation from prompt files")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pgen.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the generation server.
    ///
    /// Serves `POST /api/generate-image`, the stored images under
    /// `/images`, and `GET /health`.
    Serve,

    /// Print the prompts extracted from a file.
    Parse {
        /// A `.txt`, `.csv`, or `.xlsx` file.
        file: PathBuf,
    },

    /// Generate a single image through the running server.
    Generate {
        prompt: String,

        /// Print the descriptor as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate one image per prompt in a file, strictly in order.
    ///
    /// Stops at the first failure; images generated before it are kept
    /// (and packaged when `--zip` is given), but the command exits non-zero.
    Batch {
        /// A `.txt`, `.csv`, or `.xlsx` file.
        file: PathBuf,

        /// Write all generated images to this zip archive.
        #[arg(long, num_args = 0..=1, default_missing_value = ARCHIVE_FILENAME)]
        zip: Option<PathBuf>,

        /// Call the image provider in-process instead of the server.
        #[arg(long)]
        local: bool,

        /// Progress output on stderr. Defaults to `human` on a TTY, else `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,

        /// Print descriptors as a JSON array.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = match cli.command {
        Commands::Serve => "prompt_gallery=info,tower_http=info",
        _ => "prompt_gallery=warn",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Parse { file } => {
            let prompts = load_prompts(&file).await?;
            for prompt in &prompts {
                println!("{}", prompt);
            }
            println!("Found {} prompts in {}.", prompts.len(), file.display());
        }
        Commands::Generate { prompt, json } => {
            let prompt = Prompt::new(&prompt).context("No prompt provided")?;
            let client = EndpointClient::new(&cfg.client.server_url);
            let mut gallery = Gallery::new();
            gallery.push_front(client.generate(&prompt).await?);
            print_images(&gallery.to_vec(), json)?;
        }
        Commands::Batch {
            file,
            zip,
            local,
            progress,
            json,
        } => {
            run_batch_command(&cfg, &file, zip, local, progress, json).await?;
        }
    }

    Ok(())
}

async fn run_batch_command(
    cfg: &Config,
    file: &Path,
    zip: Option<PathBuf>,
    local: bool,
    progress: Option<ProgressMode>,
    json: bool,
) -> Result<()> {
    let prompts = load_prompts(file).await?;
    if prompts.is_empty() {
        bail!("No prompts found in {}", file.display());
    }
    eprintln!("Found {} prompts in {}.", prompts.len(), file.display());

    let generator: Box<dyn ImageGenerator> = if local {
        let provider = create_provider(&cfg.provider)?;
        let store = BlobStore::new(
            cfg.storage.image_dir.clone(),
            cfg.storage.url_prefix.clone(),
            cfg.provider.output_format.clone(),
        );
        Box::new(ImageService::new(provider, store).with_location(ImageLocation::FilePath))
    } else {
        Box::new(EndpointClient::new(&cfg.client.server_url))
    };

    let reporter = progress.unwrap_or_else(ProgressMode::default_for_tty).reporter();
    let outcome = run_batch(generator.as_ref(), &prompts, reporter.as_ref()).await;

    let mut gallery = Gallery::new();
    gallery.extend(outcome.images);
    print_images(&gallery.to_vec(), json)?;

    if let Some(path) = zip {
        if gallery.is_empty() {
            eprintln!("No images to package.");
        } else {
            let report = package_archive(&gallery.to_vec(), Arc::new(LocationFetcher::new())).await?;
            tokio::fs::write(&path, &report.bytes)
                .await
                .with_context(|| format!("Failed to write archive: {}", path.display()))?;
            let mut summary = format!(
                "Your zip file with {} images has been written to {}.",
                report.entries,
                path.display()
            );
            if report.failed > 0 {
                summary.push_str(&format!(" {} image(s) failed to download.", report.failed));
            }
            println!("{}", summary);
        }
    }

    if let Some(failure) = outcome.failure {
        bail!(
            "{} (prompt {} of {}; {} generated, {} not attempted)",
            failure,
            failure.index + 1,
            outcome.total,
            gallery.len(),
            outcome.total - failure.index - 1
        );
    }
    Ok(())
}

fn print_images(images: &[GeneratedImage], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(images)?);
    } else {
        for image in images {
            println!("{}  {}", image.image_url, image.prompt);
        }
    }
    Ok(())
}
