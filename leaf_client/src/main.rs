mod render;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::{AppConfig, ErrorResponse, Pipeline, PredictResponse, PredictionRecord};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::multipart;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Plant leaf disease diagnosis from the terminal
#[derive(Parser, Debug)]
#[command(name = "leaf", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Diagnose a leaf image with the local model
    Diagnose {
        /// Image to analyze (jpg, jpeg, png)
        image: PathBuf,

        /// YAML config (defaults to $LEAF_CONFIG or config/leaf.yaml)
        #[arg(long, env = "LEAF_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Upload an image to a running API server
    Predict {
        image: PathBuf,

        #[arg(long, env = "SERVER_URL", default_value = "http://localhost:8000")]
        server: String,

        /// Seconds to wait for the server to report healthy
        #[arg(long, default_value_t = 0)]
        wait_secs: u64,
    },

    /// Show past predictions stored by the API server, newest first
    History {
        #[arg(long, env = "SERVER_URL", default_value = "http://localhost:8000")]
        server: String,

        #[arg(long, default_value_t = 0)]
        skip: usize,

        #[arg(long, default_value_t = 10)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        wait_secs: u64,
    },
}

struct ApiClient {
    server_url: String,
    client: reqwest::blocking::Client,
}

impl ApiClient {
    fn new(server_url: String) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            server_url: server_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn wait_for_server(&self, timeout_secs: u64) -> Result<()> {
        if timeout_secs == 0 {
            return Ok(());
        }
        let health_url = format!("{}/health", self.server_url);
        let start = Instant::now();

        println!("Waiting for server at {}...", self.server_url);

        while start.elapsed().as_secs() < timeout_secs {
            if let Ok(response) = self.client.get(&health_url).send() {
                if response.status().is_success() {
                    println!("✓ Server is ready!");
                    return Ok(());
                }
            }
            std::thread::sleep(Duration::from_secs(2));
        }

        anyhow::bail!("✗ Server did not respond within {}s", timeout_secs)
    }

    fn predict(&self, image: &Path) -> Result<PredictResponse> {
        let form = multipart::Form::new()
            .file("file", image)
            .with_context(|| format!("Failed to read {}", image.display()))?;

        let response = self
            .client
            .post(format!("{}/predict", self.server_url))
            .multipart(form)
            .send()
            .context("Failed to send predict request")?;

        let status = response.status();
        if !status.is_success() {
            match response.json::<ErrorResponse>() {
                Ok(err) => {
                    print!("{}", render::failed_prediction(&err));
                    anyhow::bail!("Server returned {}: {}", status, err.detail);
                }
                Err(_) => anyhow::bail!("Server returned {}", status),
            }
        }

        Ok(response.json()?)
    }

    fn history(&self, skip: usize, limit: usize) -> Result<Vec<PredictionRecord>> {
        let response = self
            .client
            .get(format!("{}/history", self.server_url))
            .query(&[("skip", skip), ("limit", limit)])
            .send()
            .context("Failed to fetch history")?;

        if !response.status().is_success() {
            anyhow::bail!("Server returned error: {}", response.status());
        }

        Ok(response.json()?)
    }
}

fn diagnose(image_path: &Path, config_path: Option<PathBuf>) -> Result<()> {
    let config = match config_path {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::from_env()?.0,
    };

    let pipeline = Pipeline::from_config(&config);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));

    spinner.set_message("Loading model...");
    if let Err(e) = pipeline.load_model() {
        spinner.finish_and_clear();
        println!("❌ {}", e);
        anyhow::bail!("Train and export the model first, or point model.candidates at it");
    }
    spinner.set_message("Analyzing...");

    let prediction = std::fs::read(image_path)
        .with_context(|| format!("Failed to read {}", image_path.display()))
        .and_then(|bytes| Ok(pipeline.predict_bytes(&bytes)?));
    spinner.finish_and_clear();
    let prediction = prediction?;

    let result = &prediction.result;
    let labelled = pipeline.labels().get(result.raw_index) == Some(result.top_label.as_str());
    let info = labelled.then(|| pipeline.describe(&result.top_label));

    println!("✅ Model loaded successfully!");
    println!("Image: {}", image_path.display());
    print!("{}", render::diagnosis(result, info.as_ref()));

    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("common=warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Diagnose { image, config } => diagnose(&image, config),
        Command::Predict {
            image,
            server,
            wait_secs,
        } => {
            let client = ApiClient::new(server)?;
            client.wait_for_server(wait_secs)?;
            let response = client.predict(&image)?;
            print!("{}", render::remote_prediction(&response));
            Ok(())
        }
        Command::History {
            server,
            skip,
            limit,
            wait_secs,
        } => {
            let client = ApiClient::new(server)?;
            client.wait_for_server(wait_secs)?;
            let records = client.history(skip, limit)?;
            print!("{}", render::history(&records));
            Ok(())
        }
    }
}
