use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face registration CLI")]
struct Cli {
    /// Base URL of rollcalld
    #[arg(long, env = "ROLLCALL_URL", default_value = "http://127.0.0.1:5000")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a face image for a student
    Register {
        #[arg(short, long)]
        student_id: String,
        /// Image file (JPEG, PNG, ...)
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Find the student matching a face image
    Verify {
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Show service status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let response = match cli.command {
        Commands::Register { student_id, image } => {
            let body = json!({ "student_id": student_id, "image": encode_file(&image)? });
            post(&client, &format!("{base}/register"), &body).await?
        }
        Commands::Verify { image } => {
            let body = json!({ "image": encode_file(&image)? });
            post(&client, &format!("{base}/verify"), &body).await?
        }
        Commands::Status => {
            let resp = client
                .get(format!("{base}/health"))
                .send()
                .await
                .with_context(|| format!("connecting to {base}"))?;
            read(resp).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&response)?);
    if response["status"] == "error" {
        bail!("{}", response["message"].as_str().unwrap_or("request failed"));
    }
    Ok(())
}

fn encode_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(STANDARD.encode(bytes))
}

async fn post(client: &reqwest::Client, url: &str, body: &Value) -> Result<Value> {
    tracing::debug!(url, "POST");
    let resp = client
        .post(url)
        .json(body)
        .send()
        .await
        .with_context(|| format!("connecting to {url}"))?;
    read(resp).await
}

async fn read(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    let text = resp.text().await?;
    serde_json::from_str(&text).with_context(|| format!("unexpected {status} response: {text}"))
}
