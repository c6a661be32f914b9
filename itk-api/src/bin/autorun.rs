//! itk-autorun - submit a background job, wait for it, download the result

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;

/// Drive one job through /run, /status and /download
#[derive(Parser, Debug)]
#[command(name = "itk-autorun")]
#[command(version)]
struct Args {
    /// Service base URL
    #[arg(long, default_value = "http://127.0.0.1:8000", env = "ITK_BASE_URL")]
    base_url: String,

    /// Request JSON, bare or wrapped as {"input": {...}}
    #[arg(long)]
    request: PathBuf,

    /// Seconds between status polls
    #[arg(long, default_value = "10")]
    poll_secs: u64,
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
}

fn wrap_request(request: Value) -> Value {
    if request.get("input").is_some() {
        request
    } else {
        json!({ "input": request })
    }
}

async fn submit(client: &reqwest::Client, base_url: &str, payload: &Value) -> Result<String> {
    let response = client
        .post(format!("{}/run", base_url))
        .json(payload)
        .send()
        .await
        .context("Failed to submit job")?;
    if !response.status().is_success() {
        bail!("Failed to start job: {}", response.text().await.unwrap_or_default());
    }
    let run: RunResponse = response.json().await.context("Unexpected /run response")?;
    Ok(run.id)
}

async fn wait_for_completion(client: &reqwest::Client, base_url: &str, id: &str, poll: Duration) -> Result<()> {
    loop {
        let response = client
            .get(format!("{}/status/{}", base_url, id))
            .send()
            .await
            .context("Failed to poll status")?;
        if !response.status().is_success() {
            bail!("Error polling status: {}", response.text().await.unwrap_or_default());
        }
        let status: StatusResponse = response.json().await.context("Unexpected /status response")?;
        match status.status.as_str() {
            "COMPLETED" => return Ok(()),
            "FAILED" => bail!("Job failed: {}", status.error.unwrap_or_default()),
            other => {
                println!("Status: {} - waiting...", other);
                tokio::time::sleep(poll).await;
            }
        }
    }
}

async fn download(client: &reqwest::Client, base_url: &str, id: &str) -> Result<PathBuf> {
    let response = client
        .get(format!("{}/download/{}", base_url, id))
        .send()
        .await
        .context("Failed to start download")?;
    if !response.status().is_success() {
        bail!("Download failed: {}", response.text().await.unwrap_or_default());
    }

    let target = PathBuf::from(format!("{}.mp4", id));
    let mut file = tokio::fs::File::create(&target)
        .await
        .with_context(|| format!("Failed to create {}", target.display()))?;
    let mut chunks = response.bytes_stream();
    while let Some(chunk) = chunks.next().await {
        file.write_all(&chunk.context("Download interrupted")?).await?;
    }
    file.flush().await?;
    Ok(target)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let base_url = args.base_url.trim_end_matches('/');

    let text = std::fs::read_to_string(&args.request)
        .with_context(|| format!("Failed to read {}", args.request.display()))?;
    let payload = wrap_request(serde_json::from_str(&text).context("Request is not valid JSON")?);

    let client = reqwest::Client::new();
    let id = submit(&client, base_url, &payload).await?;
    println!("Job started: {}", id);

    wait_for_completion(&client, base_url, &id, Duration::from_secs(args.poll_secs.max(1))).await?;
    println!("Job completed");

    let target = download(&client, base_url, &id).await?;
    println!("Saved output video as {}", target.display());
    Ok(())
}
