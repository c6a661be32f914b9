//! itk-save-video - write `output.video` from a JSON response to a file

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;

/// Read a serverless-style JSON response and save output.video as MP4
#[derive(Parser, Debug)]
#[command(name = "itk-save-video")]
#[command(version)]
struct Args {
    /// JSON file; standard input when omitted
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output video file
    #[arg(short, long, default_value = "output.mp4")]
    output: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let text = match &args.input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read standard input")?;
            text
        }
    };
    let response: Value = serde_json::from_str(&text).context("Input is not valid JSON")?;

    let bytes = itk_api::utils::save_video_from_json(&response, &args.output)?;
    println!("Saved video to {} ({} bytes)", args.output.display(), bytes);
    Ok(())
}
