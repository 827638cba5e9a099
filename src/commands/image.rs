use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::cli::ImageArgs;
use crate::client_provider::ClientProvider;
use crate::providers::openai::{GeneratedImage, ImageRequest, OpenAiClient};

pub async fn run(provider: &ClientProvider<'_>, args: ImageArgs) -> Result<()> {
    let client = provider.get_client()?;

    println!("Generating image with prompt: \"{}\"", args.prompt);
    println!(
        "Model: {}, Size: {}, Quality: {}",
        args.model, args.size, args.quality
    );

    let request = ImageRequest {
        prompt: args.prompt,
        model: args.model,
        size: args.size,
        quality: args.quality,
        count: args.number,
    };
    let images = client.create_images(&request).await?;
    if images.is_empty() {
        println!("No images were generated");
        return Ok(());
    }

    let target_dir = save_dir(&args.output);
    if let Some(dir) = target_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory '{}'", dir.display()))?;
    }

    println!("\nGenerated {} image(s):", images.len());
    let timestamp = chrono::Utc::now().timestamp();
    for (idx, image) in images.iter().enumerate() {
        let index = idx + 1;
        match image {
            GeneratedImage::Url(url) => println!("{index}. URL: {url}"),
            GeneratedImage::Base64(data) => {
                println!("{index}. Base64 data received (length: {})", data.len())
            }
        }

        if let Some(dir) = target_dir {
            let path = dir.join(image_file_name(index, timestamp));
            let bytes = image_bytes(&client, image).await?;
            fs::write(&path, bytes)
                .with_context(|| format!("Failed to write image to '{}'", path.display()))?;
            debug!(path = %path.display(), "saved generated image");
            println!("   Saved to: {}", path.display());
        }
    }

    Ok(())
}

/// `.` means print only.
fn save_dir(output: &Path) -> Option<&Path> {
    (output != Path::new(".")).then_some(output)
}

fn image_file_name(index: usize, timestamp: i64) -> PathBuf {
    PathBuf::from(format!("dalle_{index}_{timestamp}.png"))
}

async fn image_bytes(client: &OpenAiClient, image: &GeneratedImage) -> Result<Vec<u8>> {
    match image {
        GeneratedImage::Url(url) => client.download(url).await,
        GeneratedImage::Base64(data) => decode_image(data),
    }
}

fn decode_image(data: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(data.trim())
        .context("Image data is not valid base64")
}
