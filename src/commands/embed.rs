use anyhow::{Context, Result};
use serde_json::json;
use std::fs;

use crate::cli::EmbedArgs;
use crate::client_provider::ClientProvider;
use crate::providers::openai::EmbeddingRequest;

const PREVIEW_TEXT_CHARS: usize = 50;
const PREVIEW_VALUES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
struct EmbeddingStats {
    dimensions: usize,
    min: f32,
    max: f32,
    mean: f32,
}

impl EmbeddingStats {
    fn from_values(values: &[f32]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let min = values.iter().copied().fold(f32::INFINITY, f32::min);
        let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mean = values.iter().sum::<f32>() / values.len() as f32;
        Some(Self {
            dimensions: values.len(),
            min,
            max,
            mean,
        })
    }
}

pub async fn run(provider: &ClientProvider<'_>, args: EmbedArgs) -> Result<()> {
    let client = provider.get_client()?;

    println!("Generating embeddings...");
    println!("Text: \"{}\"", preview_text(&args.text));
    println!("Model: {}", args.model);

    let request = EmbeddingRequest {
        input: args.text.clone(),
        model: args.model.clone(),
        dimensions: args.dimensions,
    };
    let embedding = client.create_embedding(&request).await?;

    if let Some(output) = &args.output {
        let document = json!({
            "embedding": embedding,
            "model": args.model,
            "text": args.text,
            "dimensions": embedding.len(),
        });
        fs::write(output, serde_json::to_string_pretty(&document)?)
            .with_context(|| format!("Failed to write embedding to '{}'", output.display()))?;
        println!("\nEmbedding saved to: {}", output.display());
        return Ok(());
    }

    if args.stats {
        println!("\nEmbedding statistics:");
        match EmbeddingStats::from_values(&embedding) {
            Some(stats) => {
                println!("- Dimensions: {}", stats.dimensions);
                println!("- Min value: {}", stats.min);
                println!("- Max value: {}", stats.max);
                println!("- Mean value: {}", stats.mean);
            }
            None => println!("- Dimensions: 0"),
        }
    } else {
        println!("\nEmbedding vector (first {PREVIEW_VALUES} values):");
        println!("{}", preview_values(&embedding));
        println!("... ({} total dimensions)", embedding.len());
    }

    Ok(())
}

fn preview_text(text: &str) -> String {
    if text.chars().count() > PREVIEW_TEXT_CHARS {
        let head: String = text.chars().take(PREVIEW_TEXT_CHARS).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

fn preview_values(values: &[f32]) -> String {
    values
        .iter()
        .take(PREVIEW_VALUES)
        .map(|value| format!("{value:.6}"))
        .collect::<Vec<_>>()
        .join(", ")
}
