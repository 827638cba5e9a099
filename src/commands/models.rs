use anyhow::Result;
use chrono::DateTime;

use crate::cli::ModelsArgs;
use crate::client_provider::ClientProvider;
use crate::providers::openai::ModelInfo;

pub async fn run(provider: &ClientProvider<'_>, args: ModelsArgs) -> Result<()> {
    let client = provider.get_client()?;

    println!("Fetching available models...");
    let models = client.list_models().await?;
    let models = filter_models(models, args.filter.as_deref());

    if models.is_empty() {
        println!(
            "No models found matching filter: {}",
            args.filter.as_deref().unwrap_or("")
        );
        return Ok(());
    }

    if args.detailed {
        print!("{}", render_table(&models));
    } else {
        println!("Available models:");
        for model in &models {
            println!("- {}", model.id);
        }
    }

    Ok(())
}

/// Case-insensitive substring match on the model id.
fn filter_models(models: Vec<ModelInfo>, filter: Option<&str>) -> Vec<ModelInfo> {
    let Some(filter) = filter.map(str::to_lowercase) else {
        return models;
    };
    models
        .into_iter()
        .filter(|model| model.id.to_lowercase().contains(&filter))
        .collect()
}

fn created_date(created: i64) -> String {
    DateTime::from_timestamp(created, 0)
        .map(|date| date.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn render_table(models: &[ModelInfo]) -> String {
    const HEADERS: [&str; 3] = ["Model ID", "Created", "Owned By"];

    let rows: Vec<[String; 3]> = models
        .iter()
        .map(|model| {
            [
                model.id.clone(),
                created_date(model.created),
                model.owned_by.clone(),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let mut push_row = |cells: [&str; 3]| {
        let line = cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("  ");
        out.push_str(line.trim_end());
        out.push('\n');
    };

    push_row(HEADERS);
    push_row(widths.map(|width| "-".repeat(width)).each_ref().map(String::as_str));
    for row in &rows {
        push_row(row.each_ref().map(String::as_str));
    }
    out
}
