use anyhow::Result;

use crate::cli::CompleteArgs;
use crate::client_provider::ClientProvider;
use crate::commands::chat::resolve_temperature;
use crate::config::ConfigStore;
use crate::model;
use crate::providers::openai::{ChatRequest, Usage};

pub async fn run(
    provider: &ClientProvider<'_>,
    store: &ConfigStore,
    args: CompleteArgs,
) -> Result<()> {
    let client = provider.get_client()?;
    let request = ChatRequest {
        model: args.model,
        messages: model::prompt_messages(None, &args.prompt),
        temperature: resolve_temperature(args.temperature, store)?,
        max_tokens: Some(args.max_tokens),
    };

    println!("Generating completion...");
    for idx in 0..args.number {
        if args.number > 1 {
            println!("\nCompletion {}:", idx + 1);
        }

        let reply = client.chat(&request).await?;
        println!("{}", reply.content.trim());
        if args.show_tokens {
            match reply.usage {
                Some(usage) => println!("{}", format_usage(&usage)),
                None => println!("Tokens: usage not reported"),
            }
        }
    }

    Ok(())
}

fn format_usage(usage: &Usage) -> String {
    format!(
        "Tokens: {} prompt + {} completion = {} total",
        usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
    )
}

#[cfg(test)]
mod tests {
    use super::format_usage;
    use crate::providers::openai::Usage;

    #[test]
    fn usage_line_lists_all_counts() {
        let usage = Usage {
            prompt_tokens: 12,
            completion_tokens: 30,
            total_tokens: 42,
        };
        assert_eq!(
            format_usage(&usage),
            "Tokens: 12 prompt + 30 completion = 42 total"
        );
    }
}
