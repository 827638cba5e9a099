use anyhow::{Result, bail};
use futures_util::StreamExt;
use serde_json::json;
use std::io::{self, Write};
use tracing::debug;

use crate::cli::ChatArgs;
use crate::client_provider::ClientProvider;
use crate::config::{ConfigStore, OutputFormat};
use crate::model::{self, Message};
use crate::providers::openai::{ChatReply, ChatRequest, OpenAiClient};
use crate::repl::run_repl;

/// Chat parameters after command-line flags are layered over stored config.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatOptions {
    pub model: String,
    pub system: Option<String>,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
    pub format: OutputFormat,
    pub stream: bool,
}

impl ChatOptions {
    pub fn resolve(args: &ChatArgs, store: &ConfigStore) -> Result<Self> {
        let temperature = resolve_temperature(args.temperature, store)?;
        let format = args.format.unwrap_or_else(|| store.output_format());

        Ok(Self {
            model: args
                .model
                .clone()
                .unwrap_or_else(|| store.default_model().to_string()),
            system: args.system.clone(),
            temperature,
            max_tokens: args.max_tokens.or(store.max_tokens()),
            format,
            // JSON output needs the whole reply before anything is printed.
            stream: !args.no_stream && format != OutputFormat::Json,
        })
    }

    pub fn request(&self, messages: &[Message]) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

pub(crate) fn resolve_temperature(flag: Option<f64>, store: &ConfigStore) -> Result<f64> {
    let temperature = flag.unwrap_or_else(|| store.temperature());
    if !(0.0..=2.0).contains(&temperature) {
        bail!("Temperature must be between 0.0 and 2.0, got {temperature}");
    }
    Ok(temperature)
}

pub async fn run(provider: &ClientProvider<'_>, store: &ConfigStore, args: ChatArgs) -> Result<()> {
    let options = ChatOptions::resolve(&args, store)?;
    if args.interactive {
        return run_repl(provider, &options).await;
    }

    let Some(message) = args.message.as_deref() else {
        bail!("Please provide a message or use --interactive");
    };

    let client = provider.get_client()?;
    let messages = model::prompt_messages(options.system.as_deref(), message);
    send_turn(&client, &options, &messages, &mut io::stdout()).await?;
    Ok(())
}

/// Issues one chat request and writes the reply to `out`, returning its text.
pub async fn send_turn<W: Write>(
    client: &OpenAiClient,
    options: &ChatOptions,
    messages: &[Message],
    out: &mut W,
) -> Result<String> {
    let request = options.request(messages);
    debug!(
        model = %options.model,
        message_count = messages.len(),
        stream = options.stream,
        "sending chat request"
    );

    if !options.stream {
        let reply = client.chat(&request).await?;
        render_reply(out, options, &reply)?;
        return Ok(reply.content);
    }

    let mut fragments = client.chat_stream(&request).await?;
    write!(out, "{}", reply_prefix(options.format))?;
    out.flush()?;

    let mut content = String::new();
    while let Some(fragment) = fragments.next().await {
        let fragment = fragment?;
        write!(out, "{fragment}")?;
        out.flush()?;
        content.push_str(&fragment);
    }
    writeln!(out)?;
    Ok(content)
}

fn render_reply<W: Write>(out: &mut W, options: &ChatOptions, reply: &ChatReply) -> Result<()> {
    match options.format {
        OutputFormat::Json => {
            let body = json!({
                "model": options.model,
                "content": reply.content,
                "usage": reply.usage,
            });
            writeln!(out, "{}", serde_json::to_string_pretty(&body)?)?;
        }
        format => writeln!(out, "{}{}", reply_prefix(format), reply.content)?,
    }
    Ok(())
}

fn reply_prefix(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Markdown => "**Assistant:** ",
        OutputFormat::Plain | OutputFormat::Json => "Assistant: ",
    }
}
