use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::OutputFormat;

#[derive(Debug, Parser)]
#[command(
    name = "openai-cli",
    version,
    about = "A command-line interface for the OpenAI API",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Arguments for the default `chat` command.
    #[command(flatten)]
    pub chat: ChatArgs,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Chat with a model
    Chat(ChatArgs),
    /// Generate text completions (uses the chat API)
    Complete(CompleteArgs),
    /// Generate images
    Image(ImageArgs),
    /// Generate text embeddings
    Embed(EmbedArgs),
    /// List available models
    Models(ModelsArgs),
    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Clone, Default, Args)]
pub struct ChatArgs {
    /// The message to send
    pub message: Option<String>,

    /// The model to use [default: configured default-model]
    #[arg(short, long)]
    pub model: Option<String>,

    /// Interactive chat mode
    #[arg(short, long)]
    pub interactive: bool,

    /// Wait for the complete reply instead of streaming it
    #[arg(long)]
    pub no_stream: bool,

    /// System prompt
    #[arg(long)]
    pub system: Option<String>,

    /// Temperature (0.0-2.0) [default: configured temperature]
    #[arg(long)]
    pub temperature: Option<f64>,

    /// Maximum tokens to generate
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_tokens: Option<u32>,

    /// Output format [default: configured output-format]
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
}

#[derive(Debug, Clone, Args)]
pub struct CompleteArgs {
    /// The prompt for completion
    pub prompt: String,

    #[arg(short, long, default_value = "gpt-3.5-turbo")]
    pub model: String,

    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_tokens: u32,

    /// Temperature (0.0-2.0) [default: configured temperature]
    #[arg(long)]
    pub temperature: Option<f64>,

    /// Number of completions to generate
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub number: u32,

    /// Show token usage
    #[arg(long)]
    pub show_tokens: bool,
}

#[derive(Debug, Clone, Args)]
pub struct ImageArgs {
    /// The prompt for image generation
    pub prompt: String,

    /// Number of images to generate (1-10)
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub number: u8,

    /// Image size (256x256, 512x512, 1024x1024, 1024x1792, 1792x1024)
    #[arg(long, default_value = "1024x1024")]
    pub size: String,

    /// Model to use (dall-e-2, dall-e-3)
    #[arg(long, default_value = "dall-e-3")]
    pub model: String,

    /// Image quality (standard, hd)
    #[arg(long, default_value = "standard")]
    pub quality: String,

    /// Directory to save images into; `.` only prints the results
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct EmbedArgs {
    /// The text to embed
    pub text: String,

    #[arg(short, long, default_value = "text-embedding-3-small")]
    pub model: String,

    /// Dimensions for the embedding
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub dimensions: Option<u32>,

    /// Output file for the embedding (JSON)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Show embedding statistics
    #[arg(long)]
    pub stats: bool,
}

#[derive(Debug, Clone, Args)]
pub struct ModelsArgs {
    /// Filter models by name
    #[arg(long)]
    pub filter: Option<String>,

    /// Show creation date and owner
    #[arg(long)]
    pub detailed: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum ConfigCommand {
    /// Set a configuration value
    Set { key: String, value: String },
    /// Get a configuration value
    Get { key: String },
    /// List all configuration values
    List,
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};

    use super::{Cli, Command, ConfigCommand};
    use crate::config::OutputFormat;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn bare_message_uses_default_chat() {
        let cli = Cli::try_parse_from(["openai-cli", "hello there"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.chat.message.as_deref(), Some("hello there"));
    }

    #[test]
    fn chat_subcommand_parses_options() {
        let cli = Cli::try_parse_from([
            "openai-cli",
            "chat",
            "hi",
            "-m",
            "gpt-4o-mini",
            "--no-stream",
            "--format",
            "json",
            "--max-tokens",
            "20",
        ])
        .unwrap();
        let Some(Command::Chat(args)) = cli.command else {
            panic!("expected chat command");
        };
        assert_eq!(args.message.as_deref(), Some("hi"));
        assert_eq!(args.model.as_deref(), Some("gpt-4o-mini"));
        assert!(args.no_stream);
        assert_eq!(args.format, Some(OutputFormat::Json));
        assert_eq!(args.max_tokens, Some(20));
    }

    #[test]
    fn config_set_parses_key_and_value() {
        let cli = Cli::try_parse_from(["openai-cli", "config", "set", "temperature", "0.5"]).unwrap();
        let Some(Command::Config(ConfigCommand::Set { key, value })) = cli.command else {
            panic!("expected config set");
        };
        assert_eq!(key, "temperature");
        assert_eq!(value, "0.5");
    }

    #[test]
    fn image_count_is_bounded() {
        assert!(Cli::try_parse_from(["openai-cli", "image", "a cat", "-n", "11"]).is_err());
        assert!(Cli::try_parse_from(["openai-cli", "image", "a cat", "-n", "0"]).is_err());
        assert!(Cli::try_parse_from(["openai-cli", "image", "a cat", "-n", "10"]).is_ok());
    }
}
