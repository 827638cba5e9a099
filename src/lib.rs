pub mod cli;
pub mod client_provider;
pub mod commands;
pub mod config;
pub mod conversation;
pub mod logging;
pub mod model;
pub mod providers;
pub mod repl;

use anyhow::{Context, Result};
use clap::Parser;
use std::io;
use tracing::debug;

use cli::{Cli, Command};
use client_provider::ClientProvider;
use config::ConfigStore;

pub async fn run() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let mut store = ConfigStore::load_default().context("Failed to locate configuration file")?;
    debug!(
        path = %store.path().display(),
        default_model = %store.default_model(),
        output_format = store.output_format().as_str(),
        "loaded runtime configuration"
    );

    match cli.command.unwrap_or(Command::Chat(cli.chat)) {
        Command::Config(command) => commands::config::run(&mut store, command, &mut io::stdout()),
        Command::Chat(args) => commands::chat::run(&ClientProvider::new(&store), &store, args).await,
        Command::Complete(args) => {
            commands::complete::run(&ClientProvider::new(&store), &store, args).await
        }
        Command::Image(args) => commands::image::run(&ClientProvider::new(&store), args).await,
        Command::Embed(args) => commands::embed::run(&ClientProvider::new(&store), args).await,
        Command::Models(args) => commands::models::run(&ClientProvider::new(&store), args).await,
    }
}
