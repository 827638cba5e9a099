use anyhow::{Result, bail};
use std::io::Write;

use crate::cli::ConfigCommand;
use crate::config::{ConfigKey, ConfigStore};

pub fn run<W: Write>(store: &mut ConfigStore, command: ConfigCommand, out: &mut W) -> Result<()> {
    match command {
        ConfigCommand::Set { key, value } => {
            store.set(&key, &value)?;
            let shown = if ConfigKey::parse(&key) == Some(ConfigKey::ApiKey) {
                "****"
            } else {
                value.as_str()
            };
            writeln!(out, "Set {key} = {shown}")?;
            writeln!(out, "Configuration saved to: {}", store.path().display())?;
        }
        ConfigCommand::Get { key } => match store.get(&key) {
            Some(value) => writeln!(out, "{key}: {value}")?,
            None => bail!("Key '{key}' not found"),
        },
        ConfigCommand::List => {
            writeln!(out, "Current configuration:")?;
            for (key, value) in store.list_all() {
                writeln!(out, "- {key}: {value}")?;
            }
        }
    }
    Ok(())
}
