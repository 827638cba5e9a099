use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};
use tracing::warn;

use crate::client_provider::ClientProvider;
use crate::commands::chat::{ChatOptions, send_turn};
use crate::conversation::Conversation;
use crate::model::Message;

/// What to do with one line of interactive input.
#[derive(Debug, PartialEq, Eq)]
enum ReplInput<'a> {
    Skip,
    Exit,
    Clear,
    History,
    Prompt(&'a str),
}

fn classify(line: &str) -> ReplInput<'_> {
    let prompt = line.trim();
    if prompt.is_empty() {
        ReplInput::Skip
    } else if prompt.eq_ignore_ascii_case("exit") || prompt.eq_ignore_ascii_case("quit") {
        ReplInput::Exit
    } else if prompt.eq_ignore_ascii_case("clear") {
        ReplInput::Clear
    } else if prompt.eq_ignore_ascii_case("/history") {
        ReplInput::History
    } else {
        ReplInput::Prompt(prompt)
    }
}

pub async fn run_repl(provider: &ClientProvider<'_>, options: &ChatOptions) -> Result<()> {
    run_session(provider, options, io::stdin().lock(), &mut io::stdout()).await
}

async fn run_session<R: BufRead, W: Write>(
    provider: &ClientProvider<'_>,
    options: &ChatOptions,
    mut input: R,
    out: &mut W,
) -> Result<()> {
    // A missing credential ends the command instead of failing every turn.
    provider.get_client()?;
    let mut conversation = Conversation::new(options.system.as_deref());

    writeln!(out, "OpenAI Chat ({})", options.model)?;
    writeln!(
        out,
        "type 'exit' to quit, 'clear' to clear history, '/history' to inspect it\n"
    )?;

    loop {
        write!(out, "You: ")?;
        out.flush().context("Failed to flush stdout")?;

        let mut line = String::new();
        let read = input
            .read_line(&mut line)
            .context("Failed to read stdin")?;
        if read == 0 {
            break;
        }

        let prompt = match classify(&line) {
            ReplInput::Skip => continue,
            ReplInput::Exit => {
                writeln!(out, "Goodbye!")?;
                break;
            }
            ReplInput::Clear => {
                conversation.reset();
                writeln!(out, "Conversation cleared.\n")?;
                continue;
            }
            ReplInput::History => {
                print_history(out, conversation.history())?;
                continue;
            }
            ReplInput::Prompt(prompt) => prompt,
        };

        conversation.push_user(prompt);
        let result = match provider.get_client() {
            Ok(client) => send_turn(&client, options, conversation.history(), out).await,
            Err(err) => Err(err.into()),
        };

        match result {
            Ok(reply) => {
                conversation.push_assistant(reply);
                writeln!(out)?;
            }
            Err(err) => {
                conversation.discard_pending_user();
                warn!(error = %err, "interactive chat request failed");
                eprintln!("Error: {err:#}\n");
            }
        }
    }

    Ok(())
}

fn print_history<W: Write>(out: &mut W, history: &[Message]) -> io::Result<()> {
    if history.is_empty() {
        return writeln!(out, "(history is empty)\n");
    }

    for (idx, msg) in history.iter().enumerate() {
        writeln!(out, "[{}] {}: {}", idx, msg.role.as_str(), msg.content)?;
    }
    writeln!(out)
}
