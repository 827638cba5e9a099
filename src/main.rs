use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = openai_cli::logging::init();
    openai_cli::run().await
}
