use anyhow::Result;
use qabot::cli;

#[tokio::main]
async fn main() -> Result<()> {
    cli::run().await
}
