use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    routewatch_cli::cli::app::run().await
}
