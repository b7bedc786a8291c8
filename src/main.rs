use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    cdp_harness::cli::app::run().await
}
