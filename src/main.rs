#[tokio::main]
async fn main() -> anyhow::Result<()> {
    prerender_cli::cli::run().await
}
