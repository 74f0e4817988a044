use anyhow::Result;

mod bootstrap;
mod commands;

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> Result<()> {
    bootstrap::run().await
}
