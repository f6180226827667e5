#[tokio::main]
async fn main() -> anyhow::Result<()> {
    reelwatch_lib::run().await
}
