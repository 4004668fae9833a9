#[tokio::main]
async fn main() -> anyhow::Result<()> {
    refiner::run().await
}
