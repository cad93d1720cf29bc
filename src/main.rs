#[tokio::main]
async fn main() -> anyhow::Result<()> {
    keygate::server::run().await
}
