#[tokio::main]
async fn main() -> anyhow::Result<()> {
  vitals_companion_lib::run().await
}
