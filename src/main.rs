#[tokio::main]
async fn main() -> anyhow::Result<()> {
    weighlog_lib::run().await
}
