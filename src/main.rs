#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = eduvers_assess::run().await {
        eprintln!("eduvers-assess fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
