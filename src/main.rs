#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = schoolsphere_cbt::run().await {
        eprintln!("schoolsphere-cbt fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
