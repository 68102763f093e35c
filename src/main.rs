#[tokio::main]
async fn main() {
    if let Err(e) = frontdoor_lib::run().await {
        tracing::error!(error = %e, "Front door failed to start");
        eprintln!("frontdoor: {e}");
        std::process::exit(1);
    }
}
