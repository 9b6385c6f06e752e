//! Onboarding Worker - Entry Point
//!
//! Runs the ingestion and fan-out consumers against Redis streams.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    onboarding_worker::run().await
}
