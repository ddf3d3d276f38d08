//! SMSC gateway entry point

use smsc::SmscService;
use std::sync::Arc;
use tarn_core::{MicroserviceRuntime, Result};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("smsc=debug".parse().unwrap()),
        )
        .json()
        .init();

    info!("Starting SMSC gateway");

    let service = Arc::new(SmscService::new().await?);
    MicroserviceRuntime::run(service).await
}
