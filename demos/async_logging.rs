//! Basic async logging demo: file + console destinations, traces, and
//! the health surface.
//!
//! Run with: cargo run --example async_logging

use hydra_logger::prelude::*;

#[tokio::main]
async fn main() -> hydra_logger::Result<()> {
    let logger = AsyncHydraLogger::builder()
        .file("logs/demo.log")
        .console(ConsoleStream::Stderr)
        .build()?;
    logger.initialize().await?;

    logger.info("service starting").await;
    logger.info(("API", "listening on :8080")).await;
    logger.warning(("API", "slow upstream detected")).await;

    // Scoped trace: records logged inside carry trace/span/corr ids.
    let store = logger.context().clone();
    store
        .with_trace(None, None, async {
            logger.info(("API", "handling request")).await;
            ContextStore::new()
                .with_span("db_query", async {
                    logger.debug(("DB", "SELECT * FROM users")).await;
                })
                .await;
            logger.info(("API", "request complete")).await;
        })
        .await;

    println!(
        "health: {}",
        serde_json::to_string_pretty(&logger.get_health_status())?
    );

    logger.aclose().await?;
    Ok(())
}
