//! Composite fan-out demo: one record, several destinations, error
//! isolation between them.
//!
//! Run with: cargo run --example composite_logging

use hydra_logger::prelude::*;
use serde_json::json;

#[tokio::main]
async fn main() -> hydra_logger::Result<()> {
    let config = LoggerConfig::from_value(json!({
        "handlers": [{
            "type": "composite",
            "parallel_execution": true,
            "handlers": [
                {"type": "file", "filename": "logs/composite.log", "max_queue_size": 256},
                {"type": "console", "stream": "stdout", "use_colors": true}
            ]
        }]
    }))?;

    let logger = AsyncHydraLogger::new(config)?;
    logger.initialize().await?;

    for i in 0..10 {
        logger.info(("BATCH", format!("item {} processed", i))).await;
    }
    logger.error(("BATCH", "item 11 rejected")).await;

    println!(
        "performance: {}",
        serde_json::to_string_pretty(&logger.get_performance_metrics())?
    );

    logger.aclose().await?;
    Ok(())
}
