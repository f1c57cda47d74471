//! Logger construction from structured configuration
//!
//! A configuration is any structured value with a `handlers` list; it
//! deserializes through serde, so JSON, inline literals, and generated
//! values all work the same way.

use crate::core::error::{HydraError, Result};
use crate::core::memory::DEFAULT_MEMORY_THRESHOLD;
use crate::core::queue::OverflowPolicy;
use crate::handlers::file::DEFAULT_MAX_QUEUE_SIZE;
use crate::handlers::{CompositeHandler, ConsoleHandler, ConsoleStream, FileHandler, Handler};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

fn default_max_queue_size() -> usize {
    DEFAULT_MAX_QUEUE_SIZE
}

fn default_memory_threshold() -> f64 {
    DEFAULT_MEMORY_THRESHOLD
}

fn default_true() -> bool {
    true
}

/// Destination description consumed once at logger construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HandlerConfig {
    File {
        filename: PathBuf,
        #[serde(default = "default_max_queue_size")]
        max_queue_size: usize,
        #[serde(default = "default_memory_threshold")]
        memory_threshold: f64,
        #[serde(default)]
        overflow_policy: OverflowPolicy,
    },
    Console {
        #[serde(default)]
        stream: ConsoleStream,
        #[serde(default = "default_true")]
        use_colors: bool,
        #[serde(default = "default_max_queue_size")]
        max_queue_size: usize,
        #[serde(default = "default_memory_threshold")]
        memory_threshold: f64,
        #[serde(default)]
        overflow_policy: OverflowPolicy,
    },
    Composite {
        #[serde(default)]
        handlers: Vec<HandlerConfig>,
        #[serde(default = "default_true")]
        parallel_execution: bool,
        #[serde(default)]
        fail_fast: bool,
    },
}

impl HandlerConfig {
    pub fn file(filename: impl Into<PathBuf>) -> Self {
        HandlerConfig::File {
            filename: filename.into(),
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            memory_threshold: DEFAULT_MEMORY_THRESHOLD,
            overflow_policy: OverflowPolicy::default(),
        }
    }

    pub fn console(stream: ConsoleStream) -> Self {
        HandlerConfig::Console {
            stream,
            use_colors: true,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            memory_threshold: DEFAULT_MEMORY_THRESHOLD,
            overflow_policy: OverflowPolicy::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let check_common = |component: &str, max_queue_size: usize, memory_threshold: f64| {
            if max_queue_size == 0 {
                return Err(HydraError::config(
                    component,
                    "max_queue_size must be positive",
                ));
            }
            if memory_threshold <= 0.0 || memory_threshold >= 100.0 {
                return Err(HydraError::config(
                    component,
                    format!(
                        "memory_threshold must be in (0, 100), got {}",
                        memory_threshold
                    ),
                ));
            }
            Ok(())
        };

        match self {
            HandlerConfig::File {
                filename,
                max_queue_size,
                memory_threshold,
                ..
            } => {
                if filename.as_os_str().is_empty() {
                    return Err(HydraError::config("FileHandler", "filename is required"));
                }
                check_common("FileHandler", *max_queue_size, *memory_threshold)
            }
            HandlerConfig::Console {
                max_queue_size,
                memory_threshold,
                ..
            } => check_common("ConsoleHandler", *max_queue_size, *memory_threshold),
            HandlerConfig::Composite { handlers, .. } => {
                for child in handlers {
                    child.validate()?;
                }
                Ok(())
            }
        }
    }

    /// Build the handler this configuration describes.
    pub fn build(&self) -> Result<Arc<dyn Handler>> {
        self.validate()?;
        Ok(match self {
            HandlerConfig::File {
                filename,
                max_queue_size,
                memory_threshold,
                overflow_policy,
            } => Arc::new(FileHandler::with_options(
                filename,
                *max_queue_size,
                *memory_threshold,
                *overflow_policy,
            )),
            HandlerConfig::Console {
                stream,
                use_colors,
                max_queue_size,
                memory_threshold,
                overflow_policy,
            } => Arc::new(ConsoleHandler::with_options(
                *stream,
                *use_colors,
                *max_queue_size,
                *memory_threshold,
                *overflow_policy,
            )),
            HandlerConfig::Composite {
                handlers,
                parallel_execution,
                fail_fast,
            } => {
                let mut children = Vec::with_capacity(handlers.len());
                for child in handlers {
                    children.push(child.build()?);
                }
                Arc::new(CompositeHandler::new(
                    children,
                    *parallel_execution,
                    *fail_fast,
                ))
            }
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggerConfig {
    #[serde(default)]
    pub handlers: Vec<HandlerConfig>,
}

impl LoggerConfig {
    pub fn new(handlers: Vec<HandlerConfig>) -> Self {
        Self { handlers }
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn validate(&self) -> Result<()> {
        for handler in &self.handlers {
            handler.validate()?;
        }
        Ok(())
    }
}
