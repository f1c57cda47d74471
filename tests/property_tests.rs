//! Property-based tests for hydra_logger using proptest

use hydra_logger::prelude::*;
use hydra_logger::core::ShutdownSignal;
use proptest::prelude::*;
use std::time::Duration;

fn any_level() -> impl Strategy<Value = LogLevel> {
    prop_oneof![
        Just(LogLevel::Debug),
        Just(LogLevel::Info),
        Just(LogLevel::Warning),
        Just(LogLevel::Error),
        Just(LogLevel::Critical),
    ]
}

// ============================================================================
// LogLevel properties
// ============================================================================

proptest! {
    /// String conversions roundtrip for every level
    #[test]
    fn test_level_str_roundtrip(level in any_level()) {
        let as_str = level.to_str();
        let parsed: LogLevel = as_str.parse().unwrap();
        prop_assert_eq!(level, parsed);
    }

    /// Level ordering matches the numeric ranks
    #[test]
    fn test_level_ordering(level1 in any_level(), level2 in any_level()) {
        prop_assert_eq!(level1 <= level2, level1.rank() <= level2.rank());
        prop_assert_eq!(level1 < level2, level1.rank() < level2.rank());
    }

    /// Parsing is case-insensitive
    #[test]
    fn test_level_case_insensitive(level in any_level(), use_lower in any::<bool>()) {
        let input = if use_lower {
            level.to_str().to_lowercase()
        } else {
            level.to_str().to_string()
        };
        prop_assert_eq!(input.parse::<LogLevel>().unwrap(), level);
    }
}

// ============================================================================
// Record properties
// ============================================================================

proptest! {
    /// The message body passes through record construction and line
    /// formatting byte-for-byte
    #[test]
    fn test_message_passthrough(message in ".*") {
        let record = LogRecord::new(LogLevel::Info, "P", message.clone());
        prop_assert_eq!(&record.message, &message);
        prop_assert!(record.format_line().contains(&message));
    }

    /// The layer defaults to DEFAULT only for empty input
    #[test]
    fn test_layer_defaulting(layer in "[A-Z]{0,8}") {
        let record = LogRecord::new(LogLevel::Info, layer.clone(), "m");
        if layer.is_empty() {
            prop_assert_eq!(&record.layer, "DEFAULT");
        } else {
            prop_assert_eq!(&record.layer, &layer);
        }
    }

    /// Records serialize to JSON and back without losing the basics
    #[test]
    fn test_record_json_roundtrip(message in ".*", level in any_level()) {
        let record = LogRecord::new(level, "RT", message.clone());
        let json = serde_json::to_string(&record).unwrap();
        let parsed: LogRecord = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(parsed.level, level);
        prop_assert_eq!(parsed.message, message);
    }
}

// ============================================================================
// Queue accounting properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// For N puts on a drop-oldest queue of capacity C with no consumer:
    /// enqueued + dropped = N, size <= C, dropped = max(0, N - C)
    #[test]
    fn test_drop_oldest_accounting(capacity in 1usize..16, puts in 0usize..64) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let queue = BoundedQueue::new(
                capacity,
                OverflowPolicy::DropOldest,
                ShutdownSignal::new(),
            )
            .with_timeouts(Duration::from_millis(1), Duration::from_millis(1));

            for i in 0..puts {
                queue.put(i).await.unwrap();
            }

            let stats = queue.stats();
            prop_assert_eq!(stats.enqueued + stats.dropped, puts as u64);
            prop_assert!(stats.size <= capacity);
            prop_assert_eq!(stats.dropped, puts.saturating_sub(capacity) as u64);
            Ok(())
        })?;
    }

    /// With a consumer in the loop, accounting still balances:
    /// enqueued + dropped = puts and dequeued <= enqueued
    #[test]
    fn test_accounting_with_consumer(
        capacity in 1usize..8,
        puts in 0usize..32,
        takes in 0usize..32,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let queue = BoundedQueue::new(
                capacity,
                OverflowPolicy::DropOldest,
                ShutdownSignal::new(),
            )
            .with_timeouts(Duration::from_millis(1), Duration::from_millis(1));

            for i in 0..puts {
                queue.put(i).await.unwrap();
                if i % 3 == 0 {
                    for _ in 0..takes.min(2) {
                        let _ = queue.get_nowait();
                    }
                }
            }

            let stats = queue.stats();
            prop_assert_eq!(stats.enqueued + stats.dropped, puts as u64);
            prop_assert!(stats.dequeued <= stats.enqueued);
            prop_assert!(stats.size <= capacity);
            Ok(())
        })?;
    }

    /// FIFO order: without drops, items come out in the order they went in
    #[test]
    fn test_fifo_order_without_drops(items in prop::collection::vec(any::<u32>(), 0..16)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let queue = BoundedQueue::new(
                items.len().max(1),
                OverflowPolicy::Error,
                ShutdownSignal::new(),
            )
            .with_timeouts(Duration::from_millis(1), Duration::from_millis(1));

            for item in &items {
                queue.put(*item).await.unwrap();
            }
            let mut drained = Vec::new();
            while let Ok(item) = queue.get_nowait() {
                drained.push(item);
            }
            prop_assert_eq!(drained, items);
            Ok(())
        })?;
    }
}

// ============================================================================
// Span properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Starting N nested spans and ending them in LIFO order always
    /// returns to the root span with an empty stack, and every span ends
    /// exactly once
    #[test]
    fn test_nested_span_stack(depth in 0usize..12) {
        let mut trace = TraceContext::new(None, None);
        let root = trace.current_span_id.clone();

        let mut ids = Vec::new();
        for i in 0..depth {
            ids.push(trace.start_span(format!("span-{}", i), None));
        }
        prop_assert_eq!(trace.span_stack_depth(), depth);

        for id in ids.iter().rev() {
            prop_assert!(trace.end_span(id, SpanStatus::Completed, None));
        }
        prop_assert_eq!(trace.span_stack_depth(), 0);
        prop_assert_eq!(&trace.current_span_id, &root);

        for id in &ids {
            prop_assert!(!trace.end_span(id, SpanStatus::Completed, None));
        }
    }
}
