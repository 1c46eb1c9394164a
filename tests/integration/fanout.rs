//! Integration tests for the fan-out scheduler and validation-retry executor
//!
//! Tests cover:
//! - Input-order results under varied completion order
//! - Concurrency bound
//! - Validation retries and per-item failure recovery
//! - raise_on_error abort
//! - Up-front configuration errors
//! - Completion metadata and progress reporting

use crate::integration::test_utils::{items, shared, MockProvider, MockReply};
use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::Value;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use textbatch::error::ApiError;
use textbatch::executor::{ValidationRetryExecutor, Validator};
use textbatch::fanout::{FanOutOptions, FanOutScheduler};
use textbatch::task::{InputItem, OutputSchema, TaskDescriptor, TaskEncoder, TaskMode};
use textbatch::types::FailureKind;

fn descriptor() -> TaskDescriptor {
    TaskDescriptor::new(OutputSchema::string_result(), "Echo the text.")
}

fn scheduler(provider: Arc<MockProvider>) -> FanOutScheduler {
    let executor = ValidationRetryExecutor::new(provider, TaskEncoder::new("mock-model"));
    FanOutScheduler::new(Arc::new(executor))
}

fn options(concurrency_limit: usize) -> FanOutOptions {
    FanOutOptions {
        concurrency_limit,
        ..FanOutOptions::default()
    }
}

fn reject_text(text: &'static str) -> Validator {
    Arc::new(move |value: &Value| value["result"] != text)
}

#[tokio::test]
async fn test_scenario_validation_rejected_item_does_not_affect_others() {
    let provider = shared(MockProvider::new());
    let opts = FanOutOptions {
        concurrency_limit: 3,
        max_retries: 2,
        ..FanOutOptions::default()
    }
    .with_validator(reject_text("text 3"));

    let results = scheduler(provider.clone())
        .process(&items(4), &descriptor(), &opts)
        .await
        .unwrap();

    assert_eq!(results.len(), 4);
    let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["item-1", "item-2", "item-3", "item-4"]);

    for (index, record) in results.iter().enumerate() {
        if index == 2 {
            let reason = record.failure_reason().unwrap();
            assert_eq!(reason.kind, FailureKind::ValidationRejected);
        } else {
            assert!(record.is_success(), "{} should succeed", record.id);
        }
    }
    assert_eq!(provider.calls_for("text 3"), 3);
    assert_eq!(provider.calls_for("text 1"), 1);
    assert!(provider.max_in_flight() <= 3);
}

#[tokio::test]
async fn test_results_follow_input_order_not_completion_order() {
    let mut provider = MockProvider::new();
    for (i, ms) in [(1, 60u64), (2, 40), (3, 20), (4, 1)] {
        provider = provider.with_delay(&format!("text {}", i), Duration::from_millis(ms));
    }
    let provider = shared(provider);

    let results = scheduler(provider)
        .process(&items(4), &descriptor(), &options(4))
        .await
        .unwrap();
    let values: Vec<&str> = results
        .iter()
        .map(|r| r.value().unwrap()["result"].as_str().unwrap())
        .collect();
    assert_eq!(values, vec!["text 1", "text 2", "text 3", "text 4"]);
}

#[tokio::test]
async fn test_concurrency_limit_is_respected() {
    let mut provider = MockProvider::new();
    for i in 1..=12 {
        provider = provider.with_delay(&format!("text {}", i), Duration::from_millis(15));
    }
    let provider = shared(provider);

    scheduler(provider.clone())
        .process(&items(12), &descriptor(), &options(2))
        .await
        .unwrap();
    assert_eq!(provider.max_in_flight(), 2);
    assert_eq!(provider.total_calls(), 12);
}

#[tokio::test]
async fn test_transient_and_fatal_failures_are_recovered_per_item() {
    let provider = shared(
        MockProvider::new()
            .script("text 1", vec![MockReply::Transient])
            .script("text 2", vec![MockReply::Fatal]),
    );
    let results = scheduler(provider)
        .process(&items(3), &descriptor(), &options(3))
        .await
        .unwrap();

    assert_eq!(
        results[0].failure_reason().map(|r| r.kind),
        Some(FailureKind::Transient)
    );
    assert_eq!(
        results[1].failure_reason().map(|r| r.kind),
        Some(FailureKind::Fatal)
    );
    assert!(results[2].is_success());
}

#[tokio::test]
async fn test_retry_recovers_after_rejection() {
    let provider = shared(MockProvider::new().script(
        "text 1",
        vec![
            MockReply::Content(r#"{"result": "text 1"}"#.into()),
            MockReply::Content(r#"{"result": "TEXT 1"}"#.into()),
        ],
    ));
    let opts = FanOutOptions {
        base_temperature: 0.7,
        ..options(1)
    }
    .with_validator(reject_text("text 1"));
    let results = scheduler(provider.clone())
        .process(&items(1), &descriptor(), &opts)
        .await
        .unwrap();

    assert_eq!(results[0].value().unwrap()["result"], "TEXT 1");
    assert_eq!(provider.calls_for("text 1"), 2);
    let temps = provider.temperatures();
    assert_eq!(temps[0], Some(0.7));
    assert!((temps[1].unwrap() - 0.7).abs() >= 0.099);
}

#[tokio::test]
async fn test_raise_on_error_aborts() {
    let provider = shared(MockProvider::new());
    let opts = FanOutOptions {
        concurrency_limit: 2,
        raise_on_error: true,
        max_retries: 1,
        ..FanOutOptions::default()
    }
    .with_validator(reject_text("text 2"));

    let err = scheduler(provider)
        .process(&items(3), &descriptor(), &opts)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::ValidationRejected { ref id, attempts: 2 } if id == "item-2"));
}

#[tokio::test]
async fn test_configuration_errors_fail_before_any_request() {
    let provider = shared(MockProvider::new());
    let sched = scheduler(provider.clone());

    let zero = sched.process(&items(2), &descriptor(), &options(0)).await;
    assert!(matches!(zero, Err(ApiError::InvalidInput(_))));

    let no_budget = FanOutOptions {
        max_retries: 0,
        ..options(2)
    }
    .with_validator(reject_text("x"));
    let result = sched.process(&items(2), &descriptor(), &no_budget).await;
    assert!(matches!(result, Err(ApiError::InvalidInput(_))));

    let empty_schema = TaskDescriptor::new(OutputSchema::new("Empty", serde_json::json!({})), "x");
    let result = sched.process(&items(2), &empty_schema, &options(2)).await;
    assert!(matches!(result, Err(ApiError::InvalidInput(_))));

    assert_eq!(provider.total_calls(), 0);
}

#[tokio::test]
async fn test_process_inputs_resolves_plain_texts() {
    let provider = shared(MockProvider::new());
    let inputs = vec![
        InputItem::Text("plain".into()),
        InputItem::Identified {
            id: "known".into(),
            text: "identified".into(),
            params: Default::default(),
        },
    ];
    let results = scheduler(provider)
        .process_inputs(inputs, &descriptor(), &options(2))
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[1].id, "known");
    assert!(!results[0].id.is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_output_order_matches_input(n in 1usize..24, c_seed in 0usize..1000) {
        let c = 1 + c_seed % n;
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut provider = MockProvider::new();
        for i in 1..=n {
            let ms = ((i * 7919 + c_seed) % 5) as u64;
            provider = provider.with_delay(&format!("text {}", i), Duration::from_millis(ms));
        }
        let provider = shared(provider);
        let input = items(n);

        let results = runtime
            .block_on(scheduler(provider.clone()).process(&input, &descriptor(), &options(c)))
            .unwrap();

        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        let expected: Vec<&str> = input.iter().map(|i| i.id.as_str()).collect();
        prop_assert_eq!(ids, expected);
        prop_assert!(provider.max_in_flight() <= c);
    }

    #[test]
    fn prop_attempts_never_exceed_budget(max_retries in 1u32..5) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let provider = shared(MockProvider::new());
        let opts = FanOutOptions {
            max_retries,
            ..options(1)
        }
        .with_validator(reject_text("text 1"));

        let results = runtime
            .block_on(scheduler(provider.clone()).process(&items(1), &descriptor(), &opts))
            .unwrap();
        prop_assert!(!results[0].is_success());
        prop_assert_eq!(provider.calls_for("text 1"), max_retries as usize + 1);
    }
}

#[tokio::test]
async fn test_analysis_item_keeps_completion_metadata() {
    let provider = shared(MockProvider::new().script(
        "text 1",
        vec![MockReply::Content("The text is short.".to_string())],
    ));
    let d = descriptor().with_mode(TaskMode::WithAnalysis {
        analyze_instructions: "Describe the text.".to_string(),
    });

    let results = scheduler(provider.clone())
        .process(&items(1), &d, &options(1))
        .await
        .unwrap();

    assert_eq!(provider.calls_for("text 1"), 2);
    let record = &results[0];
    assert_eq!(record.value().unwrap()["result"], "text 1");
    let metadata = record.metadata.as_ref().unwrap();
    assert_eq!(metadata.analysis.as_deref(), Some("The text is short."));
    assert_eq!(metadata.model, "mock-model");
    assert_eq!(metadata.attempts, 1);
    assert_eq!(metadata.usage.total_tokens, 20);
}

#[tokio::test]
async fn test_failed_item_has_no_metadata() {
    let provider = shared(MockProvider::new().script("text 1", vec![MockReply::Fatal]));

    let results = scheduler(provider)
        .process(&items(1), &descriptor(), &options(1))
        .await
        .unwrap();

    assert!(!results[0].is_success());
    assert!(results[0].metadata.is_none());
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn lines_containing(&self, needle: &str) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock())
            .lines()
            .filter(|line| line.contains(needle))
            .map(str::to_string)
            .collect()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_progress_logged_every_limit_and_at_end() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let provider = shared(MockProvider::new());
    scheduler(provider)
        .process(&items(7), &descriptor(), &options(3))
        .await
        .unwrap();

    let progress = logs.lines_containing("Fan-out progress");
    assert_eq!(progress.len(), 3, "{:?}", progress);
    for (line, done) in progress.iter().zip(["processed=3", "processed=6", "processed=7"]) {
        assert!(line.contains(done), "{} should report {}", line, done);
        assert!(line.contains("total=7"));
    }
}
