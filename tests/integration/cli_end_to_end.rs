//! End-to-end command runs against a mocked OpenAI-compatible endpoint

use serde_json::{json, Value};
use std::path::Path;
use tempfile::TempDir;
use textbatch::cli::{BuiltinSchema, Commands, RunContext, TaskArgs};
use textbatch::config::{StoreBackend, TextbatchConfig};
use textbatch::error::ApiError;
use textbatch::provider::{CompletionOptions, ProviderConfig, ProviderType};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn context(workspace: &Path, endpoint: String) -> RunContext {
    let mut config = TextbatchConfig::default();
    config.providers.insert(
        "local".to_string(),
        ProviderConfig {
            provider_name: None,
            provider_type: ProviderType::Local,
            model: "gemma-3".to_string(),
            api_key: None,
            endpoint: Some(endpoint),
            default_options: CompletionOptions::default(),
        },
    );
    config.default_provider = Some("local".to_string());
    config.batch.store = StoreBackend::File;
    config.batch.poll_interval_secs = 0;
    RunContext::from_config(workspace.to_path_buf(), config, None)
}

fn task_args(dir: &Path) -> TaskArgs {
    std::fs::write(dir.join("prompt.txt"), "Give the text a one-word label.").unwrap();
    std::fs::write(
        dir.join("items.json"),
        r#"[{"id": "q1", "text": "first"}, {"id": "q2", "text": "second"}]"#,
    )
    .unwrap();
    TaskArgs {
        input: dir.join("items.json"),
        instructions: dir.join("prompt.txt"),
        schema: None,
        output_type: Some(BuiltinSchema::String),
        output_lang: None,
        user_prompt: None,
    }
}

fn output_line(id: &str, label: &str) -> String {
    json!({
        "custom_id": id,
        "response": {
            "status_code": 200,
            "body": {"choices": [{"message": {"role": "assistant", "content": json!({"result": label}).to_string()}}]}
        },
        "error": null
    })
    .to_string()
}

#[tokio::test]
async fn test_fanout_command() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "gemma-3",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "{\"result\": \"label\"}"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 3, "total_tokens": 13}
        })))
        .expect(2)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let ctx = context(dir.path(), server.uri());
    let output = ctx
        .execute_async(&Commands::Fanout {
            task: task_args(dir.path()),
            concurrency: Some(2),
            max_retries: None,
            temperature: None,
            raise_on_error: false,
            analyze: None,
        })
        .await
        .unwrap();

    let results: Value = serde_json::from_str(&output).unwrap();
    assert_eq!(results[0]["id"], "q1");
    assert_eq!(results[1]["id"], "q2");
    assert_eq!(results[1]["outcome"]["status"], "success");
    assert_eq!(results[1]["outcome"]["value"]["result"], "label");
}

#[tokio::test]
async fn test_batch_command_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "file-in", "purpose": "batch"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/batches"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "batch_1", "status": "validating"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/batches/batch_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "batch_1",
            "status": "completed",
            "output_file_id": "file-out"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/file-out/content"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "{}\n{}\n",
            output_line("q1", "alpha"),
            output_line("q2", "beta")
        )))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let ctx = context(dir.path(), server.uri());
    let output = ctx
        .execute_async(&Commands::Batch {
            task: task_args(dir.path()),
            job_name: "labels".to_string(),
        })
        .await
        .unwrap();

    let summary: Value = serde_json::from_str(&output).unwrap();
    assert_eq!(summary["succeeded"], 2);
    assert_eq!(summary["failed"], 0);

    let saved: Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("batch_results").join("labels.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(saved["q2"]["result"], "beta");

    // Completed records are removed, so the job is no longer known.
    let status = ctx
        .execute_async(&Commands::Status {
            job_name: "labels".to_string(),
        })
        .await;
    assert!(matches!(status, Err(ApiError::JobNotFound(_))));
}
