// crates/relightcomfy/tests/client_test.rs
//
// Exercises the engine client against a mocked ComfyUI HTTP API.

use relightcomfy::{ClientConfig, ComfyClient, Engine};
use relightcore::{EngineError, EventBus, PredictionEvent, PredictionId, ProgressEvent, Workflow, WorkflowNode};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> ComfyClient {
    ComfyClient::new(ClientConfig {
        address: server.uri(),
        poll_interval: Duration::from_millis(10),
        execution_timeout: Duration::from_millis(500),
        request_timeout: Duration::from_secs(5),
    })
    .unwrap()
}

fn workflow() -> Workflow {
    let mut workflow = Workflow::default();
    workflow.insert("1", WorkflowNode::new("LoadImage").with_input("image", "image1.png"));
    workflow
}

#[tokio::test]
async fn test_queue_prompt_returns_prompt_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/prompt"))
        .and(body_partial_json(json!({
            "client_id": "client-1",
            "prompt": {"1": {"class_type": "LoadImage", "inputs": {"image": "image1.png"}}}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "prompt_id": "p-123", "number": 0, "node_errors": {}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let prompt_id = client_for(&server)
        .queue_prompt(&workflow(), "client-1")
        .await
        .unwrap();
    assert_eq!(prompt_id, "p-123");
}

#[tokio::test]
async fn test_queue_prompt_validation_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"type": "prompt_outputs_failed_validation", "message": "Prompt outputs failed validation", "details": ""},
            "node_errors": {"1": {"class_type": "LoadImage", "errors": [{"message": "Invalid image file", "details": ""}]}}
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .queue_prompt(&workflow(), "client-1")
        .await
        .unwrap_err();

    match err {
        EngineError::Rejected(message) => {
            assert!(message.contains("Prompt outputs failed validation"));
            assert!(message.contains("node 1 [LoadImage]: Invalid image file"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_wait_for_completion_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/history/p-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "p-1": {
                "outputs": {"12": {"images": [{"filename": "out_00001_.png", "subfolder": "", "type": "output"}]}},
                "status": {"status_str": "success", "completed": true, "messages": []}
            }
        })))
        .mount(&server)
        .await;

    let bus = EventBus::new(16);
    let mut rx = bus.subscribe();
    let emitter = bus.create_emitter(PredictionId::new_v4());

    let history = client_for(&server)
        .wait_for_completion("p-1", &emitter)
        .await
        .unwrap();
    assert_eq!(history.output_images().len(), 1);

    match rx.recv().await.unwrap() {
        PredictionEvent::Progress {
            event: ProgressEvent::NodeExecuted { node_id },
            ..
        } => assert_eq!(node_id, "12"),
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_wait_for_completion_polls_until_done() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/history/p-4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/history/p-4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "p-4": {
                "outputs": {"13": {"images": [{"filename": "ComfyUI_00001_.png", "subfolder": "", "type": "output"}]}},
                "status": {"status_str": "success", "completed": true, "messages": [
                    ["execution_cached", {"nodes": ["2", "4"], "prompt_id": "p-4"}]
                ]}
            }
        })))
        .mount(&server)
        .await;

    let bus = EventBus::new(16);
    let mut rx = bus.subscribe();
    let emitter = bus.create_emitter(PredictionId::new_v4());

    let history = client_for(&server)
        .wait_for_completion("p-4", &emitter)
        .await
        .unwrap();
    assert_eq!(history.output_images()[0].filename, "ComfyUI_00001_.png");

    let mut executed = Vec::new();
    let mut infos = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let PredictionEvent::Progress { event, .. } = event {
            match event {
                ProgressEvent::NodeExecuted { node_id } => executed.push(node_id),
                ProgressEvent::Info { message } => infos.push(message),
                _ => {}
            }
        }
    }
    assert_eq!(executed, vec!["13"]);
    assert_eq!(infos, vec!["reused cached nodes: 2, 4"]);
}

#[tokio::test]
async fn test_wait_for_completion_reports_execution_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/history/p-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "p-2": {
                "outputs": {},
                "status": {"status_str": "error", "completed": false, "messages": [
                    ["execution_error", {"node_id": "9", "node_type": "LoadImage", "exception_message": "cannot identify image file"}]
                ]}
            }
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .wait_for_completion("p-2", &relightcore::EventEmitter::detached())
        .await
        .unwrap_err();

    match err {
        EngineError::ExecutionFailed(message) => {
            assert_eq!(message, "LoadImage (node 9): cannot identify image file")
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_wait_for_completion_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/history/p-3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .wait_for_completion("p-3", &relightcore::EventEmitter::detached())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Timeout { .. }));
}

#[tokio::test]
async fn test_clear_queue_posts_clear_flag() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/queue"))
        .and(body_partial_json(json!({"clear": true})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client_for(&server).clear_queue().await.unwrap();
}

#[tokio::test]
async fn test_health_check_and_readiness() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/history/123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(client.health_check().await);
    client.wait_until_ready(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_unreachable_engine() {
    let client = ComfyClient::new(ClientConfig {
        address: "127.0.0.1:1".to_string(),
        poll_interval: Duration::from_millis(10),
        execution_timeout: Duration::from_millis(100),
        request_timeout: Duration::from_millis(200),
    })
    .unwrap();

    assert!(!client.health_check().await);
    let err = client.queue_prompt(&workflow(), "c").await.unwrap_err();
    assert!(matches!(err, EngineError::Unreachable { .. }));
    let err = client.wait_until_ready(Duration::from_millis(50)).await.unwrap_err();
    assert!(matches!(err, EngineError::Timeout { .. }));
}
