use httpmock::prelude::*;
use serde_json::json;

use bridge_ollama::{ChatMessage, OllamaClient, OllamaConfig, OllamaError};

fn test_client(base_url: &str) -> OllamaClient {
    OllamaClient::new(OllamaConfig {
        host: base_url.to_string(),
        default_model: "llama3".to_string(),
        request_timeout_secs: 5,
    })
    .expect("ollama client should be created")
}

#[tokio::test]
async fn chat_stream_yields_tokens_until_done() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/api/chat").json_body_includes(
            json!({
                "model": "llama3",
                "stream": true,
            })
            .to_string(),
        );
        then.status(200).body(concat!(
            "{\"message\":{\"content\":\"Hel\"},\"done\":false}\n",
            "{\"message\":{\"content\":\"lo\"},\"done\":false}\n",
            "{\"message\":{\"content\":\"\"},\"done\":true}\n",
        ));
    });

    let client = test_client(&server.base_url());
    let mut stream = client
        .chat_stream(&[ChatMessage::user("hi")], None)
        .await
        .expect("stream should open");

    let mut tokens = Vec::new();
    while let Some(token) = stream.next_token().await.expect("token should decode") {
        tokens.push(token);
    }

    mock.assert();
    assert_eq!(tokens, vec!["Hel".to_string(), "lo".to_string()]);
}

#[tokio::test]
async fn chat_concatenates_the_full_stream() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/chat");
        then.status(200).body(concat!(
            "{\"message\":{\"content\":\"one \"},\"done\":false}\n",
            "{\"message\":{\"content\":\"two\"},\"done\":true}\n",
        ));
    });

    let client = test_client(&server.base_url());
    let text = client
        .chat(&[ChatMessage::user("count")], None)
        .await
        .expect("chat should succeed");

    assert_eq!(text, "one two");
}

#[tokio::test]
async fn chat_honors_the_model_override() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/api/chat")
            .json_body_includes(json!({"model": "mistral"}).to_string());
        then.status(200)
            .body("{\"message\":{\"content\":\"ok\"},\"done\":true}\n");
    });

    let client = test_client(&server.base_url());
    let text = client
        .chat(&[ChatMessage::user("hi")], Some("mistral"))
        .await
        .expect("chat should succeed");

    mock.assert();
    assert_eq!(text, "ok");
}

#[tokio::test]
async fn malformed_stream_lines_are_skipped() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/chat");
        then.status(200).body(concat!(
            "{\"message\":{\"content\":\"before\"},\"done\":false}\n",
            "this is not json\n",
            "{\"message\":{\"content\":\" after\"},\"done\":true}\n",
        ));
    });

    let client = test_client(&server.base_url());
    let text = client
        .chat(&[ChatMessage::user("hi")], None)
        .await
        .expect("chat should tolerate malformed lines");

    assert_eq!(text, "before after");
}

#[tokio::test]
async fn non_success_status_maps_to_http_status_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/chat");
        then.status(404).body("model not found");
    });

    let client = test_client(&server.base_url());
    let error = client
        .chat(&[ChatMessage::user("hi")], None)
        .await
        .expect_err("chat should fail");

    match error {
        OllamaError::HttpStatus { status, body } => {
            assert_eq!(status, 404);
            assert!(body.contains("model not found"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn list_models_returns_names_in_server_order() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/api/tags");
        then.status(200).json_body(json!({
            "models": [
                {"name": "llama3", "size": 1},
                {"name": "mistral", "size": 2}
            ]
        }));
    });

    let client = test_client(&server.base_url());
    let models = client.list_models().await.expect("listing should succeed");

    mock.assert();
    assert_eq!(models, vec!["llama3".to_string(), "mistral".to_string()]);
}

#[tokio::test]
async fn is_available_swallows_server_errors_to_false() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/");
        then.status(500);
    });

    let client = test_client(&server.base_url());
    assert!(!client.is_available().await);
}

#[tokio::test]
async fn is_available_is_true_for_a_healthy_server() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/");
        then.status(200).body("Ollama is running");
    });

    let client = test_client(&server.base_url());
    assert!(client.is_available().await);
}

#[tokio::test]
async fn unreachable_server_maps_to_typed_error() {
    // Port 9 (discard) is a safe never-listening target.
    let client = test_client("http://127.0.0.1:9");
    let error = client
        .chat(&[ChatMessage::user("hi")], None)
        .await
        .expect_err("connection should fail");

    assert!(matches!(
        error,
        OllamaError::Unreachable { .. } | OllamaError::Timeout { .. }
    ));
}
