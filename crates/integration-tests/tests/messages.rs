mod harness;

use harness::config::ConfigBuilder;
use harness::server::TestServer;
use harness::upstream::MockUpstream;

fn body(model: &str, stream: bool) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "max_tokens": 128,
        "messages": [{"role": "user", "content": "Hello"}],
        "stream": stream
    })
}

#[tokio::test]
async fn single_provider_success() {
    let upstream = MockUpstream::start().await.unwrap();

    let config = ConfigBuilder::new()
        .with_anthropic_provider("p1", &upstream.base_url())
        .with_route("*sonnet*", &[("p1", 1)])
        .build();
    let server = TestServer::start(config).await.unwrap();

    let resp = server
        .client()
        .post(server.url("/v1/messages"))
        .json(&body("claude-3-5-sonnet-latest", false))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["type"], "message");
    assert_eq!(json["content"][0]["text"], "Hello from mock upstream");
    assert_eq!(upstream.messages_count(), 1);

    // One success, zero errors on record
    let providers: serde_json::Value = server
        .client()
        .get(server.url("/providers"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(providers["providers"][0]["name"], "p1");
    assert_eq!(providers["providers"][0]["health"]["consecutive_errors"], 0);
    assert_eq!(providers["providers"][0]["health"]["state"], "healthy");
}

#[tokio::test]
async fn openai_provider_response_is_translated() {
    let upstream = MockUpstream::start_with_response("translated reply").await.unwrap();

    let config = ConfigBuilder::new()
        .with_openai_provider("oai", &upstream.base_url())
        .with_route("*sonnet*", &[("oai", 1)])
        .build();
    let server = TestServer::start(config).await.unwrap();

    let resp = server
        .client()
        .post(server.url("/v1/messages"))
        .json(&body("claude-3-5-sonnet-latest", false))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let json: serde_json::Value = resp.json().await.unwrap();
    // The client sees the Anthropic shape even though the upstream spoke OpenAI
    assert_eq!(json["type"], "message");
    assert_eq!(json["role"], "assistant");
    assert_eq!(json["content"][0]["type"], "text");
    assert_eq!(json["content"][0]["text"], "translated reply");
    assert_eq!(json["usage"]["input_tokens"], 10);
    assert_eq!(upstream.chat_count(), 1);
    assert_eq!(upstream.messages_count(), 0);
}

#[tokio::test]
async fn route_model_override_is_sent_upstream() {
    let upstream = MockUpstream::start().await.unwrap();

    let config = ConfigBuilder::new()
        .with_openai_provider("oai", &upstream.base_url())
        .with_route_model("*haiku*", "oai", "gpt-4o-mini")
        .build();
    let server = TestServer::start(config).await.unwrap();

    let resp = server
        .client()
        .post(server.url("/v1/messages"))
        .json(&body("claude-3-5-haiku-latest", false))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let json: serde_json::Value = resp.json().await.unwrap();
    // The mock echoes the model it was asked for
    assert_eq!(json["model"], "gpt-4o-mini");
}

#[tokio::test]
async fn unrouted_model_is_rejected() {
    let upstream = MockUpstream::start().await.unwrap();

    let config = ConfigBuilder::new()
        .with_anthropic_provider("p1", &upstream.base_url())
        .with_route("*sonnet*", &[("p1", 1)])
        .build();
    let server = TestServer::start(config).await.unwrap();

    let resp = server
        .client()
        .post(server.url("/v1/messages"))
        .json(&body("gemini-pro", false))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["type"], "error");
    assert_eq!(json["error"]["type"], "invalid_request_error");
    assert_eq!(upstream.messages_count(), 0);
}

#[tokio::test]
async fn passthrough_auth_forwards_client_credential() {
    let upstream = MockUpstream::start().await.unwrap();

    let config = ConfigBuilder::new()
        .with_passthrough_provider("relay", &upstream.base_url())
        .with_route("*", &[("relay", 1)])
        .build();
    let server = TestServer::start(config).await.unwrap();

    let resp = server
        .client()
        .post(server.url("/v1/messages"))
        .header("x-api-key", "sk-client-key")
        .json(&body("claude-3-5-sonnet-latest", false))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(upstream.last_authorization().as_deref(), Some("sk-client-key"));
}

#[tokio::test]
async fn passthrough_auth_without_credential_is_unauthorized_class_error() {
    let upstream = MockUpstream::start().await.unwrap();

    let config = ConfigBuilder::new()
        .with_passthrough_provider("relay", &upstream.base_url())
        .with_route("*", &[("relay", 1)])
        .build();
    let server = TestServer::start(config).await.unwrap();

    let resp = server
        .client()
        .post(server.url("/v1/messages"))
        .json(&body("claude-3-5-sonnet-latest", false))
        .send()
        .await
        .unwrap();

    assert!(resp.status().is_client_error());
    assert_eq!(upstream.messages_count(), 0);
}
