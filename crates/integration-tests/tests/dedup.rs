mod harness;

use std::time::Duration;

use harness::config::ConfigBuilder;
use harness::server::TestServer;
use harness::upstream::{Behavior, MockUpstream};

fn body(max_tokens: u64) -> serde_json::Value {
    serde_json::json!({
        "model": "claude-3-5-sonnet-latest",
        "max_tokens": max_tokens,
        "messages": [{"role": "user", "content": "identical question"}]
    })
}

async fn slow_upstream() -> MockUpstream {
    MockUpstream::start_with(Behavior {
        delay: Some(Duration::from_millis(200)),
        ..Behavior::default()
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn concurrent_identical_requests_share_one_upstream_call() {
    let upstream = slow_upstream().await;

    let config = ConfigBuilder::new()
        .with_anthropic_provider("p1", &upstream.base_url())
        .with_route("*sonnet*", &[("p1", 1)])
        .build();
    let server = TestServer::start(config).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..5 {
        let client = server.client().clone();
        let url = server.url("/v1/messages");
        handles.push(tokio::spawn(async move {
            let resp = client.post(url).json(&body(128)).send().await.unwrap();
            (resp.status().as_u16(), resp.bytes().await.unwrap())
        }));
    }

    let mut bodies = Vec::new();
    for handle in handles {
        let (status, bytes) = handle.await.unwrap();
        assert_eq!(status, 200);
        bodies.push(bytes);
    }

    // All five byte-identical, one upstream call
    assert!(bodies.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(upstream.messages_count(), 1);

    // The entry is gone once the broadcast completed: a fresh request
    // triggers a fresh upstream call. Small grace period for the leader
    // task to retire the entry after the last byte was delivered.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let resp = server
        .client()
        .post(server.url("/v1/messages"))
        .json(&body(128))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(upstream.messages_count(), 2);
}

#[tokio::test]
async fn dedup_disabled_calls_upstream_per_request() {
    let upstream = slow_upstream().await;

    let config = ConfigBuilder::new()
        .with_anthropic_provider("p1", &upstream.base_url())
        .with_route("*sonnet*", &[("p1", 1)])
        .without_dedup()
        .build();
    let server = TestServer::start(config).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..3 {
        let client = server.client().clone();
        let url = server.url("/v1/messages");
        handles.push(tokio::spawn(async move {
            client.post(url).json(&body(128)).send().await.unwrap().status().as_u16()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), 200);
    }

    assert_eq!(upstream.messages_count(), 3);
}

#[tokio::test]
async fn differing_max_tokens_still_collapses_by_default() {
    // include_max_tokens_in_signature is off: the operator opted into
    // collapsing duplicates that differ only in max_tokens
    let upstream = slow_upstream().await;

    let config = ConfigBuilder::new()
        .with_anthropic_provider("p1", &upstream.base_url())
        .with_route("*sonnet*", &[("p1", 1)])
        .build();
    let server = TestServer::start(config).await.unwrap();

    let first = {
        let client = server.client().clone();
        let url = server.url("/v1/messages");
        tokio::spawn(async move { client.post(url).json(&body(128)).send().await.unwrap().status().as_u16() })
    };
    let second = {
        let client = server.client().clone();
        let url = server.url("/v1/messages");
        tokio::spawn(async move { client.post(url).json(&body(512)).send().await.unwrap().status().as_u16() })
    };

    assert_eq!(first.await.unwrap(), 200);
    assert_eq!(second.await.unwrap(), 200);
    assert_eq!(upstream.messages_count(), 1);
}

#[tokio::test]
async fn different_prompts_are_not_deduplicated() {
    let upstream = slow_upstream().await;

    let config = ConfigBuilder::new()
        .with_anthropic_provider("p1", &upstream.base_url())
        .with_route("*sonnet*", &[("p1", 1)])
        .build();
    let server = TestServer::start(config).await.unwrap();

    let one = serde_json::json!({
        "model": "claude-3-5-sonnet-latest",
        "max_tokens": 128,
        "messages": [{"role": "user", "content": "first question"}]
    });
    let two = serde_json::json!({
        "model": "claude-3-5-sonnet-latest",
        "max_tokens": 128,
        "messages": [{"role": "user", "content": "second question"}]
    });

    let a = {
        let client = server.client().clone();
        let url = server.url("/v1/messages");
        tokio::spawn(async move { client.post(url).json(&one).send().await.unwrap().status().as_u16() })
    };
    let b = {
        let client = server.client().clone();
        let url = server.url("/v1/messages");
        tokio::spawn(async move { client.post(url).json(&two).send().await.unwrap().status().as_u16() })
    };

    assert_eq!(a.await.unwrap(), 200);
    assert_eq!(b.await.unwrap(), 200);
    assert_eq!(upstream.messages_count(), 2);
}
