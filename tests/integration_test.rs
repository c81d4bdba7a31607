use rpc_router::*;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpListener;
use wiremock::matchers::{body_partial_json, header, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Local JSON-RPC node answering every POST with `template`
async fn node(template: ResponseTemplate) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(template)
        .mount(&server)
        .await;
    server
}

fn rpc_result(result: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": result}))
}

fn rpc_error(code: i64, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "error": {"code": code, "message": message}
    }))
}

/// A local address nothing listens on
async fn dead_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

fn config(endpoints: Vec<String>) -> RouterConfig {
    let mut config = RouterConfig::new(endpoints);
    config.request.timeout_ms = 2_000;
    config.backoff.initial_ms = 10;
    config.backoff.max_ms = 20;
    config
}

#[tokio::test]
async fn test_http_transport_returns_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("content-type", "application/json"))
        .and(body_partial_json(json!({"jsonrpc": "2.0", "method": "eth_blockNumber", "params": []})))
        .respond_with(rpc_result(json!("0x1b4")))
        .expect(1)
        .mount(&server)
        .await;
    let transport = HttpTransport::new();

    let result = transport
        .send(&server.uri(), "eth_blockNumber", &[], Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(result, json!("0x1b4"));
}

#[tokio::test]
async fn test_http_transport_surfaces_node_error() {
    let server = node(rpc_error(-32601, "the method does not exist")).await;
    let transport = HttpTransport::new();

    let err = transport
        .send(&server.uri(), "eth_foo", &[], Duration::from_secs(2))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RouterError::Node {
            code: -32601,
            message: "the method does not exist".to_string()
        }
    );
}

#[tokio::test]
async fn test_http_error_status_is_transport_failure() {
    let server = node(ResponseTemplate::new(503).set_body_string("service unavailable")).await;
    let transport = HttpTransport::new();

    let err = transport
        .send(&server.uri(), "eth_chainId", &[], Duration::from_secs(2))
        .await
        .unwrap_err();
    match err {
        RouterError::Transport(message) => assert!(message.contains("503")),
        other => panic!("expected transport error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_http_body_without_result_is_transport_failure() {
    let bodies = [
        json!({}),
        json!({"jsonrpc": "2.0", "id": 1}),
        json!({"message": "Too Many Requests"}),
    ];
    let transport = HttpTransport::new();

    for body in bodies {
        let server = node(ResponseTemplate::new(200).set_body_json(&body)).await;
        let err = transport
            .send(&server.uri(), "eth_blockNumber", &[], Duration::from_secs(2))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RouterError::Transport("invalid JSON-RPC response: missing result".to_string()),
            "body {}",
            body
        );
    }
}

#[tokio::test]
async fn test_http_null_result_is_success() {
    let server = node(rpc_result(Value::Null)).await;
    let transport = HttpTransport::new();

    let result = transport
        .send(
            &server.uri(),
            "eth_getTransactionReceipt",
            &[json!("0xabc")],
            Duration::from_secs(2),
        )
        .await
        .unwrap();
    assert_eq!(result, Value::Null);
}

#[tokio::test]
async fn test_http_transport_times_out() {
    let server = node(rpc_result(json!("0x1")).set_delay(Duration::from_secs(60))).await;
    let transport = HttpTransport::new();

    let err = transport
        .send(&server.uri(), "eth_chainId", &[], Duration::from_millis(200))
        .await
        .unwrap_err();
    assert_eq!(err, RouterError::Timeout(200));
}

#[tokio::test]
async fn test_router_fails_over_to_live_node() {
    let dead = dead_endpoint().await;
    let live = node(rpc_result(json!("0x89"))).await;
    let executor =
        RequestExecutor::from_config(&config(vec![dead.clone(), live.uri()])).unwrap();

    let result = executor.call("eth_chainId", vec![]).await.unwrap();
    assert_eq!(result, json!("0x89"));

    let health = executor.endpoint_health();
    assert_eq!(health[0].url, dead);
    assert_eq!(health[0].failure_count, 1);
    assert_eq!(health[1].url, live.uri());
    assert_eq!(health[1].success_count, 1);
}

#[tokio::test]
async fn test_router_does_not_trust_non_rpc_body() {
    let rate_limited = ResponseTemplate::new(200).set_body_json(json!({"message": "Too Many Requests"}));
    let proxy = node(rate_limited).await;
    let executor = RequestExecutor::from_config(&config(vec![proxy.uri()])).unwrap();
    let options = executor.default_options().clone().with_cache();

    let err = executor
        .execute("eth_blockNumber", vec![], &options)
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::Exhausted { .. }));

    let health = executor.endpoint_health();
    assert_eq!(health[0].success_count, 0);
    assert_eq!(health[0].failure_count, 3);
    assert!(executor.cache().is_empty());
}

#[tokio::test]
async fn test_router_race_over_http() {
    let a = node(rpc_error(-32000, "missing trie node")).await;
    let b = node(rpc_result(json!({"number": "0x10"}))).await;
    let c = dead_endpoint().await;
    let executor = RequestExecutor::from_config(&config(vec![a.uri(), b.uri(), c])).unwrap();

    let options = executor.default_options().clone().parallel(3);
    let result = executor
        .execute("eth_getBlockByNumber", vec![json!("latest"), json!(false)], &options)
        .await
        .unwrap();
    assert_eq!(result["number"], "0x10");
}

#[tokio::test]
async fn test_router_exhaustion_preserves_node_message() {
    let a = node(rpc_error(-32000, "execution reverted")).await;
    let b = node(rpc_error(-32000, "execution reverted")).await;
    let executor = RequestExecutor::from_config(&config(vec![a.uri(), b.uri()])).unwrap();

    let err = executor
        .call("eth_call", vec![json!({"to": "0x0"}), json!("latest")])
        .await
        .unwrap_err();

    let RouterError::Exhausted { attempts, failures } = &err else {
        panic!("expected Exhausted, got {:?}", err);
    };
    assert_eq!(*attempts, MAX_SEQUENTIAL_ATTEMPTS);
    assert_eq!(failures.len(), 3);
    assert_eq!(err.last_failure().unwrap().message(), "execution reverted");
}

#[tokio::test]
async fn test_cached_call_skips_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(rpc_result(json!("0x1")))
        .expect(1)
        .mount(&server)
        .await;
    let executor = RequestExecutor::from_config(&config(vec![server.uri()])).unwrap();
    let options = executor.default_options().clone().with_cache();

    let first = executor.execute("eth_chainId", vec![], &options).await.unwrap();
    let second = executor.execute("eth_chainId", vec![], &options).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(executor.endpoint_health()[0].success_count, 1);
    assert_eq!(executor.cache().len(), 1);
}

#[tokio::test]
async fn test_typed_result() {
    let server = node(rpc_result(json!("0x2a"))).await;
    let executor = RequestExecutor::from_config(&config(vec![server.uri()])).unwrap();

    let chain_id: String = executor
        .execute_as("eth_chainId", vec![], executor.default_options())
        .await
        .unwrap();
    assert_eq!(chain_id, "0x2a");
}

#[test]
fn test_config_rejects_empty_endpoint_list() {
    let err = RequestExecutor::from_config(&RouterConfig::new(vec![])).err();
    assert!(matches!(err, Some(RouterError::Configuration(_))));
}
