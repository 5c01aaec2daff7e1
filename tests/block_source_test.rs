//! HTTP block sources against mock explorer and node endpoints

use mockito::Matcher;
use serde_json::json;
use std::time::Duration;

use subnet_registrar::block_monitor::{BlockSource, HttpJsonSource, SourceError, SubstrateRpcSource};
use subnet_registrar::config::HttpMethod;

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_explorer_height_from_pointer() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/block/latest")
        .match_header("x-api-key", "test-key")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"data":{"blockNum":"4512345","hash":"0xabc"}}"#)
        .create_async()
        .await;

    let source = HttpJsonSource::new(
        "explorer",
        format!("{}/api/block/latest", server.url()),
        "/data/blockNum",
        TIMEOUT,
    )
    .with_header("x-api-key", "test-key")
    .unwrap();

    let snapshot = source.fetch().await.unwrap();
    assert_eq!(snapshot.height, 4_512_345);
    assert_eq!(snapshot.source, "explorer");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_explorer_post_with_body() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/scan/blocks")
        .match_body(Matcher::PartialJson(json!({"row": 1, "page": 0})))
        .with_status(200)
        .with_body(r#"{"data":[{"number":4512346}]}"#)
        .create_async()
        .await;

    let source = HttpJsonSource::new(
        "subscan",
        format!("{}/scan/blocks", server.url()),
        "/data/0/number",
        TIMEOUT,
    )
    .with_method(HttpMethod::Post)
    .with_body(json!({"row": 1, "page": 0}));

    assert_eq!(source.fetch().await.unwrap().height, 4_512_346);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_substrate_rpc_hex_header() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({"method": "chain_getHeader"})))
        .with_status(200)
        .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"number":"0x44dbd9","parentHash":"0x00"}}"#)
        .create_async()
        .await;

    let source = SubstrateRpcSource::new("node", server.url(), TIMEOUT);
    assert_eq!(source.fetch().await.unwrap().height, 0x44dbd9);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_error_status_is_malformed() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/height")
        .with_status(503)
        .with_body("maintenance")
        .create_async()
        .await;

    let source = HttpJsonSource::new("explorer", format!("{}/height", server.url()), "/height", TIMEOUT);
    let err = source.fetch().await.unwrap_err();
    assert!(matches!(err, SourceError::MalformedResponse { .. }), "{:?}", err);
    assert_eq!(err.kind(), "malformed");
}

#[tokio::test]
async fn test_missing_or_bad_height_is_malformed() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/missing")
        .with_status(200)
        .with_body(r#"{"data":{}}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/garbage")
        .with_status(200)
        .with_body("<html>not json</html>")
        .create_async()
        .await;

    for path in ["/missing", "/garbage"] {
        let source = HttpJsonSource::new(
            "explorer",
            format!("{}{}", server.url(), path),
            "/data/blockNum",
            TIMEOUT,
        );
        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, SourceError::MalformedResponse { .. }), "{}: {:?}", path, err);
    }
}

#[tokio::test]
async fn test_unreachable_source() {
    // Nothing listens on the discard port
    let source = SubstrateRpcSource::new("down", "http://127.0.0.1:9", TIMEOUT);
    let err = source.fetch().await.unwrap_err();
    assert!(
        matches!(err, SourceError::Unreachable { .. } | SourceError::Timeout { .. }),
        "{:?}",
        err
    );
}
