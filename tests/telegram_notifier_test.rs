//! Telegram notifier against a mock Bot API

use mockito::Matcher;
use serde_json::json;

use subnet_registrar::notifier::{NotificationEvent, Notifier, NotifyError, TelegramNotifier};
use subnet_registrar::types::WalletId;

fn registered_event() -> NotificationEvent {
    NotificationEvent::WalletRegistered {
        wallet: WalletId::new("cold/hot"),
        label: "miner-1".into(),
        attempts: 2,
        fee_paid: Some(1_750_000_000),
    }
}

#[tokio::test]
async fn test_send_message() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/bottest-token/sendMessage")
        .match_body(Matcher::AllOf(vec![
            Matcher::PartialJson(json!({
                "chat_id": "-100123",
                "parse_mode": "Markdown",
            })),
            Matcher::Regex("cold/hot".into()),
        ]))
        .with_status(200)
        .with_body(r#"{"ok":true,"result":{}}"#)
        .create_async()
        .await;

    let notifier = TelegramNotifier::new(server.url(), "test-token", "-100123");
    notifier.notify(&registered_event()).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_rejected_message_reports_status() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/bottest-token/sendMessage")
        .with_status(400)
        .with_body(r#"{"ok":false,"description":"Bad Request: chat not found"}"#)
        .create_async()
        .await;

    let notifier = TelegramNotifier::new(server.url(), "test-token", "-1");
    match notifier.notify(&registered_event()).await {
        Err(NotifyError::Rejected { status, body }) => {
            assert_eq!(status, 400);
            assert!(body.contains("chat not found"));
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_transport_error_hides_token() {
    let notifier = TelegramNotifier::new("http://127.0.0.1:9", "secret-token", "-1");
    let err = notifier.notify(&registered_event()).await.unwrap_err();
    assert!(matches!(err, NotifyError::Transport(_)));
    assert!(!err.to_string().contains("secret-token"));
}
