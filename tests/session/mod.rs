use std::time::Duration;

use certif_link::Callback;
use certif_link::Command;
use certif_link::Error;
use certif_link::Message;
use certif_link::PropertyPhase;
use certif_link::ProtocolError;
use tokio::sync::mpsc;

use crate::commons::command;
use crate::commons::Commands;
use crate::commons::LoopbackServer;

async fn server() -> LoopbackServer {
    let commands: Commands = [command("wa", &["th = 12.5"], &[], "0")].into_iter().collect();
    LoopbackServer::start(&[("temp/value", "21.5"), ("var/x", "0")], commands).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn subscribe_get_set_over_tcp() {
    let server = server().await;
    let client = server.connect().await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let subscribed = client
        .subscribe(
            "temp/value",
            Callback::new(move |msg: Message| {
                let _ = tx.send(msg.body_str());
            }),
        )
        .await
        .unwrap();
    assert!(subscribed);
    assert_eq!(rx.recv().await.unwrap(), "21.5");

    client.set("var/x", "5").await.unwrap();
    let value = client.get("var/x").await.unwrap().unwrap();
    assert_eq!(value.body_str(), "5");

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn missing_property_is_a_protocol_error() {
    let server = server().await;
    let client = server.connect().await;

    let result = client.subscribe("no/such", Callback::new(|_| {})).await;

    assert!(matches!(
        result,
        Err(Error::Protocol(ProtocolError::NoSuchProperty { .. }))
    ));
    assert_eq!(client.subscription_phase("no/such"), PropertyPhase::Unregistered);
}

#[tokio::test]
async fn watch_serves_reads_locally() {
    let server = server().await;
    let client = server.connect().await;

    assert!(client.watch("temp/value").await.unwrap());
    for _ in 0..3 {
        let value = client.get("temp/value").await.unwrap().unwrap();
        assert_eq!(value.body_str(), "21.5");
    }
    assert_eq!(server.count_received(Command::ChanRead, "temp/value"), 0);

    client.unwatch("temp/value").await.unwrap();
    client.get("temp/value").await.unwrap();
    assert_eq!(server.count_received(Command::ChanRead, "temp/value"), 1);
}

#[tokio::test]
async fn console_command_returns_its_output() {
    let server = server().await;
    let client = server.connect().await;

    let (reply, output) = client.run("wa").await.unwrap();

    assert_eq!(reply.body_str(), "0");
    assert_eq!(output, "th = 12.5\n");
}

#[tokio::test]
async fn server_disconnect_releases_client() {
    let server = server().await;
    let client = server.connect().await;

    drop(server);
    let gone = tokio::time::timeout(Duration::from_secs(2), async {
        while client.is_connected() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    assert!(gone.is_ok());
    assert!(client.get("var/x").await.is_err());
}
