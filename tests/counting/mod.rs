use std::time::Duration;

use certif_link::Command;
use certif_link::PropertyPhase;

use crate::commons::command;
use crate::commons::Commands;
use crate::commons::LoopbackServer;

async fn scaler_server() -> LoopbackServer {
    let commands: Commands = [
        command("cnt_mne(0)", &[], &[], "sec"),
        command("cnt_name(0)", &[], &[], "Seconds"),
        command("cnt_mne(1)", &[], &[], "mon"),
        command("cnt_name(1)", &[], &[], "Monitor"),
        command(
            "count 0.5",
            &[],
            &[("scaler/sec/value", "0.5"), ("scaler/mon/value", "1234")],
            "0",
        ),
    ]
    .into_iter()
    .collect();

    LoopbackServer::start(
        &[
            ("var/COUNTERS", "2"),
            ("scaler/sec/value", "0"),
            ("scaler/mon/value", "0"),
            ("scaler/.all./count", "0"),
        ],
        commands,
    )
    .await
}

#[tokio::test]
async fn count_returns_final_counter_values() {
    let server = scaler_server().await;
    let client = server.connect().await;

    let result = client
        .count(Duration::from_millis(500), None, false)
        .await
        .unwrap();

    assert_eq!(result.get("sec"), Some(&0.5));
    assert_eq!(result.get("mon"), Some(&1234.0));
    assert_eq!(server.count_received(Command::FuncWithReturn, "count 0.5\n"), 1);
    assert_eq!(client.subscription_phase("scaler/mon/value"), PropertyPhase::Unregistered);
}

#[tokio::test]
async fn counter_names_come_from_server() {
    let server = scaler_server().await;
    let client = server.connect().await;

    let names = client.counter_names(false).await.unwrap();

    let pairs: Vec<_> = names.iter().map(|c| (c.mnemonic.as_str(), c.name.as_str())).collect();
    assert_eq!(pairs, vec![("sec", "Seconds"), ("mon", "Monitor")]);
}

#[tokio::test]
async fn stop_counting_is_accepted() {
    let server = scaler_server().await;
    let client = server.connect().await;

    client.stop_counting().await.unwrap();
    // Frames are served in order: once this read is answered the write has
    // been seen.
    client.get("var/COUNTERS").await.unwrap();

    assert_eq!(server.count_received(Command::ChanSend, "scaler/.all./count"), 1);
}
