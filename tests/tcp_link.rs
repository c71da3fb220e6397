//! End-to-end exchanges over a real loopback socket

use ameba_link::{
    CloseOutcome, CloseTarget, Command, CompletionPolicy, ConnectionState, Endpoint, LinkSettings,
    OpenOutcome, ResponseStatus, TransportKind,
};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

// IAC DO ECHO, IAC WILL SGA, IAC DO NAWS
const NEGOTIATION: [u8; 9] = [255, 253, 1, 255, 251, 3, 255, 253, 31];

/// Line-oriented fake console. `BYE` makes it hang up.
async fn fake_console() -> u16 {
    console(false).await
}

/// Fake console that opens with Telnet option negotiation
async fn telnet_console() -> u16 {
    console(true).await
}

async fn console(negotiate: bool) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (reader, mut writer) = socket.into_split();
        if negotiate {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.write_all(&NEGOTIATION).await.unwrap();
        }
        let mut lines = BufReader::new(reader).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            let reply = match line.trim_end() {
                "AT" => "\r\nOK\r\n#",
                "ATW?" => "AP: Lab\r\nIP: 10.0.0.9\r\n#",
                "ATWS" => "_SCAN_\r\n1\tInfra\tAA\t-40\tLab\r\ndone!\r\n",
                "BYE" => break,
                _ => "ERROR\r\n#",
            };
            if writer.write_all(reply.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    port
}

#[tokio::test]
async fn test_open_and_query_over_tcp() {
    let port = fake_console().await;
    let state = ConnectionState::default();

    let outcome = state.open_tcp("127.0.0.1", port).await.unwrap();
    assert_eq!(
        outcome,
        OpenOutcome::Connected {
            endpoint: Endpoint::Tcp { host: "127.0.0.1".into(), port },
            probe_reply: Some("OK".into()),
        }
    );

    let result = state
        .execute(None, &Command::new("ATW?"), &CompletionPolicy::prompt(), Duration::from_secs(3))
        .await
        .unwrap();
    assert_eq!(result.status, ResponseStatus::Success);
    assert_eq!(result.transport, TransportKind::Tcp);
    assert_eq!(result.text, "AP: Lab\r\nIP: 10.0.0.9");

    let again = state.open_tcp("127.0.0.1", port).await.unwrap();
    assert!(matches!(again, OpenOutcome::AlreadyConnected { .. }));

    let report = state.close(CloseTarget::Tcp).await;
    assert_eq!(report.tcp, Some(CloseOutcome::Disconnected));
    assert_eq!(state.status().await.summary, "No connections");
}

#[tokio::test]
async fn test_hang_up_clears_link() {
    let port = fake_console().await;
    let state = ConnectionState::default();
    state.open_tcp("127.0.0.1", port).await.unwrap();

    let result = state
        .execute(
            Some(TransportKind::Tcp),
            &Command::new("BYE"),
            &CompletionPolicy::prompt(),
            Duration::from_secs(3),
        )
        .await
        .unwrap();
    assert_eq!(result.status, ResponseStatus::Error);
    assert!(result.text.is_empty());
    assert!(state.endpoint(TransportKind::Tcp).await.is_none());

    let report = state.close(CloseTarget::All).await;
    assert_eq!(report.tcp, Some(CloseOutcome::NotConnected));
}

#[tokio::test]
async fn test_unreachable_host_fails_to_open() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let state = ConnectionState::default();
    assert!(state.open_tcp("127.0.0.1", port).await.is_err());
    assert!(state.endpoint(TransportKind::Tcp).await.is_none());
}

#[tokio::test]
async fn test_telnet_negotiation_drained_on_open() {
    let port = telnet_console().await;
    let settings = LinkSettings { telnet_port: port, ..LinkSettings::default() };
    let state = ConnectionState::new(settings.clone());

    let started = std::time::Instant::now();
    let outcome = state.open_tcp("127.0.0.1", port).await.unwrap();
    assert!(started.elapsed() >= settings.telnet_grace);
    assert_eq!(
        outcome,
        OpenOutcome::Connected {
            endpoint: Endpoint::Tcp { host: "127.0.0.1".into(), port },
            probe_reply: Some("OK".into()),
        }
    );
}

#[tokio::test]
async fn test_negotiation_leaks_without_telnet_port() {
    let port = telnet_console().await;
    let state = ConnectionState::default();

    let outcome = state.open_tcp("127.0.0.1", port).await.unwrap();
    match outcome {
        OpenOutcome::Connected { probe_reply: Some(reply), .. } => {
            assert!(reply.ends_with("OK"));
            assert_ne!(reply, "OK");
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}
