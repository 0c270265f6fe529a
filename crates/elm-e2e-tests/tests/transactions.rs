//! E2E tests for the transaction layer: timeouts, late replies, ordering
//! and the TCP transport.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use elm_link::{LinkError, ObdSession, Reply, TcpTransport};
use elm_protocol::{Measurement, Protocol, Unit};

use helpers::{TestHarness, cmd, fast_config};

/// A reply that arrives after the timeout never leaks into the next
/// transaction.
#[tokio::test(start_paused = true)]
async fn e2e_late_reply_is_discarded() {
    let h = TestHarness::ready().await;
    h.adapter
        .script("0105", Reply::delayed(Duration::from_secs(3), "7E8 03 41 05 7B"));

    let err = h.session.send_raw("0105").await.unwrap_err();
    assert!(matches!(err, LinkError::Timeout { timeout_ms: 2000 }));

    tokio::time::sleep(Duration::from_secs(2)).await;
    let results = h.session.request(&[cmd("010F")]).await.unwrap();
    assert_eq!(
        results[&cmd("010F").key()],
        Measurement::value(30.0, Unit::Celsius)
    );
}

/// A reply that arrives only after the next command went out is not taken
/// as that command's answer: the adapter is interrupted first.
#[tokio::test(start_paused = true)]
async fn e2e_reply_after_next_write_is_not_shifted() {
    let h = TestHarness::ready().await;
    h.adapter
        .script("ATRV", Reply::delayed(Duration::from_millis(2500), "12.6V"));
    h.adapter
        .script("ATI", Reply::delayed(Duration::from_millis(1000), "ELM327 v1.5"));

    let err = h.session.send_raw("ATRV").await.unwrap_err();
    assert!(matches!(err, LinkError::Timeout { timeout_ms: 2000 }));

    let identity = h.session.send_raw("ATI").await.unwrap();
    assert_eq!(identity.lines, vec!["ELM327 v1.5"]);
    assert_eq!(h.adapter.interrupts(), 1);

    let results = h.session.request(&[cmd("010F")]).await.unwrap();
    assert_eq!(
        results[&cmd("010F").key()],
        Measurement::value(30.0, Unit::Celsius)
    );
}

/// Concurrent callers are answered in the order they asked, each with its
/// own reply.
#[tokio::test(start_paused = true)]
async fn e2e_concurrent_commands_are_serialized() {
    let h = TestHarness::ready().await;
    h.adapter
        .script("ATRV", Reply::delayed(Duration::from_millis(50), "13.1V"));

    let (voltage, identity) = tokio::join!(h.session.send_raw("ATRV"), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.session.send_raw("ATI").await
    });

    assert_eq!(voltage.unwrap().first_line(), Some("13.1V"));
    assert_eq!(identity.unwrap().first_line(), Some("ELM327 v1.5"));
    let sent = h.adapter.sent();
    assert_eq!(&sent[sent.len() - 2..], ["ATRV", "ATI"]);
}

/// A failed write is reported once and the link keeps working.
#[tokio::test]
async fn e2e_transport_error_is_not_retried() {
    let h = TestHarness::ready().await;
    let before = h.adapter.sent_count("010D");
    h.adapter.fail_next_write("radio dropped");

    let err = h.session.request(&[cmd("010D")]).await.unwrap_err();
    assert!(matches!(err, LinkError::Transport(ref m) if m == "radio dropped"));
    assert_eq!(h.adapter.sent_count("010D"), before);

    let results = h.session.request(&[cmd("010D")]).await.unwrap();
    assert!(!results[&cmd("010D").key()].is_no_result());
}

/// Malformed commands are refused without touching the adapter.
#[tokio::test]
async fn e2e_invalid_commands_rejected() {
    let h = TestHarness::ready().await;
    let before = h.adapter.sent().len();

    for bad in ["", "01 0C\r", "ATZ>", "01\u{e9}"] {
        assert!(
            matches!(h.session.send_raw(bad).await, Err(LinkError::InvalidCommand(_))),
            "{bad:?}"
        );
    }
    assert_eq!(h.adapter.sent().len(), before);
}

/// A closed session refuses further work.
#[tokio::test]
async fn e2e_closed_session_is_not_ready() {
    let mut h = TestHarness::ready().await;
    h.session.close().await.unwrap();

    assert!(matches!(
        h.session.send_raw("ATRV").await,
        Err(LinkError::NotReady)
    ));
}

/// Minimal Wi-Fi dongle: no echo, headers in CAN 11-bit form.
async fn serve_adapter(listener: TcpListener) {
    let Ok((mut socket, _)) = listener.accept().await else {
        return;
    };
    let mut pending = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        pending.extend_from_slice(&buf[..n]);
        while let Some(end) = pending.iter().position(|b| *b == b'\r') {
            let line: Vec<u8> = pending.drain(..=end).collect();
            let command = String::from_utf8_lossy(&line[..end]).to_string();
            let reply = match command.as_str() {
                "ATZ" => "ELM327 v2.1",
                "ATRV" => "12.4V",
                "ATDPN" => "A6",
                "0100" => "SEARCHING...\r7E8 06 41 00 BE 1F A8 13",
                "010D" => "7E8 03 41 0D 32",
                c if c.starts_with("AT") => "OK",
                _ => "NO DATA",
            };
            let out = format!("{reply}\r\r>");
            if socket.write_all(out.as_bytes()).await.is_err() {
                return;
            }
        }
    }
}

/// Full setup and a request over a real TCP socket.
#[tokio::test]
async fn e2e_tcp_adapter_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let server = tokio::spawn(serve_adapter(listener));

    let (tcp, rx) = TcpTransport::connect(&address).await.unwrap();
    let mut session = ObdSession::new(Arc::new(tcp), rx, fast_config(Protocol::Auto));

    let info = session.setup().await.unwrap().clone();
    assert_eq!(info.protocol, Protocol::Iso15765_4Can11bit500);
    assert_eq!(info.identity.as_deref(), Some("ELM327 v2.1"));
    assert_eq!(info.voltage.as_deref(), Some("12.4V"));

    let results = session.request(&[cmd("010D")]).await.unwrap();
    assert_eq!(
        results[&cmd("010D").key()],
        Measurement::value(50.0, Unit::KilometersPerHour)
    );

    session.close().await.unwrap();
    server.abort();
}
