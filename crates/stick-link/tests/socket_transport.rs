//! Integration tests for the WebREPL socket transport.
//!
//! Each test starts a one-shot WebSocket server on `127.0.0.1:0` that plays
//! the device's side of the password exchange, then drives a real
//! `SocketTransport` against it.

use std::future::Future;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use stick_link::application::transport::{Transport, TransportError, TransportEvent};
use stick_link::infrastructure::socket::{SocketConfig, SocketTransport};

type DeviceSocket = WebSocketStream<TcpStream>;

const PASSWORD: &str = "micropython";

/// Accepts one WebSocket client and runs `script` against it.
async fn spawn_device<F, Fut, T>(script: F) -> (u16, JoinHandle<T>)
where
    F: FnOnce(DeviceSocket) -> Fut + Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        script(ws).await
    });
    (port, handle)
}

fn config_for(port: u16) -> SocketConfig {
    SocketConfig {
        host: "127.0.0.1".to_string(),
        port,
        password: PASSWORD.to_string(),
        connect_timeout: Duration::from_secs(2),
        auth_timeout: Duration::from_millis(300),
    }
}

/// Device side of a successful login.  Returns the credential frame.
async fn accept_login(ws: &mut DeviceSocket) -> String {
    ws.send(Message::Text("Password: ".into())).await.unwrap();
    let credential = next_text(ws).await.unwrap_or_default();
    ws.send(Message::Text("\r\nWebREPL connected\r\n>>> ".into()))
        .await
        .unwrap();
    credential
}

/// Next text frame, or `None` once the client is gone.
async fn next_text(ws: &mut DeviceSocket) -> Option<String> {
    while let Some(Ok(msg)) = ws.next().await {
        match msg {
            Message::Text(text) => return Some(text),
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

/// Waits for the next event matching `wanted`.
async fn wait_for_event(
    rx: &mut broadcast::Receiver<TransportEvent>,
    wanted: impl Fn(&TransportEvent) -> bool,
) -> TransportEvent {
    timeout(Duration::from_secs(2), async {
        loop {
            let event = rx.recv().await.unwrap();
            if wanted(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event did not arrive in time")
}

// ── Authentication ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_login_sends_exactly_one_credential_and_connects() {
    // Arrange
    let (port, device) = spawn_device(|mut ws| async move {
        let credential = accept_login(&mut ws).await;
        let mut extra = Vec::new();
        while let Some(text) = next_text(&mut ws).await {
            extra.push(text);
        }
        (credential, extra)
    })
    .await;
    let transport = SocketTransport::new(config_for(port));
    let mut rx = transport.subscribe();

    // Act
    let result = transport.connect().await;

    // Assert
    assert_eq!(result, Ok(()));
    assert!(transport.is_connected());
    assert_eq!(rx.recv().await.unwrap(), TransportEvent::Connected);

    transport.disconnect().await;
    let (credential, extra) = device.await.unwrap();
    assert_eq!(credential, format!("{PASSWORD}\r\n"));
    assert!(extra.is_empty(), "unexpected frames after login: {extra:?}");
}

#[tokio::test]
async fn test_denied_password_fails_and_closes_socket() {
    // Arrange
    let (port, device) = spawn_device(|mut ws| async move {
        ws.send(Message::Text("Password: ".into())).await.unwrap();
        let mut frames = Vec::new();
        if let Some(credential) = next_text(&mut ws).await {
            frames.push(credential);
        }
        ws.send(Message::Text("\r\nAccess denied\r\n".into()))
            .await
            .unwrap();
        while let Some(text) = next_text(&mut ws).await {
            frames.push(text);
        }
        frames
    })
    .await;
    let transport = SocketTransport::new(config_for(port));

    // Act
    let result = transport.connect().await;

    // Assert
    assert_eq!(result, Err(TransportError::AuthFailed));
    assert!(!transport.is_connected());
    let frames = timeout(Duration::from_secs(2), device)
        .await
        .expect("client left the socket open")
        .unwrap();
    assert_eq!(frames, vec![format!("{PASSWORD}\r\n")]);
}

#[tokio::test]
async fn test_silent_device_times_out_authentication() {
    // Arrange: the device accepts the socket but never prompts
    let (port, device) = spawn_device(|mut ws| async move {
        let _ = timeout(Duration::from_secs(3), next_text(&mut ws)).await;
    })
    .await;
    let transport = SocketTransport::new(config_for(port));

    // Act
    let result = transport.connect().await;

    // Assert
    assert_eq!(result, Err(TransportError::AuthTimeout));
    assert!(!transport.is_connected());
    device.abort();
}

#[tokio::test]
async fn test_close_before_auth_is_connection_closed() {
    let (port, _device) = spawn_device(|mut ws| async move {
        let _ = ws.close(None).await;
    })
    .await;
    let transport = SocketTransport::new(config_for(port));

    assert_eq!(transport.connect().await, Err(TransportError::ConnectionClosed));
}

#[tokio::test]
async fn test_refused_connection_is_connect_failed() {
    // Arrange: grab a free port, then release it
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let transport = SocketTransport::new(config_for(port));

    // Act
    let err = transport.connect().await.unwrap_err();

    // Assert
    assert_eq!(err.code(), "CONNECT_FAILED");
    assert!(!transport.is_connected());
}

// ── Traffic ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_frames_flow_both_ways_after_login() {
    // Arrange: the device echoes one frame back, then reports its kind
    let (port, device) = spawn_device(|mut ws| async move {
        accept_login(&mut ws).await;
        let mut kinds = Vec::new();
        while let Some(Ok(msg)) = ws.next().await {
            match msg {
                Message::Text(text) => {
                    kinds.push(format!("text:{}", text.escape_debug()));
                    ws.send(Message::Text(format!("echo {text}"))).await.unwrap();
                }
                Message::Binary(bytes) => kinds.push(format!("binary:{bytes:?}")),
                Message::Close(_) => break,
                _ => {}
            }
        }
        kinds
    })
    .await;
    let transport = SocketTransport::new(config_for(port));
    let mut rx = transport.subscribe();
    transport.connect().await.unwrap();

    // Act
    transport.write("print(1)").await.unwrap();
    let echoed = wait_for_event(&mut rx, |e| matches!(e, TransportEvent::Data(t) if t.starts_with("echo"))).await;
    transport.write_bytes(&[0x03]).await.unwrap();
    transport.write_bytes(&[0xFF, 0x00]).await.unwrap();
    transport.disconnect().await;

    // Assert
    assert_eq!(echoed, TransportEvent::Data("echo print(1)".into()));
    let kinds = device.await.unwrap();
    assert_eq!(kinds[0], "text:print(1)");
    assert_eq!(kinds[1], "text:\\u{3}");
    assert_eq!(kinds[2], "binary:[255, 0]");
}

// ── Teardown ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_device_closing_emits_one_disconnect() {
    // Arrange
    let (port, device) = spawn_device(|mut ws| async move {
        accept_login(&mut ws).await;
        let _ = ws.close(None).await;
    })
    .await;
    let transport = SocketTransport::new(config_for(port));
    let mut rx = transport.subscribe();
    transport.connect().await.unwrap();

    // Act
    wait_for_event(&mut rx, |e| *e == TransportEvent::Disconnected).await;
    device.await.unwrap();
    transport.disconnect().await;

    // Assert
    assert!(!transport.is_connected());
    assert_eq!(
        transport.write("x").await,
        Err(TransportError::NotConnected)
    );
    while let Ok(event) = rx.try_recv() {
        assert_ne!(event, TransportEvent::Disconnected, "second Disconnected event");
    }
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    // Arrange
    let (port, _device) = spawn_device(|mut ws| async move {
        accept_login(&mut ws).await;
        while next_text(&mut ws).await.is_some() {}
    })
    .await;
    let transport = SocketTransport::new(config_for(port));
    transport.connect().await.unwrap();
    let mut rx = transport.subscribe();

    // Act
    transport.disconnect().await;
    transport.disconnect().await;

    // Assert
    assert_eq!(rx.try_recv().unwrap(), TransportEvent::Disconnected);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_connect_twice_is_rejected() {
    let (port, _device) = spawn_device(|mut ws| async move {
        accept_login(&mut ws).await;
        while next_text(&mut ws).await.is_some() {}
    })
    .await;
    let transport = SocketTransport::new(config_for(port));
    transport.connect().await.unwrap();

    assert_eq!(transport.connect().await, Err(TransportError::AlreadyConnected));

    transport.disconnect().await;
}
