//! WebSocket transport to the sync bus.
//!
//! Owns the socket: a writer task drains the emit queue, a reader task
//! parses inbound frames into [`ServerEvent`]s. Emission goes through one
//! queue, so concurrent loops (control emitter, audio pull loop) never
//! interleave writes on the socket.

use std::time::Duration;

use ember_core::protocol::{ClientEvent, ServerEvent};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Connection-establishment timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Attempts before giving up on the server.
const CONNECT_ATTEMPTS: u32 = 3;

/// Delay between attempts.
const CONNECT_BACKOFF: Duration = Duration::from_secs(2);

/// Errors raised while connecting to the server.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Server URL could not be turned into a ws:// endpoint.
    #[error("invalid server URL: {0}")]
    InvalidUrl(String),

    /// Every connection attempt failed or timed out.
    #[error("could not reach server after {CONNECT_ATTEMPTS} attempts: {0}")]
    Exhausted(String),
}

/// Handle for emitting events to the server.
#[derive(Clone)]
pub struct Transport {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl Transport {
    /// Queues one event for the writer task. A closed socket makes this a
    /// no-op; the reader side surfaces the disconnect.
    pub fn emit(&self, event: ClientEvent) {
        let _ = self.tx.send(event);
    }
}

impl crate::session::ControlSink for Transport {
    fn emit(&self, event: ClientEvent) {
        Transport::emit(self, event);
    }
}

/// Turns `http://host:port` (or a bare `host:port`) into the ws endpoint.
fn ws_url(server: &str) -> Result<String, TransportError> {
    let trimmed = server.trim_end_matches('/');
    let url = if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}/ws")
    } else if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}/ws")
    } else if trimmed.starts_with("ws://") || trimmed.starts_with("wss://") {
        format!("{trimmed}/ws")
    } else if trimmed.contains(':') {
        format!("ws://{trimmed}/ws")
    } else {
        return Err(TransportError::InvalidUrl(server.to_string()));
    };
    Ok(url)
}

/// Connects with bounded retries and spawns the reader/writer tasks.
///
/// Returns the emit handle and the inbound event stream. The event stream
/// closing means the connection dropped.
pub async fn connect(
    server: &str,
) -> Result<(Transport, mpsc::UnboundedReceiver<ServerEvent>), TransportError> {
    let url = ws_url(server)?;

    let mut last_error = String::new();
    for attempt in 1..=CONNECT_ATTEMPTS {
        log::info!(
            "[Transport] Connecting to {} (attempt {}/{})",
            url,
            attempt,
            CONNECT_ATTEMPTS
        );
        match tokio::time::timeout(CONNECT_TIMEOUT, connect_async(&url)).await {
            Ok(Ok((socket, _response))) => {
                return Ok(spawn_io(socket));
            }
            Ok(Err(e)) => last_error = e.to_string(),
            Err(_) => last_error = "connection timed out".to_string(),
        }
        if attempt < CONNECT_ATTEMPTS {
            tokio::time::sleep(CONNECT_BACKOFF).await;
        }
    }
    Err(TransportError::Exhausted(last_error))
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

fn spawn_io(socket: WsStream) -> (Transport, mpsc::UnboundedReceiver<ServerEvent>) {
    let (mut write, mut read) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientEvent>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<ServerEvent>();

    // Writer: single consumer of the emit queue.
    tokio::spawn(async move {
        while let Some(event) = out_rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    log::error!("[Transport] Could not serialize event: {}", e);
                    continue;
                }
            };
            if write.send(Message::Text(json.into())).await.is_err() {
                log::warn!("[Transport] Write failed, socket closed");
                break;
            }
        }
    });

    // Reader: parse server events; dropping in_tx signals disconnect.
    tokio::spawn(async move {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(event) => {
                        if in_tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => log::debug!("[Transport] Unparseable server event: {}", e),
                },
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
        log::info!("[Transport] Disconnected from server");
    });

    (Transport { tx: out_tx }, in_rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_url_becomes_ws_endpoint() {
        assert_eq!(
            ws_url("http://192.168.1.10:5000").unwrap(),
            "ws://192.168.1.10:5000/ws"
        );
    }

    #[test]
    fn bare_host_port_is_accepted() {
        assert_eq!(ws_url("localhost:5000").unwrap(), "ws://localhost:5000/ws");
    }

    #[test]
    fn ws_scheme_is_passed_through() {
        assert_eq!(ws_url("ws://jam.local:5000").unwrap(), "ws://jam.local:5000/ws");
    }

    #[test]
    fn scheme_less_host_without_port_is_rejected() {
        assert!(ws_url("justahostname").is_err());
    }
}
