//! WebSocket transport built on tokio-tungstenite

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

use crate::error::{Error, Result};
use crate::transport::{ChannelDriver, Transport};

/// Opens each channel as a WebSocket connection on its own task
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create a WebSocket transport
    pub fn new() -> Self {
        Self
    }
}

impl Transport for WebSocketTransport {
    fn open(&self, url: &str, driver: ChannelDriver) {
        tokio::spawn(run_channel(url.to_string(), driver));
    }

    fn validate_url(&self, url: &str) -> Result<()> {
        validate_ws_url(url)
    }
}

/// Check that `url` is a `ws://` or `wss://` address with a host
pub fn validate_ws_url(url: &str) -> Result<()> {
    let request = url
        .into_client_request()
        .map_err(|e| Error::invalid_url(url, e))?;
    let uri = request.uri();

    match uri.scheme_str() {
        Some("ws") | Some("wss") => {}
        Some(other) => {
            return Err(Error::invalid_url(
                url,
                format!("unsupported scheme '{}', expected ws or wss", other),
            ));
        }
        None => return Err(Error::invalid_url(url, "missing scheme")),
    }

    if uri.host().is_none_or(str::is_empty) {
        return Err(Error::invalid_url(url, "missing host"));
    }
    Ok(())
}

async fn run_channel(url: String, mut driver: ChannelDriver) {
    let cancel = driver.cancel_token();
    let id = driver.id();

    let connected = tokio::select! {
        _ = cancel.cancelled() => {
            tracing::debug!("Channel {} closed before connecting", id);
            return;
        }
        result = tokio_tungstenite::connect_async(url.as_str()) => result,
    };

    let ws = match connected {
        Ok((ws, _response)) => ws,
        Err(e) => {
            tracing::warn!("Failed to connect to {}: {}", url, e);
            driver.errored(&e);
            driver.closed(Some(e.to_string()));
            return;
        }
    };

    tracing::debug!("Channel {} open to {}", id, url);
    driver.opened();
    let (mut sink, mut stream) = ws.split();

    let mut reason = None;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = sink.send(WsMessage::Close(None)).await {
                    tracing::debug!("Close frame on channel {} not sent: {}", id, e);
                }
                tracing::debug!("Channel {} closed by client", id);
                return;
            }
            outbound = driver.recv_outbound() => {
                let Some(payload) = outbound else { continue };
                if let Err(e) = sink.send(WsMessage::Text(payload)).await {
                    tracing::warn!("Send on channel {} failed: {}", id, e);
                    driver.errored(&e);
                    reason = Some(e.to_string());
                    break;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => driver.message(text),
                Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => driver.message(text),
                    Err(_) => tracing::warn!("Dropping non-UTF-8 binary frame on channel {}", id),
                },
                Some(Ok(WsMessage::Close(frame))) => {
                    reason = frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty());
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!("Channel {} failed: {}", id, e);
                    driver.errored(&e);
                    reason = Some(e.to_string());
                    break;
                }
                None => break,
            },
        }
    }

    driver.closed(reason);
}
