//! ripple-client: Auto-reconnecting streaming chat client
//!
//! A session owns one transport channel at a time. Streamed bot replies are
//! folded into an observable timeline, and unexpected closes are retried with
//! exponential backoff until the attempt budget runs out.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ripple_client::{ClientConfig, WebSocketTransport, spawn};
//!
//! # async fn demo() -> ripple_client::Result<()> {
//! let client = spawn(ClientConfig::default(), Arc::new(WebSocketTransport::new()));
//! client.connect()?;
//! client.wait_for_state(|s| s.is_connected()).await?;
//! client.send_message("hello").await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod events;
pub mod handle;
pub mod scheduler;
pub mod transport;
pub mod websocket;

pub use client::{ChatClient, ClientConfig, DEFAULT_URL, spawn};
pub use error::{Error, Result};
pub use events::ClientEvent;
pub use handle::{ClientEventStream, ClientHandle};
pub use scheduler::{ReconnectPolicy, ReconnectScheduler};
pub use transport::{ChannelDriver, ChannelEvent, ChannelHandle, Transport, TransportEvent};
pub use websocket::WebSocketTransport;

pub use ripple_core::{ConnectionState, Message, Role};
