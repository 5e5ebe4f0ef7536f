//! An in-memory `Connector` that plays the upstream service in tests.

use crate::connection::{Connector, FrameSink, FrameStream};
use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
};

/// Hands out one in-memory transport. The matching [`LoopbackServer`] sees
/// every frame the connection sends and decides what it receives.
pub struct LoopbackConnector {
    transport: Mutex<Option<(FrameSink, FrameStream)>>,
    failure: Option<String>,
    opened: AtomicUsize,
}

/// The upstream end of a [`LoopbackConnector`].
pub struct LoopbackServer {
    received: UnboundedReceiver<String>,
    outgoing: Option<UnboundedSender<Result<String>>>,
}

impl LoopbackConnector {
    pub fn new() -> (Self, LoopbackServer) {
        let (to_server, received) = mpsc::unbounded::<String>();
        let (outgoing, from_server) = mpsc::unbounded::<Result<String>>();

        let sink: FrameSink = Box::pin(to_server.sink_map_err(anyhow::Error::from));
        let stream: FrameStream = Box::pin(from_server);

        let connector = Self {
            transport: Mutex::new(Some((sink, stream))),
            failure: None,
            opened: AtomicUsize::new(0),
        };
        let server = LoopbackServer {
            received,
            outgoing: Some(outgoing),
        };
        (connector, server)
    }

    /// A connector whose every `open` fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            transport: Mutex::new(None),
            failure: Some(message.into()),
            opened: AtomicUsize::new(0),
        }
    }

    /// How many times `open` was attempted.
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn open(&self) -> Result<(FrameSink, FrameStream)> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            bail!("{}", message);
        }
        self.transport
            .lock()
            .map_err(|_| anyhow!("loopback transport lock poisoned"))?
            .take()
            .ok_or_else(|| anyhow!("loopback transport already opened"))
    }
}

impl LoopbackServer {
    /// The next frame sent upstream, parsed as JSON. `None` once the
    /// connection released its transport.
    pub async fn next_frame(&mut self) -> Option<Value> {
        let text = self.received.next().await?;
        Some(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    /// Queues a frame for the connection to receive.
    pub fn push(&self, frame: Value) {
        self.push_raw(frame.to_string());
    }

    pub fn push_raw(&self, frame: impl Into<String>) {
        if let Some(outgoing) = &self.outgoing {
            let _ = outgoing.unbounded_send(Ok(frame.into()));
        }
    }

    pub fn acknowledge_setup(&self) {
        self.push(json!({ "setupComplete": {} }));
    }

    /// Ends the stream the connection reads from.
    pub fn hang_up(&mut self) {
        self.outgoing.take();
    }

    /// Closes the stream with an error, the way the WebSocket transport
    /// reports an abnormal close frame.
    pub fn close_with(&mut self, reason: &str) {
        if let Some(outgoing) = self.outgoing.take() {
            let _ = outgoing.unbounded_send(Err(anyhow!(
                "upstream closed the connection (1007): {}",
                reason
            )));
        }
    }
}
