use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::Command;
use crate::Error;
use crate::FrameSink;
use crate::FrameSource;
use crate::Message;
use crate::Result;

/// Produces the server's answers to one client frame.
pub type Responder = Box<dyn FnMut(&Message) -> Vec<Message> + Send>;

struct Shared {
    sent: Mutex<Vec<Message>>,
    responder: Mutex<Option<Responder>>,
    inbound: mpsc::UnboundedSender<Result<Message>>,
    fail_writes: Mutex<bool>,
}

/// Server side of an in-memory connection.
///
/// Records every frame the client writes, answers through an optional
/// responder, and lets a test push frames or inject failures at will.
#[derive(Clone)]
pub struct ScriptedServer {
    shared: Arc<Shared>,
    source: Arc<Mutex<Option<mpsc::UnboundedReceiver<Result<Message>>>>>,
}

pub struct ScriptedSink {
    shared: Arc<Shared>,
}

pub struct ScriptedSource {
    inbound: mpsc::UnboundedReceiver<Result<Message>>,
}

impl ScriptedServer {
    /// A server that never answers on its own.
    pub fn silent() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                sent: Mutex::new(Vec::new()),
                responder: Mutex::new(None),
                inbound: tx,
                fail_writes: Mutex::new(false),
            }),
            source: Arc::new(Mutex::new(Some(rx))),
        }
    }

    pub fn with_responder(responder: impl FnMut(&Message) -> Vec<Message> + Send + 'static) -> Self {
        let server = Self::silent();
        server.set_responder(responder);
        server
    }

    pub fn set_responder(
        &self,
        responder: impl FnMut(&Message) -> Vec<Message> + Send + 'static,
    ) {
        *self.shared.responder.lock() = Some(Box::new(responder));
    }

    /// Client halves of the connection. Can be taken once.
    pub fn transport(&self) -> (ScriptedSink, ScriptedSource) {
        let inbound = self
            .source
            .lock()
            .take()
            .expect("transport already taken");
        (
            ScriptedSink {
                shared: self.shared.clone(),
            },
            ScriptedSource { inbound },
        )
    }

    /// Delivers a frame to the client as if the server had sent it.
    pub fn push(
        &self,
        msg: Message,
    ) {
        let _ = self.shared.inbound.send(Ok(msg));
    }

    /// Breaks the read side with `error`.
    pub fn fail(
        &self,
        error: Error,
    ) {
        let _ = self.shared.inbound.send(Err(error));
    }

    /// Makes every following client write fail.
    pub fn fail_writes(&self) {
        *self.shared.fail_writes.lock() = true;
    }

    pub fn sent(&self) -> Vec<Message> {
        self.shared.sent.lock().clone()
    }

    pub fn sent_for(
        &self,
        command: Command,
        property: &str,
    ) -> Vec<Message> {
        self.sent()
            .into_iter()
            .filter(|m| m.command == command && m.property_name == property)
            .collect()
    }

    pub fn count_sent(
        &self,
        command: Command,
        property: &str,
    ) -> usize {
        self.sent_for(command, property).len()
    }
}

#[async_trait]
impl FrameSink for ScriptedSink {
    async fn send_frame(
        &mut self,
        frame: Message,
    ) -> Result<()> {
        if *self.shared.fail_writes.lock() {
            return Err(Error::connection_closed());
        }
        let replies = match self.shared.responder.lock().as_mut() {
            Some(responder) => responder(&frame),
            None => Vec::new(),
        };
        self.shared.sent.lock().push(frame);
        for reply in replies {
            let _ = self.shared.inbound.send(Ok(reply));
        }
        Ok(())
    }
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn recv_frame(&mut self) -> Result<Message> {
        match self.inbound.recv().await {
            Some(frame) => frame,
            None => Err(Error::connection_closed()),
        }
    }
}
