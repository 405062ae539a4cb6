//! Scripted transports shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use crate::context::{CallContext, Metadata, MethodId};
use crate::error::{Code, TransportError};
use crate::transport::{Payload, StreamReceiver, StreamSender, Transport, TransportStream};

pub fn script(values: Vec<Payload>) -> Vec<Result<Payload, TransportError>> {
    values.into_iter().map(Ok).collect()
}

#[derive(Debug, Default)]
pub struct SentLog {
    pub messages: Vec<Payload>,
    pub closed: bool,
}

pub struct ScriptedSender {
    log: Arc<Mutex<SentLog>>,
    fail_at: Option<u64>,
}

impl ScriptedSender {
    pub fn new() -> Self {
        Self {
            log: Arc::default(),
            fail_at: None,
        }
    }

    /// Fails the `n`-th send (1-based).
    pub fn failing_at(n: u64) -> Self {
        Self {
            log: Arc::default(),
            fail_at: Some(n),
        }
    }

    pub fn log(&self) -> Arc<Mutex<SentLog>> {
        self.log.clone()
    }
}

#[async_trait]
impl StreamSender for ScriptedSender {
    async fn send(&mut self, message: Payload) -> Result<(), TransportError> {
        let mut log = self.log.lock().unwrap();
        let index = log.messages.len() as u64 + 1;
        if self.fail_at == Some(index) {
            return Err(TransportError::new(
                Code::Unavailable,
                format!("dropped message {index}"),
            ));
        }
        log.messages.push(message);
        Ok(())
    }

    async fn close_send(&mut self) -> Result<(), TransportError> {
        self.log.lock().unwrap().closed = true;
        Ok(())
    }
}

pub struct ScriptedReceiver {
    script: VecDeque<Result<Payload, TransportError>>,
    hang: bool,
}

impl ScriptedReceiver {
    /// Yields the script, then end-of-stream.
    pub fn new(script: Vec<Result<Payload, TransportError>>) -> Self {
        Self {
            script: script.into(),
            hang: false,
        }
    }

    /// Never yields anything.
    pub fn pending() -> Self {
        Self {
            script: VecDeque::new(),
            hang: true,
        }
    }
}

#[async_trait]
impl StreamReceiver for ScriptedReceiver {
    async fn recv(&mut self) -> Result<Option<Payload>, TransportError> {
        if self.hang {
            futures::future::pending::<()>().await;
        }
        match self.script.pop_front() {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

struct EchoSender(mpsc::UnboundedSender<Payload>);

#[async_trait]
impl StreamSender for EchoSender {
    async fn send(&mut self, message: Payload) -> Result<(), TransportError> {
        self.0
            .send(message)
            .map_err(|_| TransportError::new(Code::Unavailable, "echo closed"))
    }

    async fn close_send(&mut self) -> Result<(), TransportError> {
        // Dropping the sender ends the echo.
        let (closed, _) = mpsc::unbounded_channel();
        self.0 = closed;
        Ok(())
    }
}

struct EchoReceiver(mpsc::UnboundedReceiver<Payload>);

#[async_trait]
impl StreamReceiver for EchoReceiver {
    async fn recv(&mut self) -> Result<Option<Payload>, TransportError> {
        Ok(self.0.recv().await)
    }
}

/// What a [`FakeTransport`] does with a unary call.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Replies `{"echo": request}`.
    Echo,
    /// Fails with the given code.
    Fail(Code),
    /// Sleeps, then echoes.
    Delay(Duration),
}

/// Transport double counting calls and recording the metadata it saw.
pub struct FakeTransport {
    behavior: Mutex<Behavior>,
    calls: AtomicU64,
    opens: AtomicU64,
    last_metadata: Mutex<Option<Metadata>>,
}

impl FakeTransport {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            calls: AtomicU64::new(0),
            opens: AtomicU64::new(0),
            last_metadata: Mutex::new(None),
        })
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn last_metadata(&self) -> Option<Metadata> {
        self.last_metadata.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn invoke_unary(
        &self,
        ctx: &CallContext,
        _method: &MethodId,
        request: Payload,
    ) -> Result<Payload, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_metadata.lock().unwrap() = Some(ctx.metadata().clone());
        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            Behavior::Echo => Ok(json!({ "echo": request })),
            Behavior::Fail(code) => Err(TransportError::new(code, "scripted failure")),
            Behavior::Delay(d) => {
                tokio::time::sleep(d).await;
                Ok(json!({ "echo": request }))
            }
        }
    }

    async fn open_stream(
        &self,
        ctx: &CallContext,
        _method: &MethodId,
    ) -> Result<TransportStream, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        *self.last_metadata.lock().unwrap() = Some(ctx.metadata().clone());
        if let Behavior::Fail(code) = self.behavior.lock().unwrap().clone() {
            return Err(TransportError::new(code, "scripted open failure"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(TransportStream::new(EchoSender(tx), EchoReceiver(rx)))
    }

    fn name(&self) -> &str {
        "fake"
    }
}
