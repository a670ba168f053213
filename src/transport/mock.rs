//! Scripted in-memory transport for tests.
//!
//! [`MockConnector`] hands out [`MockChannel`]s whose calls are answered by a
//! swappable responder closure. Open attempts follow a script of
//! [`OpenBehavior`]s and succeed once the script is empty.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use url::Url;

use crate::credential::Credential;
use crate::error::{Error, Result};

use super::{Channel, ChannelEvent, ChannelFactory, OpenedChannel};

// ============================================================================
// Script Types
// ============================================================================

/// Outcome of one `open()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpenBehavior {
    Succeed,
    Fail,
    Hang,
}

/// Outcome of one `invoke()` call.
#[derive(Debug, Clone)]
pub(crate) enum MockReply {
    Value(Value),
    Remote(&'static str),
    Transport,
    Hang,
}

pub(crate) type Responder = Arc<dyn Fn(&str, &[Value]) -> MockReply + Send + Sync>;

fn default_responder() -> Responder {
    Arc::new(|_, _| MockReply::Value(Value::Null))
}

// ============================================================================
// MockConnector
// ============================================================================

pub(crate) struct MockConnector {
    script: Mutex<VecDeque<OpenBehavior>>,
    opens: AtomicUsize,
    responder: Arc<Mutex<Responder>>,
    channels: Mutex<Vec<Arc<MockChannel>>>,
    credentials: Mutex<Vec<String>>,
}

impl MockConnector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            opens: AtomicUsize::new(0),
            responder: Arc::new(Mutex::new(default_responder())),
            channels: Mutex::new(Vec::new()),
            credentials: Mutex::new(Vec::new()),
        })
    }

    /// Queues `count` failing opens.
    pub(crate) fn fail_next(&self, count: usize) {
        let mut script = self.script.lock();
        for _ in 0..count {
            script.push_back(OpenBehavior::Fail);
        }
    }

    pub(crate) fn push(&self, behavior: OpenBehavior) {
        self.script.lock().push_back(behavior);
    }

    pub(crate) fn set_responder(
        &self,
        responder: impl Fn(&str, &[Value]) -> MockReply + Send + Sync + 'static,
    ) {
        *self.responder.lock() = Arc::new(responder);
    }

    pub(crate) fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn last_channel(&self) -> Option<Arc<MockChannel>> {
        self.channels.lock().last().cloned()
    }

    pub(crate) fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    pub(crate) fn credentials(&self) -> Vec<String> {
        self.credentials.lock().clone()
    }
}

#[async_trait]
impl ChannelFactory for MockConnector {
    async fn open(&self, _endpoint: &Url, credential: &Credential) -> Result<OpenedChannel> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.credentials.lock().push(credential.token().to_string());

        let behavior = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(OpenBehavior::Succeed);

        match behavior {
            OpenBehavior::Fail => Err(Error::connection("mock refused")),
            OpenBehavior::Hang => std::future::pending().await,
            OpenBehavior::Succeed => {
                let (events_tx, events) = mpsc::unbounded_channel();
                let channel = Arc::new(MockChannel {
                    open: AtomicBool::new(true),
                    events_tx,
                    calls: Mutex::new(Vec::new()),
                    responder: Arc::clone(&self.responder),
                });
                self.channels.lock().push(Arc::clone(&channel));
                Ok(OpenedChannel { channel, events })
            }
        }
    }
}

// ============================================================================
// MockChannel
// ============================================================================

pub(crate) struct MockChannel {
    open: AtomicBool,
    events_tx: mpsc::UnboundedSender<ChannelEvent>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
    responder: Arc<Mutex<Responder>>,
}

impl MockChannel {
    /// Pushes a server event.
    pub(crate) fn emit(&self, name: &str, payload: Value) {
        let _ = self.events_tx.send(ChannelEvent::Message {
            name: name.to_string(),
            payload,
        });
    }

    /// Simulates the server dropping the connection.
    pub(crate) fn drop_connection(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.events_tx.send(ChannelEvent::Closed {
                reason: "dropped by server".into(),
            });
        }
    }

    /// Marks the transport closed without emitting an event.
    pub(crate) fn go_silent_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    /// Method names invoked so far, in order.
    pub(crate) fn methods(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(m, _)| m.clone()).collect()
    }

    /// Calls other than heartbeat probes, in order.
    pub(crate) fn calls_except(&self, method: &str) -> Vec<(String, Vec<Value>)> {
        self.calls
            .lock()
            .iter()
            .filter(|(m, _)| m != method)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(Error::transport_closed("mock closed"));
        }
        let responder = Arc::clone(&*self.responder.lock());
        let reply = responder(method, &args);
        self.calls.lock().push((method.to_string(), args));

        match reply {
            MockReply::Value(value) => Ok(value),
            MockReply::Remote(code) => Err(Error::remote(code, "mock remote error")),
            MockReply::Transport => Err(Error::transport_closed("mock transport failure")),
            MockReply::Hang => std::future::pending().await,
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.events_tx.send(ChannelEvent::Closed {
                reason: "closed locally".into(),
            });
        }
    }
}
