//! WebSocket channel and event loop.
//!
//! This module implements [`Channel`] over a JSON-over-WebSocket protocol,
//! including request/response correlation and event forwarding.
//!
//! # Event Loop
//!
//! The channel spawns a tokio task that handles:
//!
//! - Incoming frames from the server (responses, events)
//! - Outgoing calls from the session
//! - Request/response correlation by UUID
//! - Reporting closure as a final [`ChannelEvent::Closed`]

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, from_str, to_string};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{Event, Request, Response};

use super::{Channel, ChannelEvent};

// ============================================================================
// Constants
// ============================================================================

/// Upper bound for a call when the caller does not supply a timeout.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum pending requests before rejecting new ones.
const MAX_PENDING_REQUESTS: usize = 100;

// ============================================================================
// Types
// ============================================================================

/// Map of request IDs to response channels.
type CorrelationMap = FxHashMap<RequestId, oneshot::Sender<Result<Value>>>;

/// Internal commands for the event loop.
enum ChannelCommand {
    /// Send a request and wait for response.
    Send {
        request: Request,
        response_tx: oneshot::Sender<Result<Value>>,
    },
    /// Remove a timed-out correlation entry.
    RemoveCorrelation(RequestId),
    /// Shutdown the connection.
    Shutdown,
}

// ============================================================================
// WebSocketChannel
// ============================================================================

/// JSON-over-WebSocket implementation of [`Channel`].
///
/// Dropping the last handle shuts the socket down.
pub struct WebSocketChannel {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ChannelCommand>,
    /// Correlation map (shared with event loop).
    correlation: Arc<Mutex<CorrelationMap>>,
    /// Cleared by the event loop when the socket ends.
    open: Arc<AtomicBool>,
}

impl WebSocketChannel {
    /// Wraps an established WebSocket stream.
    ///
    /// Spawns the event loop task and returns the receiving end of the
    /// event stream.
    pub fn new<S>(ws_stream: WebSocketStream<S>) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let correlation = Arc::new(Mutex::new(CorrelationMap::default()));
        let open = Arc::new(AtomicBool::new(true));

        tokio::spawn(Self::run_event_loop(
            ws_stream,
            command_rx,
            Arc::clone(&correlation),
            events_tx,
            Arc::clone(&open),
        ));

        let channel = Self {
            command_tx,
            correlation,
            open,
        };

        (channel, events_rx)
    }

    /// Invokes a remote method with a custom timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::TransportClosed`] if the socket is closed
    /// - [`Error::RequestTimeout`] if no response arrives within `call_timeout`
    /// - [`Error::Protocol`] if too many requests are pending
    /// - [`Error::Remote`] if the server answered with an error
    pub async fn invoke_with_timeout(
        &self,
        method: &str,
        args: Vec<Value>,
        call_timeout: Duration,
    ) -> Result<Value> {
        {
            let correlation = self.correlation.lock();
            if correlation.len() >= MAX_PENDING_REQUESTS {
                warn!(
                    pending = correlation.len(),
                    max = MAX_PENDING_REQUESTS,
                    "Too many pending requests"
                );
                return Err(Error::protocol(format!(
                    "Too many pending requests: {}/{}",
                    correlation.len(),
                    MAX_PENDING_REQUESTS
                )));
            }
        }

        let request = Request::new(method, args);
        let request_id = request.id;
        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(ChannelCommand::Send {
                request,
                response_tx,
            })
            .map_err(|_| Error::transport_closed("event loop stopped"))?;

        match timeout(call_timeout, response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::transport_closed("response channel dropped")),
            Err(_) => {
                let _ = self
                    .command_tx
                    .send(ChannelCommand::RemoveCorrelation(request_id));

                Err(Error::request_timeout(
                    method,
                    call_timeout.as_millis() as u64,
                ))
            }
        }
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.correlation.lock().len()
    }

    /// Shuts down the connection gracefully.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ChannelCommand::Shutdown);
    }

    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop<S>(
        ws_stream: WebSocketStream<S>,
        mut command_rx: mpsc::UnboundedReceiver<ChannelCommand>,
        correlation: Arc<Mutex<CorrelationMap>>,
        events_tx: mpsc::UnboundedSender<ChannelEvent>,
        open: Arc<AtomicBool>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let reason = loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_incoming_message(&text, &correlation, &events_tx);
                        }

                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "WebSocket closed by remote");
                            break match frame {
                                Some(frame) => format!("closed by remote: {} {}", u16::from(frame.code), frame.reason),
                                None => "closed by remote".to_string(),
                            };
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break format!("WebSocket error: {e}");
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break "stream ended".to_string();
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(ChannelCommand::Send { request, response_tx }) => {
                            Self::handle_send_command(
                                request,
                                response_tx,
                                &mut ws_write,
                                &correlation,
                            ).await;
                        }

                        Some(ChannelCommand::RemoveCorrelation(request_id)) => {
                            correlation.lock().remove(&request_id);
                            debug!(%request_id, "Removed timed-out correlation");
                        }

                        Some(ChannelCommand::Shutdown) | None => {
                            debug!("Shutdown requested");
                            let _ = ws_write.close().await;
                            break "closed locally".to_string();
                        }
                    }
                }
            }
        };

        open.store(false, Ordering::SeqCst);
        Self::fail_pending_requests(&correlation, &reason);
        let _ = events_tx.send(ChannelEvent::Closed { reason });

        debug!("Event loop terminated");
    }

    /// Handles an incoming text frame from the server.
    fn handle_incoming_message(
        text: &str,
        correlation: &Arc<Mutex<CorrelationMap>>,
        events_tx: &mpsc::UnboundedSender<ChannelEvent>,
    ) {
        if let Ok(response) = from_str::<Response>(text) {
            let tx = correlation.lock().remove(&response.id);

            if let Some(tx) = tx {
                let _ = tx.send(response.into_result());
            } else {
                warn!(id = %response.id, "Response for unknown request");
            }

            return;
        }

        if let Ok(event) = from_str::<Event>(text)
            && event.is_event()
        {
            trace!(event = %event.method, "Event received");
            let _ = events_tx.send(ChannelEvent::Message {
                name: event.method,
                payload: event.params,
            });
            return;
        }

        warn!(text = %text, "Failed to parse incoming message");
    }

    /// Serializes and writes a request.
    async fn handle_send_command<S>(
        request: Request,
        response_tx: oneshot::Sender<Result<Value>>,
        ws_write: &mut SplitSink<WebSocketStream<S>, Message>,
        correlation: &Arc<Mutex<CorrelationMap>>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let request_id = request.id;

        let json = match to_string(&request) {
            Ok(j) => j,
            Err(e) => {
                let _ = response_tx.send(Err(Error::Json(e)));
                return;
            }
        };

        // Store correlation before sending
        correlation.lock().insert(request_id, response_tx);

        if let Err(e) = ws_write.send(Message::Text(json.into())).await
            && let Some(tx) = correlation.lock().remove(&request_id)
        {
            let _ = tx.send(Err(Error::transport_closed(e.to_string())));
        }

        trace!(%request_id, method = %request.method, "Request sent");
    }

    /// Fails all pending requests with a transport closed error.
    fn fail_pending_requests(correlation: &Arc<Mutex<CorrelationMap>>, reason: &str) {
        let pending: Vec<_> = correlation.lock().drain().collect();
        let count = pending.len();

        for (_, tx) in pending {
            let _ = tx.send(Err(Error::transport_closed(reason)));
        }

        if count > 0 {
            debug!(count, "Failed pending requests on shutdown");
        }
    }
}

#[async_trait]
impl Channel for WebSocketChannel {
    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.invoke_with_timeout(method, args, DEFAULT_CALL_TIMEOUT)
            .await
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.shutdown();
    }
}

impl Drop for WebSocketChannel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::{accept_async, connect_async};

    /// Minimal hub: answers `Echo`, rejects `Fail`, ignores `Hang`, and
    /// pushes an event after every `Notify`.
    async fn spawn_hub() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let ws = accept_async(stream).await.expect("upgrade");
            let (mut write, mut read) = ws.split();

            while let Some(Ok(Message::Text(text))) = read.next().await {
                let request: Request = from_str(&text).expect("request frame");
                let reply = match request.method.as_str() {
                    "Echo" => Some(Response::success(request.id, json!(request.args))),
                    "Fail" => Some(Response::error(request.id, "forbidden", "nope")),
                    "Notify" => {
                        let event = Event::new("ReceiveNotification", json!({"id": "n-1"}));
                        let frame = to_string(&event).expect("event");
                        write.send(Message::Text(frame.into())).await.expect("send");
                        Some(Response::success(request.id, Value::Null))
                    }
                    "Quit" => break,
                    _ => None,
                };
                if let Some(reply) = reply {
                    let frame = to_string(&reply).expect("reply");
                    write.send(Message::Text(frame.into())).await.expect("send");
                }
            }
        });

        format!("ws://127.0.0.1:{port}")
    }

    async fn connect(url: &str) -> (WebSocketChannel, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (ws, _) = connect_async(url).await.expect("connect");
        WebSocketChannel::new(ws)
    }

    #[test]
    fn test_constants() {
        assert_eq!(DEFAULT_CALL_TIMEOUT.as_secs(), 30);
        assert_eq!(MAX_PENDING_REQUESTS, 100);
    }

    #[tokio::test]
    async fn test_invoke_round_trip() {
        let url = spawn_hub().await;
        let (channel, _events) = connect(&url).await;

        let result = channel
            .invoke("Echo", vec![json!("a"), json!(1)])
            .await
            .expect("echo");
        assert_eq!(result, json!(["a", 1]));
        assert_eq!(channel.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_error_is_surfaced() {
        let url = spawn_hub().await;
        let (channel, _events) = connect(&url).await;

        let err = channel.invoke("Fail", Vec::new()).await.unwrap_err();
        assert!(matches!(err, Error::Remote { .. }));
        assert!(!err.is_transport_failure());
    }

    #[tokio::test]
    async fn test_events_are_forwarded() {
        let url = spawn_hub().await;
        let (channel, mut events) = connect(&url).await;

        channel.invoke("Notify", Vec::new()).await.expect("notify");
        let event = events.recv().await.expect("event");
        assert_eq!(
            event,
            ChannelEvent::Message {
                name: "ReceiveNotification".into(),
                payload: json!({"id": "n-1"}),
            }
        );
    }

    #[tokio::test]
    async fn test_call_timeout_cleans_correlation() {
        let url = spawn_hub().await;
        let (channel, _events) = connect(&url).await;

        let err = channel
            .invoke_with_timeout("Hang", Vec::new(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RequestTimeout { .. }));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(channel.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_close_reports_closed_and_fails_calls() {
        let url = spawn_hub().await;
        let (channel, mut events) = connect(&url).await;

        let _ = channel
            .invoke_with_timeout("Quit", Vec::new(), Duration::from_millis(200))
            .await;

        loop {
            match events.recv().await {
                Some(ChannelEvent::Closed { .. }) | None => break,
                Some(_) => continue,
            }
        }
        assert!(!channel.is_open());

        let err = channel.invoke("Echo", Vec::new()).await.unwrap_err();
        assert!(err.is_transport_failure());
    }

    #[tokio::test]
    async fn test_local_close() {
        let url = spawn_hub().await;
        let (channel, mut events) = connect(&url).await;

        channel.close();
        match events.recv().await {
            Some(ChannelEvent::Closed { reason }) => assert_eq!(reason, "closed locally"),
            other => panic!("expected Closed, got {other:?}"),
        }
        assert!(!channel.is_open());
    }

    #[test]
    fn test_is_channel() {
        fn assert_channel<T: Channel>() {}
        assert_channel::<WebSocketChannel>();
    }
}
