//! WebSocket sessions, rooms and event dispatch
//!
//! Every frame is a JSON envelope `{"event": "...", "data": ...}`. A session
//! registers handlers with [`WebSocketSession::on`]; the reader loop decodes
//! incoming frames and runs the matching handler on its own task.
//!
//! Built-in events:
//!
//! - `error`: a frame that is not a valid envelope (data is the decode error)
//! - `disconnect`: the connection ended (`{"reason": ..., "clientID": ...}`)
//!
//! Every session joins the `*` room when it is registered with the hub.
//! `to(room).emit(..)` and `broadcast(..)` skip the sending session.

use crate::Error;
use crate::logging::{debug, error, trace, warn};
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// Room every session belongs to
pub const ROOM_ALL: &str = "*";

pub const EVENT_MESSAGE: &str = "message";
pub const EVENT_CLOSE: &str = "close";
pub const EVENT_ERROR: &str = "error";
pub const EVENT_DISCONNECT: &str = "disconnect";

/// Wire envelope of every frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

type EventHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, ()> + Send + Sync>;
type Outbound = mpsc::UnboundedSender<Message>;

#[derive(Default)]
struct HubState {
    clients: HashMap<String, Outbound>,
    rooms: HashMap<String, HashSet<String>>,
}

/// Registry of connected sessions and their room memberships.
///
/// Owned by the application and shared with every session.
#[derive(Default)]
pub struct WebSocketHub {
    state: Mutex<HubState>,
}

impl WebSocketHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, id: &str, outbound: Outbound) {
        let mut state = self.state.lock();
        state.clients.insert(id.to_string(), outbound);
        state
            .rooms
            .entry(ROOM_ALL.to_string())
            .or_default()
            .insert(id.to_string());
        debug!(client_id = %id, clients = state.clients.len(), "WebSocket client registered");
    }

    fn unregister(&self, id: &str, rooms: &HashSet<String>) {
        let mut state = self.state.lock();
        state.clients.remove(id);
        for room in rooms {
            if let Some(members) = state.rooms.get_mut(room) {
                members.remove(id);
                if members.is_empty() {
                    state.rooms.remove(room);
                }
            }
        }
        debug!(client_id = %id, clients = state.clients.len(), "WebSocket client unregistered");
    }

    fn add_member(&self, room: &str, id: &str) {
        self.state
            .lock()
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(id.to_string());
    }

    fn remove_member(&self, room: &str, id: &str) {
        let mut state = self.state.lock();
        if let Some(members) = state.rooms.get_mut(room) {
            members.remove(id);
            if members.is_empty() {
                state.rooms.remove(room);
            }
        }
    }

    /// Senders of every member of `room` except `exclude`. The lock is only
    /// held while collecting.
    fn recipients(&self, room: &str, exclude: Option<&str>) -> Vec<(String, Outbound)> {
        let state = self.state.lock();
        let Some(members) = state.rooms.get(room) else {
            return Vec::new();
        };
        members
            .iter()
            .filter(|id| Some(id.as_str()) != exclude)
            .filter_map(|id| state.clients.get(id).map(|tx| (id.clone(), tx.clone())))
            .collect()
    }

    /// Emit an event to every member of `room`
    pub fn emit<T: Serialize>(&self, room: &str, event: &str, data: T) -> Result<(), Error> {
        send_to_all(self.recipients(room, None), room, event, data)
    }

    pub fn client_count(&self) -> usize {
        self.state.lock().clients.len()
    }

    pub fn room_size(&self, room: &str) -> usize {
        self.state.lock().rooms.get(room).map_or(0, HashSet::len)
    }

    pub fn is_connected(&self, id: &str) -> bool {
        self.state.lock().clients.contains_key(id)
    }
}

fn encode<T: Serialize>(event: &str, data: T) -> Result<Message, Error> {
    let data = serde_json::to_value(data).map_err(|e| Error::Serialization(e.to_string()))?;
    let payload = EventPayload {
        event: event.to_string(),
        data,
    };
    let text = serde_json::to_string(&payload).map_err(|e| Error::Serialization(e.to_string()))?;
    Ok(Message::text(text))
}

fn send_to_all<T: Serialize>(
    recipients: Vec<(String, Outbound)>,
    room: &str,
    event: &str,
    data: T,
) -> Result<(), Error> {
    let message = encode(event, data)?;
    let mut failed = Vec::new();
    for (id, tx) in recipients {
        if tx.send(message.clone()).is_err() {
            warn!(room = %room, client_id = %id, "Emit to closed WebSocket client");
            failed.push(id);
        }
    }
    if failed.is_empty() {
        Ok(())
    } else {
        Err(Error::WebSocket(format!(
            "emit to room '{room}' failed for {} client(s): {}",
            failed.len(),
            failed.join(", ")
        )))
    }
}

struct SessionInner {
    id: String,
    hub: Arc<WebSocketHub>,
    outbound: Outbound,
    handlers: RwLock<HashMap<String, EventHandler>>,
    rooms: Mutex<HashSet<String>>,
    registered: AtomicBool,
    closed: AtomicBool,
}

/// One WebSocket connection. Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct WebSocketSession {
    inner: Arc<SessionInner>,
}

/// Non-owning handle to a session, for handlers that must not keep their
/// own connection alive.
#[derive(Clone)]
pub struct WeakSession {
    inner: Weak<SessionInner>,
}

impl WeakSession {
    /// The session, if it has not been dropped yet
    pub fn upgrade(&self) -> Option<WebSocketSession> {
        self.inner.upgrade().map(|inner| WebSocketSession { inner })
    }
}

impl std::fmt::Debug for WebSocketSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketSession")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl WebSocketSession {
    /// Create a session that is not yet registered with the hub, together
    /// with the receiving end of its outbound queue.
    pub fn new(hub: Arc<WebSocketHub>) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let session = Self {
            inner: Arc::new(SessionInner {
                id: uuid::Uuid::new_v4().to_string(),
                hub,
                outbound,
                handlers: RwLock::new(HashMap::new()),
                rooms: Mutex::new(HashSet::new()),
                registered: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        };
        (session, rx)
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn hub(&self) -> &Arc<WebSocketHub> {
        &self.inner.hub
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn downgrade(&self) -> WeakSession {
        WeakSession {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Register with the hub and join the `*` room. No-op once closed.
    pub fn connect(&self) {
        let mut rooms = self.inner.rooms.lock();
        if self.is_closed() || self.inner.registered.swap(true, Ordering::AcqRel) {
            return;
        }
        rooms.insert(ROOM_ALL.to_string());
        self.inner
            .hub
            .register(&self.inner.id, self.inner.outbound.clone());
    }

    /// Register a handler for `event`, replacing any previous one. Handlers
    /// registered after the session closed are dropped.
    pub fn on<F, Fut>(&self, event: &str, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: EventHandler = Arc::new(move |data| Box::pin(handler(data)));
        let mut handlers = self.inner.handlers.write();
        if self.is_closed() {
            trace!(client_id = %self.inner.id, event = %event, "Handler registered on closed session ignored");
            return;
        }
        handlers.insert(event.to_string(), handler);
    }

    /// Send an event to this session only
    pub fn emit<T: Serialize>(&self, event: &str, data: T) -> Result<(), Error> {
        let message = encode(event, data)?;
        self.inner
            .outbound
            .send(message)
            .map_err(|_| Error::WebSocket(format!("session {} is closed", self.inner.id)))
    }

    /// Send an event to every other connected session
    pub fn broadcast<T: Serialize>(&self, event: &str, data: T) -> Result<(), Error> {
        self.to(ROOM_ALL).emit(event, data)
    }

    /// Address the other members of `room`
    pub fn to(&self, room: &str) -> RoomEmitter<'_> {
        RoomEmitter {
            source: self,
            room: room.to_string(),
        }
    }

    /// Join `room`. No-op once the session is closed.
    pub fn join(&self, room: &str) {
        let mut rooms = self.inner.rooms.lock();
        if self.is_closed() {
            return;
        }
        rooms.insert(room.to_string());
        self.inner.hub.add_member(room, &self.inner.id);
        trace!(client_id = %self.inner.id, room = %room, "Joined room");
    }

    pub fn leave(&self, room: &str) {
        self.inner.rooms.lock().remove(room);
        self.inner.hub.remove_member(room, &self.inner.id);
        trace!(client_id = %self.inner.id, room = %room, "Left room");
    }

    /// Rooms this session is a member of
    pub fn rooms(&self) -> Vec<String> {
        self.inner.rooms.lock().iter().cloned().collect()
    }

    /// Ask the connection to close. The reader loop then reports
    /// `disconnect`.
    pub fn disconnect(&self) {
        let _ = self.inner.outbound.send(Message::Close(None));
    }

    /// Run the handler registered for `event`, if any, on its own task.
    pub fn trigger(&self, event: &str, data: Value) -> bool {
        let handler = self.inner.handlers.read().get(event).cloned();
        match handler {
            Some(handler) => {
                tokio::spawn(handler(data));
                true
            }
            None => {
                trace!(client_id = %self.inner.id, event = %event, "No handler for event");
                false
            }
        }
    }

    /// Decode one text frame and dispatch it.
    pub fn dispatch_text(&self, text: &str) -> bool {
        match serde_json::from_str::<EventPayload>(text) {
            Ok(payload) => self.trigger(&payload.event, payload.data),
            Err(e) => self.trigger(EVENT_ERROR, Value::String(e.to_string())),
        }
    }

    /// Unregister from the hub and drop every event handler, returning the
    /// `disconnect` handler so the caller can still report the closure.
    ///
    /// Handlers usually capture a clone of their session; dropping them
    /// breaks that cycle so the session is freed once its tasks finish.
    fn close(&self) -> Option<EventHandler> {
        let rooms = {
            let mut rooms = self.inner.rooms.lock();
            if self.inner.closed.swap(true, Ordering::AcqRel) {
                return None;
            }
            std::mem::take(&mut *rooms)
        };
        if self.inner.registered.load(Ordering::Acquire) {
            self.inner.hub.unregister(&self.inner.id, &rooms);
        }

        let mut handlers = std::mem::take(&mut *self.inner.handlers.write());
        handlers.remove(EVENT_DISCONNECT)
    }

    /// Drive the connection until it ends: a writer task drains the outbound
    /// queue while this task reads frames and dispatches events.
    pub async fn serve<S>(self, stream: WebSocketStream<S>, mut outbound: mpsc::UnboundedReceiver<Message>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sink, mut frames) = stream.split();
        let client_id = self.inner.id.clone();

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                let closing = message.is_close();
                if let Err(e) = sink.send(message).await {
                    trace!(error = %e, "WebSocket writer stopped");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let reason = loop {
            match frames.next().await {
                Some(Ok(Message::Text(text))) => {
                    self.dispatch_text(text.as_str());
                }
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => {
                        self.dispatch_text(text);
                    }
                    Err(e) => {
                        self.trigger(EVENT_ERROR, Value::String(e.to_string()));
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame)
                            if !matches!(
                                frame.code,
                                CloseCode::Normal | CloseCode::Away | CloseCode::Status
                            ) =>
                        {
                            error!(client_id = %client_id, code = %frame.code, "Unexpected WebSocket closure");
                            format!("Error: close code {}: {}", frame.code, frame.reason.as_str())
                        }
                        _ => "Normal closure by the customer".to_string(),
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(client_id = %client_id, error = %e, "WebSocket read error");
                    break format!("Critical Failure: {e}");
                }
                None => break "Normal closure by the customer".to_string(),
            }
        };

        if let Some(on_disconnect) = self.close() {
            tokio::spawn(on_disconnect(
                serde_json::json!({ "reason": reason, "clientID": client_id }),
            ));
        }

        writer.abort();
        debug!(client_id = %client_id, reason = %reason, "WebSocket session ended");
    }
}

/// Emits to the members of one room, excluding the source session.
pub struct RoomEmitter<'a> {
    source: &'a WebSocketSession,
    room: String,
}

impl RoomEmitter<'_> {
    pub fn emit<T: Serialize>(&self, event: &str, data: T) -> Result<(), Error> {
        let hub = &self.source.inner.hub;
        let recipients = hub.recipients(&self.room, Some(self.source.id()));
        send_to_all(recipients, &self.room, event, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_of(message: Message) -> EventPayload {
        match message {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_connect_joins_all_room() {
        let hub = Arc::new(WebSocketHub::new());
        let (session, _rx) = WebSocketSession::new(hub.clone());
        assert_eq!(hub.client_count(), 0);

        session.connect();
        assert!(hub.is_connected(session.id()));
        assert_eq!(hub.room_size(ROOM_ALL), 1);
        assert_eq!(session.rooms(), vec![ROOM_ALL.to_string()]);
    }

    #[test]
    fn test_emit_wraps_payload() {
        let hub = Arc::new(WebSocketHub::new());
        let (session, mut rx) = WebSocketSession::new(hub);
        session.emit("greeting", "hola").unwrap();

        let payload = text_of(rx.try_recv().unwrap());
        assert_eq!(payload.event, "greeting");
        assert_eq!(payload.data, Value::String("hola".into()));
    }

    #[test]
    fn test_room_emit_skips_sender() {
        let hub = Arc::new(WebSocketHub::new());
        let (a, mut rx_a) = WebSocketSession::new(hub.clone());
        let (b, mut rx_b) = WebSocketSession::new(hub.clone());
        let (c, mut rx_c) = WebSocketSession::new(hub.clone());
        for s in [&a, &b, &c] {
            s.connect();
        }
        a.join("lobby");
        b.join("lobby");

        a.to("lobby").emit("chat", serde_json::json!({"text": "hi"})).unwrap();
        assert!(rx_a.try_recv().is_err());
        assert_eq!(text_of(rx_b.try_recv().unwrap()).event, "chat");
        assert!(rx_c.try_recv().is_err());

        a.broadcast("news", 1).unwrap();
        assert!(rx_a.try_recv().is_err());
        assert_eq!(text_of(rx_b.try_recv().unwrap()).event, "news");
        assert_eq!(text_of(rx_c.try_recv().unwrap()).event, "news");
    }

    #[test]
    fn test_leave_and_close_clean_rooms() {
        let hub = Arc::new(WebSocketHub::new());
        let (a, _rx) = WebSocketSession::new(hub.clone());
        a.connect();
        a.join("lobby");
        assert_eq!(hub.room_size("lobby"), 1);

        a.leave("lobby");
        assert_eq!(hub.room_size("lobby"), 0);

        a.join("game");
        a.close();
        assert!(a.is_closed());
        assert_eq!(hub.client_count(), 0);
        assert_eq!(hub.room_size("game"), 0);
        assert_eq!(hub.room_size(ROOM_ALL), 0);

        a.join("game");
        a.connect();
        assert_eq!(hub.room_size("game"), 0);
        assert!(a.rooms().is_empty());
        assert!(!hub.is_connected(a.id()));
    }

    #[test]
    fn test_close_drops_handlers() {
        let hub = Arc::new(WebSocketHub::new());
        let (session, _rx) = WebSocketSession::new(hub);
        session.connect();

        let own = session.clone();
        session.on("echo", move |data| {
            let own = own.clone();
            async move {
                let _ = own.emit("echo", data);
            }
        });
        session.on(EVENT_DISCONNECT, |_| async {});

        let weak = session.downgrade();
        assert!(session.close().is_some());
        assert!(session.close().is_none());

        session.on("late", |_| async {});
        assert!(!session.trigger("late", Value::Null));
        assert!(!session.trigger("echo", Value::Null));

        drop(session);
        assert!(weak.upgrade().is_none());
    }

    #[tokio::test]
    async fn test_dispatch_runs_handler() {
        let hub = Arc::new(WebSocketHub::new());
        let (session, _rx) = WebSocketSession::new(hub);
        let (tx, mut seen) = mpsc::unbounded_channel();

        let events = tx.clone();
        session.on(EVENT_MESSAGE, move |data| {
            let events = events.clone();
            async move {
                let _ = events.send(("message", data));
            }
        });
        session.on(EVENT_ERROR, move |data| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(("error", data));
            }
        });

        assert!(session.dispatch_text(r#"{"event":"message","data":{"n":1}}"#));
        let (name, data) = seen.recv().await.unwrap();
        assert_eq!(name, "message");
        assert_eq!(data["n"], 1);

        assert!(session.dispatch_text("not json"));
        let (name, _) = seen.recv().await.unwrap();
        assert_eq!(name, "error");

        assert!(!session.dispatch_text(r#"{"event":"unknown"}"#));
    }
}
