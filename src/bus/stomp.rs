//! STOMP 1.2 over WebSocket.
//!
//! One background task owns the socket. Publishes and subscriptions are
//! handed to it through a channel that only exists while the connection is up,
//! so a publish during an outage fails instead of being queued.

use crate::bus::{BusEvent, MessageBus};
use crate::config::BusConfig;
use crate::errors::{SignalError, SignalResult};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A single STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl StompFrame {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value for `key`; repeated headers keep the earliest one.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn connect(host: &str, token: &str) -> Self {
        Self::new("CONNECT")
            .header("accept-version", "1.2")
            .header("host", host)
            .header("heart-beat", "0,0")
            .header("Authorization", format!("Bearer {}", token))
    }

    pub fn subscribe(id: u64, destination: &str) -> Self {
        Self::new("SUBSCRIBE")
            .header("id", format!("sub-{}", id))
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn send(destination: &str, body: impl Into<String>) -> Self {
        Self::new("SEND")
            .header("destination", destination)
            .header("content-type", "application/json")
            .body(body)
    }

    pub fn encode(&self) -> String {
        let escape = self.command != "CONNECT" && self.command != "CONNECTED";
        let mut out = String::with_capacity(self.body.len() + 64);
        out.push_str(&self.command);
        out.push('\n');
        for (k, v) in &self.headers {
            if escape {
                out.push_str(&escape_header(k));
                out.push(':');
                out.push_str(&escape_header(v));
            } else {
                out.push_str(k);
                out.push(':');
                out.push_str(v);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parses one frame. Heart-beat EOLs parse to `None`.
    pub fn parse(raw: &str) -> SignalResult<Option<Self>> {
        let raw = raw.trim_start_matches(['\r', '\n']);
        if raw.is_empty() {
            return Ok(None);
        }

        let (head, rest) = match raw.find("\n\n") {
            Some(i) => (&raw[..i], &raw[i + 2..]),
            None => match raw.find("\r\n\r\n") {
                Some(i) => (&raw[..i], &raw[i + 4..]),
                None => return Err(SignalError::Codec("STOMP frame without header end".to_string())),
            },
        };

        let mut lines = head.lines();
        let command = lines
            .next()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.is_empty())
            .ok_or_else(|| SignalError::Codec("STOMP frame without command".to_string()))?
            .to_string();
        let unescape = command != "CONNECT" && command != "CONNECTED";

        let mut headers = Vec::new();
        for line in lines {
            let line = line.trim_end_matches('\r');
            let (k, v) = line
                .split_once(':')
                .ok_or_else(|| SignalError::Codec(format!("malformed STOMP header '{}'", line)))?;
            if unescape {
                headers.push((unescape_header(k), unescape_header(v)));
            } else {
                headers.push((k.to_string(), v.to_string()));
            }
        }

        let body = match rest.find('\0') {
            Some(end) => &rest[..end],
            None => rest,
        };

        Ok(Some(Self {
            command,
            headers,
            body: body.to_string(),
        }))
    }
}

fn escape_header(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_header(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct StompSettings {
    pub url: String,
    pub host: String,
    pub token: String,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

impl StompSettings {
    pub fn from_config(bus: &BusConfig, token: &str) -> Self {
        Self {
            url: bus.url.clone(),
            host: bus.host.clone(),
            token: token.to_string(),
            reconnect_attempts: bus.reconnect_attempts,
            reconnect_delay: Duration::from_millis(bus.reconnect_delay_ms),
        }
    }
}

/// Message bus client speaking STOMP to a broker.
pub struct StompBus {
    outbound: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
    next_subscription: AtomicU64,
}

impl StompBus {
    /// Connects and authenticates, then keeps the connection alive in the
    /// background. Inbound messages and connectivity changes arrive on the
    /// returned receiver.
    pub async fn connect(
        settings: StompSettings,
    ) -> SignalResult<(Arc<Self>, mpsc::UnboundedReceiver<BusEvent>)> {
        let ws = open(&settings).await?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let outbound = Arc::new(Mutex::new(None));

        let bus = Arc::new(Self {
            outbound: Arc::clone(&outbound),
            next_subscription: AtomicU64::new(0),
        });
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        set_outbound(&outbound, Some(frames_tx));
        tokio::spawn(supervise(settings, ws, frames_rx, outbound, events_tx));

        Ok((bus, events_rx))
    }

    fn send_frame(&self, frame: StompFrame) -> SignalResult<()> {
        let guard = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
        let tx = guard
            .as_ref()
            .ok_or_else(|| SignalError::Transport("not connected".to_string()))?;
        tx.send(frame.encode())
            .map_err(|_| SignalError::Transport("connection closed".to_string()))
    }
}

#[async_trait]
impl MessageBus for StompBus {
    async fn subscribe(&self, destination: &str) -> SignalResult<()> {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        log::debug!("SUBSCRIBE {} (sub-{})", destination, id);
        self.send_frame(StompFrame::subscribe(id, destination))
    }

    async fn publish(&self, destination: &str, body: String) -> SignalResult<()> {
        log::debug!("SEND {} ({} bytes)", destination, body.len());
        self.send_frame(StompFrame::send(destination, body))
    }
}

fn set_outbound(
    slot: &Mutex<Option<mpsc::UnboundedSender<String>>>,
    tx: Option<mpsc::UnboundedSender<String>>,
) {
    *slot.lock().unwrap_or_else(|e| e.into_inner()) = tx;
}

/// Opens the socket and completes the CONNECT/CONNECTED handshake.
async fn open(settings: &StompSettings) -> SignalResult<WsStream> {
    let (mut ws, _) = connect_async(settings.url.as_str())
        .await
        .map_err(|e| SignalError::Transport(format!("websocket connect failed: {}", e)))?;

    ws.send(Message::Text(
        StompFrame::connect(&settings.host, &settings.token).encode(),
    ))
    .await
    .map_err(|e| SignalError::Transport(format!("CONNECT failed: {}", e)))?;

    while let Some(msg) = ws.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => return Err(SignalError::Transport(format!("handshake failed: {}", e))),
        };
        let Some(frame) = StompFrame::parse(&text)? else {
            continue;
        };
        match frame.command.as_str() {
            "CONNECTED" => {
                log::info!(
                    "STOMP session established with {} (version {})",
                    settings.url,
                    frame.get("version").unwrap_or("?")
                );
                return Ok(ws);
            }
            "ERROR" => {
                return Err(SignalError::Transport(format!(
                    "broker refused connection: {}",
                    frame.get("message").unwrap_or(&frame.body)
                )))
            }
            other => log::debug!("ignoring {} before CONNECTED", other),
        }
    }
    Err(SignalError::Transport("socket closed during handshake".to_string()))
}

/// Moves frames between the socket and the bus until the socket goes away.
/// Returns why it went away.
async fn pump(
    ws: WsStream,
    mut frames: mpsc::UnboundedReceiver<String>,
    events: &mpsc::UnboundedSender<BusEvent>,
) -> String {
    let (mut write, mut read) = ws.split();
    loop {
        tokio::select! {
            outgoing = frames.recv() => {
                let Some(text) = outgoing else {
                    let _ = write.close().await;
                    return "client closed".to_string();
                };
                if let Err(e) = write.send(Message::Text(text)).await {
                    return format!("send failed: {}", e);
                }
            }
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => match StompFrame::parse(&text) {
                    Ok(Some(frame)) => {
                        if let Some(reason) = dispatch(frame, events) {
                            return reason;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => log::error!("unparseable STOMP frame: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => return "socket closed".to_string(),
                Some(Ok(_)) => {}
                Some(Err(e)) => return format!("socket error: {}", e),
            }
        }
    }
}

fn dispatch(frame: StompFrame, events: &mpsc::UnboundedSender<BusEvent>) -> Option<String> {
    match frame.command.as_str() {
        "MESSAGE" => {
            let Some(destination) = frame.get("destination").map(str::to_string) else {
                log::warn!("MESSAGE frame without destination");
                return None;
            };
            let _ = events.send(BusEvent::Message {
                destination,
                body: frame.body,
            });
            None
        }
        "ERROR" => Some(format!(
            "broker error: {}",
            frame.get("message").unwrap_or(&frame.body)
        )),
        "RECEIPT" => None,
        other => {
            log::debug!("ignoring {} frame", other);
            None
        }
    }
}

async fn supervise(
    settings: StompSettings,
    mut ws: WsStream,
    mut frames: mpsc::UnboundedReceiver<String>,
    outbound: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
    events: mpsc::UnboundedSender<BusEvent>,
) {
    loop {
        let reason = pump(ws, frames, &events).await;
        set_outbound(&outbound, None);
        log::warn!("STOMP connection lost: {}", reason);
        if events.send(BusEvent::Disconnected { reason }).is_err() {
            return;
        }

        let mut restored = None;
        for attempt in 1..=settings.reconnect_attempts {
            tokio::time::sleep(settings.reconnect_delay).await;
            if events.is_closed() {
                return;
            }
            match open(&settings).await {
                Ok(socket) => {
                    restored = Some(socket);
                    break;
                }
                Err(e) => log::warn!(
                    "reconnect attempt {}/{} failed: {}",
                    attempt,
                    settings.reconnect_attempts,
                    e
                ),
            }
        }

        let Some(socket) = restored else {
            log::error!("giving up on {} after {} attempts", settings.url, settings.reconnect_attempts);
            return;
        };
        ws = socket;
        let (tx, rx) = mpsc::unbounded_channel();
        frames = rx;
        set_outbound(&outbound, Some(tx));
        if events.send(BusEvent::Reconnected).is_err() {
            return;
        }
    }
}
