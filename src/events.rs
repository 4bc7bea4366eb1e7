use std::{
    io::Write,
    net::SocketAddr,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use serde::{Serialize, Serializer};
use tokio::net::UdpSocket;

/// Sensu check status, serialized as its numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    Ok,
    Warning,
    Critical,
    Unknown,
}

impl Status {
    pub fn code(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::Warning => 1,
            Self::Critical => 2,
            Self::Unknown => 3,
        }
    }
}

impl AsRef<str> for Status {
    fn as_ref(&self) -> &str {
        match self {
            Self::Ok => "OK",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl Serialize for Status {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.code())
    }
}

/// Event accepted by the Sensu client socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckEvent {
    pub name: String,
    pub source: String,
    pub status: Status,
    pub output: String,
    pub handlers: Vec<String>,
}

impl CheckEvent {
    pub fn new(
        name: impl Into<String>,
        source: impl Into<String>,
        status: Status,
        msg: &str,
        handlers: &[String],
    ) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            status,
            output: format!("{}: {}", status.as_ref(), msg),
            handlers: handlers.to_vec(),
        }
    }

    /// One newline terminated JSON document.
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        let mut payload = serde_json::to_string(self)?;
        payload.push('\n');
        Ok(payload)
    }
}

/// Where check events end up. Delivery is best effort: a sink logs its
/// failures and never interrupts the check.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: &CheckEvent);
}

/// Sends every event as one datagram to the Sensu client socket.
pub struct UdpSink {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpSink {
    pub async fn bind(target: SocketAddr) -> std::io::Result<Self> {
        let local: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        Ok(Self { socket, target })
    }
}

#[async_trait]
impl EventSink for UdpSink {
    async fn emit(&self, event: &CheckEvent) {
        let payload = match event.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                log::error!("Unable to serialize event {}: {e}", event.name);
                return;
            }
        };
        if let Err(e) = self.socket.send_to(payload.as_bytes(), self.target).await {
            log::error!(
                "Failed to send event {} to {}: {e}",
                event.name,
                self.target
            );
        }
    }
}

/// Dry-run sink: writes every event as one JSON line instead of sending it.
pub struct PrintSink<W> {
    out: Mutex<W>,
}

impl PrintSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> PrintSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl<W: Write + Send + 'static> EventSink for PrintSink<W> {
    async fn emit(&self, event: &CheckEvent) {
        let payload = match event.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                log::error!("Unable to serialize event {}: {e}", event.name);
                return;
            }
        };
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = out.write_all(payload.as_bytes()).and_then(|_| out.flush()) {
            log::error!("Unable to print event {}: {e}", event.name);
        }
    }
}
