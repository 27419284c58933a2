//! Canal de control JSON hacia el reproductor.
//!
//! mpv escucha en un socket Unix (`--input-ipc-server=<path>`) y acepta una
//! línea JSON por comando: `{"command": [...], "request_id": n}`. Las
//! respuestas llevan el mismo `request_id`; las líneas de eventos se ignoran.

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::ChannelError;

const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(50);
const CONNECT_BUDGET_FACTOR: u32 = 4;

/// Comandos de transporte soportados.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCommand {
    TogglePause,
    /// Relative seek in seconds.
    Seek(i64),
    /// Relative volume change in percent points.
    AdjustVolume(i64),
    Quit,
}

impl TransportCommand {
    pub fn to_args(self) -> Value {
        match self {
            TransportCommand::TogglePause => json!(["cycle", "pause"]),
            TransportCommand::Seek(seconds) => json!(["seek", seconds]),
            TransportCommand::AdjustVolume(delta) => json!(["add", "volume", delta]),
            TransportCommand::Quit => json!(["quit"]),
        }
    }
}

/// Resultado de un envío. Enviar nunca devuelve `Err`.
#[derive(Debug)]
pub enum Delivery {
    /// The player answered with `error: "success"`; carries `data`.
    Acknowledged(Value),
    /// Written, but no matching reply before the timeout.
    NoReply,
    Failed(ChannelError),
}

impl Delivery {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, Delivery::Acknowledged(_))
    }
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// Un canal por proceso de reproductor. Se conecta de forma perezosa y se
/// invalida cuando la sesión termina.
pub struct ControlChannel {
    path: PathBuf,
    timeout: Duration,
    conn: Mutex<Option<Connection>>,
    closed: AtomicBool,
    next_id: AtomicU64,
}

impl std::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlChannel")
            .field("path", &self.path)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl ControlChannel {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
            conn: Mutex::new(None),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Sends `command` and waits up to the channel timeout for its reply.
    pub async fn send(&self, command: TransportCommand) -> Delivery {
        let delivery = self.try_send(command).await;
        match &delivery {
            Delivery::Acknowledged(_) => debug!("🎛️ {:?} acknowledged", command),
            Delivery::NoReply => debug!("🎛️ {:?} sent, no reply", command),
            Delivery::Failed(e) => warn!("⚠️ Could not deliver {:?}: {}", command, e),
        }
        delivery
    }

    /// Marks the channel dead and drops the socket. Later sends fail fast.
    pub async fn invalidate(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.conn.lock().await.take();
    }

    async fn try_send(&self, command: TransportCommand) -> Delivery {
        if self.is_closed() {
            return Delivery::Failed(ChannelError::Closed);
        }

        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            match self.connect().await {
                Ok(conn) => *guard = Some(conn),
                Err(e) => return Delivery::Failed(e),
            }
        }
        let Some(conn) = guard.as_mut() else {
            return Delivery::Failed(ChannelError::Closed);
        };

        let request_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut line = json!({ "command": command.to_args(), "request_id": request_id }).to_string();
        line.push('\n');

        let write = async {
            conn.writer.write_all(line.as_bytes()).await?;
            conn.writer.flush().await
        };
        match tokio::time::timeout(self.timeout, write).await {
            Err(_) => {
                guard.take();
                return Delivery::Failed(ChannelError::Timeout(self.timeout));
            }
            Ok(Err(e)) => {
                guard.take();
                return Delivery::Failed(ChannelError::Io(e));
            }
            Ok(Ok(())) => {}
        }

        match tokio::time::timeout(self.timeout, read_reply(&mut conn.reader, request_id)).await {
            Err(_) => Delivery::NoReply,
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                guard.take();
                Delivery::Failed(e)
            }
        }
    }

    /// The player creates its socket shortly after launch, so connecting is
    /// retried for a few multiples of the timeout.
    async fn connect(&self) -> Result<Connection, ChannelError> {
        let deadline = Instant::now() + self.timeout * CONNECT_BUDGET_FACTOR;
        loop {
            match UnixStream::connect(&self.path).await {
                Ok(stream) => {
                    debug!("connected to control socket {}", self.path.display());
                    let (read, writer) = stream.into_split();
                    return Ok(Connection {
                        reader: BufReader::new(read),
                        writer,
                    });
                }
                Err(e) if Instant::now() + CONNECT_RETRY_DELAY >= deadline => {
                    return Err(ChannelError::NotConnected(format!(
                        "{}: {}",
                        self.path.display(),
                        e
                    )));
                }
                Err(_) => tokio::time::sleep(CONNECT_RETRY_DELAY).await,
            }
        }
    }
}

async fn read_reply(
    reader: &mut BufReader<OwnedReadHalf>,
    request_id: u64,
) -> Result<Delivery, ChannelError> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(ChannelError::Closed);
        }

        let Ok(message) = serde_json::from_str::<Value>(line.trim()) else {
            return Err(ChannelError::Protocol(format!("invalid JSON: {}", line.trim())));
        };

        if message.get("request_id").and_then(Value::as_u64) != Some(request_id) {
            // events and stale replies
            continue;
        }

        return Ok(match message.get("error").and_then(Value::as_str) {
            Some("success") => {
                Delivery::Acknowledged(message.get("data").cloned().unwrap_or(Value::Null))
            }
            Some(other) => Delivery::Failed(ChannelError::Protocol(other.to_string())),
            None => Delivery::Failed(ChannelError::Protocol("reply without status".to_string())),
        });
    }
}
