use super::protocol::Command;
use crate::error::Result;
use crate::firewall::Firewall;
use futures_util::{SinkExt, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info};

/// Longest request line accepted from a client
const MAX_LINE_LENGTH: usize = 16 * 1024;

type Lines = Framed<UnixStream, LinesCodec>;

/// Ingress server configuration
#[derive(Clone)]
pub struct IngressServerConfig {
    /// Unix domain socket path to listen on
    pub socket_path: PathBuf,
    /// Engine shared by every connection
    pub firewall: Arc<Firewall>,
}

/// Line-protocol server feeding requests to the engine
pub struct IngressServer {
    config: IngressServerConfig,
}

impl IngressServer {
    /// Create a new server with the given configuration
    pub fn new(config: IngressServerConfig) -> Self {
        Self { config }
    }

    /// Start listening on the Unix domain socket
    pub async fn start(&self) -> Result<()> {
        // Remove a stale socket left by a previous run
        let _ = std::fs::remove_file(&self.config.socket_path);

        let listener = UnixListener::bind(&self.config.socket_path)?;
        info!("Ingress listening on {:?}", self.config.socket_path);

        loop {
            let (socket, _) = listener.accept().await?;
            let firewall = self.config.firewall.clone();

            // Spawn a task for each connection
            tokio::spawn(async move {
                if let Err(e) = handle_client(socket, firewall).await {
                    debug!("Client connection ended with error: {}", e);
                }
            });
        }
    }
}

/// Serve one client until it disconnects or sends QUIT
async fn handle_client(stream: UnixStream, firewall: Arc<Firewall>) -> Result<()> {
    debug!("Client connected via Unix domain socket");
    let mut lines = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    while let Some(line) = lines.next().await {
        let line = line?;
        match Command::parse(&line) {
            Ok(Command::Classify(request)) => {
                let entry = firewall.classify(&request);
                lines.send(format!("OK {}", serde_json::to_string(&entry)?)).await?;
            }
            Ok(Command::Stats) => {
                let summary = firewall.summary(None);
                lines.send(format!("OK {}", serde_json::to_string(&summary)?)).await?;
            }
            Ok(Command::Tail) => return tail(lines, &firewall).await,
            Ok(Command::Quit) => break,
            Ok(Command::Pause) | Ok(Command::Resume) => {
                lines.send("ERROR not tailing".to_string()).await?;
            }
            Err(e) => {
                debug!("Rejected request line {:?}: {}", line, e);
                lines.send(format!("ERROR {}", e)).await?;
            }
        }
    }

    debug!("Client disconnected");
    Ok(())
}

/// Stream every new decision to the client. The client may pause and resume
/// its own feed; the subscription ends when the client quits or disconnects.
/// Entries dropped for a client that fell behind are announced as
/// `LAGGED <count>` before the next entry.
async fn tail(mut lines: Lines, firewall: &Firewall) -> Result<()> {
    let mut subscription = firewall.subscribe();
    debug!("Client {} tailing telemetry", subscription.id());

    loop {
        tokio::select! {
            entry = subscription.recv() => {
                let Some(entry) = entry else { break };
                let lagged = subscription.take_lagged();
                if lagged > 0 {
                    lines.send(format!("LAGGED {}", lagged)).await?;
                }
                lines.send(serde_json::to_string(&entry)?).await?;
            }
            line = lines.next() => {
                let Some(line) = line else { break };
                match Command::parse(&line?) {
                    Ok(Command::Pause) => firewall.pause(&subscription),
                    Ok(Command::Resume) => firewall.resume(&subscription),
                    Ok(Command::Quit) => break,
                    Ok(_) => lines.send("ERROR only PAUSE, RESUME or QUIT while tailing".to_string()).await?,
                    Err(e) => lines.send(format!("ERROR {}", e)).await?,
                }
            }
        }
    }

    subscription.unsubscribe();
    Ok(())
}
