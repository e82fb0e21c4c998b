//! Local socket server for IPC
//!
//! Unix domain socket on Unix, named pipe on Windows. Provides
//! request-response communication and push notifications of state events
//! to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::events::StateEvent;
use crate::state::{ControlError, ControllerHandle};

use super::protocol::{DaemonStatus, Request, Response, MAX_MESSAGE_LEN};

const OUTBOX: usize = 64;

/// What every connection needs to answer requests
struct Session {
    controller: ControllerHandle,
    started: Instant,
}

/// IPC Server handling client connections
pub struct Server {
    endpoint: PathBuf,
    listener: Listener,
    session: Arc<Session>,
    shutdown_tx: broadcast::Sender<()>,
}

#[cfg(unix)]
type Listener = tokio::net::UnixListener;

#[cfg(windows)]
type Listener = std::sync::Mutex<Option<tokio::net::windows::named_pipe::NamedPipeServer>>;

impl Server {
    /// Bind the IPC endpoint
    #[cfg(unix)]
    pub fn bind(endpoint: &Path, controller: ControllerHandle) -> Result<Self> {
        use std::os::unix::fs::PermissionsExt;

        if let Some(parent) = endpoint.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // stale socket from a previous run
        if endpoint.exists() {
            std::fs::remove_file(endpoint).context("failed to remove stale socket")?;
        }

        let listener = tokio::net::UnixListener::bind(endpoint).context("failed to bind Unix socket")?;
        std::fs::set_permissions(endpoint, std::fs::Permissions::from_mode(0o600))
            .context("failed to restrict socket permissions")?;

        info!(?endpoint, "IPC server listening");
        Ok(Self::with_listener(endpoint, listener, controller))
    }

    /// Bind the IPC endpoint
    #[cfg(windows)]
    pub fn bind(endpoint: &Path, controller: ControllerHandle) -> Result<Self> {
        use tokio::net::windows::named_pipe::ServerOptions;

        let first = ServerOptions::new()
            .first_pipe_instance(true)
            .create(endpoint)
            .context("failed to create named pipe (is another daemon running?)")?;

        info!(?endpoint, "IPC server listening");
        Ok(Self::with_listener(
            endpoint,
            std::sync::Mutex::new(Some(first)),
            controller,
        ))
    }

    fn with_listener(endpoint: &Path, listener: Listener, controller: ControllerHandle) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            endpoint: endpoint.to_owned(),
            listener,
            session: Arc::new(Session {
                controller,
                started: Instant::now(),
            }),
            shutdown_tx,
        }
    }

    /// Run the server, accepting connections
    #[cfg(unix)]
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    self.spawn_client(stream);
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Run the server, accepting connections
    #[cfg(windows)]
    pub async fn run(&self) -> Result<()> {
        use tokio::net::windows::named_pipe::ServerOptions;

        let mut pipe = self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .context("server already running")?;

        loop {
            pipe.connect().await.context("named pipe connect failed")?;
            debug!("client connected");
            // next instance must exist before this one is handed off
            let next = ServerOptions::new()
                .create(&self.endpoint)
                .context("failed to create named pipe instance")?;
            let connected = std::mem::replace(&mut pipe, next);
            self.spawn_client(connected);
        }
    }

    fn spawn_client<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let session = Arc::clone(&self.session);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            tokio::select! {
                result = handle_client(stream, session) => {
                    if let Err(e) = result {
                        warn!(?e, "client handler error");
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("client handler shutting down");
                }
            }
        });
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        #[cfg(unix)]
        if self.endpoint.exists() {
            if let Err(e) = std::fs::remove_file(&self.endpoint) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Serve one connection until the client hangs up.
///
/// Responses and notifications share one outbox drained by a writer task,
/// so a push never interleaves with a half-written response.
async fn handle_client<S>(stream: S, session: Arc<Session>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (out_tx, mut out_rx) = mpsc::channel::<Response>(OUTBOX);

    let writer_task = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            send_message(&mut writer, &message).await?;
        }
        Ok::<_, anyhow::Error>(())
    });

    let mut forwarder = None;
    let result = async {
        while let Some(body) = read_frame(&mut reader).await? {
            let request: Request = match serde_json::from_slice(&body) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "malformed request");
                    if out_tx.send(Response::error("invalid_request", e)).await.is_err() {
                        break;
                    }
                    continue;
                }
            };
            debug!(?request, "received request");

            if let Request::Subscribe = request {
                let events = session.controller.subscribe();
                if out_tx.send(Response::Subscribed).await.is_err() {
                    break;
                }
                if forwarder.is_none() {
                    debug!("client subscribed to notifications");
                    forwarder = Some(tokio::spawn(forward_events(events, out_tx.clone())));
                }
                continue;
            }

            let response = process_request(request, &session).await;
            if out_tx.send(response).await.is_err() {
                break;
            }
        }
        Ok::<_, anyhow::Error>(())
    }
    .await;

    if let Some(forwarder) = forwarder {
        forwarder.abort();
    }
    drop(out_tx);
    match writer_task.await {
        Ok(Err(e)) => debug!(?e, "writer stopped"),
        Err(e) => debug!(?e, "writer task failed"),
        Ok(Ok(())) => {}
    }

    debug!("client disconnected");
    result
}

async fn forward_events(mut events: broadcast::Receiver<StateEvent>, out: mpsc::Sender<Response>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if out.send(Response::Notification { event }).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Read one length-prefixed frame. `None` on a clean disconnect.
async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LEN {
        anyhow::bail!("message too large ({len} bytes)");
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Send a length-prefixed JSON message
async fn send_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;
    writer.flush().await?;

    Ok(())
}

fn failure(e: ControlError) -> Response {
    debug!(code = e.code(), error = %e, "request failed");
    Response::error(e.code(), e)
}

fn done(result: Result<(), ControlError>) -> Response {
    match result {
        Ok(()) => Response::Ok,
        Err(e) => failure(e),
    }
}

/// Process a request and return a response
async fn process_request(request: Request, session: &Session) -> Response {
    let controller = &session.controller;

    match request {
        Request::Ping => Response::Pong,

        Request::GetStatus => Response::Status(DaemonStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: session.started.elapsed().as_secs(),
            muted: controller.mute_state(),
            active_profile_id: controller.active_profile().map(|profile| profile.id),
            registered_hotkeys: controller.registered_hotkeys(),
        }),

        Request::GetMuteState => Response::MuteState {
            muted: controller.mute_state(),
        },

        Request::ToggleMute => match controller.toggle_mute().await {
            Ok(muted) => Response::MuteState { muted },
            Err(e) => failure(e),
        },

        Request::SetMute { muted, silent } => done(controller.set_mute(muted, silent).await),

        Request::SetActiveProfile { profile } => done(controller.set_active_profile(profile).await),

        Request::ActivateProfile { id } => match controller.activate_profile(id).await {
            Ok(profile) => Response::ActiveProfile {
                profile: Some(profile),
            },
            Err(e) => failure(e),
        },

        Request::DeactivateProfile => done(controller.deactivate_profile().await),

        Request::GetActiveProfile => Response::ActiveProfile {
            profile: controller.active_profile(),
        },

        Request::GetAudioDevices => match controller.audio_devices().await {
            Ok(devices) => Response::AudioDevices { devices },
            Err(e) => failure(e),
        },

        Request::ListProfiles => match controller.list_profiles().await {
            Ok(profiles) => Response::Profiles { profiles },
            Err(e) => failure(e),
        },

        Request::SaveProfile { profile } => done(controller.save_profile(profile).await),

        Request::DeleteProfile { id } => done(controller.delete_profile(id).await),

        Request::GetSettings => Response::Settings {
            settings: controller.settings(),
        },

        Request::UpdateSettings { settings } => done(controller.update_settings(settings).await),

        // answered in handle_client, which owns the outbox
        Request::Subscribe => Response::Subscribed,
    }
}
