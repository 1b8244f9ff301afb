//! The spawn daemon — accepts connections and runs commands on request.
//!
//! Each accepted connection is served on its own task. The first read
//! carries the request; in duplex mode whatever the peer sends afterwards
//! is fed to the child's stdin and the child's output is sent back until
//! its pipes close.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::process::Stdio;
use std::sync::Arc;

use sweep_core::{DaemonMode, GridConfig};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{DaemonError, DaemonResult};
use crate::protocol::{Reply, Request};
use crate::registry::{ChildRegistry, kill_group};

const PIPE_CHUNK: usize = 4096;

#[derive(Debug, Clone)]
pub struct DaemonSettings {
    pub bind: IpAddr,
    pub port: u16,
    pub mode: DaemonMode,
    /// Peers allowed to connect; empty accepts everyone.
    pub allow: Vec<String>,
    pub max_message: usize,
    pub index_var: String,
}

impl DaemonSettings {
    pub fn from_config(config: &GridConfig) -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: config.daemon.port,
            mode: config.daemon.mode,
            allow: config.daemon.allow.clone(),
            max_message: config.daemon.max_message,
            index_var: config.cluster.index_var.clone(),
        }
    }
}

pub struct SpawnDaemon {
    listener: TcpListener,
    settings: Arc<DaemonSettings>,
    allowed: Option<Arc<HashSet<IpAddr>>>,
    registry: ChildRegistry,
}

impl SpawnDaemon {
    /// Resolve the allow-list and bind the listening socket.
    pub async fn bind(settings: DaemonSettings) -> DaemonResult<Self> {
        let allowed = resolve_allow_list(&settings.allow).await?;
        let addr = SocketAddr::new(settings.bind, settings.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| DaemonError::Bind { addr, source })?;
        info!(
            addr = %listener.local_addr()?,
            mode = ?settings.mode,
            allowed = settings.allow.len(),
            "spawn daemon listening"
        );
        Ok(Self {
            listener,
            settings: Arc::new(settings),
            allowed: allowed.map(Arc::new),
            registry: ChildRegistry::new(),
        })
    }

    pub fn local_addr(&self) -> DaemonResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle on the tracked children.
    pub fn registry(&self) -> ChildRegistry {
        self.registry.clone()
    }

    /// Accept connections until `shutdown` turns true, then kill every
    /// tracked child.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> DaemonResult<()> {
        while !*shutdown.borrow() {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    if !self.is_allowed(&peer) {
                        warn!(%peer, "dropping connection from peer not on the allow-list");
                        continue;
                    }
                    let settings = self.settings.clone();
                    let registry = self.registry.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, settings, registry).await {
                            debug!(%peer, error = %e, "connection ended with error");
                        }
                    });
                }
                Ok(()) = shutdown.changed() => {}
            }
        }

        let killed = self.registry.kill_all().await;
        info!(killed, "spawn daemon stopped");
        Ok(())
    }

    fn is_allowed(&self, peer: &SocketAddr) -> bool {
        match &self.allowed {
            Some(allowed) => allowed.contains(&peer.ip()),
            None => true,
        }
    }
}

/// Resolve every allowed host once. `None` when the list is empty.
async fn resolve_allow_list(hosts: &[String]) -> DaemonResult<Option<HashSet<IpAddr>>> {
    if hosts.is_empty() {
        return Ok(None);
    }
    let mut allowed = HashSet::new();
    for host in hosts {
        let addrs: Vec<IpAddr> = tokio::net::lookup_host((host.as_str(), 0))
            .await
            .map_err(|source| DaemonError::Resolve {
                host: host.clone(),
                source,
            })?
            .map(|addr| addr.ip())
            .collect();
        if addrs.is_empty() {
            return Err(DaemonError::NoAddresses(host.clone()));
        }
        debug!(%host, ?addrs, "allowed host resolved");
        allowed.extend(addrs);
    }
    Ok(Some(allowed))
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    settings: Arc<DaemonSettings>,
    registry: ChildRegistry,
) -> DaemonResult<()> {
    // One byte of headroom tells a request of exactly `max_message` bytes
    // from a longer one.
    let mut buf = vec![0u8; settings.max_message + 1];
    let n = stream.read(&mut buf).await?;
    if n > settings.max_message {
        warn!(%peer, limit = settings.max_message, "request too long");
        stream.write_all(Reply::Nack.as_bytes()).await?;
        return Ok(());
    }

    match Request::parse(&buf[..n]) {
        Some(Request::KillAll) => {
            let killed = registry.kill_all().await;
            info!(%peer, killed, "kill-all requested");
            stream.write_all(Reply::Ack.as_bytes()).await?;
        }
        Some(Request::Spawn { id, command }) => {
            let piped = settings.mode == DaemonMode::Duplex;
            let child = match spawn_child(&settings, &registry, id, &command, piped).await {
                Ok(child) => child,
                Err(e) => {
                    error!(%peer, id, %command, error = %e, "failed to spawn");
                    stream.write_all(Reply::Nack.as_bytes()).await?;
                    return Ok(());
                }
            };
            info!(%peer, id, pid = ?child.id(), %command, "child spawned");
            match settings.mode {
                DaemonMode::Ack => serve_ack(stream, child, &registry).await?,
                DaemonMode::Duplex => serve_duplex(stream, child, &registry).await?,
            }
        }
        None => {
            warn!(%peer, bytes = n, "malformed request");
            stream.write_all(Reply::Nack.as_bytes()).await?;
        }
    }
    Ok(())
}

async fn spawn_child(
    settings: &DaemonSettings,
    registry: &ChildRegistry,
    id: u32,
    command: &str,
    piped: bool,
) -> std::io::Result<Child> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .env(&settings.index_var, id.to_string())
        .process_group(0);
    if piped {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    registry.spawn(&mut cmd).await
}

/// Reply `ack` once the child exits.
async fn serve_ack(
    mut stream: TcpStream,
    mut child: Child,
    registry: &ChildRegistry,
) -> DaemonResult<()> {
    let pid = child.id();
    let status = child.wait().await;
    if let Some(pid) = pid {
        registry.remove(pid).await;
    }
    debug!(?pid, status = ?status.as_ref().ok(), "child exited");
    stream.write_all(Reply::Ack.as_bytes()).await?;
    Ok(())
}

/// Bridge the connection and the child's standard streams.
async fn serve_duplex(
    stream: TcpStream,
    mut child: Child,
    registry: &ChildRegistry,
) -> DaemonResult<()> {
    let pid = child.id();
    let (mut reader, mut writer) = stream.into_split();
    let stdin = child.stdin.take();
    let feeder = tokio::spawn(async move {
        if let Some(mut stdin) = stdin {
            let _ = tokio::io::copy(&mut reader, &mut stdin).await;
        }
    });

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut out_buf = vec![0u8; PIPE_CHUNK];
    let mut err_buf = vec![0u8; PIPE_CHUNK];
    loop {
        let (read, from_stdout) = tokio::select! {
            r = read_pipe(stdout.as_mut(), &mut out_buf), if stdout.is_some() => (r, true),
            r = read_pipe(stderr.as_mut(), &mut err_buf), if stderr.is_some() => (r, false),
            else => break,
        };
        let n = match read {
            Ok(0) | Err(_) => {
                if from_stdout {
                    stdout = None;
                } else {
                    stderr = None;
                }
                continue;
            }
            Ok(n) => n,
        };
        let chunk = if from_stdout { &out_buf[..n] } else { &err_buf[..n] };
        if let Err(e) = writer.write_all(chunk).await {
            debug!(?pid, error = %e, "peer went away, killing child");
            if let Some(pid) = pid {
                kill_group(pid);
            }
            break;
        }
    }
    drop(stdout);
    drop(stderr);

    let status = child.wait().await;
    if let Some(pid) = pid {
        registry.remove(pid).await;
    }
    feeder.abort();
    debug!(?pid, status = ?status.as_ref().ok(), "child exited");
    let _ = writer.shutdown().await;
    Ok(())
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<&mut R>, buf: &mut [u8]) -> std::io::Result<usize> {
    match pipe {
        Some(pipe) => pipe.read(buf).await,
        None => Ok(0),
    }
}
