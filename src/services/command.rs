use crate::{event::Event, services::forward};
use anyhow::{Context, anyhow};
use log::{debug, info, warn};
use std::{
    env, fmt, fs, io,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{UnixListener, UnixStream},
    sync::mpsc::Sender,
    time::timeout,
};
use tokio_util::sync::CancellationToken;

const SOCKET_NAME: &str = "hyprdock.sock";
const READ_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_MESSAGE: u64 = 64;

/// Messages accepted on the command socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Suspend,
    Wake,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Suspend => "suspend",
            Command::Wake => "wake",
        }
    }

    fn into_event(self) -> Event {
        match self {
            Command::Suspend => Event::Suspend,
            Command::Wake => Event::Wake,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "suspend" => Ok(Command::Suspend),
            "wake" => Ok(Command::Wake),
            other => Err(anyhow!("unknown command {other:?}")),
        }
    }
}

pub fn socket_path() -> PathBuf {
    env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(env::temp_dir)
        .join(SOCKET_NAME)
}

fn remove_stale(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Removes the socket file once the listener is gone, whether it returned or
/// its future was dropped.
struct BoundSocket(PathBuf);

impl Drop for BoundSocket {
    fn drop(&mut self) {
        if let Err(e) = remove_stale(&self.0) {
            warn!("failed to remove {}: {e}", self.0.display());
        }
    }
}

async fn read_command(mut stream: UnixStream) -> anyhow::Result<Command> {
    let mut message = String::new();
    timeout(
        READ_TIMEOUT,
        (&mut stream).take(MAX_MESSAGE).read_to_string(&mut message),
    )
    .await
    .context("client did not finish sending")?
    .context("reading command")?;

    message.parse()
}

/// Accepts suspend/wake requests until cancelled. The socket file is removed
/// on the way out.
pub async fn run_listener(
    path: PathBuf,
    tx: Sender<Event>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    remove_stale(&path).with_context(|| format!("removing stale {}", path.display()))?;
    let listener =
        UnixListener::bind(&path).with_context(|| format!("binding {}", path.display()))?;
    let _socket = BoundSocket(path.clone());
    info!("accepting commands on {}", path.display());

    accept_loop(&listener, &tx, &token).await
}

async fn accept_loop(
    listener: &UnixListener,
    tx: &Sender<Event>,
    token: &CancellationToken,
) -> anyhow::Result<()> {
    loop {
        let accepted = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted,
        };
        let (stream, _) = accepted.context("accepting command connection")?;

        let command = match read_command(stream).await {
            Ok(command) => command,
            Err(e) => {
                warn!("ignoring command: {e:#}");
                continue;
            }
        };

        debug!("received {command} command");
        if !forward(tx, token, command.into_event()).await {
            return Ok(());
        }
    }
}

/// Sends one command to a running daemon.
pub async fn send(path: &Path, command: Command) -> anyhow::Result<()> {
    let mut stream = UnixStream::connect(path)
        .await
        .with_context(|| format!("daemon not running (no socket at {})", path.display()))?;

    stream
        .write_all(command.as_str().as_bytes())
        .await
        .context("sending command")?;
    stream.shutdown().await.context("closing command socket")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn parses_trimmed_commands() {
        assert_eq!("suspend\n".parse::<Command>().unwrap(), Command::Suspend);
        assert_eq!(" wake ".parse::<Command>().unwrap(), Command::Wake);
        assert!("reboot".parse::<Command>().is_err());
    }

    #[tokio::test]
    async fn commands_reach_the_queue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SOCKET_NAME);
        // A leftover socket file from a previous run must not block binding.
        fs::write(&path, "").unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let token = CancellationToken::new();
        let server = tokio::spawn(run_listener(path.clone(), tx, token.clone()));

        // Wait for the listener to bind.
        let mut tries = 0;
        while send(&path, Command::Suspend).await.is_err() {
            tries += 1;
            assert!(tries < 100, "listener never came up");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(matches!(rx.recv().await, Some(Event::Suspend)));

        let mut stream = UnixStream::connect(&path).await.unwrap();
        stream.write_all(b"hibernate").await.unwrap();
        stream.shutdown().await.unwrap();
        drop(stream);

        send(&path, Command::Wake).await.unwrap();
        assert!(matches!(rx.recv().await, Some(Event::Wake)));

        token.cancel();
        server.await.unwrap().unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn aborted_listener_removes_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SOCKET_NAME);

        let (tx, mut rx) = mpsc::channel(4);
        let server = tokio::spawn(run_listener(path.clone(), tx, CancellationToken::new()));

        let mut tries = 0;
        while send(&path, Command::Wake).await.is_err() {
            tries += 1;
            assert!(tries < 100, "listener never came up");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(matches!(rx.recv().await, Some(Event::Wake)));
        assert!(path.exists());

        server.abort();
        assert!(server.await.unwrap_err().is_cancelled());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn reports_missing_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let err = send(&dir.path().join(SOCKET_NAME), Command::Wake)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("daemon not running"));
    }
}
