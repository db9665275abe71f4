use crate::{
    event::{DisplayChange, DisplayEvent, Event},
    services::forward,
};
use anyhow::{Context, bail};
use log::{debug, info, warn};
use std::{env, path::PathBuf};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::UnixStream,
    sync::mpsc::Sender,
};
use tokio_util::sync::CancellationToken;

const RUNTIME_ENV: &str = "XDG_RUNTIME_DIR";
const SIGNATURE_ENV: &str = "HYPRLAND_INSTANCE_SIGNATURE";
const SOCKET_NAME: &str = ".socket2.sock";

pub fn is_available() -> bool {
    env::var_os(SIGNATURE_ENV).is_some()
}

/// Hyprland's event socket for the running instance.
pub fn socket_path() -> anyhow::Result<PathBuf> {
    let runtime = env::var_os(RUNTIME_ENV).context("XDG_RUNTIME_DIR is not set")?;
    let signature =
        env::var_os(SIGNATURE_ENV).context("HYPRLAND_INSTANCE_SIGNATURE is not set")?;

    Ok(PathBuf::from(runtime)
        .join("hypr")
        .join(signature)
        .join(SOCKET_NAME))
}

/// Drops unknown events and immediate repeats of the last forwarded one.
#[derive(Debug, Default)]
pub struct Deduplicator {
    last: Option<DisplayEvent>,
}

impl Deduplicator {
    pub fn admit(&mut self, event: DisplayEvent) -> Option<DisplayEvent> {
        if event.change == DisplayChange::Unknown {
            return None;
        }

        if self.last.as_ref() == Some(&event) {
            debug!("compositor event repeats the last one; dropping");
            return None;
        }

        self.last = Some(event.clone());
        Some(event)
    }
}

pub async fn run_listener(tx: Sender<Event>, token: CancellationToken) -> anyhow::Result<()> {
    let path = socket_path()?;
    let stream = UnixStream::connect(&path)
        .await
        .with_context(|| format!("connecting to {}", path.display()))?;
    info!("listening to compositor events on {}", path.display());

    let mut lines = BufReader::new(stream).lines();
    let mut dedup = Deduplicator::default();

    loop {
        let line = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            line = lines.next_line() => line.context("reading compositor event socket")?,
        };

        let Some(line) = line else {
            bail!("compositor event socket closed");
        };

        let event = match DisplayEvent::parse(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!("{e}");
                continue;
            }
        };

        if let Some(event) = dedup.admit(event) {
            debug!(
                "display {:?}: {}",
                event.change,
                event.display_name().unwrap_or(&event.payload)
            );
            if !forward(&tx, &token, Event::Display(event)).await {
                return Ok(());
            }
        }
    }
}
