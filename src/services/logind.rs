use crate::{event::Event, services::forward};
use anyhow::{Context, bail};
use futures::StreamExt;
use log::{debug, warn};
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use zbus::Connection;

/// Maps logind's sleep notifications onto suspend/wake requests.
pub async fn run_listener(
    conn: Connection,
    tx: Sender<Event>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let proxy = Login1ManagerProxy::new(&conn)
        .await
        .context("creating logind proxy")?;

    let mut stream = proxy
        .receive_prepare_for_sleep()
        .await
        .context("subscribing to PrepareForSleep")?;

    loop {
        let signal = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            signal = stream.next() => signal,
        };

        let Some(signal) = signal else {
            bail!("PrepareForSleep signal stream ended");
        };

        let starting = match signal.args() {
            Ok(args) => args.starting,
            Err(e) => {
                warn!("malformed PrepareForSleep signal: {e}");
                continue;
            }
        };

        debug!("PrepareForSleep({starting})");
        let event = if starting { Event::Suspend } else { Event::Wake };
        if !forward(&tx, &token, event).await {
            return Ok(());
        }
    }
}

#[zbus::proxy(
    interface = "org.freedesktop.login1.Manager",
    default_service = "org.freedesktop.login1",
    default_path = "/org/freedesktop/login1"
)]
trait Login1Manager {
    #[zbus(signal)]
    fn prepare_for_sleep(&self, starting: bool) -> ();
}
