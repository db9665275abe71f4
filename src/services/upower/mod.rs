use crate::{
    event::{Event, LidState, PowerState},
    services::forward,
};
use anyhow::{Context, bail};
use dbus::UPowerDbus;
use futures::StreamExt;
use log::{debug, info};
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use zbus::Connection;

mod dbus;

/// Remembers the last forwarded value so a change stream that repeats
/// itself does not produce duplicate events.
#[derive(Debug, Default)]
struct Latch<T>(Option<T>);

impl<T: PartialEq + Copy> Latch<T> {
    fn changed(&mut self, value: T) -> bool {
        if self.0 == Some(value) {
            return false;
        }
        self.0 = Some(value);
        true
    }
}

pub async fn run_lid_listener(
    conn: Connection,
    tx: Sender<Event>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let upower = UPowerDbus::new(&conn)
        .await
        .context("creating UPower proxy")?;

    let present = upower
        .lid_is_present()
        .await
        .context("reading LidIsPresent")?;
    if !present {
        info!("no lid present; treating it as open");
        forward(&tx, &token, Event::Lid(LidState::Open)).await;
        token.cancelled().await;
        return Ok(());
    }

    let mut changes = upower.receive_lid_is_closed_changed().await;
    let mut latch = Latch::default();

    let closed = upower.lid_is_closed().await.context("reading LidIsClosed")?;
    latch.changed(closed);
    if !forward(&tx, &token, Event::Lid(LidState::from_closed(closed))).await {
        return Ok(());
    }

    loop {
        let change = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            change = changes.next() => change,
        };

        let Some(change) = change else {
            bail!("LidIsClosed change stream ended");
        };

        let closed = change.get().await.context("reading LidIsClosed")?;
        if !latch.changed(closed) {
            continue;
        }

        let lid = LidState::from_closed(closed);
        debug!("lid changed: {lid}");
        if !forward(&tx, &token, Event::Lid(lid)).await {
            return Ok(());
        }
    }
}

pub async fn run_power_listener(
    conn: Connection,
    tx: Sender<Event>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let upower = UPowerDbus::new(&conn)
        .await
        .context("creating UPower proxy")?;

    let mut changes = upower.receive_on_battery_changed().await;
    let mut latch = Latch::default();

    let on_battery = upower.on_battery().await.context("reading OnBattery")?;
    latch.changed(on_battery);
    if !forward(
        &tx,
        &token,
        Event::Power(PowerState::from_on_battery(on_battery)),
    )
    .await
    {
        return Ok(());
    }

    loop {
        let change = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            change = changes.next() => change,
        };

        let Some(change) = change else {
            bail!("OnBattery change stream ended");
        };

        let on_battery = change.get().await.context("reading OnBattery")?;
        if !latch.changed(on_battery) {
            continue;
        }

        let power = PowerState::from_on_battery(on_battery);
        debug!("power changed: {power}");
        if !forward(&tx, &token, Event::Power(power)).await {
            return Ok(());
        }
    }
}
