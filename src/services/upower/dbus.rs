use std::ops::Deref;
use zbus::{Result, proxy};

pub struct UPowerDbus<'a>(UPowerProxy<'a>);

impl<'a> Deref for UPowerDbus<'a> {
    type Target = UPowerProxy<'a>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl UPowerDbus<'_> {
    pub async fn new(conn: &zbus::Connection) -> anyhow::Result<Self> {
        let upower = UPowerProxy::new(conn).await?;

        Ok(Self(upower))
    }
}

#[proxy(
    interface = "org.freedesktop.UPower",
    default_service = "org.freedesktop.UPower",
    default_path = "/org/freedesktop/UPower"
)]
pub trait UPower {
    #[zbus(property)]
    fn lid_is_closed(&self) -> Result<bool>;

    #[zbus(property)]
    fn lid_is_present(&self) -> Result<bool>;

    #[zbus(property)]
    fn on_battery(&self) -> Result<bool>;
}
