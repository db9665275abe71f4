use crate::config::Config;
use std::{fmt, str::FromStr};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LidState {
    #[default]
    Unknown,
    Open,
    Closed,
}

impl LidState {
    pub fn from_closed(closed: bool) -> Self {
        if closed {
            LidState::Closed
        } else {
            LidState::Open
        }
    }
}

impl fmt::Display for LidState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LidState::Unknown => write!(f, "unknown"),
            LidState::Open => write!(f, "open"),
            LidState::Closed => write!(f, "closed"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown lid state {0:?}, expected \"open\" or \"closed\"")]
pub struct UnknownLidState(pub String);

impl FromStr for LidState {
    type Err = UnknownLidState;

    /// Parses a configured lid condition. `unknown` is not a valid condition.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "open" | "opened" => Ok(LidState::Open),
            "closed" => Ok(LidState::Closed),
            _ => Err(UnknownLidState(s.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerState {
    #[default]
    Unknown,
    Battery,
    Ac,
}

impl PowerState {
    pub fn from_on_battery(on_battery: bool) -> Self {
        if on_battery {
            PowerState::Battery
        } else {
            PowerState::Ac
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::Unknown => write!(f, "unknown"),
            PowerState::Battery => write!(f, "battery"),
            PowerState::Ac => write!(f, "ac"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown power state {0:?}, expected \"battery\" or \"ac\"")]
pub struct UnknownPowerState(pub String);

impl FromStr for PowerState {
    type Err = UnknownPowerState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "battery" => Ok(PowerState::Battery),
            "ac" => Ok(PowerState::Ac),
            _ => Err(UnknownPowerState(s.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayChange {
    Added,
    Removed,
    Unknown,
}

/// A topology notification read from the compositor's event socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayEvent {
    pub change: DisplayChange,
    pub payload: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid compositor event: {0:?}")]
pub struct InvalidEvent(pub String);

impl DisplayEvent {
    /// Parses an `eventName>>payload` line. Only the v2 monitor events are
    /// recognised; Hyprland also emits v1 variants for the same change.
    pub fn parse(line: &str) -> Result<Self, InvalidEvent> {
        let (name, payload) = line
            .split_once(">>")
            .ok_or_else(|| InvalidEvent(line.to_string()))?;

        let change = match name {
            "monitoraddedv2" => DisplayChange::Added,
            "monitorremovedv2" => DisplayChange::Removed,
            _ => DisplayChange::Unknown,
        };

        Ok(Self {
            change,
            payload: payload.to_string(),
        })
    }

    /// Connector name from a `ID,NAME,DESCRIPTION` payload.
    pub fn display_name(&self) -> Option<&str> {
        let mut parts = self.payload.splitn(3, ',');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(_), Some(name), Some(_)) => Some(name),
            _ => None,
        }
    }
}

/// Everything the observers can tell the control loop.
#[derive(Debug, Clone)]
pub enum Event {
    Display(DisplayEvent),
    Lid(LidState),
    Power(PowerState),
    ConfigReloaded(Box<Config>),
    Suspend,
    Wake,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Display(ev) => write!(f, "display {:?} ({})", ev.change, ev.payload),
            Event::Lid(state) => write!(f, "lid {state}"),
            Event::Power(state) => write!(f, "power {state}"),
            Event::ConfigReloaded(_) => write!(f, "config reloaded"),
            Event::Suspend => write!(f, "suspend requested"),
            Event::Wake => write!(f, "wake requested"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_monitor_v2_events() {
        let added = DisplayEvent::parse("monitoraddedv2>>1,DP-1,Samsung Odyssey").unwrap();
        assert_eq!(added.change, DisplayChange::Added);
        assert_eq!(added.display_name(), Some("DP-1"));

        let removed = DisplayEvent::parse("monitorremovedv2>>1,DP-1,Samsung, Inc").unwrap();
        assert_eq!(removed.change, DisplayChange::Removed);
        assert_eq!(removed.display_name(), Some("DP-1"));
    }

    #[test]
    fn other_events_are_unknown() {
        let v1 = DisplayEvent::parse("monitoradded>>DP-1").unwrap();
        assert_eq!(v1.change, DisplayChange::Unknown);

        let ws = DisplayEvent::parse("workspace>>2").unwrap();
        assert_eq!(ws.change, DisplayChange::Unknown);
        assert_eq!(ws.display_name(), None);
    }

    #[test]
    fn lines_without_separator_are_invalid() {
        assert_eq!(
            DisplayEvent::parse("garbage"),
            Err(InvalidEvent("garbage".to_string()))
        );
    }

    #[test]
    fn parses_conditions() {
        assert_eq!("open".parse(), Ok(LidState::Open));
        assert_eq!("Closed".parse(), Ok(LidState::Closed));
        assert_eq!(
            "unknown".parse::<LidState>(),
            Err(UnknownLidState("unknown".to_owned()))
        );
        assert_eq!("ac".parse(), Ok(PowerState::Ac));
        assert_eq!("battery".parse(), Ok(PowerState::Battery));
        assert_eq!(
            "mains".parse::<PowerState>(),
            Err(UnknownPowerState("mains".to_owned()))
        );
    }

    #[test]
    fn condition_errors_name_the_value() {
        let err = " half-open ".parse::<LidState>().unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"unknown lid state " half-open ", expected "open" or "closed""#
        );
        let err = "usb".parse::<PowerState>().unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"unknown power state "usb", expected "battery" or "ac""#
        );
    }
}
