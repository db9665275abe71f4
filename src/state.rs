use crate::{
    event::{LidState, PowerState},
    services::compositor::Display,
};
use log::{debug, info};
use std::{collections::BTreeMap, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Normal,
    Suspending,
    /// Only lives until the next reconciliation pass.
    Waking,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Normal => write!(f, "normal"),
            Mode::Suspending => write!(f, "suspending"),
            Mode::Waking => write!(f, "waking"),
        }
    }
}

/// A fact the control loop folds into [`State`].
#[derive(Debug, Clone)]
pub enum Observation {
    Displays(Vec<Display>),
    Lid(LidState),
    Power(PowerState),
    Suspend,
    Wake,
    /// Displays turned off by a suspend pass, to be restored on wake.
    Suspended(Vec<Display>),
    WakeComplete,
}

/// Everything the daemon knows about the machine. Owned by the control loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct State {
    lid: LidState,
    power: PowerState,
    mode: Mode,
    displays: BTreeMap<String, Display>,
    suspended: BTreeMap<String, Display>,
}

impl State {
    pub fn lid(&self) -> LidState {
        self.lid
    }

    pub fn power(&self) -> PowerState {
        self.power
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn displays(&self) -> impl Iterator<Item = &Display> + Clone {
        self.displays.values()
    }

    pub fn display(&self, name: &str) -> Option<&Display> {
        self.displays.get(name)
    }

    pub fn suspended(&self) -> impl Iterator<Item = &Display> {
        self.suspended.values()
    }

    /// Folds one observation in. Returns whether anything changed.
    pub fn apply(&mut self, observation: Observation) -> bool {
        match observation {
            Observation::Displays(displays) => {
                let displays: BTreeMap<_, _> = displays
                    .into_iter()
                    .map(|d| (d.name.clone(), d))
                    .collect();

                if displays == self.displays {
                    debug!("display list unchanged");
                    return false;
                }

                self.displays = displays;
                debug!(
                    "displays updated: {}",
                    self.displays.keys().cloned().collect::<Vec<_>>().join(",")
                );
                true
            }
            Observation::Lid(lid) => {
                let changed = self.lid != lid;
                self.lid = lid;
                debug!("lid state: {lid}");
                changed
            }
            Observation::Power(power) => {
                let changed = self.power != power;
                self.power = power;
                debug!("power state: {power}");
                changed
            }
            Observation::Suspend => match self.mode {
                Mode::Suspending => {
                    debug!("already suspending; ignoring suspend request");
                    false
                }
                Mode::Normal | Mode::Waking => {
                    self.mode = Mode::Suspending;
                    true
                }
            },
            Observation::Wake => match self.mode {
                Mode::Suspending => {
                    self.mode = Mode::Waking;
                    true
                }
                Mode::Normal | Mode::Waking => {
                    debug!("not suspending; ignoring wake request");
                    false
                }
            },
            Observation::Suspended(displays) => {
                let mut changed = false;
                for display in displays {
                    // The first record is the pre-suspend one; keep it.
                    if !self.suspended.contains_key(&display.name) {
                        self.suspended.insert(display.name.clone(), display);
                        changed = true;
                    }
                }
                changed
            }
            Observation::WakeComplete => {
                if self.mode != Mode::Waking {
                    return false;
                }
                info!(
                    "wake complete; releasing {} suspended display(s)",
                    self.suspended.len()
                );
                self.mode = Mode::Normal;
                self.suspended.clear();
                true
            }
        }
    }

    /// Facets that are still unknown. Reconciliation waits until this is
    /// empty.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.lid == LidState::Unknown {
            missing.push("lid");
        }
        if self.power == PowerState::Unknown {
            missing.push("power");
        }
        if self.displays.is_empty() {
            missing.push("displays");
        }
        missing
    }

    pub fn ready(&self) -> bool {
        self.missing().is_empty()
    }
}
