use crate::services::compositor::{Display, Geometry};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, env};

const LAPTOP_NAME_ENV: &str = "LAPTOP_DISPLAY_NAME";

/// Optional identifiers tying a configured label to a physical output.
///
/// Unset (or empty) fields are "don't care". A set with nothing in it never
/// matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorIdentifiers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub make: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl MonitorIdentifiers {
    fn fields<'a>(&'a self, display: &'a Display) -> [(Option<&'a str>, &'a str); 4] {
        [
            (self.name.as_deref(), display.name.as_str()),
            (self.description.as_deref(), display.description.as_str()),
            (self.make.as_deref(), display.make.as_str()),
            (self.model.as_deref(), display.model.as_str()),
        ]
    }

    /// Every non-empty identifier must equal the display's field exactly.
    pub fn matches(&self, display: &Display) -> bool {
        let mut constrained = false;

        for (wanted, actual) in self.fields(display) {
            match wanted {
                Some(wanted) if !wanted.is_empty() => {
                    if wanted != actual {
                        return false;
                    }
                    constrained = true;
                }
                _ => {}
            }
        }

        constrained
    }
}

pub type PresetMap = BTreeMap<String, Geometry>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(flatten)]
    pub identifiers: MonitorIdentifiers,
    #[serde(default)]
    pub presets: PresetMap,
}

pub type MonitorConfigMap = BTreeMap<String, MonitorConfig>;

/// Configured labels resolved against the displays that exist right now.
/// Rebuilt on every reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct LabelLookup {
    resolved: BTreeMap<String, Display>,
}

impl LabelLookup {
    pub fn build<'a>(
        monitors: &MonitorConfigMap,
        displays: impl IntoIterator<Item = &'a Display> + Clone,
    ) -> Self {
        let resolved = monitors
            .iter()
            .filter_map(|(label, config)| {
                displays
                    .clone()
                    .into_iter()
                    .find(|d| config.identifiers.matches(d))
                    .map(|d| (label.clone(), d.clone()))
            })
            .collect();

        Self { resolved }
    }

    pub fn get(&self, label: &str) -> Option<&Display> {
        self.resolved.get(label)
    }

    /// Whether `label` resolves to a display that is currently on.
    pub fn is_enabled(&self, label: &str) -> bool {
        self.get(label).is_some_and(Display::enabled)
    }

    /// The first label that resolved to the display named `name`.
    pub fn label_of(&self, name: &str) -> Option<&str> {
        self.resolved
            .iter()
            .find(|(_, d)| d.name == name)
            .map(|(label, _)| label.as_str())
    }
}

fn normalize(name: &str) -> String {
    name.to_lowercase().replace('-', "")
}

fn is_builtin_panel_with(name: &str, configured: Option<&str>) -> bool {
    let name = normalize(name);
    name.starts_with("edp") || configured.is_some_and(|c| !c.is_empty() && normalize(c) == name)
}

/// Connector-name heuristic for the laptop's own panel (`eDP-*`, or the name
/// given in `LAPTOP_DISPLAY_NAME`).
pub fn is_builtin_panel(name: &str) -> bool {
    is_builtin_panel_with(name, env::var(LAPTOP_NAME_ENV).ok().as_deref())
}

/// The laptop panel: whatever the configured laptop label resolves to, or
/// failing that the first display that looks like a built-in panel.
pub fn identify_laptop<'a>(
    laptop_label: &str,
    lookup: &LabelLookup,
    displays: impl IntoIterator<Item = &'a Display>,
) -> Option<Display> {
    if let Some(display) = lookup.get(laptop_label) {
        return Some(display.clone());
    }

    displays
        .into_iter()
        .find(|d| is_builtin_panel(&d.name))
        .cloned()
}
