use crate::{
    config::{Config, ProfileConfig, TargetConfig},
    event::{LidState, PowerState},
    monitors::{LabelLookup, MonitorConfigMap},
    state::State,
};
use itertools::Itertools;
use log::{debug, warn};

/// Desired state of one labelled display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub label: String,
    pub preset: Option<String>,
    pub disable: bool,
}

impl From<&TargetConfig> for Target {
    fn from(target: &TargetConfig) -> Self {
        Self {
            label: target.label.clone(),
            preset: target.preset.clone(),
            disable: target.disable,
        }
    }
}

/// A profile as derived from configuration, with its validation outcome.
///
/// Profiles are rebuilt from scratch on every config reload.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub name: String,
    pub lid: Option<LidState>,
    pub power: Option<PowerState>,
    pub enabled_monitors: Vec<String>,
    pub disabled_monitors: Vec<String>,
    pub targets: Vec<Target>,
    pub disable_undeclared: bool,
    pub valid: bool,
    pub invalid_reasons: Vec<String>,
}

fn unknown_labels<'a>(
    labels: impl IntoIterator<Item = &'a String>,
    monitors: &MonitorConfigMap,
) -> Vec<&'a str> {
    labels
        .into_iter()
        .filter(|label| !monitors.contains_key(label.as_str()))
        .map(String::as_str)
        .collect()
}

impl Profile {
    /// Builds a profile and validates every label and preset it references
    /// against `monitors`. Never fails: problems mark the profile invalid and
    /// are listed in `invalid_reasons`.
    pub fn from_config(config: &ProfileConfig, monitors: &MonitorConfigMap) -> Self {
        let mut reasons = Vec::new();
        let conditions = &config.conditions;

        let lid = match conditions.lid_state.as_deref() {
            Some(raw) => {
                let parsed = raw.parse::<LidState>();
                if let Err(e) = &parsed {
                    debug!("profile {:?}: {e}", config.name);
                    reasons.push("lid state".to_owned());
                }
                parsed.ok()
            }
            None => None,
        };

        let power = match conditions.power_state.as_deref() {
            Some(raw) => {
                let parsed = raw.parse::<PowerState>();
                if let Err(e) = &parsed {
                    debug!("profile {:?}: {e}", config.name);
                    reasons.push("power state".to_owned());
                }
                parsed.ok()
            }
            None => None,
        };

        let bad = unknown_labels(&conditions.enabled_monitors, monitors);
        if !bad.is_empty() {
            reasons.push(format!("enabled monitor conditions: [{}]", bad.join(", ")));
        }

        let bad = unknown_labels(&conditions.disabled_monitors, monitors);
        if !bad.is_empty() {
            reasons.push(format!("disabled monitor conditions: [{}]", bad.join(", ")));
        }

        let bad = unknown_labels(config.targets.iter().map(|t| &t.label), monitors);
        if !bad.is_empty() {
            reasons.push(format!("monitor state labels: [{}]", bad.join(", ")));
        }

        let bad_presets = config
            .targets
            .iter()
            .filter_map(|t| {
                let preset = t.preset.as_deref()?;
                let known = monitors
                    .get(&t.label)
                    .is_some_and(|m| m.presets.contains_key(preset));
                (!known).then(|| format!("{}:{preset}", t.label))
            })
            .collect::<Vec<_>>();
        if !bad_presets.is_empty() {
            reasons.push(format!("monitor preset labels: [{}]", bad_presets.join(", ")));
        }

        if config.targets.is_empty() {
            reasons.push("no monitor targets".to_owned());
        }

        if !reasons.is_empty() {
            warn!(
                "profile {:?} is invalid: {}",
                config.name,
                reasons.iter().join("; ")
            );
        }

        Self {
            name: config.name.clone(),
            lid,
            power,
            enabled_monitors: conditions.enabled_monitors.clone(),
            disabled_monitors: conditions.disabled_monitors.clone(),
            targets: config.targets.iter().map(Target::from).collect(),
            disable_undeclared: config.disable_undeclared,
            valid: reasons.is_empty(),
            invalid_reasons: reasons,
        }
    }

    /// Whether the profile's conditions hold. Unset conditions always hold;
    /// displays not named by any condition do not matter.
    pub fn matches(&self, state: &State, lookup: &LabelLookup) -> bool {
        if self.lid.is_some_and(|lid| lid != state.lid()) {
            return false;
        }

        if self.power.is_some_and(|power| power != state.power()) {
            return false;
        }

        self.enabled_monitors
            .iter()
            .all(|label| lookup.is_enabled(label))
            && self
                .disabled_monitors
                .iter()
                .all(|label| !lookup.is_enabled(label))
    }

    /// Whether any target references `label`.
    pub fn declares(&self, label: &str) -> bool {
        self.targets.iter().any(|t| t.label == label)
    }
}

pub fn build_profiles(config: &Config) -> Vec<Profile> {
    config
        .profiles
        .iter()
        .map(|p| Profile::from_config(p, &config.monitors))
        .collect()
}

/// Picks the profile to apply. Profiles are checked in declaration order and
/// the last valid match wins, so specific profiles belong after general ones.
pub fn select<'a>(
    profiles: &'a [Profile],
    state: &State,
    lookup: &LabelLookup,
) -> Option<&'a Profile> {
    let mut selected = None;

    for profile in profiles.iter().filter(|p| p.matches(state, lookup)) {
        if !profile.valid {
            warn!(
                "profile {:?} matches but is invalid; skipping",
                profile.name
            );
            continue;
        }

        if let Some(previous) = selected.replace(profile) {
            debug!(
                "profile {:?} overrides {:?}",
                profile.name, previous.name
            );
        }
    }

    selected
}
