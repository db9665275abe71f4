use crate::{
    config::Config,
    event::LidState,
    monitors::{self, LabelLookup},
    profile::{self, Profile},
    services::compositor::{Display, changes_needed},
    state::{Mode, State},
};
use itertools::Itertools;
use log::{debug, info, warn};
use std::{collections::HashSet, fmt};

/// The outcome of one planning pass. Every display considered lands in
/// exactly one of the three sets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdatePlan {
    pub enable_or_update: Vec<Display>,
    pub disable: Vec<Display>,
    pub no_change: Vec<Display>,
}

impl UpdatePlan {
    /// True when applying the plan would not touch the compositor.
    pub fn is_empty(&self) -> bool {
        self.enable_or_update.is_empty() && self.disable.is_empty()
    }

    pub fn log(&self) {
        for display in &self.enable_or_update {
            debug!("plan: enable {}", display.rule());
        }
        for display in &self.disable {
            debug!("plan: disable {}", display.name);
        }
        if !self.no_change.is_empty() {
            debug!(
                "plan: leave {}",
                self.no_change.iter().map(|d| &d.name).join(", ")
            );
        }
    }
}

/// Coarse situation used when no profile applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    OnlyLaptopOpen,
    OnlyLaptopClosed,
    DockedOpen,
    DockedClosed,
    Unknown,
}

impl Status {
    pub fn classify(docked: bool, lid: LidState) -> Self {
        match (docked, lid) {
            (_, LidState::Unknown) => Status::Unknown,
            (false, LidState::Open) => Status::OnlyLaptopOpen,
            (false, LidState::Closed) => Status::OnlyLaptopClosed,
            (true, LidState::Open) => Status::DockedOpen,
            (true, LidState::Closed) => Status::DockedClosed,
        }
    }
}

/// How a pass decides what the displays should look like. Chosen once per
/// pass.
#[derive(Debug, Clone, Copy)]
pub enum Strategy<'a> {
    Suspend,
    Wake,
    Profile(&'a Profile),
    Status(Status),
}

impl fmt::Display for Strategy<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Suspend => write!(f, "suspend"),
            Strategy::Wake => write!(f, "wake"),
            Strategy::Profile(profile) => write!(f, "profile {:?}", profile.name),
            Strategy::Status(status) => write!(f, "status {status:?}"),
        }
    }
}

/// Accumulates an [`UpdatePlan`], keeping its sets disjoint: the first
/// decision about a display sticks.
struct PlanBuilder<'s> {
    state: &'s State,
    plan: UpdatePlan,
    claimed: HashSet<String>,
}

impl<'s> PlanBuilder<'s> {
    fn new(state: &'s State) -> Self {
        Self {
            state,
            plan: UpdatePlan::default(),
            claimed: HashSet::new(),
        }
    }

    fn claim(&mut self, name: &str) -> bool {
        if self.claimed.insert(name.to_owned()) {
            return true;
        }
        debug!("{name} already planned; ignoring later target");
        false
    }

    fn is_claimed(&self, name: &str) -> bool {
        self.claimed.contains(name)
    }

    /// Enables `target`, unless the display is already on with the same
    /// geometry.
    fn enable(&mut self, target: Display) {
        if !self.claim(&target.name) {
            return;
        }

        match self.state.display(&target.name) {
            Some(observed) if observed.enabled() && !changes_needed(&target, observed) => {
                self.plan.no_change.push(observed.clone())
            }
            _ => self.plan.enable_or_update.push(target),
        }
    }

    /// Enables `target` even if it looks up to date.
    fn force_enable(&mut self, target: Display) {
        if self.claim(&target.name) {
            self.plan.enable_or_update.push(target);
        }
    }

    fn disable(&mut self, display: &Display) {
        if !self.claim(&display.name) {
            return;
        }

        if display.enabled() {
            self.plan.disable.push(display.clone());
        } else {
            self.plan.no_change.push(display.clone());
        }
    }

    /// Everything not yet decided is left alone.
    fn finish(mut self) -> UpdatePlan {
        for display in self.state.displays() {
            if self.claimed.insert(display.name.clone()) {
                self.plan.no_change.push(display.clone());
            }
        }
        self.plan
    }
}

/// Everything one planning pass looks at.
pub struct Planner<'a> {
    state: &'a State,
    config: &'a Config,
    profiles: &'a [Profile],
    lookup: LabelLookup,
    laptop: Option<Display>,
}

impl<'a> Planner<'a> {
    pub fn new(state: &'a State, config: &'a Config, profiles: &'a [Profile]) -> Self {
        let lookup = LabelLookup::build(&config.monitors, state.displays());
        let laptop = monitors::identify_laptop(&config.laptop, &lookup, state.displays());

        Self {
            state,
            config,
            profiles,
            lookup,
            laptop,
        }
    }

    fn is_laptop(&self, display: &Display) -> bool {
        self.laptop
            .as_ref()
            .is_some_and(|laptop| laptop.name == display.name)
    }

    pub fn status(&self) -> Status {
        let docked = self.state.displays().any(|d| !self.is_laptop(d));
        Status::classify(docked, self.state.lid())
    }

    pub fn strategy(&self) -> Strategy<'a> {
        match self.state.mode() {
            Mode::Suspending => Strategy::Suspend,
            Mode::Waking => Strategy::Wake,
            Mode::Normal => match profile::select(self.profiles, self.state, &self.lookup) {
                Some(profile) => Strategy::Profile(profile),
                None => Strategy::Status(self.status()),
            },
        }
    }

    pub fn plan(&self, strategy: Strategy<'_>) -> UpdatePlan {
        let mut builder = PlanBuilder::new(self.state);

        match strategy {
            Strategy::Suspend => self.plan_suspend(&mut builder),
            Strategy::Wake => self.plan_wake(&mut builder),
            Strategy::Profile(profile) => self.plan_profile(profile, &mut builder),
            Strategy::Status(status) => self.plan_status(status, &mut builder),
        }

        builder.finish()
    }

    /// The display as it should look when switched on without an explicit
    /// preset: unchanged if it is on, otherwise the fallback preset of
    /// `label` (or of the first label matching it), else its last known
    /// geometry.
    fn enabled_form(&self, display: &Display, label: Option<&str>) -> Display {
        if display.enabled() {
            return display.clone();
        }

        let fallback = label
            .or_else(|| self.lookup.label_of(&display.name))
            .and_then(|label| self.config.monitor(label))
            .and_then(|monitor| monitor.presets.get(&self.config.fallback_preset));

        match fallback {
            Some(geometry) => display.with_geometry(*geometry),
            None => display.with_geometry(display.geometry()),
        }
    }

    fn plan_profile(&self, profile: &Profile, builder: &mut PlanBuilder<'_>) {
        for target in &profile.targets {
            let Some(display) = self.lookup.get(&target.label) else {
                if !target.disable {
                    warn!(
                        "profile {:?}: {} is not connected; skipping",
                        profile.name, target.label
                    );
                }
                continue;
            };

            if target.disable {
                builder.disable(display);
                continue;
            }

            match target.preset.as_deref() {
                None => builder.enable(self.enabled_form(display, Some(target.label.as_str()))),
                Some(preset) => {
                    let geometry = self
                        .config
                        .monitor(&target.label)
                        .and_then(|monitor| monitor.presets.get(preset));
                    match geometry {
                        Some(geometry) => builder.enable(display.with_geometry(*geometry)),
                        None => warn!(
                            "profile {:?}: {} has no preset {preset:?}; skipping",
                            profile.name, target.label
                        ),
                    }
                }
            }
        }

        if profile.disable_undeclared {
            for display in self.state.displays() {
                if !builder.is_claimed(&display.name) {
                    builder.disable(display);
                }
            }
        }
    }

    fn plan_status(&self, status: Status, builder: &mut PlanBuilder<'_>) {
        let externals = self.state.displays().filter(|d| !self.is_laptop(d));

        match status {
            // Keep the panel on even with the lid shut: the compositor
            // refuses a layout with nothing enabled.
            Status::OnlyLaptopOpen | Status::OnlyLaptopClosed => {
                if let Some(laptop) = &self.laptop {
                    builder.enable(self.enabled_form(laptop, None));
                }
            }
            Status::DockedOpen => {
                if let Some(laptop) = &self.laptop {
                    builder.enable(self.enabled_form(laptop, None));
                }
                for display in externals {
                    builder.enable(self.enabled_form(display, None));
                }
            }
            Status::DockedClosed => {
                if let Some(laptop) = &self.laptop {
                    builder.disable(laptop);
                }
                for display in externals {
                    builder.enable(self.enabled_form(display, None));
                }
            }
            Status::Unknown => debug!("display situation unknown; leaving displays alone"),
        }
    }

    fn plan_suspend(&self, builder: &mut PlanBuilder<'_>) {
        for display in self.state.displays() {
            if !self.is_laptop(display) && display.enabled() {
                builder.disable(display);
            }
        }

        match &self.laptop {
            Some(laptop) => builder.force_enable(self.enabled_form(laptop, None)),
            None => warn!("no laptop display found to keep on during suspend"),
        }
    }

    fn plan_wake(&self, builder: &mut PlanBuilder<'_>) {
        for suspended in self.state.suspended() {
            if self.state.display(&suspended.name).is_none() {
                debug!("{} went away while suspended", suspended.name);
                continue;
            }
            builder.enable(suspended.with_geometry(suspended.geometry()));
        }
    }
}

/// Chooses a strategy for the current state and plans with it.
pub fn plan(state: &State, config: &Config, profiles: &[Profile]) -> UpdatePlan {
    let planner = Planner::new(state, config, profiles);
    let strategy = planner.strategy();
    info!("planning with {strategy}");

    let plan = planner.plan(strategy);
    plan.log();
    plan
}
