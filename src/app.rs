use crate::{
    config::Config,
    event::Event,
    planner::{self, UpdatePlan},
    profile::{Profile, build_profiles},
    services::{
        Listener,
        compositor::{Compositor, CompositorError, Display},
    },
    state::{Mode, Observation, State},
};
use futures::{StreamExt, future::join_all};
use itertools::Itertools;
use log::{debug, info, warn};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, sleep_until};

pub const COOLDOWN: Duration = Duration::from_millis(500);

/// Whether a reconciliation pass may start right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Open,
    Busy,
    CoolingUntil(Instant),
}

#[derive(Debug)]
pub struct Cooldown {
    window: Duration,
    running: bool,
    last_end: Option<Instant>,
}

impl Cooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            running: false,
            last_end: None,
        }
    }

    pub fn gate(&self, now: Instant) -> Gate {
        if self.running {
            return Gate::Busy;
        }

        match self.last_end.map(|end| end + self.window) {
            Some(until) if now < until => Gate::CoolingUntil(until),
            _ => Gate::Open,
        }
    }

    pub fn begin(&mut self) {
        self.running = true;
    }

    pub fn end(&mut self, now: Instant) {
        self.running = false;
        self.last_end = Some(now);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Enable,
    Disable,
}

/// Every display change of a plan that the compositor rejected.
#[derive(Debug, Error)]
#[error(
    "{} of {} display change(s) failed: {}",
    .failures.len(),
    .attempted,
    summarize(.failures)
)]
pub struct ApplyError {
    pub attempted: usize,
    pub failures: Vec<(String, CompositorError)>,
}

fn summarize(failures: &[(String, CompositorError)]) -> String {
    failures
        .iter()
        .map(|(name, e)| format!("{name}: {e}"))
        .join("; ")
}

async fn apply_one<C: Compositor>(
    compositor: &C,
    action: Action,
    display: &Display,
) -> (String, Result<(), CompositorError>) {
    let res = match action {
        Action::Enable => compositor.enable_or_update(display).await,
        Action::Disable => compositor.disable(display).await,
    };

    match &res {
        Ok(()) => debug!("{action:?} {} done", display.name),
        Err(e) => warn!("{action:?} {} failed: {e}", display.name),
    }
    (display.name.clone(), res)
}

/// Applies every change of `plan` concurrently. A failing display does not
/// stop the others; successful changes are kept either way.
pub async fn execute<C: Compositor>(compositor: &C, plan: &UpdatePlan) -> Result<(), ApplyError> {
    let changes = plan
        .enable_or_update
        .iter()
        .map(|d| (Action::Enable, d))
        .chain(plan.disable.iter().map(|d| (Action::Disable, d)))
        .map(|(action, display)| apply_one(compositor, action, display));

    let results = join_all(changes).await;
    let attempted = results.len();

    let failures: Vec<_> = results
        .into_iter()
        .filter_map(|(name, res)| res.err().map(|e| (name, e)))
        .collect();

    if failures.is_empty() {
        Ok(())
    } else {
        Err(ApplyError {
            attempted,
            failures,
        })
    }
}

enum Wakeup {
    Event(Option<Event>),
    Deferred,
}

/// The control loop. Sole owner of [`State`].
pub struct App<C> {
    compositor: C,
    config: Config,
    profiles: Vec<Profile>,
    state: State,
    cooldown: Cooldown,
    deferred: Option<Instant>,
}

impl<C: Compositor> App<C> {
    pub fn new(compositor: C, config: Config) -> Self {
        let profiles = build_profiles(&config);

        Self {
            compositor,
            config,
            profiles,
            state: State::default(),
            cooldown: Cooldown::new(COOLDOWN),
            deferred: None,
        }
    }

    /// Re-reads the display list. Returns whether it changed.
    async fn refresh_displays(&mut self) -> bool {
        match self.compositor.list_displays().await {
            Ok(displays) => self.state.apply(Observation::Displays(displays)),
            Err(e) => {
                warn!("failed to list displays: {e}");
                false
            }
        }
    }

    async fn handle(&mut self, event: Event) -> bool {
        match event {
            Event::Display(_) => self.refresh_displays().await,
            Event::Lid(lid) => self.state.apply(Observation::Lid(lid)),
            Event::Power(power) => self.state.apply(Observation::Power(power)),
            Event::ConfigReloaded(config) => {
                self.config = *config;
                self.profiles = build_profiles(&self.config);
                info!("loaded {} profile(s)", self.profiles.len());
                true
            }
            Event::Suspend => self.state.apply(Observation::Suspend),
            Event::Wake => self.state.apply(Observation::Wake),
        }
    }

    async fn maybe_reconcile(&mut self) {
        let missing = self.state.missing();
        if !missing.is_empty() {
            info!("waiting for {}", missing.join(", "));
            return;
        }

        match self.cooldown.gate(Instant::now()) {
            Gate::Open => {
                // Failures are logged in `reconcile`; the loop carries on.
                let _ = self.reconcile().await;
            }
            Gate::Busy => debug!("reconciliation already running"),
            Gate::CoolingUntil(until) => {
                debug!("cooling down; deferring reconciliation");
                self.deferred = Some(until);
            }
        }
    }

    /// Plans against the current state and applies the result.
    pub async fn reconcile(&mut self) -> Result<(), ApplyError> {
        self.cooldown.begin();
        self.deferred = None;

        let mode = self.state.mode();
        let plan = planner::plan(&self.state, &self.config, &self.profiles);
        let touched = !plan.is_empty();

        let res = if !touched {
            debug!("displays already match");
            Ok(())
        } else {
            execute(&self.compositor, &plan).await
        };

        match mode {
            Mode::Suspending => {
                self.state.apply(Observation::Suspended(plan.disable));
            }
            Mode::Waking => {
                self.state.apply(Observation::WakeComplete);
            }
            Mode::Normal => {}
        }

        if touched {
            self.refresh_displays().await;
        }

        self.cooldown.end(Instant::now());

        if let Err(e) = &res {
            warn!("reconciliation incomplete: {e}");
        }
        res
    }

    /// Drains `listener` until every observer has stopped, then reports why
    /// they did.
    pub async fn run(mut self, mut listener: Listener) -> anyhow::Result<()> {
        self.refresh_displays().await;

        loop {
            let deferred = self.deferred;
            let wakeup = tokio::select! {
                event = listener.events.next() => Wakeup::Event(event),
                _ = sleep_until(deferred.unwrap_or_else(Instant::now)), if deferred.is_some() => {
                    Wakeup::Deferred
                }
            };

            match wakeup {
                Wakeup::Event(Some(event)) => {
                    info!("{event}");
                    if self.handle(event).await {
                        self.maybe_reconcile().await;
                    }
                }
                Wakeup::Event(None) => break,
                Wakeup::Deferred => {
                    self.deferred = None;
                    self.maybe_reconcile().await;
                }
            }
        }

        info!("event stream ended");
        listener.finish().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event::{LidState, PowerState},
        services::{Observer, forward, listen},
        testing::{FakeCompositor, external, external2, laptop},
    };
    use tokio::sync::mpsc::Sender;
    use tokio_util::sync::CancellationToken;

    const CONFIG: &str = r#"
[monitors.laptop]
name = "eDP-1"

[monitors.ext]
name = "DP-1"

[monitors.ext.presets.4k]
width = 3840
height = 2160
refresh_rate = 60.0

[[profiles]]
name = "docked-open"

[profiles.conditions]
lid_state = "open"
enabled_monitors = ["ext"]

[[profiles.targets]]
label = "ext"
preset = "4k"

[[profiles.targets]]
label = "laptop"
"#;

    async fn script(
        events: Vec<Event>,
        linger: Duration,
        tx: Sender<Event>,
        token: CancellationToken,
    ) -> anyhow::Result<()> {
        for event in events {
            if !forward(&tx, &token, event).await {
                return Ok(());
            }
        }
        tokio::time::sleep(linger).await;
        Ok(())
    }

    fn scripted(events: Vec<Event>, linger: Duration) -> Listener {
        listen(
            vec![Observer::new("script", move |tx, token| {
                script(events, linger, tx, token)
            })],
            CancellationToken::new(),
        )
    }

    fn docked_config() -> Config {
        toml::from_str(CONFIG).unwrap()
    }

    #[test]
    fn cooldown_gate() {
        let start = Instant::now();
        let mut cooldown = Cooldown::new(COOLDOWN);
        assert_eq!(cooldown.gate(start), Gate::Open);

        cooldown.begin();
        assert_eq!(cooldown.gate(start), Gate::Busy);

        cooldown.end(start);
        let until = start + COOLDOWN;
        assert_eq!(
            cooldown.gate(start + Duration::from_millis(100)),
            Gate::CoolingUntil(until)
        );
        assert_eq!(cooldown.gate(until), Gate::Open);
    }

    #[tokio::test]
    async fn partial_failure_keeps_successes() {
        let compositor = FakeCompositor::new(vec![laptop(), external(), external2()]);
        compositor.fail_on("DP-1");

        let plan = UpdatePlan {
            enable_or_update: vec![
                external().with_geometry(Default::default()),
                external2().with_geometry(laptop().geometry()),
            ],
            disable: vec![laptop()],
            no_change: vec![],
        };

        let err = execute(&compositor, &plan).await.unwrap_err();
        assert_eq!(err.attempted, 3);
        assert_eq!(err.failures.len(), 1);
        assert_eq!(err.failures[0].0, "DP-1");
        assert!(err.to_string().starts_with("1 of 3 display change(s) failed"));

        let displays = compositor.displays();
        let hdmi = displays.iter().find(|d| d.name == "HDMI-A-1").unwrap();
        assert_eq!(hdmi.width, 1920);
        assert_eq!(hdmi.x, laptop().x);
        assert!(displays.iter().find(|d| d.name == "eDP-1").unwrap().disabled);
        assert_eq!(compositor.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn reconciles_once_ready() {
        let compositor = FakeCompositor::new(vec![laptop(), external()]);
        let app = App::new(compositor.clone(), docked_config());

        let listener = scripted(
            vec![
                Event::Lid(LidState::Open),
                Event::Power(PowerState::Ac),
            ],
            Duration::ZERO,
        );
        app.run(listener).await.unwrap();

        assert_eq!(compositor.calls(), vec!["enable DP-1"]);
        let ext = compositor
            .displays()
            .into_iter()
            .find(|d| d.name == "DP-1")
            .unwrap();
        assert_eq!((ext.width, ext.height), (3840, 2160));
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_happens_until_ready() {
        let compositor = FakeCompositor::new(vec![laptop(), external()]);
        let app = App::new(compositor.clone(), docked_config());

        let listener = scripted(vec![Event::Lid(LidState::Open)], Duration::ZERO);
        app.run(listener).await.unwrap();

        assert!(compositor.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn change_during_cooldown_is_deferred() {
        let compositor = FakeCompositor::new(vec![laptop(), external()]);
        let app = App::new(compositor.clone(), Config::default());

        // The first pass finds nothing to do; the reload lands inside the
        // cooldown window and must still be acted upon.
        let listener = scripted(
            vec![
                Event::Lid(LidState::Open),
                Event::Power(PowerState::Ac),
                Event::ConfigReloaded(Box::new(docked_config())),
            ],
            Duration::from_secs(2),
        );
        app.run(listener).await.unwrap();

        assert_eq!(compositor.calls(), vec!["enable DP-1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn suspend_and_wake_through_the_loop() {
        let compositor = FakeCompositor::new(vec![laptop(), external()]);
        let mut app = App::new(compositor.clone(), Config::default());
        app.refresh_displays().await;

        for event in [
            Event::Lid(LidState::Open),
            Event::Power(PowerState::Battery),
            Event::Suspend,
        ] {
            app.handle(event).await;
        }
        app.reconcile().await.unwrap();
        assert_eq!(app.state.suspended().count(), 1);
        assert!(compositor.calls().contains(&"disable DP-1".to_owned()));

        app.handle(Event::Wake).await;
        app.reconcile().await.unwrap();
        assert_eq!(app.state.mode(), Mode::Normal);
        assert_eq!(app.state.suspended().count(), 0);
        assert!(app.state.display("DP-1").unwrap().enabled());
    }
}
