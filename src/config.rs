use crate::{
    event::Event,
    monitors::{self, MonitorConfig, MonitorConfigMap, MonitorIdentifiers},
    services::{compositor::Display, forward},
};
use anyhow::{Context, anyhow, bail};
use futures::StreamExt;
use inotify::{Inotify, WatchMask};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    collections::hash_map::DefaultHasher,
    fs,
    hash::{Hash, Hasher},
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{sync::mpsc::Sender, time::sleep};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_CONFIG_PATH: &str = "~/.config/hyprdock/config.toml";
pub const DEFAULT_PRESET: &str = "default";
pub const RELOAD_ATTEMPTS: u32 = 5;
const RETRY_STEP: Duration = Duration::from_millis(50);

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq)]
pub struct ConditionsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lid_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_state: Option<String>,
    #[serde(default)]
    pub enabled_monitors: Vec<String>,
    #[serde(default)]
    pub disabled_monitors: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct TargetConfig {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    #[serde(default)]
    pub disable: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ProfileConfig {
    pub name: String,
    #[serde(default)]
    pub disable_undeclared: bool,
    #[serde(default)]
    pub conditions: ConditionsConfig,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Label of the built-in panel.
    #[serde(default = "default_laptop_label")]
    pub laptop: String,
    /// Preset the status-driven planner applies when a display's label has
    /// one by this name.
    #[serde(default = "default_fallback_preset")]
    pub fallback_preset: String,
    /// Treat logind sleep/resume like the suspend/wake commands.
    #[serde(default)]
    pub follow_system_sleep: bool,
    #[serde(default)]
    pub monitors: MonitorConfigMap,
    #[serde(default)]
    pub profiles: Vec<ProfileConfig>,
}

fn default_log_level() -> String {
    "warn".to_owned()
}

fn default_laptop_label() -> String {
    "laptop".to_owned()
}

fn default_fallback_preset() -> String {
    DEFAULT_PRESET.to_owned()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            laptop: default_laptop_label(),
            fallback_preset: default_fallback_preset(),
            follow_system_sleep: false,
            monitors: MonitorConfigMap::new(),
            profiles: Vec::new(),
        }
    }
}

pub fn default_path() -> PathBuf {
    expand_path(Path::new(DEFAULT_CONFIG_PATH))
}

pub fn expand_path(path: &Path) -> PathBuf {
    shellexpand::path::tilde(path).into_owned()
}

impl Config {
    pub fn log_level(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or_else(|_| {
            warn!("invalid log level {:?}; using warn", self.log_level);
            log::LevelFilter::Warn
        })
    }

    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        Self::parse(&content, path)
    }

    /// Like [`Config::read`], but an empty file counts as a write still in
    /// progress rather than as an all-defaults config.
    fn read_settled(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        if content.trim().is_empty() {
            bail!("config file {} is empty", path.display());
        }

        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> anyhow::Result<Self> {
        toml::from_str(content).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Reads the config, writing a default one first if there is none.
    pub fn load_or_create(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            info!("no config file at {}; creating default", path.display());
            let config = Self::default();
            config.write(path)?;
            return Ok(config);
        }

        Self::read(path)
    }

    /// Re-reads the config, tolerating editors that are still writing it.
    /// Waits 50ms, 100ms, 150ms, ... between attempts.
    pub async fn read_with_retry(path: &Path, attempts: u32) -> anyhow::Result<Self> {
        let mut last_err = None;

        for attempt in 1..=attempts {
            match Self::read_settled(path) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    debug!("config read attempt {attempt}/{attempts} failed: {e:#}");
                    last_err = Some(e);
                    if attempt < attempts {
                        sleep(RETRY_STEP * attempt).await;
                    }
                }
            }
        }

        let err = last_err.unwrap_or_else(|| anyhow!("no read attempted"));
        Err(err.context(format!("config read failed after {attempts} attempts")))
    }

    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating config directory {}", dir.display()))?;
        }

        let content = toml::to_string_pretty(self).context("serializing config")?;
        fs::write(path, content).with_context(|| format!("writing {}", path.display()))
    }

    /// Records the given displays as labels with a `default` preset holding
    /// their current geometry. Returns `(label, connector)` pairs.
    ///
    /// The laptop panel is stored under the configured laptop label, every
    /// other display under its lowercased connector name. Disabled displays
    /// are skipped since their geometry is meaningless.
    pub fn absorb_displays(
        &mut self,
        displays: &[Display],
        laptop: Option<&str>,
    ) -> anyhow::Result<Vec<(String, String)>> {
        let laptop_name = match laptop {
            Some(name) => displays
                .iter()
                .find(|d| d.name == name)
                .map(|d| d.name.clone())
                .ok_or_else(|| anyhow!("display '{name}' not found"))?,
            None => displays
                .iter()
                .find(|d| monitors::is_builtin_panel(&d.name))
                .map(|d| d.name.clone())
                .ok_or_else(|| anyhow!("could not identify the laptop display; pass --laptop"))?,
        };

        let mut saved = Vec::new();
        for display in displays.iter().filter(|d| d.enabled()) {
            let label = if display.name == laptop_name {
                self.laptop.clone()
            } else {
                display.name.to_lowercase()
            };

            let entry = self.monitors.entry(label.clone()).or_default();
            entry.identifiers = MonitorIdentifiers {
                name: Some(display.name.clone()),
                description: Some(display.description.clone()).filter(|d| !d.is_empty()),
                ..Default::default()
            };
            entry
                .presets
                .insert(DEFAULT_PRESET.to_owned(), display.geometry());

            saved.push((label, display.name.clone()));
        }

        Ok(saved)
    }

    pub fn monitor(&self, label: &str) -> Option<&MonitorConfig> {
        self.monitors.get(label)
    }
}

fn content_hash(path: &Path) -> Option<u64> {
    let content = fs::read(path).ok()?;
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    Some(hasher.finish())
}

/// Watches the config file's directory and emits a freshly parsed config
/// whenever the file's content changes.
pub async fn watch(
    path: PathBuf,
    tx: Sender<Event>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let dir = path
        .parent()
        .context("config path has no parent directory")?
        .to_path_buf();
    let file_name = path
        .file_name()
        .context("config path has no file name")?
        .to_os_string();

    let inotify = Inotify::init().context("initializing inotify")?;
    inotify
        .watches()
        .add(&dir, WatchMask::CLOSE_WRITE.union(WatchMask::MOVED_TO))
        .with_context(|| format!("watching {}", dir.display()))?;

    let buffer = [0; 1024];
    let mut stream = inotify
        .into_event_stream(buffer)
        .context("creating config watch stream")?;

    info!("watching {} for changes", path.display());
    let mut last_hash = content_hash(&path);

    loop {
        let event = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            event = stream.next() => event,
        };

        let Some(event) = event else {
            bail!("config watch stream ended");
        };
        let event = event.context("reading config watch event")?;

        if event.name.as_deref() != Some(file_name.as_os_str()) {
            continue;
        }

        let hash = content_hash(&path);
        if hash.is_none() || hash == last_hash {
            debug!("config file touched without content change");
            continue;
        }
        last_hash = hash;

        match Config::read_with_retry(&path, RELOAD_ATTEMPTS).await {
            Ok(config) => {
                info!("config file changed");
                if !forward(&tx, &token, Event::ConfigReloaded(Box::new(config))).await {
                    return Ok(());
                }
            }
            Err(e) => warn!("ignoring config change: {e:#}"),
        }
    }
}
