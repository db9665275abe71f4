use super::{Compositor, CompositorError, Display, check_reply};
use anyhow::Context;
use log::debug;
use std::{env, ffi::OsStr, path::PathBuf};
use tokio::process::Command;

const BINARY_NAME: &str = "hyprctl";

/// Drives Hyprland through its `hyprctl` control binary.
#[derive(Debug, Clone)]
pub struct Hyprctl {
    binary: PathBuf,
}

impl Hyprctl {
    /// Finds `hyprctl` on `PATH`.
    pub fn locate() -> anyhow::Result<Self> {
        let path = env::var_os("PATH").context("PATH is not set")?;

        Self::locate_in(path)
    }

    /// Finds the first executable `hyprctl` in a `PATH`-style list.
    fn locate_in(paths: impl AsRef<OsStr>) -> anyhow::Result<Self> {
        let cwd = env::current_dir().context("reading working directory")?;
        let binary = which::which_in(BINARY_NAME, Some(paths), cwd)
            .with_context(|| format!("could not find {BINARY_NAME} on PATH"))?;
        debug!("using {}", binary.display());

        Ok(Self { binary })
    }

    async fn run(&self, args: &[&str]) -> Result<String, CompositorError> {
        debug!("running {} {}", BINARY_NAME, args.join(" "));

        let output = Command::new(&self.binary).args(args).output().await?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        if !stderr.is_empty() {
            return Err(CompositorError::Command(stderr.to_string()));
        }

        if !output.status.success() {
            return Err(CompositorError::Command(format!(
                "{BINARY_NAME} exited with {}",
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        check_reply(&stdout)?;

        Ok(stdout)
    }
}

impl Compositor for Hyprctl {
    async fn list_displays(&self) -> Result<Vec<Display>, CompositorError> {
        let reply = self.run(&["-j", "monitors", "all"]).await?;

        parse_displays(&reply)
    }

    async fn enable_or_update(&self, display: &Display) -> Result<(), CompositorError> {
        self.run(&["keyword", "monitor", &display.rule()]).await?;

        Ok(())
    }

    async fn disable(&self, display: &Display) -> Result<(), CompositorError> {
        let rule = format!("{},disable", display.name);
        self.run(&["keyword", "monitor", &rule]).await?;

        Ok(())
    }
}

fn parse_displays(reply: &str) -> Result<Vec<Display>, CompositorError> {
    Ok(serde_json::from_str(reply)?)
}
