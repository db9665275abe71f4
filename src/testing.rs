//! Fixtures shared by the unit tests.

use crate::services::compositor::{Compositor, CompositorError, Display};
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

pub fn display(name: &str, width: i64, height: i64) -> Display {
    Display {
        name: name.to_string(),
        description: format!("{name} panel"),
        width,
        height,
        refresh_rate: 60.0,
        scale: 1.0,
        ..Default::default()
    }
}

pub fn laptop() -> Display {
    Display {
        description: "China Star Optoelectronics Technology Co. Ltd MNE007JA1-3".to_string(),
        refresh_rate: 60.001,
        x: 3440,
        scale: 1.25,
        ..display("eDP-1", 1920, 1200)
    }
}

pub fn external() -> Display {
    Display {
        description: "Samsung Electric Company Odyssey G85SD H1AK500000".to_string(),
        refresh_rate: 174.96201,
        ..display("DP-1", 3440, 1440)
    }
}

pub fn external2() -> Display {
    Display {
        x: -1920,
        ..display("HDMI-A-1", 1920, 1080)
    }
}

#[derive(Debug, Default)]
struct Inner {
    displays: Vec<Display>,
    failing: HashSet<String>,
    calls: Vec<String>,
}

/// In-memory compositor. Clones share the same outputs.
#[derive(Debug, Clone, Default)]
pub struct FakeCompositor(Arc<Mutex<Inner>>);

impl FakeCompositor {
    pub fn new(displays: Vec<Display>) -> Self {
        Self(Arc::new(Mutex::new(Inner {
            displays,
            ..Default::default()
        })))
    }

    pub fn fail_on(&self, name: &str) {
        self.0.lock().unwrap().failing.insert(name.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().calls.clone()
    }

    pub fn displays(&self) -> Vec<Display> {
        self.0.lock().unwrap().displays.clone()
    }

    fn record(&self, call: String, name: &str) -> Result<(), CompositorError> {
        let mut inner = self.0.lock().unwrap();
        inner.calls.push(call);
        if inner.failing.contains(name) {
            return Err(CompositorError::Command(format!("{name} refused")));
        }
        Ok(())
    }
}

impl Compositor for FakeCompositor {
    async fn list_displays(&self) -> Result<Vec<Display>, CompositorError> {
        Ok(self.displays())
    }

    async fn enable_or_update(&self, display: &Display) -> Result<(), CompositorError> {
        self.record(format!("enable {}", display.name), &display.name)?;

        let mut inner = self.0.lock().unwrap();
        match inner.displays.iter_mut().find(|d| d.name == display.name) {
            Some(current) => *current = current.with_geometry(display.geometry()),
            None => inner.displays.push(display.clone()),
        }
        Ok(())
    }

    async fn disable(&self, display: &Display) -> Result<(), CompositorError> {
        self.record(format!("disable {}", display.name), &display.name)?;

        let mut inner = self.0.lock().unwrap();
        if let Some(current) = inner.displays.iter_mut().find(|d| d.name == display.name) {
            current.disabled = true;
        }
        Ok(())
    }
}
