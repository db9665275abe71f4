use serde::{Deserialize, Serialize};
use std::fmt;

/// Positional and geometric settings of an output. This is the part of a
/// display that a configuration preset controls.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Geometry {
    pub width: i64,
    pub height: i64,
    pub refresh_rate: f64,
    #[serde(default)]
    pub x: i64,
    #[serde(default)]
    pub y: i64,
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_scale() -> f64 {
    1.0
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}@{},{}x{},{}",
            self.width, self.height, self.refresh_rate, self.x, self.y, self.scale
        )
    }
}

/// A physical output as reported by `hyprctl -j monitors all`.
///
/// Only the fields the daemon reasons about are kept; the rest of the
/// compositor's runtime data is ignored on deserialization.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Display {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub make: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub serial: String,
    #[serde(default)]
    pub width: i64,
    #[serde(default)]
    pub height: i64,
    #[serde(default)]
    pub refresh_rate: f64,
    #[serde(default)]
    pub x: i64,
    #[serde(default)]
    pub y: i64,
    #[serde(default)]
    pub scale: f64,
    #[serde(default)]
    pub transform: i64,
    #[serde(default)]
    pub focused: bool,
    #[serde(default)]
    pub disabled: bool,
}

impl Display {
    pub fn enabled(&self) -> bool {
        !self.disabled
    }

    pub fn geometry(&self) -> Geometry {
        Geometry {
            width: self.width,
            height: self.height,
            refresh_rate: self.refresh_rate,
            x: self.x,
            y: self.y,
            scale: self.scale,
        }
    }

    /// The same physical output carrying `geometry` instead of its current
    /// settings, marked enabled.
    pub fn with_geometry(&self, geometry: Geometry) -> Self {
        Self {
            width: geometry.width,
            height: geometry.height,
            refresh_rate: geometry.refresh_rate,
            x: geometry.x,
            y: geometry.y,
            scale: geometry.scale,
            disabled: false,
            ..self.clone()
        }
    }

    /// The `hyprctl keyword monitor` rule enabling this output with its
    /// current geometry.
    pub fn rule(&self) -> String {
        format!("{},{}", self.name, self.geometry())
    }
}

/// Whether applying `target` to the `observed` output would change anything.
///
/// Only geometry is compared: the observed record carries runtime fields
/// (focus, ids, transform) that a configured target never sets.
pub fn changes_needed(target: &Display, observed: &Display) -> bool {
    target.geometry() != observed.geometry()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn display(name: &str, width: i64, height: i64, x: i64) -> Display {
        Display {
            name: name.to_string(),
            description: format!("{name} panel"),
            width,
            height,
            refresh_rate: 60.0,
            x,
            scale: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn identifier_differences_need_no_change() {
        let a = display("DP-1", 2560, 1440, 0);
        let b = Display {
            id: 7,
            description: "other".to_string(),
            make: "ACME".to_string(),
            model: "X1".to_string(),
            serial: "123".to_string(),
            focused: true,
            transform: 1,
            ..a.clone()
        };

        assert!(!changes_needed(&a, &b));
        assert!(!changes_needed(&b, &a));
    }

    #[test]
    fn geometry_differences_need_change() {
        let a = display("DP-1", 2560, 1440, 0);

        assert!(changes_needed(&a, &display("DP-1", 3840, 2160, 0)));
        assert!(changes_needed(&a, &display("DP-1", 2560, 1440, 1920)));
        assert!(changes_needed(
            &a,
            &Display {
                scale: 1.5,
                ..a.clone()
            }
        ));
    }

    #[test]
    fn rule_renders_hyprland_monitor_keyword() {
        let d = Display {
            refresh_rate: 59.95,
            scale: 1.25,
            y: 120,
            ..display("eDP-1", 1920, 1200, 3440)
        };

        assert_eq!(d.rule(), "eDP-1,1920x1200@59.95,3440x120,1.25");
    }

    #[test]
    fn with_geometry_keeps_identity_and_enables() {
        let d = Display {
            disabled: true,
            ..display("DP-2", 1920, 1080, 0)
        };
        let g = Geometry {
            width: 3840,
            height: 2160,
            refresh_rate: 120.0,
            x: 0,
            y: 0,
            scale: 1.5,
        };

        let merged = d.with_geometry(g);
        assert_eq!(merged.name, "DP-2");
        assert_eq!(merged.description, d.description);
        assert_eq!(merged.geometry(), g);
        assert!(merged.enabled());
    }
}
