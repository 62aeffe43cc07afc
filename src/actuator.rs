//! Binary indicator output driven by the fleet average.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const THRESHOLD_CELSIUS: f32 = 25.0;
pub const DEFAULT_SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

pub trait Actuator {
    /// Drive the output. Idempotent; failures are handled by the implementation.
    fn set_level(&mut self, on: bool);
}

impl<A: Actuator + ?Sized> Actuator for Box<A> {
    fn set_level(&mut self, on: bool) {
        (**self).set_level(on);
    }
}

/// Indicator level for a fleet average: ON strictly above `threshold`.
/// No average means no decision, and the caller keeps the previous level.
pub fn decide(average: Option<f32>, threshold: f32) -> Option<bool> {
    average.map(|avg| avg > threshold)
}

/// Actuator without hardware: keeps the level and logs each write at debug.
#[derive(Debug, Default)]
pub struct LogActuator {
    level: Option<bool>,
    writes: u32,
}

impl LogActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last level written, `None` if never driven.
    pub fn level(&self) -> Option<bool> {
        self.level
    }

    pub fn writes(&self) -> u32 {
        self.writes
    }
}

impl Actuator for LogActuator {
    fn set_level(&mut self, on: bool) {
        debug!("Indicator level {}", if on { "ON" } else { "OFF" });
        self.level = Some(on);
        self.writes = self.writes.wrapping_add(1);
    }
}

/// Output pin driven through the Linux sysfs GPIO interface.
#[derive(Debug)]
pub struct SysfsGpioActuator {
    pin: u8,
    value_path: PathBuf,
    level: Option<bool>,
}

impl SysfsGpioActuator {
    pub fn new(pin: u8) -> io::Result<Self> {
        Self::with_root(DEFAULT_SYSFS_GPIO_ROOT, pin)
    }

    /// Export `pin` under `root` if needed and configure it as an output.
    pub fn with_root<P: AsRef<Path>>(root: P, pin: u8) -> io::Result<Self> {
        let root = root.as_ref();
        let pin_dir = root.join(format!("gpio{}", pin));

        if !pin_dir.exists() {
            debug!("Exporting GPIO {} under {}", pin, root.display());
            fs::write(root.join("export"), pin.to_string())?;
        }
        fs::write(pin_dir.join("direction"), "out")?;

        info!("GPIO {} configured as indicator output", pin);
        Ok(Self {
            pin,
            value_path: pin_dir.join("value"),
            level: None,
        })
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    pub fn level(&self) -> Option<bool> {
        self.level
    }
}

impl Actuator for SysfsGpioActuator {
    fn set_level(&mut self, on: bool) {
        match fs::write(&self.value_path, if on { "1" } else { "0" }) {
            Ok(()) => {
                debug!("GPIO {} -> {}", self.pin, if on { "1" } else { "0" });
                self.level = Some(on);
            }
            Err(e) => warn!("Failed to write GPIO {}: {}", self.pin, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decide_threshold_is_strict() {
        assert_eq!(decide(Some(25.0), THRESHOLD_CELSIUS), Some(false));
        assert_eq!(decide(Some(25.0001), THRESHOLD_CELSIUS), Some(true));
        assert_eq!(decide(Some(-3.5), THRESHOLD_CELSIUS), Some(false));
        assert_eq!(decide(None, THRESHOLD_CELSIUS), None);
    }

    #[test]
    fn test_log_actuator_tracks_level() {
        let mut actuator = LogActuator::new();
        assert_eq!(actuator.level(), None);

        actuator.set_level(true);
        actuator.set_level(true);
        assert_eq!(actuator.level(), Some(true));
        assert_eq!(actuator.writes(), 2);

        actuator.set_level(false);
        assert_eq!(actuator.level(), Some(false));
    }

    #[test]
    fn test_sysfs_gpio_writes_value_file() {
        let root = tempfile::tempdir().unwrap();
        // Pretend the pin is already exported
        fs::create_dir_all(root.path().join("gpio25")).unwrap();

        let mut actuator = SysfsGpioActuator::with_root(root.path(), 25).unwrap();
        assert_eq!(fs::read_to_string(root.path().join("gpio25/direction")).unwrap(), "out");

        actuator.set_level(true);
        assert_eq!(fs::read_to_string(root.path().join("gpio25/value")).unwrap(), "1");
        assert_eq!(actuator.level(), Some(true));

        actuator.set_level(false);
        assert_eq!(fs::read_to_string(root.path().join("gpio25/value")).unwrap(), "0");
    }

    #[test]
    fn test_sysfs_gpio_exports_missing_pin() {
        let root = tempfile::tempdir().unwrap();

        // Nothing creates gpio7/ here, so configuring the direction fails
        // after the export request is written
        assert!(SysfsGpioActuator::with_root(root.path(), 7).is_err());
        assert_eq!(fs::read_to_string(root.path().join("export")).unwrap(), "7");
    }

    #[test]
    fn test_sysfs_gpio_missing_root_fails() {
        let root = tempfile::tempdir().unwrap();
        assert!(SysfsGpioActuator::with_root(root.path().join("absent"), 7).is_err());
    }

    #[test]
    fn test_failed_write_keeps_previous_level() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("gpio3")).unwrap();
        let mut actuator = SysfsGpioActuator::with_root(root.path(), 3).unwrap();
        actuator.set_level(true);

        fs::remove_dir_all(root.path().join("gpio3")).unwrap();
        actuator.set_level(false);
        assert_eq!(actuator.level(), Some(true));
    }
}
