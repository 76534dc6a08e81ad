//! Control names, ranges and labels

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// A named control on the rig
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlKey {
    /// Light brightness in percent
    Brightness,
    /// Motor frequency in Hz; the sign is the direction of rotation
    Frequency,
}

impl ControlKey {
    pub const ALL: [ControlKey; 2] = [ControlKey::Brightness, ControlKey::Frequency];

    /// Wire name of the control
    pub fn as_str(self) -> &'static str {
        match self {
            ControlKey::Brightness => "brightness",
            ControlKey::Frequency => "frequency",
        }
    }

    /// Values the control server accepts
    ///
    /// Brightness is capped at 50 on the server side to limit heat.
    pub fn range(self) -> RangeInclusive<i32> {
        match self {
            ControlKey::Brightness => 0..=50,
            ControlKey::Frequency => -2000..=2000,
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            ControlKey::Brightness => "%",
            ControlKey::Frequency => "Hz",
        }
    }

    /// Label shown next to the slider, e.g. `"30 %"` or `"-500 Hz"`
    pub fn label(self, value: i32) -> String {
        format!("{} {}", value, self.unit())
    }

    /// Check `value` against [`range`](Self::range)
    pub fn check(self, value: i32) -> Result<i32> {
        let range = self.range();
        if range.contains(&value) {
            Ok(value)
        } else {
            Err(Error::OutOfRange {
                key: self,
                min: *range.start(),
                max: *range.end(),
            })
        }
    }

    /// Event the server uses to push the current value
    pub fn current_event(self) -> &'static str {
        match self {
            ControlKey::Brightness => "current_brightness",
            ControlKey::Frequency => "current_frequency",
        }
    }
}

impl fmt::Display for ControlKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "brightness" | "light" => Ok(ControlKey::Brightness),
            "frequency" | "motor" => Ok(ControlKey::Frequency),
            _ => Err(Error::UnknownControl(s.to_string())),
        }
    }
}

/// A value for one control, waiting to be sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlChange {
    pub key: ControlKey,
    pub value: i32,
}

impl ControlChange {
    pub fn new(key: ControlKey, value: i32) -> Self {
        Self { key, value }
    }

    pub fn brightness(value: i32) -> Self {
        Self::new(ControlKey::Brightness, value)
    }

    pub fn frequency(value: i32) -> Self {
        Self::new(ControlKey::Frequency, value)
    }
}

impl fmt::Display for ControlChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        assert_eq!(ControlKey::Brightness.label(30), "30 %");
        assert_eq!(ControlKey::Frequency.label(-500), "-500 Hz");
    }

    #[test]
    fn test_ranges() {
        assert!(ControlKey::Brightness.check(50).is_ok());
        assert!(ControlKey::Brightness.check(51).is_err());
        assert!(ControlKey::Frequency.check(-2000).is_ok());
        assert!(ControlKey::Frequency.check(2001).is_err());
    }

    #[test]
    fn test_parse_key() {
        assert_eq!("Brightness".parse::<ControlKey>().unwrap(), ControlKey::Brightness);
        assert_eq!("motor".parse::<ControlKey>().unwrap(), ControlKey::Frequency);
        assert!("volume".parse::<ControlKey>().is_err());
    }

    #[test]
    fn test_change_display() {
        assert_eq!(ControlChange::frequency(1000).to_string(), "frequency=1000");
    }
}
