//! PV value type and numeric helpers.

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// Value carried by a process variable.
///
/// EPICS records expose doubles, longs (including enum indices) and strings.
/// Backends convert to and from their native representation at the edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PvValue {
    /// Integer value or enum index.
    Long(i64),
    /// Floating-point value.
    Double(f64),
    /// String value.
    Text(String),
}

impl PvValue {
    /// Numeric view of the value. Text is parsed if it holds a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Long(v) => Some(*v as f64),
            Self::Double(v) => Some(*v),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Integer view of the value. Doubles are accepted only when integral.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Long(v) => Some(*v),
            Self::Double(v) if v.fract() == 0.0 => Some(*v as i64),
            Self::Double(_) => None,
            Self::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Truth value of a status PV: non-zero numbers and non-empty text
    /// other than `"0"` are true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Long(v) => *v != 0,
            Self::Double(v) => *v != 0.0,
            Self::Text(s) => {
                let s = s.trim();
                !s.is_empty() && s != "0"
            }
        }
    }

    /// Convert a TOML scalar (as used for `initial` and link values).
    pub fn from_toml(value: &toml::Value) -> Option<Self> {
        match value {
            toml::Value::Integer(i) => Some(Self::Long(*i)),
            toml::Value::Float(f) => Some(Self::Double(*f)),
            toml::Value::String(s) => Some(Self::Text(s.clone())),
            toml::Value::Boolean(b) => Some(Self::Long(i64::from(*b))),
            _ => None,
        }
    }
}

impl fmt::Display for PvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl FromStr for PvValue {
    type Err = std::convert::Infallible;

    /// Integers become `Long`, other numbers `Double`, anything else `Text`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            return Ok(Self::Long(i));
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            return Ok(Self::Double(f));
        }
        Ok(Self::Text(s.to_string()))
    }
}

impl From<f64> for PvValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<i64> for PvValue {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<&str> for PvValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// Round `value` to `decimals` places for display.
#[inline]
pub fn round_decimals(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round_ties_even() / scale
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_to_two_decimals() {
        assert_eq!(round_decimals(12.3456, 2), 12.35);
        assert_eq!(round_decimals(-0.004, 2), -0.0);
        assert_eq!(round_decimals(100.0, 2), 100.0);
    }

    #[test]
    fn round_decimals_ties_go_to_even() {
        assert_eq!(round_decimals(12.125, 2), 12.12);
        assert_eq!(round_decimals(12.375, 2), 12.38);
        assert_eq!(round_decimals(-0.125, 2), -0.12);
        assert_eq!(round_decimals(2.5, 0), 2.0);
    }

    #[test]
    fn parse_prefers_integers() {
        assert_eq!("1".parse::<PvValue>().unwrap(), PvValue::Long(1));
        assert_eq!("-2.5".parse::<PvValue>().unwrap(), PvValue::Double(-2.5));
        assert_eq!(
            "Writing".parse::<PvValue>().unwrap(),
            PvValue::Text("Writing".into())
        );
    }

    #[test]
    fn numeric_views() {
        assert_eq!(PvValue::Long(3).as_f64(), Some(3.0));
        assert_eq!(PvValue::Double(2.0).as_i64(), Some(2));
        assert_eq!(PvValue::Double(2.5).as_i64(), None);
        assert_eq!(PvValue::Text(" 7.25 ".into()).as_f64(), Some(7.25));
        assert_eq!(PvValue::Text("Done".into()).as_f64(), None);
    }

    #[test]
    fn truthiness_of_status_values() {
        assert!(PvValue::Long(1).is_truthy());
        assert!(!PvValue::Long(0).is_truthy());
        assert!(!PvValue::Double(0.0).is_truthy());
        assert!(!PvValue::Text("0".into()).is_truthy());
        assert!(PvValue::Text("Acquiring".into()).is_truthy());
    }

    #[test]
    fn from_toml_scalars() {
        assert_eq!(
            PvValue::from_toml(&toml::Value::Integer(4)),
            Some(PvValue::Long(4))
        );
        assert_eq!(
            PvValue::from_toml(&toml::Value::Boolean(true)),
            Some(PvValue::Long(1))
        );
        assert_eq!(PvValue::from_toml(&toml::Value::Array(vec![])), None);
    }
}
