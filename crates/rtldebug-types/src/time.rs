//! Simulated time points and intervals.
//!
//! The debug server indexes its database by simulated time expressed as an
//! integral number of femtoseconds. On the wire a time point is written in
//! the server's textual form `"<secs>.<femtos>"` where the fractional part
//! has exactly 15 digits, so every value is an exact integer count of
//! femtoseconds.
//!
//! # Design Principles
//!
//! - Time is never negative: the type is unsigned, and offsets that would go
//!   below zero are reported instead of wrapping.
//! - All arithmetic is checked. Stepping searches multiply their step size by
//!   large powers of ten, so overflow is a real (if distant) possibility.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Number of femtoseconds in one second.
pub const FEMTOS_PER_SECOND: u128 = 1_000_000_000_000_000;

/// Number of digits in the fractional (femtosecond) part of the wire form.
const FEMTO_DIGITS: usize = 15;

/// Display units, largest first, paired with their size in femtoseconds.
const UNITS: [(u128, &str); 6] = [
    (1_000_000_000_000_000, "s"),
    (1_000_000_000_000, "ms"),
    (1_000_000_000, "us"),
    (1_000_000, "ns"),
    (1_000, "ps"),
    (1, "fs"),
];

/// Errors produced by time arithmetic and parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeError {
    /// The textual form of a time point could not be parsed.
    #[error("invalid time point {text:?}: {reason}")]
    Parse {
        /// The rejected input.
        text: String,
        /// Why the input was rejected.
        reason: &'static str,
    },

    /// An offset moved a time point below zero or past the representable range.
    #[error("time point {base} offset by {offset} fs is out of range")]
    OutOfRange {
        /// The time point being offset.
        base: TimePoint,
        /// The signed offset in femtoseconds.
        offset: i128,
    },

    /// An interval was constructed with `begin > end`.
    #[error("interval begins at {begin} after it ends at {end}")]
    InvertedInterval {
        /// Requested start of the interval.
        begin: TimePoint,
        /// Requested end of the interval.
        end: TimePoint,
    },
}

/// A point in simulated time, in femtoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimePoint {
    femtos: u128,
}

impl TimePoint {
    /// The beginning of simulated time.
    pub const ZERO: Self = Self { femtos: 0 };

    /// Create a time point from a femtosecond count.
    pub const fn from_femtos(femtos: u128) -> Self {
        Self { femtos }
    }

    /// Return the time point as a femtosecond count.
    pub const fn femtos(self) -> u128 {
        self.femtos
    }

    /// Return the whole-seconds part of the time point.
    pub const fn secs(self) -> u128 {
        self.femtos / FEMTOS_PER_SECOND
    }

    /// Return the sub-second part of the time point, in femtoseconds.
    pub const fn subsec_femtos(self) -> u128 {
        self.femtos % FEMTOS_PER_SECOND
    }

    /// Offset the time point by a signed number of femtoseconds.
    ///
    /// Returns `None` if the result would be negative or overflow.
    pub const fn checked_offset(self, femtos: i128) -> Option<Self> {
        match self.femtos.checked_add_signed(femtos) {
            Some(femtos) => Some(Self { femtos }),
            None => None,
        }
    }

    /// Offset the time point by a signed number of femtoseconds.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::OutOfRange`] if the result would be negative or
    /// overflow.
    pub fn offset_by_femtos(self, femtos: i128) -> Result<Self, TimeError> {
        self.checked_offset(femtos).ok_or(TimeError::OutOfRange {
            base: self,
            offset: femtos,
        })
    }

    /// Render the time point in the server's wire form (`"<secs>.<femtos>"`).
    pub fn to_wire(self) -> String {
        format!(
            "{}.{:0width$}",
            self.secs(),
            self.subsec_femtos(),
            width = FEMTO_DIGITS
        )
    }

    /// Parse a time point from the server's wire form.
    ///
    /// A missing fractional part is accepted (`"3"` is three seconds), and a
    /// fractional part shorter than 15 digits is read as a decimal fraction.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::Parse`] if the text is not a non-negative decimal
    /// with at most 15 fractional digits.
    pub fn from_wire(text: &str) -> Result<Self, TimeError> {
        let parse_error = |reason| TimeError::Parse {
            text: text.to_owned(),
            reason,
        };
        let (secs_text, femtos_text) = text.split_once('.').unwrap_or((text, ""));
        if secs_text.is_empty() || !secs_text.bytes().all(|b| b.is_ascii_digit()) {
            return Err(parse_error("seconds must be a non-negative integer"));
        }
        if femtos_text.len() > FEMTO_DIGITS || !femtos_text.bytes().all(|b| b.is_ascii_digit()) {
            return Err(parse_error("fraction must have at most 15 digits"));
        }
        let secs: u128 = secs_text
            .parse()
            .map_err(|_err| parse_error("seconds out of range"))?;
        let padded = format!("{femtos_text:0<width$}", width = FEMTO_DIGITS);
        let femtos: u128 = padded
            .parse()
            .map_err(|_err| parse_error("fraction out of range"))?;
        secs.checked_mul(FEMTOS_PER_SECOND)
            .and_then(|whole| whole.checked_add(femtos))
            .map(Self::from_femtos)
            .ok_or_else(|| parse_error("time point overflows"))
    }
}

impl fmt::Display for TimePoint {
    /// Render in the largest unit that represents the value exactly,
    /// e.g. `150 ns` or `2 s`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.femtos == 0 {
            return f.write_str("0 s");
        }
        for (scale, unit) in UNITS {
            if self.femtos.checked_rem(scale) == Some(0) {
                let count = self.femtos.checked_div(scale).unwrap_or(self.femtos);
                return write!(f, "{count} {unit}");
            }
        }
        write!(f, "{} fs", self.femtos)
    }
}

impl FromStr for TimePoint {
    type Err = TimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_wire(s)
    }
}

impl Serialize for TimePoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_wire())
    }
}

impl<'de> Deserialize<'de> for TimePoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::from_wire(&text).map_err(serde::de::Error::custom)
    }
}

/// A closed interval of simulated time, `[begin, end]`.
///
/// A single point is represented with `begin == end`. Serialized as a
/// two-element array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "(TimePoint, TimePoint)", into = "(TimePoint, TimePoint)")]
pub struct TimeInterval {
    begin: TimePoint,
    end: TimePoint,
}

impl TimeInterval {
    /// Create an interval.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::InvertedInterval`] if `begin > end`.
    pub fn new(begin: TimePoint, end: TimePoint) -> Result<Self, TimeError> {
        if begin > end {
            return Err(TimeError::InvertedInterval { begin, end });
        }
        Ok(Self { begin, end })
    }

    /// Create the degenerate interval `[time, time]`.
    pub const fn point(time: TimePoint) -> Self {
        Self {
            begin: time,
            end: time,
        }
    }

    /// Return the start of the interval.
    pub const fn begin(&self) -> TimePoint {
        self.begin
    }

    /// Return the end of the interval.
    pub const fn end(&self) -> TimePoint {
        self.end
    }

    /// Check whether `time` lies within the interval (inclusive).
    pub fn contains(&self, time: TimePoint) -> bool {
        self.begin <= time && time <= self.end
    }
}

impl TryFrom<(TimePoint, TimePoint)> for TimeInterval {
    type Error = TimeError;

    fn try_from((begin, end): (TimePoint, TimePoint)) -> Result<Self, Self::Error> {
        Self::new(begin, end)
    }
}

impl From<TimeInterval> for (TimePoint, TimePoint) {
    fn from(interval: TimeInterval) -> Self {
        (interval.begin, interval.end)
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.begin, self.end)
    }
}
