//! Page ordinal with one decimal place.

use crate::error::{AppError, Result};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Position of a page in its book's reading order.
///
/// Stored as a count of tenths so `2.5` sorts between `2` and `3` and
/// uniqueness checks stay exact. Zero means "not assigned yet".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageNumber(u32);

impl PageNumber {
    /// Highest representable page number (9999.9).
    pub const MAX: PageNumber = PageNumber(99_999);

    /// Number given to the first page of an empty book.
    pub const FIRST: PageNumber = PageNumber(10);

    /// Build from a raw count of tenths.
    pub fn from_tenths(tenths: i64) -> Result<Self> {
        if !(0..=Self::MAX.0 as i64).contains(&tenths) {
            return Err(AppError::Validation(format!(
                "Page number must be between 0 and 9999.9, got {}",
                tenths as f64 / 10.0
            )));
        }
        Ok(Self(tenths as u32))
    }

    /// Build from a whole page number.
    pub fn whole(n: u32) -> Result<Self> {
        Self::from_tenths(n as i64 * 10)
    }

    /// Raw count of tenths.
    pub fn tenths(self) -> i64 {
        self.0 as i64
    }

    /// Whether this number asks for automatic assignment.
    pub fn is_unset(self) -> bool {
        self.0 == 0
    }

    /// Next number after the current highest one in a book.
    pub fn after(max: Option<PageNumber>) -> Result<Self> {
        match max {
            Some(max) if !max.is_unset() => Self::from_tenths(max.tenths() + 10),
            _ => Ok(Self::FIRST),
        }
    }

    fn from_f64(value: f64) -> Result<Self> {
        let scaled = value * 10.0;
        let rounded = scaled.round();
        if !value.is_finite() || (scaled - rounded).abs() > 1e-6 {
            return Err(AppError::Validation(format!(
                "Page number must have at most one decimal place, got {}",
                value
            )));
        }
        Self::from_tenths(rounded as i64)
    }
}

impl fmt::Display for PageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % 10 == 0 {
            write!(f, "{}", self.0 / 10)
        } else {
            write!(f, "{}.{}", self.0 / 10, self.0 % 10)
        }
    }
}

impl FromStr for PageNumber {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let value: f64 = s
            .trim()
            .parse()
            .map_err(|_| AppError::Validation(format!("Invalid page number: {}", s)))?;
        Self::from_f64(value)
    }
}

impl Serialize for PageNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.0 as f64 / 10.0)
    }
}

impl<'de> Deserialize<'de> for PageNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }

        let parsed = match Raw::deserialize(deserializer)? {
            Raw::Number(n) => PageNumber::from_f64(n),
            Raw::Text(s) => s.parse(),
        };
        parsed.map_err(serde::de::Error::custom)
    }
}

impl ToSql for PageNumber {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.tenths()))
    }
}

impl FromSql for PageNumber {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let tenths = i64::column_result(value)?;
        PageNumber::from_tenths(tenths).map_err(|_| FromSqlError::OutOfRange(tenths))
    }
}
