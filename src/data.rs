//! Typed cell values and the per-datatype parse functions.
//!
//! Every datatype declared in a model document maps onto one [`DataType`]
//! variant, and [`parse_typed_value()`] is the single place where raw source
//! text becomes a [`Value`]. Dates keep the granularity they were written
//! with so that a year-only `time` column still prints as `2009`.

use std::{cmp::Ordering, fmt};

use chrono::{Datelike, NaiveDate};
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::schema::DataType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Granularity {
    Year,
    Month,
    Day,
}

/// A calendar date together with the precision it was recorded at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DatePeriod {
    pub date: NaiveDate,
    pub granularity: Granularity,
}

impl DatePeriod {
    pub fn year(&self) -> i32 {
        self.date.year()
    }

    pub fn year_label(&self) -> String {
        format!("{:04}", self.date.year())
    }

    pub fn month_label(&self) -> String {
        format!("{:04}-{:02}", self.date.year(), self.date.month())
    }
}

impl Ord for DatePeriod {
    fn cmp(&self, other: &Self) -> Ordering {
        self.date
            .cmp(&other.date)
            .then_with(|| self.granularity.cmp(&other.granularity))
    }
}

impl PartialOrd for DatePeriod {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for DatePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.granularity {
            Granularity::Year => write!(f, "{}", self.year_label()),
            Granularity::Month => write!(f, "{}", self.month_label()),
            Granularity::Day => write!(f, "{}", self.date.format("%Y-%m-%d")),
        }
    }
}

/// Equality and ordering agree: numbers compare by magnitude across
/// `Integer`/`Float`, and `-0.0` equals `0.0`.
#[derive(Debug, Clone)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Date(DatePeriod),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for Value {}

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Date(d) => d.to_string(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view used when summing measures.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Empty strings stand in for attributes the source row did not populate.
    pub fn is_blank(&self) -> bool {
        matches!(self, Value::String(s) if s.is_empty())
    }

    fn rank(&self) -> u8 {
        match self {
            Value::String(_) => 0,
            Value::Integer(_) => 1,
            Value::Float(_) => 2,
            Value::Boolean(_) => 3,
            Value::Date(_) => 4,
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => unsigned_zero(*a).total_cmp(&unsigned_zero(*b)),
            (Value::Integer(a), Value::Float(b)) => (*a as f64).total_cmp(&unsigned_zero(*b)),
            (Value::Float(a), Value::Integer(b)) => unsigned_zero(*a).total_cmp(&(*b as f64)),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

fn unsigned_zero(value: f64) -> f64 {
    if value == 0.0 { 0.0 } else { value }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::String(s) => serializer.serialize_str(s),
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Boolean(b) => serializer.serialize_bool(*b),
            Value::Date(d) => serializer.collect_str(d),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueParseError {
    #[error("'{0}' is not an integer")]
    Integer(String),
    #[error("'{0}' is not a finite number")]
    Float(String),
    #[error("'{0}' is not a boolean")]
    Boolean(String),
    #[error("'{0}' is not a year, year-month or calendar date")]
    Date(String),
}

pub fn parse_date_period(value: &str) -> Result<DatePeriod, ValueParseError> {
    const DAY_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y"];
    let trimmed = value.trim();
    let invalid = || ValueParseError::Date(value.to_string());

    if trimmed.len() == 4 && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        let year: i32 = trimmed.parse().map_err(|_| invalid())?;
        let date = NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(invalid)?;
        return Ok(DatePeriod {
            date,
            granularity: Granularity::Year,
        });
    }
    if let Some((year, month)) = trimmed.split_once('-')
        && year.len() == 4
        && (1..=2).contains(&month.len())
        && year.bytes().chain(month.bytes()).all(|b| b.is_ascii_digit())
    {
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        let date = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
        return Ok(DatePeriod {
            date,
            granularity: Granularity::Month,
        });
    }
    for fmt in DAY_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Ok(DatePeriod {
                date,
                granularity: Granularity::Day,
            });
        }
    }
    Err(invalid())
}

pub fn parse_boolean(value: &str) -> Result<bool, ValueParseError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Ok(true),
        "false" | "f" | "no" | "n" | "0" => Ok(false),
        _ => Err(ValueParseError::Boolean(value.to_string())),
    }
}

pub fn parse_float(value: &str) -> Result<f64, ValueParseError> {
    let parsed: f64 = value
        .trim()
        .parse()
        .map_err(|_| ValueParseError::Float(value.to_string()))?;
    if !parsed.is_finite() {
        return Err(ValueParseError::Float(value.to_string()));
    }
    Ok(unsigned_zero(parsed))
}

/// Coerces raw source text to `ty`. Strings pass through untouched.
pub fn parse_typed_value(value: &str, ty: DataType) -> Result<Value, ValueParseError> {
    let parsed = match ty {
        DataType::String => Value::String(value.to_string()),
        DataType::Integer => {
            let parsed: i64 = value
                .trim()
                .parse()
                .map_err(|_| ValueParseError::Integer(value.to_string()))?;
            Value::Integer(parsed)
        }
        DataType::Float => Value::Float(parse_float(value)?),
        DataType::Boolean => Value::Boolean(parse_boolean(value)?),
        DataType::Date => Value::Date(parse_date_period(value)?),
    };
    Ok(parsed)
}
