// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! Logical column types and scalar values.

use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use parse_display::Display;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

mod date;
mod native;
mod value;

pub use self::date::*;
pub use self::native::*;
pub use self::value::*;

/// Index of a column inside a tablet schema.
pub type ColumnId = u32;
/// Identifier of a slot in a query plan.
pub type SlotId = i32;
/// Identifier of a tuple in a query plan.
pub type TupleId = i32;
/// Row ordinal inside a segment.
pub type RowId = u32;

/// Logical type of a column.
///
/// Decimals are stored as unscaled integers of their delegate width, dates as days
/// since the unix epoch and datetimes as microseconds since the unix epoch.
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    #[display("BOOLEAN")]
    Bool,
    #[display("TINYINT")]
    Int8,
    #[display("SMALLINT")]
    Int16,
    #[display("INT")]
    Int32,
    #[display("BIGINT")]
    Int64,
    #[display("LARGEINT")]
    Int128,
    #[display("FLOAT")]
    Float32,
    #[display("DOUBLE")]
    Float64,
    #[display("DECIMAL32({0},{1})")]
    Decimal32(u8, u8),
    #[display("DECIMAL64({0},{1})")]
    Decimal64(u8, u8),
    #[display("DECIMAL128({0},{1})")]
    Decimal128(u8, u8),
    #[display("DATE")]
    Date,
    #[display("DATETIME")]
    Datetime,
    #[display("CHAR({0})")]
    Char(u32),
    #[display("VARCHAR({0})")]
    Varchar(u32),
    #[display("ARRAY<{0}>")]
    Array(Box<DataType>),
}

/// Failed to convert a string literal into a value of some type.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    #[error("failed to parse {0:?} as {1}")]
    Parse(String, DataType),
    #[error("value {0:?} is out of range of {1}")]
    OutOfRange(String, DataType),
    #[error("literal of type {0} is not supported")]
    NotSupported(DataType),
}

impl DataType {
    /// Returns the type whose values share the physical representation of this type.
    ///
    /// Decimals delegate to the integer of the same width; every other type is its
    /// own delegate.
    pub fn delegate(&self) -> DataType {
        match self {
            Self::Decimal32(_, _) => Self::Int32,
            Self::Decimal64(_, _) => Self::Int64,
            Self::Decimal128(_, _) => Self::Int128,
            other => other.clone(),
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Self::Char(_) | Self::Varchar(_))
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64 | Self::Int128
        )
    }

    pub fn is_decimal(&self) -> bool {
        matches!(
            self,
            Self::Decimal32(..) | Self::Decimal64(..) | Self::Decimal128(..)
        )
    }

    /// Element type of an array.
    pub fn element_type(&self) -> Option<&DataType> {
        match self {
            Self::Array(inner) => Some(inner),
            _ => None,
        }
    }

    /// Width in bytes of one value, or `None` for variable-length types.
    pub fn fixed_width(&self) -> Option<usize> {
        Some(match self {
            Self::Bool | Self::Int8 => 1,
            Self::Int16 => 2,
            Self::Int32 | Self::Float32 | Self::Decimal32(..) | Self::Date => 4,
            Self::Int64 | Self::Float64 | Self::Decimal64(..) | Self::Datetime => 8,
            Self::Int128 | Self::Decimal128(..) => 16,
            Self::Char(_) | Self::Varchar(_) | Self::Array(_) => return None,
        })
    }

    /// Parses the textual form of a value of this type.
    ///
    /// Decimal literals are rescaled to the declared scale and returned as their
    /// unscaled integer. Array literals are not supported.
    pub fn parse_value(&self, s: &str) -> Result<DataValue, ConvertError> {
        let parse_err = || ConvertError::Parse(s.to_string(), self.clone());
        let t = s.trim();
        Ok(match self {
            Self::Bool => match t.to_ascii_lowercase().as_str() {
                "true" | "1" => DataValue::Bool(true),
                "false" | "0" => DataValue::Bool(false),
                _ => return Err(parse_err()),
            },
            Self::Int8 => DataValue::Int8(t.parse().map_err(|_| parse_err())?),
            Self::Int16 => DataValue::Int16(t.parse().map_err(|_| parse_err())?),
            Self::Int32 => DataValue::Int32(t.parse().map_err(|_| parse_err())?),
            Self::Int64 => DataValue::Int64(t.parse().map_err(|_| parse_err())?),
            Self::Int128 => DataValue::Int128(t.parse().map_err(|_| parse_err())?),
            Self::Float32 => DataValue::Float32(F32::from(
                t.parse::<f32>().map_err(|_| parse_err())?,
            )),
            Self::Float64 => DataValue::Float64(F64::from(
                t.parse::<f64>().map_err(|_| parse_err())?,
            )),
            Self::Decimal32(precision, scale)
            | Self::Decimal64(precision, scale)
            | Self::Decimal128(precision, scale) => {
                let mut decimal = Decimal::from_str(t).map_err(|_| parse_err())?;
                decimal.rescale(*scale as u32);
                let unscaled = decimal.mantissa();
                let limit = 10i128.checked_pow(*precision as u32).unwrap_or(i128::MAX);
                if unscaled.abs() >= limit {
                    return Err(ConvertError::OutOfRange(s.to_string(), self.clone()));
                }
                DataValue::Int128(unscaled)
                    .cast_to(&self.delegate())
                    .ok_or_else(|| ConvertError::OutOfRange(s.to_string(), self.clone()))?
            }
            Self::Date => DataValue::Int32(
                NaiveDate::parse_from_str(t, DATE_FORMAT)
                    .map(date_to_days)
                    .map_err(|_| parse_err())?,
            ),
            Self::Datetime => DataValue::Int64(
                NaiveDateTime::parse_from_str(t, DATETIME_FORMAT)
                    .or_else(|_| {
                        NaiveDate::parse_from_str(t, DATE_FORMAT)
                            .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
                    })
                    .map(datetime_to_micros)
                    .map_err(|_| parse_err())?,
            ),
            Self::Char(_) | Self::Varchar(_) => DataValue::String(s.to_string()),
            Self::Array(_) => return Err(ConvertError::NotSupported(self.clone())),
        })
    }

    /// Formats a value of this type so that [`DataType::parse_value`] reads it back.
    pub fn format_value(&self, value: &DataValue) -> String {
        match (self, value) {
            (Self::Date, DataValue::Int32(days)) => format_date(*days),
            (Self::Datetime, DataValue::Int64(micros)) => format_datetime(*micros),
            (_, DataValue::String(s)) => s.clone(),
            (_, v) => v.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_types() {
        assert_eq!(DataType::Decimal64(18, 4).to_string(), "DECIMAL64(18,4)");
        assert_eq!(
            DataType::Array(Box::new(DataType::Varchar(10))).to_string(),
            "ARRAY<VARCHAR(10)>"
        );
    }

    #[test]
    fn parse_decimal_rescales() {
        let ty = DataType::Decimal64(10, 2);
        assert_eq!(ty.parse_value("1.5").unwrap(), DataValue::Int64(150));
        assert_eq!(ty.parse_value("-3").unwrap(), DataValue::Int64(-300));
        assert!(matches!(
            DataType::Decimal32(3, 2).parse_value("12.34"),
            Err(ConvertError::OutOfRange(..))
        ));
    }

    #[test]
    fn parse_dates() {
        assert_eq!(
            DataType::Date.parse_value("1970-01-02").unwrap(),
            DataValue::Int32(1)
        );
        let v = DataType::Datetime
            .parse_value("1970-01-01 00:00:01")
            .unwrap();
        assert_eq!(v, DataValue::Int64(1_000_000));
        assert_eq!(DataType::Datetime.format_value(&v), "1970-01-01 00:00:01");
        assert_eq!(DataType::Date.format_value(&DataValue::Int32(1)), "1970-01-02");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(DataType::Int32.parse_value("abc").is_err());
        assert!(DataType::Int8.parse_value("300").is_err());
        assert!(DataType::Array(Box::new(DataType::Int32))
            .parse_value("[1]")
            .is_err());
    }
}
