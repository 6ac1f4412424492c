//! Numeric and date decoding for staged text values
//!
//! Staged numbers arrive as text rendered from floating point cells
//! (`"1082.0"`), so every integer column is decoded by parsing a float and
//! truncating toward zero. A direct integer parse would reject those values.
//! The same rule applies to every numeric column; a value that does not
//! decode fails the whole transformation it belongs to.

use crate::error::{EtlError, EtlResult};
use chrono::{Datelike, NaiveDate};

/// 1960-01-01, the epoch of the container format, as days from the common era.
const SAS_EPOCH_DAYS_FROM_CE: i32 = 715_510;

/// Decode `text` as a float-rendered integer.
pub fn decode_int(column: &'static str, text: &str) -> EtlResult<i32> {
    let trimmed = text.trim();
    let value: f64 = trimmed
        .parse()
        .map_err(|_| EtlError::decode(column, text, "integer"))?;

    if !value.is_finite() {
        return Err(EtlError::decode(column, text, "integer"));
    }

    let truncated = value.trunc();
    if truncated < f64::from(i32::MIN) || truncated > f64::from(i32::MAX) {
        return Err(EtlError::decode(column, text, "integer"));
    }

    Ok(truncated as i32)
}

/// Like [`decode_int`], but an empty field means "no value".
pub fn decode_optional_int(column: &'static str, text: &str) -> EtlResult<Option<i32>> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    decode_int(column, text).map(Some)
}

/// Optional float; empty means NULL.
pub fn decode_optional_float(column: &'static str, text: &str) -> EtlResult<Option<f64>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<f64>()
        .map(Some)
        .map_err(|_| EtlError::decode(column, text, "float"))
}

/// ISO `YYYY-MM-DD` calendar date.
pub fn decode_date(column: &'static str, text: &str) -> EtlResult<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
        .map_err(|_| EtlError::decode(column, text, "date"))
}

/// Calendar date for a day offset from the epoch.
pub fn date_from_offset(column: &'static str, offset: i32) -> EtlResult<NaiveDate> {
    SAS_EPOCH_DAYS_FROM_CE
        .checked_add(offset)
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .ok_or_else(|| EtlError::decode(column, &offset.to_string(), "date"))
}

/// Year, month and day-of-month of a date, in that order.
pub fn date_parts(date: NaiveDate) -> (i32, u32, u32) {
    (date.year(), date.month(), date.day())
}

/// Text form of a numeric container cell, matching how float cells were
/// historically staged (`1082.0`, never `1082`).
pub fn render_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}
