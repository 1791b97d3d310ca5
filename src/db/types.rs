//! PostgreSQL value to JSON mapping.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies the column's type name
//! 2. a per-category decoder extracts the value
//!
//! Any value a typed decoder cannot handle falls back to its PostgreSQL
//! text form, so a row never fails to convert.

use serde_json::Value as JsonValue;
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::{Column, Decode, Row, Type, TypeInfo};

/// Logical category for column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Binary,
    Json,
    Timestamp,
    TimestampTz,
    Date,
    Time,
    Text,
}

/// Classify a PostgreSQL type name.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    match type_name.to_lowercase().as_str() {
        "numeric" | "decimal" => TypeCategory::Decimal,
        "int2" | "int4" | "int8" | "smallint" | "integer" | "bigint" | "oid" => {
            TypeCategory::Integer
        }
        "bool" | "boolean" => TypeCategory::Boolean,
        "float4" | "float8" | "real" | "double precision" => TypeCategory::Float,
        "json" | "jsonb" => TypeCategory::Json,
        "bytea" => TypeCategory::Binary,
        "timestamp" => TypeCategory::Timestamp,
        "timestamptz" => TypeCategory::TimestampTz,
        "date" => TypeCategory::Date,
        "time" => TypeCategory::Time,
        // uuid, text, varchar, interval, inet, arrays, enums, ...
        _ => TypeCategory::Text,
    }
}

/// NUMERIC values kept as their exact decimal text.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

/// Encode bytes as standard base64.
pub fn encode_binary(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    JsonValue::String(STANDARD.encode(bytes))
}

/// Convert an `f64` to JSON, keeping NaN and infinities as strings.
fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

/// Converts database rows to ordered JSON maps.
pub trait RowToJson {
    fn to_json_map(&self) -> serde_json::Map<String, JsonValue>;
}

impl RowToJson for PgRow {
    fn to_json_map(&self) -> serde_json::Map<String, JsonValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name());
                (col.name().to_string(), decode_column(self, idx, category))
            })
            .collect()
    }
}

fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
    let decoded = match category {
        TypeCategory::Decimal => row
            .try_get::<Option<RawDecimal>, _>(idx)
            .map(|v| v.map(|d| JsonValue::String(d.0))),
        TypeCategory::Integer => decode_integer(row, idx),
        TypeCategory::Boolean => row
            .try_get::<Option<bool>, _>(idx)
            .map(|v| v.map(JsonValue::Bool)),
        TypeCategory::Float => decode_float(row, idx),
        TypeCategory::Binary => row
            .try_get::<Option<Vec<u8>>, _>(idx)
            .map(|v| v.map(|b| encode_binary(&b))),
        TypeCategory::Json => row.try_get::<Option<JsonValue>, _>(idx),
        TypeCategory::TimestampTz => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)
            .map(|v| v.map(|t| JsonValue::String(t.to_rfc3339()))),
        TypeCategory::Timestamp => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(idx)
            .map(|v| v.map(|t| JsonValue::String(t.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))),
        TypeCategory::Date => row
            .try_get::<Option<chrono::NaiveDate>, _>(idx)
            .map(|v| v.map(|d| JsonValue::String(d.to_string()))),
        TypeCategory::Time => row
            .try_get::<Option<chrono::NaiveTime>, _>(idx)
            .map(|v| v.map(|t| JsonValue::String(t.to_string()))),
        TypeCategory::Text => return decode_text(row, idx),
    };

    match decoded {
        Ok(Some(value)) => value,
        Ok(None) => JsonValue::Null,
        Err(e) => {
            tracing::debug!(column = idx, error = %e, "Typed decode failed, using text form");
            decode_text(row, idx)
        }
    }
}

fn decode_integer(row: &PgRow, idx: usize) -> Result<Option<JsonValue>, sqlx::Error> {
    if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
        return Ok(v.map(|n| JsonValue::Number(n.into())));
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
        return Ok(v.map(|n| JsonValue::Number(n.into())));
    }
    if let Ok(v) = row.try_get::<Option<sqlx::postgres::types::Oid>, _>(idx) {
        return Ok(v.map(|n| JsonValue::Number(n.0.into())));
    }
    row.try_get::<Option<i64>, _>(idx)
        .map(|v| v.map(|n| JsonValue::Number(n.into())))
}

fn decode_float(row: &PgRow, idx: usize) -> Result<Option<JsonValue>, sqlx::Error> {
    if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
        return Ok(v.map(|n| float_value(n as f64)));
    }
    row.try_get::<Option<f64>, _>(idx)
        .map(|v| v.map(float_value))
}

/// Raw text of the value. Results arrive in text format, so this works for
/// every type, including ones sqlx has no Rust mapping for.
fn decode_text(row: &PgRow, idx: usize) -> JsonValue {
    match row.try_get_unchecked::<Option<String>, _>(idx) {
        Ok(Some(v)) => JsonValue::String(v),
        Ok(None) => JsonValue::Null,
        Err(e) => {
            tracing::error!(column = idx, error = %e, "Failed to decode column");
            JsonValue::Null
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(categorize_type("INT4"), TypeCategory::Integer);
        assert_eq!(categorize_type("int8"), TypeCategory::Integer);
        assert_eq!(categorize_type("INT2"), TypeCategory::Integer);
        assert_eq!(categorize_type("OID"), TypeCategory::Integer);
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(categorize_type("NUMERIC"), TypeCategory::Decimal);
    }

    #[test]
    fn test_categorize_type_temporal() {
        assert_eq!(categorize_type("TIMESTAMPTZ"), TypeCategory::TimestampTz);
        assert_eq!(categorize_type("TIMESTAMP"), TypeCategory::Timestamp);
        assert_eq!(categorize_type("DATE"), TypeCategory::Date);
        assert_eq!(categorize_type("TIME"), TypeCategory::Time);
        // No chrono mapping with an offset; kept as text
        assert_eq!(categorize_type("TIMETZ"), TypeCategory::Text);
    }

    #[test]
    fn test_categorize_type_text_fallback() {
        assert_eq!(categorize_type("UUID"), TypeCategory::Text);
        assert_eq!(categorize_type("VARCHAR"), TypeCategory::Text);
        assert_eq!(categorize_type("INTERVAL"), TypeCategory::Text);
        assert_eq!(categorize_type("INT4[]"), TypeCategory::Text);
        assert_eq!(categorize_type("mood"), TypeCategory::Text);
    }

    #[test]
    fn test_categorize_type_json() {
        assert_eq!(categorize_type("JSON"), TypeCategory::Json);
        assert_eq!(categorize_type("JSONB"), TypeCategory::Json);
    }

    #[test]
    fn test_encode_binary() {
        assert_eq!(
            encode_binary(b"hello world"),
            JsonValue::String("aGVsbG8gd29ybGQ=".to_string())
        );
        assert_eq!(
            encode_binary(&[0xFF, 0xFE, 0x00, 0x01]),
            JsonValue::String("//4AAQ==".to_string())
        );
        assert_eq!(encode_binary(&[]), JsonValue::String(String::new()));
    }

    #[test]
    fn test_float_value_non_finite() {
        assert_eq!(float_value(1.5), serde_json::json!(1.5));
        assert_eq!(float_value(f64::NAN), JsonValue::String("NaN".to_string()));
        assert_eq!(float_value(f64::INFINITY), JsonValue::String("inf".to_string()));
    }
}
