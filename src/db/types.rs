//! Parameter values and row mappings.
//!
//! Statement parameters travel as [`SqlParam`] values and results come back
//! as JSON maps, so statement bodies stay decoupled from driver row types.
//! Row conversion uses a two-phase approach: `TypeCategory` classifies the
//! column type, then a category-specific decoder extracts the value.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::{Column, Decode, Row as _, Type, TypeInfo};

/// A result row: column name to JSON value.
pub type Row = serde_json::Map<String, JsonValue>;

/// A parameter value for parameterized statements.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
    /// JSON value (maps to jsonb)
    Json(JsonValue),
}

impl SqlParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
        }
    }
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for SqlParam {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for SqlParam {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T: Into<SqlParam>> From<Option<T>> for SqlParam {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Self::Null,
        }
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Binary,
    Json,
    Uuid,
    Unknown,
}

/// Classify a PostgreSQL type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        return TypeCategory::Decimal;
    }

    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower == "bytea" {
        return TypeCategory::Binary;
    }

    // Default to text for everything else (varchar, text, char, date, time, etc.)
    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
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

// =============================================================================
// Row to JSON Trait
// =============================================================================

/// Trait for converting driver rows to JSON maps.
pub trait RowToJson {
    fn to_json_map(&self) -> Row;
}

impl RowToJson for PgRow {
    fn to_json_map(&self) -> Row {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name());
                let value = decode_column(self, idx, category);
                (col.name().to_string(), value)
            })
            .collect()
    }
}

fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
    match category {
        TypeCategory::Decimal => decode_decimal(row, idx),
        TypeCategory::Integer => decode_integer(row, idx),
        TypeCategory::Boolean => decode_boolean(row, idx),
        TypeCategory::Float => decode_float(row, idx),
        TypeCategory::Binary => decode_binary(row, idx),
        TypeCategory::Json => decode_json(row, idx),
        TypeCategory::Uuid => decode_uuid(row, idx),
        _ => decode_text(row, idx),
    }
}

fn decode_decimal(row: &PgRow, idx: usize) -> JsonValue {
    match row.try_get::<Option<RawDecimal>, _>(idx) {
        Ok(Some(v)) => JsonValue::String(v.0),
        Ok(None) => JsonValue::Null,
        Err(e) => {
            tracing::error!("Failed to decode NUMERIC: {:?}", e);
            JsonValue::Null
        }
    }
}

fn decode_integer(row: &PgRow, idx: usize) -> JsonValue {
    if let Ok(None) = row.try_get::<Option<i64>, _>(idx) {
        return JsonValue::Null;
    }
    if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    JsonValue::Null
}

fn decode_boolean(row: &PgRow, idx: usize) -> JsonValue {
    row.try_get::<Option<bool>, _>(idx)
        .ok()
        .flatten()
        .map(JsonValue::Bool)
        .unwrap_or(JsonValue::Null)
}

fn decode_float(row: &PgRow, idx: usize) -> JsonValue {
    if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
        return serde_json::Number::from_f64(v)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(v.to_string()));
    }
    if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
        return serde_json::Number::from_f64(v as f64)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(v.to_string()));
    }
    JsonValue::Null
}

fn decode_binary(row: &PgRow, idx: usize) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    row.try_get::<Option<Vec<u8>>, _>(idx)
        .ok()
        .flatten()
        .map(|v| JsonValue::String(STANDARD.encode(v)))
        .unwrap_or(JsonValue::Null)
}

fn decode_json(row: &PgRow, idx: usize) -> JsonValue {
    row.try_get::<Option<JsonValue>, _>(idx)
        .ok()
        .flatten()
        .unwrap_or(JsonValue::Null)
}

fn decode_uuid(row: &PgRow, idx: usize) -> JsonValue {
    row.try_get::<Option<String>, _>(idx)
        .ok()
        .flatten()
        .map(JsonValue::String)
        .unwrap_or(JsonValue::Null)
}

fn decode_text(row: &PgRow, idx: usize) -> JsonValue {
    row.try_get::<Option<String>, _>(idx)
        .ok()
        .flatten()
        .map(JsonValue::String)
        .unwrap_or(JsonValue::Null)
}
