//! Codec between the wire "service string" representation and typed values.
//!
//! Every attribute type in the closed vocabulary maps onto one of the
//! [`Value`] variants. Unparsable input converts to `Value::Null` rather than
//! failing: the server owns the canonical representation and the client must
//! stay usable when it receives something it cannot interpret.

use super::Value;
use chrono::{NaiveDate, NaiveDateTime};

const NUMERIC_TYPES: &[&str] = &[
    "Byte", "NullableByte", "SByte", "NullableSByte", "Int16", "NullableInt16", "UInt16",
    "NullableUInt16", "Int32", "NullableInt32", "UInt32", "NullableUInt32", "Int64",
    "NullableInt64", "UInt64", "NullableUInt64",
];

const FLOAT_TYPES: &[&str] = &[
    "Decimal", "NullableDecimal", "Single", "NullableSingle", "Double", "NullableDouble",
];

const BOOLEAN_TYPES: &[&str] = &["Boolean", "NullableBoolean", "YesNo"];

const DATE_TYPES: &[&str] = &["Date", "NullableDate"];

const DATE_TIME_TYPES: &[&str] = &[
    "DateTime", "NullableDateTime", "DateTimeOffset", "NullableDateTimeOffset",
];

const TIME_TYPES: &[&str] = &["Time", "NullableTime"];

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

pub fn is_numeric_type(type_name: &str) -> bool {
    NUMERIC_TYPES.contains(&type_name) || FLOAT_TYPES.contains(&type_name)
}

pub fn is_boolean_type(type_name: &str) -> bool {
    BOOLEAN_TYPES.contains(&type_name)
}

pub fn is_date_time_type(type_name: &str) -> bool {
    DATE_TYPES.contains(&type_name) || DATE_TIME_TYPES.contains(&type_name)
}

/// Converts a service string to its typed value for the given attribute type.
pub fn from_service_string(value: Option<&str>, type_name: &str) -> Value {
    let Some(value) = value else {
        return Value::Null;
    };

    if BOOLEAN_TYPES.contains(&type_name) {
        return match value.to_ascii_lowercase().as_str() {
            "true" | "yes" => Value::Boolean(true),
            "false" | "no" => Value::Boolean(false),
            _ => Value::Null,
        };
    }

    if NUMERIC_TYPES.contains(&type_name) {
        return value
            .trim()
            .parse::<i64>()
            .map(Value::Integer)
            .unwrap_or(Value::Null);
    }

    if FLOAT_TYPES.contains(&type_name) {
        return value
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .unwrap_or(Value::Null);
    }

    if DATE_TYPES.contains(&type_name) {
        return NaiveDate::parse_from_str(value, DATE_FORMAT)
            .map(Value::Date)
            .unwrap_or(Value::Null);
    }

    if DATE_TIME_TYPES.contains(&type_name) {
        return NaiveDateTime::parse_from_str(value, DATE_TIME_FORMAT)
            .map(Value::DateTime)
            .unwrap_or(Value::Null);
    }

    if TIME_TYPES.contains(&type_name) {
        return Value::Time(value.to_string());
    }

    // String, MultiLineString, Guid, User, KeyValueList, FlagsEnum, ComboBox,
    // Reference, BinaryFile and friends carry their service string as-is.
    Value::String(value.to_string())
}

/// Converts a typed value back to its service string for the given type.
///
/// String input is re-parsed when the target type expects a non-string value,
/// so callers may pass user-entered text directly.
pub fn to_service_string(value: &Value, type_name: &str) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Boolean(b) => {
            if BOOLEAN_TYPES.contains(&type_name) {
                Some(if *b { "True" } else { "False" }.to_string())
            } else {
                Some(b.to_string())
            }
        }
        Value::Integer(i) => Some(i.to_string()),
        Value::Float(f) => Some(f.to_string()),
        Value::Date(d) => Some(d.format(DATE_FORMAT).to_string()),
        Value::DateTime(dt) => Some(dt.format(DATE_TIME_FORMAT).to_string()),
        Value::Time(t) => Some(t.clone()),
        Value::String(s) => {
            if BOOLEAN_TYPES.contains(&type_name) {
                return match s.to_ascii_lowercase().as_str() {
                    "true" | "yes" => Some("True".to_string()),
                    "false" | "no" => Some("False".to_string()),
                    _ => None,
                };
            }

            if is_numeric_type(type_name) || is_date_time_type(type_name) {
                // Normalize through the typed representation.
                return match from_service_string(Some(s), type_name) {
                    Value::Null => None,
                    typed => to_service_string(&typed, type_name),
                };
            }

            Some(s.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boolean_round_trip() {
        assert_eq!(from_service_string(Some("true"), "Boolean"), Value::Boolean(true));
        assert_eq!(from_service_string(Some("False"), "NullableBoolean"), Value::Boolean(false));
        assert_eq!(
            to_service_string(&Value::Boolean(true), "Boolean"),
            Some("True".to_string())
        );
    }

    #[test]
    fn numeric_parsing() {
        assert_eq!(from_service_string(Some("42"), "Int32"), Value::Integer(42));
        assert_eq!(from_service_string(Some("4.5"), "Decimal"), Value::Float(4.5));
        assert_eq!(from_service_string(Some("abc"), "Int32"), Value::Null);
    }

    #[test]
    fn date_round_trip() {
        let value = from_service_string(Some("2024-03-01"), "Date");
        assert_eq!(to_service_string(&value, "Date"), Some("2024-03-01".to_string()));
    }

    #[test]
    fn missing_value_is_null() {
        assert_eq!(from_service_string(None, "String"), Value::Null);
        assert_eq!(to_service_string(&Value::Null, "String"), None);
    }

    #[test]
    fn string_input_normalized_for_typed_targets() {
        assert_eq!(
            to_service_string(&Value::String("yes".into()), "YesNo"),
            Some("True".to_string())
        );
        assert_eq!(
            to_service_string(&Value::String("007".into()), "Int32"),
            Some("7".to_string())
        );
    }
}
