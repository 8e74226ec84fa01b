use crate::RelayError;

/// Разделитель сегментов routing key.
pub const ROUTE_DELIMITER: char = '.';

/// Segment `index` of a dot-delimited routing key.
///
/// - `route_segment("a.b.c.d", 3)` → `"d"`
/// - `route_segment("a.b", 3)` → `""`
///
/// Missing segments yield an empty string, never an error.
pub fn route_segment(routing_key: &str, index: usize) -> &str {
    routing_key.split(ROUTE_DELIMITER).nth(index).unwrap_or("")
}

/// Validate a ClickHouse identifier (table name, column name).
/// Allowed: `^[a-zA-Z_][a-zA-Z0-9_.]*$`.
pub fn validate_identifier(name: &str, context: &str) -> Result<(), RelayError> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(RelayError::config(format!("{context}: identifier is empty")));
    };
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(RelayError::config(format!(
            "{context}: invalid identifier '{name}', must start with a letter or underscore"
        )));
    }
    for ch in chars {
        if !ch.is_ascii_alphanumeric() && ch != '_' && ch != '.' {
            return Err(RelayError::config(format!(
                "{context}: invalid character '{ch}' in identifier '{name}'"
            )));
        }
    }
    Ok(())
}
