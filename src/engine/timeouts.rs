/// Per-operation custom timeouts
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::EngineError;

/// Timeouts declared on a resource, as duration literals ("10m", "90s", "1h30m")
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomTimeouts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete: Option<String>,
}

/// Parsed form of [`CustomTimeouts`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParsedTimeouts {
    pub create: Option<Duration>,
    pub update: Option<Duration>,
    pub delete: Option<Duration>,
}

impl CustomTimeouts {
    pub fn new(create: &str, update: &str, delete: &str) -> Self {
        Self {
            create: Some(create.to_string()),
            update: Some(update.to_string()),
            delete: Some(delete.to_string()),
        }
    }

    /// Parse every literal, failing on the first malformed one.
    /// Empty literals mean "engine default" and parse to `None`.
    pub fn parse(&self) -> Result<ParsedTimeouts, EngineError> {
        Ok(ParsedTimeouts {
            create: parse_field("create", self.create.as_deref())?,
            update: parse_field("update", self.update.as_deref())?,
            delete: parse_field("delete", self.delete.as_deref())?,
        })
    }
}

fn parse_field(operation: &'static str, literal: Option<&str>) -> Result<Option<Duration>, EngineError> {
    match literal {
        None | Some("") => Ok(None),
        Some(literal) => parse_duration(literal)
            .map(Some)
            .map_err(|reason| EngineError::InvalidTimeout {
                operation,
                literal: literal.to_string(),
                reason,
            }),
    }
}

/// Parse a duration literal made of `<integer><unit>` groups, units `h`, `m`, `s`
pub fn parse_duration(literal: &str) -> Result<Duration, String> {
    let mut total: u64 = 0;
    let mut digits = String::new();

    for ch in literal.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }

        let multiplier = match ch {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            other => return Err(format!("unknown unit '{}'", other)),
        };
        if digits.is_empty() {
            return Err(format!("missing number before '{}'", ch));
        }

        let value: u64 = digits
            .parse()
            .map_err(|e| format!("invalid number '{}': {}", digits, e))?;
        total = value
            .checked_mul(multiplier)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(|| "duration overflows".to_string())?;
        digits.clear();
    }

    if !digits.is_empty() {
        return Err(format!("missing unit after '{}'", digits));
    }
    if total == 0 {
        return Err("duration must be positive".to_string());
    }

    Ok(Duration::from_secs(total))
}
