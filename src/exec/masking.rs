//! Deterministic value masking, applied after projection so cached rows and
//! database rows share one code path. Nulls pass through untouched; array
//! values mask element-wise.

use chrono::{DateTime, Datelike, NaiveDate};
use serde_json::Value;

use crate::model::MaskingFn;

pub fn apply_mask(mask: MaskingFn, value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Array(items) => Value::Array(items.iter().map(|v| apply_mask(mask, v)).collect()),
        other => mask_scalar(mask, other),
    }
}

fn mask_scalar(mask: MaskingFn, value: &Value) -> Value {
    match mask {
        MaskingFn::Email => Value::String(mask_email(value)),
        MaskingFn::Phone => Value::String(mask_phone(value)),
        MaskingFn::Name => Value::String(mask_name(value)),
        MaskingFn::Uuid => Value::String(mask_uuid(value)),
        MaskingFn::Number => Value::from(0),
        MaskingFn::Date => Value::String(mask_date(value)),
        MaskingFn::Full => Value::String("***".to_string()),
    }
}

/// `ada@example.com` -> `a***@example.com`
fn mask_email(value: &Value) -> String {
    let Some(text) = value.as_str() else {
        return "***".to_string();
    };
    match text.split_once('@') {
        Some((local, domain)) if !local.is_empty() => {
            let first = local.chars().next().expect("non-empty");
            format!("{first}***@{domain}")
        }
        _ => "***".to_string(),
    }
}

/// All but the last two characters replaced, length preserved.
fn mask_phone(value: &Value) -> String {
    let Some(text) = value.as_str() else {
        return "***".to_string();
    };
    let chars: Vec<char> = text.chars().collect();
    let keep_from = chars.len().saturating_sub(2);
    chars
        .iter()
        .enumerate()
        .map(|(i, c)| if i < keep_from { '*' } else { *c })
        .collect()
}

/// `Ada Lovelace` -> `A*** L***`
fn mask_name(value: &Value) -> String {
    let Some(text) = value.as_str() else {
        return "***".to_string();
    };
    let words: Vec<String> = text
        .split_whitespace()
        .map(|word| match word.chars().next() {
            Some(first) => format!("{first}***"),
            None => "***".to_string(),
        })
        .collect();
    if words.is_empty() {
        "***".to_string()
    } else {
        words.join(" ")
    }
}

/// Zero the node segment, keeping the rest identifiable.
fn mask_uuid(value: &Value) -> String {
    let parsed = value.as_str().and_then(|s| uuid::Uuid::parse_str(s).ok());
    match parsed {
        Some(id) => {
            let s = id.to_string();
            format!("{}000000000000", &s[..24])
        }
        None => "***".to_string(),
    }
}

/// Truncate to January 1st, preserving the year and the input's shape.
fn mask_date(value: &Value) -> String {
    if let Some(text) = value.as_str() {
        if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
            return format!("{}-01-01T00:00:00Z", ts.year());
        }
        if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            return format!("{}-01-01", date.year());
        }
    }
    "***".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn email_keeps_first_char_and_domain() {
        assert_eq!(
            apply_mask(MaskingFn::Email, &json!("ada@example.com")),
            json!("a***@example.com")
        );
        assert_eq!(apply_mask(MaskingFn::Email, &json!("@x.com")), json!("***"));
        assert_eq!(apply_mask(MaskingFn::Email, &json!("not-an-email")), json!("***"));
    }

    #[test]
    fn phone_keeps_last_two() {
        assert_eq!(
            apply_mask(MaskingFn::Phone, &json!("+4915112345678")),
            json!("************78")
        );
        assert_eq!(apply_mask(MaskingFn::Phone, &json!("12")), json!("12"));
    }

    #[test]
    fn name_keeps_initials() {
        assert_eq!(
            apply_mask(MaskingFn::Name, &json!("Ada Lovelace")),
            json!("A*** L***")
        );
        assert_eq!(apply_mask(MaskingFn::Name, &json!("")), json!("***"));
    }

    #[test]
    fn uuid_zeroes_node_segment() {
        assert_eq!(
            apply_mask(MaskingFn::Uuid, &json!("0d3ee1a6-5b7a-41b2-bceb-8b8d8b4e8a77")),
            json!("0d3ee1a6-5b7a-41b2-bceb-000000000000")
        );
    }

    #[test]
    fn number_and_full() {
        assert_eq!(apply_mask(MaskingFn::Number, &json!(1234.5)), json!(0));
        assert_eq!(apply_mask(MaskingFn::Full, &json!("secret")), json!("***"));
    }

    #[test]
    fn date_truncates_to_january_first() {
        assert_eq!(
            apply_mask(MaskingFn::Date, &json!("2024-03-05")),
            json!("2024-01-01")
        );
        assert_eq!(
            apply_mask(MaskingFn::Date, &json!("2024-03-05T10:30:00Z")),
            json!("2024-01-01T00:00:00Z")
        );
    }

    #[test]
    fn null_passes_through_and_arrays_mask_elementwise() {
        assert_eq!(apply_mask(MaskingFn::Email, &Value::Null), Value::Null);
        assert_eq!(
            apply_mask(MaskingFn::Full, &json!(["a", "b"])),
            json!(["***", "***"])
        );
    }
}
