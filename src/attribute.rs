//! Typed attribute bag used by raw samples and entity metadata, replacing
//! duck-typed `sample[*]` access with an explicit typed abstraction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Number(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Bool(bool),
    Null,
}

impl AttrValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Number(n) => Some(*n),
            AttrValue::Text(s) => parse_decimal(s),
            AttrValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Decimal-only numeric grammar: no hex, no scientific-notation surprises
/// beyond what `f64::from_str` already accepts, no thousands separators.
fn parse_decimal(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    if !trimmed.chars().all(|c| c.is_ascii_digit() || c == '.' || c == '-' || c == '+' || c == 'e' || c == 'E') {
        return None;
    }
    trimmed.parse::<f64>().ok()
}

/// An untyped attribute bag with first-class fallback-chain lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttributeMap(pub HashMap<String, AttrValue>);

impl AttributeMap {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: AttrValue) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.0.get(key)
    }

    /// Try `primary`, then each of `fallbacks` in order; return the first
    /// key whose value is present and non-null.
    pub fn get_fallback(&self, primary: &str, fallbacks: &[&str]) -> Option<&AttrValue> {
        if let Some(v) = self.0.get(primary) {
            if !matches!(v, AttrValue::Null) {
                return Some(v);
            }
        }
        for name in fallbacks {
            if let Some(v) = self.0.get(*name) {
                if !matches!(v, AttrValue::Null) {
                    return Some(v);
                }
            }
        }
        None
    }

    pub fn get_number_fallback(&self, primary: &str, fallbacks: &[&str]) -> Option<f64> {
        self.get_fallback(primary, fallbacks).and_then(AttrValue::as_f64)
    }

    pub fn get_str_fallback(&self, primary: &str, fallbacks: &[&str]) -> Option<String> {
        self.get_fallback(primary, fallbacks).and_then(|v| match v {
            AttrValue::Text(s) => Some(s.clone()),
            AttrValue::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_chain_picks_first_present() {
        let mut map = AttributeMap::new();
        map.insert("net.bytesInPerSec", AttrValue::Number(1500.0));
        let v = map.get_number_fallback(
            "broker.bytesInPerSecond",
            &["broker_bytesInPerSecond", "bytesInPerSecond", "kafka.server.BrokerTopicMetrics.BytesInPerSec", "net.bytesInPerSec"],
        );
        assert_eq!(v, Some(1500.0));
    }

    #[test]
    fn fallback_chain_skips_null() {
        let mut map = AttributeMap::new();
        map.insert("broker.bytesInPerSecond", AttrValue::Null);
        map.insert("bytesInPerSecond", AttrValue::Number(42.0));
        let v = map.get_number_fallback("broker.bytesInPerSecond", &["bytesInPerSecond"]);
        assert_eq!(v, Some(42.0));
    }

    #[test]
    fn decimal_parse_rejects_garbage() {
        let mut map = AttributeMap::new();
        map.insert("x", AttrValue::Text("not a number".into()));
        assert_eq!(map.get_number_fallback("x", &[]), None);
    }
}
