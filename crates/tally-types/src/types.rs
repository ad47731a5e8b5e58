use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::convert::TryFrom;
use std::fmt;

/// Possible values that can be stored in a fact field
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum FactValue {
    /// String value
    String(String),
    /// Integer value
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// Boolean value
    Boolean(bool),
    /// Array of `FactValues`
    Array(Vec<FactValue>),
    /// Object/map of string keys to `FactValues`
    Object(HashMap<String, FactValue>),
    /// UTC date/time value
    Date(DateTime<Utc>),
    /// Null value
    Null,
}

// -------------------------------------------------------------------------------------------------
// Conversions between `FactValue` and `serde_json::Value`, used when facts arrive as JSON
// documents from outside the engine.
// -------------------------------------------------------------------------------------------------

impl From<&FactValue> for serde_json::Value {
    fn from(value: &FactValue) -> Self {
        match value {
            FactValue::String(s) => Self::String(s.clone()),
            FactValue::Integer(i) => Self::Number(serde_json::Number::from(*i)),
            FactValue::Float(f) => {
                serde_json::Number::from_f64(*f).map_or(Self::Null, Self::Number)
            }
            FactValue::Boolean(b) => Self::Bool(*b),
            FactValue::Array(arr) => Self::Array(arr.iter().map(Into::into).collect()),
            FactValue::Object(map) => Self::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.into()))
                    .collect::<serde_json::Map<String, Self>>(),
            ),
            FactValue::Date(dt) => Self::String(dt.to_rfc3339()),
            FactValue::Null => Self::Null,
        }
    }
}

impl From<FactValue> for serde_json::Value {
    fn from(value: FactValue) -> Self {
        Self::from(&value)
    }
}

impl TryFrom<&serde_json::Value> for FactValue {
    type Error = anyhow::Error;

    fn try_from(value: &serde_json::Value) -> Result<Self, Self::Error> {
        Ok(match value {
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    Self::Float(f)
                } else {
                    return Err(anyhow!("Unsupported number value: {}", n));
                }
            }
            serde_json::Value::Bool(b) => Self::Boolean(*b),
            serde_json::Value::Array(arr) => {
                Self::Array(arr.iter().map(Self::try_from).collect::<Result<Vec<_>, _>>()?)
            }
            serde_json::Value::Object(map) => {
                let mut inner = HashMap::with_capacity(map.len());
                for (k, v) in map {
                    inner.insert(k.clone(), Self::try_from(v)?);
                }
                Self::Object(inner)
            }
            serde_json::Value::Null => Self::Null,
        })
    }
}

impl From<&str> for FactValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for FactValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for FactValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for FactValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<u32> for FactValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for FactValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for FactValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<DateTime<Utc>> for FactValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Date(value)
    }
}

impl From<Vec<FactValue>> for FactValue {
    fn from(value: Vec<FactValue>) -> Self {
        Self::Array(value)
    }
}

impl std::hash::Hash for FactValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Self::String(s) => {
                0u8.hash(state);
                s.hash(state);
            }
            Self::Integer(i) => {
                1u8.hash(state);
                i.hash(state);
            }
            Self::Float(f) => {
                2u8.hash(state);
                // -0.0 == 0.0, so both must land in the same bucket
                let f = if *f == 0.0 { 0.0f64 } else { *f };
                f.to_bits().hash(state);
            }
            Self::Boolean(b) => {
                3u8.hash(state);
                b.hash(state);
            }
            Self::Array(arr) => {
                4u8.hash(state);
                arr.hash(state);
            }
            Self::Object(obj) => {
                5u8.hash(state);
                let mut sorted_pairs: Vec<_> = obj.iter().collect();
                sorted_pairs.sort_by_key(|(k, _)| *k);
                for (key, value) in sorted_pairs {
                    key.hash(state);
                    value.hash(state);
                }
            }
            Self::Date(dt) => {
                6u8.hash(state);
                dt.timestamp_nanos_opt().unwrap_or(0).hash(state);
            }
            Self::Null => {
                7u8.hash(state);
            }
        }
    }
}

impl Eq for FactValue {}

impl PartialOrd for FactValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        use FactValue::{Boolean, Date, Float, Integer, Null, String};
        match (self, other) {
            (String(a), String(b)) => a.partial_cmp(b),
            (Integer(a), Integer(b)) => a.partial_cmp(b),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Boolean(a), Boolean(b)) => a.partial_cmp(b),
            (Date(a), Date(b)) => a.partial_cmp(b),
            (Null, Null) => Some(Ordering::Equal),
            #[allow(clippy::cast_precision_loss)]
            (Integer(a), Float(b)) => (*a as f64).partial_cmp(b),
            #[allow(clippy::cast_precision_loss)]
            (Float(a), Integer(b)) => a.partial_cmp(&(*b as f64)),
            _ => None,
        }
    }
}

impl fmt::Display for FactValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(fl) => write!(f, "{fl}"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Array(arr) => {
                write!(f, "[")?;
                for (i, item) in arr.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Object(obj) => {
                let mut keys: Vec<_> = obj.keys().collect();
                keys.sort();
                write!(f, "{{")?;
                for (i, key) in keys.into_iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {}", obj[key])?;
                }
                write!(f, "}}")
            }
            Self::Date(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.3fZ")),
            Self::Null => write!(f, "null"),
        }
    }
}

impl FactValue {
    /// Name of the variant, used in schema diagnostics
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Boolean(_) => "boolean",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Date(_) => "date",
            Self::Null => "null",
        }
    }

    /// Whether this value is `Null`
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view of integers and floats
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Integer view; floats only when they carry no fractional part
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    /// String slice view
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Interpret the value as epoch milliseconds (integers or dates)
    #[must_use]
    pub fn as_epoch_millis(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Date(dt) => Some(dt.timestamp_millis()),
            _ => None,
        }
    }

    /// Equality used by rule constraints: integers and floats compare numerically
    #[must_use]
    pub fn loose_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Integer(_) | Self::Float(_), Self::Integer(_) | Self::Float(_)) => {
                self.partial_cmp(other) == Some(Ordering::Equal)
            }
            (Self::Array(a), Self::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (Self::Object(a), Self::Object(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.get(k).is_some_and(|w| v.loose_eq(w)))
            }
            _ => self == other,
        }
    }

    /// Canonical form for hash indexes: values that are `loose_eq` share one key
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn index_key(&self) -> Self {
        match self {
            Self::Float(f)
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 =>
            {
                Self::Integer(*f as i64)
            }
            Self::Array(arr) => Self::Array(arr.iter().map(Self::index_key).collect()),
            Self::Object(obj) => {
                Self::Object(obj.iter().map(|(k, v)| (k.clone(), v.index_key())).collect())
            }
            other => other.clone(),
        }
    }

    /// Total ordering across all variants, for ordered collections
    ///
    /// Variants are ranked `Null < Boolean < numbers < String < Date < Array < Object`.
    /// Integers and floats interleave by numeric value; an integer sorts before a float
    /// of the same magnitude so the ordering stays total.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Integer(a), Self::Float(b)) => {
                (*a as f64).total_cmp(b).then(Ordering::Less)
            }
            (Self::Float(a), Self::Integer(b)) => {
                a.total_cmp(&(*b as f64)).then(Ordering::Greater)
            }
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (Self::Array(a), Self::Array(b)) => {
                for (x, y) in a.iter().zip(b) {
                    let ord = x.total_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Self::Object(a), Self::Object(b)) => {
                let mut left: Vec<_> = a.iter().collect();
                let mut right: Vec<_> = b.iter().collect();
                left.sort_by(|x, y| x.0.cmp(y.0));
                right.sort_by(|x, y| x.0.cmp(y.0));
                for ((ka, va), (kb, vb)) in left.iter().zip(&right) {
                    let ord = ka.cmp(kb).then_with(|| va.total_cmp(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                left.len().cmp(&right.len())
            }
            (Self::Null, Self::Null) => Ordering::Equal,
            _ => self.rank().cmp(&other.rank()),
        }
    }

    const fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Boolean(_) => 1,
            Self::Integer(_) | Self::Float(_) => 2,
            Self::String(_) => 3,
            Self::Date(_) => 4,
            Self::Array(_) => 5,
            Self::Object(_) => 6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_loose_equality_crosses_numeric_types() {
        assert!(FactValue::Integer(3).loose_eq(&FactValue::Float(3.0)));
        assert!(!FactValue::Integer(3).loose_eq(&FactValue::Float(3.5)));
        assert!(!FactValue::Integer(3).loose_eq(&FactValue::String("3".into())));
        assert!(
            FactValue::Array(vec![1.into(), 2.0.into()])
                .loose_eq(&FactValue::Array(vec![1.0.into(), 2.into()]))
        );
    }

    #[test]
    fn test_index_key_normalises_integral_floats() {
        assert_eq!(FactValue::Float(42.0).index_key(), FactValue::Integer(42));
        assert_eq!(FactValue::Float(4.5).index_key(), FactValue::Float(4.5));
        assert_eq!(FactValue::from("x").index_key(), FactValue::from("x"));
    }

    #[test]
    fn test_json_conversion() {
        let json = serde_json::json!({"score": 550, "ratio": 0.5, "tags": ["a"], "gone": null});
        let value = FactValue::try_from(&json).unwrap();
        let FactValue::Object(map) = &value else { panic!("expected object") };
        assert_eq!(map["score"], FactValue::Integer(550));
        assert_eq!(map["ratio"], FactValue::Float(0.5));
        assert_eq!(map["gone"], FactValue::Null);
        assert_eq!(serde_json::Value::from(&value), json);
    }

    #[test]
    fn test_cross_type_ordering() {
        assert!(FactValue::Integer(1) < FactValue::Float(1.5));
        assert_eq!(FactValue::from("a").partial_cmp(&FactValue::Integer(1)), None);
        assert_eq!(FactValue::Null.total_cmp(&FactValue::Boolean(false)), Ordering::Less);
    }

    fn scalar() -> impl Strategy<Value = FactValue> {
        prop_oneof![
            any::<i64>().prop_map(FactValue::Integer),
            (-1.0e9f64..1.0e9).prop_map(FactValue::Float),
            any::<bool>().prop_map(FactValue::Boolean),
            "[a-z]{0,6}".prop_map(FactValue::String),
            Just(FactValue::Null),
        ]
    }

    proptest! {
        #[test]
        fn total_cmp_is_antisymmetric(a in scalar(), b in scalar()) {
            prop_assert_eq!(a.total_cmp(&b), b.total_cmp(&a).reverse());
        }

        #[test]
        fn loose_eq_values_share_index_key(a in scalar(), b in scalar()) {
            if a.loose_eq(&b) {
                prop_assert_eq!(a.index_key(), b.index_key());
            }
        }
    }
}
