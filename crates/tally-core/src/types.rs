//! Core data types: facts, handles, fact type declarations and bindings

use crate::error::{TallyError, TallyResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use tally_types::FactValue;

/// Stable identity of one logical fact inside a session
///
/// Handles are issued in increasing order and never reused, so ordering by handle
/// is ordering by first insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FactHandle(pub u64);

impl fmt::Display for FactHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A typed record held in working memory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fact {
    pub fact_type: String,
    pub fields: HashMap<String, FactValue>,
}

impl Hash for Fact {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fact_type.hash(state);
        let mut sorted: Vec<_> = self.fields.iter().collect();
        sorted.sort_by_key(|(k, _)| *k);
        for (key, value) in sorted {
            key.hash(state);
            value.hash(state);
        }
    }
}

impl Fact {
    pub fn new(fact_type: impl Into<String>) -> Self {
        Self { fact_type: fact_type.into(), fields: HashMap::new() }
    }

    /// Builder-style field assignment
    pub fn with(mut self, field: impl Into<String>, value: impl Into<FactValue>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<FactValue>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&FactValue> {
        self.fields.get(field)
    }

    /// Field value, `Null` when the field is absent
    pub fn value(&self, field: &str) -> FactValue {
        self.fields.get(field).cloned().unwrap_or(FactValue::Null)
    }

    /// Build a fact from a JSON object
    pub fn from_json(fact_type: &str, json: &serde_json::Value) -> TallyResult<Self> {
        let serde_json::Value::Object(map) = json else {
            return Err(TallyError::schema(fact_type, "fact payload must be a JSON object"));
        };
        let mut fact = Fact::new(fact_type);
        for (key, value) in map {
            let value = FactValue::try_from(value)
                .map_err(|e| TallyError::schema(fact_type, format!("field '{key}': {e}")))?;
            fact.fields.insert(key.clone(), value);
        }
        Ok(fact)
    }
}

/// Declared type of a fact field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Float,
    /// Integer or float
    Number,
    Boolean,
    Array,
    Object,
    Date,
    Any,
}

impl FieldType {
    pub fn accepts(self, value: &FactValue) -> bool {
        match (self, value) {
            (_, FactValue::Null) | (FieldType::Any, _) => true,
            (FieldType::String, FactValue::String(_))
            | (FieldType::Integer, FactValue::Integer(_))
            | (FieldType::Float, FactValue::Float(_) | FactValue::Integer(_))
            | (FieldType::Number, FactValue::Float(_) | FactValue::Integer(_))
            | (FieldType::Boolean, FactValue::Boolean(_))
            | (FieldType::Array, FactValue::Array(_))
            | (FieldType::Object, FactValue::Object(_))
            | (FieldType::Date, FactValue::Date(_)) => true,
            _ => false,
        }
    }
}

/// Whether instances of a type are plain facts or timestamped events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactRole {
    Fact,
    Event,
}

/// Declaration of a fact type: its fields and temporal role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactType {
    pub name: String,
    pub fields: BTreeMap<String, FieldType>,
    pub role: FactRole,
    /// Field carrying the event time (epoch millis or date); session clock otherwise
    pub timestamp_field: Option<String>,
    /// Events are retracted automatically once this long past their timestamp
    pub expires_after: Option<Duration>,
}

impl FactType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
            role: FactRole::Fact,
            timestamp_field: None,
            expires_after: None,
        }
    }

    pub fn event(name: impl Into<String>) -> Self {
        Self { role: FactRole::Event, ..Self::new(name) }
    }

    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(name.into(), field_type);
        self
    }

    pub fn timestamp(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        self.fields.entry(field.clone()).or_insert(FieldType::Any);
        self.timestamp_field = Some(field);
        self
    }

    pub fn expires_after(mut self, after: Duration) -> Self {
        self.expires_after = Some(after);
        self
    }

    pub fn is_event(&self) -> bool {
        self.role == FactRole::Event
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Check that a fact conforms to this declaration
    pub fn validate(&self, fact: &Fact) -> TallyResult<()> {
        for (field, value) in &fact.fields {
            match self.fields.get(field) {
                None => {
                    return Err(TallyError::schema(
                        &self.name,
                        format!("undeclared field '{field}'"),
                    ));
                }
                Some(expected) if !expected.accepts(value) => {
                    return Err(TallyError::schema(
                        &self.name,
                        format!(
                            "field '{field}' expects {expected:?}, got {}",
                            value.type_name()
                        ),
                    ));
                }
                Some(_) => {}
            }
        }
        if let Some(ts_field) = &self.timestamp_field {
            let value = fact.value(ts_field);
            if !value.is_null() && value.as_epoch_millis().is_none() {
                return Err(TallyError::schema(
                    &self.name,
                    format!("timestamp field '{ts_field}' must be epoch millis or a date"),
                ));
            }
        }
        Ok(())
    }
}

/// Variables bound by one match: fact variables to handles, value variables to values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub facts: BTreeMap<String, FactHandle>,
    pub values: BTreeMap<String, FactValue>,
    /// Every fact the match depends on, in pattern order
    pub handles: Vec<FactHandle>,
}

impl Binding {
    pub fn handle(&self, variable: &str) -> Option<FactHandle> {
        self.facts.get(variable).copied()
    }

    pub fn value(&self, variable: &str) -> Option<&FactValue> {
        self.values.get(variable)
    }

    pub fn depends_on(&self, handle: FactHandle) -> bool {
        self.handles.contains(&handle)
    }
}
