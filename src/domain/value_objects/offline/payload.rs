use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// トップレベルのフィールド集合。マージはフィールド単位で後勝ち。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityFields(Map<String, Value>);

impl EntityFields {
    pub fn new(value: Value) -> Result<Self, String> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err("Entity fields must be a JSON object".to_string()),
        }
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn from_json_str(json: &str) -> Result<Self, String> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| format!("Invalid JSON payload: {e}"))?;
        Self::new(value)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn field_names(&self) -> BTreeSet<String> {
        self.0.keys().cloned().collect()
    }

    /// `other` のフィールドで上書きする
    pub fn merge_from(&mut self, other: &EntityFields) {
        for (field, value) in other.0.iter() {
            self.0.insert(field.clone(), value.clone());
        }
    }

    pub fn merged_with(&self, other: &EntityFields) -> EntityFields {
        let mut merged = self.clone();
        merged.merge_from(other);
        merged
    }

    pub fn insert(&mut self, field: String, value: Value) {
        self.0.insert(field, value);
    }

    /// 指定フィールドだけを取り出した部分集合
    pub fn project<'a, I>(&self, fields: I) -> EntityFields
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut projected = Map::new();
        for field in fields {
            if let Some(value) = self.0.get(field) {
                projected.insert(field.clone(), value.clone());
            }
        }
        EntityFields(projected)
    }
}

impl From<EntityFields> for Value {
    fn from(fields: EntityFields) -> Self {
        Value::Object(fields.0)
    }
}
