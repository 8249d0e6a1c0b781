use super::EntityFields;
use serde::{Deserialize, Serialize};
use std::fmt;

/// キューに積むミューテーションの種類と、その種類ごとのペイロード
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ActionKind {
    /// 触れたフィールドの最新状態。同一エンティティの後続更新と合流できる
    UpdateEntity { fields: EntityFields },
    /// 新規リソースの作成。合流させない
    CreateResource { fields: EntityFields },
}

impl ActionKind {
    pub fn fields(&self) -> &EntityFields {
        match self {
            ActionKind::UpdateEntity { fields } | ActionKind::CreateResource { fields } => fields,
        }
    }

    pub fn fields_mut(&mut self) -> &mut EntityFields {
        match self {
            ActionKind::UpdateEntity { fields } | ActionKind::CreateResource { fields } => fields,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::UpdateEntity { .. } => "update_entity",
            ActionKind::CreateResource { .. } => "create_resource",
        }
    }

    pub fn is_coalescable(&self) -> bool {
        matches!(self, ActionKind::UpdateEntity { .. })
    }

    pub fn same_type(&self, other: &ActionKind) -> bool {
        self.as_str() == other.as_str()
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
