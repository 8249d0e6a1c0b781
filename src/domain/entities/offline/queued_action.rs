use crate::domain::value_objects::{
    ActionFailure, ActionKind, EntityFields, EntityKey, FailureKind, OriginatorId, QueueStatus,
    QueuedActionId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// キューへ追加する際のドラフト。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedActionDraft {
    pub entity: EntityKey,
    pub kind: ActionKind,
    pub originator: OriginatorId,
}

impl QueuedActionDraft {
    pub fn new(entity: EntityKey, kind: ActionKind, originator: OriginatorId) -> Self {
        Self {
            entity,
            kind,
            originator,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedAction {
    pub id: QueuedActionId,
    pub sequence: u64,
    pub entity: EntityKey,
    pub kind: ActionKind,
    pub originator: OriginatorId,
    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: QueueStatus,
    #[serde(default)]
    pub last_error: Option<ActionFailure>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub force_write: bool,
    /// 送信試行後にペイロードが合流した回数。冪等キーに反映する
    #[serde(default)]
    pub revision: u32,
}

impl QueuedAction {
    pub fn from_draft(draft: QueuedActionDraft, sequence: u64, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            id: QueuedActionId::generate(enqueued_at),
            sequence,
            entity: draft.entity,
            kind: draft.kind,
            originator: draft.originator,
            enqueued_at,
            updated_at: enqueued_at,
            status: QueueStatus::Queued,
            last_error: None,
            attempts: 0,
            force_write: false,
            revision: 0,
        }
    }

    /// リモート書き込みの冪等キー
    pub fn idempotency_key(&self) -> String {
        if self.revision == 0 {
            self.id.to_string()
        } else {
            format!("{}.{}", self.id, self.revision)
        }
    }

    /// 後続の更新を自分のペイロードに合流させられるか
    pub fn can_absorb(&self, draft: &QueuedActionDraft) -> bool {
        matches!(self.status, QueueStatus::Queued | QueueStatus::Failed)
            && self.entity == draft.entity
            && self.originator == draft.originator
            && self.kind.is_coalescable()
            && self.kind.same_type(&draft.kind)
    }

    /// 後続の更新をフィールド単位で合流させる。
    /// 一度送信を試みたペイロードは内容が変わるので冪等キーを進める。
    pub fn absorb(&mut self, fields: &EntityFields, now: DateTime<Utc>) {
        self.kind.fields_mut().merge_from(fields);
        if self.attempts > 0 {
            self.revision = self.revision.saturating_add(1);
        }
        if !self.reopen(now) {
            self.updated_at = now;
        }
    }

    /// 新しいローカル編集を受けて失敗状態を解く。コンフリクトは明示的な解決まで残す
    pub fn reopen(&mut self, now: DateTime<Utc>) -> bool {
        let conflicted = self
            .last_error
            .as_ref()
            .map(|failure| failure.kind == FailureKind::Conflict)
            .unwrap_or(false);
        if self.status != QueueStatus::Failed || conflicted {
            return false;
        }
        self.reset_to_queued(now);
        true
    }

    /// 恒久失敗・コンフリクトで止まっており、明示的な解除が必要
    pub fn is_blocked(&self) -> bool {
        self.status == QueueStatus::Failed
            && self
                .last_error
                .as_ref()
                .map(|failure| !failure.is_retryable())
                .unwrap_or(false)
    }

    pub fn mark_in_flight(&mut self, now: DateTime<Utc>) {
        self.status = QueueStatus::InFlight;
        self.attempts = self.attempts.saturating_add(1);
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, failure: ActionFailure) {
        self.updated_at = failure.failed_at;
        self.status = QueueStatus::Failed;
        self.last_error = Some(failure);
    }

    pub fn reset_to_queued(&mut self, now: DateTime<Utc>) {
        self.status = QueueStatus::Queued;
        self.last_error = None;
        self.updated_at = now;
    }
}
