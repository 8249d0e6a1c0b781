use crate::application::ports::durable_store::{LocalDurableStore, read_record, write_record};
use crate::domain::entities::{QueuedAction, QueuedActionDraft};
use crate::domain::value_objects::{
    ActionFailure, EntityKey, OriginatorId, QueueStatus, QueuedActionId,
};
use crate::shared::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const QUEUE_KEY: &str = "offline/queue";

/// ストアに丸ごと保存するキュー本体。`actions` は常に `sequence` 昇順。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct QueueDocument {
    next_sequence: u64,
    actions: Vec<QueuedAction>,
}

impl QueueDocument {
    fn position(&self, id: &QueuedActionId) -> Option<usize> {
        self.actions.iter().position(|action| &action.id == id)
    }

    fn last_pending_for(&mut self, entity: &EntityKey) -> Option<&mut QueuedAction> {
        self.actions
            .iter_mut()
            .rev()
            .find(|action| &action.entity == entity && action.status.is_pending())
    }
}

/// 未送信ミューテーションの順序付きログ。
/// 読み出しは毎回永続状態から行い、読み書きの組は内部ロックで直列化する。
pub struct ActionQueue {
    store: Arc<dyn LocalDurableStore>,
    coalesce: bool,
    lock: Mutex<()>,
}

impl ActionQueue {
    pub fn new(store: Arc<dyn LocalDurableStore>, coalesce: bool) -> Self {
        Self {
            store,
            coalesce,
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<QueueDocument, AppError> {
        Ok(read_record::<QueueDocument>(self.store.as_ref(), QUEUE_KEY)
            .await?
            .unwrap_or_default())
    }

    async fn mutate<F, R>(&self, apply: F) -> Result<R, AppError>
    where
        F: FnOnce(&mut QueueDocument, DateTime<Utc>) -> Result<R, AppError> + Send,
        R: Send,
    {
        let _guard = self.lock.lock().await;
        let mut document = self.load().await?;
        let result = apply(&mut document, Utc::now())?;
        write_record(self.store.as_ref(), QUEUE_KEY, &document).await?;
        Ok(result)
    }

    pub async fn enqueue(&self, draft: QueuedActionDraft) -> Result<QueuedActionId, AppError> {
        let coalesce = self.coalesce;
        self.mutate(move |document, now| {
            // 新しい編集はそのエンティティの失敗を解き、次のドレインで再送させる
            let reopened = document
                .actions
                .iter_mut()
                .filter(|action| action.entity == draft.entity)
                .fold(0usize, |count, action| count + usize::from(action.reopen(now)));
            if reopened > 0 {
                info!(
                    target: "offline::queue",
                    entity = %draft.entity,
                    reopened,
                    "new local edit reopened failed actions"
                );
            }

            if coalesce {
                if let Some(existing) = document.last_pending_for(&draft.entity) {
                    if existing.can_absorb(&draft) {
                        existing.absorb(draft.kind.fields(), now);
                        debug!(
                            target: "offline::queue",
                            action_id = %existing.id,
                            entity = %existing.entity,
                            "coalesced update into pending action"
                        );
                        return Ok(existing.id.clone());
                    }
                }
            }

            document.next_sequence += 1;
            let action = QueuedAction::from_draft(draft, document.next_sequence, now);
            let id = action.id.clone();
            debug!(
                target: "offline::queue",
                action_id = %id,
                entity = %action.entity,
                kind = %action.kind,
                sequence = action.sequence,
                "enqueued action"
            );
            document.actions.push(action);
            Ok(id)
        })
        .await
    }

    pub async fn list_pending(&self) -> Result<Vec<QueuedAction>, AppError> {
        let document = self.load().await?;
        Ok(document
            .actions
            .into_iter()
            .filter(|action| action.status.is_pending())
            .collect())
    }

    pub async fn list_pending_for(
        &self,
        originator: &OriginatorId,
    ) -> Result<Vec<QueuedAction>, AppError> {
        Ok(self
            .list_pending()
            .await?
            .into_iter()
            .filter(|action| &action.originator == originator)
            .collect())
    }

    pub async fn pending_for(&self, entity: &EntityKey) -> Result<Vec<QueuedAction>, AppError> {
        Ok(self
            .list_pending()
            .await?
            .into_iter()
            .filter(|action| &action.entity == entity)
            .collect())
    }

    pub async fn pending_count(&self) -> Result<usize, AppError> {
        Ok(self.list_pending().await?.len())
    }

    pub async fn get(&self, id: &QueuedActionId) -> Result<Option<QueuedAction>, AppError> {
        let document = self.load().await?;
        Ok(document.actions.into_iter().find(|action| &action.id == id))
    }

    pub async fn mark_in_flight(&self, id: &QueuedActionId) -> Result<QueuedAction, AppError> {
        self.mutate(|document, now| {
            let index = document
                .position(id)
                .ok_or_else(|| AppError::NotFound(format!("Queued action {id}")))?;
            let action = &mut document.actions[index];
            action.mark_in_flight(now);
            Ok(action.clone())
        })
        .await
    }

    /// 完了したアクションを取り除く。既に無ければ `false`
    pub async fn mark_completed(&self, id: &QueuedActionId) -> Result<bool, AppError> {
        let removed = self
            .mutate(|document, _| {
                Ok(document
                    .position(id)
                    .map(|index| document.actions.remove(index)))
            })
            .await?;

        if let Some(action) = &removed {
            debug!(
                target: "offline::queue",
                action_id = %action.id,
                attempts = action.attempts,
                "action completed"
            );
        }
        Ok(removed.is_some())
    }

    pub async fn mark_failed(
        &self,
        id: &QueuedActionId,
        failure: ActionFailure,
    ) -> Result<QueuedAction, AppError> {
        self.mutate(move |document, _| {
            let index = document
                .position(id)
                .ok_or_else(|| AppError::NotFound(format!("Queued action {id}")))?;
            let action = &mut document.actions[index];
            action.mark_failed(failure);
            Ok(action.clone())
        })
        .await
    }

    /// 利用者の明示的な破棄。送信中のアクションは破棄できない
    pub async fn discard(&self, id: &QueuedActionId) -> Result<Option<QueuedAction>, AppError> {
        let removed = self
            .mutate(|document, _| {
                let Some(index) = document.position(id) else {
                    return Ok(None);
                };
                if document.actions[index].status == QueueStatus::InFlight {
                    return Err(AppError::ValidationError(format!(
                        "Queued action {id} is in flight and cannot be discarded"
                    )));
                }
                Ok(Some(document.actions.remove(index)))
            })
            .await?;

        if let Some(action) = &removed {
            info!(
                target: "offline::queue",
                action_id = %action.id,
                entity = %action.entity,
                "discarded queued action"
            );
        }
        Ok(removed)
    }

    /// エンティティの失敗アクションを `queued` に戻す。
    /// `force` の場合は次回の書き込みでバージョン検査を行わない。
    pub async fn reset_for_retry(&self, entity: &EntityKey, force: bool) -> Result<usize, AppError> {
        self.mutate(|document, now| {
            let mut reset = 0usize;
            for action in document
                .actions
                .iter_mut()
                .filter(|action| &action.entity == entity)
            {
                if action.status == QueueStatus::InFlight {
                    continue;
                }
                if action.status == QueueStatus::Failed {
                    action.reset_to_queued(now);
                    reset += 1;
                }
                if force {
                    action.force_write = true;
                }
            }
            Ok(reset)
        })
        .await
    }

    /// 前回プロセスが送信途中で落ちたアクションを `queued` に戻す
    pub async fn recover_in_flight(&self) -> Result<usize, AppError> {
        let recovered = self
            .mutate(|document, now| {
                let mut recovered = 0usize;
                for action in document
                    .actions
                    .iter_mut()
                    .filter(|action| action.status == QueueStatus::InFlight)
                {
                    action.reset_to_queued(now);
                    recovered += 1;
                }
                Ok(recovered)
            })
            .await?;

        if recovered > 0 {
            info!(
                target: "offline::queue",
                recovered,
                "recovered in-flight actions after restart"
            );
        }
        Ok(recovered)
    }
}
