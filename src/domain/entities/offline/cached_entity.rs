use crate::domain::value_objects::{EntityFields, EntityKey, SyncStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// リモート書き込み成功時に、コーディネーターからキャッシュへ渡す確定情報
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfirmation {
    pub remote_snapshot: EntityFields,
    pub remote_version: u64,
    pub synced_at: DateTime<Utc>,
    /// 今回書き込んだフィールド
    pub written_fields: BTreeSet<String>,
    /// 同じエンティティでまだ未送信のアクションが触れるフィールド
    pub outstanding_fields: BTreeSet<String>,
    /// 未送信のアクションが残っているか
    pub has_outstanding_actions: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntity {
    pub key: EntityKey,
    pub data: EntityFields,
    pub last_modified: DateTime<Utc>,
    pub last_synced: Option<DateTime<Utc>>,
    pub sync_status: SyncStatus,
    #[serde(default)]
    pub remote_data: EntityFields,
    #[serde(default)]
    pub remote_version: Option<u64>,
    #[serde(default)]
    pub dirty_fields: BTreeSet<String>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl CachedEntity {
    pub fn seed(key: EntityKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            data: EntityFields::default(),
            last_modified: now,
            last_synced: None,
            sync_status: SyncStatus::Pending,
            remote_data: EntityFields::default(),
            remote_version: None,
            dirty_fields: BTreeSet::new(),
            last_error: None,
        }
    }

    pub fn apply_local(&mut self, mutation: &EntityFields, now: DateTime<Utc>) {
        self.data.merge_from(mutation);
        self.dirty_fields.extend(mutation.field_names());
        self.last_modified = now;
        self.sync_status = SyncStatus::Pending;
        self.last_error = None;
    }

    /// リモート確定スナップショットを取り込み、両側で食い違ったフィールドを返す。
    ///
    /// 書き込んでいないフィールドは前回スナップショットと比較する:
    /// リモートだけが変えたものは採用、ローカルだけが変えたものは保持、
    /// 双方が別の値に変えたものはローカルを残してコンフリクトとして報告する。
    pub fn reconcile(&mut self, confirmation: &SyncConfirmation) -> Vec<String> {
        let mut conflicting = Vec::new();

        for (field, remote_value) in confirmation.remote_snapshot.as_map() {
            let outstanding = confirmation.outstanding_fields.contains(field);
            if confirmation.written_fields.contains(field) {
                if !outstanding {
                    self.data.insert(field.clone(), remote_value.clone());
                }
                continue;
            }

            let remote_changed = self.remote_data.get(field) != Some(remote_value);
            if !remote_changed {
                continue;
            }

            if outstanding {
                if self.data.get(field) != Some(remote_value) {
                    conflicting.push(field.clone());
                }
            } else {
                self.data.insert(field.clone(), remote_value.clone());
            }
        }

        self.remote_data = confirmation.remote_snapshot.clone();
        self.remote_version = Some(confirmation.remote_version);
        self.dirty_fields = confirmation.outstanding_fields.clone();
        self.last_synced = Some(confirmation.synced_at);

        if confirmation.has_outstanding_actions {
            self.sync_status = SyncStatus::Pending;
        } else {
            self.sync_status = SyncStatus::Synced;
            self.last_error = None;
        }

        conflicting
    }

    /// 再取得したリモート状態の上に、未確定のローカル変更を載せ直す
    pub fn rebase(&mut self, remote_snapshot: &EntityFields, remote_version: u64) {
        for (field, remote_value) in remote_snapshot.as_map() {
            if !self.dirty_fields.contains(field) {
                self.data.insert(field.clone(), remote_value.clone());
            }
        }
        self.remote_data = remote_snapshot.clone();
        self.remote_version = Some(remote_version);
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.sync_status = SyncStatus::Error;
        self.last_error = Some(message.into());
    }

    /// 最後に確定したリモート状態へ戻す。一度も同期していなければ何もしない。
    pub fn rollback(&mut self) -> bool {
        let Some(last_synced) = self.last_synced else {
            return false;
        };
        self.data = self.remote_data.clone();
        self.dirty_fields.clear();
        self.last_modified = last_synced;
        self.sync_status = SyncStatus::Synced;
        self.last_error = None;
        true
    }

    /// 破棄されずに残ったアクションのペイロードだけを最後の確定状態に載せ直す。
    /// 一度も同期していない場合は空の状態から積み直す。
    pub fn replay_pending<'a, I>(&mut self, pending: I, now: DateTime<Utc>)
    where
        I: IntoIterator<Item = &'a EntityFields>,
    {
        self.data = self.remote_data.clone();
        self.dirty_fields.clear();
        for fields in pending {
            self.apply_local(fields, now);
        }
    }

    pub fn mark_pending(&mut self) {
        self.sync_status = SyncStatus::Pending;
        self.last_error = None;
    }

    /// ローカル変更のうちまだ確定していない部分
    pub fn local_changes(&self) -> EntityFields {
        self.data.project(self.dirty_fields.iter())
    }
}
