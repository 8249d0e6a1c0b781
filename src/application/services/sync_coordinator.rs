use crate::application::ports::{
    ConnectivitySource, MergeWrite, RemoteDocument, RemoteDocumentStore, RemoteStoreError,
};
use crate::application::services::action_queue::ActionQueue;
use crate::application::services::entity_cache::EntityCache;
use crate::application::services::sync_status::SyncStatusPublisher;
use crate::domain::entities::{
    DrainReport, DrainTrigger, FailedDispatch, QueuedAction, SyncConfirmation, SyncStatusSnapshot,
};
use crate::domain::value_objects::{ActionFailure, EntityKey, FailureKind};
use crate::infrastructure::offline::metrics;
use crate::shared::error::AppError;
use chrono::Utc;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// キューをリモートへ流し込む。ドレインは同時に 1 つだけ走る。
pub struct SyncCoordinator {
    queue: Arc<ActionQueue>,
    cache: Arc<EntityCache>,
    status: Arc<SyncStatusPublisher>,
    remote: Arc<dyn RemoteDocumentStore>,
    connectivity: Arc<dyn ConnectivitySource>,
    gate: Mutex<()>,
    intake: Mutex<()>,
    redrain: AtomicBool,
    syncing: AtomicBool,
}

impl SyncCoordinator {
    pub fn new(
        queue: Arc<ActionQueue>,
        cache: Arc<EntityCache>,
        status: Arc<SyncStatusPublisher>,
        remote: Arc<dyn RemoteDocumentStore>,
        connectivity: Arc<dyn ConnectivitySource>,
    ) -> Self {
        Self {
            queue,
            cache,
            status,
            remote,
            connectivity,
            gate: Mutex::new(()),
            intake: Mutex::new(()),
            redrain: AtomicBool::new(false),
            syncing: AtomicBool::new(false),
        }
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// キャッシュとキューの組をまたぐ更新（ローカル適用とエンキュー、完了後の確定処理）を直列化する
    pub async fn lock_intake(&self) -> MutexGuard<'_, ()> {
        self.intake.lock().await
    }

    pub fn trigger(self: &Arc<Self>, trigger: DrainTrigger) {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = coordinator.drain(trigger).await {
                error!(target: "offline::coordinator", error = %err, "background drain failed");
            }
        });
    }

    pub async fn status_snapshot(&self) -> Result<SyncStatusSnapshot, AppError> {
        let pending = self.queue.pending_count().await?;
        Ok(self
            .status
            .publish(self.is_online(), self.is_syncing(), pending)
            .await)
    }

    pub async fn publish_status(&self) {
        if let Err(err) = self.status_snapshot().await {
            warn!(target: "offline::coordinator", error = %err, "failed to publish sync status");
        }
    }

    /// キューを先頭から処理する。オフライン、または別のドレインが実行中なら `None`。
    /// 実行中に要求された場合は、実行中のドレインがもう 1 パス回す。
    pub async fn drain(&self, trigger: DrainTrigger) -> Result<Option<DrainReport>, AppError> {
        let mut report: Option<DrainReport> = None;
        let mut succeeded = false;

        loop {
            if !self.is_online() {
                debug!(target: "offline::coordinator", %trigger, "offline; drain skipped");
                break;
            }
            let guard = match self.gate.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    self.redrain.store(true, Ordering::SeqCst);
                    debug!(
                        target: "offline::coordinator",
                        %trigger,
                        "drain already running; re-drain requested"
                    );
                    break;
                }
            };
            self.redrain.store(false, Ordering::SeqCst);

            let current =
                report.get_or_insert_with(|| DrainReport::new(trigger.clone(), Utc::now()));
            let outcome = self.run_locked(current).await;
            drop(guard);
            match outcome {
                Ok(all_succeeded) => succeeded = all_succeeded,
                Err(err) => {
                    metrics::record_drain(current, false);
                    return Err(err);
                }
            }

            // ゲート解放の直前に来た要求を取りこぼさない
            if current.interrupted || !self.redrain.load(Ordering::SeqCst) {
                break;
            }
        }

        // レポートは外側のループ全体で累積するので、メトリクスは 1 回だけ記録する
        if let Some(report) = &report {
            metrics::record_drain(report, succeeded);
        }
        Ok(report)
    }

    /// 1 回分のパス群を実行し、すべて成功したかを返す
    async fn run_locked(&self, report: &mut DrainReport) -> Result<bool, AppError> {
        self.syncing.store(true, Ordering::SeqCst);
        self.publish_status().await;
        info!(target: "offline::coordinator", trigger = %report.trigger, "drain started");

        let result = self.run_passes(report).await;
        report.finished_at = Utc::now();

        let succeeded = result.is_ok() && report.all_succeeded();
        let recorded = self
            .status
            .record_attempt(report.started_at, succeeded)
            .await;
        self.syncing.store(false, Ordering::SeqCst);
        self.publish_status().await;

        match &result {
            Ok(()) => info!(
                target: "offline::coordinator",
                trigger = %report.trigger,
                passes = report.passes,
                completed = report.completed.len(),
                failed = report.failed.len(),
                skipped = report.skipped,
                interrupted = report.interrupted,
                "drain finished"
            ),
            Err(err) => error!(
                target: "offline::coordinator",
                trigger = %report.trigger,
                error = %err,
                "drain aborted"
            ),
        }

        result.and(recorded).map(|()| succeeded)
    }

    async fn run_passes(&self, report: &mut DrainReport) -> Result<(), AppError> {
        loop {
            report.passes += 1;
            self.run_pass(report).await?;
            if report.interrupted || !self.redrain.swap(false, Ordering::SeqCst) {
                return Ok(());
            }
            debug!(target: "offline::coordinator", "re-drain requested during pass");
        }
    }

    async fn run_pass(&self, report: &mut DrainReport) -> Result<(), AppError> {
        let pending = self.queue.list_pending().await?;
        let mut blocked: HashSet<EntityKey> = HashSet::new();

        for action in pending {
            if blocked.contains(&action.entity) {
                report.skipped += 1;
                continue;
            }
            if action.is_blocked() {
                blocked.insert(action.entity.clone());
                report.skipped += 1;
                continue;
            }
            if !self.is_online() {
                warn!(target: "offline::coordinator", "connectivity lost; stopping pass");
                report.interrupted = true;
                break;
            }

            if !self.dispatch(action.clone(), report).await {
                blocked.insert(action.entity);
            }
        }

        Ok(())
    }

    /// 1 件送信する。成功なら `true`
    async fn dispatch(&self, action: QueuedAction, report: &mut DrainReport) -> bool {
        let action = match self.queue.mark_in_flight(&action.id).await {
            Ok(action) => action,
            Err(err) => {
                warn!(
                    target: "offline::coordinator",
                    action_id = %action.id,
                    error = %err,
                    "could not mark action in flight; leaving it queued"
                );
                report.failed.push(FailedDispatch {
                    action_id: action.id.clone(),
                    entity: action.entity.clone(),
                    kind: FailureKind::Transient,
                    message: err.to_string(),
                });
                return false;
            }
        };

        match self.write_with_retry(&action).await {
            Ok(document) => self.complete(&action, document, report).await,
            Err(failure) => {
                self.fail(&action, failure, report).await;
                false
            }
        }
    }

    async fn write_with_retry(&self, action: &QueuedAction) -> Result<RemoteDocument, ActionFailure> {
        let expected_version = if action.force_write {
            None
        } else {
            self.cache
                .read(&action.entity)
                .await
                .map_err(|err| ActionFailure::transient(err.to_string()))?
                .and_then(|entity| entity.remote_version)
        };

        match self.remote.merge_write(build_write(action, expected_version)).await {
            Ok(document) => return Ok(document),
            Err(err) if err.is_conflict() => {
                info!(
                    target: "offline::coordinator",
                    action_id = %action.id,
                    entity = %action.entity,
                    error = %err,
                    "version conflict; rebasing onto remote"
                );
            }
            Err(err) => return Err(classify(err)),
        }

        let latest = self
            .remote
            .get(&action.entity.entity_type, &action.entity.entity_id)
            .await
            .map_err(classify)?;
        let retry_version = match &latest {
            Some(document) => {
                self.cache
                    .rebase(&action.entity, &document.data, document.version)
                    .await
                    .map_err(|err| ActionFailure::transient(err.to_string()))?;
                Some(document.version)
            }
            None => None,
        };

        match self.remote.merge_write(build_write(action, retry_version)).await {
            Ok(document) => Ok(document),
            Err(err) if err.is_conflict() => Err(ActionFailure::conflict(err.to_string())),
            Err(err) => Err(classify(err)),
        }
    }

    async fn complete(
        &self,
        action: &QueuedAction,
        document: RemoteDocument,
        report: &mut DrainReport,
    ) -> bool {
        let _intake = self.lock_intake().await;

        if let Err(err) = self.queue.mark_completed(&action.id).await {
            warn!(
                target: "offline::coordinator",
                action_id = %action.id,
                error = %err,
                "remote write succeeded but the queue could not be updated"
            );
            let failure = ActionFailure::transient(err.to_string());
            if let Err(err) = self.queue.mark_failed(&action.id, failure.clone()).await {
                // in_flight のまま残り、次回起動時に再送される
                warn!(target: "offline::coordinator", action_id = %action.id, error = %err, "could not record failure");
            }
            report.failed.push(failed_dispatch(action, &failure));
            return false;
        }
        report.completed.push(action.id.clone());

        let remaining = match self.queue.pending_for(&action.entity).await {
            Ok(remaining) => remaining,
            Err(err) => {
                warn!(
                    target: "offline::coordinator",
                    entity = %action.entity,
                    error = %err,
                    "could not read remaining actions; cache left pending"
                );
                return true;
            }
        };
        let outstanding_fields: BTreeSet<String> = remaining
            .iter()
            .flat_map(|pending| pending.kind.fields().field_names())
            .collect();

        let confirmation = SyncConfirmation {
            remote_snapshot: document.data,
            remote_version: document.version,
            synced_at: Utc::now(),
            written_fields: action.kind.fields().field_names(),
            outstanding_fields,
            has_outstanding_actions: !remaining.is_empty(),
        };

        match self.cache.mark_synced(&action.entity, &confirmation).await {
            Ok(conflicting) if !conflicting.is_empty() => {
                match self.status.add_conflict(&action.entity).await {
                    Ok(true) => report.new_conflicts.push(action.entity.clone()),
                    Ok(false) => {}
                    Err(err) => warn!(
                        target: "offline::coordinator",
                        entity = %action.entity,
                        error = %err,
                        "could not record conflict"
                    ),
                }
            }
            Ok(_) => {}
            Err(err) => warn!(
                target: "offline::coordinator",
                entity = %action.entity,
                error = %err,
                "could not confirm cached entity"
            ),
        }

        debug!(
            target: "offline::coordinator",
            action_id = %action.id,
            entity = %action.entity,
            version = confirmation.remote_version,
            "action synced"
        );
        true
    }

    async fn fail(&self, action: &QueuedAction, failure: ActionFailure, report: &mut DrainReport) {
        warn!(
            target: "offline::coordinator",
            action_id = %action.id,
            entity = %action.entity,
            kind = failure.kind.as_str(),
            message = %failure.message,
            "dispatch failed"
        );
        report.failed.push(failed_dispatch(action, &failure));

        if let Err(err) = self.queue.mark_failed(&action.id, failure.clone()).await {
            warn!(target: "offline::coordinator", action_id = %action.id, error = %err, "could not record failure");
        }

        match failure.kind {
            FailureKind::Transient => {}
            FailureKind::Permanent => {
                if let Err(err) = self.cache.mark_error(&action.entity, &failure.message).await {
                    warn!(target: "offline::coordinator", entity = %action.entity, error = %err, "could not mark entity error");
                }
            }
            FailureKind::Conflict => {
                if let Err(err) = self.cache.mark_error(&action.entity, &failure.message).await {
                    warn!(target: "offline::coordinator", entity = %action.entity, error = %err, "could not mark entity error");
                }
                match self.status.add_conflict(&action.entity).await {
                    Ok(true) => report.new_conflicts.push(action.entity.clone()),
                    Ok(false) => {}
                    Err(err) => warn!(
                        target: "offline::coordinator",
                        entity = %action.entity,
                        error = %err,
                        "could not record conflict"
                    ),
                }
            }
        }
    }
}

fn build_write(action: &QueuedAction, expected_version: Option<u64>) -> MergeWrite {
    MergeWrite {
        collection: action.entity.entity_type.clone(),
        id: action.entity.entity_id.clone(),
        fields: action.kind.fields().clone(),
        expected_version,
        idempotency_key: action.idempotency_key(),
    }
}

fn classify(err: RemoteStoreError) -> ActionFailure {
    match err {
        RemoteStoreError::Transient(_) => ActionFailure::transient(err.to_string()),
        RemoteStoreError::VersionConflict { .. } => ActionFailure::conflict(err.to_string()),
        RemoteStoreError::Rejected(_) | RemoteStoreError::Unauthorized(_) => {
            ActionFailure::permanent(err.to_string())
        }
    }
}

fn failed_dispatch(action: &QueuedAction, failure: &ActionFailure) -> FailedDispatch {
    FailedDispatch {
        action_id: action.id.clone(),
        entity: action.entity.clone(),
        kind: failure.kind,
        message: failure.message.clone(),
    }
}
