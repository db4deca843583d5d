//! Audit recorder and the audited mutation pipeline.
//!
//! Every state change goes through [`AuditRecorder::mutate`] or
//! [`AuditRecorder::mutate_observed`]:
//!
//! ```text
//! validate -> pre-image (best-effort) -> commit within deadline
//!          -> post-image (best-effort) -> emit audit (best-effort) -> return
//! ```
//!
//! A failed or cancelled commit emits nothing. After a commit, neither a
//! failed post-image read nor a failed audit write turns the result into an
//! error; both are logged.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value as JsonValue};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use opsdesk_core::audit::verify_links;
use opsdesk_core::{
    AuditAction, AuditLogEntry, AuditLogRepository, AuditQuery, Auditable, ChainVerification,
    CoreError, CoreResult, MutationKind, Page, PageLimits, PageRequest, RequestContext,
    ResourceType, GENESIS_HASH,
};

const VERIFY_BATCH: u32 = 500;

pub struct AuditRecorder {
    repository: Arc<dyn AuditLogRepository>,
    append_lock: Mutex<()>,
    operation_timeout: Duration,
    limits: PageLimits,
}

impl AuditRecorder {
    #[must_use]
    pub fn new(
        repository: Arc<dyn AuditLogRepository>,
        operation_timeout: Duration,
        limits: PageLimits,
    ) -> Self {
        Self {
            repository,
            append_lock: Mutex::new(()),
            operation_timeout,
            limits,
        }
    }

    /// Persists one audit record for the caller in `ctx`.
    ///
    /// Never fails: a storage error is logged and `None` is returned.
    pub async fn record(
        &self,
        ctx: &RequestContext,
        action: AuditAction,
        resource_type: ResourceType,
        resource_id: impl Into<String>,
        details: JsonValue,
    ) -> Option<AuditLogEntry> {
        let (actor_id, actor_name) = ctx.actor();
        let entry = AuditLogEntry::new(actor_id, actor_name, action, resource_type, resource_id)
            .with_details(details)
            .with_client(&ctx.client);
        self.append(entry).await
    }

    async fn append(&self, entry: AuditLogEntry) -> Option<AuditLogEntry> {
        let _guard = self.append_lock.lock().await;
        let actor = entry.actor_name.clone();
        let action = entry.action;
        let resource_type = entry.resource_type.clone();
        let resource_id = entry.resource_id.clone();

        match self.repository.append(entry).await {
            Ok(stored) => {
                debug!(
                    sequence = stored.sequence,
                    action = action.as_str(),
                    resource_type = %resource_type,
                    resource_id = %resource_id,
                    "audit record written"
                );
                Some(stored)
            }
            Err(err) => {
                error!(
                    %actor,
                    action = action.as_str(),
                    resource_type = %resource_type,
                    resource_id = %resource_id,
                    error = %err,
                    "failed to write audit record"
                );
                None
            }
        }
    }

    /// Runs `mutation` under the caller's deadline and audits the value it
    /// commits.
    ///
    /// `before` is the pre-image for updates and deletes; pass `None` when it
    /// could not be fetched. Dropping `mutation` on timeout rolls back any
    /// open transaction it holds.
    pub async fn mutate<T, F>(
        &self,
        ctx: &RequestContext,
        kind: MutationKind,
        before: Option<JsonValue>,
        mutation: F,
    ) -> CoreResult<T>
    where
        T: Auditable,
        F: Future<Output = CoreResult<T>>,
    {
        let entity = self.commit(ctx, kind, mutation).await?;
        let after = entity.snapshot();
        self.emit(ctx, kind, &entity, before, after).await;
        Ok(entity)
    }

    /// Like [`mutate`](Self::mutate), but describes the change with a fresh
    /// read taken after the commit.
    ///
    /// `post_image` runs outside the caller's deadline, bounded by the
    /// operation timeout. When it fails, finds nothing or runs out of time,
    /// the committed value's own snapshot goes into the record instead. Once
    /// `mutation` has committed, this always audits and returns `Ok`.
    pub async fn mutate_observed<T, F, P, R>(
        &self,
        ctx: &RequestContext,
        kind: MutationKind,
        before: Option<JsonValue>,
        mutation: F,
        post_image: P,
    ) -> CoreResult<T>
    where
        T: Auditable,
        F: Future<Output = CoreResult<T>>,
        P: FnOnce() -> R,
        R: Future<Output = CoreResult<Option<JsonValue>>>,
    {
        let entity = self.commit(ctx, kind, mutation).await?;

        let read = tokio::time::timeout(self.operation_timeout, post_image())
            .await
            .unwrap_or_else(|_| Err(CoreError::cancelled("post-image read timed out")));
        let after = match read {
            Ok(Some(image)) => image,
            Ok(None) => committed_image(&entity, "entity not readable after commit"),
            Err(err) => committed_image(&entity, &err.to_string()),
        };

        self.emit(ctx, kind, &entity, before, after).await;
        Ok(entity)
    }

    async fn commit<T, F>(
        &self,
        ctx: &RequestContext,
        kind: MutationKind,
        mutation: F,
    ) -> CoreResult<T>
    where
        F: Future<Output = CoreResult<T>>,
    {
        let deadline = ctx
            .deadline
            .unwrap_or_else(|| Instant::now() + self.operation_timeout);
        match tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), mutation).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::cancelled(format!(
                "{} deadline elapsed before commit",
                AuditAction::from(kind).as_str()
            ))),
        }
    }

    async fn emit<T: Auditable>(
        &self,
        ctx: &RequestContext,
        kind: MutationKind,
        entity: &T,
        before: Option<JsonValue>,
        after: JsonValue,
    ) {
        let details = match kind {
            MutationKind::Create => after,
            MutationKind::Update => json!({
                "before": before.unwrap_or(JsonValue::Null),
                "after": after,
            }),
            MutationKind::Delete => before.unwrap_or(after),
        };

        info!(
            action = AuditAction::from(kind).as_str(),
            resource_type = %entity.resource_type(),
            resource_id = %entity.resource_id(),
            "mutation committed"
        );
        self.record(
            ctx,
            kind.into(),
            entity.resource_type(),
            entity.resource_id(),
            details,
        )
        .await;
    }

    /// Browses the trail, newest first.
    pub async fn query(
        &self,
        filter: &AuditQuery,
        page: PageRequest,
    ) -> CoreResult<Page<AuditLogEntry>> {
        if let (Some(from), Some(to)) = (filter.from, filter.to) {
            if from >= to {
                return Err(CoreError::bad_request("date range start must precede its end"));
            }
        }
        self.repository
            .query(filter, page.normalize(self.limits))
            .await
    }

    /// Walks the whole chain and reports the first entry that does not link up.
    pub async fn verify_chain(&self) -> CoreResult<ChainVerification> {
        let mut next = 1u64;
        let mut prev = GENESIS_HASH.to_string();
        let mut checked = 0u64;

        loop {
            let batch = self.repository.list_from(next, VERIFY_BATCH).await?;
            let batch_len = batch.len();
            match verify_links(&batch, next, &prev) {
                Ok((count, tail)) => {
                    checked += count;
                    next += count;
                    prev = tail;
                }
                Err(broken) => {
                    error!(?broken, "audit chain verification failed");
                    return Ok(broken);
                }
            }
            if batch_len < VERIFY_BATCH as usize {
                break;
            }
        }

        Ok(ChainVerification::Intact { entries: checked })
    }
}

/// Turns a pre-image lookup into the best-effort form the pipeline wants.
///
/// A missing entity is a real `NotFound`; a storage failure is logged and
/// the mutation proceeds without a pre-image.
pub(crate) fn best_effort_pre_image<T: Auditable>(
    entity: &'static str,
    id: &str,
    lookup: CoreResult<Option<T>>,
) -> CoreResult<Option<JsonValue>> {
    match lookup {
        Ok(Some(found)) => Ok(Some(found.snapshot())),
        Ok(None) => Err(CoreError::not_found(entity, id)),
        Err(err) => {
            warn!(entity, id, error = %err, "pre-image unavailable, continuing without it");
            Ok(None)
        }
    }
}

fn committed_image<T: Auditable>(entity: &T, reason: &str) -> JsonValue {
    warn!(
        resource_type = %entity.resource_type(),
        resource_id = %entity.resource_id(),
        reason,
        "post-image unavailable, auditing the committed value"
    );
    entity.snapshot()
}
