//! Type-specific task handlers.
//!
//! Handlers perform the provider call for one claimed task and apply the
//! immediate local effects: mirror writes and history entries. They never
//! touch task state; the worker turns their outcome into a transition.

use crate::queue::{
    domain::{FailureClass, LabelField, QueueTask, TaskPayload},
    ports::{
        HistoryAction, HistoryRecord, ProviderAction, ProviderClient, ProviderError,
        ProviderErrorKind, SimMirror, SimQuery,
    },
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Status recorded as the old value when the mirror has no prior status.
const UNKNOWN_STATUS: &str = "Unknown";

/// Successful handler result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerOutcome {
    /// Result text stored on the task.
    pub result: String,
    /// Provider-side request identifier.
    pub provider_request_id: Option<i64>,
    /// MSISDNs whose mirror records should be refreshed later.
    pub reconcile: Vec<String>,
}

/// Handler failures, classified for the retry policy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// The provider call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The task names no MSISDN or CLI to act on.
    #[error("task has no MSISDN or CLI to act on")]
    MissingTarget,

    /// The provider holds no status for a SIM, so a status change would be
    /// rejected.
    #[error(
        "SIM {msisdn} has no status in upstream API (initial value would be null). Cannot change \
         status to {new_status}. Please sync data first or verify the SIM in the provider portal"
    )]
    NoUpstreamStatus {
        /// SIM without an upstream status.
        msisdn: String,
        /// Requested status.
        new_status: String,
    },
}

impl HandlerError {
    /// Returns how the worker treats this failure.
    #[must_use]
    pub const fn failure_class(&self) -> FailureClass {
        match self {
            Self::Provider(err) => err.kind().failure_class(),
            Self::MissingTarget | Self::NoUpstreamStatus { .. } => FailureClass::Fatal,
        }
    }

    /// Returns the user-facing explanation recorded when the task is skipped.
    #[must_use]
    pub fn explanation(&self, msisdn: &str) -> String {
        let kind = match self {
            Self::Provider(err) => err.kind(),
            Self::NoUpstreamStatus { .. } => ProviderErrorKind::MissingInitialState,
            Self::MissingTarget => return self.to_string(),
        };
        match kind {
            ProviderErrorKind::MissingInitialState => format!(
                "SIM {msisdn} has no current status at the provider (initial value is null). \
                 Sync the SIM and try again."
            ),
            ProviderErrorKind::Unauthorized => format!(
                "No permission to change SIM {msisdn}. Contact an administrator."
            ),
            ProviderErrorKind::NotFound => format!("SIM {msisdn} was not found at the provider."),
            _ => self.to_string(),
        }
    }
}

/// Result type for handler operations.
pub type HandlerResult<T> = Result<T, HandlerError>;

/// Dispatches claimed tasks to their handler.
pub struct TaskHandlers<P, M>
where
    P: ProviderClient,
    M: SimMirror,
{
    provider: Arc<P>,
    mirror: Arc<M>,
}

impl<P, M> Clone for TaskHandlers<P, M>
where
    P: ProviderClient,
    M: SimMirror,
{
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            mirror: Arc::clone(&self.mirror),
        }
    }
}

impl<P, M> TaskHandlers<P, M>
where
    P: ProviderClient,
    M: SimMirror,
{
    /// Creates handlers over a provider client and the local mirror.
    #[must_use]
    pub const fn new(provider: Arc<P>, mirror: Arc<M>) -> Self {
        Self { provider, mirror }
    }

    /// Runs the handler for `task`'s type.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] when the provider call fails or the task
    /// cannot be acted on.
    pub async fn handle(
        &self,
        task: &QueueTask,
        now: DateTime<Utc>,
    ) -> HandlerResult<HandlerOutcome> {
        match task.payload() {
            TaskPayload::StatusChange {
                new_status,
                targets,
                ..
            } => self.change_status(task, targets, new_status, now).await,
            TaskPayload::LabelUpdate { field, value } => {
                self.update_label(task, *field, value, now).await
            }
            TaskPayload::Reconcile { targets } => self.reconcile(targets).await,
        }
    }

    async fn update_label(
        &self,
        task: &QueueTask,
        field: LabelField,
        value: &str,
        now: DateTime<Utc>,
    ) -> HandlerResult<HandlerOutcome> {
        let target = task
            .target()
            .identifier()
            .ok_or(HandlerError::MissingTarget)?
            .to_owned();
        debug!(task_id = %task.id(), msisdn = %target, field = %field, "updating label");

        let outcome = self
            .provider
            .update_sim_label(&target, field, value)
            .await?
            .into_checked()?;

        if let Err(err) = self.mirror.set_label(&target, field, value).await {
            warn!(task_id = %task.id(), msisdn = %target, error = %err, "mirror label write failed");
        }
        let history = HistoryRecord::from_worker(
            target.clone(),
            HistoryAction::UpdateField,
            field.as_str(),
            task.id(),
            now,
        )
        .with_values(String::new(), value)
        .changed_by(task.requester().username.clone());
        if let Err(err) = self.mirror.append_history(history).await {
            warn!(task_id = %task.id(), msisdn = %target, error = %err, "history write failed");
        }

        Ok(HandlerOutcome {
            result: "Update successful".to_owned(),
            provider_request_id: outcome.request_id,
            reconcile: vec![target],
        })
    }

    async fn change_status(
        &self,
        task: &QueueTask,
        targets: &[String],
        new_status: &str,
        now: DateTime<Utc>,
    ) -> HandlerResult<HandlerOutcome> {
        if targets.is_empty() {
            return Err(HandlerError::MissingTarget);
        }
        self.prevalidate(targets, new_status).await?;

        let outcome = self
            .provider
            .bulk_update(targets, ProviderAction::SimStateChange, new_status)
            .await?
            .into_checked()?;

        let old_statuses = self.mirror.statuses(targets).await.unwrap_or_else(|err| {
            warn!(task_id = %task.id(), error = %err, "could not read mirror statuses");
            HashMap::new()
        });
        if let Err(err) = self.mirror.set_status(targets, new_status).await {
            warn!(task_id = %task.id(), error = %err, "mirror status write failed");
        }

        for msisdn in targets {
            let old_status = old_statuses
                .get(msisdn)
                .filter(|status| !status.is_empty())
                .map_or(UNKNOWN_STATUS, String::as_str);
            let history = HistoryRecord::from_worker(
                msisdn.clone(),
                HistoryAction::StatusChange,
                "status",
                task.id(),
                now,
            )
            .with_values(old_status, new_status)
            .changed_by(task.requester().username.clone());
            if let Err(err) = self.mirror.append_history(history).await {
                warn!(task_id = %task.id(), msisdn = %msisdn, error = %err, "history write failed");
            }
        }

        Ok(HandlerOutcome {
            result: format!("Updated {} SIMs", targets.len()),
            provider_request_id: outcome.request_id,
            reconcile: targets.to_vec(),
        })
    }

    /// Reads each target's upstream status before a change.
    ///
    /// Read failures are logged and ignored; the bulk call surfaces them.
    async fn prevalidate(&self, targets: &[String], new_status: &str) -> HandlerResult<()> {
        for msisdn in targets {
            match self.provider.get_sim_status(msisdn).await {
                Ok(Some(status)) if !status.trim().is_empty() => {
                    debug!(msisdn = %msisdn, upstream_status = %status, "pre-validated SIM");
                }
                Ok(_) => {
                    return Err(HandlerError::NoUpstreamStatus {
                        msisdn: msisdn.clone(),
                        new_status: new_status.to_owned(),
                    });
                }
                Err(err) => {
                    warn!(msisdn = %msisdn, error = %err, "pre-validation read failed");
                }
            }
        }
        Ok(())
    }

    async fn reconcile(&self, targets: &[String]) -> HandlerResult<HandlerOutcome> {
        let mut synced = 0_usize;
        let mut first_error = None;
        for msisdn in targets {
            match self.provider.get_sims(&SimQuery::by_msisdn(msisdn.clone())).await {
                Ok(page) => {
                    let Some(record) = page.records.into_iter().next() else {
                        warn!(msisdn = %msisdn, "SIM not found in provider response");
                        continue;
                    };
                    match self.mirror.upsert(record).await {
                        Ok(()) => synced += 1,
                        Err(err) => warn!(msisdn = %msisdn, error = %err, "mirror upsert failed"),
                    }
                }
                Err(err) => {
                    warn!(msisdn = %msisdn, error = %err, "failed to read SIM from provider");
                    first_error.get_or_insert(err);
                }
            }
        }
        if let Some(err) = first_error.filter(|_| synced == 0) {
            return Err(err.into());
        }
        info!(synced, total = targets.len(), "reconciled SIMs from provider");
        Ok(HandlerOutcome {
            result: format!("Reconciled {synced} of {} SIMs", targets.len()),
            provider_request_id: None,
            reconcile: Vec::new(),
        })
    }
}
