use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vpnsub_store::{deactivate_job_id, notify_job_id, StoreError, HANDLER_DEACTIVATE, HANDLER_NOTIFY};

use crate::deps::Deps;

#[derive(Debug, Serialize, Deserialize)]
struct DeactivateArgs {
    subscription_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct NotifyArgs {
    subscription_id: i64,
    user_id: i64,
}

/// Thin wrapper over the job table. Scheduling a job is just a row insert —
/// the actual firing happens in `run_scheduler_loop`, polling the same table
/// from (possibly) a different process lifetime, which is what gives the
/// scheduler its restart-safe catch-up behaviour for free.
pub struct Scheduler;

impl Scheduler {
    pub fn schedule_deactivation(deps: &Deps, subscription_id: i64, run_at: DateTime<Utc>) -> Result<(), StoreError> {
        let args = serde_json::to_string(&DeactivateArgs { subscription_id }).expect("serializable");
        let uow = deps.store.begin()?;
        uow.jobs().replace(&deactivate_job_id(subscription_id), run_at, HANDLER_DEACTIVATE, &args)?;
        uow.commit()
    }

    pub fn schedule_notification(
        deps: &Deps,
        subscription_id: i64,
        user_id: i64,
        run_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let args = serde_json::to_string(&NotifyArgs { subscription_id, user_id }).expect("serializable");
        let uow = deps.store.begin()?;
        uow.jobs().replace(&notify_job_id(subscription_id), run_at, HANDLER_NOTIFY, &args)?;
        uow.commit()
    }

    pub fn cancel_deactivation(deps: &Deps, subscription_id: i64) -> Result<(), StoreError> {
        let uow = deps.store.begin()?;
        uow.jobs().remove(&deactivate_job_id(subscription_id))?;
        uow.commit()
    }

    pub fn cancel_notification(deps: &Deps, subscription_id: i64) -> Result<(), StoreError> {
        let uow = deps.store.begin()?;
        uow.jobs().remove(&notify_job_id(subscription_id))?;
        uow.commit()
    }
}

/// Polls `scheduler_jobs` for rows due at or before now and fires each one
/// on its own task. Jobs are removed from the table once dispatched (they
/// are one-shot); a job whose handler fails is left for the next poll tick
/// to retry rather than being dropped, so a transient store/VPN failure
/// self-heals on the following iteration.
///
/// Jobs in flight are tracked in `inflight` so a slow handler never overlaps
/// with itself across polls of the same job id.
pub async fn run_scheduler_loop(deps: Arc<Deps>, poll_interval: Duration) {
    let inflight: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
    loop {
        match deps.store.begin().and_then(|uow| {
            let jobs = uow.jobs().due_before(Utc::now())?;
            uow.commit()?;
            Ok(jobs)
        }) {
            Ok(jobs) => {
                for job in jobs {
                    let already_running = {
                        let mut guard = inflight.lock().unwrap();
                        !guard.insert(job.job_id.clone())
                    };
                    if already_running {
                        continue;
                    }
                    let deps = Arc::clone(&deps);
                    let inflight = Arc::clone(&inflight);
                    tokio::spawn(async move {
                        let job_id = job.job_id.clone();
                        if let Err(err) = dispatch(&deps, &job).await {
                            tracing::warn!(job_id = %job_id, error = %err, "scheduler job failed, retrying next tick");
                        }
                        inflight.lock().unwrap().remove(&job_id);
                    });
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "scheduler poll failed");
            }
        }
        tokio::time::sleep(poll_interval).await;
    }
}

async fn dispatch(deps: &Deps, job: &vpnsub_store::Job) -> Result<(), String> {
    match job.handler.as_str() {
        HANDLER_DEACTIVATE => {
            let args: DeactivateArgs = serde_json::from_str(&job.args_json).map_err(|e| e.to_string())?;
            // `deactivate_expired` owns this job row end to end: it either
            // removes it (the subscription is torn down) or replaces it
            // with a later `run_at` (the term was extended after this job
            // was queued). Removing it here unconditionally would blow
            // away a reschedule that just happened inside that call.
            crate::services::subscription_service::SubscriptionService::deactivate_expired(deps, args.subscription_id)
                .await
                .map_err(|e| e.to_string())?;
        }
        HANDLER_NOTIFY => {
            let args: NotifyArgs = serde_json::from_str(&job.args_json).map_err(|e| e.to_string())?;
            // `notify` itself swallows send failures after logging, so this
            // only fails on a store error — in which case the job is left
            // in place for the next poll to retry.
            crate::services::subscription_service::SubscriptionService::notify(deps, args.subscription_id, args.user_id)
                .await
                .map_err(|e| e.to_string())?;
            let uow = deps.store.begin().map_err(|e| e.to_string())?;
            uow.jobs().remove(&job.job_id).map_err(|e| e.to_string())?;
            uow.commit().map_err(|e| e.to_string())?;
        }
        other => return Err(format!("unknown job handler: {other}")),
    }
    Ok(())
}
