use chrono::{Duration, Utc};
use vpnsub_store::{Subscription, SubscriptionUpdate};

use crate::deps::Deps;
use crate::errors::CoreError;
use crate::scheduler::Scheduler;

/// Tariff row name reserved for the one-time free trial. Looked up by name
/// rather than a hardcoded id so an operator can seed it like any other
/// tariff.
pub const TRIAL_TARIFF_NAME: &str = "trial";

/// How long before a subscription's `end_date` its expiry reminder fires.
const NOTIFY_BEFORE: Duration = Duration::days(3);

pub struct SubscriptionService;

impl SubscriptionService {
    /// Grants the one-time free trial. Fails if the user already used it or
    /// already holds a subscription of any kind.
    pub async fn activate_trial(deps: &Deps, user_id: i64) -> Result<(Subscription, String), CoreError> {
        let uow = deps.store.begin().map_err(|e| CoreError::subscription_service_store("activate_trial: begin", e))?;
        let user = uow.users().by_id(user_id).map_err(|e| CoreError::subscription_service_store("activate_trial: load user", e))?
            .ok_or(CoreError::UserNotFound)?;
        if user.trial_used {
            return Err(CoreError::TrialAlreadyUsed);
        }
        if uow.subscriptions().by_user_id(user_id).map_err(|e| CoreError::subscription_service_store("activate_trial: load subscription", e))?.is_some() {
            return Err(CoreError::SubscriptionAlreadyExist);
        }
        let trial = uow.tariffs().by_name(TRIAL_TARIFF_NAME).map_err(|e| CoreError::subscription_service_store("activate_trial: load trial tariff", e))?
            .ok_or(CoreError::TariffNotFound)?;
        uow.commit().map_err(|e| CoreError::subscription_service_store("activate_trial: commit read", e))?;

        let key = deps
            .vpn
            .create_key(&format!("user-{user_id}-trial"))
            .await
            .map_err(|e| CoreError::subscription_service_vpn("activate_trial: provision key", e))?;
        let end_date = Utc::now() + Duration::days(trial.duration_days);

        let uow = deps.store.begin().map_err(|e| CoreError::subscription_service_store("activate_trial: begin write", e))?;
        let subscription = uow
            .subscriptions()
            .create(user_id, trial.id, &key.access_url, &key.id, end_date)
            .map_err(|e| CoreError::subscription_service_store("activate_trial: insert subscription", e))?;
        uow.users().mark_trial_used(user_id).map_err(|e| CoreError::subscription_service_store("activate_trial: mark trial used", e))?;
        uow.commit().map_err(|e| CoreError::subscription_service_store("activate_trial: commit write", e))?;

        schedule_expiry(deps, subscription.id, user_id, end_date);
        Ok((subscription, key.access_url))
    }

    /// Creates a fresh subscription, extends an active one, or reactivates
    /// an expired one — whichever applies to `user_id`'s current state.
    /// Used by the payment flow; the VPN key is provisioned only when there
    /// is no existing active key to keep using (fresh create, reactivation).
    pub async fn create_or_extend(deps: &Deps, user_id: i64, tariff_id: i64) -> Result<(Subscription, String), CoreError> {
        let uow = deps.store.begin().map_err(|e| CoreError::subscription_service_store("create_or_extend: begin", e))?;
        let tariff = uow.tariffs().by_id(tariff_id).map_err(|e| CoreError::subscription_service_store("create_or_extend: load tariff", e))?
            .ok_or(CoreError::TariffNotFound)?;
        let existing = uow.subscriptions().by_user_id(user_id).map_err(|e| CoreError::subscription_service_store("create_or_extend: load subscription", e))?;
        uow.commit().map_err(|e| CoreError::subscription_service_store("create_or_extend: commit read", e))?;

        match existing {
            None => {
                let key = deps
                    .vpn
                    .create_key(&format!("user-{user_id}"))
                    .await
                    .map_err(|e| CoreError::subscription_service_vpn("create_or_extend: provision key", e))?;
                let end_date = Utc::now() + Duration::days(tariff.duration_days);

                let uow = deps.store.begin().map_err(|e| CoreError::subscription_service_store("create_or_extend: begin write", e))?;
                let subscription = uow
                    .subscriptions()
                    .create(user_id, tariff_id, &key.access_url, &key.id, end_date)
                    .map_err(|e| CoreError::subscription_service_store("create_or_extend: insert subscription", e))?;
                uow.commit().map_err(|e| CoreError::subscription_service_store("create_or_extend: commit write", e))?;

                schedule_expiry(deps, subscription.id, user_id, end_date);
                Ok((subscription, key.access_url))
            }
            Some(sub) if sub.is_active => {
                let end_date = sub.end_date + Duration::days(tariff.duration_days);
                let uow = deps.store.begin().map_err(|e| CoreError::subscription_service_store("create_or_extend: begin write", e))?;
                uow.subscriptions()
                    .update(sub.id, &SubscriptionUpdate { end_date: Some(end_date), ..Default::default() }, 1)
                    .map_err(|e| CoreError::subscription_service_store("create_or_extend: extend subscription", e))?;
                uow.commit().map_err(|e| CoreError::subscription_service_store("create_or_extend: commit write", e))?;

                schedule_expiry(deps, sub.id, user_id, end_date);
                let access_url = sub.vpn_key.clone();
                Ok((Subscription { end_date, cnt_payments: sub.cnt_payments + 1, ..sub }, access_url))
            }
            Some(sub) => {
                let key = deps
                    .vpn
                    .create_key(&format!("user-{user_id}"))
                    .await
                    .map_err(|e| CoreError::subscription_service_vpn("create_or_extend: reprovision key", e))?;
                let end_date = Utc::now() + Duration::days(tariff.duration_days);

                let uow = deps.store.begin().map_err(|e| CoreError::subscription_service_store("create_or_extend: begin write", e))?;
                uow.subscriptions()
                    .update(
                        sub.id,
                        &SubscriptionUpdate {
                            vpn_key: Some(key.access_url.clone()),
                            vpn_key_id: Some(key.id.clone()),
                            end_date: Some(end_date),
                            is_active: Some(true),
                        },
                        1,
                    )
                    .map_err(|e| CoreError::subscription_service_store("create_or_extend: reactivate subscription", e))?;
                uow.commit().map_err(|e| CoreError::subscription_service_store("create_or_extend: commit write", e))?;

                schedule_expiry(deps, sub.id, user_id, end_date);
                Ok((
                    Subscription {
                        vpn_key: key.access_url.clone(),
                        vpn_key_id: key.id,
                        end_date,
                        is_active: true,
                        cnt_payments: sub.cnt_payments + 1,
                        ..sub
                    },
                    key.access_url,
                ))
            }
        }
    }

    /// Extends an active subscription by `bonus_days` without touching its
    /// VPN key. Used for referral bonuses on a referrer who already has an
    /// active subscription.
    pub fn extend_active(deps: &Deps, subscription: &Subscription, bonus_days: i64) -> Result<(), CoreError> {
        let end_date = subscription.end_date + Duration::days(bonus_days);
        let uow = deps.store.begin().map_err(|e| CoreError::subscription_service_store("extend_active: begin", e))?;
        uow.subscriptions()
            .update(subscription.id, &SubscriptionUpdate { end_date: Some(end_date), ..Default::default() }, 0)
            .map_err(|e| CoreError::subscription_service_store("extend_active: update", e))?;
        uow.commit().map_err(|e| CoreError::subscription_service_store("extend_active: commit", e))?;
        schedule_expiry(deps, subscription.id, subscription.user_id, end_date);
        Ok(())
    }

    /// Fired by the scheduler's `DEACTIVATE` job. Re-checks `end_date`
    /// before tearing anything down: a payment may have extended the
    /// subscription after the job was queued, in which case the job
    /// reschedules itself instead of deactivating.
    pub async fn deactivate_expired(deps: &Deps, subscription_id: i64) -> Result<(), CoreError> {
        let uow = deps.store.begin().map_err(|e| CoreError::subscription_service_store("deactivate_expired: begin", e))?;
        let subscription = uow.subscriptions().by_id(subscription_id).map_err(|e| CoreError::subscription_service_store("deactivate_expired: load", e))?;
        uow.commit().map_err(|e| CoreError::subscription_service_store("deactivate_expired: commit read", e))?;

        let Some(subscription) = subscription else {
            if let Err(err) = Scheduler::cancel_deactivation(deps, subscription_id) {
                tracing::warn!(error = %err, subscription_id, "failed to clean up job for a subscription that no longer exists");
            }
            return Ok(());
        };
        if !subscription.is_active {
            // Already deactivated (e.g. a duplicate fire of the same job):
            // drop the stale row so it doesn't keep firing every poll.
            if let Err(err) = Scheduler::cancel_deactivation(deps, subscription.id) {
                tracing::warn!(error = %err, subscription_id, "failed to clean up job for an already-deactivated subscription");
            }
            return Ok(());
        }
        if subscription.end_date > Utc::now() {
            schedule_expiry(deps, subscription.id, subscription.user_id, subscription.end_date);
            return Ok(());
        }

        deps.vpn
            .delete_key(&subscription.vpn_key_id)
            .await
            .map_err(|e| CoreError::subscription_service_vpn("deactivate_expired: delete key", e))?;

        let uow = deps.store.begin().map_err(|e| CoreError::subscription_service_store("deactivate_expired: begin write", e))?;
        uow.subscriptions()
            .update(subscription.id, &SubscriptionUpdate { is_active: Some(false), ..Default::default() }, 0)
            .map_err(|e| CoreError::subscription_service_store("deactivate_expired: update", e))?;
        uow.jobs().remove(&vpnsub_store::deactivate_job_id(subscription.id)).map_err(|e| CoreError::subscription_service_store("deactivate_expired: remove job", e))?;
        uow.commit().map_err(|e| CoreError::subscription_service_store("deactivate_expired: commit write", e))?;

        if let Err(err) = Scheduler::cancel_notification(deps, subscription.id) {
            tracing::warn!(error = %err, subscription_id, "failed to cancel stale notify job");
        }
        Ok(())
    }

    /// Fired by the scheduler's `NOTIFY` job. Only sends if the subscription
    /// is still around and active — restart catch-up can leave a notify job
    /// due after its deactivate counterpart already fired. A send failure is
    /// logged and swallowed rather than propagated: the reminder is
    /// best-effort and must not keep the job alive for indefinite retry.
    pub async fn notify(deps: &Deps, subscription_id: i64, user_id: i64) -> Result<(), CoreError> {
        let uow = deps.store.begin().map_err(|e| CoreError::subscription_service_store("notify: begin", e))?;
        let subscription = uow.subscriptions().by_id(subscription_id).map_err(|e| CoreError::subscription_service_store("notify: load", e))?;
        uow.commit().map_err(|e| CoreError::subscription_service_store("notify: commit", e))?;

        let Some(subscription) = subscription else {
            return Ok(());
        };
        if !subscription.is_active {
            return Ok(());
        }

        if let Err(err) = deps.notifications.send(user_id, crate::notification::EXPIRY_REMINDER_TEXT).await {
            tracing::warn!(error = %err, subscription_id, "expiry reminder delivery failed, treating job as delivered");
        }
        Ok(())
    }
}

fn schedule_expiry(deps: &Deps, subscription_id: i64, user_id: i64, end_date: chrono::DateTime<Utc>) {
    if let Err(err) = Scheduler::schedule_deactivation(deps, subscription_id, end_date) {
        tracing::error!(error = %err, subscription_id, "failed to schedule deactivation job");
    }
    let notify_at = end_date - NOTIFY_BEFORE;
    if notify_at > Utc::now() {
        if let Err(err) = Scheduler::schedule_notification(deps, subscription_id, user_id, notify_at) {
            tracing::error!(error = %err, subscription_id, "failed to schedule notify job");
        }
    } else if let Err(err) = Scheduler::cancel_notification(deps, subscription_id) {
        tracing::warn!(error = %err, subscription_id, "failed to cancel notify job that is no longer due");
    }
}
