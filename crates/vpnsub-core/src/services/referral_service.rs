use chrono::{Duration, Utc};
use vpnsub_store::Referral;

use crate::deps::Deps;
use crate::errors::CoreError;
use crate::services::subscription_service::{SubscriptionService, TRIAL_TARIFF_NAME};

/// Bonus granted to the referrer, in days, regardless of tariff.
pub const REFERRAL_BONUS_DAYS: i64 = 7;

pub struct ReferralService;

impl ReferralService {
    /// Applies `code` on behalf of a just-registered `referred_id`. Rejects
    /// self-referral, a user who already has a subscription, and a user
    /// applying a second code. Both sides of the bonus are granted
    /// immediately: the referred user gets a fresh subscription covering
    /// `trial.duration_days + bonus_days` and has `trial_used` set (a
    /// referral bonus consumes their trial allotment); the referrer's
    /// existing active subscription is extended in place, or, if they have
    /// none, granted a fresh `bonus_days`-long one that does *not* flip
    /// their own `trial_used` — it is a bonus, not a use of their trial.
    pub async fn apply(deps: &Deps, referred_id: i64, code: &str) -> Result<Referral, CoreError> {
        let uow = deps.store.begin().map_err(|e| CoreError::referral_service("apply: begin", e))?;
        if uow
            .subscriptions()
            .by_user_id(referred_id)
            .map_err(|e| CoreError::referral_service("apply: check referred subscription", e))?
            .is_some()
        {
            return Err(CoreError::SubscriptionAlreadyExist);
        }
        let referrer = uow
            .users()
            .by_referral_code(code)
            .map_err(|e| CoreError::referral_service("apply: lookup referrer", e))?
            .ok_or(CoreError::UserNotFound)?;
        if referrer.id == referred_id {
            return Err(CoreError::SelfReferral);
        }
        if uow
            .referrals()
            .by_referred_id(referred_id)
            .map_err(|e| CoreError::referral_service("apply: check existing", e))?
            .is_some()
        {
            return Err(CoreError::ReferralAlreadyExist);
        }
        let trial = uow
            .tariffs()
            .by_name(TRIAL_TARIFF_NAME)
            .map_err(|e| CoreError::referral_service("apply: load trial tariff", e))?
            .ok_or(CoreError::TariffNotFound)?;
        let referral = uow
            .referrals()
            .create(referrer.id, referred_id, REFERRAL_BONUS_DAYS)
            .map_err(|e| CoreError::referral_service("apply: insert referral", e))?;
        let referrer_sub = uow
            .subscriptions()
            .by_user_id(referrer.id)
            .map_err(|e| CoreError::referral_service("apply: load referrer subscription", e))?;
        uow.commit().map_err(|e| CoreError::referral_service("apply: commit", e))?;

        grant_referred_subscription(deps, referred_id, trial.id, trial.duration_days + REFERRAL_BONUS_DAYS).await?;

        match referrer_sub {
            Some(sub) if sub.is_active => {
                SubscriptionService::extend_active(deps, &sub, REFERRAL_BONUS_DAYS)?;
            }
            _ => {
                grant_bonus_subscription(deps, referrer.id).await?;
            }
        }

        Ok(referral)
    }

    pub fn history(deps: &Deps, referrer_id: i64) -> Result<Vec<Referral>, CoreError> {
        let uow = deps.store.begin().map_err(|e| CoreError::referral_service("history: begin", e))?;
        let referrals = uow
            .referrals()
            .by_referrer_id(referrer_id)
            .map_err(|e| CoreError::referral_service("history: list", e))?;
        uow.commit().map_err(|e| CoreError::referral_service("history: commit", e))?;
        Ok(referrals)
    }
}

/// Grants the referred user their side of the bonus: a fresh subscription
/// filed under the trial tariff but running for `duration_days`
/// (`trial.duration_days + bonus_days`), with a freshly provisioned key.
/// The referred user is known not to have a subscription already — `apply`
/// checks that before calling in — so this always inserts rather than
/// branching on an existing row.
async fn grant_referred_subscription(deps: &Deps, referred_id: i64, trial_tariff_id: i64, duration_days: i64) -> Result<(), CoreError> {
    let key = deps
        .vpn
        .create_key(&format!("user-{referred_id}-referral"))
        .await
        .map_err(|e| CoreError::subscription_service_vpn("grant_referred_subscription: provision key", e))?;
    let end_date = Utc::now() + Duration::days(duration_days);

    let uow = deps.store.begin().map_err(|e| CoreError::referral_service("grant_referred_subscription: begin", e))?;
    let subscription = uow
        .subscriptions()
        .create(referred_id, trial_tariff_id, &key.access_url, &key.id, end_date)
        .map_err(|e| CoreError::referral_service("grant_referred_subscription: insert", e))?;
    uow.users()
        .mark_trial_used(referred_id)
        .map_err(|e| CoreError::referral_service("grant_referred_subscription: mark trial used", e))?;
    uow.commit().map_err(|e| CoreError::referral_service("grant_referred_subscription: commit", e))?;

    if let Err(err) = crate::scheduler::Scheduler::schedule_deactivation(deps, subscription.id, end_date) {
        tracing::error!(error = %err, subscription_id = subscription.id, "failed to schedule deactivation for referred bonus subscription");
    }
    Ok(())
}

/// Grants a referrer without an active subscription a standalone
/// `bonus_days` subscription, provisioning a fresh VPN key the same way a
/// paid purchase would.
async fn grant_bonus_subscription(deps: &Deps, referrer_id: i64) -> Result<(), CoreError> {
    let key = deps
        .vpn
        .create_key(&format!("user-{referrer_id}-referral-bonus"))
        .await
        .map_err(|e| CoreError::subscription_service_vpn("grant_bonus_subscription: provision key", e))?;
    let end_date = Utc::now() + Duration::days(REFERRAL_BONUS_DAYS);

    let uow = deps.store.begin().map_err(|e| CoreError::referral_service("grant_bonus_subscription: begin", e))?;
    let existing = uow
        .subscriptions()
        .by_user_id(referrer_id)
        .map_err(|e| CoreError::referral_service("grant_bonus_subscription: load existing", e))?;
    let subscription_id = match existing {
        Some(sub) => {
            uow.subscriptions()
                .update(
                    sub.id,
                    &vpnsub_store::SubscriptionUpdate {
                        vpn_key: Some(key.access_url.clone()),
                        vpn_key_id: Some(key.id.clone()),
                        end_date: Some(end_date),
                        is_active: Some(true),
                    },
                    0,
                )
                .map_err(|e| CoreError::referral_service("grant_bonus_subscription: reactivate", e))?;
            sub.id
        }
        None => {
            // Referral bonuses aren't tied to any tariff's own price or
            // duration, only to `REFERRAL_BONUS_DAYS`, so the subscription
            // row is filed under the trial tariff — the one tariff that is
            // already understood to be a free grant rather than a purchase.
            let trial = uow
                .tariffs()
                .by_name(TRIAL_TARIFF_NAME)
                .map_err(|e| CoreError::referral_service("grant_bonus_subscription: load trial tariff", e))?
                .ok_or(CoreError::TariffNotFound)?;
            uow.subscriptions()
                .create(referrer_id, trial.id, &key.access_url, &key.id, end_date)
                .map_err(|e| CoreError::referral_service("grant_bonus_subscription: insert", e))?
                .id
        }
    };
    uow.commit().map_err(|e| CoreError::referral_service("grant_bonus_subscription: commit", e))?;

    if let Err(err) = crate::scheduler::Scheduler::schedule_deactivation(deps, subscription_id, end_date) {
        tracing::error!(error = %err, subscription_id, "failed to schedule deactivation for referral bonus subscription");
    }
    Ok(())
}
