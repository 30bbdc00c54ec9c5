use chrono::Utc;
use uuid::Uuid;
use vpnsub_store::{Payment, PaymentStatus};

use crate::deps::Deps;
use crate::errors::CoreError;
use crate::services::subscription_service::SubscriptionService;

pub struct PaymentService;

impl PaymentService {
    /// Opens a `PENDING` payment row for `user_id` against `tariff_id`.
    /// The invoice payload is the opaque string round-tripped through the
    /// payment provider and back in the success/failure callback.
    pub fn create_invoice(deps: &Deps, user_id: i64, tariff_id: i64) -> Result<Payment, CoreError> {
        let uow = deps.store.begin().map_err(|e| CoreError::payment_service("create_invoice: begin", e))?;
        let tariff = uow
            .tariffs()
            .by_id(tariff_id)
            .map_err(|e| CoreError::payment_service("create_invoice: load tariff", e))?
            .ok_or(CoreError::TariffNotFound)?;
        if !tariff.is_active {
            return Err(CoreError::TariffNotFound);
        }
        let payload = format!("sub:{user_id}:{tariff_id}:{}", Uuid::new_v4());
        let payment = uow
            .payments()
            .create(user_id, tariff_id, tariff.price, &payload)
            .map_err(|e| CoreError::payment_service("create_invoice: insert", e))?;
        uow.commit().map_err(|e| CoreError::payment_service("create_invoice: commit", e))?;
        Ok(payment)
    }

    /// Marks a payment successful and activates/extends the subscription it
    /// paid for. Called from the provider's success callback, which is
    /// expected to retry on any non-2xx response — so this is a hard no-op
    /// on a payment that is already `SUCCESS`, and relies on the unique
    /// constraints on `external_charge_id`/`provider_charge_id` to reject a
    /// charge id being attached to two different payments.
    ///
    /// The payment is committed as successful *before* the subscription is
    /// touched: a confirmed charge must never be lost because provisioning
    /// failed afterwards. A provisioning failure here is returned to the
    /// caller for alerting, but the payment itself stays `SUCCESS`.
    ///
    /// Returns `(action, end_date, vpn_key)`, where `action` is `"created"`
    /// if the user had no subscription before this call and `"extended"`
    /// otherwise — including on the no-op retry path, since a retried
    /// callback can only ever be re-confirming a subscription that already
    /// exists by then.
    pub async fn process_success(
        deps: &Deps,
        payment_id: i64,
        external_charge_id: &str,
        provider_charge_id: &str,
    ) -> Result<(&'static str, chrono::DateTime<Utc>, String), CoreError> {
        let uow = deps.store.begin().map_err(|e| CoreError::payment_service("process_success: begin", e))?;
        let payment = uow
            .payments()
            .by_id(payment_id)
            .map_err(|e| CoreError::payment_service("process_success: load", e))?
            .ok_or(CoreError::PaymentNotFound)?;
        if payment.status == PaymentStatus::Success {
            let sub = uow
                .subscriptions()
                .by_user_id(payment.user_id)
                .map_err(|e| CoreError::payment_service("process_success: load subscription for no-op", e))?
                .ok_or(CoreError::SubscriptionNotFound)?;
            uow.commit().map_err(|e| CoreError::payment_service("process_success: commit no-op", e))?;
            return Ok(("extended", sub.end_date, sub.vpn_key));
        }
        let existed_before = uow
            .subscriptions()
            .by_user_id(payment.user_id)
            .map_err(|e| CoreError::payment_service("process_success: check existing subscription", e))?
            .is_some();
        let completed_at = Utc::now();
        uow.payments()
            .update_status(payment_id, PaymentStatus::Success, Some(external_charge_id), Some(provider_charge_id), completed_at)
            .map_err(|e| CoreError::payment_service("process_success: update", e))?;
        uow.commit().map_err(|e| CoreError::payment_service("process_success: commit", e))?;

        let (subscription, vpn_key) = SubscriptionService::create_or_extend(deps, payment.user_id, payment.tariff_id).await?;
        let action = if existed_before { "extended" } else { "created" };
        Ok((action, subscription.end_date, vpn_key))
    }

    pub fn process_failure(deps: &Deps, payment_id: i64) -> Result<Payment, CoreError> {
        let uow = deps.store.begin().map_err(|e| CoreError::payment_service("process_failure: begin", e))?;
        let payment = uow
            .payments()
            .by_id(payment_id)
            .map_err(|e| CoreError::payment_service("process_failure: load", e))?
            .ok_or(CoreError::PaymentNotFound)?;
        if payment.status != PaymentStatus::Pending {
            uow.commit().map_err(|e| CoreError::payment_service("process_failure: commit no-op", e))?;
            return Ok(payment);
        }
        let completed_at = Utc::now();
        uow.payments()
            .update_status(payment_id, PaymentStatus::Failed, None, None, completed_at)
            .map_err(|e| CoreError::payment_service("process_failure: update", e))?;
        uow.commit().map_err(|e| CoreError::payment_service("process_failure: commit", e))?;
        Ok(Payment { status: PaymentStatus::Failed, completed_at: Some(completed_at), ..payment })
    }
}
