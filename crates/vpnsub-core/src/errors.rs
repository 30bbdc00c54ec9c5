use thiserror::Error;
use vpnsub_store::StoreError;
use vpnsub_vpn::VpnError;

/// Business and service-technical errors raised by the core. Business
/// variants are returned unwrapped so a caller can render a distinct
/// message per variant; the four `*Service` variants wrap any unexpected
/// failure from the Store, the VPN provisioner, or the notification sink
/// with enough context to find the original error in the logs.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("user not found")]
    UserNotFound,
    #[error("self referral is not allowed")]
    SelfReferral,
    #[error("user already has a subscription")]
    SubscriptionAlreadyExist,
    #[error("referral already applied for this user")]
    ReferralAlreadyExist,
    #[error("failed to generate a unique referral code")]
    ReferralCodeGeneration,
    #[error("tariff not found")]
    TariffNotFound,
    #[error("subscription not found")]
    SubscriptionNotFound,
    #[error("subscription is not active")]
    SubscriptionNotActive,
    #[error("payment not found")]
    PaymentNotFound,
    #[error("trial already used")]
    TrialAlreadyUsed,

    #[error("user service internal error: {0}")]
    UserService(String),
    #[error("subscription service internal error: {0}")]
    SubscriptionService(String),
    #[error("referral service internal error: {0}")]
    ReferralService(String),
    #[error("payment service internal error: {0}")]
    PaymentService(String),
}

impl CoreError {
    pub fn user_service(context: &str, err: StoreError) -> Self {
        tracing::error!(error = %err, context, "user service store failure");
        CoreError::UserService(context.to_string())
    }

    pub fn subscription_service_store(context: &str, err: StoreError) -> Self {
        tracing::error!(error = %err, context, "subscription service store failure");
        CoreError::SubscriptionService(context.to_string())
    }

    pub fn subscription_service_vpn(context: &str, err: VpnError) -> Self {
        tracing::error!(error = %err, context, "subscription service vpn failure");
        CoreError::SubscriptionService(context.to_string())
    }

    pub fn referral_service(context: &str, err: StoreError) -> Self {
        tracing::error!(error = %err, context, "referral service store failure");
        CoreError::ReferralService(context.to_string())
    }

    pub fn payment_service(context: &str, err: StoreError) -> Self {
        tracing::error!(error = %err, context, "payment service store failure");
        CoreError::PaymentService(context.to_string())
    }
}
