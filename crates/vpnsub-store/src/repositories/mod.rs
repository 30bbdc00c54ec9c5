mod jobs;
mod payments;
mod referrals;
mod subscriptions;
mod tariffs;
mod users;

pub use jobs::JobRepo;
pub use payments::PaymentRepo;
pub use referrals::ReferralRepo;
pub use subscriptions::SubscriptionRepo;
pub use tariffs::TariffRepo;
pub use users::UserRepo;
