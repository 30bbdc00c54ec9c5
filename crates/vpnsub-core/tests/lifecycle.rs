use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use vpnsub_core::deps::Deps;
use vpnsub_core::errors::CoreError;
use vpnsub_core::notification::testing::RecordingNotificationSink;
use vpnsub_core::services::payment_service::PaymentService;
use vpnsub_core::services::referral_service::ReferralService;
use vpnsub_core::services::subscription_service::SubscriptionService;
use vpnsub_core::services::user_service::UserService;
use vpnsub_store::{PaymentStatus, Store};
use vpnsub_vpn::testing::FakeVpnProvisioner;

fn test_deps() -> Deps {
    let store = Arc::new(Store::new_in_memory().unwrap());
    {
        let uow = store.begin().unwrap();
        uow.tariffs().create("trial", 3, Decimal::new(0, 0)).unwrap();
        uow.tariffs().create("monthly", 30, Decimal::new(999, 2)).unwrap();
        uow.commit().unwrap();
    }
    Deps::new(store, Arc::new(FakeVpnProvisioner::default()), Arc::new(RecordingNotificationSink::default()))
}

async fn monthly_tariff_id(deps: &Deps) -> i64 {
    let uow = deps.store.begin().unwrap();
    let id = uow.tariffs().by_name("monthly").unwrap().unwrap().id;
    uow.commit().unwrap();
    id
}

#[tokio::test]
async fn trial_activation_grants_a_key_and_marks_trial_used() {
    let deps = test_deps();
    let (_, bonus_applied) = UserService::register(&deps, 1, "alice", None).await.unwrap();
    assert!(!bonus_applied);

    let (subscription, access_url) = SubscriptionService::activate_trial(&deps, 1).await.unwrap();
    assert!(subscription.is_active);
    assert!(!access_url.is_empty());

    let user = UserService::find(&deps, 1).unwrap().unwrap();
    assert!(user.trial_used);

    let err = SubscriptionService::activate_trial(&deps, 1).await.unwrap_err();
    assert!(matches!(err, CoreError::TrialAlreadyUsed));
}

#[tokio::test]
async fn deactivate_expired_reschedules_instead_of_tearing_down_an_extended_subscription() {
    let deps = test_deps();
    UserService::register(&deps, 1, "alice", None).await.unwrap();
    let (subscription, _) = SubscriptionService::activate_trial(&deps, 1).await.unwrap();
    assert_eq!(subscription.user_id, 1);

    // Firing the job before its end_date (e.g. a stale/duplicate fire)
    // must not deactivate a subscription that is still within its term.
    SubscriptionService::deactivate_expired(&deps, subscription.id).await.unwrap();
    let still_active = {
        let uow = deps.store.begin().unwrap();
        let sub = uow.subscriptions().by_id(subscription.id).unwrap().unwrap();
        uow.commit().unwrap();
        sub
    };
    assert!(still_active.is_active);

    // Backdate end_date to simulate the term having actually elapsed, then
    // the same job handler must tear the subscription down.
    {
        let uow = deps.store.begin().unwrap();
        uow.subscriptions()
            .update(
                subscription.id,
                &vpnsub_store::SubscriptionUpdate { end_date: Some(Utc::now() - Duration::seconds(1)), ..Default::default() },
                0,
            )
            .unwrap();
        uow.commit().unwrap();
    }
    SubscriptionService::deactivate_expired(&deps, subscription.id).await.unwrap();

    let after = {
        let uow = deps.store.begin().unwrap();
        let sub = uow.subscriptions().by_id(subscription.id).unwrap().unwrap();
        uow.commit().unwrap();
        sub
    };
    assert!(!after.is_active);

    let err = SubscriptionService::activate_trial(&deps, 1).await.unwrap_err();
    assert!(matches!(err, CoreError::TrialAlreadyUsed));
}

#[tokio::test]
async fn paid_extension_while_active_keeps_the_same_key_and_adds_duration() {
    let deps = test_deps();
    UserService::register(&deps, 1, "alice", None).await.unwrap();
    let tariff_id = monthly_tariff_id(&deps).await;

    let invoice = PaymentService::create_invoice(&deps, 1, tariff_id).unwrap();
    let (action, _, _) = PaymentService::process_success(&deps, invoice.id, "charge-1", "provider-1").await.unwrap();
    assert_eq!(action, "created");

    let before = {
        let uow = deps.store.begin().unwrap();
        let sub = uow.subscriptions().by_user_id(1).unwrap().unwrap();
        uow.commit().unwrap();
        sub
    };

    let invoice2 = PaymentService::create_invoice(&deps, 1, tariff_id).unwrap();
    let (action2, _, _) = PaymentService::process_success(&deps, invoice2.id, "charge-2", "provider-2").await.unwrap();
    assert_eq!(action2, "extended");

    let after = {
        let uow = deps.store.begin().unwrap();
        let sub = uow.subscriptions().by_user_id(1).unwrap().unwrap();
        uow.commit().unwrap();
        sub
    };

    assert_eq!(before.vpn_key, after.vpn_key, "extension must not rotate the vpn key");
    assert!(after.end_date > before.end_date);
    assert_eq!(after.cnt_payments, 1, "cnt_payments only increments on an extension, not the initial create");
}

#[tokio::test]
async fn reactivation_after_deactivation_issues_a_fresh_key() {
    let deps = test_deps();
    UserService::register(&deps, 1, "alice", None).await.unwrap();
    let tariff_id = monthly_tariff_id(&deps).await;

    let invoice = PaymentService::create_invoice(&deps, 1, tariff_id).unwrap();
    let (action, ..) = PaymentService::process_success(&deps, invoice.id, "charge-1", "provider-1").await.unwrap();
    assert_eq!(action, "created");

    let sub_id = {
        let uow = deps.store.begin().unwrap();
        let sub = uow.subscriptions().by_user_id(1).unwrap().unwrap();
        uow.commit().unwrap();
        sub.id
    };
    // Backdate end_date so the deactivation job's re-check sees an
    // actually-expired term rather than rescheduling itself.
    {
        let uow = deps.store.begin().unwrap();
        uow.subscriptions()
            .update(
                sub_id,
                &vpnsub_store::SubscriptionUpdate { end_date: Some(Utc::now() - Duration::seconds(1)), ..Default::default() },
                0,
            )
            .unwrap();
        uow.commit().unwrap();
    }
    SubscriptionService::deactivate_expired(&deps, sub_id).await.unwrap();

    let before = {
        let uow = deps.store.begin().unwrap();
        let sub = uow.subscriptions().by_user_id(1).unwrap().unwrap();
        uow.commit().unwrap();
        sub
    };
    assert!(!before.is_active);

    let invoice2 = PaymentService::create_invoice(&deps, 1, tariff_id).unwrap();
    let (action2, ..) = PaymentService::process_success(&deps, invoice2.id, "charge-2", "provider-2").await.unwrap();
    assert_eq!(action2, "extended", "reactivating an existing (inactive) subscription row is still an extension");

    let after = {
        let uow = deps.store.begin().unwrap();
        let sub = uow.subscriptions().by_user_id(1).unwrap().unwrap();
        uow.commit().unwrap();
        sub
    };
    assert!(after.is_active);
    assert_ne!(before.vpn_key_id, after.vpn_key_id, "reactivation must provision a fresh key");
}

#[tokio::test]
async fn self_referral_is_rejected() {
    let deps = test_deps();
    let (user, _) = UserService::register(&deps, 1, "alice", None).await.unwrap();

    let err = ReferralService::apply(&deps, 1, &user.referral_code).await.unwrap_err();
    assert!(matches!(err, CoreError::SelfReferral));
}

#[tokio::test]
async fn referral_grants_a_bonus_subscription_without_marking_trial_used() {
    let deps = test_deps();
    let (referrer, _) = UserService::register(&deps, 1, "alice", None).await.unwrap();
    let (_, bonus_applied) = UserService::register(&deps, 2, "bob", Some(&referrer.referral_code)).await.unwrap();
    assert!(bonus_applied);

    let referrer_sub = {
        let uow = deps.store.begin().unwrap();
        let sub = uow.subscriptions().by_user_id(1).unwrap();
        uow.commit().unwrap();
        sub
    };
    let referrer_sub = referrer_sub.expect("referral bonus should have created a subscription for the referrer");
    assert!(referrer_sub.is_active);

    let referrer = UserService::find(&deps, 1).unwrap().unwrap();
    assert!(!referrer.trial_used, "a referral bonus must not consume the referrer's own trial");

    // The referred side must get a subscription too: trial.duration_days (3)
    // + bonus_days (7) = 10 days from the trial tariff used in test_deps.
    let referred_sub = {
        let uow = deps.store.begin().unwrap();
        let sub = uow.subscriptions().by_user_id(2).unwrap();
        uow.commit().unwrap();
        sub
    };
    let referred_sub = referred_sub.expect("referral bonus should have created a subscription for the referred user");
    assert!(referred_sub.is_active);
    assert!(!referred_sub.vpn_key.is_empty());
    let expected_end = referred_sub.created_at + Duration::days(10);
    assert!(
        (referred_sub.end_date - expected_end).num_seconds().abs() < 5,
        "referred end_date should be ~10 days out, got {}",
        referred_sub.end_date
    );

    let referred = UserService::find(&deps, 2).unwrap().unwrap();
    assert!(referred.trial_used, "a referral bonus grant consumes the referred user's trial");

    let err = ReferralService::apply(&deps, 2, &referrer.referral_code).await.unwrap_err();
    assert!(matches!(err, CoreError::ReferralAlreadyExist));
}

#[tokio::test]
async fn referral_extends_an_already_active_subscription_in_place() {
    let deps = test_deps();
    let (referrer, _) = UserService::register(&deps, 1, "alice", None).await.unwrap();
    let (sub_before, _) = SubscriptionService::activate_trial(&deps, 1).await.unwrap();

    UserService::register(&deps, 2, "bob", Some(&referrer.referral_code)).await.unwrap();

    let sub_after = {
        let uow = deps.store.begin().unwrap();
        let sub = uow.subscriptions().by_user_id(1).unwrap().unwrap();
        uow.commit().unwrap();
        sub
    };
    assert_eq!(sub_before.vpn_key, sub_after.vpn_key, "extension path must not rotate the key");
    assert!(sub_after.end_date > sub_before.end_date);
}

#[tokio::test]
async fn duplicate_payment_success_callback_is_a_hard_no_op() {
    let deps = test_deps();
    UserService::register(&deps, 1, "alice", None).await.unwrap();
    let tariff_id = monthly_tariff_id(&deps).await;
    let invoice = PaymentService::create_invoice(&deps, 1, tariff_id).unwrap();

    let (action1, ..) = PaymentService::process_success(&deps, invoice.id, "charge-1", "provider-1").await.unwrap();
    assert_eq!(action1, "created");
    let sub_after_first = {
        let uow = deps.store.begin().unwrap();
        let sub = uow.subscriptions().by_user_id(1).unwrap().unwrap();
        uow.commit().unwrap();
        sub
    };

    // Simulates the provider retrying its webhook after a timeout even
    // though the first delivery was actually applied.
    let (action2, ..) = PaymentService::process_success(&deps, invoice.id, "charge-1", "provider-1").await.unwrap();
    assert_eq!(action2, "extended", "a retried callback reports the subscription as already existing");
    let sub_after_second = {
        let uow = deps.store.begin().unwrap();
        let sub = uow.subscriptions().by_user_id(1).unwrap().unwrap();
        uow.commit().unwrap();
        sub
    };

    assert_eq!(sub_after_first, sub_after_second, "a duplicate success callback must not be applied twice");
    assert_eq!(sub_after_second.cnt_payments, 0, "the no-op retry must not call create_or_extend again");

    let uow = deps.store.begin().unwrap();
    let payment = uow.payments().by_id(invoice.id).unwrap().unwrap();
    uow.commit().unwrap();
    assert_eq!(payment.status, PaymentStatus::Success);
}
