pub mod errors;
pub mod models;
mod repositories;
mod schema;
mod store;
mod util;

pub use errors::StoreError;
pub use models::{
    deactivate_job_id, notify_job_id, Job, Payment, PaymentStatus, Referral, Subscription,
    SubscriptionUpdate, Tariff, User, HANDLER_DEACTIVATE, HANDLER_NOTIFY,
};
pub use store::{Store, UnitOfWork};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    #[test]
    fn user_create_and_lookup_round_trips() {
        let store = Store::new_in_memory().unwrap();
        let uow = store.begin().unwrap();
        let user = uow.users().create(111, "alice", "ab12cd34").unwrap();
        uow.commit().unwrap();

        let uow = store.begin().unwrap();
        let found = uow.users().by_id(111).unwrap().unwrap();
        assert_eq!(found, user);
        let by_code = uow.users().by_referral_code("ab12cd34").unwrap().unwrap();
        assert_eq!(by_code.id, 111);
    }

    #[test]
    fn username_uniqueness_is_enforced_at_schema_level() {
        let store = Store::new_in_memory().unwrap();
        let uow = store.begin().unwrap();
        uow.users().create(1, "bob", "code0001").unwrap();
        let err = uow.users().create(2, "bob", "code0002").unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
        uow.rollback().unwrap();
    }

    #[test]
    fn unit_of_work_rolls_back_on_drop() {
        let store = Store::new_in_memory().unwrap();
        {
            let uow = store.begin().unwrap();
            uow.users().create(1, "carol", "code0003").unwrap();
            // dropped without commit
        }
        let uow = store.begin().unwrap();
        assert!(uow.users().by_id(1).unwrap().is_none());
    }

    #[test]
    fn subscription_is_unique_per_user() {
        let store = Store::new_in_memory().unwrap();
        let uow = store.begin().unwrap();
        uow.users().create(1, "dan", "code0004").unwrap();
        let tariff = uow.tariffs().create("month", 30, Decimal::new(1000, 2)).unwrap();
        let end_date = Utc::now() + Duration::days(30);
        uow.subscriptions().create(1, tariff.id, "ss://key", "id-1", end_date).unwrap();
        let err = uow
            .subscriptions()
            .create(1, tariff.id, "ss://key2", "id-2", end_date)
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
    }

    #[test]
    fn subscription_partial_update_only_touches_given_fields() {
        let store = Store::new_in_memory().unwrap();
        let uow = store.begin().unwrap();
        uow.users().create(1, "erin", "code0005").unwrap();
        let tariff = uow.tariffs().create("month", 30, Decimal::new(1000, 2)).unwrap();
        let end_date = Utc::now() + Duration::days(30);
        let sub = uow.subscriptions().create(1, tariff.id, "ss://key", "id-1", end_date).unwrap();

        let update = SubscriptionUpdate { is_active: Some(false), vpn_key: Some(String::new()), vpn_key_id: Some(String::new()), end_date: None };
        uow.subscriptions().update(sub.id, &update, 0).unwrap();
        let reloaded = uow.subscriptions().by_id(sub.id).unwrap().unwrap();
        assert!(!reloaded.is_active);
        assert_eq!(reloaded.vpn_key, "");
        assert_eq!(reloaded.end_date, end_date);
    }

    #[test]
    fn job_replace_resets_run_at_without_duplicating() {
        let store = Store::new_in_memory().unwrap();
        let uow = store.begin().unwrap();
        let t0 = Utc::now();
        uow.jobs().add("deactivate_1", t0, HANDLER_DEACTIVATE, "1").unwrap();
        let t1 = t0 + Duration::days(1);
        uow.jobs().replace("deactivate_1", t1, HANDLER_DEACTIVATE, "1").unwrap();
        let job = uow.jobs().get("deactivate_1").unwrap().unwrap();
        assert_eq!(job.run_at, t1);
    }

    #[test]
    fn due_before_returns_only_overdue_jobs_in_order() {
        let store = Store::new_in_memory().unwrap();
        let uow = store.begin().unwrap();
        let now = Utc::now();
        uow.jobs().add("notify_1", now - Duration::minutes(5), HANDLER_NOTIFY, "1").unwrap();
        uow.jobs().add("notify_2", now - Duration::minutes(1), HANDLER_NOTIFY, "2").unwrap();
        uow.jobs().add("notify_3", now + Duration::hours(1), HANDLER_NOTIFY, "3").unwrap();
        let due = uow.jobs().due_before(now).unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].job_id, "notify_1");
        assert_eq!(due[1].job_id, "notify_2");
    }

    #[test]
    fn payment_external_charge_id_is_unique() {
        let store = Store::new_in_memory().unwrap();
        let uow = store.begin().unwrap();
        uow.users().create(1, "frank", "code0006").unwrap();
        let tariff = uow.tariffs().create("month", 30, Decimal::new(1000, 2)).unwrap();
        let p1 = uow.payments().create(1, tariff.id, Decimal::new(1000, 2), "payload-1").unwrap();
        let p2 = uow.payments().create(1, tariff.id, Decimal::new(1000, 2), "payload-2").unwrap();
        uow.payments()
            .update_status(p1.id, PaymentStatus::Success, Some("ext-1"), Some("prov-1"), Utc::now())
            .unwrap();
        let err = uow
            .payments()
            .update_status(p2.id, PaymentStatus::Success, Some("ext-1"), Some("prov-2"), Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
    }
}
