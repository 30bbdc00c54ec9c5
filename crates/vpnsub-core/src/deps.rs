use std::sync::Arc;

use vpnsub_store::Store;
use vpnsub_vpn::VpnProvisioner;

use crate::notification::NotificationSink;

/// Shared handles every service call and every fired scheduler job needs.
/// Built once at startup and threaded through as `&Deps`; nothing here is
/// owned by the scheduler or by a service, which is what keeps the
/// scheduler, the services and `Deps` itself free of reference cycles.
pub struct Deps {
    pub store: Arc<Store>,
    pub vpn: Arc<dyn VpnProvisioner>,
    pub notifications: Arc<dyn NotificationSink>,
}

impl Deps {
    pub fn new(store: Arc<Store>, vpn: Arc<dyn VpnProvisioner>, notifications: Arc<dyn NotificationSink>) -> Self {
        Deps { store, vpn, notifications }
    }
}
