/// Per-tenant admission check against a fixed live-record ceiling.
#[derive(Debug, Clone, Copy)]
pub struct QuotaEnforcer {
    tenant_limit: usize,
}

impl QuotaEnforcer {
    pub fn new(tenant_limit: usize) -> Self {
        Self { tenant_limit }
    }

    pub fn tenant_limit(&self) -> usize {
        self.tenant_limit
    }

    /// Whether one more record may be admitted for a tenant currently holding
    /// `live_count` live records.
    pub fn can_admit(&self, tenant_id: &str, live_count: usize) -> bool {
        let admit = live_count < self.tenant_limit;
        if !admit {
            tracing::debug!(
                tenant = tenant_id,
                live_count,
                limit = self.tenant_limit,
                "quota reached"
            );
        }
        admit
    }
}
