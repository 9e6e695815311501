use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use crystalerp_core::TenantId;

/// Keyed rows of one read model, partitioned by tenant.
///
/// Holds only derived data; `Ledger::rebuild_read_models` can always clear and
/// refill it from the event store. Lock poisoning degrades to "no rows".
pub trait TenantStore<K, V>: Send + Sync {
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V>;

    fn upsert(&self, tenant_id: TenantId, key: K, value: V);

    /// Read-modify-write of one row under a single write lock.
    fn modify(&self, tenant_id: TenantId, key: K, f: &mut dyn FnMut(&mut Option<V>));

    /// First row of the tenant matching `pred`. Iteration order is unspecified.
    fn find(&self, tenant_id: TenantId, pred: &dyn Fn(&V) -> bool) -> Option<V>;

    fn values(&self, tenant_id: TenantId) -> Vec<V>;

    fn clear_tenant(&self, tenant_id: TenantId);
}

impl<K, V, S> TenantStore<K, V> for Arc<S>
where
    S: TenantStore<K, V> + ?Sized,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        S::get(self, tenant_id, key)
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) {
        S::upsert(self, tenant_id, key, value)
    }

    fn modify(&self, tenant_id: TenantId, key: K, f: &mut dyn FnMut(&mut Option<V>)) {
        S::modify(self, tenant_id, key, f)
    }

    fn find(&self, tenant_id: TenantId, pred: &dyn Fn(&V) -> bool) -> Option<V> {
        S::find(self, tenant_id, pred)
    }

    fn values(&self, tenant_id: TenantId) -> Vec<V> {
        S::values(self, tenant_id)
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        S::clear_tenant(self, tenant_id)
    }
}

/// Process-local store: one map per tenant, so tenant scans never touch
/// another tenant's rows.
#[derive(Debug)]
pub struct InMemoryTenantStore<K, V> {
    tenants: RwLock<HashMap<TenantId, HashMap<K, V>>>,
}

impl<K, V> InMemoryTenantStore<K, V> {
    pub fn new() -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryTenantStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TenantStore<K, V> for InMemoryTenantStore<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        let tenants = self.tenants.read().ok()?;
        tenants.get(&tenant_id)?.get(key).cloned()
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) {
        if let Ok(mut tenants) = self.tenants.write() {
            tenants.entry(tenant_id).or_default().insert(key, value);
        }
    }

    fn modify(&self, tenant_id: TenantId, key: K, f: &mut dyn FnMut(&mut Option<V>)) {
        let Ok(mut tenants) = self.tenants.write() else {
            return;
        };
        let rows = tenants.entry(tenant_id).or_default();
        let mut slot = rows.remove(&key);
        f(&mut slot);
        if let Some(value) = slot {
            rows.insert(key, value);
        }
    }

    fn find(&self, tenant_id: TenantId, pred: &dyn Fn(&V) -> bool) -> Option<V> {
        let tenants = self.tenants.read().ok()?;
        tenants.get(&tenant_id)?.values().find(|v| pred(v)).cloned()
    }

    fn values(&self, tenant_id: TenantId) -> Vec<V> {
        self.tenants
            .read()
            .ok()
            .and_then(|tenants| tenants.get(&tenant_id).map(|rows| rows.values().cloned().collect()))
            .unwrap_or_default()
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        if let Ok(mut tenants) = self.tenants.write() {
            tenants.remove(&tenant_id);
        }
    }
}
