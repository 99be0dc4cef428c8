//! Admission controller (§4.3)

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{info, warn};

use voice_agent_core::{CapacityScope, DenialReason, KvStore, TenantConfig};

use crate::CapacityError;

/// A successful reservation. Dropping this without calling
/// [`AdmissionController::release`] leaks capacity until the leak sweep
/// or the KV store's own TTL reclaims it; `release` is the only sanctioned
/// way to retire one.
#[derive(Debug, Clone)]
pub struct CallHandle {
    pub call_id: String,
    pub tenant_id: String,
}

struct TrackedCall {
    tenant_id: String,
    started_at: Instant,
}

pub struct AdmissionController {
    kv: Arc<dyn KvStore>,
    capacity_ttl_seconds: u64,
    call_ttl: Duration,
    global_cap: i64,
    tracked: Mutex<HashMap<String, TrackedCall>>,
}

impl AdmissionController {
    pub fn new(kv: Arc<dyn KvStore>, capacity_ttl_seconds: u64, call_ttl: Duration, global_cap: i64) -> Arc<Self> {
        Arc::new(Self {
            kv,
            capacity_ttl_seconds,
            call_ttl,
            global_cap,
            tracked: Mutex::new(HashMap::new()),
        })
    }

    /// Reserve capacity for `call_id` under `tenant`, in the fixed order
    /// per-minute -> per-tenant -> global. Any scope's denial rolls back
    /// every scope already reserved, in reverse order.
    pub async fn reserve(&self, call_id: &str, tenant: &TenantConfig) -> Result<CallHandle, DenialReason> {
        let minute_ttl = 60;
        let concurrent_ttl = self.capacity_ttl_seconds.max(60);

        let mut reserved: Vec<CapacityScope> = Vec::new();

        if let Err(reason) = self
            .try_reserve_scope(CapacityScope::TenantPerMinute, &tenant.tenant_id, tenant.max_calls_per_minute, minute_ttl)
            .await
        {
            self.rollback(&reserved, &tenant.tenant_id).await;
            return Err(reason);
        }
        reserved.push(CapacityScope::TenantPerMinute);

        if let Err(reason) = self
            .try_reserve_scope(CapacityScope::TenantConcurrent, &tenant.tenant_id, tenant.max_concurrent_calls, concurrent_ttl)
            .await
        {
            self.rollback(&reserved, &tenant.tenant_id).await;
            return Err(reason);
        }
        reserved.push(CapacityScope::TenantConcurrent);

        if let Err(reason) = self
            .try_reserve_scope(CapacityScope::GlobalConcurrent, &tenant.tenant_id, self.global_cap, concurrent_ttl)
            .await
        {
            self.rollback(&reserved, &tenant.tenant_id).await;
            return Err(reason);
        }

        self.tracked.lock().insert(
            call_id.to_string(),
            TrackedCall { tenant_id: tenant.tenant_id.clone(), started_at: Instant::now() },
        );

        Ok(CallHandle { call_id: call_id.to_string(), tenant_id: tenant.tenant_id.clone() })
    }

    async fn try_reserve_scope(&self, scope: CapacityScope, tenant_id: &str, limit: i64, ttl_seconds: u64) -> Result<(), DenialReason> {
        if limit == -1 {
            return Ok(());
        }
        let key = scope.key(tenant_id);
        let value = self.kv.incr(&key, ttl_seconds).await.map_err(|e| {
            warn!(scope = ?scope, error = %e, "kv incr failed during reservation");
            DenialReason::SystemAtCapacity
        })?;

        if value > limit {
            // Over limit: this reservation itself must be rolled back too,
            // not just the earlier scopes, since the increment already
            // landed in the store.
            match scope {
                CapacityScope::TenantPerMinute => {
                    // Per-minute counter is never decremented (it expires
                    // naturally per §4.3); nothing to roll back here.
                }
                _ => {
                    let _ = self.kv.decr_floor_zero(&key).await;
                }
            }
            return Err(match scope {
                CapacityScope::TenantPerMinute => DenialReason::RateLimited,
                CapacityScope::TenantConcurrent => DenialReason::TenantAtCapacity,
                CapacityScope::GlobalConcurrent => DenialReason::SystemAtCapacity,
            });
        }

        Ok(())
    }

    async fn rollback(&self, reserved: &[CapacityScope], tenant_id: &str) {
        for scope in reserved.iter().rev() {
            if matches!(scope, CapacityScope::TenantPerMinute) {
                continue;
            }
            let key = scope.key(tenant_id);
            if let Err(e) = self.kv.decr_floor_zero(&key).await {
                warn!(scope = ?scope, error = %e, "rollback decrement failed");
            }
        }
    }

    /// Release a reservation. Idempotent: releasing a call id not present
    /// in the tracked table is a no-op (covers double-release and
    /// sweep/teardown races).
    pub async fn release(&self, handle: &CallHandle) -> Result<(), CapacityError> {
        let tracked = self.tracked.lock().remove(&handle.call_id);
        if tracked.is_none() {
            return Ok(());
        }

        let tenant_key = CapacityScope::TenantConcurrent.key(&handle.tenant_id);
        let global_key = CapacityScope::GlobalConcurrent.key(&handle.tenant_id);

        if let Err(e) = self.kv.decr_floor_zero(&tenant_key).await {
            warn!(call_id = %handle.call_id, error = %e, "release: tenant decrement failed");
        }
        if let Err(e) = self.kv.decr_floor_zero(&global_key).await {
            warn!(call_id = %handle.call_id, error = %e, "release: global decrement failed");
        }
        Ok(())
    }

    /// Spawn the leak-recovery sweep (§4.3): every 60s, release any
    /// locally tracked call older than the configured call TTL that
    /// never went through a clean `release`.
    pub fn start_leak_sweep(self: &Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let controller = Arc::clone(self);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        controller.sweep_leaked_calls().await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("capacity leak sweep shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }

    async fn sweep_leaked_calls(&self) {
        let expired: Vec<CallHandle> = {
            let tracked = self.tracked.lock();
            tracked
                .iter()
                .filter(|(_, call)| call.started_at.elapsed() > self.call_ttl)
                .map(|(call_id, call)| CallHandle { call_id: call_id.clone(), tenant_id: call.tenant_id.clone() })
                .collect()
        };

        for handle in &expired {
            warn!(call_id = %handle.call_id, tenant_id = %handle.tenant_id, "releasing leaked capacity reservation");
            if let Err(e) = self.release(handle).await {
                warn!(call_id = %handle.call_id, error = %e, "leak sweep release failed");
            }
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "capacity leak sweep released stale reservations");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicI64, Ordering};
    use voice_agent_core::{KvResult, SecretRef, SttConfig as TenantSttConfig, TtsBackendKind, TtsConfig as TenantTtsConfig, TtsTuning};

    struct CountingKv {
        counters: Mutex<HashMap<String, AtomicI64>>,
    }

    impl CountingKv {
        fn new() -> Self {
            Self { counters: Mutex::new(HashMap::new()) }
        }
    }

    #[async_trait]
    impl KvStore for CountingKv {
        async fn get(&self, key: &str) -> KvResult<Option<String>> {
            let counters = self.counters.lock();
            Ok(counters.get(key).map(|c| c.load(Ordering::SeqCst).to_string()))
        }
        async fn set(&self, _key: &str, _value: &str, _ttl_seconds: Option<u64>) -> KvResult<()> {
            Ok(())
        }
        async fn incr(&self, key: &str, _ttl_seconds: u64) -> KvResult<i64> {
            let counters = self.counters.lock();
            let counter = counters.get(key);
            match counter {
                Some(c) => Ok(c.fetch_add(1, Ordering::SeqCst) + 1),
                None => {
                    drop(counters);
                    let mut counters = self.counters.lock();
                    let entry = counters.entry(key.to_string()).or_insert_with(|| AtomicI64::new(0));
                    Ok(entry.fetch_add(1, Ordering::SeqCst) + 1)
                }
            }
        }
        async fn decr_floor_zero(&self, key: &str) -> KvResult<i64> {
            let counters = self.counters.lock();
            if let Some(c) = counters.get(key) {
                let prev = c.fetch_sub(1, Ordering::SeqCst);
                if prev <= 0 {
                    c.store(0, Ordering::SeqCst);
                    Ok(0)
                } else {
                    Ok(prev - 1)
                }
            } else {
                Ok(0)
            }
        }
        async fn del(&self, _key: &str) -> KvResult<()> {
            Ok(())
        }
    }

    fn tenant(id: &str, max_concurrent: i64, max_per_minute: i64) -> TenantConfig {
        TenantConfig {
            contract_version: "v1".into(),
            tenant_id: id.into(),
            dialed_numbers: vec!["+15551234567".into()],
            max_concurrent_calls: max_concurrent,
            max_calls_per_minute: max_per_minute,
            webhook_secret: SecretRef::Literal("s".into()),
            stt: TenantSttConfig {
                endpoint_url: "http://stt".into(),
                chunk_duration_ms: 20,
                silence_timeout_ms: 700,
                language_hint: None,
                decoding_prompt: None,
            },
            tts: TenantTtsConfig {
                backend: TtsBackendKind::NarrowbandHttp,
                endpoint_url: "http://tts".into(),
                voice_id: "default".into(),
                sample_rate_hz: 8000,
                tuning: TtsTuning::default(),
            },
            transfer_profiles: vec![],
            assistant_context: vec![],
        }
    }

    #[tokio::test]
    async fn reserve_then_release_returns_to_zero() {
        let kv: Arc<dyn KvStore> = Arc::new(CountingKv::new());
        let controller = AdmissionController::new(kv.clone(), 60, Duration::from_secs(1800), 10);
        let t = tenant("t1", 5, 5);

        let handle = controller.reserve("call-1", &t).await.unwrap();
        controller.release(&handle).await.unwrap();

        assert_eq!(kv.get("cap:tenant:t1").await.unwrap(), Some("0".to_string()));
        assert_eq!(kv.get("cap:global").await.unwrap(), Some("0".to_string()));
    }

    #[tokio::test]
    async fn tenant_cap_denies_and_rolls_back_per_minute() {
        let kv: Arc<dyn KvStore> = Arc::new(CountingKv::new());
        let controller = AdmissionController::new(kv, 60, Duration::from_secs(1800), 10);
        let t = tenant("t1", 1, 100);

        let h1 = controller.reserve("call-1", &t).await.unwrap();
        let denied = controller.reserve("call-2", &t).await.unwrap_err();
        assert_eq!(denied, DenialReason::TenantAtCapacity);

        controller.release(&h1).await.unwrap();
        controller.reserve("call-3", &t).await.unwrap();
    }

    #[tokio::test]
    async fn unlimited_tenant_bypasses_enforcement() {
        let kv: Arc<dyn KvStore> = Arc::new(CountingKv::new());
        let controller = AdmissionController::new(kv, 60, Duration::from_secs(1800), 10);
        let t = tenant("t1", -1, -1);

        for i in 0..20 {
            controller.reserve(&format!("call-{i}"), &t).await.unwrap();
        }
    }

    #[tokio::test]
    async fn global_cap_denies_and_rolls_back_tenant_and_minute() {
        let kv: Arc<dyn KvStore> = Arc::new(CountingKv::new());
        let controller = AdmissionController::new(kv.clone(), 60, Duration::from_secs(1800), 1);
        let t1 = tenant("t1", 10, 10);
        let t2 = tenant("t2", 10, 10);

        let _h1 = controller.reserve("call-1", &t1).await.unwrap();
        let denied = controller.reserve("call-2", &t2).await.unwrap_err();
        assert_eq!(denied, DenialReason::SystemAtCapacity);

        // t2's own tenant-concurrent reservation must have been rolled back.
        assert_eq!(kv.get("cap:tenant:t2").await.unwrap(), Some("0".to_string()));
    }

    #[tokio::test]
    async fn double_release_is_a_no_op() {
        let kv: Arc<dyn KvStore> = Arc::new(CountingKv::new());
        let controller = AdmissionController::new(kv, 60, Duration::from_secs(1800), 10);
        let t = tenant("t1", 5, 5);

        let handle = controller.reserve("call-1", &t).await.unwrap();
        controller.release(&handle).await.unwrap();
        controller.release(&handle).await.unwrap();
    }
}
