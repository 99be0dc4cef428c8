//! Shared application state
//!
//! One instance lives for the process lifetime and is cloned (cheaply,
//! via `Arc`) into every axum handler and call task.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use voice_agent_capacity::AdmissionController;
use voice_agent_clients::{CarrierCallControlClient, ControlPlaneClient, HttpBrainClient};
use voice_agent_config::{Settings, TenantResolver};

use crate::session::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub tenant_resolver: Arc<TenantResolver>,
    pub admission: Arc<AdmissionController>,
    pub brain: Arc<HttpBrainClient>,
    pub control_plane: Arc<ControlPlaneClient>,
    pub carrier: Arc<CarrierCallControlClient>,
    pub sessions: Arc<SessionRegistry>,
    pub metrics_handle: PrometheusHandle,
}

impl AppState {
    pub fn new(
        settings: Arc<Settings>,
        tenant_resolver: Arc<TenantResolver>,
        admission: Arc<AdmissionController>,
        brain: Arc<HttpBrainClient>,
        control_plane: Arc<ControlPlaneClient>,
        carrier: Arc<CarrierCallControlClient>,
        metrics_handle: PrometheusHandle,
    ) -> Self {
        Self {
            settings,
            tenant_resolver,
            admission,
            brain,
            control_plane,
            carrier,
            sessions: Arc::new(SessionRegistry::new()),
            metrics_handle,
        }
    }
}
