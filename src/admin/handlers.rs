use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::lifecycle::state::ServiceState;
use crate::modules::ModuleKey;

#[derive(Debug, Serialize)]
pub struct ServiceStatus {
    pub version: &'static str,
    pub node: String,
    pub state: ServiceState,
    pub modules: Vec<ModuleKey>,
    pub connections: usize,
    pub peers: Vec<String>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<ServiceStatus> {
    let context = &state.context;
    Json(ServiceStatus {
        version: env!("CARGO_PKG_VERSION"),
        node: context.store.current().node.name.clone(),
        state: context.state.get(),
        modules: context.modules.running(),
        connections: context.connections.active_count(),
        peers: context.cluster.connected_peers(),
    })
}
