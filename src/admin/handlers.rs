use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::webapp::application::{LifecycleState, MappingsSnapshot};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub applications: usize,
}

#[derive(Serialize)]
pub struct ApplicationStatus {
    pub name: String,
    pub context_path: String,
    pub hosts: Vec<String>,
    pub state: LifecycleState,
    pub active_sessions: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        applications: state.engine.applications().len(),
    })
}

pub async fn get_applications(State(state): State<AdminState>) -> Json<Vec<ApplicationStatus>> {
    let statuses = state
        .engine
        .applications()
        .iter()
        .map(|app| ApplicationStatus {
            name: app.name().to_string(),
            context_path: app.context_path().to_string(),
            hosts: app.hosts().to_vec(),
            state: app.state(),
            active_sessions: app.sessions().active_sessions(),
        })
        .collect();
    Json(statuses)
}

pub async fn get_mappings(State(state): State<AdminState>) -> Json<Vec<MappingsSnapshot>> {
    Json(
        state
            .engine
            .applications()
            .iter()
            .map(|app| app.mappings_snapshot())
            .collect(),
    )
}
