//! Shared state handed to every HTTP handler.

use crate::services::{
    approval::ApprovalService, discovery_store::DiscoveryStore, scheduler::DiscoveryScheduler,
};

#[derive(Clone)]
pub struct AppState {
    pub store: DiscoveryStore,
    pub approvals: ApprovalService,
    pub scheduler: DiscoveryScheduler,
}
