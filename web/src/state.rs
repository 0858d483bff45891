//! Shared handler state.

use herald_core::directory::RecipientDirectory;
use herald_core::fault::FaultFlags;
use herald_core::inbox::InboxCache;
use herald_orchestrator::RedriveService;
use herald_postgres::{
    BroadcastRepository, DeliveryRepository, Outbox, PreferencesRepository, StatisticsRepository,
};
use herald_push::PushSessionManager;
use std::sync::Arc;

/// Everything the handlers touch, wired once at startup and cloned per
/// request (all fields are cheap handles).
#[derive(Clone)]
pub struct AppState {
    /// Broadcast rows.
    pub broadcasts: BroadcastRepository,
    /// Delivery rows and inbox reads.
    pub deliveries: DeliveryRepository,
    /// Per-broadcast counters.
    pub statistics: StatisticsRepository,
    /// Recipient preferences.
    pub preferences: PreferencesRepository,
    /// The transactional outbox.
    pub outbox: Outbox,
    /// This node's push-session pool.
    pub push: Arc<PushSessionManager>,
    /// The shared inbox cache.
    pub cache: Arc<dyn InboxCache>,
    /// Failure-injection flags.
    pub flags: Arc<dyn FaultFlags>,
    /// Dead-letter redrive.
    pub redrive: Arc<RedriveService>,
    /// The external recipient directory.
    pub directory: Arc<dyn RecipientDirectory>,
    /// The orchestration topic.
    pub topic: String,
}
