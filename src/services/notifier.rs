//! Announcement of newly surfaced discoveries to reviewers.

use crate::models::discovery::SurfacedDiscovery;
use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Announce discoveries that need review. Callers treat failures as
    /// non-fatal.
    async fn notify(&self, discoveries: &[SurfacedDiscovery]) -> Result<()>;
}

/// Writes announcements to the structured log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, discoveries: &[SurfacedDiscovery]) -> Result<()> {
        info!(count = discoveries.len(), "discoveries pending review");
        for discovery in discoveries {
            info!(
                discovery_id = discovery.id,
                file_name = %discovery.file_name,
                storage_path = %discovery.storage_path,
                "pending review"
            );
        }
        Ok(())
    }
}
