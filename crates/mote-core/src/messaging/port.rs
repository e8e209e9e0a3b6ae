use async_trait::async_trait;

use crate::Result;

/// Transport port used by the bot core to surface its status.
///
/// The transport (Telegram today) owns the connection; the core only needs to
/// bring it up, tear it down, and push a free-text status line.
#[async_trait]
pub trait StatusPort: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
    async fn publish_status(&self, text: &str) -> Result<()>;
}
