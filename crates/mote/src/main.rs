use std::sync::Arc;

use anyhow::Context;

use mote_core::{
    config::Config,
    messaging::{
        port::StatusPort,
        serialized::{SerializeConfig, SerializedStatus},
    },
    update::{install::StagingInstaller, notifier::UpdateNotifier, UpdateChecker},
};
use mote_git::GitCli;
use mote_telegram::TelegramStatus;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mote_core::logging::init("mote")?;

    let cfg = Config::load()?;

    let transport = TelegramStatus::from_token(
        &cfg.telegram_bot_token,
        cfg.telegram_admin_chats.clone(),
    );
    let status: Arc<dyn StatusPort> = Arc::new(SerializedStatus::new(
        Arc::new(transport),
        SerializeConfig::default(),
    ));
    status.connect().await.context("connecting to telegram")?;

    let notifier = match &cfg.updates {
        Some(up) => {
            let vcs = Arc::new(GitCli::new(&up.project_root, up.vcs_timeout));
            let installer = Arc::new(StagingInstaller::new(&up.staging_dir));
            let checker = UpdateChecker::from_config(up, vcs, installer)
                .await
                .context("building update checker")?;

            let notifier = UpdateNotifier::from_config(up, Arc::new(checker), status.clone());
            notifier.start().await;
            Some(notifier)
        }
        None => {
            tracing::info!("UPDATE_ACTION not set; update checks disabled");
            None
        }
    };

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("shutting down");

    if let Some(notifier) = &notifier {
        notifier.stop().await;
        let st = notifier.status().await;
        tracing::info!(
            has_update = st.has_update,
            notifications = st.notifications,
            "update notifier summary"
        );
    }
    status.disconnect().await?;

    Ok(())
}
