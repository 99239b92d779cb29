//! Background loops: issue summary refresh and subscriber heartbeat.
//!
//! Both run on the gateway's task tracker and stop when its token is
//! cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use parley_core::types::{ConversationTurn, SummarySnapshot};

use crate::state::GatewayState;

/// Spawn the heartbeat loop, and the refresh loop when summaries are enabled.
pub fn spawn_background_tasks(state: &Arc<GatewayState>) {
    let summary = state.config.summary();

    let heartbeat = Duration::from_secs(summary.heartbeat_secs.max(1));
    let hb_state = state.clone();
    state.tasks.spawn(async move {
        let mut interval = tokio::time::interval(heartbeat);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = hb_state.cancel.cancelled() => break,
                _ = interval.tick() => hb_state.hub.heartbeat().await,
            }
        }
        debug!("Heartbeat loop stopped");
    });

    if !summary.enabled {
        info!("Issue summary refresh disabled");
        return;
    }

    let period = Duration::from_secs(summary.refresh_secs.max(1));
    let refresh_state = state.clone();
    state.tasks.spawn(async move {
        info!(period_secs = period.as_secs(), "Issue summary refresh started");
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = refresh_state.cancel.cancelled() => break,
                _ = async {
                    interval.tick().await;
                    refresh_summary(&refresh_state).await;
                } => {}
            }
        }
        debug!("Issue summary refresh stopped");
    });
}

/// Run one refresh cycle: summarize, store the snapshot, append it to the
/// history and push it to subscribers. Failures are logged and dropped.
pub async fn refresh_summary(state: &GatewayState) -> Option<SummarySnapshot> {
    let text = match state.summarizer.summarize().await {
        Ok(Some(text)) => text,
        Ok(None) => return None,
        Err(e) => {
            warn!(%e, "Issue summary refresh failed");
            return None;
        }
    };

    state
        .history
        .append(ConversationTurn::assistant(text.clone()))
        .await;
    state.compactor.maybe_schedule().await;
    let snapshot = state.hub.publish(text).await;
    debug!(version = snapshot.version, "Issue summary published");
    Some(snapshot)
}
