//! Background reconciliation for one participant.
//!
//! A local tick recomputes the view while poll loops refetch server state.
//! Change notices from the feed are debounced into a single refresh. Dropping
//! the handle cancels the loops; `shutdown` also waits for them to finish.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use live_core::model::UserId;
use live_core::ranker::Leaderboard;
use storage::gateway::{ChangeFeed, ChangeKind, ChangeNotice};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::SyncConfig;
use crate::error::LiveClientError;
use crate::participant::{LiveView, ParticipantController};

/// Refreshes requested by a batch of change notices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PendingRefresh {
    session: bool,
    progress: bool,
    leaderboard: bool,
}

impl PendingRefresh {
    fn all() -> Self {
        Self {
            session: true,
            progress: true,
            leaderboard: true,
        }
    }

    fn absorb(&mut self, notice: &ChangeNotice, me: UserId) {
        match notice.kind {
            ChangeKind::Session => {
                self.session = true;
                self.leaderboard = true;
            }
            ChangeKind::Progress => {
                if notice.user_id.is_none_or(|user| user == me) {
                    self.progress = true;
                }
                self.leaderboard = true;
            }
            ChangeKind::Leaderboard => self.leaderboard = true,
        }
    }

    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Handle to a running sync loop.
pub struct LiveSync {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    views: watch::Receiver<LiveView>,
    boards: watch::Receiver<Leaderboard>,
}

impl LiveSync {
    /// Subscribe to `feed` and start the loops on the current runtime.
    #[must_use]
    pub fn spawn(
        controller: Arc<ParticipantController>,
        feed: &dyn ChangeFeed,
        config: SyncConfig,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (view_tx, views) = watch::channel(LiveView::default());
        let (board_tx, boards) = watch::channel(Leaderboard::default());
        let board_tx = Arc::new(board_tx);
        let notices = feed.subscribe(controller.class_id());

        tracing::info!(
            class_id = %controller.class_id(),
            user_id = %controller.user_id(),
            tick_ms = config.tick.as_millis(),
            "live sync started"
        );

        let tasks = vec![
            tokio::spawn(tick_loop(
                Arc::clone(&controller),
                view_tx,
                config.tick,
                cancel.clone(),
            )),
            tokio::spawn(poll_loop(
                "session",
                config.session_poll,
                cancel.clone(),
                {
                    let controller = Arc::clone(&controller);
                    move || {
                        let controller = Arc::clone(&controller);
                        async move { controller.refresh_session().await.map(|_| ()) }
                    }
                },
            )),
            tokio::spawn(poll_loop(
                "progress",
                config.progress_poll,
                cancel.clone(),
                {
                    let controller = Arc::clone(&controller);
                    move || {
                        let controller = Arc::clone(&controller);
                        async move { controller.refresh_progress().await.map(|_| ()) }
                    }
                },
            )),
            tokio::spawn(poll_loop(
                "leaderboard",
                config.leaderboard_poll,
                cancel.clone(),
                {
                    let controller = Arc::clone(&controller);
                    let board_tx = Arc::clone(&board_tx);
                    move || {
                        let controller = Arc::clone(&controller);
                        let board_tx = Arc::clone(&board_tx);
                        async move {
                            let board = controller.refresh_leaderboard().await?;
                            board_tx.send_replace(board);
                            Ok(())
                        }
                    }
                },
            )),
            tokio::spawn(push_loop(
                controller,
                notices,
                board_tx,
                config.push_debounce,
                cancel.clone(),
            )),
        ];

        Self {
            cancel,
            tasks,
            views,
            boards,
        }
    }

    /// Latest view, updated every tick.
    #[must_use]
    pub fn views(&self) -> watch::Receiver<LiveView> {
        self.views.clone()
    }

    /// Latest ranked leaderboard.
    #[must_use]
    pub fn leaderboard(&self) -> watch::Receiver<Leaderboard> {
        self.boards.clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stop every loop and wait for them to exit. Drops the feed subscription.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "live sync task failed");
            }
        }
        tracing::info!("live sync stopped");
    }
}

impl Drop for LiveSync {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

//
// ─── LOOPS ─────────────────────────────────────────────────────────────────────
//

async fn tick_loop(
    controller: Arc<ParticipantController>,
    views: watch::Sender<LiveView>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match controller.tick() {
                    Ok(view) => {
                        views.send_replace(view);
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "live tick failed");
                        break;
                    }
                }
                if let Err(err) = controller.flush_emom_marks().await {
                    tracing::warn!(error = %err, "emom flush failed");
                }
            }
        }
    }
}

async fn poll_loop<F, Fut>(what: &'static str, period: Duration, cancel: CancellationToken, fetch: F)
where
    F: Fn() -> Fut + Send,
    Fut: Future<Output = Result<(), LiveClientError>> + Send,
{
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(err) = fetch().await {
                    log_refresh_error(what, &err);
                }
            }
        }
    }
}

async fn push_loop(
    controller: Arc<ParticipantController>,
    mut notices: broadcast::Receiver<ChangeNotice>,
    boards: Arc<watch::Sender<Leaderboard>>,
    debounce: Duration,
    cancel: CancellationToken,
) {
    let me = controller.user_id();
    let mut pending = PendingRefresh::default();
    let mut deadline: Option<Instant> = None;

    loop {
        let flush_at = deadline.unwrap_or_else(Instant::now);
        tokio::select! {
            () = cancel.cancelled() => break,
            () = time::sleep_until(flush_at), if deadline.is_some() => {
                deadline = None;
                apply_refresh(&controller, &boards, std::mem::take(&mut pending)).await;
            }
            received = notices.recv() => match received {
                Ok(notice) => {
                    pending.absorb(&notice, me);
                    if deadline.is_none() && !pending.is_empty() {
                        deadline = Some(Instant::now() + debounce);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "change feed lagged; refreshing everything");
                    pending = PendingRefresh::all();
                    deadline.get_or_insert_with(Instant::now);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::debug!("change feed closed; relying on polling");
                    break;
                }
            },
        }
    }
}

async fn apply_refresh(
    controller: &ParticipantController,
    boards: &watch::Sender<Leaderboard>,
    pending: PendingRefresh,
) {
    if pending.session {
        if let Err(err) = controller.refresh_session().await {
            log_refresh_error("session", &err);
        }
    }
    if pending.progress {
        if let Err(err) = controller.refresh_progress().await {
            log_refresh_error("progress", &err);
        }
    }
    if pending.leaderboard {
        match controller.refresh_leaderboard().await {
            Ok(board) => {
                boards.send_replace(board);
            }
            Err(err) => log_refresh_error("leaderboard", &err),
        }
    }
}

fn log_refresh_error(what: &'static str, err: &LiveClientError) {
    if err.is_transient() {
        tracing::debug!(what, error = %err, "refresh failed; will retry");
    } else {
        tracing::warn!(what, error = %err, "refresh failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use live_core::model::ClassId;

    fn notice(kind: ChangeKind, user: Option<u64>) -> ChangeNotice {
        ChangeNotice {
            class_id: ClassId::new(1),
            kind,
            user_id: user.map(UserId::new),
        }
    }

    #[test]
    fn other_members_progress_only_refreshes_the_board() {
        let mut pending = PendingRefresh::default();
        pending.absorb(&notice(ChangeKind::Progress, Some(2)), UserId::new(1));
        assert!(!pending.progress);
        assert!(pending.leaderboard);
        assert!(!pending.session);
    }

    #[test]
    fn own_progress_and_session_notices_accumulate() {
        let mut pending = PendingRefresh::default();
        assert!(pending.is_empty());
        pending.absorb(&notice(ChangeKind::Progress, Some(1)), UserId::new(1));
        pending.absorb(&notice(ChangeKind::Session, None), UserId::new(1));
        assert_eq!(pending, PendingRefresh::all());
    }
}
