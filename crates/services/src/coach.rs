use std::sync::Arc;

use live_core::model::{ClassId, EmomMark, UserId};
use storage::gateway::{CoachGateway, GatewayError, SessionSnapshot};

/// Coach-side controls for a live class.
#[derive(Clone)]
pub struct CoachService {
    gateway: Arc<dyn CoachGateway>,
}

impl CoachService {
    #[must_use]
    pub fn new(gateway: Arc<dyn CoachGateway>) -> Self {
        Self { gateway }
    }

    /// # Errors
    ///
    /// Returns `GatewayError::AlreadyStarted` or `GatewayError::AlreadyEnded`.
    pub async fn start(&self, class_id: ClassId) -> Result<SessionSnapshot, GatewayError> {
        let snapshot = self.gateway.start_session(class_id).await?;
        tracing::info!(
            class_id = %class_id,
            started_at = ?snapshot.session.started_at(),
            time_cap_seconds = snapshot.session.time_cap_seconds(),
            "class started"
        );
        Ok(snapshot)
    }

    /// # Errors
    ///
    /// Returns `GatewayError::NotStarted` or `GatewayError::AlreadyEnded`.
    pub async fn pause(&self, class_id: ClassId) -> Result<SessionSnapshot, GatewayError> {
        let snapshot = self.gateway.pause_session(class_id).await?;
        tracing::info!(class_id = %class_id, "class paused");
        Ok(snapshot)
    }

    /// # Errors
    ///
    /// Returns `GatewayError::NotStarted` or `GatewayError::AlreadyEnded`.
    pub async fn resume(&self, class_id: ClassId) -> Result<SessionSnapshot, GatewayError> {
        let snapshot = self.gateway.resume_session(class_id).await?;
        tracing::info!(
            class_id = %class_id,
            paused_total = snapshot.session.pause_accumulated_seconds(),
            "class resumed"
        );
        Ok(snapshot)
    }

    /// # Errors
    ///
    /// Returns `GatewayError::NotStarted` when no session exists.
    pub async fn stop(&self, class_id: ClassId) -> Result<SessionSnapshot, GatewayError> {
        let snapshot = self.gateway.stop_session(class_id).await?;
        tracing::info!(
            class_id = %class_id,
            ended_at = ?snapshot.session.ended_at(),
            "class stopped"
        );
        Ok(snapshot)
    }

    /// # Errors
    ///
    /// Returns `GatewayError::Unsupported` unless the class runs an AMRAP.
    pub async fn set_amrap_total(
        &self,
        class_id: ClassId,
        user_id: UserId,
        total_reps: u32,
    ) -> Result<(), GatewayError> {
        self.gateway
            .set_amrap_total(class_id, user_id, total_reps)
            .await?;
        tracing::info!(class_id = %class_id, user_id = %user_id, total_reps, "amrap total corrected");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `GatewayError::Unsupported` unless the class runs a FOR_TIME.
    pub async fn set_for_time_finish(
        &self,
        class_id: ClassId,
        user_id: UserId,
        finish_seconds: Option<i64>,
    ) -> Result<(), GatewayError> {
        self.gateway
            .set_for_time_finish(class_id, user_id, finish_seconds)
            .await?;
        tracing::info!(
            class_id = %class_id,
            user_id = %user_id,
            finish_seconds = ?finish_seconds,
            "for-time finish corrected"
        );
        Ok(())
    }

    /// Score a FOR_TIME member who did not finish by their total reps.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Unsupported` unless the class runs a FOR_TIME.
    pub async fn set_for_time_total(
        &self,
        class_id: ClassId,
        user_id: UserId,
        total_reps: u32,
    ) -> Result<(), GatewayError> {
        self.gateway
            .set_for_time_total(class_id, user_id, total_reps)
            .await?;
        tracing::info!(class_id = %class_id, user_id = %user_id, total_reps, "for-time total corrected");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `GatewayError::Unsupported` unless the class runs an EMOM.
    pub async fn set_emom_mark(
        &self,
        class_id: ClassId,
        user_id: UserId,
        mark: EmomMark,
    ) -> Result<(), GatewayError> {
        self.gateway.set_emom_mark(class_id, user_id, mark).await?;
        tracing::info!(
            class_id = %class_id,
            user_id = %user_id,
            minute = mark.minute_index,
            finished = mark.finished,
            "emom minute corrected"
        );
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `GatewayError::Unsupported` unless the class runs intervals.
    pub async fn post_interval_score(
        &self,
        class_id: ClassId,
        user_id: UserId,
        step_index: u32,
        reps: u32,
    ) -> Result<(), GatewayError> {
        self.gateway
            .post_interval_score_for(class_id, user_id, step_index, reps)
            .await
    }
}
