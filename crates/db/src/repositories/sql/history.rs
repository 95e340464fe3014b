//! History records.

use async_trait::async_trait;
use chrono::Utc;
use roomsvc_common::{AppError, AppResult};
use sea_orm::{EntityTrait, NotSet, Set};

use super::SqlRepository;
use crate::entities::{History, history};
use crate::repositories::{HistoryEntry, HistoryStore};

#[async_trait]
impl HistoryStore for SqlRepository {
    async fn record_history(&self, entry: HistoryEntry) -> AppResult<()> {
        let model = history::ActiveModel {
            id: NotSet,
            entity: Set(entry.entity),
            entity_id: Set(entry.entity_id),
            operation: Set(entry.operation),
            requested_by: Set(entry.requested_by),
            diff: Set(entry.diff),
            created_at: Set(Utc::now()),
        };

        History::insert(model)
            .exec_without_returning(self.db())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }
}
