use crate::error::StoreError;
use crate::model::TriggerEvent;
use crate::pipeline::analyzer::Anomaly;
use crate::store::{InsertOutcome, TriggerStore};
use chrono::NaiveDate;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerOutcome {
    Created(TriggerEvent),
    /// Another invocation already recorded this app/day.
    AlreadyExists(TriggerEvent),
}

/// At-most-once recording of trigger events per `(app_id, date)`.
pub struct TriggerLedger {
    store: Arc<dyn TriggerStore>,
}

impl TriggerLedger {
    pub fn new(store: Arc<dyn TriggerStore>) -> Self {
        Self { store }
    }

    pub async fn record_if_absent(
        &self,
        app_id: &str,
        date: NaiveDate,
        anomaly: &Anomaly,
    ) -> Result<LedgerOutcome, StoreError> {
        let event = TriggerEvent {
            app_id: app_id.to_string(),
            date,
            today_count: anomaly.today_count,
            baseline_median: anomaly.baseline,
            margin: anomaly.margin,
            mode: anomaly.mode.as_str().to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        match self.store.insert_if_absent(&event).await? {
            InsertOutcome::Inserted(event) => {
                tracing::info!(app_id, date = %date, today_count = event.today_count, "trigger event recorded");
                Ok(LedgerOutcome::Created(event))
            }
            InsertOutcome::Existing(event) => {
                tracing::info!(app_id, date = %date, "trigger already recorded for this day");
                Ok(LedgerOutcome::AlreadyExists(event))
            }
        }
    }

    pub async fn exists(&self, app_id: &str, date: NaiveDate) -> Result<bool, StoreError> {
        Ok(self.store.find(app_id, date).await?.is_some())
    }
}
