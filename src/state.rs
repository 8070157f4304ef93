use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::broadcast;

use crate::{
    config::Config,
    models::{AppointmentRow, Approval, InvoiceRow, RepairRow},
    scheduling::SlotLocks,
};

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<Config>,
    pub events: broadcast::Sender<ServerEvent>,
    pub slot_locks: Arc<SlotLocks>,
}

impl AppState {
    pub fn new(db: SqlitePool, config: Config) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            db,
            config: Arc::new(config),
            events,
            slot_locks: Arc::new(SlotLocks::default()),
        }
    }

    /// Publishes to live subscribers; nobody listening is not an error.
    pub fn publish(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ServerEvent {
    pub kind: String,
    pub customer_id: String,
    pub mechanic_id: String,
    pub appointment_id: Option<String>,
    pub repair_id: Option<String>,
    pub invoice_id: Option<String>,
    pub status: Option<Approval>,
    pub at: DateTime<Utc>,
}

impl ServerEvent {
    pub fn from_appointment(kind: &str, row: &AppointmentRow) -> Self {
        Self {
            kind: kind.to_string(),
            customer_id: row.customer_id.clone(),
            mechanic_id: row.mechanic_id.clone(),
            appointment_id: Some(row.id.clone()),
            repair_id: None,
            invoice_id: None,
            status: Some(row.status()),
            at: Utc::now(),
        }
    }

    pub fn from_repair(kind: &str, row: &RepairRow) -> Self {
        Self {
            kind: kind.to_string(),
            customer_id: row.owner_id.clone(),
            mechanic_id: row.mechanic_id.clone(),
            appointment_id: Some(row.appointment_id.clone()),
            repair_id: Some(row.id.clone()),
            invoice_id: None,
            status: Some(Approval {
                mechanic: row.finished_mechanic,
                user: row.finished_user,
            }),
            at: Utc::now(),
        }
    }

    pub fn from_invoice(kind: &str, row: &InvoiceRow) -> Self {
        Self {
            kind: kind.to_string(),
            customer_id: row.owner_id.clone(),
            mechanic_id: row.mechanic.id.clone(),
            appointment_id: None,
            repair_id: Some(row.repair_id.clone()),
            invoice_id: Some(row.id.clone()),
            status: None,
            at: row.finalized_at,
        }
    }
}
