use chrono::NaiveDate;

use super::domain::{CatalogItemRef, TurnoAction, TurnoId, TurnoStatus};
use super::evidence::EvidenceError;
use super::repository::RepositoryError;

/// Error raised by the turno workflows.
#[derive(Debug, thiserror::Error)]
pub enum TurnoError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("monthly quota reached: {count} of {limit} turnos already requested in {month}")]
    QuotaExceeded {
        count: u32,
        limit: u32,
        month: String,
    },
    #[error("daily capacity reached: {date} already has {count} of {limit} turnos")]
    CapacityExceeded {
        date: NaiveDate,
        count: u32,
        limit: u32,
    },
    #[error("no service day with free capacity within the next {horizon_days} days")]
    NoSlotAvailable { horizon_days: u32 },
    #[error("turno {0} not found")]
    NotFound(TurnoId),
    #[error("catalog item {0} not found")]
    CatalogItemNotFound(CatalogItemRef),
    #[error("turno {id} cannot {} while {status}", .action.label())]
    InvalidStateTransition {
        id: TurnoId,
        status: TurnoStatus,
        action: TurnoAction,
    },
    #[error("turno {id} does not belong to the requesting account")]
    NotOwner { id: TurnoId },
    #[error("insufficient stock for {item}: {available} available, {requested} requested")]
    InsufficientStock {
        item: CatalogItemRef,
        available: i64,
        requested: u32,
    },
    #[error(transparent)]
    Persistence(#[from] RepositoryError),
    #[error(transparent)]
    Evidence(#[from] EvidenceError),
}

impl TurnoError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
