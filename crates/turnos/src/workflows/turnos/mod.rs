//! Turno (appointment) coordination for the dispensary counter.
//!
//! Requesters ask for a turno with the medicines or supplies they need; staff approve or
//! reject it; approved turnos reserve stock, receive a per-day number and are either
//! collected, cancelled by the requester, reprogrammed or expired by the sweeper.
//! Every state change runs inside a single repository transaction.

pub mod allocator;
pub mod calendar;
pub mod domain;
pub mod eligibility;
pub mod error;
pub mod evidence;
pub mod intake;
pub mod memory;
pub mod notify;
pub mod policy;
pub mod repository;
pub mod review;
pub mod router;
pub mod service;
pub mod sweeper;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use chrono::NaiveDateTime;
use mockable::Clock;

use crate::identity::IdentityHasher;

pub use allocator::SlotAllocator;
pub use calendar::{BlockedDateCalendar, BlockedDates, ServiceWindow};
pub use domain::{
    CatalogItemRef, EvidenceRefs, EvidenceUpload, IdentityHash, LineItemId, LineItemRequest,
    RequesterId, StaffId, Turno, TurnoAction, TurnoId, TurnoLineItem, TurnoStatus,
    TurnoSubmission,
};
pub use eligibility::{CapacityCheck, EligibilityGuard, QuotaCheck};
pub use error::TurnoError;
pub use evidence::{
    EvidenceError, EvidenceKind, EvidenceReference, EvidenceStorage, FileEvidenceStorage,
    MemoryEvidenceStorage,
};
pub use intake::RequestIntake;
pub use memory::MemoryTurnoStore;
pub use notify::{
    DocumentError, DocumentGenerator, DocumentReference, LogNotificationDispatcher, Notification,
    NotificationDispatcher, NotificationError, NotificationKind, NotificationPayload,
    NotificationTarget, TextConfirmationGenerator,
};
pub use policy::{SchedulingPolicy, StockPolicy, SweepPolicy};
pub use repository::{
    InventoryStore, RepositoryError, TurnoQueries, TurnoRepository, TurnoTransaction,
};
pub use review::{Approval, ReviewWorkflow};
pub use router::turno_router;
pub use service::TurnoService;
pub use sweeper::{run_sweeper, ExpirySweeper, SweepReport};

pub type SharedClock = Arc<dyn Clock + Send + Sync>;

/// Adapters shared by the intake and review workflows.
pub struct TurnoDependencies<R, N> {
    pub repository: Arc<R>,
    pub notifier: Arc<N>,
    pub evidence: Arc<dyn EvidenceStorage>,
    pub documents: Arc<dyn DocumentGenerator>,
    pub calendar: Arc<dyn BlockedDates>,
    pub clock: SharedClock,
    pub hasher: IdentityHasher,
}

impl<R, N> Clone for TurnoDependencies<R, N> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            notifier: Arc::clone(&self.notifier),
            evidence: Arc::clone(&self.evidence),
            documents: Arc::clone(&self.documents),
            calendar: Arc::clone(&self.calendar),
            clock: Arc::clone(&self.clock),
            hasher: self.hasher.clone(),
        }
    }
}

/// Wall-clock time at the pharmacy.
pub(crate) fn local_now(clock: &dyn Clock) -> NaiveDateTime {
    clock.local().naive_local()
}
