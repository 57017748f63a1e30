use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};

use super::allocator::SlotAllocator;
use super::domain::{RequesterId, StaffId, Turno, TurnoId, TurnoStatus, TurnoSubmission};
use super::eligibility::{CapacityCheck, EligibilityGuard, QuotaCheck};
use super::error::TurnoError;
use super::intake::RequestIntake;
use super::notify::NotificationDispatcher;
use super::policy::{SchedulingPolicy, SweepPolicy};
use super::repository::TurnoRepository;
use super::review::{Approval, ReviewWorkflow};
use super::sweeper::ExpirySweeper;
use super::TurnoDependencies;
use crate::identity::IdentityHasher;

/// Facade composing intake, review and the read-side queries used by the HTTP layer.
pub struct TurnoService<R, N> {
    repository: Arc<R>,
    intake: RequestIntake<R, N>,
    review: Arc<ReviewWorkflow<R, N>>,
    guard: EligibilityGuard,
    allocator: SlotAllocator,
    hasher: IdentityHasher,
}

impl<R, N> TurnoService<R, N>
where
    R: TurnoRepository + 'static,
    N: NotificationDispatcher + 'static,
{
    pub fn new(dependencies: TurnoDependencies<R, N>, policy: SchedulingPolicy) -> Self {
        let guard = EligibilityGuard::new(policy.monthly_quota, policy.daily_capacity);
        let allocator = SlotAllocator::new(
            policy.window.clone(),
            policy.daily_capacity,
            policy.booking_horizon_days,
            Arc::clone(&dependencies.calendar),
        );
        let intake = RequestIntake::new(&dependencies, policy.clone());
        let review = Arc::new(ReviewWorkflow::new(&dependencies, policy));

        Self {
            repository: dependencies.repository,
            intake,
            review,
            guard,
            allocator,
            hasher: dependencies.hasher,
        }
    }

    pub fn review(&self) -> Arc<ReviewWorkflow<R, N>> {
        Arc::clone(&self.review)
    }

    pub fn sweeper(&self, policy: SweepPolicy) -> ExpirySweeper<R, N> {
        ExpirySweeper::new(self.review(), policy)
    }

    pub fn submit(&self, submission: TurnoSubmission) -> Result<Turno, TurnoError> {
        self.intake.submit(submission)
    }

    pub fn approve(&self, id: TurnoId, approval: Approval) -> Result<Turno, TurnoError> {
        self.review.approve(id, approval)
    }

    pub fn reject(&self, id: TurnoId, reviewer: StaffId, motive: &str) -> Result<Turno, TurnoError> {
        self.review.reject(id, reviewer, motive)
    }

    pub fn complete(&self, id: TurnoId) -> Result<Turno, TurnoError> {
        self.review.complete(id)
    }

    pub fn cancel(
        &self,
        id: TurnoId,
        requester: &RequesterId,
        motive: &str,
    ) -> Result<Turno, TurnoError> {
        self.review.cancel_by_requester(id, requester, motive)
    }

    pub fn reprogram(
        &self,
        id: TurnoId,
        admin: StaffId,
        new_at: NaiveDateTime,
        motive: Option<&str>,
    ) -> Result<Turno, TurnoError> {
        self.review.reprogram(id, admin, new_at, motive)
    }

    pub fn get(&self, id: TurnoId) -> Result<Turno, TurnoError> {
        self.repository
            .read(|queries| queries.turno(id))?
            .ok_or(TurnoError::NotFound(id))
    }

    pub fn with_status(&self, status: TurnoStatus) -> Result<Vec<Turno>, TurnoError> {
        Ok(self.repository.read(|queries| queries.with_status(status))?)
    }

    /// Turnos of a service day in counter order.
    pub fn on_date(&self, date: NaiveDate) -> Result<Vec<Turno>, TurnoError> {
        Ok(self.repository.read(|queries| queries.on_date(date))?)
    }

    /// Finds turnos by the requester's identity document, as typed at the counter.
    pub fn find_by_document(&self, raw_document: &str) -> Result<Vec<Turno>, TurnoError> {
        let identity = self
            .hasher
            .hash(raw_document)
            .map_err(|error| TurnoError::validation(error.to_string()))?;
        Ok(self
            .repository
            .read(|queries| queries.with_identity(&identity))?)
    }

    pub fn quota(&self, requester: &RequesterId) -> Result<QuotaCheck, TurnoError> {
        let now = self.review.now();
        Ok(self
            .repository
            .read(|queries| self.guard.check_monthly_quota(queries, requester, now))?)
    }

    pub fn capacity(&self, date: NaiveDate) -> Result<CapacityCheck, TurnoError> {
        Ok(self
            .repository
            .read(|queries| self.guard.check_daily_capacity(queries, date))?)
    }

    pub fn next_slot(&self) -> Result<NaiveDateTime, TurnoError> {
        let now = self.review.now();
        self.repository
            .read(|queries| self.allocator.next_available_slot(queries, now))
    }
}
