use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use tracing::{info, warn};

use super::allocator::SlotAllocator;
use super::calendar::BlockedDates;
use super::domain::{
    EvidenceRefs, IdentityHash, Turno, TurnoLineItem, TurnoStatus, TurnoSubmission,
};
use super::eligibility::EligibilityGuard;
use super::error::TurnoError;
use super::evidence::{validate_upload, EvidenceKind, EvidenceReference, EvidenceStorage};
use super::notify::{dispatch_after_commit, Notification, NotificationDispatcher, NotificationKind};
use super::policy::SchedulingPolicy;
use super::repository::TurnoRepository;
use super::{local_now, SharedClock, TurnoDependencies};
use crate::identity::IdentityHasher;

/// Validates a submission and records it as a pending turno.
pub struct RequestIntake<R, N> {
    repository: Arc<R>,
    notifier: Arc<N>,
    evidence: Arc<dyn EvidenceStorage>,
    calendar: Arc<dyn BlockedDates>,
    clock: SharedClock,
    hasher: IdentityHasher,
    guard: EligibilityGuard,
    allocator: SlotAllocator,
    policy: SchedulingPolicy,
}

impl<R, N> RequestIntake<R, N>
where
    R: TurnoRepository + 'static,
    N: NotificationDispatcher + 'static,
{
    pub fn new(dependencies: &TurnoDependencies<R, N>, policy: SchedulingPolicy) -> Self {
        let guard = EligibilityGuard::new(policy.monthly_quota, policy.daily_capacity);
        let allocator = SlotAllocator::new(
            policy.window.clone(),
            policy.daily_capacity,
            policy.booking_horizon_days,
            Arc::clone(&dependencies.calendar),
        );

        Self {
            repository: Arc::clone(&dependencies.repository),
            notifier: Arc::clone(&dependencies.notifier),
            evidence: Arc::clone(&dependencies.evidence),
            calendar: Arc::clone(&dependencies.calendar),
            clock: Arc::clone(&dependencies.clock),
            hasher: dependencies.hasher.clone(),
            guard,
            allocator,
            policy,
        }
    }

    /// Creates a pending turno.
    ///
    /// Quota, slot choice, capacity, evidence and the stock snapshot are all decided inside
    /// one transaction, so two concurrent submissions can never both take the last quota
    /// unit or the last slot of a day. Files stored before a failure are deleted again.
    pub fn submit(&self, submission: TurnoSubmission) -> Result<Turno, TurnoError> {
        validate_submission(&submission)?;
        let identity_hash = self
            .hasher
            .hash(&submission.identity_document)
            .map_err(|error| TurnoError::validation(error.to_string()))?;
        let now = local_now(self.clock.as_ref());
        let mut stored: Vec<EvidenceReference> = Vec::new();

        let outcome = self
            .repository
            .transaction(|tx| -> Result<Turno, TurnoError> {
                self.guard
                    .check_monthly_quota(&*tx, &submission.requester_id, now)?
                    .into_result()?;

                let assigned_at = match submission.preferred_at {
                    Some(at) => {
                        self.check_requested_slot(at, now)?;
                        at
                    }
                    None => self.allocator.next_available_slot(&*tx, now)?,
                };
                self.guard
                    .check_daily_capacity(&*tx, assigned_at.date())?
                    .into_result()?;

                let evidence = self.store_evidence(&submission, &identity_hash, now, &mut stored)?;

                let mut line_items = Vec::with_capacity(submission.line_items.len());
                for request in &submission.line_items {
                    let stock = tx
                        .stock(&request.item)?
                        .ok_or(TurnoError::CatalogItemNotFound(request.item))?;
                    line_items.push(TurnoLineItem {
                        id: tx.next_line_item_id(),
                        item: request.item,
                        requested_quantity: request.quantity,
                        approved_quantity: None,
                        available_at_request: stock >= i64::from(request.quantity),
                    });
                }

                let turno = Turno {
                    id: tx.next_turno_id(),
                    requester_id: submission.requester_id.clone(),
                    identity_hash: identity_hash.clone(),
                    requested_at: now,
                    assigned_at: Some(assigned_at),
                    status: TurnoStatus::Pending,
                    reviewed_by: None,
                    reviewed_at: None,
                    review_comments: None,
                    requester_notes: submission
                        .notes
                        .as_deref()
                        .map(str::trim)
                        .filter(|notes| !notes.is_empty())
                        .map(str::to_string),
                    daily_number: None,
                    evidence,
                    confirmation_document: None,
                    notification_sent: false,
                    delivered_at: None,
                    cancelled_at: None,
                    line_items,
                };
                tx.insert_turno(turno.clone())?;
                Ok(turno)
            });

        let turno = match outcome {
            Ok(turno) => turno,
            Err(error) => {
                self.discard_evidence(&stored);
                info!(requester_id = %submission.requester_id.0, %error, "turno request refused");
                return Err(error);
            }
        };

        info!(
            turno_id = %turno.id,
            requester_id = %turno.requester_id.0,
            assigned_at = ?turno.assigned_at,
            lines = turno.line_items.len(),
            "turno requested"
        );
        dispatch_after_commit(
            self.notifier.as_ref(),
            Notification::to_requester(NotificationKind::Requested, &turno),
        );
        dispatch_after_commit(
            self.notifier.as_ref(),
            Notification::to_staff(NotificationKind::NewRequestForStaff, &turno),
        );
        Ok(turno)
    }

    /// A requester-chosen time must fall on a future, open service day within the horizon.
    fn check_requested_slot(&self, at: NaiveDateTime, now: NaiveDateTime) -> Result<(), TurnoError> {
        let today = now.date();
        if at.date() <= today {
            return Err(TurnoError::validation(
                "preferred date must be after today",
            ));
        }
        if at.date() > today + Duration::days(i64::from(self.policy.booking_horizon_days)) {
            return Err(TurnoError::validation(format!(
                "preferred date must be within {} days",
                self.policy.booking_horizon_days
            )));
        }
        if !self.policy.window.contains(at) {
            return Err(TurnoError::validation(
                "preferred time is outside the service days and hours",
            ));
        }
        if self.calendar.is_blocked(at.date()) {
            return Err(TurnoError::validation(format!(
                "{} is not available for turnos",
                at.date()
            )));
        }
        Ok(())
    }

    fn store_evidence(
        &self,
        submission: &TurnoSubmission,
        identity_hash: &IdentityHash,
        now: NaiveDateTime,
        stored: &mut Vec<EvidenceReference>,
    ) -> Result<EvidenceRefs, TurnoError> {
        let mut refs = EvidenceRefs::default();
        let prefix: String = identity_hash.0.chars().take(12).collect();
        for upload in &submission.evidence {
            let name = format!(
                "{prefix}-{}-{}-{}",
                upload.kind.label(),
                now.format("%Y%m%d%H%M%S"),
                upload.file_name
            );
            let reference = self.evidence.store(&upload.bytes, &name)?;
            stored.push(reference.clone());
            refs.set(upload.kind, reference);
        }
        Ok(refs)
    }

    fn discard_evidence(&self, stored: &[EvidenceReference]) {
        for reference in stored {
            if let Err(error) = self.evidence.delete(reference) {
                warn!(%reference, %error, "failed to remove evidence of refused request");
            }
        }
    }
}

fn validate_submission(submission: &TurnoSubmission) -> Result<(), TurnoError> {
    if submission.requester_id.0.trim().is_empty() {
        return Err(TurnoError::validation("requester id is required"));
    }
    if submission.line_items.is_empty() {
        return Err(TurnoError::validation(
            "at least one medicine or supply must be requested",
        ));
    }

    let mut seen = HashSet::new();
    for line in &submission.line_items {
        if line.quantity == 0 {
            return Err(TurnoError::validation(format!(
                "quantity for {} must be at least 1",
                line.item
            )));
        }
        if !seen.insert(line.item) {
            return Err(TurnoError::validation(format!(
                "{} is requested more than once",
                line.item
            )));
        }
    }

    let mut kinds = HashSet::new();
    for upload in &submission.evidence {
        if !kinds.insert(upload.kind) {
            return Err(TurnoError::validation(format!(
                "only one {} file may be attached",
                upload.kind.label()
            )));
        }
        validate_upload(
            &upload.file_name,
            upload.content_type.as_deref(),
            &upload.bytes,
        )
        .map_err(TurnoError::Validation)?;
    }

    if submission.requests_medicine() && !kinds.contains(&EvidenceKind::Prescription) {
        return Err(TurnoError::validation(
            "a prescription is required when requesting medicines",
        ));
    }

    Ok(())
}
