use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use tracing::{debug, info, warn};

use super::calendar::BlockedDates;
use super::domain::{
    LineItemId, RequesterId, StaffId, Turno, TurnoAction, TurnoId, TurnoStatus,
};
use super::eligibility::EligibilityGuard;
use super::error::TurnoError;
use super::notify::{
    dispatch_after_commit, DocumentGenerator, DocumentReference, Notification,
    NotificationDispatcher, NotificationKind,
};
use super::policy::{SchedulingPolicy, StockPolicy};
use super::repository::{TurnoRepository, TurnoTransaction};
use super::{local_now, SharedClock, TurnoDependencies};

/// Staff decision to approve a pending turno.
///
/// Lines missing from `quantities` are approved at the requested quantity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Approval {
    pub reviewer: StaffId,
    pub quantities: BTreeMap<LineItemId, u32>,
    pub comments: Option<String>,
}

impl Approval {
    pub fn as_requested(reviewer: StaffId) -> Self {
        Self {
            reviewer,
            quantities: BTreeMap::new(),
            comments: None,
        }
    }
}

/// Turno whose daily number moved down after an earlier turno left its day.
struct Renumbered {
    turno: Turno,
    previous: u32,
}

/// Reprogrammed turno, its previous slot and the turnos renumbered on the day it left.
type Moved = (Turno, Option<NaiveDateTime>, Vec<Renumbered>);

/// Drives turnos through their lifecycle after intake.
///
/// Each transition re-reads the turno inside a transaction and checks the transition table,
/// so concurrent reviewers cannot apply two decisions to the same turno. Stock reserved on
/// approval is released again by every path that leaves `approved` without a delivery.
pub struct ReviewWorkflow<R, N> {
    repository: Arc<R>,
    notifier: Arc<N>,
    documents: Arc<dyn DocumentGenerator>,
    calendar: Arc<dyn BlockedDates>,
    clock: SharedClock,
    guard: EligibilityGuard,
    policy: SchedulingPolicy,
}

impl<R, N> ReviewWorkflow<R, N>
where
    R: TurnoRepository + 'static,
    N: NotificationDispatcher + 'static,
{
    pub fn new(dependencies: &TurnoDependencies<R, N>, policy: SchedulingPolicy) -> Self {
        Self {
            repository: Arc::clone(&dependencies.repository),
            notifier: Arc::clone(&dependencies.notifier),
            documents: Arc::clone(&dependencies.documents),
            calendar: Arc::clone(&dependencies.calendar),
            clock: Arc::clone(&dependencies.clock),
            guard: EligibilityGuard::new(policy.monthly_quota, policy.daily_capacity),
            policy,
        }
    }

    pub fn now(&self) -> NaiveDateTime {
        local_now(self.clock.as_ref())
    }

    /// Approves a pending turno: fixes quantities, reserves stock and assigns the next
    /// number of its service day. The confirmation document and the requester notification
    /// follow the commit and never roll it back.
    pub fn approve(&self, id: TurnoId, approval: Approval) -> Result<Turno, TurnoError> {
        let now = self.now();
        let stock_policy = self.policy.stock_policy;
        let Approval {
            reviewer,
            quantities,
            comments,
        } = approval;

        let turno = self
            .repository
            .transaction(|tx| -> Result<Turno, TurnoError> {
                let mut turno = load_for(tx, id, TurnoAction::Approve)?;
                let date = turno
                    .service_date()
                    .ok_or_else(|| TurnoError::validation("turno has no assigned service day"))?;

                if let Some(unknown) = quantities
                    .keys()
                    .find(|line_id| !turno.line_items.iter().any(|line| line.id == **line_id))
                {
                    return Err(TurnoError::validation(format!(
                        "line item {unknown} does not belong to turno {id}"
                    )));
                }

                for line in &mut turno.line_items {
                    let quantity = quantities
                        .get(&line.id)
                        .copied()
                        .unwrap_or(line.requested_quantity);
                    if quantity > line.requested_quantity {
                        return Err(TurnoError::validation(format!(
                            "approved quantity {quantity} for {} exceeds the requested {}",
                            line.item, line.requested_quantity
                        )));
                    }
                    if stock_policy == StockPolicy::Strict {
                        let available = tx
                            .stock(&line.item)?
                            .ok_or(TurnoError::CatalogItemNotFound(line.item))?;
                        if available < i64::from(quantity) {
                            return Err(TurnoError::InsufficientStock {
                                item: line.item,
                                available,
                                requested: quantity,
                            });
                        }
                    }
                    tx.adjust_stock(&line.item, -i64::from(quantity))?;
                    line.approved_quantity = Some(quantity);
                }

                turno.daily_number = Some(next_daily_number(tx, date)?);
                turno.status = TurnoStatus::Approved;
                turno.reviewed_by = Some(reviewer.clone());
                turno.reviewed_at = Some(now);
                turno.review_comments = comments.clone().filter(|c| !c.trim().is_empty());
                tx.update_turno(&turno)?;
                Ok(turno)
            })?;

        info!(
            turno_id = %turno.id,
            reviewer = %reviewer.0,
            daily_number = ?turno.daily_number,
            assigned_at = ?turno.assigned_at,
            "turno approved"
        );

        Ok(self.after_approval(turno))
    }

    pub fn reject(
        &self,
        id: TurnoId,
        reviewer: StaffId,
        motive: &str,
    ) -> Result<Turno, TurnoError> {
        let motive = required_motive(motive)?;
        let now = self.now();

        let turno = self
            .repository
            .transaction(|tx| -> Result<Turno, TurnoError> {
                let mut turno = load_for(tx, id, TurnoAction::Reject)?;
                turno.status = TurnoStatus::Rejected;
                turno.reviewed_by = Some(reviewer.clone());
                turno.reviewed_at = Some(now);
                turno.review_comments = Some(motive.clone());
                tx.update_turno(&turno)?;
                Ok(turno)
            })?;

        info!(turno_id = %turno.id, reviewer = %reviewer.0, "turno rejected");
        dispatch_after_commit(
            self.notifier.as_ref(),
            Notification::to_requester(NotificationKind::Rejected, &turno).with_motive(motive),
        );
        Ok(turno)
    }

    /// Records that the requester collected the items. Reserved stock stays consumed.
    pub fn complete(&self, id: TurnoId) -> Result<Turno, TurnoError> {
        let now = self.now();
        let turno = self
            .repository
            .transaction(|tx| -> Result<Turno, TurnoError> {
                let mut turno = load_for(tx, id, TurnoAction::Complete)?;
                turno.status = TurnoStatus::Completed;
                turno.delivered_at = Some(now);
                tx.update_turno(&turno)?;
                Ok(turno)
            })?;

        info!(turno_id = %turno.id, "turno completed");
        dispatch_after_commit(
            self.notifier.as_ref(),
            Notification::to_requester(NotificationKind::Completed, &turno),
        );
        Ok(turno)
    }

    /// Lets the owner cancel an approved turno while it is still more than
    /// `cancel_lead_days` away.
    pub fn cancel_by_requester(
        &self,
        id: TurnoId,
        requester: &RequesterId,
        motive: &str,
    ) -> Result<Turno, TurnoError> {
        let motive = required_motive(motive)?;
        let now = self.now();
        let lead = Duration::days(i64::from(self.policy.cancel_lead_days));

        let (turno, renumbered) = self
            .repository
            .transaction(|tx| -> Result<(Turno, Vec<Renumbered>), TurnoError> {
                let mut turno = tx.turno(id)?.ok_or(TurnoError::NotFound(id))?;
                if !turno.is_owned_by(requester) {
                    return Err(TurnoError::NotOwner { id });
                }
                ensure_transition(&turno, TurnoAction::CancelByRequester)?;

                let assigned_at = turno
                    .assigned_at
                    .ok_or_else(|| TurnoError::validation("turno has no assigned slot"))?;
                if assigned_at - now <= lead {
                    return Err(TurnoError::validation(format!(
                        "turnos can only be cancelled more than {} days in advance",
                        self.policy.cancel_lead_days
                    )));
                }

                release_stock(tx, &turno)?;
                let renumbered = vacate_daily_number(tx, &mut turno)?;
                turno.status = TurnoStatus::Cancelled;
                turno.cancelled_at = Some(now);
                turno.annotate(format!("Cancelled by requester: {motive}"));
                tx.update_turno(&turno)?;
                Ok((turno, renumbered))
            })?;

        info!(turno_id = %turno.id, requester_id = %requester.0, "turno cancelled by requester");
        dispatch_after_commit(
            self.notifier.as_ref(),
            Notification::to_requester(NotificationKind::CancelledByUser, &turno)
                .with_motive(motive.clone()),
        );
        dispatch_after_commit(
            self.notifier.as_ref(),
            Notification::to_staff(NotificationKind::CancelledByUser, &turno)
                .with_motive(motive),
        );
        self.announce_renumbering(renumbered);
        Ok(turno)
    }

    /// Moves an approved turno to another slot. The daily number is kept when the day does
    /// not change; otherwise the old day closes the gap and the turno takes the next number
    /// of the new day. Confirmations are regenerated for the moved turno and for every turno
    /// whose number shifted.
    pub fn reprogram(
        &self,
        id: TurnoId,
        admin: StaffId,
        new_at: NaiveDateTime,
        motive: Option<&str>,
    ) -> Result<Turno, TurnoError> {
        let motive = motive
            .map(str::trim)
            .filter(|motive| !motive.is_empty())
            .map(str::to_string);
        let now = self.now();
        if new_at <= now {
            return Err(TurnoError::validation("new date must be in the future"));
        }
        if self.calendar.is_blocked(new_at.date()) {
            return Err(TurnoError::validation(format!(
                "{} is not available for turnos",
                new_at.date()
            )));
        }

        let (turno, previous, renumbered) = self
            .repository
            .transaction(|tx| -> Result<Moved, TurnoError> {
                let mut turno = load_for(tx, id, TurnoAction::Reprogram)?;
                let previous = turno.assigned_at;
                let new_date = new_at.date();
                let mut renumbered = Vec::new();

                if turno.service_date() != Some(new_date) {
                    self.guard
                        .check_daily_capacity(&*tx, new_date)?
                        .into_result()?;
                    renumbered = vacate_daily_number(tx, &mut turno)?;
                    turno.daily_number = Some(next_daily_number(tx, new_date)?);
                }

                turno.assigned_at = Some(new_at);
                let mut note = format!(
                    "Reprogrammed by {} from {} to {}",
                    admin.0,
                    previous
                        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "unassigned".to_string()),
                    new_at.format("%Y-%m-%d %H:%M"),
                );
                if let Some(motive) = &motive {
                    note.push_str(": ");
                    note.push_str(motive);
                }
                turno.annotate(note);
                tx.update_turno(&turno)?;
                Ok((turno, previous, renumbered))
            })?;
        let turno = self.refresh_confirmation(turno);

        info!(
            turno_id = %turno.id,
            admin = %admin.0,
            previous = ?previous,
            assigned_at = ?turno.assigned_at,
            "turno reprogrammed"
        );
        let mut notification = Notification::to_requester(NotificationKind::Reprogrammed, &turno)
            .with_previous_assignment(previous);
        if let Some(motive) = motive {
            notification = notification.with_motive(motive);
        }
        dispatch_after_commit(self.notifier.as_ref(), notification);
        self.announce_renumbering(renumbered);
        Ok(turno)
    }

    /// Approved turnos the sweeper should look at: service days before today, plus today
    /// once `cutoff` has passed.
    pub fn due_for_expiry(
        &self,
        now: NaiveDateTime,
        cutoff: chrono::NaiveTime,
    ) -> Result<Vec<TurnoId>, TurnoError> {
        let last_due_day = if now.time() >= cutoff {
            now.date()
        } else {
            now.date().pred_opt().unwrap_or(NaiveDate::MIN)
        };
        let ids = self
            .repository
            .read(|queries| queries.approved_due_by(last_due_day))?;
        Ok(ids)
    }

    /// Cancels an approved turno nobody collected and returns its stock. The status is
    /// re-checked inside the transaction, so a turno completed in the meantime is left alone.
    pub fn expire(&self, id: TurnoId) -> Result<Turno, TurnoError> {
        let now = self.now();
        let turno = self
            .repository
            .transaction(|tx| -> Result<Turno, TurnoError> {
                let mut turno = load_for(tx, id, TurnoAction::Expire)?;
                release_stock(tx, &turno)?;
                turno.status = TurnoStatus::Cancelled;
                turno.cancelled_at = Some(now);
                turno.annotate(format!(
                    "Automatically cancelled: not collected on {}; reserved items returned to stock",
                    turno
                        .service_date()
                        .map(|date| date.to_string())
                        .unwrap_or_else(|| "the assigned day".to_string())
                ));
                tx.update_turno(&turno)?;
                Ok(turno)
            })?;

        info!(turno_id = %turno.id, assigned_at = ?turno.assigned_at, "turno expired");
        dispatch_after_commit(
            self.notifier.as_ref(),
            Notification::to_requester(NotificationKind::Cancelled, &turno),
        );
        dispatch_after_commit(
            self.notifier.as_ref(),
            Notification::to_staff(NotificationKind::Cancelled, &turno),
        );
        Ok(turno)
    }

    fn after_approval(&self, turno: Turno) -> Turno {
        let document = self.generate_confirmation(&turno);
        let notified = dispatch_after_commit(
            self.notifier.as_ref(),
            Notification::to_requester(NotificationKind::Approved, &turno)
                .with_comments(turno.review_comments.clone()),
        );
        self.record_follow_up(turno, document, notified)
    }

    /// Replaces the confirmation of a turno whose slot or number changed.
    fn refresh_confirmation(&self, turno: Turno) -> Turno {
        if turno.status != TurnoStatus::Approved {
            return turno;
        }
        let document = self.generate_confirmation(&turno);
        self.record_follow_up(turno, document, false)
    }

    /// Tells the owners of shifted turnos their new number and hands them a new confirmation.
    fn announce_renumbering(&self, renumbered: Vec<Renumbered>) {
        for Renumbered { turno, previous } in renumbered {
            if turno.status != TurnoStatus::Approved {
                continue;
            }
            let turno = self.refresh_confirmation(turno);
            info!(
                turno_id = %turno.id,
                previous_number = previous,
                daily_number = ?turno.daily_number,
                "turno renumbered"
            );
            dispatch_after_commit(
                self.notifier.as_ref(),
                Notification::to_requester(NotificationKind::Reprogrammed, &turno)
                    .with_previous_assignment(turno.assigned_at)
                    .with_previous_number(Some(previous)),
            );
        }
    }

    fn generate_confirmation(&self, turno: &Turno) -> Option<DocumentReference> {
        match self.documents.generate_confirmation(turno) {
            Ok(reference) => Some(reference),
            Err(error) => {
                warn!(turno_id = %turno.id, %error, "confirmation document generation failed");
                None
            }
        }
    }

    /// Writes the side-channel outcomes back in a follow-up transaction. A failure here is
    /// logged and leaves the committed transition as it is.
    fn record_follow_up(
        &self,
        mut turno: Turno,
        document: Option<DocumentReference>,
        notified: bool,
    ) -> Turno {
        if document.is_none() && !notified {
            return turno;
        }

        let id = turno.id;
        let recorded = self
            .repository
            .transaction(|tx| -> Result<Option<Turno>, TurnoError> {
                let Some(mut stored) = tx.turno(id)? else {
                    return Ok(None);
                };
                if document.is_some() {
                    stored.confirmation_document = document.clone();
                }
                if notified {
                    stored.notification_sent = true;
                }
                tx.update_turno(&stored)?;
                Ok(Some(stored))
            });

        match recorded {
            Ok(Some(stored)) => turno = stored,
            Ok(None) => debug!(turno_id = %id, "turno vanished before follow-up"),
            Err(error) => {
                warn!(turno_id = %id, %error, "failed to record turno follow-up");
            }
        }
        turno
    }
}

fn load_for(
    tx: &mut dyn TurnoTransaction,
    id: TurnoId,
    action: TurnoAction,
) -> Result<Turno, TurnoError> {
    let turno = tx.turno(id)?.ok_or(TurnoError::NotFound(id))?;
    ensure_transition(&turno, action)?;
    Ok(turno)
}

fn ensure_transition(turno: &Turno, action: TurnoAction) -> Result<TurnoStatus, TurnoError> {
    turno
        .status
        .apply(action)
        .ok_or(TurnoError::InvalidStateTransition {
            id: turno.id,
            status: turno.status,
            action,
        })
}

fn next_daily_number(tx: &mut dyn TurnoTransaction, date: NaiveDate) -> Result<u32, TurnoError> {
    Ok(tx.max_daily_number(date)?.map_or(1, |max| max + 1))
}

/// Takes the turno's number off its service day and shifts every later number of that day
/// down by one, keeping the day's sequence at `1..=k`. Returns the shifted turnos.
fn vacate_daily_number(
    tx: &mut dyn TurnoTransaction,
    turno: &mut Turno,
) -> Result<Vec<Renumbered>, TurnoError> {
    let (Some(date), Some(vacated)) = (turno.service_date(), turno.daily_number.take()) else {
        return Ok(Vec::new());
    };
    let mut renumbered = Vec::new();
    for mut other in tx.on_date(date)? {
        if other.id == turno.id {
            continue;
        }
        let Some(previous) = other.daily_number.filter(|number| *number > vacated) else {
            continue;
        };
        other.daily_number = Some(previous - 1);
        tx.update_turno(&other)?;
        debug!(turno_id = %other.id, %date, number = previous - 1, "daily number shifted");
        renumbered.push(Renumbered {
            turno: other,
            previous,
        });
    }
    Ok(renumbered)
}

fn release_stock(tx: &mut dyn TurnoTransaction, turno: &Turno) -> Result<(), TurnoError> {
    for line in &turno.line_items {
        let reserved = line.reserved_quantity();
        if reserved > 0 {
            tx.adjust_stock(&line.item, i64::from(reserved))?;
        }
    }
    Ok(())
}

fn required_motive(raw: &str) -> Result<String, TurnoError> {
    let motive = raw.trim();
    if motive.is_empty() {
        return Err(TurnoError::validation("a motive is required"));
    }
    Ok(motive.to_string())
}
