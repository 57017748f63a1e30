use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::domain::{RequesterId, Turno, TurnoId};
use super::evidence::{EvidenceError, EvidenceStorage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Requested,
    NewRequestForStaff,
    Approved,
    Rejected,
    Completed,
    Cancelled,
    CancelledByUser,
    Reprogrammed,
}

impl NotificationKind {
    pub const fn label(self) -> &'static str {
        match self {
            NotificationKind::Requested => "requested",
            NotificationKind::NewRequestForStaff => "new_request_for_staff",
            NotificationKind::Approved => "approved",
            NotificationKind::Rejected => "rejected",
            NotificationKind::Completed => "completed",
            NotificationKind::Cancelled => "cancelled",
            NotificationKind::CancelledByUser => "cancelled_by_user",
            NotificationKind::Reprogrammed => "reprogrammed",
        }
    }
}

/// Who receives a notification. `Staff` fans out to every staff member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "audience", content = "requester_id", rename_all = "snake_case")]
pub enum NotificationTarget {
    Requester(RequesterId),
    Staff,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_at: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_assigned_at: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_daily_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motive: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub target: NotificationTarget,
    pub turno_id: TurnoId,
    pub payload: NotificationPayload,
}

impl Notification {
    /// Notification addressed to the owner of `turno`, carrying its current schedule.
    pub fn to_requester(kind: NotificationKind, turno: &Turno) -> Self {
        Self::new(
            kind,
            NotificationTarget::Requester(turno.requester_id.clone()),
            turno,
        )
    }

    pub fn to_staff(kind: NotificationKind, turno: &Turno) -> Self {
        Self::new(kind, NotificationTarget::Staff, turno)
    }

    fn new(kind: NotificationKind, target: NotificationTarget, turno: &Turno) -> Self {
        Self {
            kind,
            target,
            turno_id: turno.id,
            payload: NotificationPayload {
                daily_number: turno.daily_number,
                assigned_at: turno.assigned_at,
                ..NotificationPayload::default()
            },
        }
    }

    pub fn with_motive(mut self, motive: impl Into<String>) -> Self {
        self.payload.motive = Some(motive.into());
        self
    }

    pub fn with_comments(mut self, comments: Option<String>) -> Self {
        self.payload.comments = comments;
        self
    }

    pub fn with_previous_assignment(mut self, previous: Option<NaiveDateTime>) -> Self {
        self.payload.previous_assigned_at = previous;
        self
    }

    pub fn with_previous_number(mut self, previous: Option<u32>) -> Self {
        self.payload.previous_daily_number = previous;
        self
    }
}

/// Outbound notification hook (e-mail, SMS, in-app adapters).
pub trait NotificationDispatcher: Send + Sync {
    fn dispatch(&self, notification: Notification) -> Result<(), NotificationError>;
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Sends a notification after the triggering change committed. Failures are logged and
/// reported through the return value; they never undo the change.
pub(crate) fn dispatch_after_commit<N>(notifier: &N, notification: Notification) -> bool
where
    N: NotificationDispatcher + ?Sized,
{
    let kind = notification.kind;
    let turno_id = notification.turno_id;
    match notifier.dispatch(notification) {
        Ok(()) => true,
        Err(error) => {
            warn!(kind = kind.label(), %turno_id, %error, "notification dispatch failed");
            false
        }
    }
}

/// Dispatcher that only records notifications in the service log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotificationDispatcher;

impl NotificationDispatcher for LogNotificationDispatcher {
    fn dispatch(&self, notification: Notification) -> Result<(), NotificationError> {
        let audience = match &notification.target {
            NotificationTarget::Requester(_) => "requester",
            NotificationTarget::Staff => "staff",
        };
        info!(
            kind = notification.kind.label(),
            audience,
            turno_id = %notification.turno_id,
            "notification dispatched"
        );
        Ok(())
    }
}

/// Reference to a generated document, resolvable through evidence storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentReference(pub String);

impl fmt::Display for DocumentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Produces the confirmation document handed to the requester once a turno is approved.
pub trait DocumentGenerator: Send + Sync {
    fn generate_confirmation(&self, turno: &Turno) -> Result<DocumentReference, DocumentError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("turno {0} has no assigned slot or number yet")]
    NotScheduled(TurnoId),
    #[error(transparent)]
    Storage(#[from] EvidenceError),
}

/// Renders a plain-text confirmation and keeps it next to the uploaded evidence.
#[derive(Clone)]
pub struct TextConfirmationGenerator {
    storage: Arc<dyn EvidenceStorage>,
    pharmacy_name: String,
}

impl TextConfirmationGenerator {
    pub fn new(storage: Arc<dyn EvidenceStorage>, pharmacy_name: impl Into<String>) -> Self {
        Self {
            storage,
            pharmacy_name: pharmacy_name.into(),
        }
    }

    pub fn render(&self, turno: &Turno) -> Result<String, DocumentError> {
        let (Some(assigned_at), Some(number)) = (turno.assigned_at, turno.daily_number) else {
            return Err(DocumentError::NotScheduled(turno.id));
        };

        let mut body = format!(
            "{}\nTurno confirmation\n\nTurno: {}\nNumber: {}\nDate: {}\nTime: {}\n",
            self.pharmacy_name,
            turno.id,
            number,
            assigned_at.format("%Y-%m-%d"),
            assigned_at.format("%H:%M"),
        );
        body.push_str("\nItems:\n");
        for line in &turno.line_items {
            body.push_str(&format!(
                "  - {} x{}\n",
                line.item,
                line.approved_quantity.unwrap_or(line.requested_quantity)
            ));
        }
        if let Some(comments) = turno.review_comments.as_deref() {
            body.push_str(&format!("\nComments: {comments}\n"));
        }
        body.push_str("\nPlease bring your identity document and this confirmation.\n");
        Ok(body)
    }
}

impl DocumentGenerator for TextConfirmationGenerator {
    fn generate_confirmation(&self, turno: &Turno) -> Result<DocumentReference, DocumentError> {
        let body = self.render(turno)?;
        let name = format!("turno-{}-confirmation.txt", turno.id);
        let reference = self.storage.store(body.as_bytes(), &name)?;
        Ok(DocumentReference(reference.0))
    }
}
