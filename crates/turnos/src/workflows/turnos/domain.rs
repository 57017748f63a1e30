use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::evidence::{EvidenceKind, EvidenceReference};
use super::notify::DocumentReference;

/// Store-allocated identifier of a turno.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnoId(pub u64);

impl fmt::Display for TurnoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineItemId(pub u64);

impl fmt::Display for LineItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Account identifier of the person asking for a turno.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequesterId(pub String);

/// Account identifier of a pharmacy staff member (reviewer or admin).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaffId(pub String);

/// Deterministic lookup key derived from the requester's national document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityHash(pub String);

/// Reference into the inventory catalog. Medicines and supplies keep separate id spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CatalogItemRef {
    Medicine(u64),
    Supply(u64),
}

impl fmt::Display for CatalogItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogItemRef::Medicine(id) => write!(f, "medicine#{id}"),
            CatalogItemRef::Supply(id) => write!(f, "supply#{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnoStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
    Cancelled,
}

impl TurnoStatus {
    pub const fn label(self) -> &'static str {
        match self {
            TurnoStatus::Pending => "pending",
            TurnoStatus::Approved => "approved",
            TurnoStatus::Rejected => "rejected",
            TurnoStatus::Completed => "completed",
            TurnoStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(TurnoStatus::Pending),
            "approved" => Some(TurnoStatus::Approved),
            "rejected" => Some(TurnoStatus::Rejected),
            "completed" => Some(TurnoStatus::Completed),
            "cancelled" | "canceled" => Some(TurnoStatus::Cancelled),
            _ => None,
        }
    }

    /// Statuses that occupy a monthly quota unit and a daily capacity slot.
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            TurnoStatus::Pending | TurnoStatus::Approved | TurnoStatus::Completed
        )
    }

    /// Statuses whose daily number is part of the day's `1..=k` sequence.
    pub const fn holds_daily_number(self) -> bool {
        matches!(self, TurnoStatus::Approved | TurnoStatus::Completed)
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            TurnoStatus::Rejected | TurnoStatus::Completed | TurnoStatus::Cancelled
        )
    }

    /// Transition table of the turno lifecycle. `None` means the action is not allowed.
    pub const fn apply(self, action: TurnoAction) -> Option<TurnoStatus> {
        match (self, action) {
            (TurnoStatus::Pending, TurnoAction::Approve) => Some(TurnoStatus::Approved),
            (TurnoStatus::Pending, TurnoAction::Reject) => Some(TurnoStatus::Rejected),
            (TurnoStatus::Approved, TurnoAction::Complete) => Some(TurnoStatus::Completed),
            (TurnoStatus::Approved, TurnoAction::CancelByRequester) => {
                Some(TurnoStatus::Cancelled)
            }
            (TurnoStatus::Approved, TurnoAction::Expire) => Some(TurnoStatus::Cancelled),
            (TurnoStatus::Approved, TurnoAction::Reprogram) => Some(TurnoStatus::Approved),
            _ => None,
        }
    }
}

impl fmt::Display for TurnoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle operations a turno can be subjected to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnoAction {
    Approve,
    Reject,
    Complete,
    CancelByRequester,
    Expire,
    Reprogram,
}

impl TurnoAction {
    pub const fn label(self) -> &'static str {
        match self {
            TurnoAction::Approve => "approve",
            TurnoAction::Reject => "reject",
            TurnoAction::Complete => "complete",
            TurnoAction::CancelByRequester => "cancel",
            TurnoAction::Expire => "expire",
            TurnoAction::Reprogram => "reprogram",
        }
    }
}

/// One requested catalog item. `available_at_request` is a snapshot and never re-evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnoLineItem {
    pub id: LineItemId,
    pub item: CatalogItemRef,
    pub requested_quantity: u32,
    pub approved_quantity: Option<u32>,
    pub available_at_request: bool,
}

impl TurnoLineItem {
    /// Units currently held out of stock on behalf of this line.
    pub fn reserved_quantity(&self) -> u32 {
        self.approved_quantity.unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRefs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prescription: Option<EvidenceReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_card: Option<EvidenceReference>,
}

impl EvidenceRefs {
    pub fn set(&mut self, kind: EvidenceKind, reference: EvidenceReference) {
        match kind {
            EvidenceKind::Prescription => self.prescription = Some(reference),
            EvidenceKind::IdentityCard => self.identity_card = Some(reference),
        }
    }
}

/// Appointment aggregate. Line items are owned by the turno and persisted with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turno {
    pub id: TurnoId,
    pub requester_id: RequesterId,
    pub identity_hash: IdentityHash,
    pub requested_at: NaiveDateTime,
    pub assigned_at: Option<NaiveDateTime>,
    pub status: TurnoStatus,
    pub reviewed_by: Option<StaffId>,
    pub reviewed_at: Option<NaiveDateTime>,
    pub review_comments: Option<String>,
    pub requester_notes: Option<String>,
    pub daily_number: Option<u32>,
    pub evidence: EvidenceRefs,
    pub confirmation_document: Option<DocumentReference>,
    pub notification_sent: bool,
    pub delivered_at: Option<NaiveDateTime>,
    pub cancelled_at: Option<NaiveDateTime>,
    pub line_items: Vec<TurnoLineItem>,
}

impl Turno {
    pub fn service_date(&self) -> Option<NaiveDate> {
        self.assigned_at.map(|at| at.date())
    }

    pub fn is_owned_by(&self, requester: &RequesterId) -> bool {
        &self.requester_id == requester
    }

    /// Appends an annotation to the review comments, keeping earlier remarks.
    pub fn annotate(&mut self, note: impl AsRef<str>) {
        let note = note.as_ref().trim();
        if note.is_empty() {
            return;
        }
        self.review_comments = Some(match self.review_comments.take() {
            Some(existing) if !existing.trim().is_empty() => format!("{existing}\n{note}"),
            _ => note.to_string(),
        });
    }
}

/// Requested quantity of a catalog item as submitted by the requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemRequest {
    pub item: CatalogItemRef,
    pub quantity: u32,
}

/// Uploaded file accompanying a submission, before it reaches evidence storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceUpload {
    pub kind: EvidenceKind,
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Everything the requester provides when asking for a turno.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnoSubmission {
    pub requester_id: RequesterId,
    pub identity_document: String,
    pub preferred_at: Option<NaiveDateTime>,
    pub notes: Option<String>,
    pub line_items: Vec<LineItemRequest>,
    pub evidence: Vec<EvidenceUpload>,
}

impl TurnoSubmission {
    pub fn requests_medicine(&self) -> bool {
        self.line_items
            .iter()
            .any(|line| matches!(line.item, CatalogItemRef::Medicine(_)))
    }
}
