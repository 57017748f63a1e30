use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use mockable::Clock;
use serde_json::Value;

use crate::identity::IdentityHasher;
use crate::workflows::turnos::{
    BlockedDateCalendar, CatalogItemRef, DocumentError, DocumentGenerator, DocumentReference,
    EvidenceKind, EvidenceStorage, EvidenceUpload, LineItemRequest, MemoryEvidenceStorage,
    MemoryTurnoStore, Notification, NotificationDispatcher, NotificationError, NotificationKind,
    RepositoryError, RequesterId, SchedulingPolicy, TextConfirmationGenerator, Turno,
    TurnoDependencies, TurnoQueries, TurnoRepository, TurnoService, TurnoSubmission,
    TurnoTransaction,
};

pub(super) const MEDICINE_X: CatalogItemRef = CatalogItemRef::Medicine(1);
pub(super) const MEDICINE_Y: CatalogItemRef = CatalogItemRef::Medicine(2);
pub(super) const GAUZE: CatalogItemRef = CatalogItemRef::Supply(1);

pub(super) const DOCUMENT: &str = "12.345.678-5";

pub(super) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

pub(super) fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    date(year, month, day)
        .and_hms_opt(hour, minute, 0)
        .expect("valid time")
}

/// Monday, two days before the first Thursday service of the fixture.
pub(super) fn fixture_now() -> NaiveDateTime {
    at(2026, 10, 19, 10, 0)
}

/// Clock pinned to a local wall-clock time that tests can move.
pub(super) struct FixtureClock {
    now: Mutex<NaiveDateTime>,
}

impl FixtureClock {
    pub(super) fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub(super) fn set(&self, now: NaiveDateTime) {
        *self.now.lock().expect("clock mutex poisoned") = now;
    }

    pub(super) fn advance(&self, by: Duration) {
        *self.now.lock().expect("clock mutex poisoned") += by;
    }
}

impl Clock for FixtureClock {
    fn local(&self) -> DateTime<Local> {
        let now = *self.now.lock().expect("clock mutex poisoned");
        Local
            .from_local_datetime(&now)
            .earliest()
            .expect("fixture time exists in the local zone")
    }

    fn utc(&self) -> DateTime<Utc> {
        self.local().with_timezone(&Utc)
    }
}

#[derive(Default)]
pub(super) struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: Mutex<bool>,
}

impl RecordingNotifier {
    pub(super) fn sent(&self) -> Vec<Notification> {
        self.sent.lock().expect("notifier mutex poisoned").clone()
    }

    pub(super) fn of_kind(&self, kind: NotificationKind) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|notification| notification.kind == kind)
            .collect()
    }

    pub(super) fn clear(&self) {
        self.sent.lock().expect("notifier mutex poisoned").clear();
    }

    pub(super) fn fail_from_now_on(&self) {
        *self.failing.lock().expect("notifier mutex poisoned") = true;
    }
}

impl NotificationDispatcher for RecordingNotifier {
    fn dispatch(&self, notification: Notification) -> Result<(), NotificationError> {
        if *self.failing.lock().expect("notifier mutex poisoned") {
            return Err(NotificationError::Transport("smtp relay down".to_string()));
        }
        self.sent
            .lock()
            .expect("notifier mutex poisoned")
            .push(notification);
        Ok(())
    }
}

pub(super) struct BrokenDocuments;

impl DocumentGenerator for BrokenDocuments {
    fn generate_confirmation(&self, _turno: &Turno) -> Result<DocumentReference, DocumentError> {
        Err(DocumentError::Storage(
            crate::workflows::turnos::EvidenceError::InvalidReference("disk full".to_string()),
        ))
    }
}

pub(super) type Service = TurnoService<MemoryTurnoStore, RecordingNotifier>;

pub(super) struct Fixture {
    pub(super) service: Arc<Service>,
    pub(super) store: Arc<MemoryTurnoStore>,
    pub(super) notifier: Arc<RecordingNotifier>,
    pub(super) evidence: Arc<MemoryEvidenceStorage>,
    pub(super) documents: Arc<MemoryEvidenceStorage>,
    pub(super) clock: Arc<FixtureClock>,
    pub(super) calendar: Arc<BlockedDateCalendar>,
}

pub(super) fn fixture() -> Fixture {
    fixture_with(SchedulingPolicy::default())
}

pub(super) fn fixture_with(policy: SchedulingPolicy) -> Fixture {
    build_fixture(policy, None)
}

pub(super) fn fixture_with_documents(generator: Arc<dyn DocumentGenerator>) -> Fixture {
    build_fixture(SchedulingPolicy::default(), Some(generator))
}

fn build_fixture(
    policy: SchedulingPolicy,
    generator: Option<Arc<dyn DocumentGenerator>>,
) -> Fixture {
    let store = Arc::new(MemoryTurnoStore::with_stock([
        (MEDICINE_X, 10),
        (MEDICINE_Y, 0),
        (GAUZE, 5),
    ]));
    let notifier = Arc::new(RecordingNotifier::default());
    let evidence = Arc::new(MemoryEvidenceStorage::default());
    let documents = Arc::new(MemoryEvidenceStorage::default());
    let clock = Arc::new(FixtureClock::new(fixture_now()));
    let calendar = Arc::new(BlockedDateCalendar::default());

    let generator: Arc<dyn DocumentGenerator> = match generator {
        Some(generator) => generator,
        None => {
            let storage: Arc<dyn EvidenceStorage> = documents.clone();
            Arc::new(TextConfirmationGenerator::new(storage, "Farmacia Solidaria"))
        }
    };

    let dependencies = TurnoDependencies {
        repository: store.clone(),
        notifier: notifier.clone(),
        evidence: evidence.clone(),
        documents: generator,
        calendar: calendar.clone(),
        clock: clock.clone(),
        hasher: IdentityHasher::new("test-pepper"),
    };

    Fixture {
        service: Arc::new(TurnoService::new(dependencies, policy)),
        store,
        notifier,
        evidence,
        documents,
        clock,
        calendar,
    }
}

impl Fixture {
    pub(super) fn stock(&self, item: CatalogItemRef) -> i64 {
        self.store
            .transaction(|tx| -> Result<Option<i64>, RepositoryError> { tx.stock(&item) })
            .expect("stock readable")
            .expect("item in catalog")
    }
}

pub(super) struct UnavailableRepository;

impl TurnoRepository for UnavailableRepository {
    fn read<T, E, F>(&self, _query: F) -> Result<T, E>
    where
        F: FnOnce(&dyn TurnoQueries) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        Err(RepositoryError::Unavailable("database offline".to_string()).into())
    }

    fn transaction<T, E, F>(&self, _work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn TurnoTransaction) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        Err(RepositoryError::Unavailable("database offline".to_string()).into())
    }
}

pub(super) fn unavailable_service() -> Arc<TurnoService<UnavailableRepository, RecordingNotifier>> {
    let documents: Arc<dyn EvidenceStorage> = Arc::new(MemoryEvidenceStorage::default());
    let dependencies = TurnoDependencies {
        repository: Arc::new(UnavailableRepository),
        notifier: Arc::new(RecordingNotifier::default()),
        evidence: Arc::new(MemoryEvidenceStorage::default()),
        documents: Arc::new(TextConfirmationGenerator::new(documents, "Farmacia Solidaria")),
        calendar: Arc::new(BlockedDateCalendar::default()),
        clock: Arc::new(FixtureClock::new(fixture_now())),
        hasher: IdentityHasher::new("test-pepper"),
    };
    Arc::new(TurnoService::new(dependencies, SchedulingPolicy::default()))
}

pub(super) fn requester(name: &str) -> RequesterId {
    RequesterId(name.to_string())
}

pub(super) fn prescription() -> EvidenceUpload {
    EvidenceUpload {
        kind: EvidenceKind::Prescription,
        file_name: "receta.pdf".to_string(),
        content_type: Some("application/pdf".to_string()),
        bytes: b"%PDF-1.4\n1 0 obj\n<<>>\nendobj\n".to_vec(),
    }
}

/// Medicine X (qty 5, in stock) and medicine Y (qty 3, out of stock) with a prescription.
pub(super) fn medicine_submission(requester_id: &str) -> TurnoSubmission {
    TurnoSubmission {
        requester_id: requester(requester_id),
        identity_document: DOCUMENT.to_string(),
        preferred_at: None,
        notes: Some("  afternoon please ".to_string()),
        line_items: vec![
            LineItemRequest {
                item: MEDICINE_X,
                quantity: 5,
            },
            LineItemRequest {
                item: MEDICINE_Y,
                quantity: 3,
            },
        ],
        evidence: vec![prescription()],
    }
}

pub(super) fn supply_submission(requester_id: &str) -> TurnoSubmission {
    TurnoSubmission {
        requester_id: requester(requester_id),
        identity_document: format!("{requester_id}-doc"),
        preferred_at: None,
        notes: None,
        line_items: vec![LineItemRequest {
            item: GAUZE,
            quantity: 2,
        }],
        evidence: Vec::new(),
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
