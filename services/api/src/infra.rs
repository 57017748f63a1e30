use chrono::NaiveDate;
use metrics_exporter_prometheus::PrometheusHandle;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use turnos::config::AppConfig;
use turnos::error::AppError;
use turnos::identity::IdentityHasher;
use turnos::workflows::inventory::{InventoryImporter, StockEntry};
use turnos::workflows::turnos::{
    BlockedDateCalendar, EvidenceStorage, FileEvidenceStorage, LogNotificationDispatcher,
    MemoryTurnoStore, SharedClock, TextConfirmationGenerator, TurnoDependencies, TurnoService,
};

pub(crate) type PharmacyService = TurnoService<MemoryTurnoStore, LogNotificationDispatcher>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Creates the store, seeding stock from the CSV export when one is given.
pub(crate) fn load_store(inventory_csv: Option<&Path>) -> Result<MemoryTurnoStore, AppError> {
    let store = MemoryTurnoStore::new();
    if let Some(path) = inventory_csv {
        let entries = InventoryImporter::from_path(path)?;
        store.load_inventory(&entries)?;
        tracing::info!(items = entries.len(), path = %path.display(), "inventory loaded");
    }
    Ok(store)
}

/// Wires the configured adapters around `store`.
pub(crate) fn build_service(
    config: &AppConfig,
    store: MemoryTurnoStore,
    clock: SharedClock,
) -> PharmacyService {
    let evidence: Arc<dyn EvidenceStorage> =
        Arc::new(FileEvidenceStorage::new(config.storage.evidence_dir.clone()));
    let documents = TextConfirmationGenerator::new(Arc::clone(&evidence), &config.pharmacy_name);

    let dependencies = TurnoDependencies {
        repository: Arc::new(store),
        notifier: Arc::new(LogNotificationDispatcher),
        evidence,
        documents: Arc::new(documents),
        calendar: Arc::new(BlockedDateCalendar::new(config.blocked_dates.iter().copied())),
        clock,
        hasher: IdentityHasher::new(config.identity_pepper.clone()),
    };

    TurnoService::new(dependencies, config.scheduling.clone())
}

pub(crate) fn total_units(entries: &[StockEntry]) -> i64 {
    entries.iter().map(|entry| entry.stock).sum()
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}
