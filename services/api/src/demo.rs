use crate::infra::total_units;
use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use clap::Args;
use mockable::Clock;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use turnos::error::AppError;
use turnos::identity::IdentityHasher;
use turnos::workflows::inventory::{InventoryImporter, StockEntry};
use turnos::workflows::turnos::{
    Approval, BlockedDateCalendar, CatalogItemRef, EvidenceKind, EvidenceStorage, EvidenceUpload,
    LineItemRequest, MemoryEvidenceStorage, MemoryTurnoStore, Notification,
    NotificationDispatcher, NotificationError, NotificationTarget, RequesterId,
    SchedulingPolicy, ServiceWindow, StaffId, SweepPolicy, TextConfirmationGenerator, Turno,
    TurnoDependencies, TurnoError, TurnoRepository, TurnoService, TurnoSubmission,
    TurnoTransaction,
};

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Day the walkthrough starts on (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) today: Option<NaiveDate>,
    /// Optional inventory CSV export used instead of the sample catalog.
    #[arg(long)]
    pub(crate) inventory_csv: Option<PathBuf>,
    /// Print the confirmation document of every approved turno.
    #[arg(long)]
    pub(crate) show_documents: bool,
}

#[derive(Args, Debug)]
pub(crate) struct InventoryCheckArgs {
    /// Inventory CSV export (`kind,id,name,stock`)
    pub(crate) path: PathBuf,
}

pub(crate) fn run_inventory_check(args: InventoryCheckArgs) -> Result<(), AppError> {
    let entries = InventoryImporter::from_path(&args.path)?;

    println!("Inventory {}", args.path.display());
    render_stock(&entries, |entry| entry.stock);

    let empty: Vec<_> = entries.iter().filter(|entry| entry.stock <= 0).collect();
    println!(
        "{} items | {} units | {} without stock",
        entries.len(),
        total_units(&entries),
        empty.len()
    );
    for entry in empty {
        println!("  ! {} ({}) has {} units", entry.item, entry.name, entry.stock);
    }
    Ok(())
}

/// Clock the walkthrough moves forward by hand.
struct DemoClock(Mutex<NaiveDateTime>);

impl DemoClock {
    fn set(&self, now: NaiveDateTime) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }
}

impl Clock for DemoClock {
    fn local(&self) -> DateTime<Local> {
        let now = *self.0.lock().unwrap_or_else(PoisonError::into_inner);
        Local
            .from_local_datetime(&now)
            .earliest()
            .unwrap_or_else(Local::now)
    }

    fn utc(&self) -> DateTime<Utc> {
        self.local().with_timezone(&Utc)
    }
}

/// Prints every notification instead of delivering it.
struct PrintNotifier;

impl NotificationDispatcher for PrintNotifier {
    fn dispatch(&self, notification: Notification) -> Result<(), NotificationError> {
        let audience = match &notification.target {
            NotificationTarget::Requester(requester) => requester.0.clone(),
            NotificationTarget::Staff => "staff".to_string(),
        };
        let mut line = format!(
            "    notify {} -> {} (turno #{})",
            notification.kind.label(),
            audience,
            notification.turno_id
        );
        if let Some(motive) = notification.payload.motive.as_deref() {
            line.push_str(&format!(" motive: {motive}"));
        }
        println!("{line}");
        Ok(())
    }
}

fn sample_inventory() -> Vec<StockEntry> {
    vec![
        StockEntry {
            item: CatalogItemRef::Medicine(1),
            name: "Enalapril 10mg".to_string(),
            stock: 10,
        },
        StockEntry {
            item: CatalogItemRef::Medicine(2),
            name: "Metformina 850mg".to_string(),
            stock: 0,
        },
        StockEntry {
            item: CatalogItemRef::Supply(1),
            name: "Gasas esteriles".to_string(),
            stock: 5,
        },
    ]
}

fn medicine_request(requester: &str, document: &str, entries: &[StockEntry]) -> TurnoSubmission {
    let line_items = entries
        .iter()
        .filter(|entry| matches!(entry.item, CatalogItemRef::Medicine(_)))
        .take(2)
        .map(|entry| LineItemRequest {
            item: entry.item,
            quantity: 2,
        })
        .collect();

    TurnoSubmission {
        requester_id: RequesterId(requester.to_string()),
        identity_document: document.to_string(),
        preferred_at: None,
        notes: Some("Retira un familiar".to_string()),
        line_items,
        evidence: vec![EvidenceUpload {
            kind: EvidenceKind::Prescription,
            file_name: format!("receta-{requester}.pdf"),
            content_type: Some("application/pdf".to_string()),
            bytes: b"%PDF-1.4\n%demo prescription\n".to_vec(),
        }],
    }
}

fn supply_request(requester: &str, document: &str, entries: &[StockEntry]) -> TurnoSubmission {
    let line_items = entries
        .iter()
        .find(|entry| matches!(entry.item, CatalogItemRef::Supply(_)))
        .map(|entry| LineItemRequest {
            item: entry.item,
            quantity: 1,
        })
        .into_iter()
        .collect();

    TurnoSubmission {
        requester_id: RequesterId(requester.to_string()),
        identity_document: document.to_string(),
        preferred_at: None,
        notes: None,
        line_items,
        evidence: Vec::new(),
    }
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        today,
        inventory_csv,
        show_documents,
    } = args;

    let today = today.unwrap_or_else(|| Local::now().date_naive());
    let morning = today.and_time(NaiveTime::from_hms_opt(10, 0, 0).unwrap_or(NaiveTime::MIN));
    let entries = match inventory_csv {
        Some(path) => InventoryImporter::from_path(path)?,
        None => sample_inventory(),
    };

    let store = Arc::new(MemoryTurnoStore::new());
    store.load_inventory(&entries)?;
    let evidence: Arc<dyn EvidenceStorage> = Arc::new(MemoryEvidenceStorage::default());
    let documents = Arc::new(TextConfirmationGenerator::new(
        Arc::clone(&evidence),
        "Farmacia Solidaria",
    ));
    let clock = Arc::new(DemoClock(Mutex::new(morning)));
    let policy = SchedulingPolicy::default();
    let window = policy.window.clone();

    let service = TurnoService::new(
        TurnoDependencies {
            repository: Arc::clone(&store),
            notifier: Arc::new(PrintNotifier),
            evidence,
            documents: documents.clone(),
            calendar: Arc::new(BlockedDateCalendar::default()),
            clock: clock.clone(),
            hasher: IdentityHasher::new("demo-pepper"),
        },
        policy,
    );

    println!("Turno walkthrough starting {}", morning.format("%Y-%m-%d %H:%M"));
    println!("\nStarting stock");
    render_stock(&entries, |entry| entry.stock);

    println!("\n1. Requests");
    let ana = service.submit(medicine_request("ana", "12.345.678-5", &entries))?;
    render_turno(&ana);
    let bruno = service.submit(supply_request("bruno", "9.876.543-2", &entries))?;
    render_turno(&bruno);
    let carla = service.submit(supply_request("carla", "11.222.333-4", &entries))?;
    render_turno(&carla);
    service.submit(supply_request("ana", "12.345.678-5", &entries))?;
    let quota = service.quota(&ana.requester_id)?;
    println!(
        "  ana has used {} of {} turnos in {}",
        quota.count, quota.limit, quota.month
    );
    report_refusal(
        "third request from ana",
        service.submit(supply_request("ana", "12.345.678-5", &entries)),
    );

    println!("\n2. Review");
    let staff = StaffId("farmaceutica".to_string());
    let ana = service.approve(ana.id, Approval::as_requested(staff.clone()))?;
    render_turno(&ana);
    let bruno = service.approve(bruno.id, Approval::as_requested(staff.clone()))?;
    render_turno(&bruno);
    let carla = service.reject(carla.id, staff.clone(), "Insumo entregado la semana pasada")?;
    render_turno(&carla);
    if show_documents {
        for turno in [&ana, &bruno] {
            match documents.render(turno) {
                Ok(text) => println!("\n{text}"),
                Err(error) => println!("  confirmation unavailable: {error}"),
            }
        }
    }

    println!("\n3. Changes");
    report_refusal(
        "ana cancels inside the lead time",
        service.cancel(ana.id, &ana.requester_id, "No puedo asistir"),
    );
    if let Some(new_at) = bruno
        .service_date()
        .and_then(|date| next_service_day(&window, date))
        .and_then(|date| window.slot_at(date, 5))
    {
        let bruno = service.reprogram(bruno.id, staff, new_at, Some("Feriado local"))?;
        render_turno(&bruno);
    }

    println!("\n4. Expiry");
    if let Some(day) = ana.service_date() {
        let after_cutoff = day.and_time(SweepPolicy::default().cutoff) + Duration::minutes(30);
        clock.set(after_cutoff);
        let report = service.sweeper(SweepPolicy::default()).sweep_once();
        println!(
            "  sweep at {}: {} examined | {} expired | {} failures",
            after_cutoff.format("%Y-%m-%d %H:%M"),
            report.examined,
            report.expired.len(),
            report.failures.len()
        );
        render_turno(&service.get(ana.id)?);
    }

    println!("\nClosing stock");
    let closing = store.transaction(|tx: &mut dyn TurnoTransaction| {
        entries
            .iter()
            .map(|entry| Ok((entry.item, tx.stock(&entry.item)?.unwrap_or(0))))
            .collect::<Result<Vec<_>, TurnoError>>()
    })?;
    render_stock(&entries, |entry| {
        closing
            .iter()
            .find(|(item, _)| *item == entry.item)
            .map(|(_, stock)| *stock)
            .unwrap_or(entry.stock)
    });

    Ok(())
}

fn next_service_day(
    window: &ServiceWindow,
    after: NaiveDate,
) -> Option<NaiveDate> {
    (1..=14)
        .filter_map(|offset| after.checked_add_signed(Duration::days(offset)))
        .find(|date| window.is_service_day(*date))
}

fn report_refusal(label: &str, outcome: Result<Turno, TurnoError>) {
    match outcome {
        Ok(turno) => println!("  {label}: unexpectedly accepted as turno #{}", turno.id),
        Err(error) => println!("  {label}: refused ({error})"),
    }
}

fn render_turno(turno: &Turno) {
    let slot = turno
        .assigned_at
        .map(|at| at.format("%a %Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "unscheduled".to_string());
    let number = turno
        .daily_number
        .map(|number| format!(" | number {number}"))
        .unwrap_or_default();
    println!(
        "  turno #{} {} [{}] {}{}",
        turno.id, turno.requester_id.0, turno.status, slot, number
    );
}

fn render_stock<F>(entries: &[StockEntry], stock: F)
where
    F: Fn(&StockEntry) -> i64,
{
    for entry in entries {
        println!("  - {:<12} {:<24} {:>5}", entry.item.to_string(), entry.name, stock(entry));
    }
}
