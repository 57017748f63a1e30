use std::collections::BTreeMap;
use std::sync::Arc;

use super::common::*;

use crate::workflows::turnos::{
    Approval, EvidenceReference, EvidenceStorage, NotificationKind, NotificationTarget,
    SchedulingPolicy, StaffId, StockPolicy, SweepPolicy, Turno, TurnoAction, TurnoError,
    TurnoStatus,
};

fn reviewer() -> StaffId {
    StaffId("staff-1".to_string())
}

fn approve(fixture: &Fixture, turno: &Turno) -> Turno {
    fixture
        .service
        .approve(turno.id, Approval::as_requested(reviewer()))
        .expect("approved")
}

fn submit_at(fixture: &Fixture, name: &str, preferred: chrono::NaiveDateTime) -> Turno {
    let mut submission = supply_submission(name);
    submission.preferred_at = Some(preferred);
    fixture.service.submit(submission).expect("turno")
}

fn confirmation_text(fixture: &Fixture, turno: &Turno) -> String {
    let document = turno
        .confirmation_document
        .clone()
        .expect("confirmation generated");
    let body = fixture
        .documents
        .retrieve(&EvidenceReference(document.0))
        .expect("document stored");
    String::from_utf8(body).expect("text document")
}

fn numbers_on(fixture: &Fixture, day: chrono::NaiveDate) -> Vec<(String, Option<u32>)> {
    fixture
        .service
        .on_date(day)
        .expect("day listing")
        .into_iter()
        .filter(|turno| turno.status.holds_daily_number())
        .map(|turno| (turno.requester_id.0, turno.daily_number))
        .collect()
}

#[test]
fn approval_reserves_stock_and_numbers_the_turno() {
    let fixture = fixture();
    let turno = fixture
        .service
        .submit(medicine_submission("ana"))
        .expect("turno");
    fixture.notifier.clear();

    let approved = approve(&fixture, &turno);

    assert_eq!(approved.status, TurnoStatus::Approved);
    assert_eq!(approved.daily_number, Some(1));
    assert_eq!(approved.reviewed_by, Some(reviewer()));
    assert_eq!(approved.reviewed_at, Some(fixture_now()));
    assert!(approved
        .line_items
        .iter()
        .all(|line| line.approved_quantity == Some(line.requested_quantity)));
    assert_eq!(fixture.stock(MEDICINE_X), 5);
    assert_eq!(fixture.stock(MEDICINE_Y), -3);

    assert!(approved.notification_sent);
    let document = approved
        .confirmation_document
        .clone()
        .expect("confirmation generated");
    let body = fixture
        .documents
        .retrieve(&EvidenceReference(document.0))
        .expect("document stored");
    let body = String::from_utf8(body).expect("text document");
    assert!(body.contains("Number: 1"));
    assert!(body.contains("Date: 2026-10-20"));

    let sent = fixture.notifier.of_kind(NotificationKind::Approved);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].target, NotificationTarget::Requester(requester("ana")));
    assert_eq!(sent[0].payload.daily_number, Some(1));
    assert_eq!(sent[0].payload.assigned_at, Some(at(2026, 10, 20, 13, 0)));

    assert_eq!(fixture.service.get(turno.id).expect("stored"), approved);
}

#[test]
fn approval_accepts_reduced_quantities() {
    let fixture = fixture();
    let turno = fixture
        .service
        .submit(medicine_submission("ana"))
        .expect("turno");

    let quantities = BTreeMap::from([
        (turno.line_items[0].id, 3),
        (turno.line_items[1].id, 0),
    ]);
    let approved = fixture
        .service
        .approve(
            turno.id,
            Approval {
                reviewer: reviewer(),
                quantities,
                comments: Some("only partial stock".to_string()),
            },
        )
        .expect("approved");

    assert_eq!(approved.line_items[0].approved_quantity, Some(3));
    assert_eq!(approved.line_items[1].approved_quantity, Some(0));
    assert_eq!(approved.review_comments.as_deref(), Some("only partial stock"));
    assert_eq!(fixture.stock(MEDICINE_X), 7);
    assert_eq!(fixture.stock(MEDICINE_Y), 0);

    let sent = fixture.notifier.of_kind(NotificationKind::Approved);
    assert_eq!(
        sent[0].payload.comments.as_deref(),
        Some("only partial stock")
    );
}

#[test]
fn approval_refuses_quantities_it_cannot_apply() {
    let fixture = fixture();
    let turno = fixture
        .service
        .submit(medicine_submission("ana"))
        .expect("turno");

    let too_many = Approval {
        reviewer: reviewer(),
        quantities: BTreeMap::from([(turno.line_items[0].id, 6)]),
        comments: None,
    };
    let unknown_line = Approval {
        reviewer: reviewer(),
        quantities: BTreeMap::from([(crate::workflows::turnos::LineItemId(999), 1)]),
        comments: None,
    };

    for approval in [too_many, unknown_line] {
        let error = fixture
            .service
            .approve(turno.id, approval)
            .expect_err("refused");
        assert!(matches!(error, TurnoError::Validation(_)), "{error:?}");
    }

    assert_eq!(fixture.service.get(turno.id).expect("stored"), turno);
    assert_eq!(fixture.stock(MEDICINE_X), 10);
}

#[test]
fn strict_stock_policy_blocks_approval_beyond_stock() {
    let fixture = fixture_with(SchedulingPolicy {
        stock_policy: StockPolicy::Strict,
        ..SchedulingPolicy::default()
    });
    let turno = fixture
        .service
        .submit(medicine_submission("ana"))
        .expect("turno");

    let error = fixture
        .service
        .approve(turno.id, Approval::as_requested(reviewer()))
        .expect_err("medicine Y is out of stock");
    match error {
        TurnoError::InsufficientStock {
            item,
            available,
            requested,
        } => {
            assert_eq!(item, MEDICINE_Y);
            assert_eq!(available, 0);
            assert_eq!(requested, 3);
        }
        other => panic!("expected stock error, got {other:?}"),
    }
    assert_eq!(fixture.stock(MEDICINE_X), 10);
    assert_eq!(
        fixture.service.get(turno.id).expect("stored").status,
        TurnoStatus::Pending
    );

    let approved = fixture
        .service
        .approve(
            turno.id,
            Approval {
                reviewer: reviewer(),
                quantities: BTreeMap::from([(turno.line_items[1].id, 0)]),
                comments: None,
            },
        )
        .expect("approved without medicine Y");
    assert_eq!(approved.status, TurnoStatus::Approved);
    assert_eq!(fixture.stock(MEDICINE_X), 5);
}

#[test]
fn rejection_keeps_stock_and_reports_the_motive() {
    let fixture = fixture();
    let turno = fixture
        .service
        .submit(medicine_submission("ana"))
        .expect("turno");

    let rejected = fixture
        .service
        .reject(turno.id, reviewer(), "out of stock")
        .expect("rejected");

    assert_eq!(rejected.status, TurnoStatus::Rejected);
    assert_eq!(rejected.review_comments.as_deref(), Some("out of stock"));
    assert_eq!(rejected.reviewed_at, Some(fixture_now()));
    assert_eq!(fixture.stock(MEDICINE_X), 10);
    assert_eq!(fixture.stock(MEDICINE_Y), 0);

    let sent = fixture.notifier.of_kind(NotificationKind::Rejected);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].payload.motive.as_deref(), Some("out of stock"));
}

#[test]
fn rejection_requires_a_motive() {
    let fixture = fixture();
    let turno = fixture
        .service
        .submit(supply_submission("ana"))
        .expect("turno");

    let error = fixture
        .service
        .reject(turno.id, reviewer(), "   ")
        .expect_err("motive missing");

    assert!(matches!(error, TurnoError::Validation(_)));
    assert_eq!(
        fixture.service.get(turno.id).expect("stored").status,
        TurnoStatus::Pending
    );
}

#[test]
fn completion_consumes_the_reserved_stock() {
    let fixture = fixture();
    let turno = fixture
        .service
        .submit(supply_submission("ana"))
        .expect("turno");
    approve(&fixture, &turno);
    fixture.clock.set(at(2026, 10, 20, 13, 4));

    let completed = fixture.service.complete(turno.id).expect("completed");

    assert_eq!(completed.status, TurnoStatus::Completed);
    assert_eq!(completed.delivered_at, Some(at(2026, 10, 20, 13, 4)));
    assert_eq!(completed.daily_number, Some(1));
    assert_eq!(fixture.stock(GAUZE), 3);
    assert_eq!(
        fixture.notifier.of_kind(NotificationKind::Completed).len(),
        1
    );
}

#[test]
fn disallowed_transitions_leave_the_turno_untouched() {
    let fixture = fixture();
    let pending = fixture
        .service
        .submit(supply_submission("ana"))
        .expect("turno");

    let attempts = [
        (TurnoAction::Complete, fixture.service.complete(pending.id)),
        (
            TurnoAction::CancelByRequester,
            fixture
                .service
                .cancel(pending.id, &requester("ana"), "changed my mind"),
        ),
        (
            TurnoAction::Reprogram,
            fixture.service.reprogram(
                pending.id,
                reviewer(),
                at(2026, 10, 22, 14, 0),
                Some("staff meeting"),
            ),
        ),
    ];
    for (expected_action, outcome) in attempts {
        match outcome {
            Err(TurnoError::InvalidStateTransition { status, action, .. }) => {
                assert_eq!(status, TurnoStatus::Pending);
                assert_eq!(action, expected_action);
            }
            other => panic!("expected transition error, got {other:?}"),
        }
    }
    assert_eq!(fixture.service.get(pending.id).expect("stored"), pending);

    let completed = {
        approve(&fixture, &pending);
        fixture.service.complete(pending.id).expect("completed")
    };
    for outcome in [
        fixture
            .service
            .approve(pending.id, Approval::as_requested(reviewer())),
        fixture.service.reject(pending.id, reviewer(), "too late"),
        fixture.service.complete(pending.id),
    ] {
        assert!(
            matches!(outcome, Err(TurnoError::InvalidStateTransition { .. })),
            "{outcome:?}"
        );
    }
    assert_eq!(fixture.service.get(pending.id).expect("stored"), completed);
    assert_eq!(fixture.stock(GAUZE), 3);
}

#[test]
fn unknown_turnos_are_reported() {
    let fixture = fixture();
    let missing = crate::workflows::turnos::TurnoId(404);

    assert!(matches!(
        fixture.service.get(missing),
        Err(TurnoError::NotFound(_))
    ));
    assert!(matches!(
        fixture
            .service
            .approve(missing, Approval::as_requested(reviewer())),
        Err(TurnoError::NotFound(_))
    ));
}

#[test]
fn requester_cancellation_returns_stock_once() {
    let fixture = fixture();
    let mut submission = medicine_submission("ana");
    submission.preferred_at = Some(at(2026, 11, 3, 13, 0));
    let turno = fixture.service.submit(submission).expect("turno");
    approve(&fixture, &turno);
    assert_eq!(fixture.stock(MEDICINE_X), 5);
    fixture.notifier.clear();

    let cancelled = fixture
        .service
        .cancel(turno.id, &requester("ana"), "travelling")
        .expect("cancelled");

    assert_eq!(cancelled.status, TurnoStatus::Cancelled);
    assert_eq!(cancelled.cancelled_at, Some(fixture_now()));
    assert_eq!(cancelled.daily_number, None);
    assert!(cancelled
        .review_comments
        .as_deref()
        .is_some_and(|comments| comments.contains("travelling")));
    assert_eq!(fixture.stock(MEDICINE_X), 10);
    assert_eq!(fixture.stock(MEDICINE_Y), 0);

    let targets: Vec<_> = fixture
        .notifier
        .of_kind(NotificationKind::CancelledByUser)
        .into_iter()
        .map(|notification| notification.target)
        .collect();
    assert_eq!(
        targets,
        vec![
            NotificationTarget::Requester(requester("ana")),
            NotificationTarget::Staff
        ]
    );

    let again = fixture
        .service
        .cancel(turno.id, &requester("ana"), "travelling");
    assert!(matches!(
        again,
        Err(TurnoError::InvalidStateTransition { .. })
    ));
    assert_eq!(fixture.stock(MEDICINE_X), 10);
}

#[test]
fn cancellation_is_limited_to_the_owner_and_the_lead_time() {
    let fixture = fixture();
    let soon = fixture
        .service
        .submit(supply_submission("ana"))
        .expect("turno");
    approve(&fixture, &soon);

    let error = fixture
        .service
        .cancel(soon.id, &requester("ana"), "busy")
        .expect_err("too close to the service day");
    assert!(matches!(error, TurnoError::Validation(_)));

    let later = submit_at(&fixture, "bruno", at(2026, 10, 27, 13, 0));
    approve(&fixture, &later);

    let error = fixture
        .service
        .cancel(later.id, &requester("ana"), "not mine")
        .expect_err("owner only");
    assert!(matches!(error, TurnoError::NotOwner { .. }));

    let error = fixture
        .service
        .cancel(later.id, &requester("bruno"), "  ")
        .expect_err("motive required");
    assert!(matches!(error, TurnoError::Validation(_)));

    fixture
        .service
        .cancel(later.id, &requester("bruno"), "feeling better")
        .expect("eight days ahead");
    assert_eq!(fixture.stock(GAUZE), 3);
}

#[test]
fn concurrent_approvals_number_the_day_without_gaps() {
    let fixture = fixture();
    let turnos: Vec<Turno> = ["ana", "bruno", "carla", "dario", "elena", "fede"]
        .into_iter()
        .map(|name| {
            fixture
                .service
                .submit(supply_submission(name))
                .expect("turno")
        })
        .collect();
    let service = &fixture.service;

    let mut numbers: Vec<u32> = std::thread::scope(|scope| {
        let handles: Vec<_> = turnos
            .iter()
            .map(|turno| {
                scope.spawn(move || {
                    service
                        .approve(turno.id, Approval::as_requested(reviewer()))
                        .expect("approved")
                        .daily_number
                        .expect("numbered")
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("approval thread"))
            .collect()
    });
    numbers.sort_unstable();

    assert_eq!(numbers, (1..=6).collect::<Vec<u32>>());
}

#[test]
fn cancellation_closes_the_gap_in_the_day_sequence() {
    let fixture = fixture();
    let day = chrono::NaiveDate::from_ymd_opt(2026, 11, 3).expect("valid date");
    let ana = submit_at(&fixture, "ana", at(2026, 11, 3, 13, 0));
    let bruno = submit_at(&fixture, "bruno", at(2026, 11, 3, 13, 6));
    let carla = submit_at(&fixture, "carla", at(2026, 11, 3, 13, 12));
    for turno in [&ana, &bruno, &carla] {
        approve(&fixture, turno);
    }

    fixture
        .service
        .cancel(bruno.id, &requester("bruno"), "travelling")
        .expect("cancelled");

    assert_eq!(
        numbers_on(&fixture, day),
        vec![("ana".to_string(), Some(1)), ("carla".to_string(), Some(2))]
    );

    let dario = submit_at(&fixture, "dario", at(2026, 11, 3, 13, 18));
    assert_eq!(approve(&fixture, &dario).daily_number, Some(3));
}

#[test]
fn cancellation_tells_the_shifted_turnos_their_new_number() {
    let fixture = fixture();
    let ana = approve(&fixture, &submit_at(&fixture, "ana", at(2026, 11, 3, 13, 0)));
    let bruno = approve(&fixture, &submit_at(&fixture, "bruno", at(2026, 11, 3, 13, 6)));
    assert!(confirmation_text(&fixture, &bruno).contains("Number: 2"));
    fixture.notifier.clear();

    fixture
        .service
        .cancel(ana.id, &requester("ana"), "travelling")
        .expect("cancelled");

    let sent = fixture.notifier.of_kind(NotificationKind::Reprogrammed);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].turno_id, bruno.id);
    assert_eq!(sent[0].target, NotificationTarget::Requester(requester("bruno")));
    assert_eq!(sent[0].payload.daily_number, Some(1));
    assert_eq!(sent[0].payload.previous_daily_number, Some(2));
    assert_eq!(sent[0].payload.assigned_at, Some(at(2026, 11, 3, 13, 6)));

    let stored = fixture.service.get(bruno.id).expect("stored");
    assert_eq!(stored.daily_number, Some(1));
    assert_ne!(stored.confirmation_document, bruno.confirmation_document);
    let body = confirmation_text(&fixture, &stored);
    assert!(body.contains("Number: 1"));
    assert!(!body.contains("Number: 2"));
}

#[test]
fn expired_turnos_keep_their_number_out_of_reuse() {
    let fixture = fixture();
    let ana = submit_at(&fixture, "ana", at(2026, 10, 20, 13, 0));
    let bruno = submit_at(&fixture, "bruno", at(2026, 10, 20, 13, 6));
    let carla = submit_at(&fixture, "carla", at(2026, 10, 20, 13, 12));
    approve(&fixture, &ana);
    assert_eq!(approve(&fixture, &bruno).daily_number, Some(2));

    fixture.clock.set(at(2026, 10, 20, 13, 10));
    fixture.service.complete(ana.id).expect("completed");
    fixture.clock.set(at(2026, 10, 20, 18, 30));
    let report = fixture.service.sweeper(SweepPolicy::default()).sweep_once();
    assert_eq!(report.expired, vec![bruno.id]);

    let expired = fixture.service.get(bruno.id).expect("stored");
    assert_eq!(expired.status, TurnoStatus::Cancelled);
    assert_eq!(expired.daily_number, Some(2));

    let late = approve(&fixture, &carla);
    assert_eq!(late.daily_number, Some(3));
}

#[test]
fn reprogramming_moves_the_turno_and_keeps_both_days_contiguous() {
    let fixture = fixture();
    let turnos: Vec<Turno> = ["ana", "bruno", "carla"]
        .into_iter()
        .map(|name| {
            let turno = fixture
                .service
                .submit(supply_submission(name))
                .expect("turno");
            approve(&fixture, &turno)
        })
        .collect();
    let thursday = submit_at(&fixture, "dario", at(2026, 10, 22, 13, 0));
    approve(&fixture, &thursday);
    fixture.notifier.clear();

    let moved = fixture
        .service
        .reprogram(
            turnos[1].id,
            StaffId("admin-1".to_string()),
            at(2026, 10, 22, 14, 0),
            Some("pharmacist on leave"),
        )
        .expect("reprogrammed");

    assert_eq!(moved.status, TurnoStatus::Approved);
    assert_eq!(moved.assigned_at, Some(at(2026, 10, 22, 14, 0)));
    assert_eq!(moved.daily_number, Some(2));
    assert_eq!(
        numbers_on(&fixture, date(2026, 10, 20)),
        vec![("ana".to_string(), Some(1)), ("carla".to_string(), Some(2))]
    );
    assert_eq!(
        numbers_on(&fixture, date(2026, 10, 22)),
        vec![("dario".to_string(), Some(1)), ("bruno".to_string(), Some(2))]
    );

    let sent = fixture.notifier.of_kind(NotificationKind::Reprogrammed);
    assert_eq!(sent.len(), 2);
    let (moved_notice, shifted_notice): (Vec<_>, Vec<_>) = sent
        .into_iter()
        .partition(|notification| notification.turno_id == turnos[1].id);
    assert_eq!(
        moved_notice[0].payload.previous_assigned_at,
        Some(at(2026, 10, 20, 13, 6))
    );
    assert_eq!(moved_notice[0].payload.assigned_at, Some(at(2026, 10, 22, 14, 0)));
    assert_eq!(
        moved_notice[0].payload.motive.as_deref(),
        Some("pharmacist on leave")
    );
    assert_eq!(shifted_notice[0].turno_id, turnos[2].id);
    assert_eq!(shifted_notice[0].payload.daily_number, Some(2));
    assert_eq!(shifted_notice[0].payload.previous_daily_number, Some(3));
    assert!(confirmation_text(&fixture, &moved).contains("Date: 2026-10-22"));
    assert_eq!(fixture.stock(GAUZE), -3);
}

#[test]
fn reprogramming_within_the_day_keeps_the_number() {
    let fixture = fixture();
    let turno = fixture
        .service
        .submit(supply_submission("ana"))
        .expect("turno");
    approve(&fixture, &turno);

    let moved = fixture
        .service
        .reprogram(
            turno.id,
            StaffId("admin-1".to_string()),
            at(2026, 10, 20, 15, 30),
            None,
        )
        .expect("reprogrammed");

    assert_eq!(moved.daily_number, Some(1));
    assert_eq!(moved.assigned_at, Some(at(2026, 10, 20, 15, 30)));
    let sent = fixture.notifier.of_kind(NotificationKind::Reprogrammed);
    assert_eq!(sent[0].payload.motive, None);
}

#[test]
fn reprogramming_refuses_past_blocked_or_full_days() {
    let fixture = fixture_with(SchedulingPolicy {
        daily_capacity: 1,
        ..SchedulingPolicy::default()
    });
    let tuesday = fixture
        .service
        .submit(supply_submission("ana"))
        .expect("turno");
    let thursday = fixture
        .service
        .submit(supply_submission("bruno"))
        .expect("turno");
    approve(&fixture, &tuesday);
    approve(&fixture, &thursday);
    fixture.calendar.block(date(2026, 10, 27));
    let admin = StaffId("admin-1".to_string());

    let past = fixture
        .service
        .reprogram(tuesday.id, admin.clone(), at(2026, 10, 19, 9, 0), None);
    assert!(matches!(past, Err(TurnoError::Validation(_))));

    let blocked = fixture
        .service
        .reprogram(tuesday.id, admin.clone(), at(2026, 10, 27, 13, 0), None);
    assert!(matches!(blocked, Err(TurnoError::Validation(_))));

    let full = fixture
        .service
        .reprogram(tuesday.id, admin, at(2026, 10, 22, 15, 0), None);
    assert!(matches!(full, Err(TurnoError::CapacityExceeded { .. })));

    assert_eq!(
        fixture.service.get(tuesday.id).expect("stored").assigned_at,
        Some(at(2026, 10, 20, 13, 0))
    );
}

#[test]
fn failed_notification_does_not_undo_the_approval() {
    let fixture = fixture();
    let turno = fixture
        .service
        .submit(supply_submission("ana"))
        .expect("turno");
    fixture.notifier.fail_from_now_on();

    let approved = approve(&fixture, &turno);

    assert_eq!(approved.status, TurnoStatus::Approved);
    assert!(!approved.notification_sent);
    assert!(approved.confirmation_document.is_some());
    assert_eq!(fixture.stock(GAUZE), 3);
    assert_eq!(fixture.service.get(turno.id).expect("stored"), approved);
}

#[test]
fn failed_document_generation_does_not_undo_the_approval() {
    let fixture = fixture_with_documents(Arc::new(BrokenDocuments));
    let turno = fixture
        .service
        .submit(supply_submission("ana"))
        .expect("turno");

    let approved = approve(&fixture, &turno);

    assert_eq!(approved.status, TurnoStatus::Approved);
    assert_eq!(approved.confirmation_document, None);
    assert!(approved.notification_sent);
    assert_eq!(fixture.notifier.of_kind(NotificationKind::Approved).len(), 1);
}
