use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use chairbook::error::EngineError;
use chairbook::notices::{scan_and_send_notices, LogMessenger, Messenger};
use chairbook::reservations::{
    self, create_hold, expire_stale_holds, reschedule, set_admin_status, HoldRequest,
};
use chairbook::settings::{BusinessSettings, WorkingHours};
use chairbook::settlement::{apply_settlement, SettlementEvent, SettlementOutcome};

const SERVICE_ID: &str = "svc-signature-cut";

async fn test_pool() -> SqlitePool {
    // One connection: every test sees a single in-memory database and
    // writers serialize exactly as they would against a shared store.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("connect in-memory sqlite");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("run migrations");
    seed_service(&pool, SERVICE_ID, 60, false).await;
    pool
}

async fn seed_service(pool: &SqlitePool, id: &str, duration_minutes: i64, direct_only: bool) {
    sqlx::query(
        r#"INSERT INTO services
             (id, name, duration_minutes, price_display, price_cents, direct_booking_only,
              note, deposit_cents, active, created_at)
           VALUES (?, 'Signature Cut', ?, '$40', 4000, ?, NULL, 2000, 1, '2099-01-01T00:00:00Z')"#,
    )
    .bind(id)
    .bind(duration_minutes)
    .bind(direct_only as i64)
    .execute(pool)
    .await
    .expect("seed service");
}

fn settings() -> BusinessSettings {
    BusinessSettings {
        working_hours: WorkingHours::from_json(
            r#"{"Monday":[{"start":"09:00","end":"18:00"}]}"#,
        )
        .unwrap(),
        ..BusinessSettings::default()
    }
}

fn messenger() -> LogMessenger {
    LogMessenger { demo: false }
}

fn at(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
}

fn hold_request(start_time_local: &str) -> HoldRequest {
    HoldRequest {
        service_id: SERVICE_ID.to_string(),
        start_time_local: start_time_local.to_string(),
        full_name: "Jordan Avery".to_string(),
        phone_e164: "+12025550123".to_string(),
        sms_opt_in: true,
    }
}

async fn count(pool: &SqlitePool, sql: &str) -> i64 {
    sqlx::query_scalar::<_, i64>(sql)
        .fetch_one(pool)
        .await
        .expect("count query")
}

async fn appointment_status(pool: &SqlitePool, id: &str) -> String {
    sqlx::query_scalar::<_, String>("SELECT status FROM appointments WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await
        .expect("appointment status")
}

async fn settle(pool: &SqlitePool, appointment_id: &str, session_id: &str) {
    let outcome = apply_settlement(
        pool,
        &settings(),
        &messenger(),
        &SettlementEvent {
            session_id: session_id.to_string(),
            appointment_id: appointment_id.to_string(),
            amount_cents: 2000,
            currency: "usd".to_string(),
        },
    )
    .await
    .expect("settlement");
    assert_eq!(outcome, SettlementOutcome::Confirmed);
}

// 2099-01-05 is a Monday; 10:00 America/New_York is 15:00Z.
const NOW: &str = "2099-01-01T12:00:00Z";
const MONDAY_TEN_LOCAL: &str = "2099-01-05T10:00";

#[tokio::test]
async fn overlapping_hold_is_rejected() {
    let pool = test_pool().await;
    let now = at(NOW);

    create_hold(&pool, &settings(), &hold_request(MONDAY_TEN_LOCAL), now)
        .await
        .expect("first hold");

    // Same slot.
    let same = create_hold(&pool, &settings(), &hold_request(MONDAY_TEN_LOCAL), now).await;
    assert!(matches!(same, Err(EngineError::Conflict)));

    // Partial overlap with the 60-minute service.
    let overlap = create_hold(&pool, &settings(), &hold_request("2099-01-05T10:30"), now).await;
    assert!(matches!(overlap, Err(EngineError::Conflict)));

    // Adjacent slot is fine with zero buffer.
    create_hold(&pool, &settings(), &hold_request("2099-01-05T11:00"), now)
        .await
        .expect("adjacent hold");
}

#[tokio::test]
async fn buffer_extends_the_conflict_window() {
    let pool = test_pool().await;
    let now = at(NOW);
    let buffered = BusinessSettings {
        buffer_minutes: 15,
        ..settings()
    };

    create_hold(&pool, &buffered, &hold_request(MONDAY_TEN_LOCAL), now)
        .await
        .expect("first hold");

    // 11:00 start collides with the 10:00-11:00 cut plus its 15-minute buffer.
    let adjacent = create_hold(&pool, &buffered, &hold_request("2099-01-05T11:00"), now).await;
    assert!(matches!(adjacent, Err(EngineError::Conflict)));

    create_hold(&pool, &buffered, &hold_request("2099-01-05T11:15"), now)
        .await
        .expect("hold past the buffer");
}

#[tokio::test]
async fn concurrent_holds_yield_one_winner() {
    let pool = test_pool().await;
    let now = at(NOW);

    let first = {
        let pool = pool.clone();
        tokio::spawn(async move {
            create_hold(&pool, &settings(), &hold_request(MONDAY_TEN_LOCAL), now).await
        })
    };
    let second = {
        let pool = pool.clone();
        tokio::spawn(async move {
            create_hold(&pool, &settings(), &hold_request(MONDAY_TEN_LOCAL), now).await
        })
    };

    let (first, second) = (first.await.unwrap(), second.await.unwrap());
    let successes = [&first, &second].iter().filter(|r| r.is_ok()).count();
    let conflicts = [&first, &second]
        .iter()
        .filter(|r| matches!(r, Err(EngineError::Conflict)))
        .count();
    assert_eq!(successes, 1);
    assert_eq!(conflicts, 1);
}

#[tokio::test]
async fn time_blocks_occupy_the_chair() {
    let pool = test_pool().await;
    let now = at(NOW);

    sqlx::query(
        r#"INSERT INTO time_blocks (id, start_time_utc, end_time_utc, note, created_at)
           VALUES ('blk-lunch', '2099-01-05T15:00:00Z', '2099-01-05T16:00:00Z', 'lunch', ?)"#,
    )
    .bind(NOW)
    .execute(&pool)
    .await
    .unwrap();

    let blocked = create_hold(&pool, &settings(), &hold_request(MONDAY_TEN_LOCAL), now).await;
    assert!(matches!(blocked, Err(EngineError::Conflict)));

    create_hold(&pool, &settings(), &hold_request("2099-01-05T11:00"), now)
        .await
        .expect("hold after the block");
}

#[tokio::test]
async fn direct_booking_services_cannot_hold() {
    let pool = test_pool().await;
    seed_service(&pool, "svc-house-call", 90, true).await;

    let mut request = hold_request(MONDAY_TEN_LOCAL);
    request.service_id = "svc-house-call".to_string();
    let result = create_hold(&pool, &settings(), &request, at(NOW)).await;
    assert!(matches!(result, Err(EngineError::Invalid(_))));
}

#[tokio::test]
async fn past_start_is_invalid() {
    let pool = test_pool().await;
    // Local 10:00 on the Monday is 15:00Z; "now" is already past it.
    let now = at("2099-01-05T16:00:00Z");
    let result = create_hold(&pool, &settings(), &hold_request(MONDAY_TEN_LOCAL), now).await;
    assert!(matches!(result, Err(EngineError::Invalid(_))));
}

#[tokio::test]
async fn expired_holds_are_reclaimed_idempotently() {
    let pool = test_pool().await;
    let now = at(NOW);

    let receipt = create_hold(&pool, &settings(), &hold_request(MONDAY_TEN_LOCAL), now)
        .await
        .expect("hold");

    let later = now + Duration::minutes(11);
    assert_eq!(expire_stale_holds(&pool, later).await.unwrap(), 1);
    assert_eq!(expire_stale_holds(&pool, later).await.unwrap(), 0);
    assert_eq!(appointment_status(&pool, &receipt.appointment_id).await, "expired");

    // The slot is free again.
    create_hold(&pool, &settings(), &hold_request(MONDAY_TEN_LOCAL), later)
        .await
        .expect("rebook after expiry");
}

#[tokio::test]
async fn lapsed_hold_no_longer_blocks_even_before_sweep() {
    let pool = test_pool().await;
    let now = at(NOW);

    create_hold(&pool, &settings(), &hold_request(MONDAY_TEN_LOCAL), now)
        .await
        .expect("hold");

    // No sweep has run, but the hold window has passed.
    let later = now + Duration::minutes(11);
    create_hold(&pool, &settings(), &hold_request(MONDAY_TEN_LOCAL), later)
        .await
        .expect("stale pending hold must not occupy the slot");
}

#[tokio::test]
async fn settlement_is_idempotent() {
    let pool = test_pool().await;
    let now = at(NOW);

    let receipt = create_hold(&pool, &settings(), &hold_request(MONDAY_TEN_LOCAL), now)
        .await
        .expect("hold");
    let event = SettlementEvent {
        session_id: "cs_test_1".to_string(),
        appointment_id: receipt.appointment_id.clone(),
        amount_cents: 2000,
        currency: "usd".to_string(),
    };

    let outcome = apply_settlement(&pool, &settings(), &messenger(), &event)
        .await
        .unwrap();
    assert_eq!(outcome, SettlementOutcome::Confirmed);
    assert_eq!(appointment_status(&pool, &receipt.appointment_id).await, "booked");
    let hold: Option<String> = sqlx::query_scalar(
        "SELECT hold_expires_at_utc FROM appointments WHERE id = ?",
    )
    .bind(&receipt.appointment_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!(hold.is_none());

    let replay = apply_settlement(&pool, &settings(), &messenger(), &event)
        .await
        .unwrap();
    assert_eq!(replay, SettlementOutcome::DuplicateIgnored);

    assert_eq!(count(&pool, "SELECT COUNT(*) FROM payments").await, 1);
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM notices WHERE notice_type = 'confirmation'").await,
        1
    );
}

#[tokio::test]
async fn settlement_retry_finishes_a_partial_apply() {
    let pool = test_pool().await;
    let now = at(NOW);

    let receipt = create_hold(&pool, &settings(), &hold_request(MONDAY_TEN_LOCAL), now)
        .await
        .expect("hold");

    // Payment row landed but the status flip did not: not a duplicate.
    sqlx::query(
        r#"INSERT INTO payments (id, appointment_id, checkout_session_id, amount_cents, currency, status, created_at)
           VALUES ('pay-1', ?, 'cs_partial', 2000, 'usd', 'paid', ?)"#,
    )
    .bind(&receipt.appointment_id)
    .bind(NOW)
    .execute(&pool)
    .await
    .unwrap();

    let outcome = apply_settlement(
        &pool,
        &settings(),
        &messenger(),
        &SettlementEvent {
            session_id: "cs_partial".to_string(),
            appointment_id: receipt.appointment_id.clone(),
            amount_cents: 2000,
            currency: "usd".to_string(),
        },
    )
    .await
    .unwrap();

    assert_eq!(outcome, SettlementOutcome::Confirmed);
    assert_eq!(appointment_status(&pool, &receipt.appointment_id).await, "booked");
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM payments").await, 1);
}

#[tokio::test]
async fn no_show_waits_for_late_eligibility() {
    let pool = test_pool().await;
    let now = at(NOW);

    let receipt = create_hold(&pool, &settings(), &hold_request(MONDAY_TEN_LOCAL), now)
        .await
        .expect("hold");
    settle(&pool, &receipt.appointment_id, "cs_noshow").await;

    // Start is 15:00Z; late grace is 15 minutes.
    let too_early = at("2099-01-05T15:10:00Z");
    let result =
        set_admin_status(&pool, &messenger(), &receipt.appointment_id, "no_show", too_early).await;
    assert!(matches!(result, Err(EngineError::InvalidTransition(_))));
    assert_eq!(appointment_status(&pool, &receipt.appointment_id).await, "booked");

    let eligible = at("2099-01-05T15:16:00Z");
    set_admin_status(&pool, &messenger(), &receipt.appointment_id, "no_show", eligible)
        .await
        .expect("no-show after grace");
    assert_eq!(appointment_status(&pool, &receipt.appointment_id).await, "no_show");
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM payments WHERE status = 'forfeited'").await,
        1
    );
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM notices WHERE notice_type = 'no_show_notice'").await,
        1
    );

    // Terminal: a second transition is rejected.
    let again =
        set_admin_status(&pool, &messenger(), &receipt.appointment_id, "completed", eligible).await;
    assert!(matches!(again, Err(EngineError::InvalidTransition(_))));
}

#[tokio::test]
async fn pending_appointment_cannot_be_completed() {
    let pool = test_pool().await;
    let now = at(NOW);

    let receipt = create_hold(&pool, &settings(), &hold_request(MONDAY_TEN_LOCAL), now)
        .await
        .expect("hold");
    let result =
        set_admin_status(&pool, &messenger(), &receipt.appointment_id, "completed", now).await;
    assert!(matches!(result, Err(EngineError::InvalidTransition(_))));
}

#[tokio::test]
async fn reschedule_past_deadline_is_window_closed() {
    let pool = test_pool().await;
    let now = at(NOW);

    // Start now+4 days; the 72-hour minimum puts the deadline at now+1 day.
    let receipt = create_hold(&pool, &settings(), &hold_request(MONDAY_TEN_LOCAL), now)
        .await
        .expect("hold");
    settle(&pool, &receipt.appointment_id, "cs_resched").await;

    let after_deadline = at("2099-01-03T12:00:00Z");
    let result = reschedule(
        &pool,
        &settings(),
        &messenger(),
        &receipt.appointment_id,
        "2099-01-12T10:00",
        after_deadline,
    )
    .await;
    assert!(matches!(result, Err(EngineError::WindowClosed)));

    // Original untouched.
    let row = reservations::fetch_appointment(&pool, &receipt.appointment_id)
        .await
        .unwrap();
    assert_eq!(row.status, "booked");
    assert_eq!(row.start_time_utc, "2099-01-05T15:00:00Z");
}

#[tokio::test]
async fn reschedule_moves_booking_and_keeps_lineage() {
    let pool = test_pool().await;
    let now = at(NOW);

    let receipt = create_hold(&pool, &settings(), &hold_request(MONDAY_TEN_LOCAL), now)
        .await
        .expect("hold");
    settle(&pool, &receipt.appointment_id, "cs_move").await;

    // 2099-01-12 is the following Monday; well before the deadline.
    let moved = reschedule(
        &pool,
        &settings(),
        &messenger(),
        &receipt.appointment_id,
        "2099-01-12T10:00",
        now,
    )
    .await
    .expect("reschedule");

    assert_ne!(moved.appointment_id, receipt.appointment_id);
    assert_eq!(moved.start_time_utc, "2099-01-12T15:00:00Z");

    let new_row = reservations::fetch_appointment(&pool, &moved.appointment_id)
        .await
        .unwrap();
    assert_eq!(new_row.status, "booked");
    assert_eq!(
        new_row.rescheduled_from_appointment_id.as_deref(),
        Some(receipt.appointment_id.as_str())
    );
    assert!(new_row.hold_expires_at_utc.is_none());

    let old_row = reservations::fetch_appointment(&pool, &receipt.appointment_id)
        .await
        .unwrap();
    assert_eq!(old_row.status, "cancelled");

    // Deposit follows the live booking.
    let payment_owner: String =
        sqlx::query_scalar("SELECT appointment_id FROM payments WHERE checkout_session_id = 'cs_move'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(payment_owner, moved.appointment_id);

    // A fresh confirmation went out on top of the settlement one.
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM notices WHERE notice_type = 'confirmation'").await,
        2
    );

    // The vacated slot is bookable again.
    create_hold(&pool, &settings(), &hold_request(MONDAY_TEN_LOCAL), now)
        .await
        .expect("old slot freed");
}

#[tokio::test]
async fn reschedule_onto_occupied_slot_conflicts() {
    let pool = test_pool().await;
    let now = at(NOW);

    let first = create_hold(&pool, &settings(), &hold_request(MONDAY_TEN_LOCAL), now)
        .await
        .expect("first hold");
    settle(&pool, &first.appointment_id, "cs_a").await;

    let second = create_hold(&pool, &settings(), &hold_request("2099-01-05T12:00"), now)
        .await
        .expect("second hold");
    settle(&pool, &second.appointment_id, "cs_b").await;

    let result = reschedule(
        &pool,
        &settings(),
        &messenger(),
        &second.appointment_id,
        MONDAY_TEN_LOCAL,
        now,
    )
    .await;
    assert!(matches!(result, Err(EngineError::Conflict)));

    let row = reservations::fetch_appointment(&pool, &second.appointment_id)
        .await
        .unwrap();
    assert_eq!(row.status, "booked");
    assert_eq!(row.start_time_utc, "2099-01-05T17:00:00Z");
}

#[tokio::test]
async fn reminders_go_out_at_most_once() {
    let pool = test_pool().await;
    let hold_now = at("2099-01-04T12:00:00Z");

    let receipt = create_hold(&pool, &settings(), &hold_request(MONDAY_TEN_LOCAL), hold_now)
        .await
        .expect("hold");
    settle(&pool, &receipt.appointment_id, "cs_remind").await;

    // Start is 2099-01-05T15:00Z; scan with now exactly 24 hours before.
    let scan_now = at("2099-01-04T15:00:00Z");
    let sent = scan_and_send_notices(&pool, &settings(), &messenger(), scan_now)
        .await
        .unwrap();
    assert_eq!(sent, 1);
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM notices WHERE notice_type = 'reminder_24h'").await,
        1
    );

    let resent = scan_and_send_notices(&pool, &settings(), &messenger(), scan_now)
        .await
        .unwrap();
    assert_eq!(resent, 0);

    // Two-hour window fires independently of the 24-hour one.
    let two_hour_now = at("2099-01-05T13:00:00Z");
    let sent = scan_and_send_notices(&pool, &settings(), &messenger(), two_hour_now)
        .await
        .unwrap();
    assert_eq!(sent, 1);
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM notices WHERE notice_type = 'reminder_2h'").await,
        1
    );
}

#[tokio::test]
async fn late_warning_covers_the_late_window() {
    let pool = test_pool().await;
    let hold_now = at("2099-01-04T12:00:00Z");

    let receipt = create_hold(&pool, &settings(), &hold_request(MONDAY_TEN_LOCAL), hold_now)
        .await
        .expect("hold");
    settle(&pool, &receipt.appointment_id, "cs_late").await;

    // Twelve minutes past the 15:00Z start.
    let scan_now = at("2099-01-05T15:12:00Z");
    let sent = scan_and_send_notices(&pool, &settings(), &messenger(), scan_now)
        .await
        .unwrap();
    assert_eq!(sent, 1);
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM notices WHERE notice_type = 'late_warning'").await,
        1
    );
}

#[tokio::test]
async fn opted_out_customers_receive_nothing() {
    let pool = test_pool().await;
    let hold_now = at("2099-01-04T12:00:00Z");

    let mut request = hold_request(MONDAY_TEN_LOCAL);
    request.sms_opt_in = false;
    let receipt = create_hold(&pool, &settings(), &request, hold_now)
        .await
        .expect("hold");
    settle(&pool, &receipt.appointment_id, "cs_optout").await;

    let scan_now = at("2099-01-04T15:00:00Z");
    let sent = scan_and_send_notices(&pool, &settings(), &messenger(), scan_now)
        .await
        .unwrap();
    assert_eq!(sent, 0);
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM notices").await, 0);
}

struct CountingMessenger;

impl Messenger for CountingMessenger {
    fn deliver(&self, _to_phone: &str, _body: &str) -> chairbook::notices::Delivery {
        chairbook::notices::Delivery {
            provider_sid: Some("SM-test".to_string()),
            status: "sent".to_string(),
        }
    }
}

#[tokio::test]
async fn notice_log_records_provider_receipt() {
    let pool = test_pool().await;
    let now = at(NOW);

    let receipt = create_hold(&pool, &settings(), &hold_request(MONDAY_TEN_LOCAL), now)
        .await
        .expect("hold");

    let outcome = apply_settlement(
        &pool,
        &settings(),
        &CountingMessenger,
        &SettlementEvent {
            session_id: "cs_sid".to_string(),
            appointment_id: receipt.appointment_id.clone(),
            amount_cents: 2000,
            currency: "usd".to_string(),
        },
    )
    .await
    .unwrap();
    assert_eq!(outcome, SettlementOutcome::Confirmed);

    let sid: Option<String> =
        sqlx::query_scalar("SELECT provider_sid FROM notices WHERE notice_type = 'confirmation'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(sid.as_deref(), Some("SM-test"));
}
