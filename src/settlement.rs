use serde::Deserialize;
use sqlx::SqlitePool;
use chrono::Utc;

use crate::{
    auth::new_id,
    error::EngineError,
    models::{NOTICE_CONFIRMATION, PAYMENT_PAID, STATUS_BOOKED},
    notices::{self, Messenger, SHOP_LABEL},
    settings::BusinessSettings,
    timeutil::{fmt_utc, format_local, parse_utc},
};

/// A payment-confirmation event whose signature the transport layer has
/// already verified.
#[derive(Debug, Clone, Deserialize)]
pub struct SettlementEvent {
    pub session_id: String,
    pub appointment_id: String,
    pub amount_cents: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "usd".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    Confirmed,
    DuplicateIgnored,
}

/// A redelivered event is a duplicate only when both halves of the previous
/// settlement landed: the payment row exists and the appointment is booked.
/// Anything less is a partial apply that the retry should finish.
pub fn is_duplicate(payment_exists: bool, appointment_status: &str) -> bool {
    payment_exists && appointment_status == STATUS_BOOKED
}

/// Idempotently settles a hold into a booked appointment.
///
/// Inserts the payment record keyed by the external session id (unique, the
/// idempotency anchor), flips the appointment to `booked`, clears the hold,
/// and sends one confirmation notice per distinct settlement.
pub async fn apply_settlement(
    pool: &SqlitePool,
    settings: &BusinessSettings,
    messenger: &dyn Messenger,
    event: &SettlementEvent,
) -> Result<SettlementOutcome, EngineError> {
    let payment_exists = sqlx::query_as::<_, (String,)>(
        "SELECT id FROM payments WHERE checkout_session_id = ?",
    )
    .bind(&event.session_id)
    .fetch_optional(pool)
    .await?
    .is_some();

    let status = sqlx::query_as::<_, (String,)>("SELECT status FROM appointments WHERE id = ?")
        .bind(&event.appointment_id)
        .fetch_optional(pool)
        .await?
        .ok_or(EngineError::NotFound)?
        .0;

    if is_duplicate(payment_exists, &status) {
        log::info!(
            "Duplicate settlement for session {} ignored",
            event.session_id
        );
        return Ok(SettlementOutcome::DuplicateIgnored);
    }

    if !payment_exists {
        // The unique index on checkout_session_id absorbs a concurrent
        // redelivery racing this insert.
        sqlx::query(
            r#"INSERT INTO payments (id, appointment_id, checkout_session_id, amount_cents, currency, status, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (checkout_session_id) DO NOTHING"#,
        )
        .bind(new_id())
        .bind(&event.appointment_id)
        .bind(&event.session_id)
        .bind(event.amount_cents)
        .bind(&event.currency)
        .bind(PAYMENT_PAID)
        .bind(fmt_utc(Utc::now()))
        .execute(pool)
        .await?;
    }

    sqlx::query("UPDATE appointments SET status = ?, hold_expires_at_utc = NULL WHERE id = ?")
        .bind(STATUS_BOOKED)
        .bind(&event.appointment_id)
        .execute(pool)
        .await?;

    let contact = sqlx::query_as::<_, (String, String, String, i64)>(
        r#"SELECT a.start_time_utc, a.customer_id, c.phone_e164, c.sms_opt_in
           FROM appointments a JOIN customers c ON a.customer_id = c.id
           WHERE a.id = ?"#,
    )
    .bind(&event.appointment_id)
    .fetch_optional(pool)
    .await?;

    if let Some((start_raw, customer_id, phone, opt_in)) = contact {
        if opt_in != 0 {
            let start = parse_utc(&start_raw)?;
            let label = format_local(start, settings.time_zone);
            let body = format!(
                "{SHOP_LABEL}: Your booking is confirmed for {label}. Reply STOP to opt out."
            );
            notices::send_notice(
                pool,
                messenger,
                Some(&event.appointment_id),
                Some(&customer_id),
                &phone,
                NOTICE_CONFIRMATION,
                &body,
                true,
            )
            .await?;
        }
    }

    log::info!(
        "Settlement for session {} booked appointment {}",
        event.session_id,
        event.appointment_id
    );
    Ok(SettlementOutcome::Confirmed)
}
