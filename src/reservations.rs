use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

use crate::{
    auth::new_id,
    error::EngineError,
    models::{
        AppointmentRow, ServiceRow, NOTICE_CONFIRMATION, NOTICE_NO_SHOW, PAYMENT_FORFEITED,
        STATUS_BOOKED, STATUS_CANCELLED, STATUS_COMPLETED, STATUS_EXPIRED, STATUS_NO_SHOW,
        STATUS_PENDING_PAYMENT,
    },
    notices::{self, Messenger, SHOP_LABEL},
    settings::BusinessSettings,
    timeutil::{fmt_utc, format_local, local_to_utc, parse_local_start, parse_utc},
};

/// How long a pending slot claim survives without payment.
pub const HOLD_MINUTES: i64 = 10;

#[derive(Debug, Clone)]
pub struct HoldRequest {
    pub service_id: String,
    pub start_time_local: String,
    pub full_name: String,
    pub phone_e164: String,
    pub sms_opt_in: bool,
}

#[derive(Debug, Clone)]
pub struct HoldReceipt {
    pub appointment_id: String,
    pub start_time_utc: String,
    pub hold_expires_at_utc: String,
    pub deposit_cents: i64,
    pub currency: String,
}

#[derive(Debug, Clone)]
pub struct RescheduleReceipt {
    pub appointment_id: String,
    pub start_time_utc: String,
}

/// Rescheduling is allowed strictly before the deadline.
pub fn is_reschedule_allowed(deadline: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now < deadline
}

fn validate_phone(raw: &str) -> Result<(), EngineError> {
    let digits = raw.strip_prefix('+').unwrap_or("");
    let valid = (8..=15).contains(&digits.len())
        && digits.chars().all(|ch| ch.is_ascii_digit())
        && !digits.starts_with('0');
    if valid {
        Ok(())
    } else {
        Err(EngineError::Invalid("Phone number must be in E.164 format.".to_string()))
    }
}

/// Parses a client-supplied local start in the business zone and requires it
/// to be strictly in the future.
fn resolve_future_start(
    raw: &str,
    settings: &BusinessSettings,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, EngineError> {
    let local = parse_local_start(raw)?;
    let start_utc = local_to_utc(local, settings.time_zone)
        .ok_or_else(|| EngineError::Invalid(format!("Invalid start time: {raw}")))?;
    if start_utc <= now {
        return Err(EngineError::Invalid("Start time is in the past.".to_string()));
    }
    Ok(start_utc)
}

async fn fetch_bookable_service(
    pool: &SqlitePool,
    service_id: &str,
) -> Result<ServiceRow, EngineError> {
    let service = sqlx::query_as::<_, ServiceRow>(
        "SELECT * FROM services WHERE id = ? AND active = 1",
    )
    .bind(service_id)
    .fetch_optional(pool)
    .await?
    .ok_or(EngineError::NotFound)?;

    if service.direct_booking_only != 0 {
        return Err(EngineError::Invalid(
            "This service requires direct confirmation. Please contact the shop.".to_string(),
        ));
    }
    Ok(service)
}

async fn upsert_customer(
    pool: &SqlitePool,
    full_name: &str,
    phone_e164: &str,
    sms_opt_in: bool,
) -> Result<String, EngineError> {
    let existing = sqlx::query_as::<_, (String,)>("SELECT id FROM customers WHERE phone_e164 = ?")
        .bind(phone_e164)
        .fetch_optional(pool)
        .await?;

    if let Some((id,)) = existing {
        sqlx::query("UPDATE customers SET full_name = ?, sms_opt_in = ? WHERE id = ?")
            .bind(full_name)
            .bind(sms_opt_in as i64)
            .bind(&id)
            .execute(pool)
            .await?;
        return Ok(id);
    }

    let id = new_id();
    sqlx::query(
        r#"INSERT INTO customers (id, full_name, phone_e164, sms_opt_in, notes, created_at)
           VALUES (?, ?, ?, ?, NULL, ?)"#,
    )
    .bind(&id)
    .bind(full_name)
    .bind(phone_e164)
    .bind(sms_opt_in as i64)
    .bind(fmt_utc(Utc::now()))
    .execute(pool)
    .await?;
    Ok(id)
}

/// The conflict gate shared by hold creation and rescheduling: inserts the
/// row only if its buffered window is disjoint from every live appointment
/// (booked, or pending with an unexpired hold) and every time block. One
/// statement, so the check and the insert cannot be interleaved by another
/// writer. Zero rows inserted means the slot is gone.
#[allow(clippy::too_many_arguments)]
async fn insert_if_free<'e, E>(
    executor: E,
    id: &str,
    customer_id: &str,
    service_id: &str,
    start_utc: DateTime<Utc>,
    end_utc: DateTime<Utc>,
    status: &str,
    hold_expires_at: Option<String>,
    late_eligible_at: DateTime<Utc>,
    reschedule_deadline: DateTime<Utc>,
    rescheduled_from: Option<&str>,
    buffer_minutes: i64,
    now: DateTime<Utc>,
) -> Result<bool, EngineError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let start = fmt_utc(start_utc);
    let end = fmt_utc(end_utc);
    let result = sqlx::query(
        r#"INSERT INTO appointments
             (id, customer_id, service_id, start_time_utc, end_time_utc, status,
              hold_expires_at_utc, late_eligible_at_utc, reschedule_deadline_utc,
              rescheduled_from_appointment_id, created_at)
           SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
           WHERE NOT EXISTS (
               SELECT 1 FROM appointments a
               WHERE a.id IS NOT ?
                 AND (a.status = 'booked'
                      OR (a.status = 'pending_payment' AND a.hold_expires_at_utc > ?))
                 AND datetime(?) < datetime(a.end_time_utc, '+' || ? || ' minutes')
                 AND datetime(?, '+' || ? || ' minutes') > datetime(a.start_time_utc)
           )
           AND NOT EXISTS (
               SELECT 1 FROM time_blocks b
               WHERE datetime(?) < datetime(b.end_time_utc, '+' || ? || ' minutes')
                 AND datetime(?, '+' || ? || ' minutes') > datetime(b.start_time_utc)
           )"#,
    )
    .bind(id)
    .bind(customer_id)
    .bind(service_id)
    .bind(&start)
    .bind(&end)
    .bind(status)
    .bind(hold_expires_at)
    .bind(fmt_utc(late_eligible_at))
    .bind(fmt_utc(reschedule_deadline))
    .bind(rescheduled_from)
    .bind(fmt_utc(Utc::now()))
    .bind(rescheduled_from)
    .bind(fmt_utc(now))
    .bind(&start)
    .bind(buffer_minutes)
    .bind(&end)
    .bind(buffer_minutes)
    .bind(&start)
    .bind(buffer_minutes)
    .bind(&end)
    .bind(buffer_minutes)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Creates a time-boxed hold on a slot: `pending_payment` with a 10-minute
/// claim. The caller hands the receipt to the payment collaborator; the hold
/// either settles into a booking or lapses and is reclaimed by the sweep.
pub async fn create_hold(
    pool: &SqlitePool,
    settings: &BusinessSettings,
    request: &HoldRequest,
    now: DateTime<Utc>,
) -> Result<HoldReceipt, EngineError> {
    if request.full_name.trim().len() < 2 {
        return Err(EngineError::Invalid("Full name is required.".to_string()));
    }
    validate_phone(&request.phone_e164)?;

    let service = fetch_bookable_service(pool, &request.service_id).await?;
    let start_utc = resolve_future_start(&request.start_time_local, settings, now)?;
    let end_utc = start_utc + Duration::minutes(service.duration_minutes);
    let hold_expires_at = now + Duration::minutes(HOLD_MINUTES);
    let late_eligible_at = start_utc + Duration::minutes(settings.late_grace_minutes);
    let reschedule_deadline = start_utc - Duration::hours(settings.reschedule_min_hours);

    let customer_id = upsert_customer(
        pool,
        request.full_name.trim(),
        &request.phone_e164,
        request.sms_opt_in,
    )
    .await?;

    let appointment_id = new_id();
    let inserted = insert_if_free(
        pool,
        &appointment_id,
        &customer_id,
        &service.id,
        start_utc,
        end_utc,
        STATUS_PENDING_PAYMENT,
        Some(fmt_utc(hold_expires_at)),
        late_eligible_at,
        reschedule_deadline,
        None,
        settings.buffer_minutes,
        now,
    )
    .await?;

    if !inserted {
        return Err(EngineError::Conflict);
    }

    log::info!("Hold {appointment_id} created for {}", fmt_utc(start_utc));
    Ok(HoldReceipt {
        appointment_id,
        start_time_utc: fmt_utc(start_utc),
        hold_expires_at_utc: fmt_utc(hold_expires_at),
        deposit_cents: service.deposit_cents,
        currency: "usd".to_string(),
    })
}

pub async fn fetch_appointment(
    pool: &SqlitePool,
    appointment_id: &str,
) -> Result<AppointmentRow, EngineError> {
    sqlx::query_as::<_, AppointmentRow>("SELECT * FROM appointments WHERE id = ?")
        .bind(appointment_id)
        .fetch_optional(pool)
        .await?
        .ok_or(EngineError::NotFound)
}

/// Moves a booked appointment to a new time.
///
/// A successful reschedule inserts a fresh booked row pointing back at the
/// superseded one, cancels the old row, and re-points payment records so the
/// deposit follows the live booking. The conflict gate excludes the old row,
/// since the vacated slot may overlap the new one. A confirmation notice is
/// always re-sent, even if one went out before.
pub async fn reschedule(
    pool: &SqlitePool,
    settings: &BusinessSettings,
    messenger: &dyn Messenger,
    appointment_id: &str,
    new_start_local: &str,
    now: DateTime<Utc>,
) -> Result<RescheduleReceipt, EngineError> {
    let appointment = fetch_appointment(pool, appointment_id).await?;
    if appointment.status != STATUS_BOOKED {
        return Err(EngineError::InvalidTransition(format!(
            "Only booked appointments can be rescheduled (status is {}).",
            appointment.status
        )));
    }
    let deadline = parse_utc(&appointment.reschedule_deadline_utc)?;
    if !is_reschedule_allowed(deadline, now) {
        return Err(EngineError::WindowClosed);
    }

    let service = sqlx::query_as::<_, ServiceRow>("SELECT * FROM services WHERE id = ?")
        .bind(&appointment.service_id)
        .fetch_one(pool)
        .await?;

    let start_utc = resolve_future_start(new_start_local, settings, now)?;
    let end_utc = start_utc + Duration::minutes(service.duration_minutes);
    let late_eligible_at = start_utc + Duration::minutes(settings.late_grace_minutes);
    let reschedule_deadline = start_utc - Duration::hours(settings.reschedule_min_hours);

    let new_id_value = new_id();
    let mut tx = pool.begin().await?;

    let inserted = insert_if_free(
        &mut *tx,
        &new_id_value,
        &appointment.customer_id,
        &appointment.service_id,
        start_utc,
        end_utc,
        STATUS_BOOKED,
        None,
        late_eligible_at,
        reschedule_deadline,
        Some(&appointment.id),
        settings.buffer_minutes,
        now,
    )
    .await?;

    if !inserted {
        return Err(EngineError::Conflict);
    }

    sqlx::query("UPDATE appointments SET status = ? WHERE id = ?")
        .bind(STATUS_CANCELLED)
        .bind(&appointment.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE payments SET appointment_id = ? WHERE appointment_id = ?")
        .bind(&new_id_value)
        .bind(&appointment.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    let contact = sqlx::query_as::<_, (String, i64)>(
        "SELECT phone_e164, sms_opt_in FROM customers WHERE id = ?",
    )
    .bind(&appointment.customer_id)
    .fetch_optional(pool)
    .await?;

    if let Some((phone, opt_in)) = contact {
        if opt_in != 0 {
            let label = format_local(start_utc, settings.time_zone);
            let body = format!(
                "{SHOP_LABEL}: Your appointment has been rescheduled to {label}. Reply STOP to opt out."
            );
            notices::send_notice(
                pool,
                messenger,
                Some(&new_id_value),
                Some(&appointment.customer_id),
                &phone,
                NOTICE_CONFIRMATION,
                &body,
                true,
            )
            .await?;
        }
    }

    log::info!("Appointment {appointment_id} rescheduled as {new_id_value}");
    Ok(RescheduleReceipt {
        appointment_id: new_id_value,
        start_time_utc: fmt_utc(start_utc),
    })
}

/// Reclaims abandoned holds. Idempotent: a second run over the same instant
/// finds nothing left to expire.
pub async fn expire_stale_holds(pool: &SqlitePool, now: DateTime<Utc>) -> Result<u64, EngineError> {
    let result = sqlx::query(
        "UPDATE appointments SET status = ? WHERE status = ? AND hold_expires_at_utc < ?",
    )
    .bind(STATUS_EXPIRED)
    .bind(STATUS_PENDING_PAYMENT)
    .bind(fmt_utc(now))
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Administrative close-out of a booked appointment. `no_show` is gated on
/// the late-eligibility instant and forfeits the deposit.
pub async fn set_admin_status(
    pool: &SqlitePool,
    messenger: &dyn Messenger,
    appointment_id: &str,
    new_status: &str,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    if ![STATUS_COMPLETED, STATUS_CANCELLED, STATUS_NO_SHOW].contains(&new_status) {
        return Err(EngineError::Invalid(format!("Invalid status: {new_status}")));
    }

    let appointment = fetch_appointment(pool, appointment_id).await?;
    if appointment.status != STATUS_BOOKED {
        return Err(EngineError::InvalidTransition(format!(
            "Appointment is {}, not booked.",
            appointment.status
        )));
    }
    if new_status == STATUS_NO_SHOW {
        let late_eligible_at = parse_utc(&appointment.late_eligible_at_utc)?;
        if now < late_eligible_at {
            return Err(EngineError::InvalidTransition(
                "Too early to mark this appointment as a no-show.".to_string(),
            ));
        }
    }

    let result = sqlx::query("UPDATE appointments SET status = ? WHERE id = ? AND status = ?")
        .bind(new_status)
        .bind(appointment_id)
        .bind(STATUS_BOOKED)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(EngineError::InvalidTransition(
            "Appointment changed state concurrently.".to_string(),
        ));
    }

    if new_status == STATUS_NO_SHOW {
        sqlx::query("UPDATE payments SET status = ? WHERE appointment_id = ?")
            .bind(PAYMENT_FORFEITED)
            .bind(appointment_id)
            .execute(pool)
            .await?;

        let contact = sqlx::query_as::<_, (String, i64)>(
            "SELECT phone_e164, sms_opt_in FROM customers WHERE id = ?",
        )
        .bind(&appointment.customer_id)
        .fetch_optional(pool)
        .await?;
        if let Some((phone, opt_in)) = contact {
            if opt_in != 0 {
                let body = format!(
                    "{SHOP_LABEL}: Your appointment was marked as no-show. The deposit has been forfeited. Reply STOP to opt out."
                );
                notices::send_notice(
                    pool,
                    messenger,
                    Some(appointment_id),
                    Some(&appointment.customer_id),
                    &phone,
                    NOTICE_NO_SHOW,
                    &body,
                    false,
                )
                .await?;
            }
        }
    }

    log::info!("Appointment {appointment_id} marked {new_status}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn instant(raw: &str) -> DateTime<Utc> {
        parse_utc(raw).unwrap()
    }

    #[test]
    fn reschedule_allowed_before_deadline() {
        let now = instant("2025-01-01T12:00:00Z");
        assert!(is_reschedule_allowed(instant("2025-01-02T12:00:00Z"), now));
    }

    #[test]
    fn reschedule_blocked_after_deadline() {
        let now = instant("2025-01-01T12:00:00Z");
        assert!(!is_reschedule_allowed(instant("2025-01-01T10:00:00Z"), now));
    }

    #[test]
    fn reschedule_blocked_at_deadline() {
        let now = instant("2025-01-01T12:00:00Z");
        assert!(!is_reschedule_allowed(now, now));
    }

    #[test]
    fn phone_validation() {
        assert!(validate_phone("+12025550123").is_ok());
        assert!(validate_phone("12025550123").is_err());
        assert!(validate_phone("+0123456789").is_err());
        assert!(validate_phone("+1 202 555").is_err());
    }

    #[test]
    fn hold_window_is_ten_minutes() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(
            now + Duration::minutes(HOLD_MINUTES),
            instant("2025-01-01T12:10:00Z")
        );
    }
}
