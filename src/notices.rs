use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

use crate::{
    auth::new_id,
    error::EngineError,
    models::{AppointmentContactRow, NOTICE_LATE_WARNING, NOTICE_REMINDER_24H, NOTICE_REMINDER_2H, STATUS_BOOKED},
    settings::BusinessSettings,
    timeutil::{fmt_utc, format_local, parse_utc},
};

/// Half-width of the reminder windows around now+24h and now+2h.
const REMINDER_WINDOW_MINUTES: i64 = 5;

pub const SHOP_LABEL: &str = "Chairbook";

#[derive(Debug, Clone)]
pub struct Delivery {
    pub provider_sid: Option<String>,
    pub status: String,
}

/// Outbound messaging collaborator. The engine only logs and dedupes;
/// actual SMS/voice delivery happens behind this seam.
pub trait Messenger: Send + Sync {
    fn deliver(&self, to_phone: &str, body: &str) -> Delivery;
}

/// Default messenger: writes the message to the process log. Used in demo
/// deployments and tests; a real deployment plugs a provider client in here.
pub struct LogMessenger {
    pub demo: bool,
}

impl Messenger for LogMessenger {
    fn deliver(&self, to_phone: &str, body: &str) -> Delivery {
        if self.demo {
            return Delivery {
                provider_sid: None,
                status: "skipped_demo".to_string(),
            };
        }
        log::info!("Notice to {to_phone}: {body}");
        Delivery {
            provider_sid: None,
            status: "logged".to_string(),
        }
    }
}

/// Sends one notice and records it in the notice log.
///
/// Unless `allow_duplicate` is set, an existing (appointment, type) log row
/// suppresses the send; that is the at-most-once guarantee. Confirmation
/// notices pass `allow_duplicate = true` so a reschedule always re-notifies,
/// while their log rows still let reminder types dedupe normally.
pub async fn send_notice(
    pool: &SqlitePool,
    messenger: &dyn Messenger,
    appointment_id: Option<&str>,
    customer_id: Option<&str>,
    to_phone: &str,
    notice_type: &str,
    body: &str,
    allow_duplicate: bool,
) -> Result<bool, EngineError> {
    if !allow_duplicate {
        let existing = sqlx::query_as::<_, (String,)>(
            "SELECT id FROM notices WHERE appointment_id = ? AND notice_type = ? LIMIT 1",
        )
        .bind(appointment_id)
        .bind(notice_type)
        .fetch_optional(pool)
        .await?;
        if existing.is_some() {
            return Ok(false);
        }
    }

    let delivery = messenger.deliver(to_phone, body);

    sqlx::query(
        r#"INSERT INTO notices (id, appointment_id, customer_id, notice_type, to_phone, provider_sid, status, sent_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(new_id())
    .bind(appointment_id)
    .bind(customer_id)
    .bind(notice_type)
    .bind(to_phone)
    .bind(delivery.provider_sid)
    .bind(delivery.status)
    .bind(fmt_utc(Utc::now()))
    .execute(pool)
    .await?;

    Ok(true)
}

async fn booked_starting_between(
    pool: &SqlitePool,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<AppointmentContactRow>, EngineError> {
    let rows = sqlx::query_as::<_, AppointmentContactRow>(
        r#"SELECT a.id, a.customer_id, a.start_time_utc, a.status,
                  c.full_name, c.phone_e164, c.sms_opt_in
           FROM appointments a
           JOIN customers c ON a.customer_id = c.id
           WHERE a.status = ? AND a.start_time_utc >= ? AND a.start_time_utc <= ?
           ORDER BY a.start_time_utc"#,
    )
    .bind(STATUS_BOOKED)
    .bind(fmt_utc(from))
    .bind(fmt_utc(to))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Reminder sweep entry point. Scans the 24-hour and 2-hour reminder windows
/// plus the late-arrival window and sends whatever has not been sent yet.
/// Returns how many notices actually went out.
pub async fn scan_and_send_notices(
    pool: &SqlitePool,
    settings: &BusinessSettings,
    messenger: &dyn Messenger,
    now: DateTime<Utc>,
) -> Result<u64, EngineError> {
    let mut sent = 0u64;

    let reminders = [
        (NOTICE_REMINDER_24H, Duration::hours(24)),
        (NOTICE_REMINDER_2H, Duration::hours(2)),
    ];
    for (notice_type, lead) in reminders {
        let window = Duration::minutes(REMINDER_WINDOW_MINUTES);
        let rows = booked_starting_between(pool, now + lead - window, now + lead + window).await?;
        for row in rows {
            if row.sms_opt_in == 0 {
                continue;
            }
            let start = parse_utc(&row.start_time_utc)?;
            let label = format_local(start, settings.time_zone);
            let body = format!(
                "{SHOP_LABEL}: Reminder for your appointment on {label}. Reply STOP to opt out."
            );
            if send_notice(
                pool,
                messenger,
                Some(&row.id),
                Some(&row.customer_id),
                &row.phone_e164,
                notice_type,
                &body,
                false,
            )
            .await?
            {
                sent += 1;
            }
        }
    }

    // Customers 10-15 minutes into their window who have not been marked yet.
    let late_rows =
        booked_starting_between(pool, now - Duration::minutes(15), now - Duration::minutes(9))
            .await?;
    for row in late_rows {
        if row.sms_opt_in == 0 {
            continue;
        }
        let body = format!(
            "{SHOP_LABEL}: You are 10 minutes into your appointment window. Please arrive soon. Reply STOP to opt out."
        );
        if send_notice(
            pool,
            messenger,
            Some(&row.id),
            Some(&row.customer_id),
            &row.phone_e164,
            NOTICE_LATE_WARNING,
            &body,
            false,
        )
        .await?
        {
            sent += 1;
        }
    }

    Ok(sent)
}
