use serde::Serialize;

pub const ROLE_ADMIN: &str = "admin";

pub const STATUS_PENDING_PAYMENT: &str = "pending_payment";
pub const STATUS_BOOKED: &str = "booked";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_CANCELLED: &str = "cancelled";
pub const STATUS_NO_SHOW: &str = "no_show";
pub const STATUS_EXPIRED: &str = "expired";

pub const PAYMENT_PAID: &str = "paid";
pub const PAYMENT_FORFEITED: &str = "forfeited";

pub const NOTICE_CONFIRMATION: &str = "confirmation";
pub const NOTICE_REMINDER_24H: &str = "reminder_24h";
pub const NOTICE_REMINDER_2H: &str = "reminder_2h";
pub const NOTICE_LATE_WARNING: &str = "late_warning";
pub const NOTICE_NO_SHOW: &str = "no_show_notice";

#[allow(dead_code)]
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub role: String,
    pub password_hash: String,
    pub active: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ServiceRow {
    pub id: String,
    pub name: String,
    pub duration_minutes: i64,
    pub price_display: String,
    pub price_cents: i64,
    pub direct_booking_only: i64,
    pub note: Option<String>,
    pub deposit_cents: i64,
    pub active: i64,
    pub created_at: String,
}

#[allow(dead_code)]
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SettingsRow {
    pub id: String,
    pub time_zone: String,
    pub buffer_minutes: i64,
    pub late_grace_minutes: i64,
    pub reschedule_min_hours: i64,
    pub deposit_cents_default: i64,
    pub working_hours_json: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub policy_text: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AppointmentRow {
    pub id: String,
    pub customer_id: String,
    pub service_id: String,
    pub start_time_utc: String,
    pub end_time_utc: String,
    pub status: String,
    pub hold_expires_at_utc: Option<String>,
    pub late_eligible_at_utc: String,
    pub reschedule_deadline_utc: String,
    pub rescheduled_from_appointment_id: Option<String>,
    pub created_at: String,
}

/// Appointment joined with customer contact, for notices and admin views.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AppointmentContactRow {
    pub id: String,
    pub customer_id: String,
    pub start_time_utc: String,
    pub status: String,
    pub full_name: String,
    pub phone_e164: String,
    pub sms_opt_in: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TimeBlockRow {
    pub id: String,
    pub start_time_utc: String,
    pub end_time_utc: String,
    pub note: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BusyRow {
    pub start_time_utc: String,
    pub end_time_utc: String,
}
