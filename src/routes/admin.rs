use actix_web::{web, HttpResponse};
use actix_web_httpauth::middleware::HttpAuthentication;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::{
    auth::{admin_validator, new_id},
    error::EngineError,
    models::{ServiceRow, SettingsRow, TimeBlockRow},
    reservations,
    settings::WorkingHours,
    state::AppState,
    timeutil::{fmt_utc, parse_utc, parse_zone},
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/admin")
            .wrap(HttpAuthentication::basic(admin_validator))
            .service(
                web::resource("/appointments").route(web::get().to(list_appointments)),
            )
            .service(
                web::resource("/appointments/{id}/status")
                    .route(web::patch().to(update_status)),
            )
            .service(
                web::resource("/blocks")
                    .route(web::get().to(list_blocks))
                    .route(web::post().to(create_block)),
            )
            .service(web::resource("/blocks/{id}").route(web::delete().to(delete_block)))
            .service(
                web::resource("/settings")
                    .route(web::get().to(get_settings))
                    .route(web::put().to(put_settings)),
            )
            .service(
                web::resource("/services")
                    .route(web::get().to(list_services))
                    .route(web::post().to(create_service)),
            )
            .service(web::resource("/services/{id}").route(web::put().to(update_service))),
    );
}

#[derive(Deserialize)]
struct AppointmentFilter {
    status: Option<String>,
}

#[derive(Debug, serde::Serialize, sqlx::FromRow)]
struct AppointmentListRow {
    id: String,
    start_time_utc: String,
    end_time_utc: String,
    status: String,
    hold_expires_at_utc: Option<String>,
    rescheduled_from_appointment_id: Option<String>,
    customer_name: String,
    customer_phone: String,
    service_name: String,
}

async fn list_appointments(
    state: web::Data<AppState>,
    query: web::Query<AppointmentFilter>,
) -> Result<HttpResponse, EngineError> {
    let base = r#"SELECT a.id, a.start_time_utc, a.end_time_utc, a.status,
                         a.hold_expires_at_utc, a.rescheduled_from_appointment_id,
                         c.full_name AS customer_name, c.phone_e164 AS customer_phone,
                         s.name AS service_name
                  FROM appointments a
                  JOIN customers c ON a.customer_id = c.id
                  JOIN services s ON a.service_id = s.id"#;

    let rows = match query.status.as_deref().filter(|status| !status.is_empty()) {
        Some(status) => {
            let sql = format!("{base} WHERE a.status = ? ORDER BY a.start_time_utc");
            sqlx::query_as::<_, AppointmentListRow>(&sql)
                .bind(status)
                .fetch_all(&state.db)
                .await?
        }
        None => {
            let sql = format!("{base} ORDER BY a.start_time_utc");
            sqlx::query_as::<_, AppointmentListRow>(&sql)
                .fetch_all(&state.db)
                .await?
        }
    };

    Ok(HttpResponse::Ok().json(json!({ "appointments": rows })))
}

#[derive(Deserialize)]
struct StatusForm {
    status: String,
}

async fn update_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
    form: web::Json<StatusForm>,
) -> Result<HttpResponse, EngineError> {
    let appointment_id = path.into_inner();

    reservations::set_admin_status(
        &state.db,
        state.messenger.as_ref(),
        &appointment_id,
        &form.status,
        Utc::now(),
    )
    .await?;

    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

async fn list_blocks(state: web::Data<AppState>) -> Result<HttpResponse, EngineError> {
    let blocks = sqlx::query_as::<_, TimeBlockRow>(
        "SELECT * FROM time_blocks ORDER BY start_time_utc",
    )
    .fetch_all(&state.db)
    .await?;
    Ok(HttpResponse::Ok().json(json!({ "blocks": blocks })))
}

#[derive(Deserialize)]
struct BlockForm {
    start_time_utc: String,
    end_time_utc: String,
    note: Option<String>,
}

async fn create_block(
    state: web::Data<AppState>,
    form: web::Json<BlockForm>,
) -> Result<HttpResponse, EngineError> {
    let start = parse_utc(&form.start_time_utc)?;
    let end = parse_utc(&form.end_time_utc)?;
    if start >= end {
        return Err(EngineError::Invalid(
            "Block start must be before its end.".to_string(),
        ));
    }

    let id = new_id();
    sqlx::query(
        r#"INSERT INTO time_blocks (id, start_time_utc, end_time_utc, note, created_at)
           VALUES (?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(fmt_utc(start))
    .bind(fmt_utc(end))
    .bind(&form.note)
    .bind(fmt_utc(Utc::now()))
    .execute(&state.db)
    .await?;

    Ok(HttpResponse::Ok().json(json!({ "ok": true, "block_id": id })))
}

async fn delete_block(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, EngineError> {
    let result = sqlx::query("DELETE FROM time_blocks WHERE id = ?")
        .bind(path.into_inner())
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(EngineError::NotFound);
    }
    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

async fn get_settings(state: web::Data<AppState>) -> Result<HttpResponse, EngineError> {
    let row = sqlx::query_as::<_, SettingsRow>("SELECT * FROM business_settings LIMIT 1")
        .fetch_optional(&state.db)
        .await?;

    match row {
        Some(row) => Ok(HttpResponse::Ok().json(json!({
            "time_zone": row.time_zone,
            "buffer_minutes": row.buffer_minutes,
            "late_grace_minutes": row.late_grace_minutes,
            "reschedule_min_hours": row.reschedule_min_hours,
            "deposit_cents_default": row.deposit_cents_default,
            "working_hours": serde_json::from_str::<serde_json::Value>(&row.working_hours_json)
                .unwrap_or_else(|_| json!({})),
            "address": row.address,
            "phone": row.phone,
            "policy_text": row.policy_text,
        }))),
        None => Err(EngineError::NotFound),
    }
}

#[derive(Deserialize)]
struct SettingsForm {
    time_zone: String,
    buffer_minutes: i64,
    late_grace_minutes: i64,
    reschedule_min_hours: i64,
    deposit_cents_default: i64,
    working_hours: serde_json::Value,
    address: Option<String>,
    phone: Option<String>,
    policy_text: Option<String>,
}

async fn put_settings(
    state: web::Data<AppState>,
    form: web::Json<SettingsForm>,
) -> Result<HttpResponse, EngineError> {
    let form = form.into_inner();

    // Reject malformed configuration here rather than at slot time.
    parse_zone(&form.time_zone).map_err(|_| {
        EngineError::Invalid(format!("Unknown time zone: {}", form.time_zone))
    })?;
    let working_hours_json = form.working_hours.to_string();
    WorkingHours::from_json(&working_hours_json)
        .map_err(|err| EngineError::Invalid(err.to_string()))?;
    if form.buffer_minutes < 0
        || form.late_grace_minutes < 0
        || form.reschedule_min_hours < 0
        || form.deposit_cents_default < 0
    {
        return Err(EngineError::Invalid(
            "Settings values must be non-negative.".to_string(),
        ));
    }

    let existing = sqlx::query_as::<_, (String,)>("SELECT id FROM business_settings LIMIT 1")
        .fetch_optional(&state.db)
        .await?;

    match existing {
        Some((id,)) => {
            sqlx::query(
                r#"UPDATE business_settings
                   SET time_zone = ?, buffer_minutes = ?, late_grace_minutes = ?,
                       reschedule_min_hours = ?, deposit_cents_default = ?,
                       working_hours_json = ?, address = ?, phone = ?, policy_text = ?
                   WHERE id = ?"#,
            )
            .bind(&form.time_zone)
            .bind(form.buffer_minutes)
            .bind(form.late_grace_minutes)
            .bind(form.reschedule_min_hours)
            .bind(form.deposit_cents_default)
            .bind(&working_hours_json)
            .bind(&form.address)
            .bind(&form.phone)
            .bind(&form.policy_text)
            .bind(id)
            .execute(&state.db)
            .await?;
        }
        None => {
            sqlx::query(
                r#"INSERT INTO business_settings
                     (id, time_zone, buffer_minutes, late_grace_minutes, reschedule_min_hours,
                      deposit_cents_default, working_hours_json, address, phone, policy_text, created_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(new_id())
            .bind(&form.time_zone)
            .bind(form.buffer_minutes)
            .bind(form.late_grace_minutes)
            .bind(form.reschedule_min_hours)
            .bind(form.deposit_cents_default)
            .bind(&working_hours_json)
            .bind(&form.address)
            .bind(&form.phone)
            .bind(&form.policy_text)
            .bind(fmt_utc(Utc::now()))
            .execute(&state.db)
            .await?;
        }
    }

    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

async fn list_services(state: web::Data<AppState>) -> Result<HttpResponse, EngineError> {
    let services =
        sqlx::query_as::<_, ServiceRow>("SELECT * FROM services ORDER BY name")
            .fetch_all(&state.db)
            .await?;
    Ok(HttpResponse::Ok().json(json!({ "services": services })))
}

#[derive(Deserialize)]
struct ServiceForm {
    name: String,
    duration_minutes: i64,
    price_display: String,
    #[serde(default)]
    price_cents: i64,
    #[serde(default)]
    direct_booking_only: bool,
    note: Option<String>,
    deposit_cents: i64,
    #[serde(default = "default_active")]
    active: bool,
}

fn default_active() -> bool {
    true
}

fn validate_service(form: &ServiceForm) -> Result<(), EngineError> {
    if form.name.trim().len() < 2 {
        return Err(EngineError::Invalid("Service name is required.".to_string()));
    }
    if form.duration_minutes < 15 {
        return Err(EngineError::Invalid(
            "Service duration must be at least 15 minutes.".to_string(),
        ));
    }
    if form.deposit_cents < 0 || form.price_cents < 0 {
        return Err(EngineError::Invalid(
            "Amounts must be non-negative.".to_string(),
        ));
    }
    Ok(())
}

async fn create_service(
    state: web::Data<AppState>,
    form: web::Json<ServiceForm>,
) -> Result<HttpResponse, EngineError> {
    let form = form.into_inner();
    validate_service(&form)?;

    let id = new_id();
    sqlx::query(
        r#"INSERT INTO services
             (id, name, duration_minutes, price_display, price_cents, direct_booking_only,
              note, deposit_cents, active, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(form.name.trim())
    .bind(form.duration_minutes)
    .bind(&form.price_display)
    .bind(form.price_cents)
    .bind(form.direct_booking_only as i64)
    .bind(&form.note)
    .bind(form.deposit_cents)
    .bind(form.active as i64)
    .bind(fmt_utc(Utc::now()))
    .execute(&state.db)
    .await?;

    Ok(HttpResponse::Ok().json(json!({ "ok": true, "service_id": id })))
}

async fn update_service(
    state: web::Data<AppState>,
    path: web::Path<String>,
    form: web::Json<ServiceForm>,
) -> Result<HttpResponse, EngineError> {
    let form = form.into_inner();
    validate_service(&form)?;

    let result = sqlx::query(
        r#"UPDATE services
           SET name = ?, duration_minutes = ?, price_display = ?, price_cents = ?,
               direct_booking_only = ?, note = ?, deposit_cents = ?, active = ?
           WHERE id = ?"#,
    )
    .bind(form.name.trim())
    .bind(form.duration_minutes)
    .bind(&form.price_display)
    .bind(form.price_cents)
    .bind(form.direct_booking_only as i64)
    .bind(&form.note)
    .bind(form.deposit_cents)
    .bind(form.active as i64)
    .bind(path.into_inner())
    .execute(&state.db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(EngineError::NotFound);
    }
    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}
