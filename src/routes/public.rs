use actix_web::{web, HttpResponse};
use chrono::{Duration, NaiveTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::{
    availability::{generate_slots, BusyWindow},
    error::EngineError,
    models::{AppointmentRow, BusyRow, ServiceRow, STATUS_BOOKED, STATUS_PENDING_PAYMENT},
    reservations::{self, HoldRequest},
    settings::{self, resolve_working_hours},
    state::AppState,
    timeutil::{fmt_utc, format_local, local_to_utc, parse_local_date, parse_utc},
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/services").route(web::get().to(list_services)))
        .service(web::resource("/api/availability").route(web::get().to(availability)))
        .service(
            web::resource("/api/appointments/checkout").route(web::post().to(checkout)),
        )
        .service(
            web::resource("/api/appointments/session").route(web::get().to(by_session)),
        )
        .service(
            web::resource("/api/appointments/{id}").route(web::get().to(appointment_view)),
        )
        .service(
            web::resource("/api/appointments/{id}/reschedule")
                .route(web::post().to(reschedule)),
        )
        .service(web::resource("/health").route(web::get().to(health)));
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

async fn list_services(state: web::Data<AppState>) -> Result<HttpResponse, EngineError> {
    let services = sqlx::query_as::<_, ServiceRow>(
        "SELECT * FROM services WHERE active = 1 ORDER BY name",
    )
    .fetch_all(&state.db)
    .await?;
    Ok(HttpResponse::Ok().json(json!({ "services": services })))
}

#[derive(Deserialize)]
struct AvailabilityQuery {
    date: String,
    service_id: String,
}

async fn availability(
    state: web::Data<AppState>,
    query: web::Query<AvailabilityQuery>,
) -> Result<HttpResponse, EngineError> {
    let settings = settings::load_settings(&state.db).await?;

    let service = sqlx::query_as::<_, ServiceRow>(
        "SELECT * FROM services WHERE id = ? AND active = 1",
    )
    .bind(&query.service_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or(EngineError::NotFound)?;

    if service.direct_booking_only != 0 {
        return Ok(HttpResponse::Ok().json(json!({ "slots": [] })));
    }

    let date = parse_local_date(&query.date)?;
    let day_start = local_to_utc(date.and_time(NaiveTime::MIN), settings.time_zone)
        .ok_or_else(|| EngineError::Invalid(format!("Invalid date: {}", query.date)))?;
    let next_day = date
        .succ_opt()
        .ok_or_else(|| EngineError::Invalid(format!("Invalid date: {}", query.date)))?;
    let day_end = local_to_utc(next_day.and_time(NaiveTime::MIN), settings.time_zone)
        .ok_or_else(|| EngineError::Invalid(format!("Invalid date: {}", query.date)))?;

    let now = Utc::now();

    // Padded by a day of buffer headroom so an occupying interval whose
    // buffered window leaks into this date is still seen.
    let scan_start = fmt_utc(day_start - Duration::days(1));
    let scan_end = fmt_utc(day_end + Duration::days(1));

    let occupying = sqlx::query_as::<_, BusyRow>(
        r#"SELECT start_time_utc, end_time_utc FROM appointments
           WHERE start_time_utc < ? AND end_time_utc > ?
             AND (status = ? OR (status = ? AND hold_expires_at_utc > ?))"#,
    )
    .bind(&scan_end)
    .bind(&scan_start)
    .bind(STATUS_BOOKED)
    .bind(STATUS_PENDING_PAYMENT)
    .bind(fmt_utc(now))
    .fetch_all(&state.db)
    .await?;

    let blocks = sqlx::query_as::<_, BusyRow>(
        "SELECT start_time_utc, end_time_utc FROM time_blocks WHERE start_time_utc < ? AND end_time_utc > ?",
    )
    .bind(&scan_end)
    .bind(&scan_start)
    .fetch_all(&state.db)
    .await?;

    let mut busy = Vec::with_capacity(occupying.len() + blocks.len());
    for row in occupying.into_iter().chain(blocks) {
        busy.push(BusyWindow {
            start: parse_utc(&row.start_time_utc)?,
            end: parse_utc(&row.end_time_utc)?,
        });
    }

    let hours = resolve_working_hours(date, &settings);
    let slots = generate_slots(
        date,
        settings.time_zone,
        hours,
        service.duration_minutes,
        settings.buffer_minutes,
        &busy,
        now,
    );

    Ok(HttpResponse::Ok().json(json!({ "slots": slots })))
}

#[derive(Deserialize)]
struct CheckoutForm {
    service_id: String,
    start_time_local: String,
    full_name: String,
    phone_e164: String,
    #[serde(default)]
    sms_opt_in: bool,
}

async fn checkout(
    state: web::Data<AppState>,
    form: web::Json<CheckoutForm>,
) -> Result<HttpResponse, EngineError> {
    let form = form.into_inner();
    let settings = settings::load_settings(&state.db).await?;

    let request = HoldRequest {
        service_id: form.service_id,
        start_time_local: form.start_time_local,
        full_name: form.full_name,
        phone_e164: form.phone_e164,
        sms_opt_in: form.sms_opt_in,
    };
    let receipt = reservations::create_hold(&state.db, &settings, &request, Utc::now()).await?;

    Ok(HttpResponse::Ok().json(json!({
        "appointment_id": receipt.appointment_id,
        "start_time_utc": receipt.start_time_utc,
        "hold_expires_at_utc": receipt.hold_expires_at_utc,
        "deposit_cents": receipt.deposit_cents,
        "currency": receipt.currency,
    })))
}

#[derive(Deserialize)]
struct SessionQuery {
    session_id: String,
}

async fn by_session(
    state: web::Data<AppState>,
    query: web::Query<SessionQuery>,
) -> Result<HttpResponse, EngineError> {
    let row = sqlx::query_as::<_, (String, String, String)>(
        r#"SELECT a.id, a.service_id, a.start_time_utc
           FROM payments p JOIN appointments a ON p.appointment_id = a.id
           WHERE p.checkout_session_id = ?"#,
    )
    .bind(&query.session_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or(EngineError::NotFound)?;

    Ok(HttpResponse::Ok().json(json!({
        "appointment_id": row.0,
        "service_id": row.1,
        "start_time_utc": row.2,
    })))
}

async fn appointment_view(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, EngineError> {
    let appointment_id = path.into_inner();
    let settings = settings::load_settings(&state.db).await?;

    let appointment = sqlx::query_as::<_, AppointmentRow>(
        "SELECT * FROM appointments WHERE id = ?",
    )
    .bind(&appointment_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or(EngineError::NotFound)?;

    let service_name = sqlx::query_as::<_, (String,)>("SELECT name FROM services WHERE id = ?")
        .bind(&appointment.service_id)
        .fetch_optional(&state.db)
        .await?
        .map(|row| row.0)
        .unwrap_or_default();

    let start = parse_utc(&appointment.start_time_utc)?;
    let deadline = parse_utc(&appointment.reschedule_deadline_utc)?;
    let can_reschedule = appointment.status == STATUS_BOOKED
        && reservations::is_reschedule_allowed(deadline, Utc::now());

    Ok(HttpResponse::Ok().json(json!({
        "appointment_id": appointment.id,
        "status": appointment.status,
        "service_name": service_name,
        "start_time_utc": appointment.start_time_utc,
        "start_time_label": format_local(start, settings.time_zone),
        "reschedule_deadline_utc": appointment.reschedule_deadline_utc,
        "can_reschedule": can_reschedule,
        "rescheduled_from_appointment_id": appointment.rescheduled_from_appointment_id,
    })))
}

#[derive(Deserialize)]
struct RescheduleForm {
    start_time_local: String,
}

async fn reschedule(
    state: web::Data<AppState>,
    path: web::Path<String>,
    form: web::Json<RescheduleForm>,
) -> Result<HttpResponse, EngineError> {
    let appointment_id = path.into_inner();
    let settings = settings::load_settings(&state.db).await?;

    let receipt = reservations::reschedule(
        &state.db,
        &settings,
        state.messenger.as_ref(),
        &appointment_id,
        &form.start_time_local,
        Utc::now(),
    )
    .await?;

    Ok(HttpResponse::Ok().json(json!({
        "ok": true,
        "appointment_id": receipt.appointment_id,
        "start_time_utc": receipt.start_time_utc,
    })))
}
