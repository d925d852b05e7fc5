use std::{env, fs, path::Path};

use chrono::Utc;
use sqlx::SqlitePool;

use crate::{
    auth::{hash_password, new_id},
    models::ROLE_ADMIN,
    settings::DEFAULT_TIME_ZONE,
    timeutil::fmt_utc,
};

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

pub fn ensure_sqlite_dir(db_url: &str) -> std::io::Result<()> {
    let path = if let Some(path) = db_url.strip_prefix("sqlite://") {
        Some(path)
    } else if let Some(path) = db_url.strip_prefix("sqlite:") {
        Some(path)
    } else {
        None
    };

    let Some(path) = path else {
        return Ok(());
    };

    let path = path.split('?').next().unwrap_or(path);
    if path == ":memory:" || path.is_empty() {
        return Ok(());
    }

    let path = path.strip_prefix("file:").unwrap_or(path);
    let db_path = Path::new(path);
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub async fn seed_defaults(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    seed_admin(pool).await?;
    seed_settings(pool).await?;
    seed_services(pool).await?;
    Ok(())
}

async fn seed_admin(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let existing =
        sqlx::query_as::<_, (String,)>("SELECT id FROM users WHERE role = ? LIMIT 1")
            .bind(ROLE_ADMIN)
            .fetch_optional(pool)
            .await?;

    if existing.is_some() {
        return Ok(());
    }

    let username = env::var("ADMIN_USER").unwrap_or_else(|_| "admin".to_string());
    let password = env::var("ADMIN_PASSWORD").unwrap_or_else(|_| "admin".to_string());
    let display_name =
        env::var("ADMIN_DISPLAY_NAME").unwrap_or_else(|_| "Shop Admin".to_string());

    if password == "admin" {
        log::warn!("ADMIN_PASSWORD not set. Using default password 'admin'. Set ADMIN_PASSWORD in production.");
    }

    let password_hash = hash_password(&password)
        .map_err(|_| sqlx::Error::Protocol("password hash failed".into()))?;

    sqlx::query(
        r#"INSERT INTO users (id, username, display_name, role, password_hash, active, created_at)
           VALUES (?, ?, ?, ?, ?, 1, ?)"#,
    )
    .bind(new_id())
    .bind(username)
    .bind(display_name)
    .bind(ROLE_ADMIN)
    .bind(password_hash)
    .bind(fmt_utc(Utc::now()))
    .execute(pool)
    .await?;

    Ok(())
}

async fn seed_settings(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let existing = sqlx::query_as::<_, (String,)>("SELECT id FROM business_settings LIMIT 1")
        .fetch_optional(pool)
        .await?;
    if existing.is_some() {
        return Ok(());
    }

    let working_hours = r#"{
  "Tuesday": [{"start": "10:00", "end": "18:00"}],
  "Wednesday": [{"start": "10:00", "end": "18:00"}],
  "Thursday": [{"start": "10:00", "end": "18:00"}],
  "Friday": [{"start": "10:00", "end": "19:00"}],
  "Saturday": [{"start": "09:00", "end": "17:00"}]
}"#;

    sqlx::query(
        r#"INSERT INTO business_settings
             (id, time_zone, buffer_minutes, late_grace_minutes, reschedule_min_hours,
              deposit_cents_default, working_hours_json, address, phone, policy_text, created_at)
           VALUES (?, ?, 0, 15, 72, 2000, ?, NULL, NULL, NULL, ?)"#,
    )
    .bind(new_id())
    .bind(DEFAULT_TIME_ZONE)
    .bind(working_hours)
    .bind(fmt_utc(Utc::now()))
    .execute(pool)
    .await?;

    Ok(())
}

async fn seed_services(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let existing = sqlx::query_as::<_, (String,)>("SELECT id FROM services LIMIT 1")
        .fetch_optional(pool)
        .await?;
    if existing.is_some() {
        return Ok(());
    }

    let services = [
        ("Signature Cut", 45, "$40", 4000, 0, "Precision cut, styling, and lineup."),
        ("Fade & Line-Up", 35, "$35", 3500, 0, "Skin fade with sharp finishing touches."),
        ("Beard Sculpt", 25, "$25", 2500, 0, "Shape, trim, and conditioning for the beard."),
        ("Full Grooming", 60, "$65", 6500, 0, "Cut, beard, and grooming refresh."),
        ("House Call", 90, "from $120", 12000, 1, "Travel service, scheduled directly with the shop."),
    ];

    for (name, duration, price_display, price_cents, direct_only, note) in services {
        sqlx::query(
            r#"INSERT INTO services
                 (id, name, duration_minutes, price_display, price_cents, direct_booking_only,
                  note, deposit_cents, active, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, 2000, 1, ?)"#,
        )
        .bind(new_id())
        .bind(name)
        .bind(duration)
        .bind(price_display)
        .bind(price_cents)
        .bind(direct_only)
        .bind(note)
        .bind(fmt_utc(Utc::now()))
        .execute(pool)
        .await?;
    }

    Ok(())
}
