use std::env;
use std::str::FromStr;
use std::sync::Arc;

use actix_web::{middleware, web, App, HttpServer};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use chairbook::notices::LogMessenger;
use chairbook::state::AppState;
use chairbook::{db, routes, sweeps};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    if let Err(err) = run().await {
        eprintln!("Startup error: {err}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .init();

    let db_url =
        env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://./data/chairbook.db".to_string());
    db::ensure_sqlite_dir(&db_url)?;

    let connect_options = SqliteConnectOptions::from_str(&db_url)?.create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect_options)
        .await?;

    db::run_migrations(&pool).await?;
    db::seed_defaults(&pool).await?;

    let webhook_secret = env::var("PAYMENT_WEBHOOK_SECRET").unwrap_or_default();
    if webhook_secret.is_empty() {
        log::warn!("PAYMENT_WEBHOOK_SECRET not set. Payment webhooks will be rejected.");
    }

    let demo_mode = env::var("DEMO_MODE").map(|value| value == "true").unwrap_or(false);
    let state = AppState {
        db: pool.clone(),
        webhook_secret,
        messenger: Arc::new(LogMessenger { demo: demo_mode }),
    };

    let sweep_interval: u64 = env::var("SWEEP_INTERVAL_SECS")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(120);
    sweeps::spawn(state.clone(), sweep_interval);

    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8080);

    let address = format!("0.0.0.0:{port}");
    log::info!("Starting Chairbook on http://{address}");

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(middleware::Logger::default())
            .configure(routes::public::configure)
            .configure(routes::admin::configure)
            .configure(routes::webhooks::configure)
    })
    .bind(address)?
    .run()
    .await?;

    Ok(())
}
