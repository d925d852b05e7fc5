use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;

use crate::{
    error::EngineError,
    settings,
    settlement::{self, SettlementEvent},
    state::AppState,
};

const SIGNATURE_HEADER: &str = "x-payment-signature";

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/payments/webhook").route(web::post().to(payment_webhook)));
}

/// Payment-confirmation delivery endpoint.
///
/// Cryptographic verification of the provider's payload lives with the
/// payment collaborator; at this boundary the delivery must carry the shared
/// secret agreed with it, otherwise the event is not trusted at all.
async fn payment_webhook(
    state: web::Data<AppState>,
    req: HttpRequest,
    event: web::Json<SettlementEvent>,
) -> Result<HttpResponse, EngineError> {
    let signature = req
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if state.webhook_secret.is_empty() || signature != state.webhook_secret {
        log::warn!("Rejected payment webhook with bad or missing signature");
        return Err(EngineError::Invalid("Invalid signature".to_string()));
    }

    let settings = settings::load_settings(&state.db).await?;
    settlement::apply_settlement(
        &state.db,
        &settings,
        state.messenger.as_ref(),
        &event.into_inner(),
    )
    .await?;

    Ok(HttpResponse::Ok().json(json!({ "received": true })))
}
