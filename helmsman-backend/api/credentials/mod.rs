pub mod handlers;

use axum::Router;
use axum::routing::{get, post};

use crate::api::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        // Static segments before the capture routes.
        .route("/credentials/exchange", post(handlers::exchange_token))
        .route("/credentials/endpoints", get(handlers::list_endpoints))
        .route("/credentials/tls/expiring", get(handlers::list_expiring_tls))
        // One capture segment doing double duty: POST /credentials/{kind}
        // creates, the other verbs address /credentials/{id}.
        .route(
            "/credentials/{id}",
            post(handlers::create_credential)
                .get(handlers::get_credential)
                .put(handlers::update_credential)
                .delete(handlers::delete_credential),
        )
        .route(
            "/credentials/{id}/connection",
            get(handlers::connection_info),
        )
}
