// POST /api/signup — validate the beta-signup form and relay it.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use tracing::error;

use crate::signup::{SignupForm, RETRY_MESSAGE};
use crate::web::{api_error, AppState};

pub async fn post_signup(State(state): State<AppState>, Form(form): Form<SignupForm>) -> Response {
    if let Err(e) = form.validate() {
        return api_error(StatusCode::UNPROCESSABLE_ENTITY, &e.to_string());
    }

    let Some(capture) = state.signup.as_ref() else {
        error!("Signup received but HANDL_FORM_ENDPOINT is not set");
        return api_error(StatusCode::BAD_GATEWAY, RETRY_MESSAGE);
    };

    match capture.submit(&form).await {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(e) => {
            error!("Signup relay failed: {e:#}");
            api_error(StatusCode::BAD_GATEWAY, RETRY_MESSAGE)
        }
    }
}
