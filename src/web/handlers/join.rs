// POST /api/join — deep link (303) for iOS, signup prompt for everyone else.
//
// The click record is dispatched before responding and never awaited. It is
// recorded against the client's address: the first `X-Forwarded-For` hop
// when behind a proxy, otherwise the socket peer.

use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, Extensions, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;

use crate::join::JoinOutcome;
use crate::web::{api_error, AppState};

const FORWARDED_FOR: &str = "x-forwarded-for";

pub async fn post_join(State(state): State<AppState>, request: Request) -> Response {
    let Some(flow) = state.join.as_ref() else {
        return api_error(StatusCode::SERVICE_UNAVAILABLE, "Join link not configured");
    };

    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let visitor_ip = client_ip(request.headers(), request.extensions());

    match flow.join(user_agent, visitor_ip) {
        JoinOutcome::DeepLink(url) => Redirect::to(&url).into_response(),
        JoinOutcome::ShowSignup => {
            Json(serde_json::json!({ "action": "signup" })).into_response()
        }
    }
}

/// Address of the client that made the request, if it can be told.
pub fn client_ip(headers: &HeaderMap, extensions: &Extensions) -> Option<IpAddr> {
    let forwarded = headers
        .get(FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|hop| hop.trim().parse::<IpAddr>().ok());

    forwarded.or_else(|| {
        extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    })
}
