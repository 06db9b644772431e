//! Inbound HTTP surface: turns routing decisions into forwarded requests.
//!
//! Everything that is not the fixed error path is handed to the routing
//! engine and then streamed to the chosen backend over the shared pooled
//! client. Long-poll requests are never timed out here.

use crate::config::RouterSettings;
use crate::core::engine::{ProvisionRequest, RouteOutcome, RoutingEngine};
use crate::core::profile::HttpProfileResolver;
use crate::core::registration::HttpRegistrationNotifier;
use crate::core::shard::ThreadRandom;
use crate::domain::model::RoutingDecision;
use crate::utils::error::{Result, RouterError};
use axum::body::{Body, HttpBody};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{
    header, request::Parts, HeaderMap, HeaderName, HeaderValue, StatusCode, Version,
};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

pub const AUTH_ERROR_PATH: &str = "/auth-error";

const MAX_FORM_BODY_BYTES: usize = 1024 * 1024;

const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");
const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
const FORWARDED: HeaderName = HeaderName::from_static("forwarded");

const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Clone)]
pub struct ProxyState {
    engine: Arc<RoutingEngine>,
    client: Client,
}

impl ProxyState {
    pub fn new(engine: RoutingEngine, client: Client) -> Self {
        Self {
            engine: Arc::new(engine),
            client,
        }
    }

    /// Wires the HTTP-backed collaborators around one shared client.
    pub fn from_settings(settings: &RouterSettings) -> Result<Self> {
        let client = build_http_client(settings.idle_timeout)?;
        let profiles = HttpProfileResolver::new(
            client.clone(),
            settings.profile_api_url.clone(),
            settings.profile_timeout,
        );
        let registrar = HttpRegistrationNotifier::new(
            client.clone(),
            settings.registration_api_url.clone(),
            settings.registration_timeout,
        );
        let engine = RoutingEngine::new(
            Arc::clone(&settings.topology),
            Arc::new(profiles),
            Arc::new(registrar),
            Arc::new(ThreadRandom),
        );
        Ok(Self::new(engine, client))
    }
}

/// Shared client for profile lookups, registrations and backend dispatch.
///
/// No overall request timeout: backend exchanges may stay open for minutes.
/// Per-call bounds are applied by the callers that need them.
pub fn build_http_client(idle_timeout: Duration) -> Result<Client> {
    Client::builder()
        .pool_idle_timeout(idle_timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(RouterError::from)
}

pub fn build_router(state: ProxyState) -> Router {
    Router::new()
        .route(AUTH_ERROR_PATH, any(auth_error))
        .fallback(proxy_request)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// The single terminal error surface for unresolved routes.
pub async fn auth_error() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [
            (header::CONNECTION, "close"),
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
        ],
        "Authentication Error\n",
    )
        .into_response()
}

fn bad_gateway() -> Response {
    (
        StatusCode::BAD_GATEWAY,
        [(header::CONNECTION, "close")],
        "Bad Gateway\n",
    )
        .into_response()
}

/// Username from an `Authorization: Basic` header. The password is ignored.
pub fn basic_auth_username(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = replace_invalid_bytes(&decoded);
    let (username, _password) = decoded.split_once(':')?;
    Some(username.to_string())
}

/// Decodes UTF-8, substituting one U+FFFD for every invalid byte (not one per
/// invalid sequence). Shard placement depends on the resulting code points.
fn replace_invalid_bytes(mut bytes: &[u8]) -> String {
    let mut decoded = String::with_capacity(bytes.len());
    loop {
        match std::str::from_utf8(bytes) {
            Ok(valid) => {
                decoded.push_str(valid);
                return decoded;
            }
            Err(e) => {
                let (valid, rest) = bytes.split_at(e.valid_up_to());
                decoded.push_str(std::str::from_utf8(valid).unwrap_or_default());
                decoded.push(char::REPLACEMENT_CHARACTER);
                bytes = rest.get(1..).unwrap_or_default();
            }
        }
    }
}

fn has_connection_token(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// Whether the client asked for its connection to end after this exchange.
fn client_closes(parts: &Parts) -> bool {
    has_connection_token(&parts.headers, "close")
        || (parts.version == Version::HTTP_10
            && !has_connection_token(&parts.headers, "keep-alive"))
}

/// Form bodies small enough to inspect for the provisioning marker.
fn bufferable_form(headers: &HeaderMap) -> bool {
    is_form_encoded(headers)
        && headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<usize>().ok())
            .is_some_and(|len| len <= MAX_FORM_BODY_BYTES)
}

fn is_form_encoded(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.trim_start()
                .to_ascii_lowercase()
                .starts_with("application/x-www-form-urlencoded")
        })
        .unwrap_or(false)
}

/// Device metadata when the request carries `Cmd=Provision`.
///
/// Body fields win over query fields of the same name.
pub fn provision_request(query: Option<&str>, form_body: Option<&[u8]>) -> Option<ProvisionRequest> {
    let mut fields: HashMap<String, String> = HashMap::new();
    let sources = query
        .map(str::as_bytes)
        .into_iter()
        .chain(form_body);
    for source in sources {
        for (key, value) in url::form_urlencoded::parse(source) {
            fields.insert(key.into_owned(), value.into_owned());
        }
    }

    let command = fields.get("Cmd")?;
    if !command.eq_ignore_ascii_case("provision") {
        return None;
    }

    let mut take = |key: &str| fields.remove(key).unwrap_or_default();
    Some(ProvisionRequest {
        device_type: take("DeviceType"),
        device_id: take("DeviceId"),
        device_name: take("DeviceName"),
    })
}

fn inbound_host(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| parts.uri.authority().map(|a| a.as_str().to_string()))
}

/// Builds the header set sent to the backend.
///
/// The backend sees the host the client dialed, the caller's `Connection`
/// value, and the client address. The first `X-Forwarded-For` entry is
/// trusted verbatim.
pub fn outbound_headers(
    inbound: &HeaderMap,
    remote_ip: Option<IpAddr>,
    host: Option<&str>,
) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(inbound.len() + 4);
    for (name, value) in inbound {
        let lower = name.as_str();
        if HOP_BY_HOP.contains(&lower)
            || name == header::HOST
            || name == X_REAL_IP
            || name == X_FORWARDED_FOR
            || name == X_FORWARDED_HOST
            || name == X_FORWARDED_PROTO
            || name == FORWARDED
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    let prior_xff = inbound
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join(", ");
    let first_hop = prior_xff
        .split(',')
        .map(str::trim)
        .find(|hop| !hop.is_empty())
        .map(str::to_string);
    let remote = remote_ip.map(|ip| ip.to_string());

    if let Some(client_ip) = first_hop.clone().or_else(|| remote.clone()) {
        if let Ok(value) = HeaderValue::from_str(&client_ip) {
            headers.insert(X_REAL_IP, value);
        }
    }

    let forwarded_for = match (prior_xff.trim().is_empty(), remote) {
        (false, Some(remote)) => Some(format!("{}, {}", prior_xff, remote)),
        (false, None) => Some(prior_xff),
        (true, remote) => remote,
    };
    if let Some(value) = forwarded_for.and_then(|v| HeaderValue::from_str(&v).ok()) {
        headers.insert(X_FORWARDED_FOR, value);
    }

    if let Some(value) = host.and_then(|h| HeaderValue::from_str(h).ok()) {
        headers.insert(header::HOST, value.clone());
        headers.insert(X_FORWARDED_HOST, value);
    }
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));

    if let Some(connection) = inbound.get(header::CONNECTION) {
        headers.insert(header::CONNECTION, connection.clone());
    }

    headers
}

/// Keep the client connection only after a successful exchange, and never
/// when the client already asked to close it.
pub fn finalize_response_headers(
    status: StatusCode,
    client_closes: bool,
    headers: &mut HeaderMap,
) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    let connection = if status.is_success() && !client_closes {
        "keep-alive"
    } else {
        "close"
    };
    headers.insert(header::CONNECTION, HeaderValue::from_static(connection));
}

pub async fn proxy_request(State(state): State<ProxyState>, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let remote_ip = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let username = basic_auth_username(&parts.headers);

    let decision = match state.engine.route(username.as_deref()).await {
        RouteOutcome::Forward(decision) => decision,
        RouteOutcome::Reject(_) => return auth_error().await,
    };

    // Larger or unsized form bodies are streamed; only the query is inspected.
    let outbound_body = match username.as_deref() {
        Some(username) if bufferable_form(&parts.headers) => {
            let bytes = match axum::body::to_bytes(body, MAX_FORM_BODY_BYTES).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(username, error = %e, "failed to read form body");
                    return bad_gateway();
                }
            };
            if let Some(request) = provision_request(parts.uri.query(), Some(&bytes)) {
                state.engine.notify_provisioning(username, request, &decision);
            }
            Some(reqwest::Body::from(bytes))
        }
        Some(username) => {
            if let Some(request) = provision_request(parts.uri.query(), None) {
                state.engine.notify_provisioning(username, request, &decision);
            }
            streaming_body(body)
        }
        None => streaming_body(body),
    };

    dispatch(&state.client, &parts, &decision, remote_ip, outbound_body).await
}

fn streaming_body(body: Body) -> Option<reqwest::Body> {
    if body.size_hint().exact() == Some(0) {
        return None;
    }
    Some(reqwest::Body::wrap_stream(body.into_data_stream()))
}

async fn dispatch(
    client: &Client,
    parts: &Parts,
    decision: &RoutingDecision,
    remote_ip: Option<IpAddr>,
    body: Option<reqwest::Body>,
) -> Response {
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!(
        "{}://{}{}",
        decision.scheme, decision.target_host, path_and_query
    );
    let host = inbound_host(parts);
    let headers = outbound_headers(&parts.headers, remote_ip, host.as_deref());

    tracing::debug!(url = %url, reason = %decision.reason, "proxying");

    let mut request = client.request(parts.method.clone(), &url).headers(headers);
    if let Some(body) = body {
        request = request.body(body);
    }

    match request.send().await {
        Ok(response) => backend_response(response, client_closes(parts)),
        Err(e) => {
            let err = RouterError::BackendDispatchFailed {
                target: decision.target_host.clone(),
                reason: e.to_string(),
            };
            tracing::error!(error = %err, "backend dispatch failed");
            bad_gateway()
        }
    }
}

fn backend_response(response: reqwest::Response, client_closes: bool) -> Response {
    let status = response.status();
    let mut headers = response.headers().clone();
    finalize_response_headers(status, client_closes, &mut headers);

    let mut proxied = Response::new(Body::from_stream(response.bytes_stream()));
    *proxied.status_mut() = status;
    *proxied.headers_mut() = headers;
    proxied
}
