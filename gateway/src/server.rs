//! HTTP API for the discovery protocol
//!
//! Thin axum layer over [`DiscoveryService`]: extract path/query/body and
//! the caller's network origin, delegate, and wrap mutating results in
//! the `{meta, data: {result}}` envelope. Tokens travel as the `token`
//! query parameter on every operation after initial registration.
//!
//! # Endpoints
//!
//! - `GET  /api/v1/discovery` - full tree, recursively serialized
//! - `POST /api/v1/discovery` - register / token refresh
//! - `GET  /api/v1/discovery/{id}?token=` - check registration
//! - `POST /api/v1/discovery/{id}?token=` - publish subtree
//! - `DELETE /api/v1/discovery/{id}?token=` - deregister
//! - `GET  /api/v1/discovery_plugins[?realm=]` - flat plugin list
//! - `GET  /api/v1/discovery_plugins/{id}` - one plugin
//! - `GET  /health` - liveness of the gateway itself

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use vahti_core::{ApiEnvelope, DiscoveryNode, RegistrationRequest};

use crate::error::DiscoveryError;
use crate::registration::{DiscoveryService, PluginSummary};

/// Proxy-supplied client origin header, consulted before the transport
/// peer address
const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Build the API router
pub fn router(service: Arc<DiscoveryService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/discovery", get(get_tree).post(register))
        .route(
            "/api/v1/discovery/{id}",
            get(check_registration).post(publish).delete(deregister),
        )
        .route("/api/v1/discovery_plugins", get(list_plugins))
        .route("/api/v1/discovery_plugins/{id}", get(get_plugin))
        .with_state(service)
}

#[derive(Deserialize)]
struct TokenQuery {
    token: String,
}

#[derive(Deserialize)]
struct RealmQuery {
    realm: Option<String>,
}

/// Resolve the caller's network origin
///
/// First non-empty wins: the proxy-forwarded header (first hop of a
/// comma-separated chain), else the direct transport peer. An
/// unparseable header degrades to the peer address.
fn remote_origin(headers: &HeaderMap, peer: SocketAddr) -> Option<IpAddr> {
    headers
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(|value| value.parse().ok())
        .or(Some(peer.ip()))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn get_tree(State(service): State<Arc<DiscoveryService>>) -> Json<DiscoveryNode> {
    Json(service.tree())
}

async fn register(
    State(service): State<Arc<DiscoveryService>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<RegistrationRequest>,
) -> Result<impl IntoResponse, DiscoveryError> {
    let remote = remote_origin(&headers, peer);
    let reply = service.register(request, remote)?;
    let location = service.plugin_location(&reply.id)?;
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location.to_string())],
        Json(ApiEnvelope::ok(reply)),
    ))
}

async fn check_registration(
    State(service): State<Arc<DiscoveryService>>,
    Path(id): Path<String>,
    Query(query): Query<TokenQuery>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<StatusCode, DiscoveryError> {
    let remote = remote_origin(&headers, peer);
    service.check_registration(&id, &query.token, remote)?;
    Ok(StatusCode::OK)
}

async fn publish(
    State(service): State<Arc<DiscoveryService>>,
    Path(id): Path<String>,
    Query(query): Query<TokenQuery>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(subtree): Json<Vec<DiscoveryNode>>,
) -> Result<Json<ApiEnvelope<String>>, DiscoveryError> {
    let remote = remote_origin(&headers, peer);
    let id = service.publish(&id, &query.token, remote, subtree)?;
    Ok(Json(ApiEnvelope::ok(id)))
}

async fn deregister(
    State(service): State<Arc<DiscoveryService>>,
    Path(id): Path<String>,
    Query(query): Query<TokenQuery>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<ApiEnvelope<String>>, DiscoveryError> {
    let remote = remote_origin(&headers, peer);
    let id = service.deregister(&id, &query.token, remote)?;
    Ok(Json(ApiEnvelope::ok(id)))
}

async fn list_plugins(
    State(service): State<Arc<DiscoveryService>>,
    Query(query): Query<RealmQuery>,
) -> Json<Vec<PluginSummary>> {
    Json(service.list_plugins(query.realm.as_deref()))
}

async fn get_plugin(
    State(service): State<Arc<DiscoveryService>>,
    Path(id): Path<String>,
) -> Result<Json<PluginSummary>, DiscoveryError> {
    Ok(Json(service.get_plugin(&id)?))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "192.0.2.10:49152".parse().unwrap()
    }

    #[test]
    fn test_origin_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, "10.0.0.7".parse().unwrap());

        assert_eq!(
            remote_origin(&headers, peer()),
            Some("10.0.0.7".parse().unwrap())
        );
    }

    #[test]
    fn test_origin_takes_first_hop_of_forwarded_chain() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, "10.0.0.7, 172.16.0.1".parse().unwrap());

        assert_eq!(
            remote_origin(&headers, peer()),
            Some("10.0.0.7".parse().unwrap())
        );
    }

    #[test]
    fn test_origin_falls_back_to_peer() {
        let headers = HeaderMap::new();
        assert_eq!(remote_origin(&headers, peer()), Some(peer().ip()));
    }

    #[test]
    fn test_origin_degrades_gracefully_on_garbage_header() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, "not-an-address".parse().unwrap());

        assert_eq!(remote_origin(&headers, peer()), Some(peer().ip()));
    }

    #[test]
    fn test_origin_ignores_empty_header() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, "  ".parse().unwrap());

        assert_eq!(remote_origin(&headers, peer()), Some(peer().ip()));
    }
}
