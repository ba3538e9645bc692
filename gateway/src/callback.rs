//! Outbound callback client for registered plugins
//!
//! The gateway periodically calls back into each plugin at the callback
//! URI it registered with: a `GET` to probe liveness (`ping`) and a
//! `POST` to ask the plugin to re-publish its full subtree (`refresh`).
//! Any failure - connect error, timeout, non-2xx - is one
//! [`CallbackError`], and every [`CallbackError`] ends in the plugin
//! being pruned.
//!
//! Requests are bounded by the timeout configured on the shared
//! `reqwest::Client`; a timeout surfaces as a request error like any
//! other network failure.

use reqwest::{RequestBuilder, StatusCode};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::store::Credential;

/// A failed callback invocation
#[derive(Error, Debug)]
pub enum CallbackError {
    /// Network-level failure: connect error, timeout, DNS
    #[error("callback request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The plugin answered with a non-2xx status
    #[error("callback returned status {0}")]
    Status(StatusCode),
}

/// Client for one plugin's callback endpoint
pub struct PluginCallback {
    client: reqwest::Client,
    callback: Url,
    credential: Option<Credential>,
}

impl PluginCallback {
    /// Create a callback client
    ///
    /// `client` is the shared HTTP client (it carries the configured
    /// request timeout); `credential` is the plugin's stored callback
    /// authorization, if any.
    pub fn new(client: reqwest::Client, callback: Url, credential: Option<Credential>) -> Self {
        Self {
            client,
            callback,
            credential,
        }
    }

    /// Lightweight liveness probe
    pub async fn ping(&self) -> Result<(), CallbackError> {
        debug!(callback = %self.callback, "Pinging plugin");
        let request = self.authorized(self.client.get(self.callback.clone()));
        Self::expect_success(request.send().await?)
    }

    /// Ask the plugin to re-publish its full subtree
    pub async fn refresh(&self) -> Result<(), CallbackError> {
        debug!(callback = %self.callback, "Requesting plugin refresh");
        let request = self.authorized(self.client.post(self.callback.clone()));
        Self::expect_success(request.send().await?)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credential {
            Some(cred) => request.basic_auth(&cred.username, Some(&cred.password)),
            None => request,
        }
    }

    fn expect_success(response: reqwest::Response) -> Result<(), CallbackError> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(CallbackError::Status(status))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;
    use axum::routing::{get, post};
    use axum::Router;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    async fn start_stub(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        addr
    }

    fn client() -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_millis(500))
            .build()
            .unwrap()
    }

    fn callback_url(addr: SocketAddr) -> Url {
        format!("http://{addr}/callback").parse().unwrap()
    }

    #[tokio::test]
    async fn test_ping_hits_get() {
        let pings = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&pings);
        let addr = start_stub(Router::new().route(
            "/callback",
            get(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { "ok" }
            }),
        ))
        .await;

        let cb = PluginCallback::new(client(), callback_url(addr), None);
        cb.ping().await.unwrap();
        assert_eq!(pings.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_hits_post() {
        let addr = start_stub(Router::new().route("/callback", post(|| async { "ok" }))).await;

        let cb = PluginCallback::new(client(), callback_url(addr), None);
        cb.refresh().await.unwrap();
    }

    #[tokio::test]
    async fn test_non_2xx_is_a_failure() {
        let addr = start_stub(Router::new().route(
            "/callback",
            get(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        ))
        .await;

        let cb = PluginCallback::new(client(), callback_url(addr), None);
        let err = cb.ping().await.unwrap_err();
        assert!(matches!(
            err,
            CallbackError::Status(StatusCode::INTERNAL_SERVER_ERROR)
        ));
    }

    #[tokio::test]
    async fn test_unreachable_plugin_is_a_failure() {
        let cb = PluginCallback::new(
            client(),
            "http://127.0.0.1:59998/callback".parse().unwrap(),
            None,
        );
        let err = cb.ping().await.unwrap_err();
        assert!(matches!(err, CallbackError::Request(_)));
    }

    #[tokio::test]
    async fn test_credential_becomes_basic_auth_header() {
        let addr = start_stub(Router::new().route(
            "/callback",
            get(|headers: HeaderMap| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                if auth.starts_with("Basic ") {
                    (axum::http::StatusCode::OK, "ok")
                } else {
                    (axum::http::StatusCode::UNAUTHORIZED, "no auth")
                }
            }),
        ))
        .await;

        let anonymous = PluginCallback::new(client(), callback_url(addr), None);
        assert!(anonymous.ping().await.is_err());

        let authorized = PluginCallback::new(
            client(),
            callback_url(addr),
            Some(Credential {
                username: "agent".into(),
                password: "hunter2".into(),
            }),
        );
        authorized.ping().await.unwrap();
    }
}
