//! The registration protocol handler
//!
//! Coordinates register / check-registration / publish / deregister
//! against the store, token service, and job scheduler as a single unit.
//! Per plugin id the lifecycle is `Unregistered → Active → (Active |
//! Pruned)`; both terminal states are simply the absence of the record.
//!
//! Deregistration and liveness-failure pruning share one code path:
//! job entries are always cancelled before any record is deleted, so a
//! scheduled job can never fire against half-deleted state, and the
//! delete itself is tolerant of the record already being gone (a prune
//! and an explicit deregister may race on the same id).

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;
use vahti_core::{DiscoveryNode, RegistrationReply, RegistrationRequest, TargetDiscovery};

use crate::callback::PluginCallback;
use crate::error::{DiscoveryError, Result};
use crate::notify::DiscoveryBus;
use crate::scheduler::{JobError, JobRunner, JobScheduler, JobSpec};
use crate::store::{Credential, DiscoveryStore, PluginRecord};
use crate::token::TokenService;

/// Flat view of a registered plugin, for listings
#[derive(Debug, Clone, Serialize)]
pub struct PluginSummary {
    /// Plugin id
    pub id: String,
    /// Realm name
    pub realm: String,
    /// Callback URI; absent for builtin plugins
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback: Option<Url>,
}

/// The discovery registration service
///
/// Shared as an `Arc`: HTTP handlers call into it on the request path,
/// and the scheduler calls back into it (via [`JobRunner`]) from worker
/// tasks.
pub struct DiscoveryService {
    store: Arc<dyn DiscoveryStore>,
    tokens: TokenService,
    scheduler: Arc<JobScheduler>,
    bus: DiscoveryBus,
    http: reqwest::Client,
    base_url: Url,
    ping_period: Duration,
    agent_proxy: Option<Url>,
}

impl DiscoveryService {
    /// Wire up the service
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn DiscoveryStore>,
        tokens: TokenService,
        scheduler: Arc<JobScheduler>,
        bus: DiscoveryBus,
        http: reqwest::Client,
        base_url: Url,
        ping_period: Duration,
        agent_proxy: Option<Url>,
    ) -> Self {
        Self {
            store,
            tokens,
            scheduler,
            bus,
            http,
            base_url,
            ping_period,
            agent_proxy,
        }
    }

    /// Process-start hook
    ///
    /// Ensures the Universe exists and schedules a one-shot startup
    /// verification for every persisted non-builtin plugin, re-checking
    /// liveness of plugins that survived a restart.
    pub fn startup(self: &Arc<Self>) {
        self.store.ensure_universe();
        for plugin in self.store.plugins(None) {
            if plugin.builtin {
                continue;
            }
            let runner: Arc<dyn JobRunner> = Arc::clone(self) as Arc<dyn JobRunner>;
            if let Err(e) = self.scheduler.schedule_startup(&plugin.id, runner) {
                warn!(plugin_id = %plugin.id, error = %e, "Failed to schedule startup verification");
            }
        }
    }

    /// Find or create the builtin plugin for a gateway-owned realm
    ///
    /// Builtin plugins have no callback, are never pinged, and cannot be
    /// deregistered.
    pub fn ensure_builtin_realm(&self, name: &str) -> Result<PluginRecord> {
        if let Some(existing) = self
            .store
            .plugins(Some(name))
            .into_iter()
            .find(|p| p.builtin)
        {
            return Ok(existing);
        }
        let plugin = self.store.insert_plugin(name, None, true)?;
        info!(realm = name, plugin_id = %plugin.id, "Seeded builtin discovery realm");
        Ok(plugin)
    }

    /// Register a plugin, or refresh the token of an existing registration
    ///
    /// With both `id` and `token` present this is a token refresh: the
    /// realm name and callback must match the stored registration, the
    /// prior token must strict-validate, and scheduling is left alone.
    /// Otherwise a new plugin is created, its realm attached under the
    /// Universe, and its periodic liveness job scheduled.
    pub fn register(
        self: &Arc<Self>,
        request: RegistrationRequest,
        remote: Option<IpAddr>,
    ) -> Result<RegistrationReply> {
        let realm_name = require_non_blank(&request.realm, "realm")?;
        let callback: Url = request
            .callback
            .parse()
            .map_err(|e| DiscoveryError::BadRequest(format!("invalid callback URI: {e}")))?;

        let prior_id = request.id.as_deref().filter(|s| !s.trim().is_empty());
        let prior_token = request.token.as_deref().filter(|s| !s.trim().is_empty());

        let plugin = match (prior_id, prior_token) {
            (Some(id), Some(prior_token)) => {
                // Token refresh of an existing registration
                let plugin = self.require_plugin(id)?;
                let current_realm = self.store.node_name(&plugin.realm).unwrap_or_default();
                if current_realm != realm_name {
                    return Err(DiscoveryError::Forbidden(
                        "realm does not match the existing registration".into(),
                    ));
                }
                if plugin.callback.as_ref() != Some(&callback) {
                    return Err(DiscoveryError::BadRequest(
                        "callback does not match the existing registration".into(),
                    ));
                }
                let location = self.plugin_location(&plugin.id)?;
                self.tokens
                    .validate(&plugin.id, prior_token, &location, remote, true)?;
                debug!(plugin_id = %plugin.id, "Refreshing registration token");
                plugin
            }
            _ => {
                // Brand-new registration
                let plugin = self
                    .store
                    .insert_plugin(realm_name, Some(callback.clone()), false)?;

                let runner: Arc<dyn JobRunner> = Arc::clone(self) as Arc<dyn JobRunner>;
                if let Err(e) =
                    self.scheduler
                        .schedule_periodic(&plugin.id, self.ping_period, runner)
                {
                    // Reported, but the registration itself stands
                    warn!(plugin_id = %plugin.id, error = %e, "Failed to schedule periodic liveness job");
                }
                info!(
                    plugin_id = %plugin.id,
                    realm = realm_name,
                    callback = %callback,
                    "Registered discovery plugin"
                );
                plugin
            }
        };

        let location = self.plugin_location(&plugin.id)?;
        let token = self.tokens.create(&plugin.id, remote, &location)?;
        Ok(RegistrationReply {
            id: plugin.id,
            token,
            env: self.env_map(),
        })
    }

    /// Confirm a registration is still live
    ///
    /// Strict validation, no state mutation.
    pub fn check_registration(
        &self,
        plugin_id: &str,
        token: &str,
        remote: Option<IpAddr>,
    ) -> Result<()> {
        let plugin = self.require_plugin(plugin_id)?;
        let location = self.plugin_location(&plugin.id)?;
        Ok(self
            .tokens
            .validate(&plugin.id, token, &location, remote, true)?)
    }

    /// Atomically replace the plugin's subtree with `subtree`
    pub fn publish(
        &self,
        plugin_id: &str,
        token: &str,
        remote: Option<IpAddr>,
        subtree: Vec<DiscoveryNode>,
    ) -> Result<String> {
        let plugin = self.require_plugin(plugin_id)?;
        let location = self.plugin_location(&plugin.id)?;
        self.tokens
            .validate(&plugin.id, token, &location, remote, true)?;

        let events = self.store.replace_children(&plugin.id, &subtree)?;
        info!(
            plugin_id = %plugin.id,
            nodes = subtree.len(),
            events = events.len(),
            "Published discovery subtree"
        );
        self.bus.publish(events);
        Ok(plugin.id)
    }

    /// Explicitly withdraw a registration
    ///
    /// Origin is not re-verified: withdrawal is allowed from any vantage
    /// point once a valid (signed, unexpired, correctly-addressed) token
    /// is presented. Builtin plugins cannot self-withdraw.
    pub fn deregister(&self, plugin_id: &str, token: &str, remote: Option<IpAddr>) -> Result<String> {
        let plugin = self.require_plugin(plugin_id)?;
        let location = self.plugin_location(&plugin.id)?;
        self.tokens
            .validate(&plugin.id, token, &location, remote, false)?;
        if plugin.builtin {
            return Err(DiscoveryError::Forbidden(
                "builtin plugins cannot be deregistered".into(),
            ));
        }

        // Jobs first, records second
        self.scheduler.cancel_all(&plugin.id);
        match self.store.remove_plugin(&plugin.id) {
            Some(events) => {
                info!(plugin_id = %plugin.id, "Deregistered discovery plugin");
                self.bus.publish(events);
                Ok(plugin.id)
            }
            // A concurrent prune won the race; for the API caller the
            // plugin no longer exists
            None => Err(DiscoveryError::NotFound(format!("plugin {plugin_id}"))),
        }
    }

    /// All registered plugins, optionally filtered by realm name
    pub fn list_plugins(&self, realm: Option<&str>) -> Vec<PluginSummary> {
        self.store
            .plugins(realm)
            .iter()
            .map(|p| self.summary(p))
            .collect()
    }

    /// Flat view of one plugin
    pub fn get_plugin(&self, plugin_id: &str) -> Result<PluginSummary> {
        Ok(self.summary(&self.require_plugin(plugin_id)?))
    }

    /// The full discovery tree, rooted at the Universe
    pub fn tree(&self) -> DiscoveryNode {
        self.store.tree()
    }

    /// Store callback authorization material for a plugin
    pub fn store_credential(
        &self,
        plugin_id: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<()> {
        let plugin = self.require_plugin(plugin_id)?;
        self.store.put_credential(
            &plugin.id,
            Credential {
                username: username.into(),
                password: password.into(),
            },
        );
        Ok(())
    }

    /// Subscribe to target lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<TargetDiscovery> {
        self.bus.subscribe()
    }

    /// The external URI of a plugin's registration resource
    ///
    /// This is the location a token's audience is bound to.
    pub fn plugin_location(&self, plugin_id: &str) -> Result<Url> {
        self.base_url
            .join(&format!("api/v1/discovery/{plugin_id}"))
            .map_err(|e| DiscoveryError::Internal(format!("cannot build plugin location: {e}")))
    }

    /// Remove a plugin that failed liveness verification
    ///
    /// Shared with deregistration: cancel job entries across both groups
    /// first, then cascade-delete the records. Every step is a no-op if
    /// its object is already gone.
    fn prune(&self, plugin_id: &str) {
        if let Some(plugin) = self.store.plugin(plugin_id) {
            if plugin.builtin {
                warn!(plugin_id, "Refusing to prune builtin plugin");
                return;
            }
        }
        self.scheduler.cancel_all(plugin_id);
        match self.store.remove_plugin(plugin_id) {
            Some(events) => {
                info!(plugin_id, "Pruned discovery plugin");
                self.bus.publish(events);
            }
            None => debug!(plugin_id, "Plugin already removed, nothing to prune"),
        }
    }

    fn require_plugin(&self, plugin_id: &str) -> Result<PluginRecord> {
        self.store
            .plugin(plugin_id)
            .ok_or_else(|| DiscoveryError::NotFound(format!("plugin {plugin_id}")))
    }

    fn summary(&self, plugin: &PluginRecord) -> PluginSummary {
        PluginSummary {
            id: plugin.id.clone(),
            realm: self.store.node_name(&plugin.realm).unwrap_or_default(),
            callback: plugin.callback.clone(),
        }
    }

    fn env_map(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        if let Some(proxy) = &self.agent_proxy {
            env.insert("AGENT_PROXY".to_string(), proxy.to_string());
        }
        env
    }
}

#[async_trait]
impl JobRunner for DiscoveryService {
    async fn execute(&self, job: &JobSpec) -> std::result::Result<(), JobError> {
        let Some(plugin) = self.store.plugin(&job.plugin_id) else {
            // Already pruned; fail the job so the entry is not retried
            return Err(JobError::PluginGone(job.plugin_id.clone()));
        };
        let Some(callback_url) = plugin.callback.clone() else {
            // Builtin plugins carry no callback and are never pruned
            return Ok(());
        };

        let callback = PluginCallback::new(
            self.http.clone(),
            callback_url,
            self.store.credential_for(&plugin.id),
        );
        let result = if job.refresh {
            callback.refresh().await
        } else {
            callback.ping().await
        };

        match result {
            Ok(()) => {
                debug!(plugin_id = %plugin.id, refresh = job.refresh, "Retained discovery plugin");
                Ok(())
            }
            Err(e) => {
                self.prune(&plugin.id);
                Err(e.into())
            }
        }
    }
}

fn require_non_blank<'a>(value: &'a str, name: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DiscoveryError::BadRequest(format!(
            "parameter \"{name}\" may not be blank"
        )));
    }
    Ok(trimmed)
}
