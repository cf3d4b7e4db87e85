//! Centralized CRD discovery registry
//!
//! Single registry for the third-party CRDs apigate writes. Resolves the
//! API version the cluster actually serves, with a `DashMap`-based cache that
//! supports lazy re-discovery when a CRD is installed after startup.

use dashmap::DashMap;
use kube::discovery::{ApiResource, Discovery};
use kube::Client;
use tracing::{info, warn};

use crate::kube_utils::{build_api_resource, find_discovered_resource};
use crate::Error;

/// Third-party CRD types managed by the APIRule controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CrdKind {
    /// VirtualService (networking.istio.io)
    VirtualService,
    /// Oathkeeper Rule (oathkeeper.ory.sh)
    OathkeeperRule,
    /// AuthorizationPolicy (security.istio.io)
    AuthorizationPolicy,
    /// RequestAuthentication (security.istio.io)
    RequestAuthentication,
}

/// All CrdKind variants for iteration.
pub const ALL_CRD_KINDS: &[CrdKind] = &[
    CrdKind::VirtualService,
    CrdKind::OathkeeperRule,
    CrdKind::AuthorizationPolicy,
    CrdKind::RequestAuthentication,
];

impl CrdKind {
    /// API group for discovery lookup.
    pub fn group(&self) -> &'static str {
        match self {
            Self::VirtualService => "networking.istio.io",
            Self::OathkeeperRule => "oathkeeper.ory.sh",
            Self::AuthorizationPolicy | Self::RequestAuthentication => "security.istio.io",
        }
    }

    /// Kubernetes Kind string for discovery lookup.
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::VirtualService => "VirtualService",
            Self::OathkeeperRule => "Rule",
            Self::AuthorizationPolicy => "AuthorizationPolicy",
            Self::RequestAuthentication => "RequestAuthentication",
        }
    }

    /// CRD object name, e.g. `virtualservices.networking.istio.io`
    pub fn crd_name(&self) -> String {
        format!(
            "{}.{}",
            crate::kube_utils::pluralize_kind(self.kind_str()),
            self.group()
        )
    }

    /// Hardcoded API version used when discovery fails entirely.
    fn hardcoded_api_version(&self) -> &'static str {
        match self {
            Self::VirtualService => "networking.istio.io/v1beta1",
            Self::OathkeeperRule => "oathkeeper.ory.sh/v1alpha1",
            Self::AuthorizationPolicy | Self::RequestAuthentication => "security.istio.io/v1beta1",
        }
    }
}

/// Centralized cache of discovered CRD API versions.
///
/// Created once at startup and shared via `Arc<CrdRegistry>`.
pub struct CrdRegistry {
    client: Client,
    entries: DashMap<CrdKind, ApiResource>,
}

impl CrdRegistry {
    /// Run API discovery once and populate all known CRDs.
    pub async fn discover(client: Client) -> Self {
        let entries = DashMap::new();

        match Discovery::new(client.clone()).run().await {
            Ok(discovery) => {
                for kind in ALL_CRD_KINDS {
                    if let Some(ar) =
                        find_discovered_resource(&discovery, kind.group(), kind.kind_str())
                    {
                        entries.insert(*kind, ar);
                    }
                }
                info!(
                    discovered = entries.len(),
                    total = ALL_CRD_KINDS.len(),
                    "CRD registry populated via API discovery"
                );
            }
            Err(e) => {
                warn!(error = %e, "API discovery failed, falling back to hardcoded CRD versions");
                for kind in ALL_CRD_KINDS {
                    entries.insert(
                        *kind,
                        build_api_resource(kind.hardcoded_api_version(), kind.kind_str()),
                    );
                }
            }
        }

        Self { client, entries }
    }

    /// Get a CRD, running lazy re-discovery if it was missing at startup.
    ///
    /// Returns `None` if the CRD is not installed or discovery failed.
    pub async fn resolve(&self, kind: CrdKind) -> Option<ApiResource> {
        match self.try_resolve(kind).await {
            Ok(ar) => ar,
            Err(e) => {
                warn!(error = %e, kind = kind.kind_str(), "CRD re-discovery failed");
                None
            }
        }
    }

    /// Like [`resolve`](Self::resolve), but reports discovery failures.
    ///
    /// `Ok(None)` means discovery ran and the CRD is not installed.
    pub async fn try_resolve(&self, kind: CrdKind) -> Result<Option<ApiResource>, Error> {
        if let Some(ar) = self.entries.get(&kind) {
            return Ok(Some(ar.clone()));
        }

        info!(
            kind = kind.kind_str(),
            group = kind.group(),
            "CRD missing from cache, attempting lazy discovery"
        );

        self.rediscover().await?;
        Ok(self.entries.get(&kind).map(|r| r.clone()))
    }

    /// Re-run API discovery and populate any newly-installed CRDs.
    ///
    /// Existing entries are not overwritten.
    async fn rediscover(&self) -> Result<(), Error> {
        let discovery = Discovery::new(self.client.clone()).run().await?;

        let mut newly_found = 0u32;
        for kind in ALL_CRD_KINDS {
            if self.entries.contains_key(kind) {
                continue;
            }
            if let Some(ar) = find_discovered_resource(&discovery, kind.group(), kind.kind_str()) {
                self.entries.insert(*kind, ar);
                newly_found += 1;
            }
        }

        if newly_found > 0 {
            info!(newly_found, "CRD re-discovery found new CRDs");
        }
        Ok(())
    }

    /// Populate the registry with hardcoded API versions for all CRDs.
    pub fn hardcoded_defaults(client: Client) -> Self {
        let entries = DashMap::new();
        for kind in ALL_CRD_KINDS {
            entries.insert(
                *kind,
                build_api_resource(kind.hardcoded_api_version(), kind.kind_str()),
            );
        }
        Self { client, entries }
    }
}
