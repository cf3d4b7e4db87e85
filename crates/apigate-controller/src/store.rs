//! Cluster store for child objects
//!
//! The engine only sees [`ClusterStore`]. [`KubeStore`] backs it with the
//! dynamic kube API, resolving each child kind through the [`CrdRegistry`] so
//! the served API version is used.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::discovery::ApiResource;
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use apigate_common::{CrdRegistry, Error};

use crate::processing::{ChildKind, ChildObject};

/// Read and write access to child objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// All objects of `kind` in every namespace matching the label selector
    async fn list(&self, kind: ChildKind, selector: &str) -> Result<Vec<ChildObject>, Error>;

    /// Create an object; the server generates its name
    async fn create(&self, object: &ChildObject) -> Result<(), Error>;

    /// Replace an object. Fails with a conflict when its resourceVersion is stale.
    async fn update(&self, object: &ChildObject) -> Result<(), Error>;

    /// Delete an object; an already-deleted object is not an error
    async fn delete(&self, object: &ChildObject) -> Result<(), Error>;

    /// Pod selector of a Service, `None` when the Service does not exist
    async fn service_selector(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<BTreeMap<String, String>>, Error>;
}

/// [`ClusterStore`] over a kube client
pub struct KubeStore {
    client: Client,
    registry: Arc<CrdRegistry>,
}

impl KubeStore {
    /// Create a store using the given client and CRD registry
    pub fn new(client: Client, registry: Arc<CrdRegistry>) -> Self {
        Self { client, registry }
    }

    async fn api_resource(&self, kind: ChildKind) -> Result<ApiResource, Error> {
        self.registry
            .resolve(kind.crd_kind())
            .await
            .ok_or_else(|| {
                Error::internal_with_context("store", format!("CRD for {kind} is not installed"))
            })
    }

    async fn namespaced_api(&self, object: &ChildObject) -> Result<(Api<DynamicObject>, ApiResource), Error> {
        let ar = self.api_resource(object.kind()).await?;
        let api = Api::namespaced_with(self.client.clone(), &object.metadata().namespace, &ar);
        Ok((api, ar))
    }
}

/// Wire form of `object` with the served apiVersion
fn to_dynamic(object: &ChildObject, ar: &ApiResource) -> Result<DynamicObject, Error> {
    let mut value = object.to_value()?;
    value["apiVersion"] = serde_json::Value::String(ar.api_version.clone());
    serde_json::from_value(value)
        .map_err(|e| Error::serialization_for_kind(object.kind().as_str(), e.to_string()))
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn list(&self, kind: ChildKind, selector: &str) -> Result<Vec<ChildObject>, Error> {
        let Some(ar) = self.registry.resolve(kind.crd_kind()).await else {
            debug!(kind = %kind, "CRD not installed, nothing to list");
            return Ok(Vec::new());
        };
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);
        let list = api.list(&ListParams::default().labels(selector)).await?;

        list.items
            .into_iter()
            .map(|item| {
                let value = serde_json::to_value(item)
                    .map_err(|e| Error::serialization_for_kind(kind.as_str(), e.to_string()))?;
                ChildObject::from_value(kind, value)
            })
            .collect()
    }

    async fn create(&self, object: &ChildObject) -> Result<(), Error> {
        let (api, ar) = self.namespaced_api(object).await?;
        let obj = to_dynamic(object, &ar)?;
        api.create(&PostParams::default(), &obj).await?;
        Ok(())
    }

    async fn update(&self, object: &ChildObject) -> Result<(), Error> {
        let (api, ar) = self.namespaced_api(object).await?;
        let obj = to_dynamic(object, &ar)?;
        api.replace(&object.metadata().name, &PostParams::default(), &obj)
            .await?;
        Ok(())
    }

    async fn delete(&self, object: &ChildObject) -> Result<(), Error> {
        let (api, _) = self.namespaced_api(object).await?;
        match api
            .delete(&object.metadata().name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                let e = Error::from(e);
                if e.is_not_found() {
                    debug!(
                        kind = %object.kind(),
                        name = %object.metadata().name,
                        "object already deleted"
                    );
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn service_selector(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<BTreeMap<String, String>>, Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api
            .get_opt(name)
            .await?
            .and_then(|svc| svc.spec)
            .and_then(|spec| spec.selector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apigate_common::kube_utils::{build_api_resource, ObjectMeta};
    use apigate_common::policy::{VirtualService, VirtualServiceSpec};

    #[test]
    fn dynamic_object_uses_served_api_version() {
        let mut meta = ObjectMeta::generated("httpbin-", "default");
        meta.name = "httpbin-x7k2p".to_string();
        let vs = ChildObject::VirtualService(VirtualService::new(
            meta,
            VirtualServiceSpec {
                hosts: vec!["httpbin.example.com".to_string()],
                ..Default::default()
            },
        ));
        let ar = build_api_resource("networking.istio.io/v1", "VirtualService");

        let obj = to_dynamic(&vs, &ar).expect("convertible");
        let types = obj.types.expect("type meta");
        assert_eq!(types.api_version, "networking.istio.io/v1");
        assert_eq!(types.kind, "VirtualService");
        assert_eq!(obj.metadata.name.as_deref(), Some("httpbin-x7k2p"));
        assert_eq!(obj.data["spec"]["hosts"][0], "httpbin.example.com");
    }
}
