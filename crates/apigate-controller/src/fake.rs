//! In-memory [`ClusterStore`] for multi-pass tests
//!
//! Assigns names and resource versions like the API server, rejects stale
//! updates with a 409 and can be told to fail writes of one kind.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use apigate_common::Error;

use crate::processing::{ChildKind, ChildObject};
use crate::store::ClusterStore;

type ObjectId = (ChildKind, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectId, ChildObject>,
    next_name: u64,
    next_version: u64,
    writes: usize,
}

/// Store kept in memory
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<State>,
    failing_kind: Mutex<Option<ChildKind>>,
    selectors: BTreeMap<(String, String), BTreeMap<String, String>>,
}

impl FakeStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a Service with a pod selector
    pub fn with_service(mut self, name: &str, namespace: &str, selector: &[(&str, &str)]) -> Self {
        self.selectors.insert(
            (name.to_string(), namespace.to_string()),
            selector
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }

    /// Make every write of `kind` fail
    pub fn fail_writes_of(&self, kind: Option<ChildKind>) {
        *self.failing_kind.lock().expect("lock") = kind;
    }

    /// Put an object in place as if created by someone else
    pub fn seed(&self, mut object: ChildObject) -> ChildObject {
        let mut state = self.state.lock().expect("lock");
        if object.metadata().name.is_empty() {
            state.next_name += 1;
            let name = format!("{}seed{}", object.metadata().generate_name, state.next_name);
            object.metadata_mut().name = name;
        }
        state.next_version += 1;
        object.metadata_mut().resource_version = Some(state.next_version.to_string());
        state.objects.insert(id(&object), object.clone());
        object
    }

    /// All objects of a kind
    pub fn objects(&self, kind: ChildKind) -> Vec<ChildObject> {
        self.state
            .lock()
            .expect("lock")
            .objects
            .values()
            .filter(|o| o.kind() == kind)
            .cloned()
            .collect()
    }

    /// Creates, updates and deletes performed so far
    pub fn writes(&self) -> usize {
        self.state.lock().expect("lock").writes
    }

    fn check_failure(&self, kind: ChildKind) -> Result<(), Error> {
        if *self.failing_kind.lock().expect("lock") == Some(kind) {
            return Err(Error::internal_with_context("fake", format!("{kind} writes are failing")));
        }
        Ok(())
    }
}

/// API server error with the given status code
pub fn api_error(code: u16, reason: &str) -> Error {
    Error::from(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{reason} from fake store"),
        reason: reason.to_string(),
        code,
    }))
}

fn id(object: &ChildObject) -> ObjectId {
    let meta = object.metadata();
    (object.kind(), meta.namespace.clone(), meta.name.clone())
}

fn matches_selector(object: &ChildObject, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|s| !s.is_empty())
        .all(|pair| match pair.split_once('=') {
            Some((k, v)) => object.metadata().labels.get(k).map(String::as_str) == Some(v),
            None => false,
        })
}

#[async_trait]
impl ClusterStore for FakeStore {
    async fn list(&self, kind: ChildKind, selector: &str) -> Result<Vec<ChildObject>, Error> {
        Ok(self
            .objects(kind)
            .into_iter()
            .filter(|o| matches_selector(o, selector))
            .collect())
    }

    async fn create(&self, object: &ChildObject) -> Result<(), Error> {
        self.check_failure(object.kind())?;
        let mut state = self.state.lock().expect("lock");
        let mut object = object.clone();
        state.next_name += 1;
        state.next_version += 1;
        let name = format!("{}{:05}", object.metadata().generate_name, state.next_name);
        let meta = object.metadata_mut();
        meta.name = name;
        meta.resource_version = Some(state.next_version.to_string());
        state.writes += 1;
        state.objects.insert(id(&object), object);
        Ok(())
    }

    async fn update(&self, object: &ChildObject) -> Result<(), Error> {
        self.check_failure(object.kind())?;
        let mut state = self.state.lock().expect("lock");
        let key = id(object);
        let Some(current) = state.objects.get(&key) else {
            return Err(api_error(404, "NotFound"));
        };
        if current.metadata().resource_version != object.metadata().resource_version {
            return Err(api_error(409, "Conflict"));
        }
        state.next_version += 1;
        let mut object = object.clone();
        object.metadata_mut().resource_version = Some(state.next_version.to_string());
        state.writes += 1;
        state.objects.insert(key, object);
        Ok(())
    }

    async fn delete(&self, object: &ChildObject) -> Result<(), Error> {
        self.check_failure(object.kind())?;
        let mut state = self.state.lock().expect("lock");
        if state.objects.remove(&id(object)).is_some() {
            state.writes += 1;
        }
        Ok(())
    }

    async fn service_selector(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<BTreeMap<String, String>>, Error> {
        Ok(self
            .selectors
            .get(&(name.to_string(), namespace.to_string()))
            .cloned())
    }
}
