use crate::config::EndpointContext;
use crate::errors::{CloudResult, ParseError};
use crate::resources::{CollectionInfo, ParamDefaults, ResourceRef};
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable set of known collections, keyed by `api.name`.
///
/// Built once at startup and passed around as `Arc<Registry>`.
#[derive(Debug, Clone)]
pub struct Registry {
    endpoints: EndpointContext,
    collections: HashMap<String, CollectionInfo>,
}

impl Registry {
    /// Creates a new builder.
    pub fn builder(endpoints: EndpointContext) -> RegistryBuilder {
        RegistryBuilder::new(endpoints)
    }

    /// Registry with the Compute Engine instance, disk and operation collections.
    pub fn with_defaults(endpoints: EndpointContext) -> CloudResult<Self> {
        Self::builder(endpoints).compute("v1").build()
    }

    /// Shares the registry.
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// The endpoint context the collections were built against.
    pub fn endpoints(&self) -> &EndpointContext {
        &self.endpoints
    }

    /// Looks up a collection by full name.
    pub fn collection(&self, full_name: &str) -> Result<&CollectionInfo, ParseError> {
        self.collections
            .get(full_name)
            .ok_or_else(|| ParseError::WrongCollection {
                expected: full_name.to_string(),
                input: full_name.to_string(),
            })
    }

    /// Looks up a collection, rebased onto `version` when it differs.
    pub fn collection_at(&self, full_name: &str, version: Option<&str>) -> CloudResult<CollectionInfo> {
        let info = self.collection(full_name)?;
        match version {
            Some(version) if version != info.version() => {
                let base_url = self.endpoints.base_url(info.api(), version)?;
                Ok(info.rebased(version, base_url))
            }
            _ => Ok(info.clone()),
        }
    }

    /// Collections registered for one API.
    pub fn collections_for_api<'a>(&'a self, api: &'a str) -> impl Iterator<Item = &'a CollectionInfo> {
        self.collections.values().filter(move |c| c.api() == api)
    }

    /// Parses any accepted input form against a named collection.
    pub fn parse(
        &self,
        input: &str,
        collection: &str,
        defaults: &ParamDefaults,
    ) -> Result<ResourceRef, ParseError> {
        self.collection(collection)?.parse(input, defaults)
    }

    /// Parses a canonical relative name against a named collection.
    pub fn parse_relative(&self, name: &str, collection: &str) -> Result<ResourceRef, ParseError> {
        self.collection(collection)?.parse_relative(name)
    }
}

struct PendingCollection {
    api: String,
    version: String,
    name: String,
    template: String,
    supports_cancel: bool,
    supports_wait: bool,
}

/// Builder for [`Registry`].
pub struct RegistryBuilder {
    endpoints: EndpointContext,
    pending: Vec<PendingCollection>,
}

impl RegistryBuilder {
    /// Creates an empty builder.
    pub fn new(endpoints: EndpointContext) -> Self {
        Self {
            endpoints,
            pending: Vec::new(),
        }
    }

    /// Registers a collection.
    pub fn collection(
        self,
        api: impl Into<String>,
        version: impl Into<String>,
        name: impl Into<String>,
        template: impl Into<String>,
    ) -> Self {
        self.push(api.into(), version.into(), name.into(), template.into(), false, false)
    }

    /// Registers an operations collection that accepts `:cancel`.
    pub fn cancellable_collection(
        self,
        api: impl Into<String>,
        version: impl Into<String>,
        name: impl Into<String>,
        template: impl Into<String>,
    ) -> Self {
        self.push(api.into(), version.into(), name.into(), template.into(), true, false)
    }

    /// Registers an operations collection that accepts a blocking `/wait`.
    pub fn waitable_collection(
        self,
        api: impl Into<String>,
        version: impl Into<String>,
        name: impl Into<String>,
        template: impl Into<String>,
    ) -> Self {
        self.push(api.into(), version.into(), name.into(), template.into(), false, true)
    }

    /// Registers the Compute Engine collections at `version`.
    pub fn compute(self, version: &str) -> Self {
        self.collection(
            "compute",
            version,
            "instances",
            "projects/{project}/zones/{zone}/instances/{instance}",
        )
        .collection(
            "compute",
            version,
            "disks",
            "projects/{project}/zones/{zone}/disks/{disk}",
        )
        .waitable_collection(
            "compute",
            version,
            "zoneOperations",
            "projects/{project}/zones/{zone}/operations/{operation}",
        )
        .waitable_collection(
            "compute",
            version,
            "regionOperations",
            "projects/{project}/regions/{region}/operations/{operation}",
        )
        .waitable_collection(
            "compute",
            version,
            "globalOperations",
            "projects/{project}/global/operations/{operation}",
        )
    }

    /// Registers `{api}.projects.locations.operations`, the standard
    /// google.longrunning collection.
    pub fn longrunning(self, api: &str, version: &str) -> Self {
        self.cancellable_collection(
            api,
            version,
            "projects.locations.operations",
            "projects/{projectsId}/locations/{locationsId}/operations/{operationsId}",
        )
    }

    fn push(
        mut self,
        api: String,
        version: String,
        name: String,
        template: String,
        supports_cancel: bool,
        supports_wait: bool,
    ) -> Self {
        self.pending.push(PendingCollection {
            api,
            version,
            name,
            template,
            supports_cancel,
            supports_wait,
        });
        self
    }

    /// Builds the registry. Later registrations of the same name win.
    pub fn build(self) -> CloudResult<Registry> {
        let mut collections = HashMap::with_capacity(self.pending.len());
        for entry in self.pending {
            let base_url = self.endpoints.base_url(&entry.api, &entry.version)?;
            let info = CollectionInfo::new(
                entry.api,
                entry.version,
                entry.name,
                entry.template,
                base_url,
            )?
            .with_cancel(entry.supports_cancel)
            .with_wait(entry.supports_wait);
            collections.insert(info.full_name(), info);
        }

        Ok(Registry {
            endpoints: self.endpoints,
            collections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::builder(EndpointContext::default())
            .compute("v1")
            .longrunning("run", "v2")
            .build()
            .unwrap()
    }

    #[test]
    fn test_with_defaults_registers_compute() {
        let registry = Registry::with_defaults(EndpointContext::default()).unwrap();
        for name in [
            "compute.instances",
            "compute.disks",
            "compute.zoneOperations",
            "compute.regionOperations",
            "compute.globalOperations",
        ] {
            assert!(registry.collection(name).is_ok(), "{name}");
        }
        assert_eq!(registry.collections_for_api("compute").count(), 5);

        let zone_ops = registry.collection("compute.zoneOperations").unwrap();
        assert!(zone_ops.supports_wait());
        assert!(!zone_ops.supports_cancel());
        assert!(!registry.collection("compute.instances").unwrap().supports_wait());

        let reference = registry
            .parse(
                "operation-0",
                "compute.zoneOperations",
                &ParamDefaults::new().project("my-project").zone("us-central2-a"),
            )
            .unwrap();
        assert_eq!(
            reference.child_url("wait").as_str(),
            "https://compute.googleapis.com/compute/v1/projects/my-project/zones/us-central2-a/operations/operation-0/wait"
        );
    }

    #[test]
    fn test_unknown_collection() {
        let err = registry()
            .parse("vm", "compute.routers", &ParamDefaults::new())
            .unwrap_err();
        assert!(matches!(err, ParseError::WrongCollection { .. }));
    }

    #[test]
    fn test_longrunning_collection() {
        let registry = registry();
        let ops = registry.collection("run.projects.locations.operations").unwrap();
        assert!(ops.supports_cancel());
        assert!(!ops.supports_wait());

        let reference = registry
            .parse_relative(
                "projects/p/locations/us-central1/operations/abc",
                "run.projects.locations.operations",
            )
            .unwrap();
        assert_eq!(
            reference.self_link(),
            "https://run.googleapis.com/v2/projects/p/locations/us-central1/operations/abc"
        );
        assert_eq!(reference.project(), Some("p"));
        assert_eq!(
            reference.method_url("cancel").as_str(),
            "https://run.googleapis.com/v2/projects/p/locations/us-central1/operations/abc:cancel"
        );
    }

    #[test]
    fn test_collection_at_other_version() {
        let registry = registry();
        let beta = registry.collection_at("compute.instances", Some("beta")).unwrap();
        assert_eq!(beta.version(), "beta");
        assert_eq!(
            beta.base_url().as_str(),
            "https://compute.googleapis.com/compute/beta/"
        );

        let same = registry.collection_at("compute.instances", None).unwrap();
        assert_eq!(same.version(), "v1");
    }

    #[test]
    fn test_endpoint_override_applies() {
        let ctx = EndpointContext::builder()
            .endpoint_override("compute", "http://localhost:9000/compute/v1/")
            .build()
            .unwrap();
        let registry = Registry::with_defaults(ctx).unwrap();
        let reference = registry
            .parse(
                "https://compute.googleapis.com/compute/v1/projects/p/zones/z/instances/i",
                "compute.instances",
                &ParamDefaults::new(),
            )
            .unwrap();
        assert_eq!(
            reference.self_link(),
            "http://localhost:9000/compute/v1/projects/p/zones/z/instances/i"
        );
    }
}
