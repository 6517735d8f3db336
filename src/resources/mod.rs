//! Resource references and the collection registry.
//!
//! A [`ResourceRef`] is an immutable `(api, version, collection, params)`
//! tuple. References are produced by parsing a short name, a relative name
//! (`projects/p/zones/z/instances/i`, or a tail of it) or a full self-link
//! URL against a collection of the [`Registry`]. Parsing never performs I/O.
//!
//! # Example
//!
//! ```
//! use integrations_google_cloud_lro::config::EndpointContext;
//! use integrations_google_cloud_lro::resources::{ParamDefaults, Registry};
//!
//! let registry = Registry::with_defaults(EndpointContext::default()).unwrap();
//! let defaults = ParamDefaults::new().project("my-project").zone("us-central1-a");
//!
//! let vm = registry.parse("vm-1", "compute.instances", &defaults).unwrap();
//! assert_eq!(
//!     vm.relative_name(),
//!     "projects/my-project/zones/us-central1-a/instances/vm-1"
//! );
//! ```

mod collection;
mod reference;
mod registry;

pub use collection::CollectionInfo;
pub use reference::ResourceRef;
pub use registry::{Registry, RegistryBuilder};

use std::collections::HashMap;

/// Fallback values for path parameters missing from the input.
#[derive(Debug, Clone, Default)]
pub struct ParamDefaults {
    values: HashMap<String, String>,
}

impl ParamDefaults {
    /// Creates empty defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a default for one parameter.
    pub fn with(mut self, param: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(canonical_param(&param.into()), value.into());
        self
    }

    /// Default project.
    pub fn project(self, project: impl Into<String>) -> Self {
        self.with("project", project)
    }

    /// Default zone.
    pub fn zone(self, zone: impl Into<String>) -> Self {
        self.with("zone", zone)
    }

    /// Default region.
    pub fn region(self, region: impl Into<String>) -> Self {
        self.with("region", region)
    }

    /// Default location.
    pub fn location(self, location: impl Into<String>) -> Self {
        self.with("location", location)
    }

    /// Looks up a parameter by name or by its canonical alias.
    pub fn get(&self, param: &str) -> Option<&str> {
        self.values
            .get(param)
            .or_else(|| self.values.get(&canonical_param(param)))
            .map(String::as_str)
    }
}

/// Maps generated parameter names onto their plain form:
/// `projectsId` → `project`, `locationsId` → `location`, `zoneId` → `zone`.
pub(crate) fn canonical_param(param: &str) -> String {
    if let Some(stem) = param.strip_suffix("sId") {
        stem.to_string()
    } else if let Some(stem) = param.strip_suffix("Id") {
        stem.to_string()
    } else {
        param.to_string()
    }
}
