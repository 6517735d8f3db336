use crate::resources::CollectionInfo;
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

/// Immutable reference to one resource in a collection.
///
/// Every template parameter is bound. Two references are equal when the
/// collection (API, version, template, endpoint) and all parameters are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    collection: CollectionInfo,
    params: BTreeMap<String, String>,
}

impl ResourceRef {
    pub(crate) fn new(collection: CollectionInfo, params: BTreeMap<String, String>) -> Self {
        Self { collection, params }
    }

    /// The collection this reference belongs to.
    pub fn collection(&self) -> &CollectionInfo {
        &self.collection
    }

    /// Value of one path parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// All path parameters.
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// The resolved project, if the template has one.
    pub fn project(&self) -> Option<&str> {
        self.param("project").or_else(|| self.param("projectsId"))
    }

    /// Value of the last template parameter, the resource's own name.
    pub fn name(&self) -> &str {
        self.collection
            .params()
            .last()
            .and_then(|p| self.param(p))
            .unwrap_or_default()
    }

    /// Canonical relative name, e.g. `projects/p/zones/z/instances/i`.
    pub fn relative_name(&self) -> String {
        self.collection
            .path_template()
            .split('/')
            .map(|seg| {
                seg.strip_prefix('{')
                    .and_then(|s| s.strip_suffix('}'))
                    .and_then(|p| self.param(p))
                    .unwrap_or(seg)
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Absolute URL against the collection's endpoint.
    pub fn self_link(&self) -> String {
        format!("{}{}", self.collection.base_url(), self.relative_name())
    }

    /// [`self_link`](Self::self_link) as a parsed URL.
    pub fn url(&self) -> Url {
        let mut url = self.collection.base_url().clone();
        let relative = self.relative_name();
        url.set_path(&format!("{}{}", url.path(), relative));
        url
    }

    /// URL of a sub-resource path, e.g. `/wait` on a Compute operation.
    pub fn child_url(&self, segment: &str) -> Url {
        let mut url = self.url();
        let path = format!("{}/{segment}", url.path());
        url.set_path(&path);
        url
    }

    /// URL of a custom method on this resource, e.g. `:cancel`.
    pub fn method_url(&self, method: &str) -> Url {
        let mut url = self.url();
        let path = format!("{}:{method}", url.path());
        url.set_path(&path);
        url
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.relative_name())
    }
}
