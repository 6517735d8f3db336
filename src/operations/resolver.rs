//! Maps an operation handle onto the collection it can be polled in.

use crate::errors::{CloudError, CloudResult, OperationError};
use crate::operations::{OperationHandle, OperationScope};
use crate::resources::{CollectionInfo, Registry, ResourceRef};
use std::sync::Arc;

/// What the caller knows about the target resource's scope.
///
/// Used when the operation response itself omits zone or region.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeHints {
    /// Project of the target resource.
    pub project: Option<String>,
    /// Zone of the target resource.
    pub zone: Option<String>,
    /// Region of the target resource.
    pub region: Option<String>,
    /// Location of the target resource (generic services).
    pub location: Option<String>,
    /// API the mutation was sent to, e.g. `compute` or `run`.
    pub api: Option<String>,
    /// Version of that API.
    pub version: Option<String>,
    /// The target resource is global.
    pub global: bool,
}

impl ScopeHints {
    /// Hints with only a project.
    pub fn project(project: impl Into<String>) -> Self {
        Self {
            project: Some(project.into()),
            ..Default::default()
        }
    }

    /// Sets the zone.
    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    /// Sets the region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Sets the location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Sets the API and version.
    pub fn with_api(mut self, api: impl Into<String>, version: impl Into<String>) -> Self {
        self.api = Some(api.into());
        self.version = Some(version.into());
        self
    }

    /// Marks the target as global.
    pub fn global(mut self) -> Self {
        self.global = true;
        self
    }
}

/// Result of resolving an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOperation {
    /// Scope of the operation.
    pub scope: OperationScope,
    /// Fully bound reference into the operations collection.
    pub poll: ResourceRef,
}

/// Pieces of an operation self-link or relative name.
#[derive(Debug, Default)]
struct LinkParts<'a> {
    version: Option<&'a str>,
    project: Option<&'a str>,
    zone: Option<&'a str>,
    region: Option<&'a str>,
    location: Option<&'a str>,
    global: bool,
    operation: Option<&'a str>,
}

impl<'a> LinkParts<'a> {
    fn parse(link: &'a str) -> Self {
        let path = match link.find("://") {
            Some(idx) => {
                let rest = &link[idx + 3..];
                rest.find('/').map(|i| &rest[i + 1..]).unwrap_or_default()
            }
            None => link,
        };
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let mut parts = LinkParts::default();
        let Some(start) = segments.iter().position(|s| *s == "projects") else {
            return parts;
        };
        if start > 0 && link.contains("://") {
            parts.version = Some(segments[start - 1]);
        }

        let mut iter = segments[start..].chunks(2);
        while let Some(pair) = iter.next() {
            match *pair {
                ["projects", value] => parts.project = Some(value),
                ["zones", value] => parts.zone = Some(value),
                ["regions", value] => parts.region = Some(value),
                ["locations", value] => parts.location = Some(value),
                ["global", "operations"] => {
                    parts.global = true;
                    if let Some(&[value, ..]) = iter.next() {
                        parts.operation = Some(value);
                    }
                }
                ["operations", value] => parts.operation = Some(value),
                _ => {}
            }
        }
        parts
    }
}

fn last_segment(value: &str) -> &str {
    value.rsplit('/').next().unwrap_or(value)
}

fn unsupported(handle: &OperationHandle, why: &str) -> CloudError {
    OperationError::UnsupportedShape(format!("{why} for operation [{}]", handle.name)).into()
}

/// Classifies operations and builds their polling references.
///
/// Resolution order, most specific first: explicit zone, explicit region,
/// global marker or self-link, service operation names, then the caller's
/// hints. Zone and region are read from the operation fields, its
/// self-link and its name, in that order.
/// Anything else is rejected rather than guessed.
#[derive(Debug, Clone)]
pub struct OperationResolver {
    registry: Arc<Registry>,
}

impl OperationResolver {
    /// Creates a resolver over a registry.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Resolves the polling reference for `handle`.
    pub fn resolve(
        &self,
        handle: &OperationHandle,
        hints: &ScopeHints,
    ) -> CloudResult<ResolvedOperation> {
        let link = handle
            .self_link
            .as_deref()
            .map(LinkParts::parse)
            .unwrap_or_default();
        let named = LinkParts::parse(&handle.name);

        let operation = link
            .operation
            .or(named.operation)
            .unwrap_or_else(|| last_segment(&handle.name));
        let project = link
            .project
            .or(named.project)
            .or(hints.project.as_deref());
        let compute_version = link.version.or(named.version).or(match hints.api.as_deref() {
            Some("compute") | None => hints.version.as_deref(),
            Some(_) => None,
        });

        let zone = handle
            .zone
            .as_deref()
            .map(last_segment)
            .or(link.zone)
            .or(named.zone);
        if let Some(zone) = zone {
            return self.compute(handle, "zoneOperations", compute_version, [
                ("project", project),
                ("zone", Some(zone)),
                ("operation", Some(operation)),
            ])
            .map(|poll| ResolvedOperation {
                scope: OperationScope::Zonal(zone.to_string()),
                poll,
            });
        }

        let region = handle
            .region
            .as_deref()
            .map(last_segment)
            .or(link.region)
            .or(named.region);
        if let Some(region) = region {
            return self.compute(handle, "regionOperations", compute_version, [
                ("project", project),
                ("region", Some(region)),
                ("operation", Some(operation)),
            ])
            .map(|poll| ResolvedOperation {
                scope: OperationScope::Regional(region.to_string()),
                poll,
            });
        }

        if handle.global || link.global || named.global {
            return self.global(handle, compute_version, project, operation);
        }

        if let Some(resolved) = self.service(handle, hints)? {
            return Ok(resolved);
        }

        if !handle.name.contains('/') {
            if let Some(zone) = hints.zone.as_deref() {
                return self.compute(handle, "zoneOperations", compute_version, [
                    ("project", project),
                    ("zone", Some(zone)),
                    ("operation", Some(operation)),
                ])
                .map(|poll| ResolvedOperation {
                    scope: OperationScope::Zonal(zone.to_string()),
                    poll,
                });
            }
            if let Some(region) = hints.region.as_deref() {
                return self.compute(handle, "regionOperations", compute_version, [
                    ("project", project),
                    ("region", Some(region)),
                    ("operation", Some(operation)),
                ])
                .map(|poll| ResolvedOperation {
                    scope: OperationScope::Regional(region.to_string()),
                    poll,
                });
            }
            if hints.global {
                return self.global(handle, compute_version, project, operation);
            }
        }

        Err(unsupported(handle, "no zone, region, global link or service name"))
    }

    fn global(
        &self,
        handle: &OperationHandle,
        version: Option<&str>,
        project: Option<&str>,
        operation: &str,
    ) -> CloudResult<ResolvedOperation> {
        self.compute(handle, "globalOperations", version, [
            ("project", project),
            ("operation", Some(operation)),
        ])
        .map(|poll| ResolvedOperation {
            scope: OperationScope::Global,
            poll,
        })
    }

    fn compute<const N: usize>(
        &self,
        handle: &OperationHandle,
        collection: &str,
        version: Option<&str>,
        params: [(&str, Option<&str>); N],
    ) -> CloudResult<ResourceRef> {
        let info = self
            .registry
            .collection_at(&format!("compute.{collection}"), version)
            .map_err(|_| unsupported(handle, "compute operations are not registered"))?;
        bind(handle, &info, params)
    }

    /// Step four: `projects/*/locations/*/operations/*` and its shorter
    /// service-native forms.
    fn service(
        &self,
        handle: &OperationHandle,
        hints: &ScopeHints,
    ) -> CloudResult<Option<ResolvedOperation>> {
        let name = handle.name.as_str();
        let segments: Vec<&str> = name.split('/').collect();
        let shape = match segments.as_slice() {
            ["projects", _, "locations", _, "operations", _] => Some("projects.locations.operations"),
            ["projects", _, "operations", _] => Some("projects.operations"),
            ["operations", _] if hints.project.is_some() && hints.location.is_some() => {
                Some("projects.locations.operations")
            }
            ["operations", _] => Some("operations"),
            _ => None,
        };
        let Some(shape) = shape else {
            return Ok(None);
        };

        let Some(api) = hints.api.as_deref() else {
            return Err(unsupported(handle, "service operation without an API hint"));
        };

        let info = self.service_collection(handle, api, hints.version.as_deref(), shape)?;
        let reference = if segments.len() == 2 && shape == "projects.locations.operations" {
            bind(handle, &info, [
                ("projectsId", hints.project.as_deref()),
                ("locationsId", hints.location.as_deref()),
                ("operationsId", Some(segments[1])),
            ])?
        } else {
            info.parse_relative(name)
                .map_err(|e| unsupported(handle, &e.to_string()))?
        };

        Ok(Some(ResolvedOperation {
            scope: OperationScope::Service(info.full_name()),
            poll: reference,
        }))
    }

    fn service_collection(
        &self,
        handle: &OperationHandle,
        api: &str,
        version: Option<&str>,
        shape: &str,
    ) -> CloudResult<CollectionInfo> {
        let full_name = format!("{api}.{shape}");
        if let Ok(info) = self.registry.collection_at(&full_name, version) {
            return Ok(info);
        }

        let Some(version) = version else {
            return Err(unsupported(handle, "service operation without an API version hint"));
        };
        let template = match shape {
            "projects.locations.operations" => {
                "projects/{projectsId}/locations/{locationsId}/operations/{operationsId}"
            }
            "projects.operations" => "projects/{projectsId}/operations/{operationsId}",
            _ => "operations/{operationsId}",
        };
        let base_url = self.registry.endpoints().base_url(api, version)?;
        Ok(CollectionInfo::new(api, version, shape, template, base_url)?.with_cancel(true))
    }
}

fn bind<const N: usize>(
    handle: &OperationHandle,
    info: &CollectionInfo,
    params: [(&str, Option<&str>); N],
) -> CloudResult<ResourceRef> {
    let mut bound = Vec::with_capacity(N);
    for (name, value) in params {
        match value {
            Some(value) => bound.push((name, value)),
            None => {
                return Err(unsupported(
                    handle,
                    &format!("cannot bind [{name}] of {}", info.full_name()),
                ))
            }
        }
    }
    info.bind(bound)
        .map_err(|e| unsupported(handle, &e.to_string()))
}
