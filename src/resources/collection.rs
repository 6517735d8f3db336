//! Collection descriptions and path templates.

use crate::errors::{ConfigurationError, ParseError};
use crate::resources::{ParamDefaults, ResourceRef};
use std::collections::BTreeMap;
use url::Url;

/// One segment of a path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    Literal(String),
    Param(String),
}

/// A registered resource collection, e.g. `compute.instances`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    api: String,
    version: String,
    name: String,
    path_template: String,
    segments: Vec<Segment>,
    base_url: Url,
    supports_cancel: bool,
    supports_wait: bool,
}

impl CollectionInfo {
    /// Creates a collection from a `projects/{project}/...` style template.
    pub fn new(
        api: impl Into<String>,
        version: impl Into<String>,
        name: impl Into<String>,
        path_template: impl Into<String>,
        base_url: Url,
    ) -> Result<Self, ConfigurationError> {
        let api = api.into();
        let name = name.into();
        let path_template = path_template.into();
        let segments = parse_template(&path_template).map_err(|message| {
            ConfigurationError::InvalidConfiguration(format!(
                "Invalid template for {api}.{name} [{path_template}]: {message}"
            ))
        })?;

        Ok(Self {
            api,
            version: version.into(),
            name,
            path_template,
            segments,
            base_url,
            supports_cancel: false,
            supports_wait: false,
        })
    }

    /// Marks the collection as exposing a `:cancel` custom method.
    pub fn with_cancel(mut self, supports_cancel: bool) -> Self {
        self.supports_cancel = supports_cancel;
        self
    }

    /// Marks the collection as exposing a blocking `/wait` method, as the
    /// Compute Engine operations collections do.
    pub fn with_wait(mut self, supports_wait: bool) -> Self {
        self.supports_wait = supports_wait;
        self
    }

    /// API name.
    pub fn api(&self) -> &str {
        &self.api
    }

    /// API version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Collection name within the API.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `api.name`, the registry key.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.api, self.name)
    }

    /// Path template.
    pub fn path_template(&self) -> &str {
        &self.path_template
    }

    /// REST root the self-links are built against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Whether operations in this collection can be cancelled.
    pub fn supports_cancel(&self) -> bool {
        self.supports_cancel
    }

    /// Whether operations in this collection can be waited on server-side.
    pub fn supports_wait(&self) -> bool {
        self.supports_wait
    }

    /// Parameter names in template order.
    pub fn params(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(p) => Some(p.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// The same collection under another version and REST root.
    pub(crate) fn rebased(&self, version: &str, base_url: Url) -> Self {
        Self {
            version: version.to_string(),
            base_url,
            ..self.clone()
        }
    }

    /// Parses a short name, a (partial) relative name or a URL.
    pub fn parse(&self, input: &str, defaults: &ParamDefaults) -> Result<ResourceRef, ParseError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ParseError::InvalidUrl(input.to_string()));
        }
        if input.contains("://") {
            return self.parse_url(input);
        }

        let segments = split_path(input)?;
        let mut params = self.match_tail(&segments, input)?;
        for param in self.params() {
            if params.contains_key(param) {
                continue;
            }
            match defaults.get(param) {
                Some(value) if !value.is_empty() => {
                    params.insert(param.to_string(), value.to_string());
                }
                _ => return Err(ParseError::MissingParameter(param.to_string())),
            }
        }
        Ok(ResourceRef::new(self.clone(), params))
    }

    /// Parses a name that must already be in canonical relative form.
    pub fn parse_relative(&self, name: &str) -> Result<ResourceRef, ParseError> {
        let segments = split_path(name)?;
        if segments.len() != self.segments.len() {
            return Err(self.wrong_collection(name));
        }
        let params = self.match_tail(&segments, name)?;
        Ok(ResourceRef::new(self.clone(), params))
    }

    /// Builds a reference from explicit parameter values.
    pub fn bind<I, K, V>(&self, values: I) -> Result<ResourceRef, ParseError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let given: BTreeMap<String, String> = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let mut params = BTreeMap::new();
        for param in self.params() {
            match given.get(param) {
                Some(value) if !value.is_empty() && !value.contains('/') => {
                    params.insert(param.to_string(), value.clone());
                }
                _ => return Err(ParseError::MissingParameter(param.to_string())),
            }
        }
        Ok(ResourceRef::new(self.clone(), params))
    }

    fn parse_url(&self, input: &str) -> Result<ResourceRef, ParseError> {
        let url = Url::parse(input).map_err(|_| ParseError::InvalidUrl(input.to_string()))?;
        if url.host_str().is_none() {
            return Err(ParseError::InvalidUrl(input.to_string()));
        }
        let path: Vec<&str> = url
            .path_segments()
            .map(|segs| segs.filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        let start = match self.segments.first() {
            Some(Segment::Literal(first)) => path.iter().position(|s| s == first),
            _ => path.len().checked_sub(self.segments.len()),
        };
        let start = match start {
            Some(start) if start > 0 => start,
            _ => return Err(ParseError::InvalidUrl(input.to_string())),
        };

        let tail = &path[start..];
        if tail.len() != self.segments.len() {
            return Err(self.wrong_collection(input));
        }
        let params = self.match_tail(tail, input)?;

        let version = path[start - 1];
        if version != self.version {
            return Err(ParseError::WrongVersion {
                expected: self.version.clone(),
                found: version.to_string(),
            });
        }

        Ok(ResourceRef::new(self.clone(), params))
    }

    /// Matches `segments` against the last `segments.len()` template segments.
    ///
    /// A multi-segment input must start on a literal so a value is never
    /// guessed into a parameter slot.
    fn match_tail(
        &self,
        segments: &[&str],
        input: &str,
    ) -> Result<BTreeMap<String, String>, ParseError> {
        let n = self.segments.len();
        if segments.len() > n {
            return Err(self.wrong_collection(input));
        }
        let offset = n - segments.len();
        if segments.len() > 1 && !matches!(self.segments[offset], Segment::Literal(_)) {
            return Err(self.wrong_collection(input));
        }

        let mut params = BTreeMap::new();
        for (template, value) in self.segments[offset..].iter().zip(segments) {
            match template {
                Segment::Literal(literal) if literal == value => {}
                Segment::Literal(_) => return Err(self.wrong_collection(input)),
                Segment::Param(param) => {
                    params.insert(param.clone(), (*value).to_string());
                }
            }
        }
        Ok(params)
    }

    fn wrong_collection(&self, input: &str) -> ParseError {
        ParseError::WrongCollection {
            expected: self.full_name(),
            input: input.to_string(),
        }
    }
}

fn split_path(input: &str) -> Result<Vec<&str>, ParseError> {
    let segments: Vec<&str> = input.split('/').collect();
    if segments.iter().any(|s| s.is_empty() || s.chars().any(char::is_whitespace)) {
        return Err(ParseError::InvalidUrl(input.to_string()));
    }
    Ok(segments)
}

fn parse_template(template: &str) -> Result<Vec<Segment>, String> {
    if template.is_empty() {
        return Err("empty template".to_string());
    }
    template
        .split('/')
        .map(|seg| {
            if let Some(inner) = seg.strip_prefix('{') {
                let name = inner
                    .strip_suffix('}')
                    .ok_or_else(|| format!("unterminated parameter [{seg}]"))?;
                if name.is_empty() || name.contains(['{', '}']) {
                    return Err(format!("bad parameter [{seg}]"));
                }
                Ok(Segment::Param(name.to_string()))
            } else if seg.is_empty() || seg.contains(['{', '}']) {
                Err(format!("bad literal [{seg}]"))
            } else {
                Ok(Segment::Literal(seg.to_string()))
            }
        })
        .collect()
}
