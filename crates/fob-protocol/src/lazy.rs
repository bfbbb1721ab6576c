//! On-demand ("lazy") compilation request/response contract.
//!
//! The runtime asks the dev server to build modules that are not part of the
//! current output with:
//!
//! ```text
//! GET /__lazy_compile?paths=<comma-joined,url-encoded>&t=<cache-bust>[&node=true]
//! ```
//!
//! and receives the resources to load plus, for every module id, the indices of
//! the resources it needs.

use indexmap::{IndexMap, IndexSet};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::resource::{DynamicResourceMap, Resource};

/// Characters left untouched by `encodeURIComponent`.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// A batch of module paths to compile on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LazyCompileRequest {
    pub paths: Vec<String>,
    /// Cache-busting token
    pub token: String,
    /// Request comes from a Node target
    pub node: bool,
}

impl LazyCompileRequest {
    pub fn new(paths: Vec<String>, token: impl Into<String>) -> Self {
        Self {
            paths,
            token: token.into(),
            node: false,
        }
    }

    pub fn with_node(mut self, node: bool) -> Self {
        self.node = node;
        self
    }

    /// Encode as a query string (without the leading `?`).
    pub fn to_query(&self) -> String {
        let paths = self
            .paths
            .iter()
            .map(|p| utf8_percent_encode(p, COMPONENT).to_string())
            .collect::<Vec<_>>()
            .join(",");
        let token = utf8_percent_encode(&self.token, COMPONENT);

        let mut query = format!("paths={}&t={}", paths, token);
        if self.node {
            query.push_str("&node=true");
        }
        query
    }

    /// Full request URL for the given endpoint path.
    pub fn to_url(&self, endpoint: &str) -> String {
        format!("{}?{}", endpoint, self.to_query())
    }

    /// Parse a query string produced by [`to_query`](Self::to_query).
    pub fn from_query(query: &str) -> Result<Self> {
        let query = query.strip_prefix('?').unwrap_or(query);

        let mut paths = None;
        let mut token = String::new();
        let mut node = false;

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "paths" => {
                    let decoded = value
                        .split(',')
                        .filter(|p| !p.is_empty())
                        .map(|p| decode(p, "paths"))
                        .collect::<Result<Vec<_>>>()?;
                    paths = Some(decoded);
                }
                "t" => token = decode(value, "t")?,
                "node" => {
                    node = match value {
                        "true" | "1" | "" => true,
                        "false" | "0" => false,
                        other => {
                            return Err(ProtocolError::InvalidParameter {
                                name: "node",
                                value: other.to_string(),
                            });
                        }
                    }
                }
                _ => {}
            }
        }

        let paths = paths.ok_or(ProtocolError::MissingParameter("paths"))?;
        if paths.is_empty() {
            return Err(ProtocolError::InvalidParameter {
                name: "paths",
                value: String::new(),
            });
        }

        Ok(Self { paths, token, node })
    }
}

fn decode(value: &str, name: &'static str) -> Result<String> {
    percent_decode_str(value)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| ProtocolError::InvalidParameter {
            name,
            value: value.to_string(),
        })
}

/// Response body of the lazy compile endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LazyCompileResponse {
    pub dynamic_resources: Vec<Resource>,
    /// Module id -> indices into `dynamic_resources`
    pub dynamic_module_resources_map: IndexMap<String, Vec<usize>>,
}

impl LazyCompileResponse {
    /// Build a response from a resolved map, sharing resources between modules.
    pub fn from_resource_map(map: &DynamicResourceMap) -> Self {
        let mut resources: IndexSet<Resource> = IndexSet::new();
        let mut modules = IndexMap::with_capacity(map.len());

        for (id, list) in map {
            let indices = list
                .iter()
                .map(|resource| resources.insert_full(resource.clone()).0)
                .collect();
            modules.insert(id.clone(), indices);
        }

        Self {
            dynamic_resources: resources.into_iter().collect(),
            dynamic_module_resources_map: modules,
        }
    }

    /// Resolve indices back into per-module resource lists.
    pub fn into_resource_map(self) -> Result<DynamicResourceMap> {
        let len = self.dynamic_resources.len();
        let mut map = DynamicResourceMap::with_capacity(self.dynamic_module_resources_map.len());

        for (module, indices) in self.dynamic_module_resources_map {
            let mut list = Vec::with_capacity(indices.len());
            for index in indices {
                let resource = self.dynamic_resources.get(index).cloned().ok_or_else(|| {
                    ProtocolError::ResourceIndexOutOfRange {
                        module: module.clone(),
                        index,
                        len,
                    }
                })?;
                list.push(resource);
            }
            map.insert(module, list);
        }

        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_encodes_each_path() {
        let request = LazyCompileRequest::new(
            vec!["src/pages/a,b.tsx".to_string(), "/abs/c d.ts".to_string()],
            "17",
        );
        assert_eq!(
            request.to_query(),
            "paths=src%2Fpages%2Fa%2Cb.tsx,%2Fabs%2Fc%20d.ts&t=17"
        );
    }

    #[test]
    fn test_query_node_flag() {
        let request = LazyCompileRequest::new(vec!["a.ts".to_string()], "1").with_node(true);
        assert_eq!(request.to_query(), "paths=a.ts&t=1&node=true");
        assert_eq!(
            request.to_url("/__lazy_compile"),
            "/__lazy_compile?paths=a.ts&t=1&node=true"
        );
    }

    #[test]
    fn test_parse_query() {
        let parsed =
            LazyCompileRequest::from_query("?paths=src%2Fpages%2Fa%2Cb.tsx,b.ts&t=42").unwrap();
        assert_eq!(parsed.paths, vec!["src/pages/a,b.tsx", "b.ts"]);
        assert_eq!(parsed.token, "42");
        assert!(!parsed.node);
    }

    #[test]
    fn test_parse_query_missing_paths() {
        let err = LazyCompileRequest::from_query("t=1").unwrap_err();
        assert!(matches!(err, ProtocolError::MissingParameter("paths")));
    }

    #[test]
    fn test_parse_query_invalid_node() {
        let err = LazyCompileRequest::from_query("paths=a&node=maybe").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidParameter { name: "node", .. }));
    }

    #[test]
    fn test_response_shares_resources() {
        let mut map = DynamicResourceMap::new();
        map.insert(
            "a".to_string(),
            vec![Resource::script("shared.js"), Resource::script("a.js")],
        );
        map.insert(
            "b".to_string(),
            vec![Resource::script("shared.js"), Resource::link("b.css")],
        );

        let response = LazyCompileResponse::from_resource_map(&map);
        assert_eq!(response.dynamic_resources.len(), 3);
        assert_eq!(response.dynamic_module_resources_map["a"], vec![0, 1]);
        assert_eq!(response.dynamic_module_resources_map["b"], vec![0, 2]);

        assert_eq!(response.into_resource_map().unwrap(), map);
    }

    #[test]
    fn test_response_rejects_bad_index() {
        let mut response = LazyCompileResponse::default();
        response
            .dynamic_module_resources_map
            .insert("a".to_string(), vec![3]);

        let err = response.into_resource_map().unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::ResourceIndexOutOfRange { index: 3, len: 0, .. }
        ));
    }

    #[test]
    fn test_response_wire_names() {
        let json = serde_json::to_value(LazyCompileResponse::default()).unwrap();
        assert!(json.get("dynamicResources").is_some());
        assert!(json.get("dynamicModuleResourcesMap").is_some());
    }
}
