//! Object-store endpoint selection from a Keystone service catalog.
//!
//! v2 and v3 catalogs share a shape: a list of services, each with a `type`,
//! a `name` and a list of endpoints. They differ in the key holding the
//! endpoint URL (`publicURL` vs `url`) and in v3's `interface` field.

use serde_json::Value;
use thiserror::Error;
use tracing::info;

const OBJECT_STORE: &str = "object-store";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Multiple services found: {0:?}")]
    MultipleServices(Vec<String>),

    #[error("Error in response: {0}")]
    Malformed(String),
}

/// Optional filters narrowing the endpoint choice.
#[derive(Debug, Default, Clone, Copy)]
pub struct EndpointFilter<'a> {
    pub service_name: Option<&'a str>,
    pub region: Option<&'a str>,
    pub interface: Option<&'a str>,
}

impl EndpointFilter<'_> {
    fn is_empty(&self) -> bool {
        self.service_name.is_none() && self.region.is_none() && self.interface.is_none()
    }
}

/// Pick the object-store endpoint URL out of `catalog`.
///
/// Without filters the first endpoint of the first object-store service is
/// used. Otherwise services are narrowed by name (more than one survivor is
/// an error) and endpoints by region and interface.
pub fn select_endpoint(
    catalog: &Value,
    filter: &EndpointFilter<'_>,
    url_key: &str,
) -> Result<String, CatalogError> {
    let services: Vec<&Value> = catalog
        .as_array()
        .ok_or_else(|| malformed("service catalog is not a list"))?
        .iter()
        .filter(|s| s.get("type").and_then(Value::as_str) == Some(OBJECT_STORE))
        .collect();
    info!(services = ?service_names(&services), "found object-store services");

    let services: Vec<&Value> = match filter.service_name {
        Some(wanted) => services
            .into_iter()
            .filter(|s| s.get("name").and_then(Value::as_str) == Some(wanted))
            .collect(),
        None => services,
    };
    if !filter.is_empty() && services.len() > 1 {
        return Err(CatalogError::MultipleServices(service_names(&services)));
    }

    let service = services
        .first()
        .ok_or_else(|| malformed("no matching object-store service"))?;
    let endpoints = service
        .get("endpoints")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("service has no endpoints"))?;

    let chosen = endpoints.iter().find(|e| {
        matches_field(e, "region", filter.region) && matches_field(e, "interface", filter.interface)
    });
    let endpoint = chosen.ok_or_else(|| malformed("no matching endpoint"))?;
    endpoint
        .get(url_key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| malformed(format!("endpoint has no {url_key}")))
}

fn matches_field(endpoint: &Value, key: &str, wanted: Option<&str>) -> bool {
    match wanted {
        Some(wanted) => endpoint.get(key).and_then(Value::as_str) == Some(wanted),
        None => true,
    }
}

fn service_names(services: &[&Value]) -> Vec<String> {
    services
        .iter()
        .map(|s| s.get("name").and_then(Value::as_str).unwrap_or("?").to_string())
        .collect()
}

fn malformed(detail: impl Into<String>) -> CatalogError {
    CatalogError::Malformed(detail.into())
}
