//! URL helpers.

use url::{Position, Url};

use crate::error::AgentError;

/// Reduce a URL to its `scheme://host[:port]` prefix.
///
/// Capability documents are keyed by this projection so that every URL on
/// the same cluster shares one entry.
pub fn scheme_host_only(raw: &str) -> Result<String, AgentError> {
    let parsed = parse_absolute(raw)?;
    Ok(parsed[..Position::AfterPort].to_string())
}

/// Whether `raw` parses as an absolute URL with a host.
pub fn is_absolute_url(raw: &str) -> bool {
    parse_absolute(raw).is_ok()
}

fn parse_absolute(raw: &str) -> Result<Url, AgentError> {
    let invalid = |reason: String| AgentError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };
    let parsed = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if !parsed.has_host() || parsed.host_str().is_some_and(str::is_empty) {
        return Err(invalid("expected an absolute URL".to_string()));
    }
    Ok(parsed)
}
