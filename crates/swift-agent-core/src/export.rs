//! Shell `export`/`unset` lines for `eval "$(swift-agent ...)"`.

/// Quote `value` for a POSIX shell.
///
/// Values made only of safe characters pass through untouched; anything else
/// is wrapped in single quotes with embedded quotes escaped.
pub fn shell_quote(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    let safe = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
    if safe {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r#"'"'"'"#))
}

/// Render `export KEY=value` for set values and `unset KEY` for empty ones,
/// sorted by key.
pub fn format_exports<K, V>(vars: impl IntoIterator<Item = (K, Option<V>)>) -> Vec<String>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut vars: Vec<(K, Option<V>)> = vars.into_iter().collect();
    vars.sort_by(|a, b| a.0.as_ref().cmp(b.0.as_ref()));
    vars.into_iter()
        .map(|(key, value)| {
            let key = key.as_ref();
            match value {
                Some(v) if !v.as_ref().is_empty() => {
                    format!("export {key}={}", shell_quote(v.as_ref()))
                }
                _ => format!("unset {key}"),
            }
        })
        .collect()
}
