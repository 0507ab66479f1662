use indexmap::IndexMap;

/// Parses the YAML body of a `---` section into an ordered map. The body
/// must be a mapping with string keys; an empty body is an empty map.
pub fn parse_config(source: &str) -> Result<IndexMap<String, serde_json::Value>, String> {
    if source.trim().is_empty() {
        return Ok(IndexMap::new());
    }
    serde_yaml::from_str(source).map_err(|err| err.to_string())
}
