use super::{json_pretty, LoadedPlan, EXIT_SUCCESS};

/// Print the effective plan after defaults and overrides are resolved.
pub fn run(loaded: &LoadedPlan, json: bool) -> Result<u8, String> {
    if json {
        let payload = serde_json::json!({
            "source": loaded.source,
            "plan": loaded.plan,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        let text = toml::to_string_pretty(&loaded.plan)
            .map_err(|e| format!("TOML serialization failed: {e}"))?;
        println!("# effective plan from {}\n{text}", loaded.source);
    }
    Ok(EXIT_SUCCESS)
}
