use super::{json_pretty, parse_version, Context, EXIT_SUCCESS};
use fabric_schema::parse_profile_file;
use std::path::Path;
use tracing::debug;

/// Import TOML profile definitions. Existing profiles are replaced only with
/// `update`.
pub fn run(
    ctx: &Context,
    files: &[impl AsRef<Path>],
    version: Option<&str>,
    update: bool,
) -> Result<u8, String> {
    let fallback = version.map(parse_version).transpose()?;
    let fabric = ctx.fabric()?;
    let profiles = fabric.profiles();

    let mut imported = Vec::new();
    for file in files {
        let file = file.as_ref();
        let profile = parse_profile_file(file)
            .and_then(|def| def.into_profile(fallback.as_ref()))
            .map_err(|e| format!("profile error: {}: {e}", file.display()))?;
        debug!("importing {} from {}", profile.identity, file.display());

        let exists = profiles
            .get_profile_version(&profile.version)
            .map_err(|e| e.to_string())?
            .contains(&profile.identity);
        let stored = if exists && update {
            fabric.containers().update_profile(profile, None)
        } else {
            profiles.add_profile(profile)
        }
        .map_err(|e| e.to_string())?;
        imported.push(stored);
    }

    if ctx.json {
        let payload: Vec<_> = imported
            .iter()
            .map(|p| serde_json::json!({ "version": p.version, "profile": p.identity }))
            .collect();
        println!("{}", json_pretty(&payload)?);
    } else {
        for profile in &imported {
            println!("imported {} into version {}", profile.identity, profile.version);
        }
    }
    Ok(EXIT_SUCCESS)
}
