use super::{json_pretty, parse_version, Context, EXIT_SUCCESS};
use fabric_schema::{Profile, ProfileVersion};

pub fn list(ctx: &Context) -> Result<u8, String> {
    let fabric = ctx.fabric()?;
    let profiles = fabric.profiles();
    let mut versions = Vec::new();
    for version in profiles.get_versions().map_err(|e| e.to_string())? {
        versions.push(profiles.get_profile_version(&version).map_err(|e| e.to_string())?);
    }
    if ctx.json {
        println!("{}", json_pretty(&versions)?);
    } else if versions.is_empty() {
        println!("no profile versions found");
    } else {
        println!("{:<12} PROFILES", "VERSION");
        for pv in &versions {
            println!("{:<12} {}", pv.version.to_string(), pv.profiles.len());
        }
    }
    Ok(EXIT_SUCCESS)
}

/// Create a version, optionally seeded with copies of another version's
/// profiles.
pub fn add(ctx: &Context, version: &str, from: Option<&str>) -> Result<u8, String> {
    let version = parse_version(version)?;
    let fabric = ctx.fabric()?;
    let profiles = fabric.profiles();
    let seed: Vec<Profile> = match from {
        Some(source) => {
            let source = parse_version(source)?;
            profiles
                .get_profiles(&source)
                .map_err(|e| e.to_string())?
                .into_iter()
                .map(|mut p| {
                    p.version = version.clone();
                    p
                })
                .collect()
        }
        None => Vec::new(),
    };
    let pv = profiles
        .add_profile_version(ProfileVersion::new(version), seed)
        .map_err(|e| e.to_string())?;
    if ctx.json {
        println!("{}", json_pretty(&pv)?);
    } else {
        println!(
            "added version {} with {} profiles",
            pv.version,
            pv.profiles.len()
        );
    }
    Ok(EXIT_SUCCESS)
}

pub fn remove(ctx: &Context, version: &str) -> Result<u8, String> {
    let version = parse_version(version)?;
    let fabric = ctx.fabric()?;
    let removed = fabric
        .profiles()
        .remove_profile_version(&version)
        .map_err(|e| e.to_string())?;
    if ctx.json {
        let payload = serde_json::json!({
            "version": removed.version,
            "status": "removed",
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("removed version {}", removed.version);
    }
    Ok(EXIT_SUCCESS)
}
