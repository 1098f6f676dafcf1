use super::{json_pretty, parse_version, print_profile, Context, EXIT_SUCCESS};
use fabric_schema::ProfileIdentity;

pub fn list(ctx: &Context, version: &str) -> Result<u8, String> {
    let version = parse_version(version)?;
    let fabric = ctx.fabric()?;
    let profiles = fabric
        .profiles()
        .get_profiles(&version)
        .map_err(|e| e.to_string())?;
    if ctx.json {
        println!("{}", json_pretty(&profiles)?);
    } else if profiles.is_empty() {
        println!("no profiles in version {version}");
    } else {
        println!("{:<24} {:<6} PARENTS", "PROFILE", "ITEMS");
        for profile in &profiles {
            let parents: Vec<&str> = profile.parents.iter().map(|p| p.as_str()).collect();
            println!(
                "{:<24} {:<6} {}",
                profile.identity.as_str(),
                profile.items.len(),
                parents.join(",")
            );
        }
    }
    Ok(EXIT_SUCCESS)
}

pub fn show(ctx: &Context, version: &str, profile: &str) -> Result<u8, String> {
    let version = parse_version(version)?;
    let fabric = ctx.fabric()?;
    let profile = fabric
        .profiles()
        .get_profile(&version, &ProfileIdentity::new(profile))
        .map_err(|e| e.to_string())?;
    if ctx.json {
        println!("{}", json_pretty(&profile)?);
    } else {
        print_profile(&profile);
    }
    Ok(EXIT_SUCCESS)
}

pub fn remove(ctx: &Context, version: &str, profile: &str) -> Result<u8, String> {
    let version = parse_version(version)?;
    let fabric = ctx.fabric()?;
    let removed = fabric
        .profiles()
        .remove_profile(&version, &ProfileIdentity::new(profile))
        .map_err(|e| e.to_string())?;
    if ctx.json {
        let payload = serde_json::json!({
            "version": removed.version,
            "profile": removed.identity,
            "status": "removed",
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("removed profile {} from version {}", removed.identity, removed.version);
    }
    Ok(EXIT_SUCCESS)
}
