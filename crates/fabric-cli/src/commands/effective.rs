use super::{json_pretty, parse_version, print_profile, Context, EXIT_SUCCESS};
use fabric_schema::ProfileIdentity;

/// Print the effective profile of one profile, or of a profile list in
/// assignment order.
pub fn run(ctx: &Context, version: &str, profiles: &[String]) -> Result<u8, String> {
    let version = parse_version(version)?;
    let ids: Vec<ProfileIdentity> = profiles.iter().map(ProfileIdentity::new).collect();
    let fabric = ctx.fabric()?;
    let service = fabric.profiles();
    let effective = match ids.as_slice() {
        [single] => service.get_effective_profile(&version, single),
        _ => service.get_effective_profile_for(&version, &ids),
    }
    .map_err(|e| e.to_string())?;

    if ctx.json {
        println!("{}", json_pretty(&effective)?);
    } else {
        print_profile(&effective);
    }
    Ok(EXIT_SUCCESS)
}
