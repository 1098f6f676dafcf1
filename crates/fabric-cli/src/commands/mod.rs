pub mod completions;
pub mod effective;
pub mod import;
pub mod profiles;
pub mod provision;
pub mod versions;

use fabric_core::{Fabric, FabricConfig};
use fabric_schema::{Profile, ProfileItem, Version};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_DEFINITION_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;

/// Where the registry lives and how the services are configured.
#[derive(Debug, Clone)]
pub struct Context {
    pub store: PathBuf,
    pub config: FabricConfig,
    pub json: bool,
}

impl Context {
    pub fn load(store: PathBuf, config: Option<&Path>, json: bool) -> Result<Self, String> {
        let config = match config {
            Some(path) => FabricConfig::load(path),
            None => FabricConfig::load_default(),
        }
        .map_err(|e| e.to_string())?;
        Ok(Self {
            store,
            config,
            json,
        })
    }

    /// A started fabric over the file-backed registry.
    pub fn fabric(&self) -> Result<Fabric, String> {
        let fabric = Fabric::builder()
            .config(self.config.clone())
            .store(&self.store)
            .map_err(|e| e.to_string())?
            .build()
            .map_err(|e| e.to_string())?;
        fabric.start().map_err(|e| e.to_string())?;
        Ok(fabric)
    }
}

pub fn parse_version(input: &str) -> Result<Version, String> {
    Version::parse(input).map_err(|e| format!("profile error: {e}"))
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn finish(pb: &ProgressBar, msg: String) {
    if let Ok(style) = ProgressStyle::with_template("{msg}") {
        pb.set_style(style);
    }
    pb.finish_with_message(msg);
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✗ {msg}"));
}

pub fn colorize_state(state: &str) -> String {
    use console::Style;
    match state {
        "started" => Style::new().green().apply_to(state).to_string(),
        "created" => Style::new().yellow().apply_to(state).to_string(),
        "stopped" => Style::new().blue().apply_to(state).to_string(),
        "destroyed" => Style::new().dim().apply_to(state).to_string(),
        other => other.to_owned(),
    }
}

/// Human-readable listing of a profile's items.
pub fn print_profile(profile: &Profile) {
    println!("profile:  {}", profile.identity);
    println!("version:  {}", profile.version);
    if !profile.parents.is_empty() {
        let parents: Vec<&str> = profile.parents.iter().map(|p| p.as_str()).collect();
        println!("parents:  {}", parents.join(", "));
    }
    for (key, value) in &profile.attributes {
        println!("attr:     {key} = {value}");
    }
    for item in &profile.items {
        match item {
            ProfileItem::Configuration(c) => {
                println!("config    {}", c.id);
                for configuration in &c.configurations {
                    for (key, value) in &configuration.attributes {
                        println!("  [{}] {key} = {value}", configuration.name);
                    }
                }
            }
            ProfileItem::Resource(r) => {
                let mut flags = Vec::new();
                if r.shared {
                    flags.push("shared");
                }
                if r.is_abstract {
                    flags.push("abstract");
                }
                let flags = if flags.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", flags.join(", "))
                };
                println!("resource  {} -> {}{flags}", r.id, r.resource.identity);
            }
            ProfileItem::Requirement(r) => {
                let optional = if r.requirement.optional { " (optional)" } else { "" };
                println!("require   {} -> {}{optional}", r.id, r.requirement);
            }
        }
    }
}
