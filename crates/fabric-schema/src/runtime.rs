use crate::definition::ProfileError;
use crate::types::Attributes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Directive listing the runtime types a configuration applies to.
pub const INCLUDE_RUNTIME_TYPE: &str = "include.runtime.type";

/// Directive listing the runtime types a configuration never applies to.
pub const EXCLUDE_RUNTIME_TYPE: &str = "exclude.runtime.type";

/// Kind of runtime a container executes in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    Karaf,
    Tomcat,
    Wildfly,
    #[default]
    Other,
}

impl RuntimeType {
    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeType::Karaf => "karaf",
            RuntimeType::Tomcat => "tomcat",
            RuntimeType::Wildfly => "wildfly",
            RuntimeType::Other => "other",
        }
    }
}

impl fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeType {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "karaf" => Ok(RuntimeType::Karaf),
            "tomcat" => Ok(RuntimeType::Tomcat),
            "wildfly" => Ok(RuntimeType::Wildfly),
            "other" => Ok(RuntimeType::Other),
            _ => Err(ProfileError::UnknownRuntimeType(s.to_owned())),
        }
    }
}

fn directive_types(directives: &Attributes, key: &str) -> Option<Vec<String>> {
    let raw = directives.get(key)?;
    let types: Vec<String> = raw
        .split(',')
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    if types.is_empty() {
        None
    } else {
        Some(types)
    }
}

/// Evaluate the runtime-type directives of a configuration against `current`.
///
/// Included types default to the current runtime when absent; excluded types
/// are always subtracted.
pub fn runtime_matches(directives: &Attributes, current: RuntimeType) -> bool {
    let current = current.as_str();
    let included = directive_types(directives, INCLUDE_RUNTIME_TYPE)
        .map_or(true, |types| types.iter().any(|t| t == current));
    let excluded = directive_types(directives, EXCLUDE_RUNTIME_TYPE)
        .is_some_and(|types| types.iter().any(|t| t == current));
    included && !excluded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directives(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn no_directives_matches_everything() {
        assert!(runtime_matches(&Attributes::new(), RuntimeType::Karaf));
        assert!(runtime_matches(&Attributes::new(), RuntimeType::Other));
    }

    #[test]
    fn include_restricts_runtime() {
        let d = directives(&[(INCLUDE_RUNTIME_TYPE, "tomcat, wildfly")]);
        assert!(runtime_matches(&d, RuntimeType::Tomcat));
        assert!(runtime_matches(&d, RuntimeType::Wildfly));
        assert!(!runtime_matches(&d, RuntimeType::Karaf));
    }

    #[test]
    fn exclude_is_subtracted() {
        let d = directives(&[
            (INCLUDE_RUNTIME_TYPE, "karaf,tomcat"),
            (EXCLUDE_RUNTIME_TYPE, "Tomcat"),
        ]);
        assert!(runtime_matches(&d, RuntimeType::Karaf));
        assert!(!runtime_matches(&d, RuntimeType::Tomcat));

        let only_exclude = directives(&[(EXCLUDE_RUNTIME_TYPE, "other")]);
        assert!(!runtime_matches(&only_exclude, RuntimeType::Other));
        assert!(runtime_matches(&only_exclude, RuntimeType::Karaf));
    }

    #[test]
    fn empty_include_is_unspecified() {
        let d = directives(&[(INCLUDE_RUNTIME_TYPE, " ")]);
        assert!(runtime_matches(&d, RuntimeType::Karaf));
    }

    #[test]
    fn runtime_type_parse() {
        assert_eq!("KARAF".parse::<RuntimeType>().unwrap(), RuntimeType::Karaf);
        assert!("jetty".parse::<RuntimeType>().is_err());
    }
}
