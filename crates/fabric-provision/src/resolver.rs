//! Requirement resolution against an [`Environment`].
//!
//! Resolution is transitive: every selected resource contributes its own
//! requirements to the work list. Fixed resources are consulted first, then
//! resources already selected in this pass, then the repository, where the
//! highest version of a matching resource wins.

use crate::provisioner::{Environment, ProvisionResult};
use fabric_schema::{Requirement, Resource, Version};
use std::cmp::Ordering;
use std::collections::{BTreeSet, VecDeque};
use tracing::debug;

pub fn resolve(environment: &Environment, requirements: &[Requirement]) -> ProvisionResult {
    let mut result = ProvisionResult::default();
    let mut seen: BTreeSet<Requirement> = BTreeSet::new();
    let mut queue: VecDeque<Requirement> = requirements.iter().cloned().collect();
    for fixed in environment.fixed() {
        queue.extend(fixed.requirements.iter().cloned());
    }

    while let Some(requirement) = queue.pop_front() {
        if !seen.insert(requirement.clone()) {
            continue;
        }

        let already = environment
            .fixed()
            .iter()
            .chain(result.resources.iter())
            .any(|r| r.provides(&requirement));
        if already {
            continue;
        }

        match best_candidate(environment, &requirement) {
            Some(resource) => {
                debug!("resolved {requirement} -> {}", resource.identity);
                queue.extend(resource.requirements.iter().cloned());
                result.resources.push(resource.clone());
            }
            None if requirement.optional => {
                debug!("optional requirement {requirement} left unresolved");
            }
            None => result.unsatisfied.push(requirement),
        }
    }

    result
}

fn best_candidate<'a>(environment: &'a Environment, requirement: &Requirement) -> Option<&'a Resource> {
    environment
        .resources()
        .iter()
        .filter(|r| r.provides(requirement))
        .max_by(|a, b| compare_versions(a, b))
}

fn compare_versions(a: &Resource, b: &Resource) -> Ordering {
    let parse = |r: &Resource| r.identity.version().and_then(|v| Version::parse(v).ok());
    match (parse(a), parse(b)) {
        (Some(va), Some(vb)) => va.cmp(&vb),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.identity.cmp(&b.identity),
    }
}
