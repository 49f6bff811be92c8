//! Delegation matching and the pre-order target search.
//!
//! [`resolve`] answers which delegated roles of one targets role may describe
//! a path. [`TargetSearch`] walks the delegation graph depth first in
//! declaration order on an explicit work-list and stops as soon as a trusted
//! role lists the path. The search never loads anything itself: when a role
//! is missing from the trusted set it yields [`SearchStep::NeedsRole`] and
//! resumes once the caller has loaded it.

use std::collections::{BTreeMap, HashSet};

use globset::Glob;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{Error, Pin, Result};
use crate::metadata::{verify_hashes, DelegatedRole, Delegations, RoleType, TargetFile};
use crate::trusted::TrustedMetadataSet;

/// A delegated role whose paths cover the searched target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationCandidate {
    pub role: String,
    pub terminating: bool,
}

/// Returns the roles of `delegations` that may describe `path`, in declaration order.
///
/// The list ends at the first matching terminating role.
pub fn resolve(path: &str, delegations: &Delegations) -> Vec<DelegationCandidate> {
    if let Some(succinct) = &delegations.succinct_roles {
        return vec![DelegationCandidate {
            role: succinct.role_for_path(path),
            terminating: true,
        }];
    }
    let mut candidates = Vec::new();
    for role in delegations.roles.iter().flatten() {
        if !matches_path(role, path) {
            continue;
        }
        candidates.push(DelegationCandidate {
            role: role.name.clone(),
            terminating: role.terminating,
        });
        if role.terminating {
            break;
        }
    }
    candidates
}

/// Returns `true` if `role` is trusted to describe `path`.
pub fn matches_path(role: &DelegatedRole, path: &str) -> bool {
    if let Some(patterns) = &role.paths {
        return patterns.iter().any(|pattern| path_matches_pattern(path, pattern));
    }
    if let Some(prefixes) = &role.path_hash_prefixes {
        let digest = hex::encode(Sha256::digest(path.as_bytes()));
        return prefixes
            .iter()
            .any(|prefix| digest.starts_with(&prefix.to_ascii_lowercase()));
    }
    false
}

/// Shell-style match applied per `/`-separated component.
///
/// Both sides must have the same number of components, so `*` never spans a
/// directory separator.
pub fn path_matches_pattern(path: &str, pattern: &str) -> bool {
    let path_parts: Vec<&str> = path.split('/').collect();
    let pattern_parts: Vec<&str> = pattern.split('/').collect();
    if path_parts.len() != pattern_parts.len() {
        return false;
    }
    path_parts
        .iter()
        .zip(&pattern_parts)
        .all(|(part, pattern)| component_matches(part, pattern))
}

fn component_matches(part: &str, pattern: &str) -> bool {
    match Glob::new(pattern) {
        Ok(glob) => glob.compile_matcher().is_match(part),
        Err(err) => {
            debug!(pattern, error = %err, "tuf: ignoring invalid delegation pattern");
            false
        }
    }
}

/// An authenticated target description and the role that vouched for it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTarget {
    pub path: String,
    pub length: u64,
    pub hashes: BTreeMap<String, String>,
    pub custom: Option<Value>,
    pub role: String,
}

impl ResolvedTarget {
    /// Checks downloaded content against the authenticated length and hashes.
    pub fn verify(&self, data: &[u8]) -> Result<()> {
        let actual = data.len() as u64;
        if actual != self.length {
            return Err(Error::PinMismatch {
                role: self.path.clone(),
                pin: Pin::Length {
                    expected: self.length,
                    actual,
                },
            });
        }
        verify_hashes(&self.path, &self.hashes, data)
    }

    fn new(path: &str, role: &str, file: &TargetFile) -> Self {
        Self {
            path: path.to_string(),
            length: file.length,
            hashes: file.hashes.clone(),
            custom: file.custom.clone(),
            role: role.to_string(),
        }
    }
}

/// Outcome of advancing a [`TargetSearch`].
#[derive(Debug, Clone, PartialEq)]
pub enum SearchStep {
    Found(ResolvedTarget),
    /// Every reachable role was visited without finding the path.
    Exhausted,
    /// A terminating delegation claimed the path but its subtree did not list it.
    Terminated { role: String },
    /// `role` must be loaded, authorized by `delegator`, before the search can continue.
    NeedsRole { role: String, delegator: String },
}

#[derive(Debug, Clone)]
struct Pending {
    role: String,
    delegator: Option<String>,
    depth: usize,
}

/// Resumable pre-order depth-first search for one target path.
#[derive(Debug, Clone)]
pub struct TargetSearch {
    path: String,
    pending: Vec<Pending>,
    visited: HashSet<(String, Option<String>)>,
    visits: usize,
    max_depth: usize,
    max_visits: usize,
    terminated_by: Option<String>,
}

impl TargetSearch {
    /// Starts a search at the top-level targets role.
    ///
    /// `max_depth` bounds how many delegation edges are followed from the top
    /// level; `max_visits` bounds how many roles are examined in total.
    pub fn new(path: impl Into<String>, max_depth: usize, max_visits: usize) -> Self {
        Self {
            path: path.into(),
            pending: vec![Pending {
                role: RoleType::Targets.as_str().to_string(),
                delegator: None,
                depth: 0,
            }],
            visited: HashSet::new(),
            visits: 0,
            max_depth,
            max_visits,
            terminated_by: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Advances the search as far as `set` allows.
    pub fn step(&mut self, set: &TrustedMetadataSet) -> SearchStep {
        loop {
            let Some(next) = self.pending.last() else {
                return match self.terminated_by.take() {
                    Some(role) => SearchStep::Terminated { role },
                    None => SearchStep::Exhausted,
                };
            };
            let key = (next.role.clone(), next.delegator.clone());
            if self.visited.contains(&key) {
                self.pending.pop();
                continue;
            }
            if self.visits >= self.max_visits {
                warn!(
                    path = %self.path,
                    max_visits = self.max_visits,
                    "tuf: delegation visit limit reached"
                );
                self.pending.clear();
                return SearchStep::Exhausted;
            }
            let Some(targets) = set.final_targets(&next.role) else {
                return match &next.delegator {
                    Some(delegator) => SearchStep::NeedsRole {
                        role: next.role.clone(),
                        delegator: delegator.clone(),
                    },
                    // The top-level role is always part of a consumable set.
                    None => SearchStep::Exhausted,
                };
            };
            let Some(current) = self.pending.pop() else {
                return SearchStep::Exhausted;
            };
            self.visits += 1;
            self.visited.insert(key);

            if let Some(file) = targets.signed.targets.get(&self.path) {
                debug!(path = %self.path, role = %current.role, "tuf: target found");
                return SearchStep::Found(ResolvedTarget::new(&self.path, &current.role, file));
            }
            let Some(delegations) = &targets.signed.delegations else {
                continue;
            };
            if current.depth >= self.max_depth {
                warn!(
                    path = %self.path,
                    role = %current.role,
                    max_depth = self.max_depth,
                    "tuf: delegation depth limit reached"
                );
                continue;
            }

            let candidates = resolve(&self.path, delegations);
            if let Some(last) = candidates.last().filter(|c| c.terminating) {
                debug!(role = %last.role, "tuf: terminating delegation prunes remaining roles");
                self.pending.clear();
                self.terminated_by = Some(last.role.clone());
            }
            self.pending
                .extend(candidates.into_iter().rev().map(|candidate| Pending {
                    role: candidate.role,
                    delegator: Some(current.role.clone()),
                    depth: current.depth + 1,
                }));
        }
    }
}
