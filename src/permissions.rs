//! Permission resolution: role assignments → individual user grants.
//!
//! Each crawled object may carry role assignments, either inherited or
//! unique. An assignment's principal is a user or a group; groups with
//! enumerable member users expand into one grant per member, labeled
//! with the principal's title, while a memberless principal is granted
//! to itself. Resolved names pass through an optional identity map
//! before the grant is pushed.
//!
//! Grants go to the sink individually and idempotently; the sink is
//! expected to tolerate repeats, so nothing is deduplicated here.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::models::AttrMap;
use crate::sink::Sink;
use crate::source::SourceClient;

const ROLE_EXPAND: &str = "$expand=Member/users,RoleDefinitionBindings";

/// Coordinates of the object whose role assignments are being resolved.
#[derive(Debug, Clone, Copy)]
pub enum PermissionScope<'a> {
    Site {
        site_path: &'a str,
    },
    List {
        site_path: &'a str,
        list_id: &'a str,
    },
    Item {
        site_path: &'a str,
        list_id: &'a str,
        item_id: &'a str,
    },
}

impl PermissionScope<'_> {
    /// Relative role-assignment query URL for this scope.
    fn role_assignments_url(&self) -> String {
        match self {
            PermissionScope::Site { site_path } => {
                format!("{site_path}/_api/web/roleassignments?{ROLE_EXPAND}")
            }
            PermissionScope::List { site_path, list_id } => format!(
                "{site_path}/_api/web/lists(guid'{list_id}')/roleassignments?{ROLE_EXPAND}"
            ),
            PermissionScope::Item {
                site_path,
                list_id,
                item_id,
            } => format!(
                "{site_path}/_api/web/lists(guid'{list_id}')/items({item_id})/roleassignments?{ROLE_EXPAND}"
            ),
        }
    }
}

/// What one resolution produced: the principal titles to stamp on the
/// document, and how many grant pushes failed at the sink.
#[derive(Debug, Default)]
pub struct GrantOutcome {
    pub labels: Vec<String>,
    pub sink_errors: usize,
}

pub struct PermissionResolver {
    source: Arc<dyn SourceClient>,
    sink: Arc<dyn Sink>,
    mapping: HashMap<String, String>,
}

impl PermissionResolver {
    pub fn new(
        source: Arc<dyn SourceClient>,
        sink: Arc<dyn Sink>,
        mapping: HashMap<String, String>,
    ) -> Self {
        Self {
            source,
            sink,
            mapping,
        }
    }

    /// Load the optional identity-mapping table (two-column CSV, raw
    /// name → substituted name). Absent, empty, or unreadable tables
    /// mean identity passthrough.
    pub fn load_identity_map(path: Option<&Path>) -> HashMap<String, String> {
        let Some(path) = path else {
            return HashMap::new();
        };
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "user mapping file not readable, using identity passthrough"
                );
                return HashMap::new();
            }
        };
        let mut mapping = HashMap::new();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some((raw_name, mapped)) = line.split_once(',') {
                mapping.insert(raw_name.trim().to_string(), mapped.trim().to_string());
            }
        }
        mapping
    }

    fn substitute(&self, name: &str) -> String {
        self.mapping
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// Fetch and expand the role assignments for one object, pushing a
    /// grant to the sink for every resolved identity.
    ///
    /// A fetch failure or an empty assignment set resolves to "no
    /// permissions to propagate"; only grant-push failures count toward
    /// the partition failure flag.
    pub async fn resolve(&self, scope: PermissionScope<'_>) -> GrantOutcome {
        let url = scope.role_assignments_url();
        let assignments = match self.source.fetch(&url, "").await {
            Ok(assignments) => assignments,
            Err(err) => {
                warn!(url, error = %err, "could not fetch role assignments, treating as empty");
                return GrantOutcome::default();
            }
        };
        if assignments.is_empty() {
            debug!(url, "no role assignments on object");
            return GrantOutcome::default();
        }

        let mut outcome = GrantOutcome::default();
        for assignment in &assignments {
            let Some(title) = member_title(assignment) else {
                continue;
            };
            outcome.labels.push(title.to_string());

            match member_users(assignment) {
                Some(users) if !users.is_empty() => {
                    for user in users {
                        self.push_grant(&self.substitute(user), title, &mut outcome)
                            .await;
                    }
                }
                _ => {
                    // No enumerable members: the principal itself is the
                    // grantable identity.
                    let principal = self.substitute(title);
                    let label = principal.clone();
                    self.push_grant(&principal, &label, &mut outcome).await;
                }
            }
        }
        outcome
    }

    async fn push_grant(&self, user: &str, permission: &str, outcome: &mut GrantOutcome) {
        if let Err(err) = self.sink.add_permission(user, permission).await {
            error!(user, permission, error = %err, "failed to push permission grant");
            outcome.sink_errors += 1;
        }
    }
}

fn member_title(assignment: &AttrMap) -> Option<&str> {
    assignment
        .get("Member")?
        .get("Title")
        .and_then(Value::as_str)
}

fn member_users(assignment: &AttrMap) -> Option<Vec<&str>> {
    let users = assignment
        .get("Member")?
        .get("Users")?
        .get("results")?
        .as_array()?;
    Some(
        users
            .iter()
            .filter_map(|u| u.get("Title").and_then(Value::as_str))
            .collect(),
    )
}
