//! Notification targeting: who gets told about an incident.
//!
//! Organization settings are owned elsewhere (settings CRUD) and consumed
//! read-only through [`OrgDirectory`]. Resolution applies the targeting
//! mode, the viewer-inclusion flag, per-user opt-out, and finally the
//! priority-user reordering (ordering only, never membership).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetingMode {
  AllMembers,
  SpecificUsers,
  UsersWithRepos,
}

impl Default for TargetingMode {
  fn default() -> Self {
    Self::UsersWithRepos
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
  Owner,
  Admin,
  Member,
  Viewer,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrganizationIncidentSettings {
  #[serde(default)]
  pub targeting_mode: TargetingMode,
  #[serde(default)]
  pub include_viewers: bool,
  #[serde(default)]
  pub specific_user_ids: Vec<String>,
  #[serde(default)]
  pub specific_roles: Vec<MemberRole>,
  /// Ordering only: listed users are moved to the front of the recipient
  /// list for UI/email ordering. Never changes set membership.
  #[serde(default)]
  pub priority_user_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct OrgMember {
  pub user_id: String,
  pub role: MemberRole,
}

#[derive(Debug, Clone)]
pub struct UserProfile {
  pub email: Option<String>,
  pub receive_incident_notifications: bool,
}

/// Read-only lookups into the surrounding product's account data.
pub trait OrgDirectory: Send + Sync {
  fn settings(&self, org_id: &str) -> Option<OrganizationIncidentSettings>;
  fn members(&self, org_id: &str) -> Vec<OrgMember>;
  /// Users owning at least one repository in the organization.
  fn repo_owner_ids(&self, org_id: &str) -> HashSet<String>;
  fn user(&self, user_id: &str) -> Option<UserProfile>;
}

/// Resolve the recipient list for an organization, in delivery order.
pub fn resolve_recipients(directory: &dyn OrgDirectory, org_id: &str) -> Vec<String> {
  let settings = directory.settings(org_id).unwrap_or_default();
  let members = directory.members(org_id);

  let mut selected: Vec<String> = match settings.targeting_mode {
    TargetingMode::AllMembers => members
      .iter()
      .filter(|m| settings.include_viewers || m.role != MemberRole::Viewer)
      .map(|m| m.user_id.clone())
      .collect(),
    TargetingMode::SpecificUsers => {
      let mut out: Vec<String> = Vec::new();
      for id in &settings.specific_user_ids {
        out.push(id.clone());
      }
      for m in &members {
        if settings.specific_roles.contains(&m.role) {
          out.push(m.user_id.clone());
        }
      }
      out.retain(|id| {
        settings.include_viewers
          || members
            .iter()
            .find(|m| m.user_id == *id)
            .map_or(true, |m| m.role != MemberRole::Viewer)
      });
      out
    }
    TargetingMode::UsersWithRepos => {
      let owners = directory.repo_owner_ids(org_id);
      members
        .iter()
        .filter(|m| owners.contains(&m.user_id))
        .map(|m| m.user_id.clone())
        .collect()
    }
  };

  // Dedupe, preserving first-seen order.
  let mut seen = HashSet::new();
  selected.retain(|id| seen.insert(id.clone()));

  // Explicit opt-out always wins.
  selected.retain(|id| {
    directory
      .user(id)
      .map_or(true, |u| u.receive_incident_notifications)
  });

  // Priority users first (in their listed order), the rest keep theirs.
  if !settings.priority_user_ids.is_empty() {
    let mut front: Vec<String> = Vec::new();
    for id in &settings.priority_user_ids {
      if let Some(pos) = selected.iter().position(|s| s == id) {
        front.push(selected.remove(pos));
      }
    }
    front.append(&mut selected);
    selected = front;
  }

  selected
}

/// In-memory directory: the integration point for tests and for running the
/// gateway without the surrounding product.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
  pub settings: std::collections::HashMap<String, OrganizationIncidentSettings>,
  pub members: std::collections::HashMap<String, Vec<OrgMember>>,
  pub repo_owners: std::collections::HashMap<String, HashSet<String>>,
  pub users: std::collections::HashMap<String, UserProfile>,
}

impl OrgDirectory for InMemoryDirectory {
  fn settings(&self, org_id: &str) -> Option<OrganizationIncidentSettings> {
    self.settings.get(org_id).cloned()
  }

  fn members(&self, org_id: &str) -> Vec<OrgMember> {
    self.members.get(org_id).cloned().unwrap_or_default()
  }

  fn repo_owner_ids(&self, org_id: &str) -> HashSet<String> {
    self.repo_owners.get(org_id).cloned().unwrap_or_default()
  }

  fn user(&self, user_id: &str) -> Option<UserProfile> {
    self.users.get(user_id).cloned()
  }
}
