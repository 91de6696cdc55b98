#![forbid(unsafe_code)]

use authsync_contracts::profile::{Destination, Profile, Role};

/// Pure mapping from a reconciled profile to its canonical landing
/// destination. Approval never gates the mapping; destination pages gate
/// capabilities themselves. Safe to re-evaluate on every render.
pub fn route_for(profile: &Profile) -> Destination {
    match profile.role {
        Role::Admin => Destination::AdminDashboard,
        Role::Agent => Destination::AgentDashboard,
        Role::Guest | Role::User | Role::AgentPending => Destination::UserDashboard,
    }
}
