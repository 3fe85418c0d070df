//! Group-visibility resolver.
//!
//! Whenever the online-user list changes, every connection gets a fresh
//! `updateUsers` map.  Admins and agents see the full sorted list; everyone
//! else sees only online members of their own groups, plus every online
//! admin/agent (those are always visible).

use std::collections::{BTreeMap, HashSet};

use tracing::warn;

use kestrel_shared::protocol::{PublicUser, ServerEvent};
use kestrel_shared::types::ConnectionId;
use kestrel_store::{Group, User};

use crate::server::ChatServer;

/// Push an online-user map to every live connection.
///
/// A group-lookup failure only skips that one connection's emission; the
/// rest of the fan-out proceeds.
pub async fn update_users(server: &ChatServer) {
    // Snapshot before any persistence call: the registry may change while
    // group lookups run, and each emission must use one coherent view.
    let (targets, online) = {
        let state = server.state().read().await;
        let targets: Vec<(ConnectionId, User)> = state
            .connections()
            .map(|c| (c.id, c.user.clone()))
            .collect();
        (targets, state.online_users())
    };

    let full: BTreeMap<String, PublicUser> =
        online.iter().map(|u| (u.username.clone(), u.public())).collect();

    for (conn, owner) in targets {
        if owner.role.is_privileged() {
            server
                .send_to_self(conn, ServerEvent::UpdateUsers(full.clone()))
                .await;
            continue;
        }

        let groups = match server.db().get_all_groups_of_user(owner.id) {
            Ok(groups) => groups,
            Err(e) => {
                warn!(user = %owner.username, error = %e, "group lookup failed");
                continue;
            }
        };

        let visible = resolve_visible(&groups, &online);
        server.send_to_self(conn, ServerEvent::UpdateUsers(visible)).await;
    }
}

/// The filtered map for one non-privileged user.
///
/// Flatten the member lists of their groups, append every online
/// admin/agent, intersect with who is actually online, de-duplicate by user
/// id (first occurrence wins), and re-key by username.
pub(crate) fn resolve_visible(
    groups: &[Group],
    online: &[User],
) -> BTreeMap<String, PublicUser> {
    let mut candidates: Vec<&User> = groups.iter().flat_map(|g| g.members.iter()).collect();
    candidates.extend(online.iter().filter(|u| u.role.is_privileged()));

    let online_names: HashSet<&str> = online.iter().map(|u| u.username.as_str()).collect();

    let mut seen = HashSet::new();
    let mut visible = BTreeMap::new();
    for user in candidates {
        if !online_names.contains(user.username.as_str()) {
            continue;
        }
        if !seen.insert(user.id) {
            continue;
        }
        visible.insert(user.username.clone(), user.public());
    }
    visible
}
