//! Grant resolution: which privileges an identity holds on a resource, and the
//! default-grant policy that keeps destinations and identities cross-granted.
//!
//! Effective privileges are the union of grants held directly by the identity
//! and grants held by any group containing it. Default grants are written as
//! rows when an identity or destination is created, so a lookup never has to
//! recompute baseline policy.

mod subject;

pub use subject::Subject;

use crate::error::Result;
use crate::store::destinations::{self, Destination, DestinationRecord};
use crate::store::grants::{self as grant_rows, GrantOrigin};
use crate::store::groups;
use crate::store::identities::{self, Identity, NewIdentity};
use rusqlite::Connection;
use std::collections::BTreeSet;
use tracing::debug;

/// Flat privilege names.
pub mod privilege {
    pub const ADMIN: &str = "admin";
    pub const VIEW: &str = "view";
    pub const CONNECT: &str = "connect";
    pub const CONNECTOR: &str = "connector";
}

/// Resource name of the control plane itself. Administrative operations are
/// checked against it.
pub const INFRA_RESOURCE: &str = "infra";

/// What an operation needs on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Required<'a> {
    /// A specific privilege.
    Privilege(&'a str),
    /// Any grant at all.
    Any,
}

/// Union of direct identity grants and grants of every group containing the
/// identity, for one resource.
pub fn effective_privileges(
    conn: &Connection,
    identity_id: i64,
    resource: &str,
) -> Result<BTreeSet<String>> {
    let mut subjects = vec![Subject::Identity(identity_id)];
    subjects.extend(
        groups::group_ids_for_identity(conn, identity_id)?
            .into_iter()
            .map(Subject::Group),
    );

    let privileges = grant_rows::privileges_for_subjects(conn, &subjects, resource)?;
    Ok(privileges.into_iter().collect())
}

pub fn has_privilege(
    conn: &Connection,
    identity_id: i64,
    resource: &str,
    required: Required<'_>,
) -> Result<bool> {
    let privileges = effective_privileges(conn, identity_id, resource)?;
    Ok(match required {
        Required::Privilege(name) => privileges.contains(name),
        Required::Any => !privileges.is_empty(),
    })
}

/// Baseline privilege an identity receives on every destination.
pub fn baseline_privilege(identity: &Identity) -> &'static str {
    if identity.admin {
        privilege::ADMIN
    } else {
        privilege::VIEW
    }
}

/// Writes the baseline grant for (identity, destination) unless the identity
/// already holds a grant on that destination.
fn materialize_default(conn: &Connection, identity: &Identity, destination: &str) -> Result<bool> {
    let subject = Subject::Identity(identity.id);
    if grant_rows::subject_has_any(conn, subject, destination)? {
        return Ok(false);
    }
    grant_rows::insert_grant(
        conn,
        subject,
        destination,
        baseline_privilege(identity),
        GrantOrigin::Default,
    )
}

/// Creates an identity and gives it baseline grants on every existing destination.
pub fn create_identity(conn: &Connection, new: &NewIdentity) -> Result<Identity> {
    let identity = identities::insert_identity(conn, new)?;
    let mut granted = 0;
    for destination in destinations::list_destinations(conn)? {
        if materialize_default(conn, &identity, &destination.name)? {
            granted += 1;
        }
    }
    debug!(identity = %identity.name, default_grants = granted, "Identity created");
    Ok(identity)
}

/// Registers (or updates) a destination. A newly registered destination gives
/// every existing identity its baseline grant.
pub fn register_destination(conn: &Connection, record: &DestinationRecord) -> Result<Destination> {
    let (destination, created) = destinations::upsert_destination(conn, record)?;
    if created {
        let mut granted = 0;
        for identity in identities::list_identities(conn)? {
            if materialize_default(conn, &identity, &destination.name)? {
                granted += 1;
            }
        }
        debug!(destination = %destination.name, default_grants = granted, "Destination registered");
    }
    Ok(destination)
}

/// Changes the admin flag and rewrites the identity's default grants to match.
pub fn set_admin(conn: &Connection, identity_id: i64, admin: bool) -> Result<Option<Identity>> {
    identities::set_admin(conn, identity_id, admin)?;
    let Some(identity) = identities::get_identity(conn, identity_id)? else {
        return Ok(None);
    };

    conn.execute(
        "DELETE FROM grants WHERE subject = ?1 AND origin = ?2",
        rusqlite::params![Subject::Identity(identity_id).to_string(), GrantOrigin::Default.as_str()],
    )?;
    for destination in destinations::list_destinations(conn)? {
        materialize_default(conn, &identity, &destination.name)?;
    }
    Ok(Some(identity))
}
