//! Authorization Policy: who may do what to whose resources.
//!
//! Enforcement is advisory. It runs in the same process as the data, so it
//! guards the API surface, not the bytes on disk.
//!
//! | Session | Own resource | Other's resource | Collection-wide |
//! |---------|--------------|------------------|-----------------|
//! | none    | -            | -                | -               |
//! | `user`  | read, write  | -                | -               |
//! | `admin` | read, write  | read             | read            |
//!
//! `Register` and `Login` are allowed for every session, including none.

use uuid::Uuid;

use crate::{identity::Role, session::Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum Action {
  Register,
  Login,
  Read,
  Write,
}

/// Decide whether `session` may perform `action` on a resource owned by
/// `resource_owner`. `None` as owner means every owner at once, e.g. an
/// admin listing.
pub fn can_access(session: Option<&Session>, resource_owner: Option<Uuid>, action: Action) -> bool {
  if matches!(action, Action::Register | Action::Login) {
    return true;
  }
  let Some(session) = session else { return false };

  let owns = resource_owner == Some(session.user_id);
  match (session.role, action) {
    (_, Action::Write) => owns,
    (Role::User, Action::Read) => owns,
    (Role::Admin, Action::Read) => true,
    (_, Action::Register | Action::Login) => true,
  }
}

pub fn is_admin(session: Option<&Session>) -> bool {
  session.is_some_and(Session::is_admin)
}
