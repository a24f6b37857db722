use crate::server::cluster::labels::Role;

use super::RolloutError;

/// Check whether a Deployment may move from `from` (`None` = does not exist yet) to `to`.
///
/// The only forbidden move is retiring a preview straight to idle: a preview either goes live
/// or gets overwritten by the next prepare.
pub fn is_valid_transition(from: Option<Role>, to: Role) -> bool {
    match (from, to) {
        (None, _) => true,
        (Some(from), to) if from == to => true,
        (Some(Role::Preview), Role::Active) => true,
        (Some(Role::Active), Role::Idle) | (Some(Role::Active), Role::Preview) => true,
        (Some(Role::Idle), Role::Active) | (Some(Role::Idle), Role::Preview) => true,
        _ => false,
    }
}

pub fn validate_transition(name: &str, from: Option<Role>, to: Role) -> Result<(), RolloutError> {
    if !is_valid_transition(from, to) {
        return Err(RolloutError::InvalidTransition {
            name: name.to_string(),
            from: from.map(|r| r.to_string()).unwrap_or_else(|| "none".to_string()),
            to: to.to_string(),
        });
    }
    Ok(())
}
