use uuid::Uuid;

use crate::errors::AppError;

use super::Principal;

/// The mandatory team predicate for every scoped read path.
///
/// Applied explicitly at each repository boundary rather than inherited
/// implicitly by entity types. A principal without a current team scopes to
/// the empty set: list handlers return an empty collection, never an error.
/// That behavior is what prevents cross-tenant leakage while team state is
/// transiently absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamScope {
    Team(Uuid),
    Empty,
}

impl TeamScope {
    pub fn of(principal: &Principal) -> Self {
        match principal.current_team_id {
            Some(team_id) => TeamScope::Team(team_id),
            None => TeamScope::Empty,
        }
    }

    pub fn team_id(&self) -> Option<Uuid> {
        match self {
            TeamScope::Team(id) => Some(*id),
            TeamScope::Empty => None,
        }
    }
}

/// Cross-team guard for instance-level paths: the target entity's team must
/// equal the actor's current team, checked *before* any permission logic.
///
/// A mismatch (or a missing current team) is reported as NotFound, never
/// Forbidden, so callers cannot confirm the existence of out-of-tenant
/// records.
pub fn ensure_same_team(principal: &Principal, entity_team_id: Uuid) -> Result<(), AppError> {
    match principal.current_team_id {
        Some(team_id) if team_id == entity_team_id => Ok(()),
        _ => Err(AppError::not_found("resource not found")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_is_empty_without_current_team() {
        let principal = Principal::new(Uuid::new_v4());
        assert_eq!(TeamScope::of(&principal), TeamScope::Empty);
        assert_eq!(TeamScope::of(&principal).team_id(), None);
    }

    #[test]
    fn cross_team_guard_reports_not_found() {
        let team = Uuid::new_v4();
        let other = Uuid::new_v4();
        let principal = Principal::new(Uuid::new_v4()).with_team(team);

        assert!(ensure_same_team(&principal, team).is_ok());

        let err = ensure_same_team(&principal, other).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn missing_team_is_also_not_found() {
        let principal = Principal::new(Uuid::new_v4());
        let err = ensure_same_team(&principal, Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
