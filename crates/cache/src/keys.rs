//! Cache key builders. Every key carries a version prefix so a format change
//! can be rolled out by bumping it.

const VERSION: &str = "v1";

/// Aggregate model list for the built-in Jan provider set.
pub fn models_list() -> String {
    format!("{VERSION}:models:list")
}

/// Model list of a single provider.
pub fn provider_models(provider_public_id: &str) -> String {
    format!("{VERSION}:models:{provider_public_id}")
}

/// Aggregate model list for an organization scope.
pub fn organization_models(organization_id: &str) -> String {
    format!("{VERSION}:models:org:{organization_id}")
}

/// Aggregate model list for a project scope.
pub fn project_models(project_id: &str) -> String {
    format!("{VERSION}:models:project:{project_id}")
}

/// Matches every model-list key.
pub fn all_models_pattern() -> String {
    format!("{VERSION}:models:*")
}

pub fn user_by_public_id(public_id: &str) -> String {
    format!("{VERSION}:user:public_id:{public_id}")
}

/// Provider record with its sealed key. Never holds plaintext credentials.
pub fn provider(public_id: &str) -> String {
    format!("{VERSION}:providers:{public_id}")
}

/// Patterns covering every cached record. Lock keys are left alone so an
/// invalidation never breaks a mutex that is currently held.
pub fn invalidation_patterns() -> [String; 3] {
    [
        all_models_pattern(),
        format!("{VERSION}:user:*"),
        format!("{VERSION}:providers:*"),
    ]
}

/// Name of the mutex serialising provider registration within a scope.
pub fn provider_scope_lock(organization_id: &str, project_id: Option<&str>) -> String {
    match project_id {
        Some(project_id) => format!("{VERSION}:lock:providers:{organization_id}:{project_id}"),
        None => format!("{VERSION}:lock:providers:{organization_id}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_keys() {
        assert_eq!(models_list(), "v1:models:list");
        assert_eq!(provider_models("prv_abc"), "v1:models:prv_abc");
        assert_eq!(organization_models("org_1"), "v1:models:org:org_1");
        assert_eq!(project_models("proj_1"), "v1:models:project:proj_1");
        assert_eq!(all_models_pattern(), "v1:models:*");
    }

    #[test]
    fn test_invalidation_skips_locks() {
        let patterns = invalidation_patterns();
        assert!(patterns.contains(&"v1:user:*".to_string()));
        assert!(patterns.iter().all(|p| !p.starts_with("v1:lock:")));
    }

    #[test]
    fn test_lock_keys_distinguish_scopes() {
        assert_ne!(
            provider_scope_lock("org_1", None),
            provider_scope_lock("org_1", Some("proj_1"))
        );
    }
}
