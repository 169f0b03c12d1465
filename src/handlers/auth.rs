use axum::http::HeaderMap;

use crate::errors::AppError;
use crate::models::{Caller, Role};

/// Requests arrive through the portal gateway, which authenticates the user
/// and forwards the shared API token together with the user's id and role.
pub fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<Caller, AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    resolve_caller(
        token,
        header_str(headers, "x-user-id"),
        header_str(headers, "x-user-role"),
        expected_token,
    )
}

/// Same contract as `check_auth` for clients that cannot set headers
/// (EventSource): token, user id and role come from the query string.
pub fn check_query_auth(
    token: Option<&str>,
    user_id: Option<&str>,
    role: Option<&str>,
    expected_token: &str,
) -> Result<Caller, AppError> {
    resolve_caller(
        token.unwrap_or(""),
        non_empty(user_id),
        non_empty(role),
        expected_token,
    )
}

fn resolve_caller(
    token: &str,
    user_id: Option<&str>,
    role: Option<&str>,
    expected_token: &str,
) -> Result<Caller, AppError> {
    if token.is_empty() || token != expected_token {
        return Err(AppError::Unauthorized);
    }

    let user_id = user_id.ok_or_else(|| AppError::BadRequest("missing user id".to_string()))?;
    let role = role
        .and_then(Role::parse)
        .ok_or_else(|| AppError::BadRequest("missing or unknown user role".to_string()))?;

    Ok(Caller {
        user_id: user_id.to_string(),
        role,
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, v.parse().unwrap());
        }
        map
    }

    #[test]
    fn test_valid_caller() {
        let h = headers(&[
            ("authorization", "Bearer secret"),
            ("x-user-id", "s-1"),
            ("x-user-role", "Student"),
        ]);
        let caller = check_auth(&h, "secret").unwrap();
        assert_eq!(caller.user_id, "s-1");
        assert_eq!(caller.role, Role::Student);
    }

    #[test]
    fn test_wrong_token() {
        let h = headers(&[
            ("authorization", "Bearer nope"),
            ("x-user-id", "s-1"),
            ("x-user-role", "student"),
        ]);
        assert!(matches!(check_auth(&h, "secret"), Err(AppError::Unauthorized)));
        assert!(matches!(check_auth(&HeaderMap::new(), "secret"), Err(AppError::Unauthorized)));
    }

    #[test]
    fn test_missing_identity() {
        let h = headers(&[("authorization", "Bearer secret"), ("x-user-role", "admin")]);
        assert!(matches!(check_auth(&h, "secret"), Err(AppError::BadRequest(_))));

        let h = headers(&[
            ("authorization", "Bearer secret"),
            ("x-user-id", "s-1"),
            ("x-user-role", "janitor"),
        ]);
        assert!(matches!(check_auth(&h, "secret"), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_query_auth() {
        let caller = check_query_auth(Some("secret"), Some("a-1"), Some("admin"), "secret").unwrap();
        assert_eq!(caller.role, Role::Admin);
        assert!(matches!(
            check_query_auth(None, Some("a-1"), Some("admin"), "secret"),
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            check_query_auth(Some("secret"), Some(" "), Some("admin"), "secret"),
            Err(AppError::BadRequest(_))
        ));
    }
}
