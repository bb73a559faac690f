//! Caller identity from gateway headers.
//!
//! The gateway in front of the daemon authenticates users and forwards:
//!
//! | header                 | meaning                                           |
//! |------------------------|---------------------------------------------------|
//! | `x-qrd-role`           | admin, kitchen, waiter or customer (default)      |
//! | `x-qrd-account`        | account of a staff user; required for staff roles |
//! | `x-qrd-customer-token` | capability returned when the order was placed     |

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use qrd_orders::Actor;
use qrd_schemas::Role;
use uuid::Uuid;

use crate::error::ApiError;

pub const HEADER_ROLE: &str = "x-qrd-role";
pub const HEADER_ACCOUNT: &str = "x-qrd-account";
pub const HEADER_CUSTOMER_TOKEN: &str = "x-qrd-customer-token";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, ApiError> {
    match headers.get(name) {
        None => Ok(None),
        Some(v) => {
            let s = v
                .to_str()
                .map_err(|_| ApiError::bad_request("invalid_header", format!("{name} is not ascii")))?
                .trim();
            Ok(if s.is_empty() { None } else { Some(s) })
        }
    }
}

pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, ApiError> {
    let role = match header_str(headers, HEADER_ROLE)? {
        None => Role::Customer,
        Some(r) => Role::parse(r)
            .ok_or_else(|| ApiError::bad_request("invalid_role", format!("unknown role: {r}")))?,
    };

    if role.is_staff() {
        let account_id = header_str(headers, HEADER_ACCOUNT)?.ok_or_else(|| {
            ApiError::Unauthorized(format!("{HEADER_ACCOUNT} is required for role {role}"))
        })?;
        return Ok(Actor::Staff {
            account_id: account_id.to_string(),
            role,
        });
    }

    let token = header_str(headers, HEADER_CUSTOMER_TOKEN)?
        .map(|t| {
            Uuid::parse_str(t).map_err(|_| {
                ApiError::bad_request("invalid_customer_token", "customer token is not a uuid")
            })
        })
        .transpose()?;

    Ok(Actor::Customer { token })
}

/// Extractor wrapper so handlers can take the caller as an argument.
#[derive(Debug, Clone)]
pub struct RequestActor(pub Actor);

#[async_trait]
impl<S> FromRequestParts<S> for RequestActor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        actor_from_headers(&parts.headers).map(RequestActor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        h
    }

    #[test]
    fn no_headers_is_anonymous_customer() {
        assert_eq!(
            actor_from_headers(&HeaderMap::new()).unwrap(),
            Actor::Customer { token: None }
        );
    }

    #[test]
    fn staff_needs_an_account() {
        let err = actor_from_headers(&headers(&[(HEADER_ROLE, "kitchen")])).unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));

        let ok = actor_from_headers(&headers(&[
            (HEADER_ROLE, "Kitchen"),
            (HEADER_ACCOUNT, "bistro"),
        ]))
        .unwrap();
        assert_eq!(
            ok,
            Actor::Staff {
                account_id: "bistro".into(),
                role: Role::Kitchen
            }
        );
    }

    #[test]
    fn customer_token_must_be_a_uuid() {
        let id = Uuid::new_v4();
        let ok = actor_from_headers(&headers(&[(HEADER_CUSTOMER_TOKEN, &id.to_string())])).unwrap();
        assert_eq!(ok, Actor::Customer { token: Some(id) });

        assert!(actor_from_headers(&headers(&[(HEADER_CUSTOMER_TOKEN, "nope")])).is_err());
        assert!(actor_from_headers(&headers(&[(HEADER_ROLE, "chef")])).is_err());
    }
}
