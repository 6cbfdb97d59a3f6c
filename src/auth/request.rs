//! Parsing of the CloudAPI HTTP-signature `Authorization` header.
//!
//! Callers sign requests with one of their account keys, so the header
//! carries a `keyId` naming the account, an optional sub-user and the
//! signing key fingerprint:
//!
//! ```text
//! Authorization: Signature keyId="/acme/keys/aa:bb:...",algorithm="rsa-sha256",signature="..."
//! Authorization: Signature keyId="/acme/users/ops/keys/aa:bb:...",...
//! ```
//!
//! Both `Date` and `Authorization` are kept verbatim so they can be replayed
//! against the identity provider.

use std::sync::OnceLock;

use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, DATE};
use regex::Regex;

use crate::error::AuthError;

const MIN_NAME_LEN: usize = 3;

fn key_id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"keyId="(.*?)""#).expect("keyId pattern is valid"))
}

fn name_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_\.@]+$").expect("name pattern is valid"))
}

/// Identity claims extracted from a signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    date_header: String,
    auth_header: String,
    pub account_name: String,
    pub user_name: Option<String>,
    pub fingerprint: String,
}

impl ParsedRequest {
    /// Parse and validate the signature headers of an inbound request.
    ///
    /// Rules are checked in a fixed order and the first violation wins:
    /// header presence, keyId structure, empty fields, name length, name format.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AuthError> {
        let date = header_value(headers, DATE.as_str());
        let auth = header_value(headers, AUTHORIZATION.as_str());
        let (Some(date), Some(auth)) = (date, auth) else {
            return Err(AuthError::UnauthenticatedRequest);
        };
        Self::parse(date, auth)
    }

    /// Parse raw `Date` and `Authorization` header values.
    pub fn parse(date_header: &str, auth_header: &str) -> Result<Self, AuthError> {
        if date_header.is_empty() || auth_header.is_empty() {
            return Err(AuthError::UnauthenticatedRequest);
        }

        if !auth_header.trim_start().starts_with("Signature ") {
            return Err(AuthError::MalformedKeyId);
        }
        let key_id = key_id_pattern()
            .captures(auth_header)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .ok_or(AuthError::MalformedKeyId)?;

        let (account_name, user_name, fingerprint) = split_key_id(key_id)?;

        if account_name.is_empty() {
            return Err(AuthError::EmptyIdentityField { field: "account name" });
        }
        if fingerprint.is_empty() {
            return Err(AuthError::EmptyIdentityField { field: "fingerprint" });
        }
        if user_name.is_some_and(str::is_empty) {
            return Err(AuthError::EmptyIdentityField { field: "user name" });
        }

        let names = [Some(("account name", account_name)), user_name.map(|u| ("user name", u))];
        for &(field, name) in names.iter().flatten() {
            if name.chars().count() < MIN_NAME_LEN {
                return Err(AuthError::NameTooShort {
                    field,
                    name: name.to_string(),
                });
            }
        }
        for &(field, name) in names.iter().flatten() {
            if !name_pattern().is_match(name) {
                return Err(AuthError::NameFormatInvalid {
                    field,
                    name: name.to_string(),
                });
            }
        }

        Ok(Self {
            date_header: date_header.to_string(),
            auth_header: auth_header.to_string(),
            account_name: account_name.to_string(),
            user_name: user_name.map(str::to_string),
            fingerprint: fingerprint.to_string(),
        })
    }

    /// The `Date` header exactly as received.
    pub fn date_header(&self) -> &str {
        &self.date_header
    }

    /// The `Authorization` header exactly as received.
    pub fn auth_header(&self) -> &str {
        &self.auth_header
    }

    pub fn has_values(&self) -> bool {
        !self.date_header.is_empty()
            && !self.auth_header.is_empty()
            && !self.account_name.is_empty()
            && !self.fingerprint.is_empty()
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// Split a keyId path into (account, user, fingerprint).
///
/// Shapes are judged on the raw `/` segments, leading empty segment included:
/// `/acct/keys/fp` has 4, `/acct/users/usr/keys/fp` has 6.
///
/// Empty segments are kept, so a trailing slash (`/acct/keys/fp/`) or a
/// doubled one (`/acct//keys/fp`) changes the count and is rejected as
/// [`AuthError::KeyIdStructure`]. An empty field in an otherwise well-shaped
/// path (`/acct/keys/`) is reported later as `EmptyIdentityField`.
fn split_key_id(key_id: &str) -> Result<(&str, Option<&str>, &str), AuthError> {
    let segments: Vec<&str> = key_id.split('/').collect();
    match segments.as_slice() {
        ["", account, "keys", fingerprint] => Ok((*account, None, *fingerprint)),
        ["", account, "users", user, "keys", fingerprint] => {
            Ok((*account, Some(*user), *fingerprint))
        }
        _ => Err(AuthError::KeyIdStructure {
            key_id: key_id.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use pretty_assertions::assert_eq;

    use super::*;

    const FINGERPRINT: &str = "12:23:34:45:56:67:78:89:90:0A:AB:BC:CD:DE:AD:01";
    const DATE_HEADER: &str = "Sat, 17 Mar 2018 16:12:06 UTC";

    fn signature(key_id: &str) -> String {
        format!(
            r#"Signature keyId="{}",algorithm="rsa-sha1",headers="date",signature="AABBCCDDEEFFGG""#,
            key_id
        )
    }

    fn headers(date: Option<&str>, auth: Option<&str>) -> HeaderMap {
        let mut map = HeaderMap::new();
        if let Some(date) = date {
            map.insert(DATE, HeaderValue::from_str(date).unwrap());
        }
        if let Some(auth) = auth {
            map.insert(AUTHORIZATION, HeaderValue::from_str(auth).unwrap());
        }
        map
    }

    #[test]
    fn test_parse_account_key() {
        let auth = signature(&format!("/testaccount/keys/{}", FINGERPRINT));
        let parsed = ParsedRequest::from_headers(&headers(Some(DATE_HEADER), Some(&auth))).unwrap();

        assert_eq!(parsed.account_name, "testaccount");
        assert_eq!(parsed.user_name, None);
        assert_eq!(parsed.fingerprint, FINGERPRINT);
        assert_eq!(parsed.auth_header(), auth);
        assert_eq!(parsed.date_header(), DATE_HEADER);
        assert!(parsed.has_values());
    }

    #[test]
    fn test_parse_subuser_key() {
        let auth = signature(&format!("/testaccount/users/demouser/keys/{}", FINGERPRINT));
        let parsed = ParsedRequest::parse(DATE_HEADER, &auth).unwrap();

        assert_eq!(parsed.account_name, "testaccount");
        assert_eq!(parsed.user_name.as_deref(), Some("demouser"));
        assert_eq!(parsed.fingerprint, FINGERPRINT);
    }

    #[test]
    fn test_missing_headers() {
        let auth = signature(&format!("/testaccount/keys/{}", FINGERPRINT));

        let err = ParsedRequest::from_headers(&headers(None, Some(&auth))).unwrap_err();
        assert!(matches!(err, AuthError::UnauthenticatedRequest));

        let err = ParsedRequest::from_headers(&headers(Some(DATE_HEADER), None)).unwrap_err();
        assert!(matches!(err, AuthError::UnauthenticatedRequest));

        let err = ParsedRequest::from_headers(&headers(Some(DATE_HEADER), Some(""))).unwrap_err();
        assert!(matches!(err, AuthError::UnauthenticatedRequest));
    }

    #[test]
    fn test_missing_date_wins_over_malformed_auth() {
        let err = ParsedRequest::from_headers(&headers(None, Some("failed parse"))).unwrap_err();
        assert!(matches!(err, AuthError::UnauthenticatedRequest));
    }

    #[test]
    fn test_malformed_key_id() {
        let err = ParsedRequest::parse(DATE_HEADER, "failed parse").unwrap_err();
        assert!(matches!(err, AuthError::MalformedKeyId));

        let err = ParsedRequest::parse(DATE_HEADER, r#"Signature algorithm="rsa-sha1""#).unwrap_err();
        assert!(matches!(err, AuthError::MalformedKeyId));

        // keyId outside of a signature envelope
        let err = ParsedRequest::parse(DATE_HEADER, r#"Bearer keyId="/acme/keys/aa""#).unwrap_err();
        assert!(matches!(err, AuthError::MalformedKeyId));
    }

    #[test]
    fn test_key_id_structure() {
        for key_id in [
            "/testaccount/fingerprint",
            "testaccount/keys/aa:bb",
            "/testaccount/keys/aa:bb/extra",
            "/testaccount/users/demouser/aa:bb",
            "/testaccount/groups/demouser/keys/aa:bb",
            "/testaccount/keys/aa:bb/",
            "/testaccount//keys/aa:bb",
            "/testaccount/users/demouser/keys/aa:bb/",
        ] {
            let err = ParsedRequest::parse(DATE_HEADER, &signature(key_id)).unwrap_err();
            assert!(
                matches!(err, AuthError::KeyIdStructure { .. }),
                "{key_id}: {err}"
            );
        }
    }

    #[test]
    fn test_empty_fields() {
        let err = ParsedRequest::parse(DATE_HEADER, &signature(&format!("//keys/{}", FINGERPRINT))).unwrap_err();
        assert!(matches!(err, AuthError::EmptyIdentityField { field: "account name" }));

        let err = ParsedRequest::parse(DATE_HEADER, &signature("/testaccount/keys/")).unwrap_err();
        assert!(matches!(err, AuthError::EmptyIdentityField { field: "fingerprint" }));

        let err = ParsedRequest::parse(DATE_HEADER, &signature(&format!("/testaccount/users//keys/{}", FINGERPRINT)))
            .unwrap_err();
        assert!(matches!(err, AuthError::EmptyIdentityField { field: "user name" }));
    }

    #[test]
    fn test_short_names() {
        let err = ParsedRequest::parse(DATE_HEADER, &signature(&format!("/te/keys/{}", FINGERPRINT))).unwrap_err();
        assert!(matches!(err, AuthError::NameTooShort { field: "account name", .. }));

        let err = ParsedRequest::parse(DATE_HEADER, &signature(&format!("/testaccount/users/te/keys/{}", FINGERPRINT)))
            .unwrap_err();
        assert!(matches!(err, AuthError::NameTooShort { field: "user name", .. }));
    }

    #[test]
    fn test_invalid_names() {
        let err = ParsedRequest::parse(DATE_HEADER, &signature(&format!("/test+account/keys/{}", FINGERPRINT)))
            .unwrap_err();
        assert!(matches!(err, AuthError::NameFormatInvalid { field: "account name", .. }));

        let err = ParsedRequest::parse(
            DATE_HEADER,
            &signature(&format!("/testaccount/users/demo?user/keys/{}", FINGERPRINT)),
        )
        .unwrap_err();
        assert!(matches!(err, AuthError::NameFormatInvalid { field: "user name", .. }));

        let err = ParsedRequest::parse(DATE_HEADER, &signature(&format!("/1account/keys/{}", FINGERPRINT))).unwrap_err();
        assert!(matches!(err, AuthError::NameFormatInvalid { .. }));
    }

    #[test]
    fn test_length_checked_before_format() {
        // Both too short and badly formatted: length wins.
        let err = ParsedRequest::parse(DATE_HEADER, &signature(&format!("/t+/keys/{}", FINGERPRINT))).unwrap_err();
        assert!(matches!(err, AuthError::NameTooShort { .. }));

        // Bad account format, short user name: every length check runs first.
        let err = ParsedRequest::parse(
            DATE_HEADER,
            &signature(&format!("/test+account/users/te/keys/{}", FINGERPRINT)),
        )
        .unwrap_err();
        assert!(matches!(err, AuthError::NameTooShort { field: "user name", .. }));
    }

    #[test]
    fn test_structure_checked_before_emptiness() {
        let err = ParsedRequest::parse(DATE_HEADER, &signature("//")).unwrap_err();
        assert!(matches!(err, AuthError::KeyIdStructure { .. }));
    }

    #[test]
    fn test_names_with_allowed_punctuation() {
        let parsed = ParsedRequest::parse(
            DATE_HEADER,
            &signature(&format!("/jane.doe@example_co/keys/{}", FINGERPRINT)),
        )
        .unwrap();
        assert_eq!(parsed.account_name, "jane.doe@example_co");
    }
}
