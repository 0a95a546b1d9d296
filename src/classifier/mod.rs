//! Maps raw connection and authentication failures onto [`ErrorKind`].
//!
//! Classification is pure and total. Priority order:
//!
//! 1. certificate / TLS validity problems are `bad-security`
//! 2. rejected credentials are `bad-user-or-pass`
//! 3. other authentication-adjacent failures are `server-problem`
//! 4. failures that never reached the server are `unresponsive-server`
//! 5. anything unrecognized is `unknown`
//!
//! Connection ends without a login and probe timeouts never reach this
//! function; the prober maps them directly.

use crate::errors::{ErrorKind, RawProbeError};

/// Server status markers meaning "temporarily unavailable", not bad credentials.
const MAINTENANCE_MARKERS: [&str; 3] = ["[LOGIN-DELAY", "[SYS", "[IN-USE"];

/// Category names that mean the credentials were refused.
const AUTH_FAILURE_NAMES: [&str; 2] = ["AuthError", "AuthenticationFailed"];

/// Category names for failures around, but not of, authentication.
const AUTH_ADJACENT_NAMES: [&str; 7] = [
    "UnknownAuthError",
    "UnknowAuthError",
    "XOAuthTokenError",
    "XOAUTH2Error",
    "TLSError",
    "SenderError",
    "RecipientError",
];

/// Classifies a raw probe failure.
pub fn classify(error: &RawProbeError) -> ErrorKind {
    match error {
        RawProbeError::Certificate { .. } | RawProbeError::Tls { .. } => ErrorKind::BadSecurity,
        RawProbeError::AuthRejected { response } => classify_rejection(response),
        RawProbeError::AuthUnsupported { .. } | RawProbeError::Protocol { .. } => {
            ErrorKind::ServerProblem
        }
        RawProbeError::HttpStatus { status } => classify_http_status(*status),
        RawProbeError::Network { .. } | RawProbeError::TimedOut { .. } => {
            ErrorKind::UnresponsiveServer
        }
        RawProbeError::Named { name, .. } => classify_name(name),
    }
}

/// Classifies an error known only by its category name.
pub fn classify_name(name: &str) -> ErrorKind {
    if name
        .get(..8)
        .map_or(false, |prefix| prefix.eq_ignore_ascii_case("security"))
    {
        return ErrorKind::BadSecurity;
    }
    if AUTH_FAILURE_NAMES.iter().any(|n| n.eq_ignore_ascii_case(name)) {
        return ErrorKind::BadUserOrPass;
    }
    if AUTH_ADJACENT_NAMES.iter().any(|n| n.eq_ignore_ascii_case(name)) {
        return ErrorKind::ServerProblem;
    }
    if name.eq_ignore_ascii_case("timeout") {
        return ErrorKind::UnresponsiveServer;
    }
    ErrorKind::from_wire(name).unwrap_or(ErrorKind::Unknown)
}

/// Classifies an HTTP status returned by an authenticated request.
pub fn classify_http_status(status: u16) -> ErrorKind {
    match status {
        200..=299 => ErrorKind::Unknown,
        401 => ErrorKind::BadUserOrPass,
        _ => ErrorKind::ServerProblem,
    }
}

fn classify_rejection(response: &str) -> ErrorKind {
    let response = response.trim();
    if response.is_empty() {
        // A bare rejection says nothing about the credentials.
        return ErrorKind::Unknown;
    }
    let upper = response.to_ascii_uppercase();
    if MAINTENANCE_MARKERS.iter().any(|m| upper.contains(m)) {
        return ErrorKind::ServerProblem;
    }
    ErrorKind::BadUserOrPass
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io;

    #[rstest]
    #[case(RawProbeError::Certificate { reason: "Expired".into() }, ErrorKind::BadSecurity)]
    #[case(RawProbeError::Tls { message: "handshake".into() }, ErrorKind::BadSecurity)]
    #[case(RawProbeError::auth_rejected("535 5.7.8 Bad credentials"), ErrorKind::BadUserOrPass)]
    #[case(RawProbeError::auth_rejected("[AUTHENTICATIONFAILED] Authentication failed."), ErrorKind::BadUserOrPass)]
    #[case(RawProbeError::auth_rejected("[SYS/TEMP] try later"), ErrorKind::ServerProblem)]
    #[case(RawProbeError::auth_rejected("[LOGIN-DELAY] 900"), ErrorKind::ServerProblem)]
    #[case(RawProbeError::auth_rejected(""), ErrorKind::Unknown)]
    #[case(RawProbeError::AuthUnsupported { message: "none".into() }, ErrorKind::ServerProblem)]
    #[case(RawProbeError::protocol("bad greeting"), ErrorKind::ServerProblem)]
    #[case(RawProbeError::HttpStatus { status: 401 }, ErrorKind::BadUserOrPass)]
    #[case(RawProbeError::HttpStatus { status: 403 }, ErrorKind::ServerProblem)]
    #[case(RawProbeError::HttpStatus { status: 500 }, ErrorKind::ServerProblem)]
    #[case(RawProbeError::timed_out("read"), ErrorKind::UnresponsiveServer)]
    #[case(
        RawProbeError::Network { kind: io::ErrorKind::ConnectionRefused, message: "refused".into() },
        ErrorKind::UnresponsiveServer
    )]
    fn test_classify(#[case] error: RawProbeError, #[case] expected: ErrorKind) {
        assert_eq!(classify(&error), expected);
    }

    #[rstest]
    #[case("AuthError", ErrorKind::BadUserOrPass)]
    #[case("autherror", ErrorKind::BadUserOrPass)]
    #[case("UnknownAuthError", ErrorKind::ServerProblem)]
    #[case("XOAUTH2Error", ErrorKind::ServerProblem)]
    #[case("SecurityUntrustedIssuerError", ErrorKind::BadSecurity)]
    #[case("timeout", ErrorKind::UnresponsiveServer)]
    #[case("bad-security", ErrorKind::BadSecurity)]
    #[case("", ErrorKind::Unknown)]
    #[case("SomethingNobodyExpected", ErrorKind::Unknown)]
    fn test_classify_name(#[case] name: &str, #[case] expected: ErrorKind) {
        assert_eq!(classify(&RawProbeError::named(name, "details")), expected);
    }

    #[test]
    fn test_classify_is_total_over_unicode_names() {
        // Byte slicing must not split a multi-byte character.
        let kind = classify_name("aéééé");
        assert!(ErrorKind::ALL.contains(&kind));
    }
}
