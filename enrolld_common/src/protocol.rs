//! # Wire protocol
//!
//! Enrollment requests and responses are newline-terminated ASCII lines of
//! the form:
//!
//! ```text
//! OSSEC A:'<agent-name>' G:'<group>' IP:'<ip>' K:'<key-hash>' P:'<password>'
//! ```
//!
//! with `G:`, `K:` and `P:` optional and the trailing whitespace-separated
//! tokens allowed in any order. `K:` carries the hash of the *agent's own*
//! key, used only for the idempotent-reenrollment check; `P:` carries the
//! daemon-wide enrollment password, used only for the §4.3 step 2 policy
//! check — the two are unrelated and must never be cross-checked against
//! each other. Responses are either a granted key line:
//!
//! ```text
//! OSSEC K:'<id> <name> <key>'
//! ```
//!
//! or a rejection:
//!
//! ```text
//! ERROR: <reason>
//! ```
//!
//! No existing dependency in the pack parses this particular grammar, so it
//! is hand-rolled here as a small tokenizer rather than reached for a general
//! parser combinator crate — the format is a handful of quoted `tag:'value'`
//! pairs, not worth a dependency.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("request missing leading 'OSSEC' marker")]
    MissingMarker,
    #[error("unterminated quoted value starting at byte {0}")]
    UnterminatedQuote(usize),
    #[error("missing required field {0:?}")]
    MissingField(&'static str),
    #[error("request line exceeds maximum length")]
    TooLong,
}

/// Maximum accepted line length, generous enough for name/group/ip/key but
/// small enough to bound a single malicious client's memory footprint.
pub const MAX_REQUEST_LEN: usize = 4096;

/// A parsed enrollment request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollRequest {
    pub name: String,
    pub group: Option<String>,
    pub ip: Option<String>,
    /// Hex-encoded hash of the agent's own key, used only for the
    /// idempotent-reenrollment comparison.
    pub key_hash: Option<String>,
    /// Plaintext enrollment password (`P:'...'`), checked against the
    /// daemon's configured password independently of `key_hash`.
    pub password: Option<String>,
    pub force: bool,
}

/// Parse a single request line (without its trailing newline).
pub fn parse_request(line: &str) -> Result<EnrollRequest, ProtocolError> {
    if line.len() > MAX_REQUEST_LEN {
        return Err(ProtocolError::TooLong);
    }
    let rest = line
        .trim_start()
        .strip_prefix("OSSEC")
        .ok_or(ProtocolError::MissingMarker)?;

    let mut name = None;
    let mut group = None;
    let mut ip = None;
    let mut key_hash = None;
    let mut password = None;
    let mut force = false;

    for token in tokenize(rest)? {
        match token {
            Token::Tagged(tag, value) => match tag {
                "A" => name = Some(value),
                "G" => group = Some(value),
                "IP" => ip = Some(value),
                "K" => key_hash = Some(value),
                "P" => password = Some(value),
                _ => {}
            },
            Token::Bare(word) if word == "FORCE" => force = true,
            Token::Bare(_) => {}
        }
    }

    Ok(EnrollRequest {
        name: name.ok_or(ProtocolError::MissingField("A"))?,
        group,
        ip,
        key_hash,
        password,
        force,
    })
}

enum Token<'a> {
    Tagged(&'a str, String),
    Bare(&'a str),
}

/// Split `tag:'value'` pairs (and bare words like `FORCE`) out of the
/// remainder of a request line.
fn tokenize(rest: &str) -> Result<Vec<Token<'_>>, ProtocolError> {
    let mut tokens = Vec::new();
    let bytes = rest.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }
        let start = i;
        while i < bytes.len() && bytes[i] != b':' && !bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let word = &rest[start..i];
        if i < bytes.len() && bytes[i] == b':' {
            i += 1;
            if i >= bytes.len() || bytes[i] != b'\'' {
                tokens.push(Token::Bare(word));
                continue;
            }
            i += 1;
            let value_start = i;
            while i < bytes.len() && bytes[i] != b'\'' {
                i += 1;
            }
            if i >= bytes.len() {
                return Err(ProtocolError::UnterminatedQuote(value_start));
            }
            let value = rest[value_start..i].to_string();
            i += 1;
            tokens.push(Token::Tagged(word, value));
        } else {
            tokens.push(Token::Bare(word));
        }
    }
    Ok(tokens)
}

/// A granted enrollment response.
pub fn format_granted(id: &str, name: &str, key: &str) -> String {
    format!("OSSEC K:'{id} {name} {key}'\n")
}

/// A rejected enrollment response.
pub fn format_error(reason: &str) -> String {
    format!("ERROR: {reason}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_request() {
        let req = parse_request("OSSEC A:'web01' IP:'any'").unwrap();
        assert_eq!(req.name, "web01");
        assert_eq!(req.ip.as_deref(), Some("any"));
        assert!(req.group.is_none());
        assert!(!req.force);
    }

    #[test]
    fn parses_full_request_with_force() {
        let req = parse_request(
            "OSSEC A:'web01' G:'webservers' IP:'10.0.0.5' K:'abc123' P:'sekrit' FORCE",
        )
        .unwrap();
        assert_eq!(req.name, "web01");
        assert_eq!(req.group.as_deref(), Some("webservers"));
        assert_eq!(req.key_hash.as_deref(), Some("abc123"));
        assert_eq!(req.password.as_deref(), Some("sekrit"));
        assert!(req.force);
    }

    #[test]
    fn parses_password_field_independently_of_key_hash() {
        let req = parse_request("OSSEC A:'web01' IP:'any' P:'enroll-me'").unwrap();
        assert_eq!(req.password.as_deref(), Some("enroll-me"));
        assert!(req.key_hash.is_none());
    }

    #[test]
    fn rejects_missing_marker() {
        assert_eq!(parse_request("NOPE A:'web01'").unwrap_err(), ProtocolError::MissingMarker);
    }

    #[test]
    fn rejects_missing_name() {
        assert_eq!(
            parse_request("OSSEC IP:'any'").unwrap_err(),
            ProtocolError::MissingField("A")
        );
    }

    #[test]
    fn rejects_unterminated_quote() {
        assert!(matches!(
            parse_request("OSSEC A:'web01"),
            Err(ProtocolError::UnterminatedQuote(_))
        ));
    }

    #[test]
    fn formats_granted_response() {
        assert_eq!(format_granted("001", "web01", "deadbeef"), "OSSEC K:'001 web01 deadbeef'\n");
    }
}
