use std::fmt;

/// Kind of an outgoing answer line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Verdict for a filter request.
    FilterResult,
    /// One line of (possibly rewritten) message content.
    FilterDataline,
}

impl ResponseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseKind::FilterResult => "filter-result",
            ResponseKind::FilterDataline => "filter-dataline",
        }
    }
}

/// Protocol versions 0.1 to 0.4 put the token before the session.
pub fn is_legacy_version(version: &str) -> bool {
    matches!(version.as_bytes(), [b'0', b'.', b'1'..=b'4'])
}

pub fn encode_response(
    kind: ResponseKind,
    session: &str,
    token: &str,
    payload: &str,
    version: &str,
) -> String {
    if is_legacy_version(version) {
        format!("{}|{}|{}|{}", kind.as_str(), token, session, payload)
    } else {
        format!("{}|{}|{}|{}", kind.as_str(), session, token, payload)
    }
}

/// Verdict returned by a filter handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Proceed,
    Junk,
    /// SMTP code and text, e.g. `550 Spam`.
    Reject(String),
    Disconnect(String),
    Rewrite(String),
}

impl Decision {
    pub fn reject(reason: impl Into<String>) -> Self {
        Decision::Reject(reason.into())
    }

    /// Answer sent when a handler could not come to a verdict.
    pub(crate) fn temporary_failure() -> Self {
        Decision::reject("451 Temporary failure")
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Proceed => f.write_str("proceed"),
            Decision::Junk => f.write_str("junk"),
            Decision::Reject(reason) => write!(f, "reject|{reason}"),
            Decision::Disconnect(reason) => write!(f, "disconnect|{reason}"),
            Decision::Rewrite(param) => write!(f, "rewrite|{param}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// What smtpd does with an answer: find token and session by position.
    fn decode(line: &str, version: &str) -> (String, String, String, String) {
        let mut fields = line.splitn(4, '|');
        let kind = fields.next().unwrap().to_string();
        let first = fields.next().unwrap().to_string();
        let second = fields.next().unwrap().to_string();
        let payload = fields.next().unwrap().to_string();
        if is_legacy_version(version) {
            (kind, second, first, payload)
        } else {
            (kind, first, second, payload)
        }
    }

    #[test]
    fn test_legacy_versions() {
        for version in ["0.1", "0.2", "0.3", "0.4"] {
            assert!(is_legacy_version(version), "{version}");
        }
        for version in ["0.0", "0.5", "0.7", "0.10", "0.4.1", "1.4", "", "0."] {
            assert!(!is_legacy_version(version), "{version}");
        }
    }

    #[test]
    fn test_field_order() {
        assert_eq!(
            encode_response(ResponseKind::FilterResult, "S1", "T1", "proceed", "0.4"),
            "filter-result|T1|S1|proceed"
        );
        assert_eq!(
            encode_response(ResponseKind::FilterResult, "S1", "T1", "proceed", "0.5"),
            "filter-result|S1|T1|proceed"
        );
        assert_eq!(
            encode_response(ResponseKind::FilterDataline, "S1", "T1", "", "0.7"),
            "filter-dataline|S1|T1|"
        );
    }

    #[test]
    fn test_decoded_answer_matches_request() {
        let payload = Decision::reject("550 Spam|really").to_string();
        for version in ["0.1", "0.4", "0.5", "0.7"] {
            let line = encode_response(
                ResponseKind::FilterResult,
                "7641df9771b4ed00",
                "1ef1c203cc576e5d",
                &payload,
                version,
            );
            let (kind, session, token, decoded) = decode(&line, version);
            assert_eq!(kind, "filter-result");
            assert_eq!(session, "7641df9771b4ed00");
            assert_eq!(token, "1ef1c203cc576e5d");
            assert_eq!(decoded, payload);
        }
    }

    #[test]
    fn test_decision_wire_format() {
        assert_eq!(Decision::Proceed.to_string(), "proceed");
        assert_eq!(Decision::Junk.to_string(), "junk");
        assert_eq!(Decision::reject("550 Spam").to_string(), "reject|550 Spam");
        assert_eq!(
            Decision::Disconnect("421 Bye".into()).to_string(),
            "disconnect|421 Bye"
        );
        assert_eq!(
            Decision::Rewrite("<b@example.com>".into()).to_string(),
            "rewrite|<b@example.com>"
        );
        assert_eq!(
            Decision::temporary_failure().to_string(),
            "reject|451 Temporary failure"
        );
    }
}
