use super::*;
use nom::{
    bytes::complete::take_till,
    character::complete::char,
    combinator::{opt, rest},
    sequence::{preceded, terminated},
    IResult, Parser,
};

use crate::encoder::is_legacy_version;
use crate::registry::{EventKind, HandlerKey, ReportPhase};

/// One decoded line from the MTA.
///
/// For filter events `token` correlates the request with its answer. The
/// `data-line` phase carries exactly one argument: the raw content line.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub key: HandlerKey,
    pub version: String,
    pub timestamp: String,
    pub subsystem: String,
    pub session: String,
    pub token: Option<String>,
    pub args: Vec<String>,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        self.key.kind()
    }

    pub fn phase(&self) -> &'static str {
        self.key.phase()
    }
}

struct RawEvent<'a> {
    kind: &'a str,
    version: &'a str,
    timestamp: &'a str,
    subsystem: &'a str,
    phase: &'a str,
    session: &'a str,
    payload: Option<&'a str>,
}

/// Parses `<kind>|<version>|<timestamp>|<subsystem>|<phase>|<session>[|<payload>]`.
pub fn parse_event(input: &str) -> Result<Event, FilterError> {
    let (_, raw) = parse_raw_event(input).map_err(|e| FilterError::Malformed {
        message: e.to_string(),
        span: (0, input.len()).into(),
    })?;

    let key = HandlerKey::parse(raw.kind, raw.phase).ok_or_else(|| FilterError::Malformed {
        message: format!("unsupported event {}|{}", raw.kind, raw.phase),
        span: (0, input.len()).into(),
    })?;

    let (token, args) = match key {
        HandlerKey::Report(phase) => (None, report_args(phase, raw.version, raw.payload)),
        HandlerKey::Filter(phase) => {
            let (token, data) = match raw.payload {
                Some(payload) => match payload.split_once('|') {
                    Some((token, data)) => (Some(token), Some(data)),
                    None => (Some(payload), None),
                },
                None => (None, None),
            };
            let args = if phase == FilterPhase::DataLine {
                // The content line is opaque, it may contain the delimiter.
                vec![data.unwrap_or_default().to_string()]
            } else {
                split_args(data)
            };
            (token.map(str::to_string), args)
        }
    };

    Ok(Event {
        key,
        version: raw.version.to_string(),
        timestamp: raw.timestamp.to_string(),
        subsystem: raw.subsystem.to_string(),
        session: raw.session.to_string(),
        token,
        args,
    })
}

fn report_args(phase: ReportPhase, version: &str, payload: Option<&str>) -> Vec<String> {
    let mut args = split_args(payload);
    // Protocol versions up to 0.4 sent the tx-mail result and address reversed.
    if phase == ReportPhase::TxMail && is_legacy_version(version) && args.len() == 3 {
        args.swap(1, 2);
    }
    args
}

fn split_args(payload: Option<&str>) -> Vec<String> {
    payload
        .map(|p| p.split('|').map(str::to_string).collect())
        .unwrap_or_default()
}

fn parse_raw_event(input: &str) -> IResult<&str, RawEvent<'_>> {
    let (input, (kind, version, timestamp, subsystem, phase, session)) = (
        terminated(field, char('|')),
        terminated(field, char('|')),
        terminated(field, char('|')),
        terminated(field, char('|')),
        terminated(field, char('|')),
        field,
    )
        .parse(input)?;
    let (input, payload) = opt(preceded(char('|'), rest)).parse(input)?;

    Ok((
        input,
        RawEvent {
            kind,
            version,
            timestamp,
            subsystem,
            phase,
            session,
            payload,
        },
    ))
}

fn field(input: &str) -> IResult<&str, &str> {
    take_till(|c: char| c == '|').parse(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_report_without_payload() {
        let line = "report|0.7|1576146008.006099|smtp-in|link-disconnect|7641df9771b4ed00";
        let event = parse_event(line).unwrap();
        assert_eq!(event.key, HandlerKey::Report(ReportPhase::LinkDisconnect));
        assert_eq!(event.kind(), EventKind::Report);
        assert_eq!(event.version, "0.7");
        assert_eq!(event.timestamp, "1576146008.006099");
        assert_eq!(event.subsystem, "smtp-in");
        assert_eq!(event.session, "7641df9771b4ed00");
        assert_eq!(event.token, None);
        assert!(event.args.is_empty());
    }

    #[test]
    fn test_parse_report_args() {
        let event = parse_event(
            "report|0.5|0|smtp-in|link-connect|S1|mail.example.com|pass|1.2.3.4:33174|5.6.7.8:25",
        )
        .unwrap();
        assert_eq!(event.phase(), "link-connect");
        assert_eq!(
            event.args,
            vec!["mail.example.com", "pass", "1.2.3.4:33174", "5.6.7.8:25"]
        );
    }

    #[test]
    fn test_tx_mail_legacy_versions_are_swapped() {
        for version in ["0.1", "0.2", "0.3", "0.4"] {
            let line = format!("report|{version}|0|smtp-in|tx-mail|S1|msgid|<a@example.com>|ok");
            let event = parse_event(&line).unwrap();
            assert_eq!(
                event.args,
                vec!["msgid", "ok", "<a@example.com>"],
                "version {version}"
            );
        }
    }

    #[test]
    fn test_tx_mail_current_versions_are_kept() {
        for version in ["0.5", "0.6", "0.7", "0.10", "1.4"] {
            let line = format!("report|{version}|0|smtp-in|tx-mail|S1|msgid|ok|<a@example.com>");
            let event = parse_event(&line).unwrap();
            assert_eq!(
                event.args,
                vec!["msgid", "ok", "<a@example.com>"],
                "version {version}"
            );
        }
    }

    #[test]
    fn test_parse_filter_with_token_and_args() {
        let event = parse_event("filter|0.5|0|smtp-in|mail-from|S1|T1|<a@example.com>").unwrap();
        assert_eq!(event.key, HandlerKey::Filter(FilterPhase::MailFrom));
        assert_eq!(event.token.as_deref(), Some("T1"));
        assert_eq!(event.args, vec!["<a@example.com>"]);
    }

    #[test]
    fn test_parse_filter_token_only() {
        let event = parse_event("filter|0.5|0|smtp-in|commit|S1|T1").unwrap();
        assert_eq!(event.token.as_deref(), Some("T1"));
        assert!(event.args.is_empty());
    }

    #[test]
    fn test_data_line_keeps_delimiters() {
        let event = parse_event("filter|0.5|0|smtp-in|data-line|S1|T1|a|b||c").unwrap();
        assert_eq!(event.key, HandlerKey::Filter(FilterPhase::DataLine));
        assert_eq!(event.token.as_deref(), Some("T1"));
        assert_eq!(event.args, vec!["a|b||c"]);
    }

    #[test]
    fn test_data_line_empty_content() {
        let event = parse_event("filter|0.5|0|smtp-in|data-line|S1|T1|").unwrap();
        assert_eq!(event.args, vec![""]);
    }

    #[test]
    fn test_short_lines_are_malformed() {
        assert!(parse_event("").is_err());
        assert!(parse_event("config|ready").is_err());
        assert!(parse_event("report|0.5|0|smtp-in|link-connect").is_err());
    }

    #[test]
    fn test_unknown_kind_or_phase_is_rejected() {
        assert!(parse_event("report|0.5|0|smtp-in|link-unknown|S1").is_err());
        assert!(parse_event("filter|0.5|0|smtp-in|link-connect|S1|T1").is_err());
        assert!(parse_event("other|0.5|0|smtp-in|link-connect|S1").is_err());
    }
}
