use async_trait::async_trait;
use mail_auth::{AuthenticatedMessage, DkimResult, MessageAuthenticator};
use miette::{miette, Context, IntoDiagnostic, Result};
use opensmtpd::{MessageFilter, SessionContext};
use std::fmt;
use tracing::{info, warn};

use super::raw_message;
use crate::headers::{has_header, insert_header, remove_header};

const AUTHENTICATION_RESULTS: &str = "Authentication-Results";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DkimStatus {
    Pass,
    Fail,
    /// Unsigned, or the signature could not be checked.
    Unknown,
}

impl fmt::Display for DkimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DkimStatus::Pass => "pass",
            DkimStatus::Fail => "fail",
            DkimStatus::Unknown => "unknown",
        })
    }
}

/// Checks the DKIM signatures of a raw, CRLF terminated message.
#[async_trait]
pub trait DkimVerifier: Send + Sync {
    /// `Ok(true)` when at least one signature verifies.
    async fn verify(&self, message: &[u8]) -> Result<bool>;
}

/// Verifier resolving public keys through the system DNS configuration.
pub struct MailAuthVerifier {
    authenticator: MessageAuthenticator,
}

impl MailAuthVerifier {
    pub fn new() -> Result<Self> {
        let authenticator = MessageAuthenticator::new_system_conf()
            .into_diagnostic()
            .wrap_err("creating dns resolver")?;
        Ok(MailAuthVerifier { authenticator })
    }
}

#[async_trait]
impl DkimVerifier for MailAuthVerifier {
    async fn verify(&self, message: &[u8]) -> Result<bool> {
        let message =
            AuthenticatedMessage::parse(message).ok_or_else(|| miette!("unparsable message"))?;
        let outputs = self.authenticator.verify_dkim(&message).await;

        Ok(any_signature_passes(
            outputs.iter().map(|output| output.result()),
        ))
    }
}

/// True when at least one signature verifies, list traffic often carries a
/// broken signature next to the author's valid one.
fn any_signature_passes<'a>(results: impl IntoIterator<Item = &'a DkimResult>) -> bool {
    results
        .into_iter()
        .any(|result| result == &DkimResult::Pass)
}

/// Replaces any `Authentication-Results` header with this host's DKIM verdict.
pub struct DkimVerify<V> {
    hostname: String,
    verifier: V,
}

impl<V: DkimVerifier> DkimVerify<V> {
    pub fn new(hostname: impl Into<String>, verifier: V) -> Self {
        DkimVerify {
            hostname: hostname.into(),
            verifier,
        }
    }

    async fn dkim_status(&self, lines: &[String]) -> DkimStatus {
        if !has_header(lines, "DKIM-Signature") {
            return DkimStatus::Unknown;
        }

        match self.verifier.verify(&raw_message(lines)).await {
            Ok(true) => DkimStatus::Pass,
            Ok(false) => DkimStatus::Fail,
            Err(err) => {
                warn!(error = ?err, "dkim verification failed");
                DkimStatus::Unknown
            }
        }
    }
}

#[async_trait]
impl<V: DkimVerifier> MessageFilter for DkimVerify<V> {
    async fn filter_message(
        &self,
        context: &mut SessionContext,
        mut lines: Vec<String>,
    ) -> Result<Vec<String>> {
        let status = self.dkim_status(&lines).await;
        info!(session = %context.session, dkim = %status, "verified message");

        remove_header(&mut lines, AUTHENTICATION_RESULTS);
        insert_header(
            &mut lines,
            [format!(
                "{AUTHENTICATION_RESULTS}: {}; dkim={status}",
                self.hostname
            )],
        );

        Ok(lines)
    }
}
