use async_trait::async_trait;
use mail_auth::{
    common::crypto::{Ed25519Key, RsaKey, Sha256},
    common::headers::HeaderWriter,
    dkim::{Canonicalization, DkimSigner, Done},
};
use mail_parser::MessageParser;
use miette::{Context, IntoDiagnostic, Result};
use opensmtpd::{MessageFilter, SessionContext};
use std::collections::HashMap;
use tokio::fs;
use tracing::{debug, info};

use super::raw_message;
use crate::config::{CfgDKIM, DkimKeyType};
use crate::headers::{header_end, insert_header};

const DKIM_HEADERS: [&str; 5] = ["From", "To", "Subject", "Date", "Message-ID"];

pub enum DkimSignerType {
    Rsa(DkimSigner<RsaKey<Sha256>, Done>),
    Ed25519(DkimSigner<Ed25519Key, Done>),
}

impl DkimSignerType {
    fn create(dkim: &CfgDKIM, priv_key: &str) -> Result<Self> {
        match dkim.key_type {
            DkimKeyType::Rsa => {
                let pem = pem::parse(priv_key)
                    .into_diagnostic()
                    .wrap_err("parsing RSA PEM")?;
                let pk_rsa = RsaKey::<Sha256>::from_pkcs8_der(pem.contents())
                    .into_diagnostic()
                    .wrap_err("error reading RSA priv key")?;

                Ok(DkimSignerType::Rsa(
                    DkimSigner::from_key(pk_rsa)
                        .domain(&dkim.domain)
                        .selector(&dkim.selector)
                        .headers(DKIM_HEADERS)
                        .body_canonicalization(Canonicalization::Relaxed)
                        .header_canonicalization(Canonicalization::Relaxed),
                ))
            }
            DkimKeyType::Ed25519 => {
                let pem = pem::parse(priv_key)
                    .into_diagnostic()
                    .wrap_err("parsing Ed25519 PEM")?;
                // Accepts v1 documents without the public key, as openssl writes them.
                let pk_ed25519 = Ed25519Key::from_pkcs8_maybe_unchecked_der(pem.contents())
                    .into_diagnostic()
                    .wrap_err("error reading Ed25519 priv key")?;

                Ok(DkimSignerType::Ed25519(
                    DkimSigner::from_key(pk_ed25519)
                        .domain(&dkim.domain)
                        .selector(&dkim.selector)
                        .headers(DKIM_HEADERS)
                        .body_canonicalization(Canonicalization::Relaxed)
                        .header_canonicalization(Canonicalization::Relaxed),
                ))
            }
        }
    }

    /// Returns the `DKIM-Signature` header, folded with CRLF.
    fn sign(&self, message: &[u8]) -> Result<String> {
        let signature = match self {
            DkimSignerType::Rsa(signer) => signer.sign(message),
            DkimSignerType::Ed25519(signer) => signer.sign(message),
        }
        .into_diagnostic()
        .wrap_err("signing message with dkim")?;

        Ok(signature.to_header())
    }
}

/// Signs messages whose `From` domain has a configured key.
pub struct DkimSign {
    signers: HashMap<String, DkimSignerType>,
}

impl DkimSign {
    /// Reads and parses every private key up front, a bad key fails startup.
    pub async fn load(domains: &[CfgDKIM]) -> Result<Self> {
        let mut signers = HashMap::with_capacity(domains.len());
        for dkim in domains {
            let priv_key = fs::read_to_string(&dkim.private_key)
                .await
                .into_diagnostic()
                .wrap_err_with(|| format!("reading private key {}", dkim.private_key))?;
            let signer = DkimSignerType::create(dkim, &priv_key)
                .wrap_err_with(|| format!("loading dkim key for {}", dkim.domain))?;

            info!(
                domain = %dkim.domain,
                selector = %dkim.selector,
                key_type = ?dkim.key_type,
                "loaded dkim key"
            );
            signers.insert(dkim.domain.to_ascii_lowercase(), signer);
        }

        Ok(DkimSign { signers })
    }

    fn sign_lines(&self, mut lines: Vec<String>) -> Result<Vec<String>> {
        let Some(domain) = sender_domain(&lines) else {
            debug!("no sender address, leaving message unsigned");
            return Ok(lines);
        };
        let Some(signer) = self.signers.get(&domain) else {
            debug!(%domain, "no dkim key for sender domain");
            return Ok(lines);
        };

        let header = signer.sign(&raw_message(&lines))?;
        insert_header(
            &mut lines,
            header
                .split("\r\n")
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        );
        debug!(%domain, "signed message");

        Ok(lines)
    }
}

/// Lowercased domain of the first `From` address.
fn sender_domain(lines: &[String]) -> Option<String> {
    let mut headers = raw_message(&lines[..header_end(lines)]);
    headers.extend_from_slice(b"\r\n");

    let message = MessageParser::default().parse_headers(&headers)?;
    let from = message
        .from()
        .and_then(|f| f.first())
        .and_then(|f| f.address())?;

    from.rsplit_once('@')
        .map(|(_, domain)| domain.to_ascii_lowercase())
}

#[async_trait]
impl MessageFilter for DkimSign {
    async fn filter_message(
        &self,
        _context: &mut SessionContext,
        lines: Vec<String>,
    ) -> Result<Vec<String>> {
        self.sign_lines(lines)
    }
}
