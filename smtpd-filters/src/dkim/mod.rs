//! DKIM agents run as OpenSMTPD message filters.
mod sign;
mod verify;

pub use sign::DkimSign;
pub use verify::{DkimVerify, MailAuthVerifier};

/// Joins message lines into wire form, CRLF terminated.
fn raw_message(lines: &[String]) -> Vec<u8> {
    let mut message = lines.join("\r\n");
    message.push_str("\r\n");
    opensmtpd::encode_latin1(&message)
}
