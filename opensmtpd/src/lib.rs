//! Filter protocol engine for OpenSMTPD.
//!
//! The MTA talks to a filter process over stdin/stdout with a line based,
//! pipe delimited protocol. [`FilterServer`] performs the handshake, registers
//! handlers, tracks per-session state and dispatches every incoming event to
//! the handler registered for its `(kind, phase)` key.
//!
//! ```no_run
//! use async_trait::async_trait;
//! use opensmtpd::{FilterServer, MessageFilter, SessionContext};
//!
//! struct Passthrough;
//!
//! #[async_trait]
//! impl MessageFilter for Passthrough {
//!     async fn filter_message(
//!         &self,
//!         _context: &mut SessionContext,
//!         lines: Vec<String>,
//!     ) -> miette::Result<Vec<String>> {
//!         Ok(lines)
//!     }
//! }
//!
//! # async fn run() -> Result<(), opensmtpd::FilterError> {
//! let mut server = FilterServer::stdio().await?;
//! server.register_message_filter(Passthrough).await?;
//! server.serve().await
//! # }
//! ```
use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

mod channel;
mod context;
mod encoder;
mod message;
mod parser;
mod registry;
mod server;

pub use channel::{decode_latin1, encode_latin1, LineChannel};
pub use context::{Extensions, MessageOutcome, SessionContext};
pub use encoder::{encode_response, is_legacy_version, Decision, ResponseKind};
pub use message::{escape_line, unescape_line, MessageFilter};
pub use parser::{parse_event, Event};
pub use registry::{
    DataLineHandler, DataLineSink, EventKind, FilterHandler, FilterPhase, HandlerKey,
    ReportHandler, ReportPhase, Session,
};
pub use server::FilterServer;

#[derive(Debug, Error, Diagnostic)]
pub enum FilterError {
    #[error("IO error")]
    #[diagnostic(code(opensmtpd::io_error))]
    IoError(#[from] std::io::Error),

    #[error("input ended before the MTA sent config|ready")]
    #[diagnostic(
        code(opensmtpd::handshake),
        help("filters must be started by smtpd, which sends its configuration first")
    )]
    Handshake,

    #[error("Handler for {key} is already registered")]
    #[diagnostic(code(opensmtpd::duplicate_handler))]
    DuplicateHandler { key: HandlerKey },

    #[error("Handler for {key} cannot be registered this way: {message}")]
    #[diagnostic(code(opensmtpd::invalid_registration))]
    InvalidRegistration {
        key: HandlerKey,
        message: &'static str,
    },

    #[error("Malformed event: {message}")]
    #[diagnostic(code(opensmtpd::malformed_event))]
    Malformed {
        message: String,
        #[label("This bit here")]
        span: SourceSpan,
    },

    #[error("No context is tracked for session {session}")]
    #[diagnostic(code(opensmtpd::missing_context))]
    MissingContext { session: String },
}
