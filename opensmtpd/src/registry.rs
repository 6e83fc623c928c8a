use async_trait::async_trait;
use miette::Result;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::context::SessionContext;
use crate::encoder::Decision;
use crate::FilterError;

macro_rules! phases {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $wire:literal,)+ }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = ();

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok($name::$variant),)+
                    _ => Err(()),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

phases! {
    /// Phases reported by `report|...` events. Reports are informational and
    /// never answered.
    ReportPhase {
        LinkConnect => "link-connect",
        LinkDisconnect => "link-disconnect",
        LinkGreeting => "link-greeting",
        LinkIdentify => "link-identify",
        LinkTls => "link-tls",
        LinkAuth => "link-auth",
        TxReset => "tx-reset",
        TxBegin => "tx-begin",
        TxMail => "tx-mail",
        TxRcpt => "tx-rcpt",
        TxEnvelope => "tx-envelope",
        TxData => "tx-data",
        TxCommit => "tx-commit",
        TxRollback => "tx-rollback",
        ProtocolClient => "protocol-client",
        ProtocolServer => "protocol-server",
        FilterReport => "filter-report",
        FilterResponse => "filter-response",
        Timeout => "timeout",
    }
}

phases! {
    /// Phases of `filter|...` requests. Every request carries a token and
    /// must be answered.
    FilterPhase {
        Connect => "connect",
        Helo => "helo",
        Ehlo => "ehlo",
        StartTls => "starttls",
        Auth => "auth",
        MailFrom => "mail-from",
        RcptTo => "rcpt-to",
        Data => "data",
        DataLine => "data-line",
        Commit => "commit",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Report,
    Filter,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Report => "report",
            EventKind::Filter => "filter",
        }
    }
}

/// The `(kind, phase)` pair a handler is registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKey {
    Report(ReportPhase),
    Filter(FilterPhase),
}

impl HandlerKey {
    pub fn kind(&self) -> EventKind {
        match self {
            HandlerKey::Report(_) => EventKind::Report,
            HandlerKey::Filter(_) => EventKind::Filter,
        }
    }

    pub fn phase(&self) -> &'static str {
        match self {
            HandlerKey::Report(phase) => phase.as_str(),
            HandlerKey::Filter(phase) => phase.as_str(),
        }
    }

    pub(crate) fn parse(kind: &str, phase: &str) -> Option<Self> {
        match kind {
            "report" => phase.parse().ok().map(HandlerKey::Report),
            "filter" => phase.parse().ok().map(HandlerKey::Filter),
            _ => None,
        }
    }

    pub(crate) fn registration_line(&self) -> String {
        format!("register|{}|smtp-in|{}", self.kind().as_str(), self.phase())
    }
}

impl fmt::Display for HandlerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.kind().as_str(), self.phase())
    }
}

/// The session an event belongs to, as seen by a handler.
///
/// Once context tracking is enabled the session's [`SessionContext`] is
/// attached; before that only the identifier is known.
pub struct Session<'a> {
    id: &'a str,
    context: Option<&'a mut SessionContext>,
}

impl<'a> Session<'a> {
    pub(crate) fn untracked(id: &'a str) -> Self {
        Session { id, context: None }
    }

    pub(crate) fn tracked(id: &'a str, context: &'a mut SessionContext) -> Self {
        Session {
            id,
            context: Some(context),
        }
    }

    pub fn id(&self) -> &str {
        self.id
    }

    pub fn is_tracked(&self) -> bool {
        self.context.is_some()
    }

    pub fn context(&mut self) -> Result<&mut SessionContext, FilterError> {
        match self.context.as_deref_mut() {
            Some(context) => Ok(context),
            None => Err(FilterError::MissingContext {
                session: self.id.to_string(),
            }),
        }
    }
}

/// Collects `filter-dataline` output of a data-line handler. The server
/// writes the collected lines once the handler returns, whatever its result.
#[derive(Debug, Default)]
pub struct DataLineSink {
    lines: Vec<String>,
}

impl DataLineSink {
    pub fn send(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub(crate) fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

#[async_trait]
pub trait ReportHandler: Send + Sync {
    async fn on_report(&self, session: Session<'_>, args: &[String]) -> Result<()>;
}

#[async_trait]
pub trait FilterHandler: Send + Sync {
    async fn on_filter(&self, session: Session<'_>, args: &[String]) -> Result<Decision>;
}

/// Handler for `filter|data-line`. It answers only through the sink, any
/// number of lines per event.
#[async_trait]
pub trait DataLineHandler: Send + Sync {
    async fn on_data_line(
        &self,
        session: Session<'_>,
        line: &str,
        sink: &mut DataLineSink,
    ) -> Result<()>;
}

pub(crate) enum Handler {
    Report(Box<dyn ReportHandler>),
    Filter(Box<dyn FilterHandler>),
    DataLine(Box<dyn DataLineHandler>),
    /// Builds the session context, installed by context tracking.
    LinkConnect,
    /// Drops the session context, installed by context tracking.
    LinkDisconnect,
}

#[derive(Default)]
pub(crate) struct HandlerRegistry {
    handlers: HashMap<HandlerKey, Handler>,
}

impl HandlerRegistry {
    pub(crate) fn insert(&mut self, key: HandlerKey, handler: Handler) -> Result<(), FilterError> {
        if self.handlers.contains_key(&key) {
            return Err(FilterError::DuplicateHandler { key });
        }
        self.handlers.insert(key, handler);
        Ok(())
    }

    pub(crate) fn get(&self, key: &HandlerKey) -> Option<&Handler> {
        self.handlers.get(key)
    }
}
