use async_trait::async_trait;
use miette::Result;
use std::borrow::Cow;
use tracing::debug;

use crate::context::{MessageOutcome, SessionContext};
use crate::encoder::Decision;
use crate::registry::{DataLineHandler, DataLineSink, FilterHandler, Session};

const END_OF_DATA: &str = ".";
const INTERNAL_ERROR: &str = "451 Internal server error";

/// Whole-message filter, see [`FilterServer::register_message_filter`].
///
/// Receives the unescaped body lines of one message and returns the lines to
/// hand back to the MTA. An error lets the message through unchanged in the
/// data stream and rejects the transaction at commit.
///
/// [`FilterServer::register_message_filter`]: crate::FilterServer::register_message_filter
#[async_trait]
pub trait MessageFilter: Send + Sync {
    async fn filter_message(
        &self,
        context: &mut SessionContext,
        lines: Vec<String>,
    ) -> Result<Vec<String>>;
}

/// Dot-stuffs a content line for transmission.
pub fn escape_line(line: &str) -> Cow<'_, str> {
    if line.starts_with('.') {
        Cow::Owned(format!(".{line}"))
    } else {
        Cow::Borrowed(line)
    }
}

/// Reverses [`escape_line`].
pub fn unescape_line(line: &str) -> &str {
    if line.starts_with("..") {
        &line[1..]
    } else {
        line
    }
}

pub(crate) struct MessageDataLine<F> {
    filter: F,
}

impl<F> MessageDataLine<F> {
    pub(crate) fn new(filter: F) -> Self {
        MessageDataLine { filter }
    }
}

#[async_trait]
impl<F: MessageFilter> DataLineHandler for MessageDataLine<F> {
    async fn on_data_line(
        &self,
        mut session: Session<'_>,
        line: &str,
        sink: &mut DataLineSink,
    ) -> Result<()> {
        let context = session.context()?;
        if line != END_OF_DATA {
            context.push_message_line(unescape_line(line));
            return Ok(());
        }

        let lines = context.take_message_lines();
        debug!(session = %context.session, lines = lines.len(), "filtering message");
        let result = self.filter.filter_message(context, lines).await;

        match result {
            Ok(lines) => {
                for line in &lines {
                    sink.send(escape_line(line));
                }
                sink.send(END_OF_DATA);
                Ok(())
            }
            Err(err) => {
                // The MTA still needs the end of data, the verdict comes at commit.
                sink.send(END_OF_DATA);
                context.fail_message(err.to_string());
                Err(err.wrap_err("message filter failed"))
            }
        }
    }
}

pub(crate) struct MessageCommit;

#[async_trait]
impl FilterHandler for MessageCommit {
    async fn on_filter(&self, mut session: Session<'_>, _args: &[String]) -> Result<Decision> {
        let context = session.context()?;
        match context.take_message_outcome() {
            MessageOutcome::Ok => Ok(Decision::Proceed),
            MessageOutcome::Failed(reason) => {
                debug!(session = %context.session, %reason, "rejecting failed message");
                Ok(Decision::reject(INTERNAL_ERROR))
            }
        }
    }
}
