use tokio::io::{AsyncBufRead, AsyncWrite, BufReader, Stdin, Stdout};
use tracing::{debug, error, info, trace, warn};

use crate::channel::LineChannel;
use crate::context::SessionContexts;
use crate::encoder::{encode_response, Decision, ResponseKind};
use crate::message::{MessageCommit, MessageDataLine, MessageFilter};
use crate::parser::{parse_event, Event};
use crate::registry::{
    DataLineHandler, DataLineSink, FilterHandler, FilterPhase, Handler, HandlerKey,
    HandlerRegistry, ReportHandler, ReportPhase, Session,
};
use crate::FilterError;

const REGISTER_READY: &str = "register|ready";

/// A filter process talking to the MTA.
///
/// Created with [`FilterServer::stdio`] once smtpd has sent its
/// configuration, then handlers are registered, then [`FilterServer::serve`]
/// runs until smtpd closes the stream.
pub struct FilterServer<R, W> {
    channel: LineChannel<R, W>,
    registry: HandlerRegistry,
    contexts: Option<SessionContexts>,
}

impl FilterServer<BufReader<Stdin>, Stdout> {
    pub async fn stdio() -> Result<Self, FilterError> {
        Self::connect(BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
    }
}

impl<R, W> FilterServer<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub async fn connect(reader: R, writer: W) -> Result<Self, FilterError> {
        let channel = LineChannel::handshake(reader, writer).await?;
        Ok(FilterServer {
            channel,
            registry: HandlerRegistry::default(),
            contexts: None,
        })
    }

    /// Registers a handler for report events of `phase`. Reports are never
    /// answered.
    pub async fn register_report(
        &mut self,
        phase: ReportPhase,
        handler: impl ReportHandler + 'static,
    ) -> Result<(), FilterError> {
        self.register(
            HandlerKey::Report(phase),
            Handler::Report(Box::new(handler)),
        )
        .await
    }

    /// Registers a handler for filter requests of `phase`. The decision it
    /// returns is sent back to the MTA.
    pub async fn register_filter(
        &mut self,
        phase: FilterPhase,
        handler: impl FilterHandler + 'static,
    ) -> Result<(), FilterError> {
        let key = HandlerKey::Filter(phase);
        if phase == FilterPhase::DataLine {
            return Err(FilterError::InvalidRegistration {
                key,
                message: "data lines are answered through register_data_line",
            });
        }
        self.register(key, Handler::Filter(Box::new(handler))).await
    }

    pub async fn register_data_line(
        &mut self,
        handler: impl DataLineHandler + 'static,
    ) -> Result<(), FilterError> {
        self.register(
            HandlerKey::Filter(FilterPhase::DataLine),
            Handler::DataLine(Box::new(handler)),
        )
        .await
    }

    /// Attaches a [`SessionContext`](crate::SessionContext) to every session.
    ///
    /// Registers the `link-connect` and `link-disconnect` reports, so they
    /// are not available to other handlers afterwards. Calling it again is a
    /// no-op.
    pub async fn track_context(&mut self) -> Result<(), FilterError> {
        if self.contexts.is_some() {
            return Ok(());
        }

        self.register(
            HandlerKey::Report(ReportPhase::LinkConnect),
            Handler::LinkConnect,
        )
        .await?;
        self.register(
            HandlerKey::Report(ReportPhase::LinkDisconnect),
            Handler::LinkDisconnect,
        )
        .await?;
        self.contexts = Some(SessionContexts::default());
        Ok(())
    }

    /// Filters whole message bodies with `filter`.
    ///
    /// Enables context tracking and takes the `data-line` and `commit`
    /// filter phases. A failing filter rejects the transaction at commit
    /// with a temporary error.
    pub async fn register_message_filter(
        &mut self,
        filter: impl MessageFilter + 'static,
    ) -> Result<(), FilterError> {
        self.track_context().await?;
        self.register_data_line(MessageDataLine::new(filter))
            .await?;
        self.register_filter(FilterPhase::Commit, MessageCommit)
            .await
    }

    async fn register(&mut self, key: HandlerKey, handler: Handler) -> Result<(), FilterError> {
        self.registry.insert(key, handler)?;
        debug!(%key, "registered handler");
        self.channel.write_line(&key.registration_line()).await
    }

    /// Ends registration and processes events until the MTA closes the
    /// stream.
    pub async fn serve(mut self) -> Result<(), FilterError> {
        self.channel.write_line(REGISTER_READY).await?;
        info!("filter registered, waiting for events");

        while let Some(line) = self.channel.read_line().await? {
            self.process_line(&line).await?;
        }

        info!("input closed, shutting down");
        Ok(())
    }

    async fn process_line(&mut self, line: &str) -> Result<(), FilterError> {
        match parse_event(line) {
            Ok(event) => self.dispatch(event).await,
            Err(err) => {
                debug!(%line, %err, "ignoring line");
                Ok(())
            }
        }
    }

    async fn dispatch(&mut self, event: Event) -> Result<(), FilterError> {
        let FilterServer {
            channel,
            registry,
            contexts,
        } = self;

        let Some(handler) = registry.get(&event.key) else {
            trace!(key = %event.key, session = %event.session, "no handler registered");
            return Ok(());
        };

        match handler {
            Handler::LinkConnect => {
                if let Some(contexts) = contexts {
                    contexts.connect(&event.session, &event.args);
                }
            }
            Handler::LinkDisconnect => {
                if let Some(contexts) = contexts {
                    contexts.disconnect(&event.session);
                }
            }
            Handler::Report(handler) => {
                let Some(session) = lookup(contexts, &event) else {
                    return Ok(());
                };
                if let Err(err) = handler.on_report(session, &event.args).await {
                    error!(key = %event.key, session = %event.session, "report handler failed: {err:?}");
                }
            }
            Handler::Filter(handler) => {
                let Some(token) = event.token.as_deref() else {
                    warn!(key = %event.key, session = %event.session, "filter request without token");
                    return Ok(());
                };
                let decision = match lookup(contexts, &event) {
                    Some(session) => match handler.on_filter(session, &event.args).await {
                        Ok(decision) => decision,
                        Err(err) => {
                            error!(key = %event.key, session = %event.session, "filter handler failed: {err:?}");
                            Decision::temporary_failure()
                        }
                    },
                    None => Decision::temporary_failure(),
                };
                let line = encode_response(
                    ResponseKind::FilterResult,
                    &event.session,
                    token,
                    &decision.to_string(),
                    &event.version,
                );
                channel.write_line(&line).await?;
            }
            Handler::DataLine(handler) => {
                let Some(token) = event.token.as_deref() else {
                    warn!(key = %event.key, session = %event.session, "data line without token");
                    return Ok(());
                };
                let data = event.args.first().map(String::as_str).unwrap_or_default();
                let mut sink = DataLineSink::default();
                match lookup(contexts, &event) {
                    Some(session) => {
                        if let Err(err) = handler.on_data_line(session, data, &mut sink).await {
                            error!(session = %event.session, "data-line handler failed: {err:?}");
                        }
                    }
                    // Without state the message can only pass unchanged.
                    None => sink.send(data),
                }
                for data in sink.into_lines() {
                    let line = encode_response(
                        ResponseKind::FilterDataline,
                        &event.session,
                        token,
                        &data,
                        &event.version,
                    );
                    channel.write_line(&line).await?;
                }
            }
        }
        Ok(())
    }
}

/// Resolves the session an event is dispatched with. `None` means context
/// tracking is on but the session was never connected.
fn lookup<'a>(contexts: &'a mut Option<SessionContexts>, event: &'a Event) -> Option<Session<'a>> {
    match contexts {
        None => Some(Session::untracked(&event.session)),
        Some(contexts) => match contexts.get_mut(&event.session) {
            Some(context) => Some(Session::tracked(&event.session, context)),
            None => {
                warn!(key = %event.key, session = %event.session, "no context tracked for session");
                None
            }
        },
    }
}
