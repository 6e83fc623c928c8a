use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

/// Result of the last message body run through the message filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MessageOutcome {
    #[default]
    Ok,
    Failed(String),
}

/// Type keyed storage for state handlers attach to a session.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Stores `value`, returning the previous value of the same type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.map
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast().ok().map(|old| *old))
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref())
    }

    pub fn get_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.map
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut())
    }

    pub fn remove<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|old| old.downcast().ok().map(|old| *old))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.map.len())
            .finish()
    }
}

/// Per-session state, created on `link-connect` and dropped on
/// `link-disconnect`. The address fields are copied verbatim from the
/// connect report.
#[derive(Debug)]
pub struct SessionContext {
    pub session: String,
    pub rdns: String,
    pub fcrdns: String,
    pub src: String,
    pub dest: String,
    extensions: Extensions,
    message_lines: Vec<String>,
    outcome: MessageOutcome,
}

impl SessionContext {
    pub fn new(
        session: impl Into<String>,
        rdns: impl Into<String>,
        fcrdns: impl Into<String>,
        src: impl Into<String>,
        dest: impl Into<String>,
    ) -> Self {
        SessionContext {
            session: session.into(),
            rdns: rdns.into(),
            fcrdns: fcrdns.into(),
            src: src.into(),
            dest: dest.into(),
            extensions: Extensions::default(),
            message_lines: Vec::new(),
            outcome: MessageOutcome::Ok,
        }
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Unescaped body lines buffered so far for the current message.
    pub fn message_lines(&self) -> &[String] {
        &self.message_lines
    }

    pub fn message_outcome(&self) -> &MessageOutcome {
        &self.outcome
    }

    pub(crate) fn push_message_line(&mut self, line: &str) {
        self.message_lines.push(line.to_string());
    }

    pub(crate) fn take_message_lines(&mut self) -> Vec<String> {
        std::mem::take(&mut self.message_lines)
    }

    pub(crate) fn fail_message(&mut self, reason: String) {
        self.outcome = MessageOutcome::Failed(reason);
    }

    /// Returns the outcome and resets it, a failure is reported once.
    pub(crate) fn take_message_outcome(&mut self) -> MessageOutcome {
        std::mem::take(&mut self.outcome)
    }
}

#[derive(Debug, Default)]
pub(crate) struct SessionContexts {
    contexts: HashMap<String, SessionContext>,
}

impl SessionContexts {
    /// Handles `report|link-connect`: args are rdns, fcrdns, src, dest.
    pub(crate) fn connect(&mut self, session: &str, args: &[String]) {
        let [rdns, fcrdns, src, dest] = args else {
            warn!(
                session,
                args = args.len(),
                "link-connect without the expected four arguments"
            );
            return;
        };

        let context = SessionContext::new(session, rdns, fcrdns, src, dest);
        if self.contexts.insert(session.to_string(), context).is_some() {
            debug!(session, "replaced context of reconnected session");
        }
    }

    /// Handles `report|link-disconnect`.
    pub(crate) fn disconnect(&mut self, session: &str) {
        if self.contexts.remove(session).is_none() {
            warn!(session, "link-disconnect for a session without context");
        }
    }

    pub(crate) fn get_mut(&mut self, session: &str) -> Option<&mut SessionContext> {
        self.contexts.get_mut(session)
    }

    #[cfg(test)]
    pub(crate) fn get(&self, session: &str) -> Option<&SessionContext> {
        self.contexts.get(session)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.contexts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Sender(String);

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_extensions_are_type_keyed() {
        let mut extensions = Extensions::default();
        assert!(extensions.is_empty());
        assert_eq!(extensions.insert(Sender("a@example.com".into())), None);
        assert_eq!(extensions.insert(42u32), None);
        assert_eq!(extensions.len(), 2);

        assert_eq!(
            extensions.insert(Sender("b@example.com".into())),
            Some(Sender("a@example.com".into()))
        );
        assert_eq!(extensions.get::<u32>(), Some(&42));
        *extensions.get_mut::<u32>().unwrap() += 1;
        assert_eq!(extensions.remove::<u32>(), Some(43));
        assert_eq!(extensions.get::<u32>(), None);
        assert_eq!(
            extensions.get::<Sender>(),
            Some(&Sender("b@example.com".into()))
        );
    }

    #[test]
    fn test_connect_and_disconnect() {
        let mut contexts = SessionContexts::default();
        contexts.connect(
            "S1",
            &args(&["mail.example.com", "pass", "1.2.3.4:1234", "5.6.7.8:25"]),
        );

        let context = contexts.get("S1").unwrap();
        assert_eq!(context.session, "S1");
        assert_eq!(context.rdns, "mail.example.com");
        assert_eq!(context.fcrdns, "pass");
        assert_eq!(context.src, "1.2.3.4:1234");
        assert_eq!(context.dest, "5.6.7.8:25");

        contexts.disconnect("S1");
        assert!(contexts.get("S1").is_none());
        // Unknown sessions are only logged.
        contexts.disconnect("S1");
        assert_eq!(contexts.len(), 0);
    }

    #[test]
    fn test_connect_with_wrong_arity_is_ignored() {
        let mut contexts = SessionContexts::default();
        contexts.connect("S1", &args(&["rdns", "fcrdns", "src"]));
        assert_eq!(contexts.len(), 0);
    }

    #[test]
    fn test_message_outcome_is_reported_once() {
        let mut context = SessionContext::new("S1", "", "", "", "");
        context.fail_message("broken".into());
        assert_eq!(
            context.message_outcome(),
            &MessageOutcome::Failed("broken".into())
        );
        assert_eq!(
            context.take_message_outcome(),
            MessageOutcome::Failed("broken".into())
        );
        assert_eq!(context.take_message_outcome(), MessageOutcome::Ok);
    }
}
