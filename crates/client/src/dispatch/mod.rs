// Publish/subscribe registry for inbound collaboration messages.
//
// Handlers for a concrete message kind run in registration order,
// followed by wildcard handlers. Each handler receives its own copy of
// the envelope, so one handler mutating its view cannot leak into the
// next. Malformed frames are dropped with a diagnostic and never abort
// dispatch of later messages.

use std::collections::HashMap;

use tracing::warn;

use fresco_common::protocol::envelope::{Envelope, MessageKind, WILDCARD_KIND};

/// What a subscriber wants to hear about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Interest {
    Kind(MessageKind),
    /// Every message, dispatched after the kind-specific handlers.
    All,
}

impl Interest {
    /// String-keyed form for callers speaking wire tags directly; the
    /// reserved tag `"all"` subscribes to every message.
    pub fn from_tag(tag: &str) -> Self {
        if tag == WILDCARD_KIND {
            Interest::All
        } else {
            Interest::Kind(MessageKind::parse(tag))
        }
    }
}

impl From<MessageKind> for Interest {
    fn from(kind: MessageKind) -> Self {
        Interest::Kind(kind)
    }
}

/// Token returned by [`Dispatcher::on`]; the only way to unsubscribe.
///
/// Registering the same closure twice yields two ids and two
/// deliveries. Callers own the symmetry of `on`/`off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

pub type Handler = Box<dyn FnMut(Envelope) + Send>;

#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<Interest, Vec<(HandlerId, Handler)>>,
    next_id: u64,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; returns the id needed to remove it.
    pub fn on(
        &mut self,
        interest: impl Into<Interest>,
        handler: impl FnMut(Envelope) + Send + 'static,
    ) -> HandlerId {
        self.next_id += 1;
        let id = HandlerId(self.next_id);
        self.handlers.entry(interest.into()).or_default().push((id, Box::new(handler)));
        id
    }

    /// Remove exactly the registration behind `id`. Returns whether it
    /// was present.
    pub fn off(&mut self, interest: impl Into<Interest>, id: HandlerId) -> bool {
        match self.handlers.get_mut(&interest.into()) {
            Some(list) => {
                let before = list.len();
                list.retain(|(existing, _)| *existing != id);
                before != list.len()
            }
            None => false,
        }
    }

    /// Drop every registration.
    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }

    /// Parse a wire frame and fan it out. Returns the envelope, or
    /// `None` when the frame was malformed and dropped.
    pub fn dispatch_frame(&mut self, raw: &str) -> Option<Envelope> {
        match Envelope::parse(raw) {
            Ok(envelope) => {
                self.dispatch(&envelope);
                Some(envelope)
            }
            Err(error) => {
                warn!(%error, "dropping malformed collaboration frame");
                None
            }
        }
    }

    /// Fan an envelope out: kind-specific handlers first, wildcard
    /// handlers second, each with an isolated copy.
    pub fn dispatch(&mut self, envelope: &Envelope) {
        for key in [Interest::Kind(envelope.message_kind()), Interest::All] {
            if let Some(list) = self.handlers.get_mut(&key) {
                for (_, handler) in list.iter_mut() {
                    handler(envelope.clone());
                }
            }
        }
    }
}
