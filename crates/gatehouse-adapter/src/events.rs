//! Rule change notifications.
//!
//! Every successful mutation broadcasts a [`RuleEvent`]. Owners subscribe to
//! forward changes to peers (for example through a watcher) or to drop their
//! own derived state. Sending never blocks and never fails a mutation: with
//! no subscribers the event is simply discarded.
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleEvent {
    /// Rows were inserted or updated.
    Saved,
    /// Rows were deleted.
    Deleted,
}

impl RuleEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleEvent::Saved => "saved",
            RuleEvent::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RuleEvents {
    sender: broadcast::Sender<RuleEvent>,
}

impl RuleEvents {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<RuleEvent> {
        self.sender.subscribe()
    }

    pub(crate) fn emit(&self, event: RuleEvent) {
        metrics::counter!("gatehouse_rule_mutations_total", "op" => event.as_str()).increment(1);
        let _ = self.sender.send(event);
    }
}
