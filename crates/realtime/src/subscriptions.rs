//! Destination-keyed subscription registry.

use std::collections::HashMap;
use std::sync::Arc;

use tradesim_protocol::Frame;

/// Callback invoked for frames routed to a subscribed destination.
pub type FrameHandler = Arc<dyn Fn(&Frame) + Send + Sync>;

/// Returned by `subscribe`; identifies one registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    destination: String,
}

impl SubscriptionHandle {
    pub fn destination(&self) -> &str {
        &self.destination
    }
}

/// What to remove in `unsubscribe`.
#[derive(Debug, Clone, Copy)]
pub enum SubscriptionTarget<'a> {
    /// Whatever is registered for the destination.
    Destination(&'a str),
    /// Only this registration; a handle made stale by a later `subscribe`
    /// to the same destination removes nothing.
    Handle(&'a SubscriptionHandle),
}

impl<'a> From<&'a str> for SubscriptionTarget<'a> {
    fn from(destination: &'a str) -> Self {
        SubscriptionTarget::Destination(destination)
    }
}

impl<'a> From<&'a String> for SubscriptionTarget<'a> {
    fn from(destination: &'a String) -> Self {
        SubscriptionTarget::Destination(destination)
    }
}

impl<'a> From<&'a SubscriptionHandle> for SubscriptionTarget<'a> {
    fn from(handle: &'a SubscriptionHandle) -> Self {
        SubscriptionTarget::Handle(handle)
    }
}

struct Subscription {
    id: u64,
    handler: FrameHandler,
}

/// At most one subscription per destination.
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    by_destination: HashMap<String, Subscription>,
    next_id: u64,
}

impl SubscriptionRegistry {
    /// Registers `handler`, replacing any existing one for the destination.
    /// Returns the new handle and whether a prior subscription was replaced.
    pub(crate) fn insert(
        &mut self,
        destination: String,
        handler: FrameHandler,
    ) -> (SubscriptionHandle, bool) {
        let id = self.next_id;
        self.next_id += 1;
        let replaced = self
            .by_destination
            .insert(destination.clone(), Subscription { id, handler })
            .is_some();
        (SubscriptionHandle { id, destination }, replaced)
    }

    /// Returns `true` if a subscription was removed.
    pub(crate) fn remove(&mut self, target: SubscriptionTarget<'_>) -> bool {
        match target {
            SubscriptionTarget::Destination(dest) => self.by_destination.remove(dest).is_some(),
            SubscriptionTarget::Handle(handle) => {
                let current = self
                    .by_destination
                    .get(&handle.destination)
                    .is_some_and(|s| s.id == handle.id);
                if current {
                    self.by_destination.remove(&handle.destination);
                }
                current
            }
        }
    }

    pub(crate) fn handler_for(&self, destination: &str) -> Option<FrameHandler> {
        self.by_destination
            .get(destination)
            .map(|s| s.handler.clone())
    }

    /// Drops every registration and returns how many there were.
    pub(crate) fn clear(&mut self) -> usize {
        let count = self.by_destination.len();
        self.by_destination.clear();
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.by_destination.len()
    }
}
