//! Project lifecycle events
//!
//! Events are published on a fixed set of channels. Synchronous listeners are
//! registered per channel with [`EventBus::on`] and removed with [`EventBus::off`];
//! async consumers can [`EventBus::subscribe`] to a broadcast stream of every
//! event. A listener that returns an error or panics is logged and skipped, so
//! one misbehaving subscriber never breaks the emit loop or its caller.

use crate::project::Project;
use crate::types::ProjectId;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

/// Named event channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventChannel {
    ProjectAdded,
    ProjectUpdated,
    ProjectDeleted,
    ProjectSwitched,
    ProjectsLoaded,
    ProjectsSaved,
}

impl EventChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProjectAdded => "projectAdded",
            Self::ProjectUpdated => "projectUpdated",
            Self::ProjectDeleted => "projectDeleted",
            Self::ProjectSwitched => "projectSwitched",
            Self::ProjectsLoaded => "projectsLoaded",
            Self::ProjectsSaved => "projectsSaved",
        }
    }
}

impl std::fmt::Display for EventChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle event payload
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectEvent {
    /// Project inserted into the collection
    ProjectAdded { project: Project },
    /// Open project's edits saved
    ProjectUpdated { project: Project },
    /// Project removed
    ProjectDeleted { project_id: ProjectId },
    /// Open project changed; `old_project_id` is what was open before
    ProjectSwitched {
        old_project_id: Option<ProjectId>,
        new_project_id: ProjectId,
    },
    /// Collection loaded during initialization
    ProjectsLoaded { count: usize },
    /// Collection persisted
    ProjectsSaved { count: usize },
}

impl ProjectEvent {
    pub fn channel(&self) -> EventChannel {
        match self {
            Self::ProjectAdded { .. } => EventChannel::ProjectAdded,
            Self::ProjectUpdated { .. } => EventChannel::ProjectUpdated,
            Self::ProjectDeleted { .. } => EventChannel::ProjectDeleted,
            Self::ProjectSwitched { .. } => EventChannel::ProjectSwitched,
            Self::ProjectsLoaded { .. } => EventChannel::ProjectsLoaded,
            Self::ProjectsSaved { .. } => EventChannel::ProjectsSaved,
        }
    }
}

/// Handle returned by [`EventBus::on`], used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Synchronous event listener
pub type Listener = Arc<dyn Fn(&ProjectEvent) -> anyhow::Result<()> + Send + Sync>;

/// Per-channel listener registry plus a broadcast stream
pub struct EventBus {
    listeners: HashMap<EventChannel, Vec<(ListenerId, Listener)>>,
    next_id: u64,
    tx: broadcast::Sender<ProjectEvent>,
}

impl EventBus {
    /// Create a bus whose broadcast stream buffers `capacity` events
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            listeners: HashMap::new(),
            next_id: 0,
            tx,
        }
    }

    /// Register a listener on a channel
    pub fn on<F>(&mut self, channel: EventChannel, listener: F) -> ListenerId
    where
        F: Fn(&ProjectEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners
            .entry(channel)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Unregister a listener; returns whether it was registered on `channel`
    pub fn off(&mut self, channel: EventChannel, id: ListenerId) -> bool {
        let Some(listeners) = self.listeners.get_mut(&channel) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Number of listeners registered on a channel
    pub fn listener_count(&self, channel: EventChannel) -> usize {
        self.listeners.get(&channel).map_or(0, Vec::len)
    }

    /// Subscribe to every event as an async stream
    pub fn subscribe(&self) -> broadcast::Receiver<ProjectEvent> {
        self.tx.subscribe()
    }

    /// Deliver an event to every listener on its channel, then broadcast it
    pub fn trigger(&self, event: ProjectEvent) {
        let channel = event.channel();
        if let Some(listeners) = self.listeners.get(&channel) {
            for (id, listener) in listeners {
                match panic::catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!("Listener {:?} on {} failed: {}", id, channel, e);
                    }
                    Err(_) => {
                        error!("Listener {:?} on {} panicked", id, channel);
                    }
                }
            }
        }

        if self.tx.send(event).is_err() {
            debug!("No broadcast subscribers for {}", channel);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<&str, usize> = self
            .listeners
            .iter()
            .map(|(channel, listeners)| (channel.as_str(), listeners.len()))
            .collect();
        f.debug_struct("EventBus")
            .field("listeners", &counts)
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter(bus: &mut EventBus, channel: EventChannel) -> (ListenerId, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let id = bus.on(channel, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (id, count)
    }

    #[test]
    fn test_listeners_only_see_their_channel() {
        let mut bus = EventBus::default();
        let (_, loaded) = counter(&mut bus, EventChannel::ProjectsLoaded);
        let (_, saved) = counter(&mut bus, EventChannel::ProjectsSaved);

        bus.trigger(ProjectEvent::ProjectsLoaded { count: 3 });
        assert_eq!(loaded.load(Ordering::SeqCst), 1);
        assert_eq!(saved.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_off_unregisters() {
        let mut bus = EventBus::default();
        let (id, count) = counter(&mut bus, EventChannel::ProjectDeleted);
        assert!(bus.off(EventChannel::ProjectDeleted, id));
        assert!(!bus.off(EventChannel::ProjectDeleted, id));
        assert!(!bus.off(EventChannel::ProjectAdded, id));

        bus.trigger(ProjectEvent::ProjectDeleted {
            project_id: ProjectId::from("p1"),
        });
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(bus.listener_count(EventChannel::ProjectDeleted), 0);
    }

    #[test]
    fn test_failing_listeners_are_isolated() {
        let mut bus = EventBus::default();
        bus.on(EventChannel::ProjectsSaved, |_| anyhow::bail!("disk full"));
        bus.on(EventChannel::ProjectsSaved, |_| panic!("listener bug"));
        let (_, count) = counter(&mut bus, EventChannel::ProjectsSaved);

        bus.trigger(ProjectEvent::ProjectsSaved { count: 1 });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_broadcast_subscriber() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.trigger(ProjectEvent::ProjectSwitched {
            old_project_id: None,
            new_project_id: ProjectId::from("p2"),
        });

        let received = rx.recv().await.unwrap();
        assert_eq!(received.channel(), EventChannel::ProjectSwitched);
    }
}
