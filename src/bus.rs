//! Process event bus.
//!
//! System notifications and transition controls subscribe to named process
//! events (start/stop, network state, system time changes). Events are
//! posted from any thread, queued, and dispatched to subscribers from a
//! single bus thread, so subscriber callbacks never run inside the
//! poster's critical section.
//!
//! Shutdown drains everything already queued, then refuses new posts.

use std::sync::mpsc;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use log::warn;
use parking_lot::Mutex;

use crate::device::Device;

/// Named process-level events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEvent {
    Start,
    Stop,
    Suspending,
    Resuming,
    SystemTimeChanged,
    NetworkAvailable,
    NetworkUnavailable,
}

impl SystemEvent {
    /// Config-facing name of the event.
    pub fn name(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Suspending => "suspending",
            Self::Resuming => "resuming",
            Self::SystemTimeChanged => "timechanged",
            Self::NetworkAvailable => "networkavailable",
            Self::NetworkUnavailable => "networkunavailable",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let event = match name.trim().to_lowercase().as_str() {
            "start" => Self::Start,
            "stop" => Self::Stop,
            "suspending" => Self::Suspending,
            "resuming" => Self::Resuming,
            "timechanged" | "systemtimechanged" => Self::SystemTimeChanged,
            "networkavailable" => Self::NetworkAvailable,
            "networkunavailable" => Self::NetworkUnavailable,
            _ => return None,
        };
        Some(event)
    }
}

struct BusShared {
    subscribers: Mutex<Vec<Weak<Device>>>,
}

/// Single-threaded event dispatcher.
pub struct EventBus {
    shared: Arc<BusShared>,
    sender: Mutex<Option<mpsc::Sender<SystemEvent>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        let shared = Arc::new(BusShared { subscribers: Mutex::new(Vec::new()) });
        let (sender, receiver) = mpsc::channel::<SystemEvent>();

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("hearth-bus".to_owned())
            .spawn(move || {
                // the loop ends when every sender is dropped and the queue
                // has drained
                while let Ok(event) = receiver.recv() {
                    let targets: Vec<Arc<Device>> = {
                        let mut subscribers = worker_shared.subscribers.lock();
                        subscribers.retain(|w| w.strong_count() > 0);
                        subscribers.iter().filter_map(Weak::upgrade).collect()
                    };
                    for device in targets {
                        device.handle_event(event);
                    }
                }
            })
            .expect("failed to spawn bus thread");

        Arc::new(Self {
            shared,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Register a device for event delivery. Devices are held weakly and
    /// swept once dropped.
    pub fn subscribe(&self, device: &Arc<Device>) {
        let mut subscribers = self.shared.subscribers.lock();
        let known = subscribers
            .iter()
            .any(|w| w.upgrade().is_some_and(|d| Arc::ptr_eq(&d, device)));
        if !known {
            subscribers.push(Arc::downgrade(device));
        }
    }

    /// Queue an event for dispatch. Returns false once shutdown has begun.
    pub fn post(&self, event: SystemEvent) -> bool {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => {
                warn!("event bus is shut down, dropping '{}'", event.name());
                false
            }
        }
    }

    /// Refuse new events, drain the queue, and join the dispatch thread.
    pub fn shutdown(&self) {
        // dropping the sender lets the worker drain and exit
        drop(self.sender.lock().take());
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_round_trip() {
        for event in [
            SystemEvent::Start,
            SystemEvent::Stop,
            SystemEvent::Suspending,
            SystemEvent::Resuming,
            SystemEvent::SystemTimeChanged,
            SystemEvent::NetworkAvailable,
            SystemEvent::NetworkUnavailable,
        ] {
            assert_eq!(SystemEvent::from_name(event.name()), Some(event));
        }
        assert_eq!(SystemEvent::from_name("reboot"), None);
    }

    #[test]
    fn post_after_shutdown_is_refused() {
        let bus = EventBus::new();
        assert!(bus.post(SystemEvent::Start));
        bus.shutdown();
        assert!(!bus.post(SystemEvent::Stop));
    }
}
