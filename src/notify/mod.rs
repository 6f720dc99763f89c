//! Notification dispatch - "note started" events for non-audio consumers
//!
//! Marker crossings are turned into [`NoteEvent`]s and fanned out to every
//! registered listener. Each listener picks:
//! - an extra delay, for consumers that must line up with what the user
//!   hears rather than with the marker (a visual tick behind a Bluetooth
//!   sink, for example)
//! - an [`Executor`], the context its callback runs on
//!
//! Delayed deliveries are timed on a dedicated thread running a
//! current-thread tokio runtime. Every event is also published on a
//! broadcast channel for async consumers.

mod executor;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use log::{debug, warn};
use tokio::sync::{broadcast, mpsc};

pub use executor::{Executor, InlineExecutor, Job, QueueExecutor, TokioExecutor};

use crate::error::AudioError;

/// A playlist item started playing
#[derive(Debug, Clone, PartialEq)]
pub struct NoteEvent<P> {
    /// Payload of the playlist item
    pub payload: P,
    /// Index of the item in the playlist at scheduling time
    pub playlist_index: usize,
    /// Absolute output frame of the marker
    pub frame: i64,
    /// When the playback head crossed the marker
    pub firing_time: Instant,
}

type NoteCallback<P> = dyn Fn(&NoteEvent<P>) + Send + Sync;

#[derive(Default)]
struct GateState {
    active: bool,
    running: Vec<ThreadId>,
}

/// Tracks in-flight invocations of one listener so unregistering can wait
/// for them
struct ListenerGate {
    state: Mutex<GateState>,
    idle: Condvar,
}

impl ListenerGate {
    fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                active: true,
                running: Vec::new(),
            }),
            idle: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn enter(self: &Arc<Self>) -> Option<GatePass> {
        let mut state = self.lock();
        if !state.active {
            return None;
        }
        state.running.push(thread::current().id());
        Some(GatePass {
            gate: Arc::clone(self),
        })
    }

    /// Stop new invocations and wait for running ones on other threads
    fn close(&self) {
        let me = thread::current().id();
        let mut state = self.lock();
        state.active = false;
        while state.running.iter().any(|id| *id != me) {
            state = self.idle.wait(state).unwrap_or_else(|err| err.into_inner());
        }
    }
}

/// Proof of a running invocation; released on drop, even on panic
struct GatePass {
    gate: Arc<ListenerGate>,
}

impl Drop for GatePass {
    fn drop(&mut self) {
        let me = thread::current().id();
        let mut state = self.gate.lock();
        if let Some(pos) = state.running.iter().position(|id| *id == me) {
            state.running.swap_remove(pos);
        }
        self.gate.idle.notify_all();
    }
}

struct ListenerEntry<P> {
    id: u64,
    delay: Duration,
    executor: Arc<dyn Executor>,
    callback: Arc<NoteCallback<P>>,
    gate: Arc<ListenerGate>,
}

impl<P> Clone for ListenerEntry<P> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            delay: self.delay,
            executor: Arc::clone(&self.executor),
            callback: Arc::clone(&self.callback),
            gate: Arc::clone(&self.gate),
        }
    }
}

impl<P: Send + Sync + 'static> ListenerEntry<P> {
    fn deliver(&self, event: Arc<NoteEvent<P>>) {
        let callback = Arc::clone(&self.callback);
        let gate = Arc::clone(&self.gate);
        self.executor.execute(Box::new(move || {
            if let Some(_pass) = gate.enter() {
                callback(&event);
            }
        }));
    }
}

struct Registry<P> {
    listeners: RwLock<Vec<ListenerEntry<P>>>,
    next_id: AtomicU64,
}

trait Unregister: Send + Sync {
    fn unregister(&self, id: u64) -> bool;
}

impl<P: Send + Sync + 'static> Unregister for Registry<P> {
    fn unregister(&self, id: u64) -> bool {
        let removed = {
            let mut listeners = self
                .listeners
                .write()
                .unwrap_or_else(|err| err.into_inner());
            listeners
                .iter()
                .position(|entry| entry.id == id)
                .map(|pos| listeners.remove(pos))
        };
        match removed {
            Some(entry) => {
                entry.gate.close();
                debug!("[Notify] Listener {} unregistered", id);
                true
            }
            None => false,
        }
    }
}

/// Registration token returned by `register_listener`
///
/// Dropping the handle does not unregister the listener.
#[derive(Clone)]
pub struct ListenerHandle {
    id: u64,
    registry: Weak<dyn Unregister>,
}

impl ListenerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the listener. After this returns its callback is not running
    /// (unless this is called from inside it) and never runs again.
    ///
    /// # Returns
    /// `false` if it was already unregistered or the dispatcher is gone
    pub fn unregister(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.unregister(self.id),
            None => false,
        }
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle").field("id", &self.id).finish()
    }
}

struct DelayedDelivery<P> {
    due: Instant,
    entry: ListenerEntry<P>,
    event: Arc<NoteEvent<P>>,
}

/// Fans note events out to listeners and the note broadcast channel
pub struct NoteDispatcher<P> {
    registry: Arc<Registry<P>>,
    delay_tx: mpsc::UnboundedSender<DelayedDelivery<P>>,
    notes_tx: broadcast::Sender<NoteEvent<P>>,
}

impl<P: Clone + Send + Sync + 'static> NoteDispatcher<P> {
    /// Create the dispatcher and start its delay thread.
    ///
    /// The thread exits once the dispatcher is dropped; deliveries still
    /// waiting at that point are discarded.
    ///
    /// # Errors
    /// `HardwareError` if the runtime or thread cannot be created
    pub fn new(note_channel_capacity: usize) -> Result<Self, AudioError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        let (delay_tx, mut delay_rx) = mpsc::unbounded_channel::<DelayedDelivery<P>>();

        thread::Builder::new()
            .name("note-delay".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    while let Some(delivery) = delay_rx.recv().await {
                        tokio::spawn(async move {
                            tokio::time::sleep_until(delivery.due.into()).await;
                            delivery.entry.deliver(delivery.event);
                        });
                    }
                });
                debug!("[Notify] Delay thread stopped");
            })?;

        let (notes_tx, _) = broadcast::channel(note_channel_capacity.max(1));

        Ok(Self {
            registry: Arc::new(Registry {
                listeners: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
            delay_tx,
            notes_tx,
        })
    }

    /// Register a callback invoked for every note event.
    ///
    /// # Arguments
    /// * `delay` - Extra time after the marker crossing before delivery
    /// * `executor` - Context the callback runs on
    /// * `callback` - Receives each event
    pub fn register_listener<F>(
        &self,
        delay: Duration,
        executor: Arc<dyn Executor>,
        callback: F,
    ) -> ListenerHandle
    where
        F: Fn(&NoteEvent<P>) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = ListenerEntry {
            id,
            delay,
            executor,
            callback: Arc::new(callback),
            gate: Arc::new(ListenerGate::new()),
        };
        self.registry
            .listeners
            .write()
            .unwrap_or_else(|err| err.into_inner())
            .push(entry);
        debug!("[Notify] Listener {} registered (delay {:?})", id, delay);

        let registry: Arc<dyn Unregister> = self.registry.clone();
        ListenerHandle {
            id,
            registry: Arc::downgrade(&registry),
        }
    }

    /// Same as [`ListenerHandle::unregister`]
    pub fn unregister_listener(&self, handle: &ListenerHandle) -> bool {
        self.registry.unregister(handle.id)
    }

    pub fn listener_count(&self) -> usize {
        self.registry
            .listeners
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .len()
    }

    /// Receiver of every note event, independent of registered listeners
    pub fn subscribe(&self) -> broadcast::Receiver<NoteEvent<P>> {
        self.notes_tx.subscribe()
    }

    /// Deliver `event` to every listener and the broadcast channel.
    ///
    /// Undelayed listeners are handed to their executor right away; delayed
    /// ones are queued on the delay thread for `firing_time + delay`.
    pub fn dispatch(&self, event: NoteEvent<P>) {
        // No subscribers is not an error
        let _ = self.notes_tx.send(event.clone());

        let listeners: Vec<ListenerEntry<P>> = self
            .registry
            .listeners
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .clone();
        if listeners.is_empty() {
            return;
        }

        let event = Arc::new(event);
        for entry in listeners {
            if entry.delay.is_zero() {
                entry.deliver(Arc::clone(&event));
                continue;
            }
            let delivery = DelayedDelivery {
                due: event.firing_time + entry.delay,
                entry,
                event: Arc::clone(&event),
            };
            if self.delay_tx.send(delivery).is_err() {
                warn!("[Notify] Delay thread is gone, dropping delayed note");
            }
        }
    }
}
