use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use super::{EngineEvent, MetronomeEngine};
use crate::notify::NoteEvent;

impl<P: Clone + Send + Sync + 'static> MetronomeEngine<P> {
    // ========================================================================
    // STREAM SUBSCRIPTIONS
    // ========================================================================

    /// Receiver of lifecycle events (started, stopped, errors, ...)
    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Lifecycle events as a stream; lagged events are skipped
    pub fn event_stream(&self) -> impl Stream<Item = EngineEvent> + Send + 'static {
        BroadcastStream::new(self.subscribe_events())
            .filter_map(|result| async move { result.ok() })
    }

    /// Receiver of every note event, with no listener delay applied
    pub fn subscribe_notes(&self) -> broadcast::Receiver<NoteEvent<P>> {
        self.inner.notes.subscribe()
    }

    /// Note events as a stream; lagged events are skipped
    pub fn note_stream(&self) -> impl Stream<Item = NoteEvent<P>> + Send + 'static {
        BroadcastStream::new(self.subscribe_notes()).filter_map(|result| async move { result.ok() })
    }
}
