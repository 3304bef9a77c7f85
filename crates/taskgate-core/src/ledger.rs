//! Append-only change ledger with live broadcast and replay.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{
    ChangeEntry, ChangeKind, ChangePaths, ContextUpdate, EventSender, ServerEvent, TransportError,
    UpdateKind, now_millis,
};

/// Capacity of the live observer channel.
const BROADCAST_CAPACITY: usize = 1024;

/// Ledger error.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Paths {paths:?} do not fit change kind {kind:?}")]
    PathShape { kind: ChangeKind, paths: ChangePaths },
}

struct Inner {
    entries: Vec<ChangeEntry>,
    last_ordinal: u64,
    channel: Option<EventSender>,
}

/// Ordered, append-only log of the changes made under one base directory.
///
/// The attached channel (the owning connection) receives one
/// `context-update` per append. Other observers can follow along through
/// [`Ledger::subscribe`] or [`Ledger::history_plus_stream`].
pub struct Ledger {
    base_dir: String,
    inner: RwLock<Inner>,
    sender: broadcast::Sender<ChangeEntry>,
}

impl Ledger {
    /// Create an empty ledger for `base_dir`.
    #[must_use]
    pub fn new(base_dir: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            base_dir: base_dir.into(),
            inner: RwLock::new(Inner {
                entries: Vec::with_capacity(32),
                last_ordinal: 0,
                channel: None,
            }),
            sender,
        }
    }

    /// Base directory this ledger records.
    #[must_use]
    pub fn base_dir(&self) -> &str {
        &self.base_dir
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Route append notifications to `channel`.
    pub fn attach(&self, channel: EventSender) {
        self.write().channel = Some(channel);
    }

    /// Stop sending append notifications anywhere.
    pub fn detach(&self) {
        self.write().channel = None;
    }

    /// Record an operation and notify the attached channel.
    ///
    /// Returns the ordinal assigned to the new entry.
    ///
    /// # Errors
    /// Returns error if `paths` has the wrong shape for `kind`.
    pub fn append(&self, kind: ChangeKind, paths: ChangePaths) -> Result<u64, LedgerError> {
        if !paths.fits(kind) {
            return Err(LedgerError::PathShape { kind, paths });
        }

        // Emission happens under the write lock so notification order always
        // matches ordinal order.
        let mut inner = self.write();
        inner.last_ordinal += 1;
        let entry = ChangeEntry {
            ordinal: inner.last_ordinal,
            kind,
            paths,
            timestamp: now_millis(),
        };
        inner.entries.push(entry.clone());

        if let Some(channel) = &inner.channel {
            let update = ServerEvent::ContextUpdate(ContextUpdate::Single {
                kind: UpdateKind::EntryAdded,
                text: entry.describe(),
                entry: Some(entry.clone()),
            });
            if channel.send(update).is_err() {
                tracing::debug!(base_dir = %self.base_dir, "Ledger channel closed, entry kept");
            }
        }
        let ordinal = entry.ordinal;
        let _ = self.sender.send(entry); // live observers
        Ok(ordinal)
    }

    /// All entries in ordinal order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ChangeEntry> {
        self.read().entries.clone()
    }

    /// Number of recorded entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    /// Send a resuming marker followed by the full history to `channel`.
    ///
    /// Returns the number of entries replayed.
    ///
    /// # Errors
    /// Returns error if the channel is closed.
    pub fn replay_to(&self, channel: &EventSender) -> Result<usize, TransportError> {
        let inner = self.read();
        let count = inner.entries.len();
        channel.send(ServerEvent::ContextUpdate(ContextUpdate::Single {
            kind: UpdateKind::Resuming,
            text: format!("Resuming {count} previous changes in {}", self.base_dir),
            entry: None,
        }))?;
        channel.send(ServerEvent::ContextUpdate(ContextUpdate::Bulk {
            changes: inner.entries.clone(),
        }))?;
        Ok(count)
    }

    /// Discard every entry; the next append gets ordinal 1 again.
    pub fn reset(&self) {
        let mut inner = self.write();
        inner.entries.clear();
        inner.last_ordinal = 0;
    }

    /// Receiver for entries appended from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEntry> {
        self.sender.subscribe()
    }

    /// Stream that yields existing entries first, then live appends.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, ChangeEntry> {
        // Subscribing under the read lock means no append can slip between
        // the history copy and the live receiver.
        let (history, rx) = {
            let inner = self.read();
            (inner.entries.clone(), self.sender.subscribe())
        };

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        Box::pin(hist.chain(live))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_event(ev: &ServerEvent) -> &ChangeEntry {
        match ev {
            ServerEvent::ContextUpdate(ContextUpdate::Single {
                kind: UpdateKind::EntryAdded,
                entry: Some(entry),
                ..
            }) => entry,
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_append_assigns_gapless_ordinals() {
        let ledger = Ledger::new("/proj");
        let kinds = [
            ChangeKind::CreateFile,
            ChangeKind::UpdateFile,
            ChangeKind::ReadFile,
            ChangeKind::DeleteFile,
        ];
        for (i, kind) in kinds.iter().enumerate() {
            let ordinal = ledger.append(*kind, ChangePaths::single(format!("f{i}"))).unwrap();
            assert_eq!(ordinal, i as u64 + 1);
        }

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.len(), kinds.len());
        for (i, entry) in snapshot.iter().enumerate() {
            assert_eq!(entry.ordinal, i as u64 + 1);
            assert_eq!(entry.kind, kinds[i]);
        }
    }

    #[test]
    fn test_append_rejects_wrong_path_shape() {
        let ledger = Ledger::new("/proj");
        let err = ledger.append(ChangeKind::MoveItem, ChangePaths::single("a"));
        assert!(matches!(err, Err(LedgerError::PathShape { .. })));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_append_emits_one_update_per_call() {
        let ledger = Ledger::new("/proj");
        let (channel, mut rx) = EventSender::channel();
        ledger.attach(channel);

        ledger.append(ChangeKind::CreateFile, ChangePaths::single("a")).unwrap();
        ledger.append(ChangeKind::MoveItem, ChangePaths::moved("a", "b")).unwrap();

        assert_eq!(entry_event(&rx.try_recv().unwrap()).ordinal, 1);
        let second = rx.try_recv().unwrap();
        assert_eq!(entry_event(&second).kind, ChangeKind::MoveItem);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_snapshot_does_not_emit() {
        let ledger = Ledger::new("/proj");
        ledger.append(ChangeKind::ReadFile, ChangePaths::single("a")).unwrap();
        let (channel, mut rx) = EventSender::channel();
        ledger.attach(channel);

        let _ = ledger.snapshot();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_replay_sends_marker_then_entries() {
        let ledger = Ledger::new("/proj");
        for name in ["a", "b", "c"] {
            ledger.append(ChangeKind::CreateFile, ChangePaths::single(name)).unwrap();
        }
        let (channel, mut rx) = EventSender::channel();

        assert_eq!(ledger.replay_to(&channel).unwrap(), 3);

        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerEvent::ContextUpdate(ContextUpdate::Single {
                kind: UpdateKind::Resuming,
                ..
            })
        ));
        match rx.try_recv().unwrap() {
            ServerEvent::ContextUpdate(ContextUpdate::Bulk { changes }) => {
                let ordinals: Vec<u64> = changes.iter().map(|c| c.ordinal).collect();
                assert_eq!(ordinals, vec![1, 2, 3]);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_reset_restarts_ordinals() {
        let ledger = Ledger::new("/proj");
        ledger.append(ChangeKind::CreateFile, ChangePaths::single("a")).unwrap();
        ledger.append(ChangeKind::CreateFile, ChangePaths::single("b")).unwrap();

        ledger.reset();
        assert!(ledger.snapshot().is_empty());
        assert_eq!(
            ledger.append(ChangeKind::CreateFile, ChangePaths::single("c")).unwrap(),
            1
        );
    }

    #[test]
    fn test_detached_ledger_still_records() {
        let ledger = Ledger::new("/proj");
        let (channel, mut rx) = EventSender::channel();
        ledger.attach(channel);
        ledger.detach();

        ledger.append(ChangeKind::ReadFile, ChangePaths::single("a")).unwrap();
        assert_eq!(ledger.len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_history_plus_stream_yields_history_then_live() {
        let ledger = Ledger::new("/proj");
        ledger.append(ChangeKind::ReadFile, ChangePaths::single("old")).unwrap();

        let mut stream = ledger.history_plus_stream();
        ledger.append(ChangeKind::UpdateFile, ChangePaths::single("new")).unwrap();

        assert_eq!(stream.next().await.unwrap().ordinal, 1);
        let live = stream.next().await.unwrap();
        assert_eq!(live.ordinal, 2);
        assert_eq!(live.kind, ChangeKind::UpdateFile);
    }
}
