use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use corral_agents::bridge::ResultEnvelope;
use crossbeam_channel::Receiver;
use notify::{EventKind as FsEventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// ResultChannel
// ---------------------------------------------------------------------------

/// A source of result envelopes delivered by external agents.
///
/// Channels are pull-based: the coordination loop calls [`drain`] on its own
/// cadence and every envelope returned is consumed exactly once from the
/// channel's point of view (re-delivery upstream is the ingestor's problem,
/// and it is idempotent).
///
/// [`drain`]: ResultChannel::drain
pub trait ResultChannel: Send {
    fn drain(&mut self) -> Vec<ResultEnvelope>;
}

// ---------------------------------------------------------------------------
// DropDirChannel
// ---------------------------------------------------------------------------

/// Watches an inbox directory for `*.json` result drop files.
///
/// A filesystem watcher provides low-latency pickup; every drain also sweeps
/// the whole directory, so files written before the watcher started (or whose
/// events were coalesced away) are still collected. Consumed files move to
/// `processed/`, malformed ones are renamed `*.rejected` so they are not
/// rescanned forever.
pub struct DropDirChannel {
    inbox: PathBuf,
    processed: PathBuf,
    _watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<notify::Event>>,
}

impl DropDirChannel {
    pub fn new(inbox: impl Into<PathBuf>) -> Result<Self, ChannelError> {
        let inbox = inbox.into();
        let processed = inbox.join("processed");
        std::fs::create_dir_all(&inbox)?;
        std::fs::create_dir_all(&processed)?;

        let (tx, rx) = crossbeam_channel::unbounded();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;
        watcher.watch(&inbox, RecursiveMode::NonRecursive)?;

        Ok(Self {
            inbox,
            processed,
            _watcher: watcher,
            rx,
        })
    }

    fn is_drop_file(path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some("json")
    }

    /// Candidate drop files: watcher-reported paths plus a directory sweep,
    /// deduplicated and in stable order.
    fn candidates(&self) -> Vec<PathBuf> {
        let mut paths = BTreeSet::new();

        while let Ok(result) = self.rx.try_recv() {
            let Ok(event) = result else { continue };
            if !matches!(
                event.kind,
                FsEventKind::Create(_) | FsEventKind::Modify(_)
            ) {
                continue;
            }
            for path in event.paths {
                if Self::is_drop_file(&path) && path.parent() == Some(self.inbox.as_path()) {
                    paths.insert(path);
                }
            }
        }

        if let Ok(entries) = std::fs::read_dir(&self.inbox) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_file() && Self::is_drop_file(&path) {
                    paths.insert(path);
                }
            }
        }

        paths.into_iter().collect()
    }

    fn consume(&self, path: &Path) -> Option<ResultEnvelope> {
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            // Writer may still hold the file, or a previous drain already
            // moved it; either way the next drain settles it.
            Err(e) => {
                debug!(path = %path.display(), error = %e, "drop file not readable yet");
                return None;
            }
        };
        match serde_json::from_str::<ResultEnvelope>(&data) {
            Ok(envelope) => {
                let name = path.file_name().map(|n| n.to_owned()).unwrap_or_default();
                if let Err(e) = std::fs::rename(path, self.processed.join(name)) {
                    warn!(path = %path.display(), error = %e, "failed to move processed drop file");
                }
                Some(envelope)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "malformed drop file rejected");
                let rejected = path.with_extension("rejected");
                if let Err(e) = std::fs::rename(path, &rejected) {
                    warn!(path = %path.display(), error = %e, "failed to quarantine drop file");
                }
                None
            }
        }
    }
}

impl ResultChannel for DropDirChannel {
    fn drain(&mut self) -> Vec<ResultEnvelope> {
        self.candidates()
            .iter()
            .filter_map(|path| self.consume(path))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// CallbackChannel
// ---------------------------------------------------------------------------

/// In-process result delivery: embedders hold a cloneable [`ResultSink`] and
/// push envelopes into it from anywhere (HTTP handler, worker thread); the
/// coordination loop drains the other end.
pub struct CallbackChannel {
    rx: flume::Receiver<ResultEnvelope>,
}

#[derive(Clone)]
pub struct ResultSink {
    tx: flume::Sender<ResultEnvelope>,
}

impl ResultSink {
    /// Push an envelope. Returns `false` when the channel was dropped.
    pub fn deliver(&self, envelope: ResultEnvelope) -> bool {
        self.tx.send(envelope).is_ok()
    }
}

impl CallbackChannel {
    pub fn unbounded() -> (ResultSink, Self) {
        let (tx, rx) = flume::unbounded();
        (ResultSink { tx }, Self { rx })
    }
}

impl ResultChannel for CallbackChannel {
    fn drain(&mut self) -> Vec<ResultEnvelope> {
        let mut envelopes = Vec::new();
        while let Ok(envelope) = self.rx.try_recv() {
            envelopes.push(envelope);
        }
        envelopes
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use corral_core::types::TaskOutcome;
    use uuid::Uuid;

    fn envelope(content: &str) -> ResultEnvelope {
        ResultEnvelope {
            task_id: Uuid::new_v4(),
            outcome: TaskOutcome::Success(content.into()),
        }
    }

    fn write_drop(inbox: &Path, envelope: &ResultEnvelope) -> PathBuf {
        let path = inbox.join(format!("{}.json", envelope.task_id));
        std::fs::write(&path, serde_json::to_string(envelope).unwrap()).unwrap();
        path
    }

    #[test]
    fn drop_dir_sweeps_preexisting_files() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = dir.path().join("inbox");
        std::fs::create_dir_all(&inbox).unwrap();
        let dropped = envelope("early");
        write_drop(&inbox, &dropped);

        // The file predates the watcher; the sweep must still find it.
        let mut channel = DropDirChannel::new(&inbox).unwrap();
        let drained = channel.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].task_id, dropped.task_id);

        // Consumed file moved out of the inbox.
        assert!(!inbox.join(format!("{}.json", dropped.task_id)).exists());
        assert!(inbox
            .join("processed")
            .join(format!("{}.json", dropped.task_id))
            .exists());
    }

    #[test]
    fn drop_dir_picks_up_new_files() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = dir.path().join("inbox");
        let mut channel = DropDirChannel::new(&inbox).unwrap();
        assert!(channel.drain().is_empty());

        let dropped = envelope("later");
        write_drop(&inbox, &dropped);
        // Give the OS a moment to deliver the event; the sweep covers the
        // case where it does not.
        std::thread::sleep(std::time::Duration::from_millis(200));

        let drained = channel.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].task_id, dropped.task_id);
    }

    #[test]
    fn drop_dir_delivers_each_file_once() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = dir.path().join("inbox");
        std::fs::create_dir_all(&inbox).unwrap();
        write_drop(&inbox, &envelope("once"));

        let mut channel = DropDirChannel::new(&inbox).unwrap();
        assert_eq!(channel.drain().len(), 1);
        assert!(channel.drain().is_empty());
    }

    #[test]
    fn drop_dir_quarantines_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = dir.path().join("inbox");
        std::fs::create_dir_all(&inbox).unwrap();
        std::fs::write(inbox.join("junk.json"), "{not json").unwrap();
        write_drop(&inbox, &envelope("good"));

        let mut channel = DropDirChannel::new(&inbox).unwrap();
        let drained = channel.drain();
        assert_eq!(drained.len(), 1);
        assert!(inbox.join("junk.rejected").exists());
        assert!(!inbox.join("junk.json").exists());
        // The quarantined file stays quarantined.
        assert!(channel.drain().is_empty());
    }

    #[test]
    fn drop_dir_ignores_non_json_files() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = dir.path().join("inbox");
        std::fs::create_dir_all(&inbox).unwrap();
        std::fs::write(inbox.join("README.txt"), "not a result").unwrap();

        let mut channel = DropDirChannel::new(&inbox).unwrap();
        assert!(channel.drain().is_empty());
        assert!(inbox.join("README.txt").exists());
    }

    #[test]
    fn callback_channel_round_trip() {
        let (sink, mut channel) = CallbackChannel::unbounded();
        assert!(channel.drain().is_empty());

        let first = envelope("one");
        let second = envelope("two");
        assert!(sink.deliver(first.clone()));
        assert!(sink.deliver(second.clone()));

        let drained = channel.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].task_id, first.task_id);
        assert_eq!(drained[1].task_id, second.task_id);
        assert!(channel.drain().is_empty());
    }

    #[test]
    fn callback_sink_reports_closed_channel() {
        let (sink, channel) = CallbackChannel::unbounded();
        drop(channel);
        assert!(!sink.deliver(envelope("nowhere")));
    }
}
