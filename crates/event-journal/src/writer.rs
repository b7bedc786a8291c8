use std::fs::{self, File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::warn;

use crate::entry::JournalEntry;
use crate::errors::JournalError;

enum Command {
    Append(JournalEntry),
    Flush(mpsc::Sender<io::Result<()>>),
    Shutdown(mpsc::Sender<io::Result<()>>),
}

/// Handle to the journal writer thread. Clones share the same file and ordering.
#[derive(Clone)]
pub struct Journal {
    path: PathBuf,
    tx: Sender<Command>,
    thread: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal").field("path", &self.path).finish()
    }
}

impl Journal {
    /// Opens `path` in append mode (creating parent directories) and starts the writer thread.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, JournalError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let (tx, rx) = mpsc::channel();
        let mut state = WriterState {
            sink: LineWriter::new(file),
        };
        let handle = thread::Builder::new()
            .name("journal-writer".into())
            .spawn(move || {
                while let Ok(cmd) = rx.recv() {
                    match cmd {
                        Command::Append(entry) => {
                            if let Err(err) = state.append(&entry) {
                                warn!(target: "event-journal", %err, "append failed");
                            }
                        }
                        Command::Flush(reply) => {
                            let _ = reply.send(state.flush());
                        }
                        Command::Shutdown(reply) => {
                            let _ = reply.send(state.flush());
                            break;
                        }
                    }
                }
            })?;

        Ok(Self {
            path,
            tx,
            thread: Arc::new(Mutex::new(Some(handle))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queues one entry. Never blocks on disk.
    pub fn append(&self, entry: JournalEntry) -> Result<(), JournalError> {
        self.tx
            .send(Command::Append(entry))
            .map_err(|_| JournalError::Closed)
    }

    /// Waits until every entry queued before this call is on disk.
    pub fn flush(&self) -> Result<(), JournalError> {
        let (reply, rx) = mpsc::channel();
        self.tx
            .send(Command::Flush(reply))
            .map_err(|_| JournalError::Closed)?;
        rx.recv().map_err(|_| JournalError::Closed)??;
        Ok(())
    }

    /// Flushes, stops the writer thread and waits for it. Later calls are no-ops.
    pub fn close(&self) -> Result<(), JournalError> {
        let Some(handle) = self.thread.lock().take() else {
            return Ok(());
        };
        let (reply, rx) = mpsc::channel();
        let flushed = match self.tx.send(Command::Shutdown(reply)) {
            Ok(()) => rx.recv().unwrap_or(Ok(())),
            Err(_) => Ok(()),
        };
        let _ = handle.join();
        flushed?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.thread.lock().is_none()
    }
}

struct WriterState {
    sink: LineWriter<File>,
}

impl WriterState {
    fn append(&mut self, entry: &JournalEntry) -> Result<(), JournalError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        self.sink.write_all(&line)?;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()?;
        self.sink.get_ref().sync_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryKind;
    use crate::reader::read_entries;

    #[test]
    fn appends_in_order_and_reopens_in_append_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("proxy.jsonl");

        let journal = Journal::open(&path).unwrap();
        for n in 0..5 {
            journal
                .append(JournalEntry::new(EntryKind::Event).field("n", n))
                .unwrap();
        }
        journal.close().unwrap();

        let journal = Journal::open(&path).unwrap();
        journal
            .append(JournalEntry::new(EntryKind::Proxy).field("n", 5))
            .unwrap();
        journal.flush().unwrap();

        let entries = read_entries(&path).unwrap();
        let ns: Vec<i64> = entries
            .iter()
            .filter_map(|entry| entry.get("n").and_then(|n| n.as_i64()))
            .collect();
        assert_eq!(ns, vec![0, 1, 2, 3, 4, 5]);
        journal.close().unwrap();
    }

    #[test]
    fn close_is_idempotent_and_rejects_appends() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path().join("j.jsonl")).unwrap();
        let clone = journal.clone();
        journal.close().unwrap();
        clone.close().unwrap();
        assert!(journal.is_closed());
        assert!(matches!(
            clone.append(JournalEntry::new(EntryKind::Proxy)),
            Err(JournalError::Closed)
        ));
        assert!(matches!(journal.flush(), Err(JournalError::Closed)));
    }
}
