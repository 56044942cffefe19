//! Per-account event log tailing.
//!
//! Each account gets one watcher thread that polls its log file and forwards
//! complete lines to the consumer loop. Offsets live only in memory: a fresh
//! watcher starts at the current end of an existing file, so history written
//! while the daemon was down is never replayed.

use fs_err as fs;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A raw line read from an account's log, not yet parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchLine {
    pub account_id: String,
    pub line: String,
}

#[derive(Debug)]
pub struct LogTailer {
    path: PathBuf,
    offset: u64,
}

impl LogTailer {
    /// Starts at end-of-file when the log already exists, otherwise at 0 so
    /// the first lines of a newly created log are not lost.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let offset = fs::metadata(&path).map(|meta| meta.len()).unwrap_or(0);
        Self { path, offset }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Reads everything appended since the last poll and returns the complete
    /// lines in file order. A trailing partial line stays unread until its
    /// newline arrives.
    pub fn poll_once(&mut self) -> io::Result<Vec<String>> {
        let mut file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        let len = file.metadata()?.len();
        if len < self.offset {
            warn!(
                path = %self.path.display(),
                offset = self.offset,
                len,
                "Event log shrank; restarting from the beginning"
            );
            self.offset = 0;
        }
        if len == self.offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut buffer = Vec::with_capacity((len - self.offset) as usize);
        file.take(len - self.offset).read_to_end(&mut buffer)?;

        let Some(last_newline) = buffer.iter().rposition(|b| *b == b'\n') else {
            return Ok(Vec::new());
        };
        let complete = &buffer[..=last_newline];
        self.offset += complete.len() as u64;

        Ok(complete
            .split(|b| *b == b'\n')
            .map(|raw| String::from_utf8_lossy(raw).trim_end_matches('\r').to_string())
            .filter(|line| !line.trim().is_empty())
            .collect())
    }
}

pub fn spawn_watcher(
    account_id: String,
    mut tailer: LogTailer,
    interval: Duration,
    sender: Sender<WatchLine>,
    stop: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("watch-{}", account_id))
        .spawn(move || {
            info!(
                account = %account_id,
                path = %tailer.path().display(),
                offset = tailer.offset(),
                "Watching event log"
            );
            while !stop.load(Ordering::Relaxed) {
                thread::sleep(interval);
                let lines = match tailer.poll_once() {
                    Ok(lines) => lines,
                    Err(err) => {
                        debug!(account = %account_id, error = %err, "Event log not readable");
                        continue;
                    }
                };
                for line in lines {
                    let message = WatchLine {
                        account_id: account_id.clone(),
                        line,
                    };
                    if sender.send(message).is_err() {
                        debug!(account = %account_id, "Consumer gone; watcher exiting");
                        return;
                    }
                }
            }
            debug!(account = %account_id, "Watcher stopped");
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::mpsc;
    use std::time::Instant;

    fn append(path: &Path, text: &str) {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .expect("open log");
        file.write_all(text.as_bytes()).expect("append log");
    }

    #[test]
    fn existing_file_is_not_replayed() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("alice.log");
        append(&path, "{\"t\":1,\"event\":\"RUNNING\"}\n");

        let mut tailer = LogTailer::new(&path);
        assert_eq!(tailer.poll_once().expect("poll"), Vec::<String>::new());

        append(&path, "{\"t\":2,\"event\":\"RUNNING\"}\n");
        assert_eq!(
            tailer.poll_once().expect("poll"),
            vec!["{\"t\":2,\"event\":\"RUNNING\"}".to_string()]
        );
    }

    #[test]
    fn missing_file_starts_at_zero_and_waits() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("bob.log");

        let mut tailer = LogTailer::new(&path);
        assert_eq!(tailer.offset(), 0);
        assert!(tailer.poll_once().expect("poll missing").is_empty());

        append(&path, "first\nsecond\n");
        assert_eq!(
            tailer.poll_once().expect("poll"),
            vec!["first".to_string(), "second".to_string()]
        );
    }

    #[test]
    fn appended_lines_are_emitted_once_in_order() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("carol.log");
        let mut tailer = LogTailer::new(&path);

        let lines: Vec<String> = (0..25).map(|i| format!("line-{}", i)).collect();
        append(&path, &format!("{}\n", lines.join("\n")));

        assert_eq!(tailer.poll_once().expect("poll"), lines);
        assert!(tailer.poll_once().expect("poll again").is_empty());
    }

    #[test]
    fn partial_line_waits_for_newline() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("dave.log");
        let mut tailer = LogTailer::new(&path);

        append(&path, "complete\npart");
        assert_eq!(tailer.poll_once().expect("poll"), vec!["complete".to_string()]);

        append(&path, "ial\r\n");
        assert_eq!(tailer.poll_once().expect("poll"), vec!["partial".to_string()]);
    }

    #[test]
    fn truncated_file_restarts_from_beginning() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("erin.log");
        let mut tailer = LogTailer::new(&path);
        append(&path, "aaaaaaaaaa\nbbbbbbbbbb\n");
        assert_eq!(tailer.poll_once().expect("poll").len(), 2);

        fs::write(&path, "new\n").expect("truncate log");
        assert_eq!(tailer.poll_once().expect("poll"), vec!["new".to_string()]);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("frank.log");
        let mut tailer = LogTailer::new(&path);
        append(&path, "one\n\n   \ntwo\n");
        assert_eq!(
            tailer.poll_once().expect("poll"),
            vec!["one".to_string(), "two".to_string()]
        );
    }

    #[test]
    fn spawned_watcher_forwards_lines_until_stopped() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("gina.log");
        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));

        let handle = spawn_watcher(
            "gina".to_string(),
            LogTailer::new(&path),
            Duration::from_millis(10),
            tx,
            Arc::clone(&stop),
        )
        .expect("spawn watcher");

        append(&path, "hello\nworld\n");
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut received = Vec::new();
        while received.len() < 2 && Instant::now() < deadline {
            if let Ok(message) = rx.recv_timeout(Duration::from_millis(50)) {
                received.push(message);
            }
        }

        stop.store(true, Ordering::Relaxed);
        handle.join().expect("join watcher");

        assert_eq!(
            received,
            vec![
                WatchLine {
                    account_id: "gina".to_string(),
                    line: "hello".to_string()
                },
                WatchLine {
                    account_id: "gina".to_string(),
                    line: "world".to_string()
                },
            ]
        );
    }
}
