//! Directory watching.
//!
//! Wraps a notify watcher on a single, non-recursive directory and forwards
//! translated [`FileEvent`]s into a bounded channel. The dispatcher is the
//! only consumer.

use crate::dispatcher::{FileEvent, FileEventKind};
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, SyncSender};
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watch folder does not exist: {}", .0.display())]
    MissingRoot(PathBuf),
    #[error("failed to watch {}: {source}", .path.display())]
    Notify {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// A running watcher. Dropping it stops event delivery and closes the
/// channel.
pub struct DirectoryWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl DirectoryWatcher {
    /// Starts watching `root` and returns the watcher with the receiving end
    /// of a channel holding at most `capacity` pending events.
    pub fn start(root: &Path, capacity: usize) -> Result<(Self, Receiver<FileEvent>), WatchError> {
        if !root.is_dir() {
            return Err(WatchError::MissingRoot(root.to_path_buf()));
        }

        let (tx, rx) = mpsc::sync_channel(capacity.max(1));
        let notify_error = |source: notify::Error| WatchError::Notify {
            path: root.to_path_buf(),
            source,
        };

        let mut translator = EventTranslator::default();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => forward(&tx, translator.translate(event)),
            Err(e) => error!("File watcher error: {}", e),
        })
        .map_err(notify_error)?;

        watcher
            .watch(root, RecursiveMode::NonRecursive)
            .map_err(notify_error)?;
        info!("Watching folder: {}", root.display());

        Ok((
            Self {
                _watcher: watcher,
                root: root.to_path_buf(),
            },
            rx,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn forward(tx: &SyncSender<FileEvent>, events: Vec<FileEvent>) {
    for file_event in events {
        // Blocks the notify thread when the queue is full.
        if tx.send(file_event).is_err() {
            debug!("Dispatcher gone; dropping event");
            return;
        }
    }
}

/// Rename sources remembered while waiting for their target half.
const MAX_PENDING_RENAMES: usize = 64;

/// Maps notify events onto the events the dispatcher understands.
///
/// Renames inside the folder arrive as a `From` half, a `To` half and a
/// combined `Both` event, all sharing one tracker. Only the `Both` event is
/// reported. A `To` half whose tracker was never seen as a `From` is a file
/// moved in from elsewhere; it is new to the folder and becomes `Created`.
#[derive(Debug, Default)]
pub struct EventTranslator {
    pending_renames: VecDeque<usize>,
}

impl EventTranslator {
    pub fn translate(&mut self, event: Event) -> Vec<FileEvent> {
        let tracker = event.attrs.tracker();
        match event.kind {
            EventKind::Create(kind) => event
                .paths
                .into_iter()
                .map(|path| FileEvent {
                    is_directory: kind == CreateKind::Folder || path.is_dir(),
                    path,
                    kind: FileEventKind::Created,
                })
                .collect(),
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                if let Some(tracker) = tracker {
                    self.remember_rename(tracker);
                }
                Vec::new()
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                if let Some(tracker) = tracker {
                    self.forget_rename(tracker);
                }
                let mut paths = event.paths.into_iter();
                match (paths.next(), paths.next()) {
                    (Some(from), Some(to)) => vec![FileEvent {
                        is_directory: to.is_dir(),
                        path: to,
                        kind: FileEventKind::Renamed { from },
                    }],
                    _ => Vec::new(),
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                if tracker.is_some_and(|t| self.pending_renames.contains(&t)) {
                    return Vec::new();
                }
                event
                    .paths
                    .into_iter()
                    .map(|path| FileEvent {
                        is_directory: path.is_dir(),
                        path,
                        kind: FileEventKind::Created,
                    })
                    .collect()
            }
            EventKind::Modify(ModifyKind::Name(_)) => Vec::new(),
            EventKind::Modify(_) => event
                .paths
                .into_iter()
                .map(|path| FileEvent {
                    is_directory: path.is_dir(),
                    path,
                    kind: FileEventKind::Modified,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    fn remember_rename(&mut self, tracker: usize) {
        if self.pending_renames.len() == MAX_PENDING_RENAMES {
            self.pending_renames.pop_front();
        }
        self.pending_renames.push_back(tracker);
    }

    fn forget_rename(&mut self, tracker: usize) {
        self.pending_renames.retain(|t| *t != tracker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{DataChange, RemoveKind};
    use std::fs;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn event(kind: EventKind, paths: &[&Path]) -> Event {
        let mut event = Event::new(kind);
        for path in paths {
            event = event.add_path(path.to_path_buf());
        }
        event
    }

    fn rename_event(mode: RenameMode, paths: &[&Path], tracker: usize) -> Event {
        event(EventKind::Modify(ModifyKind::Name(mode)), paths).set_tracker(tracker)
    }

    fn translate(event: Event) -> Vec<FileEvent> {
        EventTranslator::default().translate(event)
    }

    /// Collects events until `quiet` passes without a new one.
    fn drain(rx: &Receiver<FileEvent>, quiet: Duration) -> Vec<FileEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.recv_timeout(quiet) {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_translate_create() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("a.png");
        fs::write(&file, "x").unwrap();

        let events = translate(event(EventKind::Create(CreateKind::File), &[file.as_path()]));
        assert_eq!(events, vec![FileEvent::created(&file)]);
    }

    #[test]
    fn test_translate_create_folder() {
        let temp_dir = TempDir::new().unwrap();
        let events = translate(event(
            EventKind::Create(CreateKind::Folder),
            &[temp_dir.path()],
        ));
        assert_eq!(events.len(), 1);
        assert!(events[0].is_directory);
    }

    #[test]
    fn test_rename_within_folder_reports_only_rename() {
        let from = Path::new("/w/movie.mp4.crdownload");
        let to = Path::new("/w/movie.mp4");
        let mut translator = EventTranslator::default();

        let mut events = translator.translate(rename_event(RenameMode::From, &[from], 7));
        events.extend(translator.translate(rename_event(RenameMode::To, &[to], 7)));
        events.extend(translator.translate(rename_event(RenameMode::Both, &[from, to], 7)));

        assert_eq!(
            events,
            vec![FileEvent {
                path: to.to_path_buf(),
                is_directory: false,
                kind: FileEventKind::Renamed {
                    from: from.to_path_buf()
                },
            }]
        );
        assert!(translator.pending_renames.is_empty());
    }

    #[test]
    fn test_moved_in_from_outside_counts_as_created() {
        let to = Path::new("/w/arrived.zip");
        let mut translator = EventTranslator::default();

        let with_unknown_tracker = translator.translate(rename_event(RenameMode::To, &[to], 42));
        let without_tracker = translator.translate(event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            &[to],
        ));

        assert_eq!(with_unknown_tracker, vec![FileEvent::created(to)]);
        assert_eq!(without_tracker, vec![FileEvent::created(to)]);
    }

    #[test]
    fn test_pending_renames_are_bounded() {
        let mut translator = EventTranslator::default();
        let path = Path::new("/w/gone.txt");
        for tracker in 0..(MAX_PENDING_RENAMES + 10) {
            translator.translate(rename_event(RenameMode::From, &[path], tracker));
        }
        assert_eq!(translator.pending_renames.len(), MAX_PENDING_RENAMES);
        assert!(!translator.pending_renames.contains(&0));
    }

    #[test]
    fn test_translate_ignores_removals_and_moves_out() {
        let path = Path::new("/w/x.txt");
        assert!(translate(event(EventKind::Remove(RemoveKind::File), &[path])).is_empty());
        assert!(
            translate(event(
                EventKind::Modify(ModifyKind::Name(RenameMode::From)),
                &[path]
            ))
            .is_empty()
        );
    }

    #[test]
    fn test_translate_modify() {
        let path = Path::new("/w/x.txt");
        let events = translate(event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &[path],
        ));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, FileEventKind::Modified);
    }

    #[test]
    fn test_start_rejects_missing_root() {
        let result = DirectoryWatcher::start(Path::new("/non/existent/watch/root"), 4);
        assert!(matches!(result, Err(WatchError::MissingRoot(_))));
    }

    #[test]
    fn test_watcher_reports_new_file() {
        let temp_dir = TempDir::new().unwrap();
        let (watcher, rx) = DirectoryWatcher::start(temp_dir.path(), 16).unwrap();
        assert_eq!(watcher.root(), temp_dir.path());

        let file = temp_dir.path().join("fresh.txt");
        fs::write(&file, "hello").unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        let mut seen_create = false;
        while Instant::now() < deadline {
            match rx.recv_timeout(Duration::from_millis(200)) {
                Ok(event) if event.kind == FileEventKind::Created => {
                    assert_eq!(event.path.file_name(), file.file_name());
                    seen_create = true;
                    break;
                }
                _ => continue,
            }
        }
        assert!(seen_create, "no creation event observed");
    }

    #[test]
    fn test_watcher_rename_inside_folder_is_not_a_creation() {
        let temp_dir = TempDir::new().unwrap();
        let partial = temp_dir.path().join("movie.mp4.crdownload");
        let finished = temp_dir.path().join("movie.mp4");
        fs::write(&partial, "data").unwrap();

        let (_watcher, rx) = DirectoryWatcher::start(temp_dir.path(), 16).unwrap();
        fs::rename(&partial, &finished).unwrap();

        let events = drain(&rx, Duration::from_secs(1));
        assert!(
            events.iter().all(|e| e.kind != FileEventKind::Created),
            "rename reported as creation: {:?}",
            events
        );
    }
}
