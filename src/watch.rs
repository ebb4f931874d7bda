//! Directory watching for `syl watch`.
//!
//! File-system events from `notify` are filtered and forwarded into a
//! tokio channel. [`coalesce`] drains that channel: a batch opens with the
//! first event and closes once the quiet period passes with no further
//! events. Every batch triggers exactly one reload.
//!
//! Events for the database file itself (and its `-wal`, `-shm` and
//! `-journal` siblings), for anything under the assets directory, and pure
//! access events are dropped, so a reload never re-triggers itself.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::error::Result;
use crate::loader::{print_report, CourseLoader};
use crate::store::Transactional;

/// Paths whose changes never trigger a reload.
#[derive(Debug, Clone, Default)]
pub struct Ignored {
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

impl Ignored {
    /// The database with its sidecar files, plus the assets directory.
    pub fn for_config(config: &Config) -> Self {
        Self {
            files: ignored_paths(&config.db.path),
            dirs: config.content.assets_dir.iter().map(|a| absolute(a)).collect(),
        }
    }

    pub fn files(files: Vec<PathBuf>) -> Self {
        Self {
            files,
            dirs: Vec::new(),
        }
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dirs.push(dir.into());
        self
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.iter().any(|f| f == path) || self.dirs.iter().any(|d| path.starts_with(d))
    }
}

/// The database file and its `-wal`, `-shm` and `-journal` siblings.
pub fn ignored_paths(db_path: &Path) -> Vec<PathBuf> {
    let db = absolute(db_path);
    let mut paths = vec![db.clone()];
    for suffix in ["-wal", "-shm", "-journal"] {
        let mut name = db.as_os_str().to_os_string();
        name.push(suffix);
        paths.push(PathBuf::from(name));
    }
    paths
}

fn absolute(path: &Path) -> PathBuf {
    if let Ok(p) = path.canonicalize() {
        return p;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => match parent.canonicalize() {
            Ok(parent) => parent.join(name),
            Err(_) => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}

/// Paths of `event` that should trigger a reload.
pub fn relevant_paths(event: &Event, ignored: &Ignored) -> Vec<PathBuf> {
    if matches!(event.kind, EventKind::Access(_)) {
        return Vec::new();
    }
    event
        .paths
        .iter()
        .filter(|p| !ignored.contains(p))
        .cloned()
        .collect()
}

/// Waits for the next batch of changed paths.
///
/// Returns `None` once the channel is closed and drained. Paths are
/// de-duplicated and sorted.
pub async fn coalesce(
    rx: &mut mpsc::UnboundedReceiver<PathBuf>,
    quiet: Duration,
) -> Option<Vec<PathBuf>> {
    let first = rx.recv().await?;
    let mut batch = BTreeSet::new();
    batch.insert(first);

    loop {
        match tokio::time::timeout(quiet, rx.recv()).await {
            Ok(Some(path)) => {
                batch.insert(path);
            }
            Ok(None) | Err(_) => break,
        }
    }
    Some(batch.into_iter().collect())
}

/// Starts a recursive watcher on `dir`. Dropping the watcher stops it.
pub fn watch_dir(
    dir: &Path,
    ignored: Ignored,
    tx: mpsc::UnboundedSender<PathBuf>,
) -> Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            for path in relevant_paths(&event, &ignored) {
                let _ = tx.send(path);
            }
        }
        Err(e) => tracing::warn!(error = %e, "watch error"),
    })?;
    watcher.watch(dir, RecursiveMode::Recursive)?;
    Ok(watcher)
}

/// Loads `dir`, then reloads after every debounced batch of changes until
/// interrupted.
pub async fn run_watch<S: Transactional>(
    loader: &CourseLoader<S>,
    dir: &Path,
    config: &Config,
) -> anyhow::Result<()> {
    match loader.load(dir).await {
        Ok(report) => print_report(&report),
        Err(e) => eprintln!("Error: {}", e),
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    // Event paths are reported under the watched path as given.
    let _watcher = watch_dir(&absolute(dir), Ignored::for_config(config), tx)?;
    let quiet = Duration::from_millis(config.watch.quiet_period_ms);
    println!("watching {} (ctrl-c to stop)", dir.display());

    loop {
        let batch = tokio::select! {
            batch = coalesce(&mut rx, quiet) => batch,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(batch) = batch else { break };

        tracing::info!(changed = batch.len(), "reloading");
        match loader.load(dir).await {
            Ok(report) => print_report(&report),
            Err(e) => eprintln!("Error: {}", e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind};

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut e = Event::new(kind);
        for p in paths {
            e = e.add_path(PathBuf::from(p));
        }
        e
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_becomes_one_batch() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let quiet = Duration::from_millis(500);

        tokio::spawn(async move {
            for name in ["a.md", "b.md", "a.md"] {
                tx.send(PathBuf::from(name)).unwrap();
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
            tx.send(PathBuf::from("c.md")).unwrap();
        });

        let first = coalesce(&mut rx, quiet).await.unwrap();
        assert_eq!(first, vec![PathBuf::from("a.md"), PathBuf::from("b.md")]);

        let second = coalesce(&mut rx, quiet).await.unwrap();
        assert_eq!(second, vec![PathBuf::from("c.md")]);

        assert!(coalesce(&mut rx, quiet).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_steady_trickle_waits_for_quiet() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let quiet = Duration::from_millis(300);

        tokio::spawn(async move {
            for i in 0..10 {
                tx.send(PathBuf::from(format!("{}.md", i))).unwrap();
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        });

        let batch = coalesce(&mut rx, quiet).await.unwrap();
        assert_eq!(batch.len(), 10);
    }

    #[test]
    fn test_relevant_paths_filters_db_and_access() {
        let ignored = Ignored::files(vec![
            PathBuf::from("/x/db.sqlite"),
            PathBuf::from("/x/db.sqlite-wal"),
        ]);

        let modify = event(
            EventKind::Modify(ModifyKind::Any),
            &["/x/db.sqlite-wal", "/x/lessons/a.md"],
        );
        assert_eq!(relevant_paths(&modify, &ignored), vec![PathBuf::from("/x/lessons/a.md")]);

        let access = event(EventKind::Access(AccessKind::Any), &["/x/lessons/a.md"]);
        assert!(relevant_paths(&access, &ignored).is_empty());

        let create = event(EventKind::Create(CreateKind::File), &["/x/db.sqlite"]);
        assert!(relevant_paths(&create, &ignored).is_empty());
    }

    #[test]
    fn test_ignored_paths_cover_sidecars() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db = tmp.path().join("site.sqlite");
        let ignored = ignored_paths(&db);
        let names: Vec<String> = ignored
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            ["site.sqlite", "site.sqlite-wal", "site.sqlite-shm", "site.sqlite-journal"]
        );
    }

    #[test]
    fn test_relevant_paths_skip_assets_dir() {
        let ignored = Ignored::files(vec![PathBuf::from("/x/db.sqlite")]).with_dir("/x/assets");

        let copy = event(
            EventKind::Create(CreateKind::File),
            &["/x/assets/bravo/bravo.png", "/x/assets", "/x/assets-old/a.png"],
        );
        assert_eq!(relevant_paths(&copy, &ignored), vec![PathBuf::from("/x/assets-old/a.png")]);
    }

    #[test]
    fn test_ignored_for_config_covers_assets() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = Config::with_db_path(tmp.path().join("site.sqlite"));
        std::fs::create_dir_all(tmp.path().join("assets")).unwrap();
        config.content.assets_dir = Some(tmp.path().join("assets"));

        let ignored = Ignored::for_config(&config);
        let root = tmp.path().canonicalize().unwrap();
        assert!(ignored.contains(&root.join("assets/bravo/bravo.png")));
        assert!(ignored.contains(&root.join("site.sqlite-shm")));
        assert!(!ignored.contains(&root.join("alpha/course.yml")));
    }
}
