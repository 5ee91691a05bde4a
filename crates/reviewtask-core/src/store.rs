//! File-backed task storage.
//!
//! Each pull request has its own task set:
//!
//! ```text
//! .pr-review/{owner}/{repo}/PR-{number}/tasks.json
//! .pr-review/{owner}/{repo}/PR-{number}/tasks.lock
//! ```
//!
//! Writers hold an exclusive `fs2` lock on `tasks.lock` for the whole
//! read-modify-write, and replace `tasks.json` by renaming a temp file from
//! the same directory over it. Readers take a shared lock. A failed write
//! leaves the previous `tasks.json` in place.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use tempfile::NamedTempFile;

use crate::config::{data_dir, is_initialized};
use crate::errors::{CoreError, CoreResult};
use crate::ids::{task_id_for_scheme, ID_SCHEME_VERSION};
use crate::model::{PullRequestRef, RepoSlug, Task, TaskSet, TaskStatus, TASK_SET_VERSION};

const TASKS_FILE: &str = "tasks.json";
const LOCK_FILE: &str = "tasks.lock";
const PR_DIR_PREFIX: &str = "PR-";

/// Task sets for every pull request of a repository checkout.
#[derive(Debug, Clone)]
pub struct TaskStore {
    root: PathBuf,
}

impl TaskStore {
    /// Store rooted at an existing data directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store for the repository at `repo_root`.
    ///
    /// Fails with `NotInitialized` when `reviewtask init` has not been run.
    pub fn open(repo_root: &Path) -> CoreResult<Self> {
        if !is_initialized(repo_root) {
            return Err(CoreError::NotInitialized {
                path: repo_root.display().to_string(),
            });
        }
        Ok(Self::new(data_dir(repo_root)))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn repo_dir(&self, slug: &RepoSlug) -> CoreResult<PathBuf> {
        validate_segment(&slug.owner)?;
        validate_segment(&slug.repo)?;
        Ok(self.root.join(&slug.owner).join(&slug.repo))
    }

    fn pr_dir(&self, pr: &PullRequestRef) -> CoreResult<PathBuf> {
        Ok(self
            .repo_dir(&pr.slug())?
            .join(format!("{PR_DIR_PREFIX}{}", pr.number)))
    }

    /// Path of the task set file for `pr`.
    pub fn tasks_path(&self, pr: &PullRequestRef) -> CoreResult<PathBuf> {
        Ok(self.pr_dir(pr)?.join(TASKS_FILE))
    }

    /// Read the task set for `pr`, or `None` if nothing was stored yet.
    pub fn load(&self, pr: &PullRequestRef) -> CoreResult<Option<TaskSet>> {
        let dir = self.pr_dir(pr)?;
        let path = dir.join(TASKS_FILE);
        if !path.exists() {
            return Ok(None);
        }

        // Readers never create the lock file; without one no writer has run.
        let lock = open_existing_lock(&dir)?;
        if let Some(lock) = &lock {
            FileExt::lock_shared(lock)
                .map_err(|e| CoreError::persistence(&dir.join(LOCK_FILE), e))?;
        }
        read_set(&path, pr)
    }

    /// Run a read-modify-write on the task set for `pr`.
    ///
    /// `apply` receives the current set (migrated to the current id scheme)
    /// and returns the set to store plus a value handed back to the caller.
    /// If `apply` or the write fails, the stored set is unchanged.
    #[tracing::instrument(level = "debug", skip(self, pr, apply), fields(pr = %pr))]
    pub fn transaction<R>(
        &self,
        pr: &PullRequestRef,
        apply: impl FnOnce(Option<TaskSet>) -> CoreResult<(TaskSet, R)>,
    ) -> CoreResult<R> {
        let dir = self.pr_dir(pr)?;
        fs::create_dir_all(&dir).map_err(|e| CoreError::persistence(&dir, e))?;

        let lock = open_lock(&dir)?;
        FileExt::lock_exclusive(&lock)
            .map_err(|e| CoreError::persistence(&dir.join(LOCK_FILE), e))?;

        let path = dir.join(TASKS_FILE);
        let prior = read_set(&path, pr)?;
        let (next, value) = apply(prior)?;
        check_ids_unique(&next, &path)?;
        write_atomic(&dir, &path, &next)?;

        tracing::debug!(path = %path.display(), tasks = next.tasks.len(), "task set written");
        Ok(value)
    }

    /// Apply a user edit to one task.
    ///
    /// An empty `notes` string clears the notes. `updated_at` moves only if
    /// something changed.
    pub fn update_task(
        &self,
        pr: &PullRequestRef,
        task_id: &str,
        status: Option<TaskStatus>,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> CoreResult<Task> {
        self.transaction(pr, |prior| {
            let not_found = || CoreError::TaskNotFound {
                task_id: task_id.to_string(),
            };
            let mut set = prior.ok_or_else(not_found)?;
            let task = set.get_mut(task_id).ok_or_else(not_found)?;

            let mut changed = false;
            if let Some(status) = status.filter(|s| *s != task.status) {
                task.status = status;
                changed = true;
            }
            if let Some(notes) = notes {
                let notes = Some(notes).filter(|n| !n.trim().is_empty());
                if notes != task.user_notes {
                    task.user_notes = notes;
                    changed = true;
                }
            }
            if changed {
                task.updated_at = now;
            }

            let task = task.clone();
            Ok((set, task))
        })
    }

    /// Pull request numbers with a stored task set, ascending.
    pub fn list_pr_numbers(&self, slug: &RepoSlug) -> CoreResult<Vec<u64>> {
        let dir = self.repo_dir(slug)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CoreError::persistence(&dir, e)),
        };

        let mut numbers = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CoreError::persistence(&dir, e))?;
            let name = entry.file_name();
            let Some(number) = name
                .to_str()
                .and_then(|n| n.strip_prefix(PR_DIR_PREFIX))
                .and_then(|n| n.parse::<u64>().ok())
            else {
                continue;
            };
            if entry.path().join(TASKS_FILE).is_file() {
                numbers.push(number);
            }
        }
        numbers.sort_unstable();
        Ok(numbers)
    }

    /// Find which pull request holds `task_id`.
    pub fn find_task_pr(&self, slug: &RepoSlug, task_id: &str) -> CoreResult<Option<PullRequestRef>> {
        for number in self.list_pr_numbers(slug)? {
            let pr = slug.pull_request(number);
            if self.load(&pr)?.is_some_and(|set| set.get(task_id).is_some()) {
                return Ok(Some(pr));
            }
        }
        Ok(None)
    }
}

/// Reject path segments that could escape the data directory.
///
/// Dot-prefixed names such as `.github` are valid repositories; only `.`
/// and `..` are refused.
fn validate_segment(segment: &str) -> CoreResult<()> {
    let valid = !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(CoreError::Persistence {
            path: segment.to_string(),
            detail: "repository owner/name is not usable as a path segment".to_string(),
        })
    }
}

fn open_lock(dir: &Path) -> CoreResult<File> {
    let path = dir.join(LOCK_FILE);
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .map_err(|e| CoreError::persistence(&path, e))
}

fn open_existing_lock(dir: &Path) -> CoreResult<Option<File>> {
    let path = dir.join(LOCK_FILE);
    match OpenOptions::new().read(true).write(true).open(&path) {
        Ok(file) => Ok(Some(file)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CoreError::persistence(&path, e)),
    }
}

/// Read, validate, and migrate a stored set. Caller holds the lock.
fn read_set(path: &Path, pr: &PullRequestRef) -> CoreResult<Option<TaskSet>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CoreError::persistence(path, e)),
    };

    let mut set: TaskSet =
        serde_json::from_str(&raw).map_err(|e| CoreError::persistence(path, e))?;

    if set.version > TASK_SET_VERSION {
        return Err(CoreError::persistence(
            path,
            format!(
                "task set version {} is newer than this build supports ({TASK_SET_VERSION})",
                set.version
            ),
        ));
    }
    if set.pr != *pr {
        return Err(CoreError::persistence(
            path,
            format!("file holds tasks for {}, expected {pr}", set.pr),
        ));
    }

    migrate_ids(&mut set, path)?;
    check_ids_unique(&set, path)?;
    Ok(Some(set))
}

/// Recompute ids written with an older id scheme.
fn migrate_ids(set: &mut TaskSet, path: &Path) -> CoreResult<()> {
    if set.id_scheme == ID_SCHEME_VERSION {
        return Ok(());
    }
    if set.id_scheme > ID_SCHEME_VERSION {
        return Err(CoreError::persistence(
            path,
            format!(
                "task ids use scheme v{}, newer than this build supports (v{ID_SCHEME_VERSION})",
                set.id_scheme
            ),
        ));
    }

    tracing::info!(
        path = %path.display(),
        from = set.id_scheme,
        to = ID_SCHEME_VERSION,
        "migrating task ids"
    );
    for task in &mut set.tasks {
        let id = task_id_for_scheme(ID_SCHEME_VERSION, &task.source_comment_ids, task.item)
            .ok_or_else(|| CoreError::persistence(path, "no derivation for current id scheme"))?;
        task.id = id;
    }
    set.id_scheme = ID_SCHEME_VERSION;
    Ok(())
}

fn check_ids_unique(set: &TaskSet, path: &Path) -> CoreResult<()> {
    let mut seen = HashSet::with_capacity(set.tasks.len());
    match set.tasks.iter().find(|t| !seen.insert(t.id.as_str())) {
        Some(dup) => Err(CoreError::persistence(
            path,
            format!("duplicate task id {}", dup.id),
        )),
        None => Ok(()),
    }
}

fn write_atomic(dir: &Path, path: &Path, set: &TaskSet) -> CoreResult<()> {
    let tmp = NamedTempFile::new_in(dir).map_err(|e| CoreError::persistence(dir, e))?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        serde_json::to_writer_pretty(&mut writer, set)
            .map_err(|e| CoreError::persistence(path, e))?;
        writer
            .write_all(b"\n")
            .and_then(|()| writer.flush())
            .map_err(|e| CoreError::persistence(path, e))?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|e| CoreError::persistence(path, e))?;
    tmp.persist(path)
        .map_err(|e| CoreError::persistence(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::task_id;
    use chrono::TimeZone;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn pr() -> PullRequestRef {
        RepoSlug::parse("octo/widgets").unwrap().pull_request(7)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn task(anchor: &str) -> Task {
        Task {
            id: task_id([anchor], 0),
            source_pr: pr(),
            source_comment_ids: [anchor.to_string()].into_iter().collect(),
            item: 0,
            description: format!("address {anchor}"),
            path: None,
            line: None,
            author: "reviewer".to_string(),
            status: TaskStatus::Pending,
            created_at: now(),
            updated_at: now(),
            user_notes: None,
        }
    }

    fn setup() -> (TempDir, TaskStore) {
        let temp = TempDir::new().unwrap();
        let store = TaskStore::new(temp.path().join(".pr-review"));
        (temp, store)
    }

    fn save(store: &TaskStore, tasks: Vec<Task>) {
        store
            .transaction(&pr(), |_| {
                let mut set = TaskSet::new(pr());
                set.tasks = tasks;
                Ok((set, ()))
            })
            .unwrap();
    }

    #[test]
    fn test_layout() {
        let (temp, store) = setup();
        save(&store, vec![task("c1")]);
        let path = temp.path().join(".pr-review/octo/widgets/PR-7/tasks.json");
        assert!(path.is_file());
        assert_eq!(store.tasks_path(&pr()).unwrap(), path);
    }

    #[test]
    fn test_load_missing_is_none() {
        let (_temp, store) = setup();
        assert!(store.load(&pr()).unwrap().is_none());
    }

    #[test]
    fn test_transaction_round_trip() {
        let (_temp, store) = setup();
        save(&store, vec![task("c1"), task("c2")]);

        let loaded = store.load(&pr()).unwrap().unwrap();
        assert_eq!(loaded.tasks.len(), 2);
        assert_eq!(loaded.tasks[0].id, task_id(["c1"], 0));
        assert_eq!(loaded.pr, pr());
    }

    #[test]
    fn test_failed_transaction_leaves_file_intact() {
        let (_temp, store) = setup();
        save(&store, vec![task("c1")]);
        let before = fs::read_to_string(store.tasks_path(&pr()).unwrap()).unwrap();

        let result: CoreResult<()> = store.transaction(&pr(), |_| {
            Err(CoreError::unavailable("connection reset"))
        });
        assert!(result.is_err());

        let after = fs::read_to_string(store.tasks_path(&pr()).unwrap()).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_duplicate_ids_rejected_on_write() {
        let (_temp, store) = setup();
        let result = store.transaction(&pr(), |_| {
            let mut set = TaskSet::new(pr());
            set.tasks = vec![task("c1"), task("c1")];
            Ok((set, ()))
        });
        assert!(matches!(result, Err(CoreError::Persistence { .. })));
        assert!(store.load(&pr()).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_file_is_persistence_error() {
        let (_temp, store) = setup();
        save(&store, vec![task("c1")]);
        fs::write(store.tasks_path(&pr()).unwrap(), "{ nope").unwrap();

        assert!(matches!(store.load(&pr()), Err(CoreError::Persistence { .. })));
    }

    #[test]
    fn test_old_id_scheme_is_migrated() {
        let (_temp, store) = setup();
        let mut stale = task("c1");
        stale.id = "legacy-1".to_string();
        let mut set = TaskSet::new(pr());
        set.id_scheme = 0;
        set.tasks = vec![stale];

        let path = store.tasks_path(&pr()).unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, serde_json::to_string(&set).unwrap()).unwrap();

        let loaded = store.load(&pr()).unwrap().unwrap();
        assert_eq!(loaded.id_scheme, ID_SCHEME_VERSION);
        assert_eq!(loaded.tasks[0].id, task_id(["c1"], 0));
    }

    #[test]
    fn test_newer_version_is_rejected() {
        let (_temp, store) = setup();
        let mut set = TaskSet::new(pr());
        set.version = TASK_SET_VERSION + 1;
        let path = store.tasks_path(&pr()).unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, serde_json::to_string(&set).unwrap()).unwrap();

        assert!(matches!(store.load(&pr()), Err(CoreError::Persistence { .. })));
    }

    #[test]
    fn test_update_task() {
        let (_temp, store) = setup();
        save(&store, vec![task("c1")]);
        let id = task_id(["c1"], 0);
        let later = now() + chrono::Duration::minutes(5);

        let updated = store
            .update_task(&pr(), &id, Some(TaskStatus::InProgress), Some("on it".to_string()), later)
            .unwrap();
        assert_eq!(updated.status, TaskStatus::InProgress);
        assert_eq!(updated.user_notes.as_deref(), Some("on it"));
        assert_eq!(updated.updated_at, later);

        let cleared = store
            .update_task(&pr(), &id, None, Some(String::new()), later)
            .unwrap();
        assert!(cleared.user_notes.is_none());

        let loaded = store.load(&pr()).unwrap().unwrap();
        assert_eq!(loaded.tasks[0].status, TaskStatus::InProgress);
    }

    #[test]
    fn test_update_unknown_task() {
        let (_temp, store) = setup();
        save(&store, vec![task("c1")]);
        let err = store
            .update_task(&pr(), "t1-0000000000000000", Some(TaskStatus::Done), None, now())
            .unwrap_err();
        assert!(matches!(err, CoreError::TaskNotFound { .. }));
    }

    #[test]
    fn test_list_and_find() {
        let (_temp, store) = setup();
        save(&store, vec![task("c1")]);
        let other = RepoSlug::parse("octo/widgets").unwrap().pull_request(12);
        store
            .transaction(&other, |_| {
                let mut set = TaskSet::new(other.clone());
                let mut t = task("c9");
                t.source_pr = other.clone();
                set.tasks = vec![t];
                Ok((set, ()))
            })
            .unwrap();

        let slug = pr().slug();
        assert_eq!(store.list_pr_numbers(&slug).unwrap(), vec![7, 12]);
        assert_eq!(
            store.find_task_pr(&slug, &task_id(["c9"], 0)).unwrap(),
            Some(other)
        );
        assert_eq!(store.find_task_pr(&slug, "t1-ffffffffffffffff").unwrap(), None);
    }

    #[test]
    fn test_path_traversal_rejected() {
        let (_temp, store) = setup();
        let evil = PullRequestRef {
            owner: "..".to_string(),
            repo: "etc".to_string(),
            number: 1,
        };
        assert!(store.tasks_path(&evil).is_err());
        assert!(validate_segment("octo").is_ok());
        assert!(validate_segment("my.repo_name-2").is_ok());
        assert!(validate_segment("a/b").is_err());
        assert!(validate_segment("").is_err());
        assert!(validate_segment(".").is_err());
    }

    #[test]
    fn test_dot_prefixed_repo_is_stored() {
        let (temp, store) = setup();
        let dotgithub = RepoSlug::parse("octo/.github").unwrap().pull_request(3);
        store
            .transaction(&dotgithub, |_| Ok((TaskSet::new(dotgithub.clone()), ())))
            .unwrap();

        assert!(temp.path().join(".pr-review/octo/.github/PR-3/tasks.json").is_file());
        assert!(store.load(&dotgithub).unwrap().is_some());
        let slug = RepoSlug::parse("octo/.github").unwrap();
        assert_eq!(store.list_pr_numbers(&slug).unwrap(), vec![3]);
    }

    #[test]
    fn test_load_does_not_create_lock_file() {
        let (_temp, store) = setup();
        save(&store, vec![task("c1")]);
        let dir = store.tasks_path(&pr()).unwrap().parent().unwrap().to_path_buf();
        fs::remove_file(dir.join(LOCK_FILE)).unwrap();

        let loaded = store.load(&pr()).unwrap().unwrap();
        assert_eq!(loaded.tasks.len(), 1);
        assert!(!dir.join(LOCK_FILE).exists());
    }

    #[test]
    fn test_open_requires_init() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            TaskStore::open(temp.path()),
            Err(CoreError::NotInitialized { .. })
        ));
        crate::config::init_repo(temp.path()).unwrap();
        assert!(TaskStore::open(temp.path()).is_ok());
    }

    #[test]
    fn test_concurrent_transactions_serialize() {
        let (_temp, store) = setup();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store
                        .transaction(&pr(), |prior| {
                            let mut set = prior.unwrap_or_else(|| TaskSet::new(pr()));
                            set.tasks.push(task(&format!("c{i}")));
                            Ok((set, ()))
                        })
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let loaded = store.load(&pr()).unwrap().unwrap();
        assert_eq!(loaded.tasks.len(), 8);
    }
}
