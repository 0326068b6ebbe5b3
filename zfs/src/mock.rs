//! An in-memory management layer for tests.
//!
//! Dataset mountpoints are real directories, so code under test can read and
//! write them. Snapshot content is copied aside into a store directory when the
//! snapshot is taken and copied back out when it is cloned.

use crate::backend::{Zfs, ZfsError};
use crate::{path, DatasetKind};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const EZFS_BUSY: i32 = 2007;
const EZFS_EXISTS: i32 = 2008;
const EZFS_NOENT: i32 = 2009;
const EZFS_BADTYPE: i32 = 2006;
const EZFS_IO: i32 = 2021;

/// Operations a failure can be injected into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MockOp {
    Open,
    Mountpoint,
    Kind,
    Create,
    Destroy,
    Snapshot,
    Clone,
    IterRoot,
    IterChildren,
}

/// A handle into `MockZfs`.
#[derive(Debug)]
pub struct MockHandle {
    name: String,
}

#[derive(Debug)]
struct Entry {
    kind: DatasetKind,
    mountpoint: Option<String>,
    /// Where a snapshot keeps its content.
    content: Option<PathBuf>,
}

#[derive(Default)]
struct State {
    datasets: BTreeMap<String, Entry>,
    failures: Vec<MockOp>,
    mount_overrides: HashMap<String, String>,
    calls: Vec<String>,
    opened: usize,
    closed: usize,
}

impl State {
    fn check(&mut self, op: MockOp, action: &str) -> Result<(), ZfsError> {
        match self.failures.iter().position(|failure| *failure == op) {
            Some(index) => {
                self.failures.remove(index);
                Err(ZfsError::new(EZFS_BUSY, action, "injected failure"))
            }
            None => Ok(()),
        }
    }

    fn handle(&mut self, name: &str) -> MockHandle {
        self.opened += 1;
        MockHandle {
            name: name.to_string(),
        }
    }

    fn entry(&self, name: &str, action: &str) -> Result<&Entry, ZfsError> {
        self.datasets
            .get(name)
            .ok_or_else(|| ZfsError::new(EZFS_NOENT, action, "dataset does not exist"))
    }

    /// Mountpoint for a new dataset below `parent`.
    fn child_mountpoint(&mut self, name: &str, action: &str) -> Result<Option<String>, ZfsError> {
        if self.datasets.contains_key(name) {
            return Err(ZfsError::new(EZFS_EXISTS, action, "dataset already exists"));
        }

        let (parent, leaf) = name
            .rsplit_once('/')
            .ok_or_else(|| ZfsError::new(EZFS_NOENT, action, "missing dataset parent"))?;
        let parent = match self.datasets.get(parent) {
            Some(parent) if !matches!(parent.kind, DatasetKind::Snapshot { .. }) => parent,
            _ => return Err(ZfsError::new(EZFS_NOENT, action, "parent does not exist")),
        };

        let mountpoint = match self.mount_overrides.remove(name) {
            Some(mountpoint) => Some(mountpoint),
            None => parent
                .mountpoint
                .as_ref()
                .map(|mountpoint| path::join(mountpoint, leaf)),
        };

        if let Some(mountpoint) = &mountpoint {
            let mountpoint = Path::new(mountpoint);
            if mountpoint.exists() {
                let empty = mountpoint.is_dir()
                    && fs::read_dir(mountpoint).map_or(false, |mut dir| dir.next().is_none());
                if !empty {
                    return Err(ZfsError::new(
                        EZFS_BUSY,
                        action,
                        "mountpoint or dataset is busy, directory is not empty",
                    ));
                }
            }
            fs::create_dir_all(mountpoint).map_err(|e| io_error(action, e))?;
        }

        Ok(mountpoint)
    }

    fn descendants(&self, name: &str) -> Vec<String> {
        let prefix = format!("{}/", name);
        self.datasets
            .iter()
            .filter(|(other, entry)| {
                other.starts_with(&prefix) && !matches!(entry.kind, DatasetKind::Snapshot { .. })
            })
            .map(|(other, _)| other.clone())
            .collect()
    }

    fn take_snapshot(&mut self, store: &Path, name: &str, action: &str) -> Result<(), ZfsError> {
        let (dataset, tag) = name
            .split_once('@')
            .ok_or_else(|| ZfsError::new(EZFS_BADTYPE, action, "not a snapshot name"))?;
        if self.datasets.contains_key(name) {
            return Err(ZfsError::new(EZFS_EXISTS, action, "dataset already exists"));
        }

        let source = self.entry(dataset, action)?.mountpoint.clone();
        let content = store.join(name.replace('/', "_"));
        fs::create_dir_all(&content).map_err(|e| io_error(action, e))?;
        if let Some(source) = source {
            copy_tree(Path::new(&source), &content).map_err(|e| io_error(action, e))?;
        }

        self.datasets.insert(
            name.to_string(),
            Entry {
                kind: DatasetKind::Snapshot {
                    origin: dataset.to_string(),
                    tag: tag.to_string(),
                },
                mountpoint: None,
                content: Some(content),
            },
        );
        Ok(())
    }
}

/// `MockZfs` is an in-memory `Zfs` with failure injection.
pub struct MockZfs {
    store: PathBuf,
    state: RefCell<State>,
}

impl MockZfs {
    /// Create an empty mock keeping snapshot content below `store`.
    pub fn new(store: impl Into<PathBuf>) -> Self {
        MockZfs {
            store: store.into(),
            state: RefCell::new(State::default()),
        }
    }

    /// Add a root dataset mounted at `mountpoint`, creating the directory.
    pub fn add_pool(&self, name: &str, mountpoint: impl AsRef<Path>) {
        let mountpoint = mountpoint.as_ref();
        fs::create_dir_all(mountpoint).expect("failed to create pool mountpoint");
        self.state.borrow_mut().datasets.insert(
            name.to_string(),
            Entry {
                kind: DatasetKind::Filesystem,
                mountpoint: Some(mountpoint.to_string_lossy().into_owned()),
                content: None,
            },
        );
    }

    /// Make the next call of `op` fail.
    pub fn fail(&self, op: MockOp) {
        self.state.borrow_mut().failures.push(op);
    }

    /// Mount the dataset `name` at `mountpoint` when it gets created.
    pub fn mount_at(&self, name: &str, mountpoint: impl AsRef<Path>) {
        self.state.borrow_mut().mount_overrides.insert(
            name.to_string(),
            mountpoint.as_ref().to_string_lossy().into_owned(),
        );
    }

    pub fn exists(&self, name: &str) -> bool {
        self.state.borrow().datasets.contains_key(name)
    }

    /// Names of every dataset and snapshot, sorted.
    pub fn names(&self) -> Vec<String> {
        self.state.borrow().datasets.keys().cloned().collect()
    }

    /// Every mutating call made so far, as `<op> <arguments>`.
    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    /// Number of recorded calls of `op`.
    pub fn count(&self, op: &str) -> usize {
        let prefix = format!("{} ", op);
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|call| call.starts_with(&prefix))
            .count()
    }

    /// Handles handed out and not yet closed.
    pub fn open_handles(&self) -> usize {
        let state = self.state.borrow();
        state.opened - state.closed
    }
}

impl Zfs for MockZfs {
    type Handle = MockHandle;

    fn open(&self, name: &str) -> Result<MockHandle, ZfsError> {
        let action = format!("cannot open '{}'", name);
        let mut state = self.state.borrow_mut();
        state.calls.push(format!("open {}", name));
        state.check(MockOp::Open, &action)?;
        state.entry(name, &action)?;
        Ok(state.handle(name))
    }

    fn close(&self, _handle: &MockHandle) {
        self.state.borrow_mut().closed += 1;
    }

    fn name(&self, handle: &MockHandle) -> String {
        handle.name.clone()
    }

    fn mountpoint(&self, handle: &MockHandle) -> Result<Option<String>, ZfsError> {
        let action = format!("cannot get mountpoint of '{}'", handle.name);
        let mut state = self.state.borrow_mut();
        state.check(MockOp::Mountpoint, &action)?;
        Ok(state.entry(&handle.name, &action)?.mountpoint.clone())
    }

    fn kind(&self, handle: &MockHandle) -> Result<DatasetKind, ZfsError> {
        let action = format!("cannot get type of '{}'", handle.name);
        let mut state = self.state.borrow_mut();
        state.check(MockOp::Kind, &action)?;
        Ok(state.entry(&handle.name, &action)?.kind.clone())
    }

    fn create(&self, name: &str) -> Result<(), ZfsError> {
        let action = format!("cannot create '{}'", name);
        let mut state = self.state.borrow_mut();
        state.calls.push(format!("create {}", name));
        state.check(MockOp::Create, &action)?;
        if name.contains('@') {
            return Err(ZfsError::new(EZFS_BADTYPE, action, "invalid dataset name"));
        }

        let mountpoint = state.child_mountpoint(name, &action)?;
        state.datasets.insert(
            name.to_string(),
            Entry {
                kind: DatasetKind::Filesystem,
                mountpoint,
                content: None,
            },
        );
        Ok(())
    }

    fn destroy(&self, handle: &MockHandle) -> Result<(), ZfsError> {
        let name = &handle.name;
        let action = format!("cannot destroy '{}'", name);
        let mut state = self.state.borrow_mut();
        state.calls.push(format!("destroy {}", name));
        state.check(MockOp::Destroy, &action)?;
        state.entry(name, &action)?;

        let child = format!("{}/", name);
        let snapshot = format!("{}@", name);
        if state
            .datasets
            .keys()
            .any(|other| other.starts_with(&child) || other.starts_with(&snapshot))
        {
            return Err(ZfsError::new(EZFS_BUSY, action, "filesystem has children"));
        }

        if let Some(entry) = state.datasets.remove(name) {
            // unmounting takes the dataset content with it
            for dir in entry.mountpoint.iter().map(PathBuf::from).chain(entry.content) {
                let _ = fs::remove_dir_all(dir);
            }
        }
        Ok(())
    }

    fn snapshot(&self, name: &str, recursive: bool) -> Result<(), ZfsError> {
        let action = format!("cannot create snapshot '{}'", name);
        let mut state = self.state.borrow_mut();
        state.calls.push(format!("snapshot {}", name));
        state.check(MockOp::Snapshot, &action)?;
        state.take_snapshot(&self.store, name, &action)?;

        if recursive {
            if let Some((dataset, tag)) = name.split_once('@') {
                for descendant in state.descendants(dataset) {
                    let child = format!("{}@{}", descendant, tag);
                    state.take_snapshot(&self.store, &child, &action)?;
                }
            }
        }
        Ok(())
    }

    fn clone_snapshot(&self, snapshot: &MockHandle, target: &str) -> Result<(), ZfsError> {
        let action = format!("cannot create '{}'", target);
        let mut state = self.state.borrow_mut();
        state
            .calls
            .push(format!("clone {} {}", snapshot.name, target));
        state.check(MockOp::Clone, &action)?;

        let content = match state.entry(&snapshot.name, &action)? {
            Entry {
                kind: DatasetKind::Snapshot { .. },
                content: Some(content),
                ..
            } => content.clone(),
            _ => {
                return Err(ZfsError::new(
                    EZFS_BADTYPE,
                    action,
                    "operation only applies to snapshots",
                ))
            }
        };

        let mountpoint = state.child_mountpoint(target, &action)?;
        if let Some(mountpoint) = &mountpoint {
            copy_tree(&content, Path::new(mountpoint)).map_err(|e| io_error(&action, e))?;
        }

        state.datasets.insert(
            target.to_string(),
            Entry {
                kind: DatasetKind::Clone {
                    origin: snapshot.name.clone(),
                },
                mountpoint,
                content: None,
            },
        );
        Ok(())
    }

    fn iter_root(&self) -> Result<Vec<MockHandle>, ZfsError> {
        let mut state = self.state.borrow_mut();
        state.check(MockOp::IterRoot, "cannot iterate filesystems")?;

        let roots: Vec<String> = state
            .datasets
            .keys()
            .filter(|name| !name.contains('/') && !name.contains('@'))
            .cloned()
            .collect();
        Ok(roots.iter().map(|name| state.handle(name)).collect())
    }

    fn iter_children(&self, handle: &MockHandle) -> Result<Vec<MockHandle>, ZfsError> {
        let action = format!("cannot iterate children of '{}'", handle.name);
        let mut state = self.state.borrow_mut();
        state.check(MockOp::IterChildren, &action)?;

        let child = format!("{}/", handle.name);
        let snapshot = format!("{}@", handle.name);
        let children: Vec<String> = state
            .datasets
            .keys()
            .filter(|name| match name.strip_prefix(&child) {
                Some(rest) => !rest.contains('/') && !rest.contains('@'),
                None => name.starts_with(&snapshot),
            })
            .cloned()
            .collect();
        Ok(children.iter().map(|name| state.handle(name)).collect())
    }
}

fn io_error(action: &str, e: io::Error) -> ZfsError {
    ZfsError::new(EZFS_IO, action, e.to_string())
}

fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_recursive_snapshot_includes_descendants() {
        let tmp = TempDir::new("pgcow-mock").unwrap();
        let zfs = MockZfs::new(tmp.path().join("store"));
        zfs.add_pool("tank", tmp.path().join("tank"));
        zfs.create("tank/pg").unwrap();
        zfs.create("tank/pg/base").unwrap();

        zfs.snapshot("tank/pg@1", true).unwrap();
        assert!(zfs.exists("tank/pg@1"));
        assert!(zfs.exists("tank/pg/base@1"));
        assert!(!zfs.exists("tank@1"));

        let err = zfs.snapshot("tank/pg@1", true).unwrap_err();
        assert_eq!(err.code, EZFS_EXISTS);
    }

    #[test]
    fn test_create_refuses_populated_mountpoint() {
        let tmp = TempDir::new("pgcow-mock").unwrap();
        let zfs = MockZfs::new(tmp.path().join("store"));
        zfs.add_pool("tank", tmp.path().join("tank"));
        fs::create_dir_all(tmp.path().join("tank/pg")).unwrap();
        fs::write(tmp.path().join("tank/pg/file"), b"x").unwrap();

        assert!(zfs.create("tank/pg").is_err());
        assert!(!zfs.exists("tank/pg"));
        assert!(zfs.create("missing/pg").is_err());
    }
}
