use crate::tag::SnapshotTagger;
use crate::{CopyDir, Error, Result};
use std::path::{Path, PathBuf};
use std::time::Instant;
use zfs::{path, Registry, Zfs};

/// `CowCopyDir` replaces the copy of a dataset mountpoint by a snapshot and a clone.
///
/// Directories that are not the mountpoint of a dataset go to the hook chained
/// ahead of this one, or to the standard copy when there is none.
pub struct CowCopyDir<Z: Zfs> {
    zfs: Z,
    standard: Box<dyn CopyDir>,
    next: Option<Box<dyn CopyDir>>,
    tagger: SnapshotTagger,
}

impl<Z: Zfs> CowCopyDir<Z> {
    pub fn new(zfs: Z, standard: Box<dyn CopyDir>) -> Self {
        CowCopyDir {
            zfs,
            standard,
            next: None,
            tagger: SnapshotTagger::default(),
        }
    }

    /// Run `next` after every request, with the arguments this hook received.
    pub fn chain(mut self, next: Option<Box<dyn CopyDir>>) -> Self {
        self.next = next;
        self
    }

    pub fn with_tagger(mut self, tagger: SnapshotTagger) -> Self {
        self.tagger = tagger;
        self
    }

    pub fn zfs(&self) -> &Z {
        &self.zfs
    }

    fn fallback(&self) -> &dyn CopyDir {
        self.next.as_deref().unwrap_or(self.standard.as_ref())
    }

    /// Snapshot the dataset mounted at `from` and clone it next to itself.
    ///
    /// Returns false when no dataset is mounted at `from`.
    fn clone_dataset(&self, from: &Path, to: &Path) -> Result<bool> {
        let registry = Registry::new(&self.zfs);
        let dataset = match registry.by_mountpoint(&from.to_string_lossy()) {
            Ok(dataset) => dataset,
            Err(e) => {
                log::debug!("'{}' is not managed ({}), copying", from.display(), e);
                return Ok(false);
            }
        };

        let leaf = path::leaf(&to.to_string_lossy())
            .ok_or_else(|| Error::InvalidTarget(to.to_path_buf()))?;

        let started = Instant::now();
        let tag = self.tagger.next_tag();
        let snapshot = dataset.snapshot(&tag).map_err(|source| Error::Snapshot {
            from: from.to_path_buf(),
            source,
        })?;

        let clone = snapshot.clone_as(&leaf).map_err(|source| Error::Clone {
            snapshot: snapshot.name().to_string(),
            source,
        })?;

        log::info!(
            "cloned '{}' into '{}' in {} ms",
            dataset.name(),
            clone.name(),
            started.elapsed().as_millis()
        );

        if clone.mountpoint().as_deref().map(Path::new) != Some(to) {
            log::debug!(
                "zfs dataset '{}' is not mounted at '{}'",
                clone.name(),
                to.display()
            );
        }

        Ok(true)
    }
}

impl<Z: Zfs> CopyDir for CowCopyDir<Z> {
    fn copydir(&self, from: &Path, to: &Path, recurse: bool) -> Result<()> {
        let source = absolute(from)?;

        if !self.clone_dataset(&source, to)? {
            return self.fallback().copydir(from, to, recurse);
        }

        match &self.next {
            Some(next) => next.copydir(from, to, recurse),
            None => Ok(()),
        }
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }

    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(Error::CurrentDir)
}

/// Install a `CowCopyDir` into `slot`, chaining the hook it held before.
pub fn install<Z: Zfs + 'static>(
    slot: &mut Option<Box<dyn CopyDir>>,
    zfs: Z,
    standard: Box<dyn CopyDir>,
) {
    let hook = CowCopyDir::new(zfs, standard).chain(slot.take());
    *slot = Some(Box::new(hook));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RefuseCopy;
    use std::cell::RefCell;
    use std::fs;
    use std::rc::Rc;
    use tempdir::TempDir;
    use zfs::mock::{MockOp, MockZfs};

    type Calls = Rc<RefCell<Vec<(PathBuf, PathBuf, bool)>>>;

    /// A hook that records what it was asked to copy.
    fn recorder() -> (Calls, Box<dyn CopyDir>) {
        let calls: Calls = Rc::new(RefCell::new(Vec::new()));
        let seen = calls.clone();
        let hook = move |from: &Path, to: &Path, recurse: bool| -> Result<()> {
            seen.borrow_mut()
                .push((from.to_path_buf(), to.to_path_buf(), recurse));
            Ok(())
        };
        (calls, Box::new(hook))
    }

    struct Fixture {
        tmp: TempDir,
        standard: Calls,
        cow: CowCopyDir<MockZfs>,
    }

    impl Fixture {
        fn new(next: Option<Box<dyn CopyDir>>) -> Self {
            let tmp = TempDir::new("pgcow-cow").unwrap();
            let zfs = MockZfs::new(tmp.path().join("store"));
            zfs.add_pool("tank", tmp.path().join("tank"));
            zfs.create("tank/base").unwrap();
            zfs.create("tank/base/1").unwrap();
            fs::write(tmp.path().join("tank/base/1/PG_VERSION"), b"14").unwrap();

            let (standard, hook) = recorder();
            let cow = CowCopyDir::new(zfs, hook)
                .chain(next)
                .with_tagger(SnapshotTagger::new(|| 1_700_000_000_000));
            Fixture { tmp, standard, cow }
        }

        fn path(&self, relative: &str) -> PathBuf {
            self.tmp.path().join(relative)
        }
    }

    #[test]
    fn test_managed_source_is_cloned() {
        let fixture = Fixture::new(None);
        let from = fixture.path("tank/base/1");
        let to = fixture.path("tank/base/2");

        fixture.cow.copydir(&from, &to, true).unwrap();

        let zfs = fixture.cow.zfs();
        assert_eq!(zfs.count("snapshot"), 1);
        assert_eq!(zfs.count("clone"), 1);
        assert!(zfs.exists("tank/base/1@1700000000000"));
        assert!(zfs.exists("tank/base/2"));
        assert_eq!(fs::read(to.join("PG_VERSION")).unwrap(), b"14");
        assert!(fixture.standard.borrow().is_empty());
    }

    #[test]
    fn test_unmanaged_source_is_copied() {
        let fixture = Fixture::new(None);
        let from = fixture.path("plain");
        fs::create_dir_all(&from).unwrap();
        let to = fixture.path("copy");

        fixture.cow.copydir(&from, &to, false).unwrap();

        let zfs = fixture.cow.zfs();
        assert_eq!(zfs.count("snapshot"), 0);
        assert_eq!(zfs.count("clone"), 0);
        assert_eq!(*fixture.standard.borrow(), vec![(from, to, false)]);
    }

    #[test]
    fn test_prior_hook_runs_once_after_clone() {
        let (prior, hook) = recorder();
        let fixture = Fixture::new(Some(hook));
        let from = fixture.path("tank/base/1");
        let to = fixture.path("tank/base/2");

        fixture.cow.copydir(&from, &to, true).unwrap();

        assert_eq!(fixture.cow.zfs().count("clone"), 1);
        assert_eq!(*prior.borrow(), vec![(from, to, true)]);
        assert!(fixture.standard.borrow().is_empty());
    }

    #[test]
    fn test_prior_hook_replaces_standard_copy() {
        let (prior, hook) = recorder();
        let fixture = Fixture::new(Some(hook));
        let from = fixture.path("plain");
        let to = fixture.path("copy");

        fixture.cow.copydir(&from, &to, true).unwrap();

        assert_eq!(*prior.borrow(), vec![(from, to, true)]);
        assert!(fixture.standard.borrow().is_empty());
    }

    #[test]
    fn test_snapshot_failure_does_not_copy() {
        let (prior, hook) = recorder();
        let fixture = Fixture::new(Some(hook));
        fixture.cow.zfs().fail(MockOp::Snapshot);

        let err = fixture
            .cow
            .copydir(&fixture.path("tank/base/1"), &fixture.path("tank/base/2"), true)
            .unwrap_err();

        assert!(matches!(err, Error::Snapshot { .. }));
        assert_eq!(fixture.cow.zfs().count("clone"), 0);
        assert!(prior.borrow().is_empty());
        assert!(fixture.standard.borrow().is_empty());
    }

    #[test]
    fn test_clone_failure_keeps_snapshot() {
        let fixture = Fixture::new(None);
        fixture.cow.zfs().fail(MockOp::Clone);

        let err = fixture
            .cow
            .copydir(&fixture.path("tank/base/1"), &fixture.path("tank/base/2"), true)
            .unwrap_err();

        assert!(matches!(err, Error::Clone { ref snapshot, .. } if snapshot == "tank/base/1@1700000000000"));
        assert!(fixture.cow.zfs().exists("tank/base/1@1700000000000"));
        assert!(!fixture.cow.zfs().exists("tank/base/2"));
        assert!(fixture.standard.borrow().is_empty());
    }

    #[test]
    fn test_invalid_target_is_refused_before_snapshot() {
        let (prior, hook) = recorder();
        let fixture = Fixture::new(Some(hook));

        let err = fixture
            .cow
            .copydir(&fixture.path("tank/base/1"), Path::new("/"), true)
            .unwrap_err();

        assert!(matches!(err, Error::InvalidTarget(_)));
        assert_eq!(fixture.cow.zfs().count("snapshot"), 0);
        assert!(fixture
            .cow
            .zfs()
            .names()
            .iter()
            .all(|name| !name.contains('@')));
        assert!(prior.borrow().is_empty());
        assert!(fixture.standard.borrow().is_empty());
    }

    #[test]
    fn test_repeated_copies_get_distinct_snapshots() {
        let fixture = Fixture::new(None);
        let from = fixture.path("tank/base/1");

        fixture.cow.copydir(&from, &fixture.path("tank/base/2"), true).unwrap();
        fixture.cow.copydir(&from, &fixture.path("tank/base/3"), true).unwrap();

        let zfs = fixture.cow.zfs();
        assert!(zfs.exists("tank/base/1@1700000000000"));
        assert!(zfs.exists("tank/base/1@1700000000001"));
        assert!(zfs.exists("tank/base/3"));
    }

    #[test]
    fn test_relative_source_is_resolved() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(absolute(Path::new("base/1")).unwrap(), cwd.join("base/1"));
        assert_eq!(absolute(Path::new("/srv/pg")).unwrap(), PathBuf::from("/srv/pg"));
    }

    #[test]
    fn test_install_chains_previous_hook() {
        let tmp = TempDir::new("pgcow-install").unwrap();
        let (prior, hook) = recorder();
        let mut slot = Some(hook);

        install(&mut slot, MockZfs::new(tmp.path().join("store")), Box::new(RefuseCopy));

        let from = tmp.path().join("plain");
        let to = tmp.path().join("copy");
        slot.as_ref().unwrap().copydir(&from, &to, true).unwrap();
        assert_eq!(*prior.borrow(), vec![(from, to, true)]);
    }

    #[test]
    fn test_install_into_empty_slot() {
        let tmp = TempDir::new("pgcow-install").unwrap();
        let mut slot: Option<Box<dyn CopyDir>> = None;

        install(&mut slot, MockZfs::new(tmp.path().join("store")), Box::new(RefuseCopy));

        let err = slot
            .as_ref()
            .unwrap()
            .copydir(&tmp.path().join("plain"), &tmp.path().join("copy"), true)
            .unwrap_err();
        assert!(matches!(err, Error::NotManaged(_)));
    }
}
