use crate::backend::Zfs;
use crate::dataset::Dataset;
use crate::{Error, Result};

/// `Registry` answers questions about every dataset the management layer knows.
///
/// Nothing is cached, each call walks the whole hierarchy again.
pub struct Registry<'z, Z: Zfs> {
    zfs: &'z Z,
}

impl<'z, Z: Zfs> Registry<'z, Z> {
    pub fn new(zfs: &'z Z) -> Self {
        Registry { zfs }
    }

    /// Get every dataset, root datasets first.
    ///
    /// The children of a dataset are listed together, before any of their own
    /// descendants. A failure to list the children of one dataset is logged and
    /// that dataset is treated as a leaf.
    pub fn all(&self) -> Vec<Dataset<'z, Z>> {
        let roots: Vec<Dataset<'z, Z>> = match self.zfs.iter_root() {
            Ok(handles) => handles
                .into_iter()
                .map(|handle| Dataset::from_handle(self.zfs, handle))
                .collect(),
            Err(e) => {
                log::error!("failed to iterate root zfs datasets, error {}", e);
                return Vec::new();
            }
        };

        let mut descendants = Vec::new();
        for root in &roots {
            descendants.extend(self.descendants(root));
        }

        let mut datasets = roots;
        datasets.extend(descendants);
        datasets
    }

    /// Get the dataset mounted exactly at `mountpoint`.
    pub fn by_mountpoint(&self, mountpoint: &str) -> Result<Dataset<'z, Z>> {
        self.all()
            .into_iter()
            .find(|dataset| dataset.mountpoint().as_deref() == Some(mountpoint))
            .ok_or_else(|| Error::NotFound(mountpoint.to_string()))
    }

    fn descendants(&self, parent: &Dataset<'z, Z>) -> Vec<Dataset<'z, Z>> {
        let children: Vec<Dataset<'z, Z>> = match self.zfs.iter_children(parent.handle()) {
            Ok(handles) => handles
                .into_iter()
                .map(|handle| Dataset::from_handle(self.zfs, handle))
                .collect(),
            Err(e) => {
                log::error!(
                    "failed to iterate child zfs datasets of '{}', error {}",
                    parent.name(),
                    e
                );
                return Vec::new();
            }
        };

        let mut nested = Vec::new();
        for child in &children {
            nested.extend(self.descendants(child));
        }

        let mut datasets = children;
        datasets.extend(nested);
        datasets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockOp, MockZfs};
    use std::collections::BTreeSet;
    use tempdir::TempDir;

    fn setup() -> (TempDir, MockZfs) {
        let tmp = TempDir::new("pgcow-registry").unwrap();
        let zfs = MockZfs::new(tmp.path().join("store"));
        zfs.add_pool("tank", tmp.path().join("tank"));
        zfs.add_pool("scratch", tmp.path().join("scratch"));
        zfs.create("tank/pg").unwrap();
        zfs.create("tank/pg/base").unwrap();
        zfs.create("tank/pg/base/1").unwrap();
        zfs.create("tank/logs").unwrap();
        (tmp, zfs)
    }

    fn names(datasets: &[Dataset<'_, MockZfs>]) -> Vec<String> {
        datasets.iter().map(|d| d.name().to_string()).collect()
    }

    #[test]
    fn test_all_lists_roots_then_children() {
        let (_tmp, zfs) = setup();
        let registry = Registry::new(&zfs);

        let all = names(&registry.all());
        assert_eq!(
            all,
            vec![
                "scratch",
                "tank",
                "tank/logs",
                "tank/pg",
                "tank/pg/base",
                "tank/pg/base/1"
            ]
        );
    }

    #[test]
    fn test_all_is_stable_without_mutation() {
        let (_tmp, zfs) = setup();
        let registry = Registry::new(&zfs);

        let first: BTreeSet<String> = names(&registry.all()).into_iter().collect();
        let second: BTreeSet<String> = names(&registry.all()).into_iter().collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 6);
        assert_eq!(zfs.open_handles(), 0);
    }

    #[test]
    fn test_child_iteration_failure_is_not_fatal() {
        let (_tmp, zfs) = setup();
        let registry = Registry::new(&zfs);

        // the first children listing is the one of `scratch`
        zfs.fail(MockOp::IterChildren);
        let all = names(&registry.all());
        assert!(all.contains(&"tank/pg/base/1".to_string()));

        zfs.fail(MockOp::IterRoot);
        assert!(registry.all().is_empty());
    }

    #[test]
    fn test_by_mountpoint() {
        let (tmp, zfs) = setup();
        let registry = Registry::new(&zfs);

        let base = tmp.path().join("tank/pg/base");
        let dataset = registry.by_mountpoint(&base.to_string_lossy()).unwrap();
        assert_eq!(dataset.name(), "tank/pg/base");

        let not_normalized = format!("{}/", base.to_string_lossy());
        assert!(matches!(
            registry.by_mountpoint(&not_normalized),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            Dataset::by_mountpoint(&zfs, "/nowhere"),
            Err(Error::NotFound(_))
        ));
    }
}
