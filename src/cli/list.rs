use crate::{Handler, Result};
use clap::Args;
use serde::Serialize;
use zfs::{DatasetKind, Registry, Zfs, ZfsCommand};

/// Arguments for our `ListCommand`.
///
/// Example :
///
/// `pgcow list --json`
#[derive(Debug, Args)]
pub struct ListCommand {
    /// Print the datasets as a JSON array.
    #[clap(long)]
    json: bool,
}

/// One line of the listing.
#[derive(Debug, PartialEq, Eq, Serialize)]
struct Entry {
    name: String,
    #[serde(flatten)]
    kind: Option<DatasetKind>,
    mountpoint: Option<String>,
}

impl Entry {
    fn line(&self) -> String {
        format!(
            "{}\t{}\t{}",
            self.name,
            self.kind.as_ref().map_or("-", DatasetKind::as_str),
            self.mountpoint.as_deref().unwrap_or("-")
        )
    }
}

fn entries<Z: Zfs>(zfs: &Z) -> Vec<Entry> {
    Registry::new(zfs)
        .all()
        .iter()
        .map(|dataset| Entry {
            name: dataset.name().to_string(),
            kind: dataset.kind(),
            mountpoint: dataset.mountpoint(),
        })
        .collect()
}

impl Handler for ListCommand {
    fn handler(&self, zfs: &ZfsCommand) -> Result<()> {
        let entries = entries(zfs);

        if self.json {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        } else {
            for entry in &entries {
                println!("{}", entry.line());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;
    use zfs::mock::MockZfs;

    #[test]
    fn test_entries() {
        let tmp = TempDir::new("pgcow-list").unwrap();
        let zfs = MockZfs::new(tmp.path().join("store"));
        zfs.add_pool("tank", tmp.path().join("tank"));
        zfs.create("tank/pg").unwrap();
        zfs.snapshot("tank/pg@1", false).unwrap();

        let entries = entries(&zfs);
        let names: Vec<&str> = entries.iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(names, vec!["tank", "tank/pg", "tank/pg@1"]);

        let pg = tmp.path().join("tank/pg");
        assert_eq!(
            entries[1].line(),
            format!("tank/pg\tfilesystem\t{}", pg.display())
        );
        assert_eq!(entries[2].line(), "tank/pg@1\tsnapshot\t-");
        assert_eq!(zfs.open_handles(), 0);
    }

    #[test]
    fn test_json() {
        let entry = Entry {
            name: "tank/pg@1".to_string(),
            kind: Some(DatasetKind::Snapshot {
                origin: "tank/pg".to_string(),
                tag: "1".to_string(),
            }),
            mountpoint: None,
        };

        let json: serde_json::Value = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "tank/pg@1",
                "type": "snapshot",
                "origin": "tank/pg",
                "tag": "1",
                "mountpoint": null
            })
        );
    }
}
