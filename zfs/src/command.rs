use crate::backend::{Zfs, ZfsError};
use crate::DatasetKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

pub const DEFAULT_ZFS_BIN: &str = "zfs";
pub const DEFAULT_ZPOOL_BIN: &str = "zpool";

/// Code reported when a command could not be started or was killed by a signal.
const SPAWN_FAILURE: i32 = -1;

/// A dataset opened through the `zfs` command line tools.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandHandle {
    name: String,
}

/// `ZfsCommand` drives the host `zfs` and `zpool` binaries.
///
/// When the process does not run as root, every command goes through
/// `sudo -n`.
#[derive(Clone, Debug)]
pub struct ZfsCommand {
    zfs_bin: PathBuf,
    zpool_bin: PathBuf,
    sudo: bool,
}

impl Default for ZfsCommand {
    fn default() -> Self {
        ZfsCommand {
            zfs_bin: PathBuf::from(DEFAULT_ZFS_BIN),
            zpool_bin: PathBuf::from(DEFAULT_ZPOOL_BIN),
            sudo: !nix::unistd::geteuid().is_root(),
        }
    }
}

impl ZfsCommand {
    pub fn new(zfs_bin: impl Into<PathBuf>, zpool_bin: impl Into<PathBuf>) -> Self {
        ZfsCommand {
            zfs_bin: zfs_bin.into(),
            zpool_bin: zpool_bin.into(),
            ..Default::default()
        }
    }

    /// Whether commands are run through `sudo -n`.
    pub fn sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    fn zfs(&self, args: &[&str]) -> Result<String, ZfsError> {
        self.run(&self.zfs_bin, args)
    }

    fn run(&self, program: &Path, args: &[&str]) -> Result<String, ZfsError> {
        let action = format!("{} {}", program.display(), args.join(" "));
        log::debug!("running '{}'", action);

        let mut command = if self.sudo {
            let mut command = Command::new("sudo");
            command.arg("-n").arg(program);
            command
        } else {
            Command::new(program)
        };

        let output = command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| ZfsError::new(SPAWN_FAILURE, action.as_str(), e.to_string()))?;

        check_output(action, output)
    }

    fn handles(names: &str) -> Vec<CommandHandle> {
        names
            .lines()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| CommandHandle {
                name: name.to_string(),
            })
            .collect()
    }
}

fn check_output(action: String, output: Output) -> Result<String, ZfsError> {
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }

    Err(ZfsError::new(
        output.status.code().unwrap_or(SPAWN_FAILURE),
        action,
        String::from_utf8_lossy(&output.stderr).trim(),
    ))
}

/// Interpret the value of the `mountpoint` property.
fn parse_mountpoint(value: &str) -> Option<String> {
    match value.trim() {
        "" | "-" | "none" | "legacy" => None,
        mountpoint => Some(mountpoint.to_string()),
    }
}

/// Interpret the values of the `type` and `origin` properties of `name`.
fn parse_kind(name: &str, properties: &str) -> Option<DatasetKind> {
    let mut values = properties.lines().map(str::trim);
    let typ = values.next()?;
    let origin = values.next().unwrap_or("-");

    match typ {
        "snapshot" => {
            let (origin, tag) = name.split_once('@')?;
            Some(DatasetKind::Snapshot {
                origin: origin.to_string(),
                tag: tag.to_string(),
            })
        }
        "filesystem" | "volume" if origin != "-" && !origin.is_empty() => {
            Some(DatasetKind::Clone {
                origin: origin.to_string(),
            })
        }
        "filesystem" | "volume" => Some(DatasetKind::Filesystem),
        _ => None,
    }
}

impl Zfs for ZfsCommand {
    type Handle = CommandHandle;

    fn open(&self, name: &str) -> Result<CommandHandle, ZfsError> {
        let output = self.zfs(&["list", "-H", "-o", "name", "-t", "all", name])?;
        Ok(Self::handles(&output)
            .into_iter()
            .next()
            .unwrap_or_else(|| CommandHandle {
                name: name.to_string(),
            }))
    }

    fn close(&self, _handle: &CommandHandle) {}

    fn name(&self, handle: &CommandHandle) -> String {
        handle.name.clone()
    }

    fn mountpoint(&self, handle: &CommandHandle) -> Result<Option<String>, ZfsError> {
        let output = self.zfs(&["get", "-H", "-o", "value", "mountpoint", &handle.name])?;
        Ok(parse_mountpoint(&output))
    }

    fn kind(&self, handle: &CommandHandle) -> Result<DatasetKind, ZfsError> {
        let action = format!("zfs get type,origin {}", handle.name);
        let output = self.zfs(&["get", "-H", "-o", "value", "type,origin", &handle.name])?;
        parse_kind(&handle.name, &output)
            .ok_or_else(|| ZfsError::new(SPAWN_FAILURE, action, "unsupported dataset type"))
    }

    fn create(&self, name: &str) -> Result<(), ZfsError> {
        self.zfs(&["create", name]).map(|_| ())
    }

    fn destroy(&self, handle: &CommandHandle) -> Result<(), ZfsError> {
        self.zfs(&["destroy", &handle.name]).map(|_| ())
    }

    fn snapshot(&self, name: &str, recursive: bool) -> Result<(), ZfsError> {
        if recursive {
            self.zfs(&["snapshot", "-r", name]).map(|_| ())
        } else {
            self.zfs(&["snapshot", name]).map(|_| ())
        }
    }

    fn clone_snapshot(&self, snapshot: &CommandHandle, target: &str) -> Result<(), ZfsError> {
        self.zfs(&["clone", &snapshot.name, target]).map(|_| ())
    }

    fn iter_root(&self) -> Result<Vec<CommandHandle>, ZfsError> {
        let output = self.run(&self.zpool_bin, &["list", "-H", "-o", "name"])?;
        Ok(Self::handles(&output))
    }

    fn iter_children(&self, handle: &CommandHandle) -> Result<Vec<CommandHandle>, ZfsError> {
        let output = self.zfs(&[
            "list",
            "-H",
            "-o",
            "name",
            "-t",
            "filesystem,volume,snapshot",
            "-d",
            "1",
            &handle.name,
        ])?;
        Ok(Self::handles(&output)
            .into_iter()
            .filter(|child| child.name != handle.name)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempdir::TempDir;

    /// Write a fake `zfs` binary that prints `stdout` and exits with `code`.
    fn fake_bin(dir: &Path, name: &str, stdout: &str, stderr: &str, code: i32) -> PathBuf {
        let path = dir.join(name);
        let script = format!(
            "#!/bin/sh\necho \"$@\" >> \"{}.args\"\nprintf '{}'\nprintf '{}' >&2\nexit {}\n",
            path.display(),
            stdout,
            stderr,
            code
        );
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn args(bin: &Path) -> String {
        fs::read_to_string(format!("{}.args", bin.display())).unwrap()
    }

    #[test]
    fn test_parse_mountpoint() {
        assert_eq!(parse_mountpoint("/srv/pg\n").as_deref(), Some("/srv/pg"));
        assert_eq!(parse_mountpoint("-\n"), None);
        assert_eq!(parse_mountpoint("none"), None);
        assert_eq!(parse_mountpoint("legacy"), None);
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!(
            parse_kind("tank/pg", "filesystem\n-\n"),
            Some(DatasetKind::Filesystem)
        );
        assert_eq!(
            parse_kind("tank/pg/base/2", "filesystem\ntank/pg/base/1@1\n"),
            Some(DatasetKind::Clone {
                origin: "tank/pg/base/1@1".to_string()
            })
        );
        assert_eq!(
            parse_kind("tank/pg@1", "snapshot\n-\n"),
            Some(DatasetKind::Snapshot {
                origin: "tank/pg".to_string(),
                tag: "1".to_string()
            })
        );
        assert_eq!(parse_kind("tank/pg", "bookmark\n-\n"), None);
    }

    #[test]
    fn test_commands_and_output() {
        let tmp = TempDir::new("pgcow-command").unwrap();
        let zfs_bin = fake_bin(tmp.path(), "zfs", "tank/pg\\ntank/pg/base\\ntank/pg@1\\n", "", 0);
        let zpool_bin = fake_bin(tmp.path(), "zpool", "tank\\n", "", 0);
        let zfs = ZfsCommand::new(&zfs_bin, &zpool_bin).sudo(false);

        let roots = zfs.iter_root().unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(zfs.name(&roots[0]), "tank");

        let parent = CommandHandle {
            name: "tank/pg".to_string(),
        };
        let children = zfs.iter_children(&parent).unwrap();
        let names: Vec<String> = children.iter().map(|child| zfs.name(child)).collect();
        assert_eq!(names, vec!["tank/pg/base", "tank/pg@1"]);

        zfs.snapshot("tank/pg@2", true).unwrap();
        zfs.clone_snapshot(&children[1], "tank/copy").unwrap();

        let invoked = args(&zfs_bin);
        assert!(invoked.contains("list -H -o name -t filesystem,volume,snapshot -d 1 tank/pg"));
        assert!(invoked.contains("snapshot -r tank/pg@2"));
        assert!(invoked.contains("clone tank/pg@1 tank/copy"));
        assert_eq!(args(&zpool_bin).trim(), "list -H -o name");
    }

    #[test]
    fn test_failure_carries_exit_code_and_stderr() {
        let tmp = TempDir::new("pgcow-command").unwrap();
        let zfs_bin = fake_bin(
            tmp.path(),
            "zfs",
            "",
            "cannot create tank/pg: dataset already exists\\n",
            1,
        );
        let zfs = ZfsCommand::new(&zfs_bin, DEFAULT_ZPOOL_BIN).sudo(false);

        let err = zfs.create("tank/pg").unwrap_err();
        assert_eq!(err.code, 1);
        assert_eq!(err.description, "cannot create tank/pg: dataset already exists");
        assert!(err.action.ends_with("create tank/pg"));
    }

    #[test]
    fn test_missing_binary() {
        let zfs = ZfsCommand::new("/nonexistent/zfs", "/nonexistent/zpool").sudo(false);
        let err = zfs.open("tank").unwrap_err();
        assert_eq!(err.code, SPAWN_FAILURE);
    }
}
