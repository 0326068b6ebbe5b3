//! Small helpers over `String` paths.
//!
//! Mountpoints are compared as strings, so these helpers keep them as strings.

use std::path::Path;

/// Join two paths together.
///
/// A separator is only added when `a` does not already end in one. When `b` is
/// absolute it replaces `a`, like `PathBuf::push`.
pub fn join(a: &str, b: &str) -> String {
    let mut joined = Path::new(a).to_path_buf();
    joined.push(b);
    joined.to_string_lossy().into_owned()
}

/// Get the last segment of a path.
///
/// `/srv/pg/base/16384` gives `16384`. Returns `None` for `/` or an empty path.
pub fn leaf(path: &str) -> Option<String> {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}
