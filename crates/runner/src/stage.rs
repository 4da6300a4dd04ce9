//! Workspace staging: write caller-supplied files into a fresh
//! temporary directory owned by the runner account, ready to be
//! bind-mounted into the sandbox.

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use nix::unistd::{Gid, Uid, chown};
use tempfile::TempDir;
use tracing::debug;

/// One caller-supplied file to place in the workspace.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Workspace-relative path. Traversal components are discarded.
    pub path: String,
    pub content: Vec<u8>,
}

/// A staged workspace. Dropping it removes the directory tree.
pub struct StagedWorkspace {
    dir: TempDir,
}

impl StagedWorkspace {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Clamp a caller-supplied entry path inside `root`: only normal
/// components survive, so `../../etc/passwd` stages as `etc/passwd`.
fn resolve_entry_path(root: &Path, entry: &str) -> PathBuf {
    let mut clean = PathBuf::new();
    for component in Path::new(entry).components() {
        if let Component::Normal(part) = component {
            clean.push(part);
        }
    }
    root.join(clean)
}

fn chown_raw(path: &Path, uid: u32, gid: u32) -> io::Result<()> {
    chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid))).map_err(io::Error::from)
}

/// Create a workspace under `root` and populate it with `files`, all
/// owned by `uid:gid` and executable (scripts are invoked directly).
pub fn stage(
    root: &Path,
    uid: u32,
    gid: u32,
    files: &[SourceFile],
) -> io::Result<StagedWorkspace> {
    let dir = tempfile::Builder::new().prefix("sandbox-run-").tempdir_in(root)?;
    chown_raw(dir.path(), uid, gid)?;
    debug!(dir = %dir.path().display(), "workspace created");

    for file in files {
        let path = resolve_entry_path(dir.path(), &file.path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, &file.content)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        chown_raw(&path, uid, gid)?;
    }

    Ok(StagedWorkspace { dir })
}
