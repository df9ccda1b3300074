//! Exclusive data-directory lock.
//!
//! One engine instance owns a data directory at a time. The lock is an
//! OS-level advisory file lock (`flock(2)` on unix, `LockFileEx` on windows)
//! on `kvstore.lock`, held for the engine's entire lifetime (the handle is
//! a field of the engine, never a local). The OS releases the lock when the
//! process exits, so a crashed process never wedges the directory.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Holds the exclusive lock on a data directory's lock file.
#[derive(Debug)]
pub struct DirLock {
    _file: File,
    path: PathBuf,
}

impl DirLock {
    /// Creates (or reopens) the lock file and acquires the exclusive lock.
    ///
    /// Fails with `io::ErrorKind::WouldBlock` when another process holds the
    /// lock. The process id is written into the file for debugging.
    pub fn acquire<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)?;

        Self::try_lock(&file)?;

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { _file: file, path })
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> io::Result<()> {
        use libc::{flock, LOCK_EX, LOCK_NB};

        let rc = unsafe { flock(file.as_raw_fd(), LOCK_EX | LOCK_NB) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(windows)]
    fn try_lock(file: &File) -> io::Result<()> {
        use std::os::windows::io::AsRawHandle;
        use winapi::um::fileapi::LockFileEx;
        use winapi::um::minwinbase::OVERLAPPED;
        use winapi::um::winnt::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY};

        let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
        let rc = unsafe {
            LockFileEx(
                file.as_raw_handle() as *mut _,
                LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
                0,
                !0,
                !0,
                &mut overlapped,
            )
        };
        if rc == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    fn try_lock(_file: &File) -> io::Result<()> {
        Ok(())
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

// The lock file itself is left in place on drop; removing it would race with
// another process acquiring the lock through a fresh inode. The OS releases
// the lock when the handle closes.

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_writes_pid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kvstore.lock");

        let lock = DirLock::acquire(&path).unwrap();
        assert_eq!(lock.path(), path.as_path());

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains(&std::process::id().to_string()));
    }

    #[test]
    fn second_acquire_fails_while_held() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kvstore.lock");

        let _held = DirLock::acquire(&path).unwrap();
        let second = DirLock::acquire(&path);
        assert!(second.is_err());
    }

    #[test]
    fn lock_is_released_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kvstore.lock");

        {
            let _lock = DirLock::acquire(&path).unwrap();
        }
        // Reacquirable once the first handle is gone.
        let _second = DirLock::acquire(&path).unwrap();
    }
}
