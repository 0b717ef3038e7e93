use std::path::{Path, PathBuf};

/// Source of usable disk space for a directory
pub trait DiskSpaceProbe: Send + Sync {
    /// Bytes available to unprivileged users on the filesystem holding `path`
    fn usable_bytes(&self, path: &Path) -> std::io::Result<u64>;
}

/// Probe backed by `statvfs(3)`
#[derive(Debug, Default, Clone, Copy)]
pub struct StatvfsProbe;

impl DiskSpaceProbe for StatvfsProbe {
    #[cfg(target_family = "unix")]
    fn usable_bytes(&self, path: &Path) -> std::io::Result<u64> {
        use std::os::unix::ffi::OsStrExt;

        let target = existing_ancestor(path);
        let path_cstr = std::ffi::CString::new(target.as_os_str().as_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        // SAFETY: statvfs is a plain C struct of integers, zeroed is a valid value.
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        // SAFETY: path_cstr is a valid NUL-terminated string and stat is a valid out pointer.
        let result = unsafe { libc::statvfs(path_cstr.as_ptr(), &mut stat) };

        if result != 0 {
            return Err(std::io::Error::last_os_error());
        }

        #[allow(clippy::unnecessary_cast)]
        let available = (stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64);
        Ok(available)
    }

    #[cfg(not(target_family = "unix"))]
    fn usable_bytes(&self, _path: &Path) -> std::io::Result<u64> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "disk space checking is only supported on Unix systems",
        ))
    }
}

/// Probe returning a fixed value, for tests and dry runs
#[derive(Debug, Clone, Copy)]
pub struct FixedDiskSpace(pub u64);

impl DiskSpaceProbe for FixedDiskSpace {
    fn usable_bytes(&self, _path: &Path) -> std::io::Result<u64> {
        Ok(self.0)
    }
}

/// The data directory may not exist before the first start
fn existing_ancestor(path: &Path) -> PathBuf {
    path.ancestors()
        .find(|p| !p.as_os_str().is_empty() && p.exists())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}
