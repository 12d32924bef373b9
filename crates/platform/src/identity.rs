//! Identity of the running process and group lookups
//!
//! Used by the script permission policy: an external script must belong to
//! root or the effective user, and to an administrative group.

use fleetpkg_errors::PlatformError;
use std::ffi::CString;

/// Effective ids of this process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessIdentity {
    pub euid: u32,
    pub egid: u32,
}

impl ProcessIdentity {
    /// Identity of the current process
    #[must_use]
    #[allow(unsafe_code)]
    pub fn current() -> Self {
        // SAFETY: geteuid/getegid take no arguments and cannot fail.
        let (euid, egid) = unsafe { (libc::geteuid(), libc::getegid()) };
        Self { euid, egid }
    }
}

/// Resolve a group name to its gid through the system directory
///
/// # Errors
///
/// Returns `PlatformError::UnknownGroup` if the group does not exist.
#[allow(unsafe_code)]
pub fn group_id(name: &str) -> Result<u32, PlatformError> {
    let unknown = || PlatformError::UnknownGroup {
        group: name.to_string(),
    };
    let c_name = CString::new(name).map_err(|_| unknown())?;

    let mut buf: Vec<libc::c_char> = vec![0; 1024];
    loop {
        // SAFETY: all pointers reference live locals; getgrnam_r writes the
        // entry into `group` with strings stored in `buf`, and sets `result`
        // to either null or `&mut group`.
        let mut group: libc::group = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::group = std::ptr::null_mut();
        let rc = unsafe {
            libc::getgrnam_r(
                c_name.as_ptr(),
                &mut group,
                buf.as_mut_ptr(),
                buf.len(),
                &mut result,
            )
        };
        if rc == libc::ERANGE && buf.len() < 1 << 20 {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc != 0 || result.is_null() {
            return Err(unknown());
        }
        return Ok(group.gr_gid);
    }
}

/// Resolve every name that exists; unknown groups are logged and skipped
#[must_use]
pub fn group_ids<S: AsRef<str>>(names: &[S]) -> Vec<u32> {
    names
        .iter()
        .filter_map(|name| match group_id(name.as_ref()) {
            Ok(gid) => Some(gid),
            Err(e) => {
                tracing::debug!(group = name.as_ref(), error = %e, "skipping group");
                None
            }
        })
        .collect()
}
