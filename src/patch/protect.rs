//! Page protection changes around a patch.

use std::sync::OnceLock;

use bitflags::bitflags;
use log::{trace, warn};

use crate::{Error, Result};

bitflags! {
    /// Access rights of a memory page.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Protection: u8 {
        /// Readable
        const READ = 0b001;
        /// Writable
        const WRITE = 0b010;
        /// Executable
        const EXECUTE = 0b100;
    }
}

impl Protection {
    /// Protection assumed for code pages whose real protection cannot be queried.
    pub const CODE: Protection = Protection::READ.union(Protection::EXECUTE);

    #[cfg(unix)]
    fn to_native(self) -> libc::c_int {
        let mut native = libc::PROT_NONE;
        if self.contains(Protection::READ) {
            native |= libc::PROT_READ;
        }
        if self.contains(Protection::WRITE) {
            native |= libc::PROT_WRITE;
        }
        if self.contains(Protection::EXECUTE) {
            native |= libc::PROT_EXEC;
        }
        native
    }
}

/// Size of a memory page.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

    *PAGE_SIZE.get_or_init(|| {
        #[cfg(unix)]
        {
            // SAFETY: sysconf has no preconditions
            let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            usize::try_from(size).ok().filter(|size| size.is_power_of_two()).unwrap_or(4096)
        }
        #[cfg(not(unix))]
        {
            4096
        }
    })
}

/// Find the protection of the mapping holding `address` in a `/proc/<pid>/maps` listing.
#[must_use]
pub fn parse_maps(maps: &str, address: usize) -> Option<Protection> {
    for line in maps.lines() {
        let mut fields = line.split_whitespace();
        let (Some(range), Some(perms)) = (fields.next(), fields.next()) else {
            continue;
        };
        let Some((start, end)) = range.split_once('-') else {
            continue;
        };
        let (Ok(start), Ok(end)) = (
            usize::from_str_radix(start, 16),
            usize::from_str_radix(end, 16),
        ) else {
            continue;
        };

        if (start..end).contains(&address) {
            let mut protection = Protection::empty();
            for (flag, right) in perms.bytes().zip([
                Protection::READ,
                Protection::WRITE,
                Protection::EXECUTE,
            ]) {
                if flag != b'-' {
                    protection |= right;
                }
            }
            return Some(protection);
        }
    }

    None
}

/// The current protection of the page holding `address`.
///
/// Read from `/proc/self/maps` on Linux; elsewhere, and whenever the listing does not
/// cover the address, code pages are assumed to be [`Protection::CODE`].
#[must_use]
pub fn current_protection(address: usize) -> Protection {
    #[cfg(target_os = "linux")]
    {
        if let Some(protection) = std::fs::read_to_string("/proc/self/maps")
            .ok()
            .and_then(|maps| parse_maps(&maps, address))
        {
            return protection;
        }
    }

    let _ = address;
    Protection::CODE
}

/// Change the protection of every page overlapping `[address, address + len)`.
///
/// # Errors
/// Returns [`crate::Error::MemoryProtection`] if the kernel refuses, and
/// [`crate::Error::PlatformNotSupported`] where no protection API is available.
pub fn protect(address: usize, len: usize, protection: Protection) -> Result<()> {
    let page = page_size();
    let start = address & !(page - 1);
    let end = address
        .checked_add(len.max(1))
        .and_then(|end| end.checked_add(page - 1))
        .ok_or_else(|| Error::Impossible(format!("range 0x{address:x}+{len} overflows")))?
        & !(page - 1);

    #[cfg(unix)]
    {
        // SAFETY: changing protection does not invalidate any Rust reference; callers
        // only pass ranges of mapped code
        let result = unsafe { libc::mprotect(start as *mut libc::c_void, end - start, protection.to_native()) };
        if result != 0 {
            return Err(Error::MemoryProtection(std::io::Error::last_os_error()));
        }
        trace!("protected 0x{start:x}..0x{end:x} as {protection:?}");
        Ok(())
    }

    #[cfg(not(unix))]
    {
        let _ = (start, end, protection);
        Err(Error::PlatformNotSupported(
            "changing page protection requires a unix host".to_string(),
        ))
    }
}

/// Makes a range writable and executable while alive.
///
/// On drop the previous protection is restored, if restoring was requested.
pub struct PageGuard {
    address: usize,
    len: usize,
    restore: Option<Protection>,
}

impl PageGuard {
    /// Elevate the pages of `[address, address + len)` to read, write and execute.
    ///
    /// # Errors
    /// See [`protect`].
    pub fn unprotect(address: usize, len: usize, restore: bool) -> Result<PageGuard> {
        let previous = restore.then(|| current_protection(address));
        protect(address, len, Protection::all())?;

        Ok(PageGuard {
            address,
            len,
            restore: previous,
        })
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.restore {
            if let Err(error) = protect(self.address, self.len, previous) {
                warn!(
                    "failed to restore {previous:?} on 0x{:x}+{}: {error}",
                    self.address, self.len
                );
            }
        }
    }
}
