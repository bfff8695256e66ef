//! Executable memory for generated code.

use log::trace;

use crate::{patch::protect::page_size, Error, Result};

/// Hands out executable copies of generated code.
///
/// Every piece of code gets its own mapping, written while the pages are read-write and
/// then switched to read-execute, so no page is ever writable and executable at once.
/// Mappings are never released.
#[derive(Debug, Clone, Copy)]
pub struct CodeAllocator {
    page_size: usize,
}

impl CodeAllocator {
    /// An allocator for the host.
    ///
    /// # Errors
    /// Returns [`crate::Error::PlatformNotSupported`] where no memory mapping API is
    /// available.
    pub fn new() -> Result<Self> {
        if cfg!(unix) {
            Ok(CodeAllocator {
                page_size: page_size(),
            })
        } else {
            Err(Error::PlatformNotSupported(
                "executable memory requires a unix host".to_string(),
            ))
        }
    }

    /// Number of bytes mapped for `len` bytes of code.
    #[must_use]
    pub fn mapping_size(&self, len: usize) -> usize {
        len.max(1).div_ceil(self.page_size) * self.page_size
    }

    /// Copy `code` into fresh executable memory and return its address.
    ///
    /// # Errors
    /// Returns [`crate::Error::MemoryProtection`] if mapping or protecting fails.
    pub fn emit(&self, code: &[u8]) -> Result<usize> {
        let len = self.mapping_size(code.len());

        #[cfg(unix)]
        {
            // SAFETY: an anonymous private mapping aliases no existing memory
            let mapping = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                    -1,
                    0,
                )
            };
            if mapping == libc::MAP_FAILED {
                return Err(Error::MemoryProtection(std::io::Error::last_os_error()));
            }

            // SAFETY: the mapping is at least code.len() bytes and writable
            unsafe {
                std::ptr::copy_nonoverlapping(code.as_ptr(), mapping.cast::<u8>(), code.len());
            }

            // SAFETY: the mapping was created above and is exactly `len` bytes
            if unsafe { libc::mprotect(mapping, len, libc::PROT_READ | libc::PROT_EXEC) } != 0 {
                let error = std::io::Error::last_os_error();
                // SAFETY: nothing refers to the mapping yet
                unsafe { libc::munmap(mapping, len) };
                return Err(Error::MemoryProtection(error));
            }

            trace!("mapped {} bytes of code at {mapping:p}", code.len());
            Ok(mapping as usize)
        }

        #[cfg(not(unix))]
        {
            let _ = (code, len);
            Err(Error::PlatformNotSupported(
                "executable memory requires a unix host".to_string(),
            ))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn emits_code() {
        let allocator = CodeAllocator::new().unwrap();
        assert_eq!(allocator.mapping_size(0), page_size());
        assert_eq!(allocator.mapping_size(page_size() + 1), 2 * page_size());

        let code = [0x90, 0x90, 0xC3];
        let address = allocator.emit(&code).unwrap();
        assert_eq!(address % page_size(), 0);

        // SAFETY: the mapping is readable and holds the copied code
        let copied = unsafe { std::slice::from_raw_parts(address as *const u8, code.len()) };
        assert_eq!(copied, code);
    }
}
