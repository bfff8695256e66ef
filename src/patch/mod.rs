//! Redirecting compiled entry points.
//!
//! A patch overwrites the first bytes of a compiled method with an unconditional jump
//! to a replacement. Other threads may be executing those very bytes, so the jump is
//! installed in three steps:
//!
//! 1. the leading two bytes become `EB FE` (`jmp $`), parking every thread that enters
//!    the method in a tight loop;
//! 2. after a short settle delay, which lets threads already past the leading bytes
//!    leave them, the trailing bytes of the jump are written;
//! 3. the leading two bytes are replaced with the head of the real jump, releasing the
//!    parked threads into the replacement.
//!
//! Both two-byte writes are single atomic operations ([`atomic`]), so no thread decodes
//! a torn mix of old and new bytes. The protocol is best effort: a thread suspended
//! inside the trailing bytes for longer than the settle delay is not protected. Patches
//! are permanent.
//!
//! Patches are applied one at a time across the process. Two sites may share a page,
//! and a patch restores the page protection it found when it is done; the second patch
//! must not find the first one's temporary protection.
//!
//! The encoding of the jump depends on the architecture and sits behind the
//! [`Redirector`] trait; [`redirector`] selects the one for the host once.
//!
//! # Examples
//!
//! ```rust,no_run
//! use cildetour::patch::{redirector, PatchOptions};
//!
//! # let (target, replacement) = (0usize, 0usize);
//! let redirector = redirector()?;
//! println!("{} jumps take {} bytes", redirector.architecture(), redirector.jump_size());
//!
//! // SAFETY: both addresses are entry points of compiled code
//! unsafe { redirector.patch(target, replacement, &PatchOptions::default())? };
//! # Ok::<(), cildetour::Error>(())
//! ```

pub mod atomic;
pub mod protect;
mod x64;
mod x86;

pub use x64::X64Redirector;
pub use x86::X86Redirector;

use std::{sync::OnceLock, thread, time::Duration};

use log::trace;
use parking_lot::Mutex;

use crate::{config::DetourConfig, patch::protect::PageGuard, Error, Result};

static PATCH_LOCK: Mutex<()> = Mutex::new(());

/// `jmp $`, as the little-endian value of its two bytes `EB FE`.
pub const SPIN_MARKER: u16 = 0xFEEB;

/// The first two bytes of `jmp [mem]`, as a little-endian value of `FF 25`.
pub const INDIRECT_JUMP: u16 = 0x25FF;

/// How a patch is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOptions {
    /// Time between parking entering threads and writing the rest of the jump
    pub settle_delay: Duration,
    /// Patch the target of a `jmp [mem]` stub instead of the stub itself
    pub resolve_indirection: bool,
    /// Put the previous page protection back after patching
    pub restore_protection: bool,
}

impl Default for PatchOptions {
    fn default() -> Self {
        PatchOptions {
            settle_delay: Duration::from_millis(3),
            resolve_indirection: true,
            restore_protection: true,
        }
    }
}

impl From<&DetourConfig> for PatchOptions {
    fn from(config: &DetourConfig) -> Self {
        PatchOptions {
            settle_delay: config.settle_delay,
            resolve_indirection: config.resolve_indirection,
            restore_protection: config.restore_protection,
        }
    }
}

/// Architecture specific jump encoding and patching.
pub trait Redirector: Send + Sync {
    /// Name of the architecture
    fn architecture(&self) -> &'static str;

    /// Number of bytes a jump occupies at the patch site
    fn jump_size(&self) -> usize;

    /// Encode a jump placed at `from` that transfers control to `to`.
    ///
    /// # Errors
    /// Returns an error if `to` cannot be reached from `from` with this encoding.
    fn encode_jump(&self, from: usize, to: usize) -> Result<Vec<u8>>;

    /// Follow a `jmp [mem]` stub at `target` to the code it jumps to.
    ///
    /// Returns `target` itself if it does not start with such a stub.
    ///
    /// # Safety
    /// `target` must point at readable code, and the memory operand of a stub found
    /// there must be readable.
    unsafe fn resolve_indirection(&self, target: usize) -> usize;

    /// Redirect `target` to `replacement`, returning the address actually patched.
    ///
    /// # Errors
    /// Returns [`crate::Error::MemoryProtection`] if the code pages cannot be made
    /// writable, and encoding errors of [`Redirector::encode_jump`].
    ///
    /// # Safety
    /// `target` must be the entry point of compiled code at least
    /// [`Redirector::jump_size`] bytes long that is never freed, and `replacement` must be
    /// code that can be entered with the target's calling convention. Code outside this
    /// module must not write to the site or its pages concurrently.
    unsafe fn patch(&self, target: usize, replacement: usize, options: &PatchOptions) -> Result<usize> {
        let _serial = PATCH_LOCK.lock();

        let site = if options.resolve_indirection {
            // SAFETY: guaranteed by the caller
            unsafe { self.resolve_indirection(target) }
        } else {
            target
        };
        if site != target {
            trace!("0x{target:x} is an indirect jump to 0x{site:x}");
        }

        let jump = self.encode_jump(site, replacement)?;
        if jump.len() < 2 {
            return Err(Error::Impossible(format!(
                "{} jump encodes to {} bytes",
                self.architecture(),
                jump.len()
            )));
        }

        // dropped before `_serial`, so the protection is back before the next patch
        let _guard = PageGuard::unprotect(site, jump.len(), options.restore_protection)?;

        // SAFETY: the site is writable while the guard lives, and at least jump.len() long
        unsafe {
            trace!("parking callers of 0x{site:x}");
            atomic::write_u16(site, SPIN_MARKER);

            thread::sleep(options.settle_delay);

            trace!("writing {} trailing bytes at 0x{:x}", jump.len() - 2, site + 2);
            std::ptr::copy_nonoverlapping(jump[2..].as_ptr(), (site + 2) as *mut u8, jump.len() - 2);

            atomic::write_u16(site, u16::from_le_bytes([jump[0], jump[1]]));
        }
        trace!("0x{site:x} now jumps to 0x{replacement:x}");

        Ok(site)
    }
}

/// The redirector for the host architecture.
///
/// # Errors
/// Returns [`crate::Error::PlatformNotSupported`] on anything but x86 and x86-64.
pub fn redirector() -> Result<&'static dyn Redirector> {
    static HOST: OnceLock<Option<&'static dyn Redirector>> = OnceLock::new();
    static X64: X64Redirector = X64Redirector;
    static X86: X86Redirector = X86Redirector;

    let host = HOST.get_or_init(|| -> Option<&'static dyn Redirector> {
        if cfg!(target_arch = "x86_64") {
            Some(&X64)
        } else if cfg!(target_arch = "x86") {
            Some(&X86)
        } else {
            None
        }
    });

    (*host).ok_or_else(|| Error::PlatformNotSupported(std::env::consts::ARCH.to_string()))
}

/// Returns `true` if entry points can be patched on this host.
#[must_use]
pub fn is_runtime_patch_supported() -> bool {
    redirector().is_ok() && cfg!(unix)
}

/// Redirect `target` to `replacement` with the host's redirector.
///
/// # Errors
/// Returns [`crate::Error::PlatformNotSupported`] on unsupported hosts, and see
/// [`Redirector::patch`].
///
/// # Safety
/// See [`Redirector::patch`].
pub unsafe fn runtime_patch(target: usize, replacement: usize, options: &PatchOptions) -> Result<usize> {
    let redirector = redirector()?;
    // SAFETY: guaranteed by the caller
    unsafe { redirector.patch(target, replacement, options) }
}
