//! Tear-free access to the two leading bytes of a patch site.
//!
//! Threads may be executing the bytes being patched, so the first two bytes (the ones
//! an instruction fetch decodes first) must never be observed half written. Both bytes
//! are replaced with one compare-exchange on the aligned word that contains them: the
//! pointer-width word if the pair fits, otherwise the aligned 8-byte word. A pair that
//! straddles an 8-byte boundary is written with a `lock cmpxchg` on the unaligned
//! 16-bit word itself, which x86 carries out as one bus-locked operation, and read with
//! a single 16-bit load.
//!
//! Other architectures have no unaligned atomics; there a straddling pair falls back to
//! byte accesses under a global lock, which orders it against other users of this
//! module but not against instruction fetch.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
static STRADDLE_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

macro_rules! word_access {
    ($read:ident, $write:ident, $atomic:ty, $word:ty) => {
        /// # Safety
        /// `base` must be aligned, mapped and readable.
        unsafe fn $read(base: usize, shift: u32) -> u16 {
            // SAFETY: guaranteed by the caller
            let word = unsafe { &*(base as *const $atomic) };
            (word.load(Ordering::SeqCst) >> shift) as u16
        }

        /// # Safety
        /// `base` must be aligned, mapped and writable.
        unsafe fn $write(base: usize, shift: u32, value: u16) -> u16 {
            // SAFETY: guaranteed by the caller
            let word = unsafe { &*(base as *const $atomic) };
            let mask: $word = (0xFFFF as $word) << shift;
            let previous = word
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                    Some((current & !mask) | (<$word>::from(value) << shift))
                })
                .unwrap_or_else(|current| current);
            (previous >> shift) as u16
        }
    };
}

word_access!(read_usize_word, write_usize_word, AtomicUsize, usize);
word_access!(read_u64_word, write_u64_word, AtomicU64, u64);

enum Cover {
    Pointer { base: usize, shift: u32 },
    Quad { base: usize, shift: u32 },
    Straddle,
}

/// # Safety
/// `address` must be mapped, readable and writable for two bytes.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
unsafe fn swap_straddling(address: usize, value: u16) -> u16 {
    // a failed exchange loads the current value, so the first guess can be anything
    let mut expected: u16 = 0;
    loop {
        let observed: u16;
        // SAFETY: guaranteed by the caller
        unsafe {
            std::arch::asm!(
                "lock cmpxchg word ptr [{address}], {value:x}",
                address = in(reg) address,
                value = in(reg) value,
                inout("ax") expected => observed,
                options(nostack),
            );
        }
        if observed == expected {
            return observed;
        }
        expected = observed;
    }
}

/// # Safety
/// `address` must be mapped and readable for two bytes.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
unsafe fn load_straddling(address: usize) -> u16 {
    let value: u16;
    // SAFETY: guaranteed by the caller
    unsafe {
        std::arch::asm!(
            "mov {value:x}, word ptr [{address}]",
            address = in(reg) address,
            value = out(reg) value,
            options(nostack, readonly, preserves_flags),
        );
    }
    value
}

/// # Safety
/// `address` must be mapped, readable and writable for two bytes.
#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
unsafe fn swap_straddling(address: usize, value: u16) -> u16 {
    use std::sync::atomic::AtomicU8;

    let _guard = STRADDLE_LOCK.lock();
    let [low, high] = value.to_le_bytes();
    // SAFETY: guaranteed by the caller
    unsafe {
        let low = (*(address as *const AtomicU8)).swap(low, Ordering::SeqCst);
        let high = (*((address + 1) as *const AtomicU8)).swap(high, Ordering::SeqCst);
        u16::from_le_bytes([low, high])
    }
}

/// # Safety
/// `address` must be mapped and readable for two bytes.
#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
unsafe fn load_straddling(address: usize) -> u16 {
    use std::sync::atomic::AtomicU8;

    let _guard = STRADDLE_LOCK.lock();
    // SAFETY: guaranteed by the caller
    unsafe {
        let low = (*(address as *const AtomicU8)).load(Ordering::SeqCst);
        let high = (*((address + 1) as *const AtomicU8)).load(Ordering::SeqCst);
        u16::from_le_bytes([low, high])
    }
}

fn cover(address: usize) -> Cover {
    let pointer = std::mem::size_of::<usize>();
    if address % pointer <= pointer - 2 {
        let base = address & !(pointer - 1);
        return Cover::Pointer {
            base,
            shift: ((address - base) * 8) as u32,
        };
    }
    if address % 8 <= 6 {
        let base = address & !7;
        return Cover::Quad {
            base,
            shift: ((address - base) * 8) as u32,
        };
    }
    Cover::Straddle
}

/// Atomically read the two bytes at `address` (little-endian).
///
/// # Safety
/// The aligned words around `address` must be mapped and readable.
#[must_use]
pub unsafe fn read_u16(address: usize) -> u16 {
    unsafe {
        match cover(address) {
            Cover::Pointer { base, shift } => read_usize_word(base, shift),
            Cover::Quad { base, shift } => read_u64_word(base, shift),
            Cover::Straddle => load_straddling(address),
        }
    }
}

/// Atomically replace the two bytes at `address` with `value` (little-endian) and
/// return what was there before.
///
/// # Safety
/// The aligned words around `address` must be mapped, readable and writable.
pub unsafe fn write_u16(address: usize, value: u16) -> u16 {
    unsafe {
        match cover(address) {
            Cover::Pointer { base, shift } => write_usize_word(base, shift, value),
            Cover::Quad { base, shift } => write_u64_word(base, shift, value),
            Cover::Straddle => swap_straddling(address, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{
            atomic::{AtomicBool, AtomicU64},
            Arc,
        },
        thread,
    };

    #[repr(align(64))]
    struct Buffer([AtomicU64; 2]);

    impl Buffer {
        fn new() -> Self {
            Buffer([
                AtomicU64::new(0x0706_0504_0302_0100),
                AtomicU64::new(0x0F0E_0D0C_0B0A_0908),
            ])
        }

        fn base(&self) -> usize {
            self.0.as_ptr() as usize
        }

        fn bytes(&self) -> [u8; 16] {
            let mut bytes = [0; 16];
            bytes[..8].copy_from_slice(&self.0[0].load(Ordering::SeqCst).to_le_bytes());
            bytes[8..].copy_from_slice(&self.0[1].load(Ordering::SeqCst).to_le_bytes());
            bytes
        }
    }

    #[test]
    fn every_offset() {
        for offset in 0..15 {
            let buffer = Buffer::new();
            let address = buffer.base() + offset;

            let expected = u16::from_le_bytes([offset as u8, offset as u8 + 1]);
            assert_eq!(unsafe { read_u16(address) }, expected);
            assert_eq!(unsafe { write_u16(address, 0xFEEB) }, expected);
            assert_eq!(unsafe { read_u16(address) }, 0xFEEB);

            let bytes = buffer.bytes();
            for (index, byte) in bytes.iter().enumerate() {
                match index {
                    i if i == offset => assert_eq!(*byte, 0xEB),
                    i if i == offset + 1 => assert_eq!(*byte, 0xFE),
                    i => assert_eq!(*byte, i as u8, "offset {offset} clobbered byte {i}"),
                }
            }
        }
    }

    #[test]
    fn straddling_pair() {
        assert!(matches!(cover(7), Cover::Straddle));
        assert!(!matches!(cover(6), Cover::Straddle));
        assert!(matches!(cover(8), Cover::Pointer { shift: 0, .. }));
    }

    fn race_reader_against_writer(offset: usize) {
        const OLD: u16 = 0x8B48;
        const SPIN: u16 = 0xFEEB;
        const NEW: u16 = 0xB848;

        let buffer = Arc::new(Buffer::new());
        let address = buffer.base() + offset;
        unsafe { write_u16(address, OLD) };

        let done = Arc::new(AtomicBool::new(false));
        let reader = {
            let (buffer, done) = (buffer.clone(), done.clone());
            thread::spawn(move || {
                let address = buffer.base() + offset;
                let mut seen = 0;
                loop {
                    let value = unsafe { read_u16(address) };
                    assert!(matches!(value, OLD | SPIN | NEW), "torn read {value:04x}");
                    seen += 1;
                    if done.load(Ordering::SeqCst) {
                        break seen;
                    }
                }
            })
        };

        for _ in 0..10_000 {
            unsafe {
                write_u16(address, SPIN);
                write_u16(address, NEW);
                write_u16(address, OLD);
            }
        }
        done.store(true, Ordering::SeqCst);
        assert!(reader.join().unwrap() > 0);
    }

    #[test]
    fn readers_never_see_torn_values() {
        // inside one word
        race_reader_against_writer(3);
        // across the 8-byte boundary
        race_reader_against_writer(7);
    }
}
