//! Machine code adapters in front of a [`Proxy`].
//!
//! The generated stub is deliberately dumb: it spills the argument registers of its ABI
//! and calls [`proxy_entry`], which does all the work in Rust. Argument classification
//! (which parameter arrived in which register or stack slot) happens in [`Abi::classify`],
//! boxing and unboxing through [`Value`].
//!
//! Errors cannot unwind through generated frames. A failing handler makes the adapter
//! return zero and parks the error for the calling thread, to be collected with
//! [`take_native_error`].

mod x64;
mod x86;

use std::{
    cell::RefCell,
    panic::{self, AssertUnwindSafe},
    ptr,
};

use log::{debug, trace};

use crate::{
    metadata::signatures::{ElementType, MethodSignature, ParamType},
    proxy::{memory::CodeAllocator, Proxy, Value},
    Error, Result,
};

thread_local! {
    static NATIVE_ERROR: RefCell<Option<Error>> = const { RefCell::new(None) };
}

/// Take the error raised by the last failing native adapter call on this thread.
#[must_use]
pub fn take_native_error() -> Option<Error> {
    NATIVE_ERROR.with(|slot| slot.borrow_mut().take())
}

fn park_error(error: Error) {
    trace!("native proxy call failed: {error}");
    NATIVE_ERROR.with(|slot| *slot.borrow_mut() = Some(error));
}

/// Native calling conventions an adapter can be generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abi {
    /// System V AMD64 (Linux, macOS, BSD on x86-64)
    SysV,
    /// 32-bit x86 cdecl
    Cdecl,
}

/// Where one argument of a native call is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgSlot {
    /// Index into the spilled register block
    Register(usize),
    /// Byte offset from the first stack argument, and width in bytes
    Stack {
        /// Offset from the first stack argument
        offset: usize,
        /// Width of the slot
        size: usize,
    },
}

impl Abi {
    /// The calling convention of the running process.
    ///
    /// # Errors
    /// Returns [`crate::Error::PlatformNotSupported`] on anything but x86 and x86-64
    /// unix hosts.
    pub fn host() -> Result<Abi> {
        if !cfg!(unix) {
            Err(Error::PlatformNotSupported(format!(
                "native adapters on {}",
                std::env::consts::OS
            )))
        } else if cfg!(target_arch = "x86_64") {
            Ok(Abi::SysV)
        } else if cfg!(target_arch = "x86") {
            Ok(Abi::Cdecl)
        } else {
            Err(Error::PlatformNotSupported(std::env::consts::ARCH.to_string()))
        }
    }

    /// Assign every parameter its register or stack slot.
    #[must_use]
    pub fn classify(self, params: &[ParamType]) -> Vec<ArgSlot> {
        let in_xmm = |param: &ParamType| !param.by_ref && param.element.is_float();
        let mut slots = Vec::with_capacity(params.len());

        match self {
            Abi::SysV => {
                let (mut gpr, mut xmm, mut stack) = (0, 0, 0);
                for param in params {
                    let slot = if in_xmm(param) && xmm < x64::SYSV_XMM_COUNT {
                        xmm += 1;
                        ArgSlot::Register(x64::SYSV_GPR_COUNT + xmm - 1)
                    } else if !in_xmm(param) && gpr < x64::SYSV_GPR_COUNT {
                        gpr += 1;
                        ArgSlot::Register(gpr - 1)
                    } else {
                        stack += 8;
                        ArgSlot::Stack {
                            offset: stack - 8,
                            size: 8,
                        }
                    };
                    slots.push(slot);
                }
            }
            Abi::Cdecl => {
                let mut stack = 0;
                for param in params {
                    let size = if !param.by_ref && param.element.is_wide() { 8 } else { 4 };
                    slots.push(ArgSlot::Stack {
                        offset: stack,
                        size,
                    });
                    stack += size;
                }
            }
        }

        slots
    }
}

/// A [`Proxy`] behind generated machine code.
///
/// The proxy and the code are leaked: a native adapter may be the target of a patched
/// entry point, and nothing can tell when the last call through it has returned.
pub struct NativeProxy {
    entry: usize,
    proxy: &'static Proxy,
    abi: Abi,
}

impl NativeProxy {
    /// Emit an adapter for `proxy` into executable memory.
    ///
    /// Every parameter and the return type must fit one integer or floating point
    /// slot. By-value structs are passed in several registers or in memory depending on
    /// their layout, which a signature does not describe.
    ///
    /// # Errors
    /// Returns [`crate::Error::PlatformNotSupported`] on anything but x86 and x86-64,
    /// [`crate::Error::UnsupportedMethodShape`] for by-value value type parameters or
    /// returns, and [`crate::Error::MemoryProtection`] if no executable memory can be
    /// mapped.
    pub fn generate(proxy: Proxy) -> Result<NativeProxy> {
        let abi = Abi::host()?;
        check_scalar(proxy.signature())?;
        let return_type = proxy.signature().return_type;
        let context = Box::into_raw(Box::new(proxy));
        let dispatcher = proxy_entry as *const () as usize;

        let code = match abi {
            Abi::SysV => x64::emit_sysv(context as u64, dispatcher as u64),
            Abi::Cdecl => {
                let narrow = |address: usize| {
                    u32::try_from(address)
                        .map_err(|_| Error::Impossible(format!("address 0x{address:x} exceeds 32 bits")))
                };
                match (narrow(context as usize), narrow(dispatcher)) {
                    (Ok(context), Ok(dispatcher)) => x86::emit_cdecl(context, dispatcher, return_type),
                    (Err(error), _) | (_, Err(error)) => {
                        // SAFETY: `context` came from Box::into_raw above and was never shared
                        drop(unsafe { Box::from_raw(context) });
                        return Err(error);
                    }
                }
            }
        };

        let entry = match CodeAllocator::new().and_then(|allocator| allocator.emit(&code)) {
            Ok(entry) => entry,
            Err(error) => {
                // SAFETY: the stub holding `context` was never made executable
                drop(unsafe { Box::from_raw(context) });
                return Err(error);
            }
        };

        // SAFETY: `context` is never freed from here on
        let proxy: &'static Proxy = unsafe { &*context };
        debug!(
            "generated {abi:?} proxy for {} at 0x{entry:x} ({} bytes)",
            proxy.signature(),
            code.len()
        );

        Ok(NativeProxy { entry, proxy, abi })
    }

    /// Address of the adapter's first instruction.
    #[must_use]
    pub fn entry(&self) -> usize {
        self.entry
    }

    /// The proxy the adapter forwards to.
    #[must_use]
    pub fn proxy(&self) -> &'static Proxy {
        self.proxy
    }

    /// The calling convention the adapter was generated for.
    #[must_use]
    pub fn abi(&self) -> Abi {
        self.abi
    }

    /// The adapter as a function pointer of type `F`.
    ///
    /// # Safety
    ///
    /// `F` must be an `extern "C"` function pointer type whose parameters and return
    /// type match the proxy's signature, with by-reference parameters as pointers.
    #[must_use]
    pub unsafe fn as_fn<F: Copy>(&self) -> F {
        debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<usize>());
        // SAFETY: guaranteed by the caller
        unsafe { std::mem::transmute_copy(&self.entry) }
    }
}

impl std::fmt::Debug for NativeProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeProxy")
            .field("entry", &format_args!("0x{:x}", self.entry))
            .field("abi", &self.abi)
            .field("proxy", self.proxy)
            .finish()
    }
}

fn check_scalar(signature: &MethodSignature) -> Result<()> {
    let by_value_struct =
        |param: &ParamType| !param.by_ref && param.element == ElementType::ValueType;

    if let Some(position) = signature.params.iter().position(by_value_struct) {
        return Err(Error::UnsupportedMethodShape(format!(
            "parameter {position} of {signature} is a by-value struct"
        )));
    }
    if by_value_struct(&signature.return_type) {
        return Err(Error::UnsupportedMethodShape(format!(
            "{signature} returns a struct by value"
        )));
    }
    Ok(())
}

/// The dispatcher every generated stub calls.
///
/// # Safety
///
/// Only called from generated stubs: `context` is a leaked [`Proxy`], `registers` the
/// spilled register block of the ABI (null for cdecl), `stack` the first stack argument
/// and `ret` an 8-byte return slot.
unsafe extern "C" fn proxy_entry(
    context: *const Proxy,
    registers: *const u64,
    stack: *const u8,
    ret: *mut u64,
) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: see the function contract
        unsafe { dispatch(&*context, registers, stack) }
    }));

    let bits = match outcome {
        Ok(Ok(bits)) => bits,
        Ok(Err(error)) => {
            park_error(error);
            0
        }
        Err(_) => {
            park_error(Error::Error("proxy handler panicked".to_string()));
            0
        }
    };

    // SAFETY: see the function contract
    unsafe { ret.write_unaligned(bits) };
}

unsafe fn dispatch(proxy: &Proxy, registers: *const u64, stack: *const u8) -> Result<u64> {
    let signature = proxy.signature();
    let slots = Abi::host()?.classify(&signature.params);

    let mut raw = Vec::with_capacity(slots.len());
    let mut args = Vec::with_capacity(slots.len());
    for (param, slot) in signature.params.iter().zip(&slots) {
        // SAFETY: the stub spilled every slot the classification can produce
        let bits = unsafe { read_slot(*slot, registers, stack) };
        let value = if param.by_ref {
            let storage = pointee(bits)?;
            // SAFETY: by-reference arguments point at storage of their element type
            Value::from_bits(param.element, unsafe { read_pointee(storage, param.element) })
        } else {
            Value::from_bits(param.element, bits)
        };

        raw.push(bits);
        args.push(value);
    }

    let result = proxy.invoke(&mut args)?;

    for ((param, bits), value) in signature.params.iter().zip(raw).zip(&args) {
        if param.by_ref {
            let storage = pointee(bits)?.cast_mut();
            let value = value.to_bits(param.element)?;
            // SAFETY: by-reference arguments point at storage of their element type
            unsafe { write_pointee(storage, param.element, value) };
        }
    }

    if signature.return_type.is_void() {
        Ok(0)
    } else {
        result.to_bits(signature.return_type.element)
    }
}

fn pointee(bits: u64) -> Result<*const u8> {
    let address = usize::try_from(bits)
        .map_err(|_| Error::Impossible(format!("pointer 0x{bits:x} exceeds the address space")))?;
    if address == 0 {
        return Err(Error::Error("null by-reference argument".to_string()));
    }
    Ok(address as *const u8)
}

unsafe fn read_slot(slot: ArgSlot, registers: *const u64, stack: *const u8) -> u64 {
    unsafe {
        match slot {
            ArgSlot::Register(index) => registers.add(index).read(),
            ArgSlot::Stack { offset, size: 4 } => {
                u64::from(stack.add(offset).cast::<u32>().read_unaligned())
            }
            ArgSlot::Stack { offset, .. } => stack.add(offset).cast::<u64>().read_unaligned(),
        }
    }
}

/// Width of a value of `element` in memory.
fn storage_size(element: ElementType) -> usize {
    match element {
        ElementType::Boolean | ElementType::I1 | ElementType::U1 => 1,
        ElementType::Char | ElementType::I2 | ElementType::U2 => 2,
        ElementType::I4 | ElementType::U4 | ElementType::R4 => 4,
        ElementType::I8 | ElementType::U8 | ElementType::R8 => 8,
        ElementType::Void => 0,
        _ => std::mem::size_of::<usize>(),
    }
}

unsafe fn read_pointee(storage: *const u8, element: ElementType) -> u64 {
    unsafe {
        match storage_size(element) {
            0 => 0,
            1 => u64::from(storage.read()),
            2 => u64::from(storage.cast::<u16>().read_unaligned()),
            4 => u64::from(storage.cast::<u32>().read_unaligned()),
            _ => storage.cast::<u64>().read_unaligned(),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
unsafe fn write_pointee(storage: *mut u8, element: ElementType, bits: u64) {
    unsafe {
        match storage_size(element) {
            0 => {}
            1 => storage.write(bits as u8),
            2 => storage.cast::<u16>().write_unaligned(bits as u16),
            4 => storage.cast::<u32>().write_unaligned(bits as u32),
            _ => ptr::copy_nonoverlapping(bits.to_le_bytes().as_ptr(), storage, 8),
        }
    }
}
