//! Intercepting calls to compiled methods.
//!
//! A [`MethodDetour`] takes over one compiled method. Installing it clones the method's
//! body into a fresh scope, has the method's execution engine compile the clone,
//! generates a native proxy that forwards every call to [`MethodDetour::handle_call`],
//! and finally patches the method's entry point to jump to that proxy. From then on each
//! call runs through three phases of hooks:
//!
//! 1. **before-call** hooks, in registration order. The first one that returns
//!    [`BeforeCallResult::prevent`] ends the call early; its value skips straight to the
//!    after-call phase.
//! 2. **chain** hooks, most recently registered first. Each receives a [`ChainNext`]
//!    handle for the rest of the chain, which ends in the clone of the original. Without
//!    chain hooks the clone is called directly.
//! 3. **after-call** hooks, in registration order, each seeing and replacing the result.
//!
//! Detours are permanent and unique per method: asking for the detour of an already
//! detoured method returns the existing one.
//!
//! Errors raised by hooks or by the clone are returned from
//! [`MethodDetour::handle_call`] unchanged. A caller that enters through the patched
//! native entry point cannot receive them: it gets the zero value of the return type,
//! and the error is parked for its thread until [`crate::proxy::take_native_error`]
//! collects it.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cildetour::detour::{BeforeCallResult, ChainNext};
//! use cildetour::proxy::Value;
//! use cildetour::MethodDetour;
//! # fn descriptor() -> cildetour::MethodDescriptor { unimplemented!() }
//!
//! let detour = MethodDetour::detour(&descriptor())?;
//!
//! detour.add_before_call(Arc::new(|_receiver, args: &mut [Value]| {
//!     println!("called with {args:?}");
//!     Ok(BeforeCallResult::proceed())
//! }));
//! detour.add_chain_call(Arc::new(|next: &ChainNext, receiver, args: &mut [Value]| {
//!     let sum = next.call(receiver, args)?;
//!     Ok(Value::I4(sum.as_i64().unwrap_or_default() as i32 + 1))
//! }));
//! # Ok::<(), cildetour::Error>(())
//! ```

pub mod chain;
mod hooks;

pub use chain::ChainNext;
pub use hooks::{AfterCallHook, BeforeCallHook, BeforeCallResult, ChainCallHook, HookChain};

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, LazyLock, OnceLock, Weak},
};

use log::{debug, trace};
use parking_lot::{RwLock, RwLockUpgradableReadGuard};

use crate::{
    cloner::{clone_method, ClonedMethod},
    config::DetourConfig,
    metadata::{
        method::MethodDescriptor, resolver::RuntimeHandle, signatures::MethodSignature,
    },
    patch::{self, PatchOptions},
    proxy::{NativeProxy, Proxy, ProxyHandler, Value},
    runtime::Invoke,
    Error, Result,
};

/// Every detour installed in this process, by the handle of its target.
static DETOURS: LazyLock<RwLock<HashMap<RuntimeHandle, Arc<MethodDetour>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// The interception of one compiled method.
pub struct MethodDetour {
    target: MethodDescriptor,
    cloned: Arc<ClonedMethod>,
    compiled: Arc<dyn Invoke>,
    native: NativeProxy,
    hooks: HookChain,
}

impl MethodDetour {
    /// Detour `method` with the default [`DetourConfig`].
    ///
    /// Calls through the patched entry point cannot fail. When a hook or the clone
    /// returns an error, the native caller receives zero and the error is kept for the
    /// calling thread; collect it with [`crate::proxy::take_native_error`] before the
    /// next failing call on that thread replaces it.
    ///
    /// # Errors
    /// See [`MethodDetour::detour_with`].
    pub fn detour(method: &MethodDescriptor) -> Result<Arc<MethodDetour>> {
        Self::detour_with(method, &DetourConfig::default())
    }

    /// Detour `method`, or return its existing detour.
    ///
    /// Concurrent requests for the same method all receive the same detour; the method
    /// is cloned, compiled and patched exactly once. `config` only matters for the
    /// request that installs the detour.
    ///
    /// The entry point of `method` is overwritten. It must be the address of compiled
    /// code that stays mapped for the lifetime of the process; this is what the host
    /// vouches for by handing out the descriptor.
    ///
    /// Must not be called from within an [`crate::runtime::ExecutionEngine`] while it
    /// compiles a clone.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::PlatformNotSupported`] on hosts that cannot be patched
    /// - [`crate::Error::UnsupportedMethodShape`] for methods that cannot be cloned or
    ///   proxied, or have no entry point
    /// - Cloning errors (see [`crate::cloner::clone_method`]) and errors of the engine
    /// - [`crate::Error::MemoryProtection`] if the proxy or the patch cannot be written
    pub fn detour_with(method: &MethodDescriptor, config: &DetourConfig) -> Result<Arc<MethodDetour>> {
        if let Some(existing) = Self::find(method.handle) {
            return Ok(existing);
        }

        match Self::install(method, config) {
            Err(Error::AlreadyDetoured(handle)) => Self::find(handle).ok_or_else(|| {
                Error::Impossible(format!("detour of {handle} vanished from the registry"))
            }),
            result => result,
        }
    }

    /// The detour installed on the method with `handle`, if any.
    #[must_use]
    pub fn find(handle: RuntimeHandle) -> Option<Arc<MethodDetour>> {
        DETOURS.read().get(&handle).cloned()
    }

    fn install(method: &MethodDescriptor, config: &DetourConfig) -> Result<Arc<MethodDetour>> {
        let redirector = patch::redirector()?;

        method.ensure_cloneable()?;
        if method.signature.return_type.by_ref {
            return Err(Error::UnsupportedMethodShape(format!(
                "{method}: by-reference return type {}",
                method.signature.return_type
            )));
        }
        if method.entry_point == 0 {
            return Err(Error::UnsupportedMethodShape(format!(
                "{method}: no compiled entry point"
            )));
        }

        let detours = DETOURS.upgradable_read();
        if detours.contains_key(&method.handle) {
            return Err(Error::AlreadyDetoured(method.handle));
        }

        let cloned = Arc::new(clone_method(method)?);
        let compiled = method.engine.compile(cloned.clone())?;

        let slot: Arc<OnceLock<Weak<MethodDetour>>> = Arc::default();
        let handler: ProxyHandler = {
            let slot = slot.clone();
            Arc::new(move |receiver: Option<&Value>, args: &mut [Value]| {
                let detour = slot.get().and_then(Weak::upgrade).ok_or_else(|| {
                    Error::Impossible("proxy called before its detour was registered".into())
                })?;
                detour.handle_call(receiver, args)
            })
        };

        let proxy = if method.is_instance() {
            let signature = MethodSignature::new(
                method.flattened_params()?,
                method.signature.return_type,
            );
            Proxy::this_call(signature, handler)?
        } else {
            Proxy::static_call(method.signature.clone(), handler)?
        };
        let native = NativeProxy::generate(proxy)?;

        let detour = Arc::new(MethodDetour {
            target: method.clone(),
            cloned,
            compiled,
            native,
            hooks: HookChain::default(),
        });
        // the slot is fresh, nothing else can have filled it
        let _ = slot.set(Arc::downgrade(&detour));

        // SAFETY: the entry point is compiled code of the host (see `detour_with`), the
        // proxy follows the native calling convention of the target's signature, and the
        // upgradable lock keeps other detours of this method from patching concurrently
        let site = unsafe {
            redirector.patch(
                method.entry_point,
                detour.native.entry(),
                &PatchOptions::from(config),
            )?
        };
        debug!(
            "detoured {method}: 0x{site:x} -> proxy 0x{:x}",
            detour.native.entry()
        );

        let mut detours = RwLockUpgradableReadGuard::upgrade(detours);
        detours.insert(method.handle, detour.clone());
        Ok(detour)
    }

    /// The detoured method.
    #[must_use]
    pub fn target(&self) -> &MethodDescriptor {
        &self.target
    }

    /// The clone of the original body.
    #[must_use]
    pub fn cloned(&self) -> &Arc<ClonedMethod> {
        &self.cloned
    }

    /// The compiled clone, taking the flattened arguments (receiver first).
    #[must_use]
    pub fn cloned_callable(&self) -> Arc<dyn Invoke> {
        self.compiled.clone()
    }

    /// A proxy with `signature` in front of the compiled clone.
    ///
    /// The signature has to spell out the receiver of instance methods as its first
    /// parameter.
    ///
    /// # Errors
    /// Returns [`crate::Error::ArgumentCount`] if the signature does not take one argument
    /// per flattened parameter of the clone, and the errors of [`Proxy::static_call`].
    pub fn wrap_cloned_as(&self, signature: MethodSignature) -> Result<Proxy> {
        let expected = self.cloned.params.len();
        if signature.params.len() != expected {
            return Err(Error::ArgumentCount {
                expected,
                found: signature.params.len(),
            });
        }

        let compiled = self.compiled.clone();
        Proxy::static_call(
            signature,
            Arc::new(move |_receiver: Option<&Value>, args: &mut [Value]| compiled.invoke(args)),
        )
    }

    /// Call the clone of the original, bypassing all hooks.
    ///
    /// # Errors
    /// Returns whatever the compiled clone returns.
    pub fn invoke_cloned(&self, receiver: Option<&Value>, args: &mut [Value]) -> Result<Value> {
        invoke_original(
            self.compiled.as_ref(),
            self.target.is_instance(),
            receiver,
            args,
        )
    }

    /// The installed hooks.
    #[must_use]
    pub fn hooks(&self) -> &HookChain {
        &self.hooks
    }

    /// Run `hook` before every call.
    pub fn add_before_call(&self, hook: BeforeCallHook) {
        self.hooks.add_before(hook);
    }

    /// Stop running the most recent addition of `hook`.
    pub fn remove_before_call(&self, hook: &BeforeCallHook) -> bool {
        self.hooks.remove_before(hook)
    }

    /// Wrap every call in `hook`; adding an installed hook again does nothing.
    pub fn add_chain_call(&self, hook: ChainCallHook) -> bool {
        self.hooks.add_chain(hook)
    }

    /// Stop wrapping calls in `hook`.
    pub fn remove_chain_call(&self, hook: &ChainCallHook) -> bool {
        self.hooks.remove_chain(hook)
    }

    /// Run `hook` after every call.
    pub fn add_after_call(&self, hook: AfterCallHook) {
        self.hooks.add_after(hook);
    }

    /// Stop running the most recent addition of `hook`.
    pub fn remove_after_call(&self, hook: &AfterCallHook) -> bool {
        self.hooks.remove_after(hook)
    }

    /// Run one call through the hooks; this is what the proxy of the detour calls.
    ///
    /// `args` holds the declared parameters without the receiver. Changes hooks or the
    /// original make to by-reference slots are visible to the caller.
    ///
    /// # Errors
    /// Errors of hooks and of the original are propagated unchanged.
    pub fn handle_call(&self, receiver: Option<&Value>, args: &mut [Value]) -> Result<Value> {
        let mut prevented = None;
        for (index, hook) in self.hooks.before().iter().enumerate() {
            let outcome = hook(receiver, args)?;
            if outcome.prevent {
                trace!("{}: before-call hook {index} prevented the call", self.target);
                prevented = Some(outcome.value);
                break;
            }
        }

        let mut result = match prevented {
            Some(value) => value,
            None => {
                let chain = self.hooks.chain();
                if chain.is_empty() {
                    trace!("{}: calling the original", self.target);
                    self.invoke_cloned(receiver, args)?
                } else {
                    trace!("{}: entering {} chain hooks", self.target, chain.len());
                    chain::run(
                        chain,
                        self.compiled.clone(),
                        self.target.is_instance(),
                        receiver,
                        args,
                    )?
                }
            }
        };

        let after = self.hooks.after();
        if !after.is_empty() {
            trace!("{}: running {} after-call hooks", self.target, after.len());
        }
        for hook in after.iter() {
            result = hook(result, receiver, args)?;
        }

        Ok(result)
    }

    /// Address of the native proxy the target's entry point now jumps to.
    #[must_use]
    pub fn proxy_entry(&self) -> usize {
        self.native.entry()
    }
}

impl fmt::Debug for MethodDetour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDetour")
            .field("target", &self.target.to_string())
            .field("handle", &self.target.handle)
            .field("cloned", &self.cloned)
            .field("proxy_entry", &format_args!("0x{:x}", self.native.entry()))
            .finish_non_exhaustive()
    }
}

/// Call a compiled clone, prepending the receiver for instance methods and copying the
/// declared arguments back afterwards.
pub(crate) fn invoke_original(
    original: &dyn Invoke,
    has_receiver: bool,
    receiver: Option<&Value>,
    args: &mut [Value],
) -> Result<Value> {
    if !has_receiver {
        return original.invoke(args);
    }

    let mut flattened = Vec::with_capacity(args.len() + 1);
    flattened.push(receiver.cloned().unwrap_or_default());
    flattened.extend_from_slice(args);

    let result = original.invoke(&mut flattened)?;
    for (slot, value) in args.iter_mut().zip(flattened.into_iter().skip(1)) {
        *slot = value;
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn original_with_receiver() {
        let original = |args: &mut [Value]| -> Result<Value> {
            // receiver, then the declared argument, which is overwritten
            let receiver = args[0].clone();
            args[1] = Value::I4(7);
            Ok(receiver)
        };

        let mut args = [Value::I4(1)];
        let result = invoke_original(&original, true, Some(&Value::Ref(0x10)), &mut args).unwrap();
        assert_eq!(result, Value::Ref(0x10));
        assert_eq!(args, [Value::I4(7)]);

        let result = invoke_original(&original, true, None, &mut args).unwrap();
        assert_eq!(result, Value::Null);
    }

    #[test]
    fn original_without_receiver() {
        let original = |args: &mut [Value]| -> Result<Value> { Ok(Value::I4(args.len() as i32)) };
        let result = invoke_original(&original, false, Some(&Value::Ref(1)), &mut [Value::Null]).unwrap();
        assert_eq!(result, Value::I4(1));
    }

    #[cfg(all(unix, any(target_arch = "x86", target_arch = "x86_64")))]
    mod live {
        use super::*;
        use crate::{
            metadata::signatures::{ElementType, ParamType},
            test::{add_method, MethodBuilder, ADD_BODY},
        };
        use std::{sync::Barrier, thread};

        fn record(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) {
            log.lock().unwrap().push(name);
        }

        #[test]
        fn hook_order() {
            let method = add_method();
            let detour = MethodDetour::detour_with(&method, &DetourConfig::immediate()).unwrap();
            let log = Arc::new(Mutex::new(Vec::new()));

            for name in ["a", "b"] {
                let log = log.clone();
                detour.add_before_call(Arc::new(move |_receiver, _args: &mut [Value]| {
                    record(&log, name);
                    Ok(BeforeCallResult::proceed())
                }));
            }
            for name in ["x", "y"] {
                let log = log.clone();
                detour.add_chain_call(Arc::new(move |next: &ChainNext, receiver, args: &mut [Value]| {
                    record(&log, name);
                    next.call(receiver, args)
                }));
            }
            for name in ["c", "d"] {
                let log = log.clone();
                detour.add_after_call(Arc::new(move |result, _receiver, _args: &mut [Value]| {
                    record(&log, name);
                    Ok(result)
                }));
            }

            let result = detour.handle_call(None, &mut [Value::I4(2), Value::I4(3)]).unwrap();
            assert_eq!(result, Value::I4(5));
            assert_eq!(*log.lock().unwrap(), ["a", "b", "y", "x", "c", "d"]);
        }

        #[test]
        fn prevent_skips_chain_and_original() {
            let method = add_method();
            let detour = MethodDetour::detour_with(&method, &DetourConfig::immediate()).unwrap();
            let chained = Arc::new(Mutex::new(0));

            detour.add_before_call(Arc::new(|_receiver, _args: &mut [Value]| {
                Ok(BeforeCallResult::prevent(40))
            }));
            detour.add_before_call(Arc::new(|_receiver, _args: &mut [Value]| {
                panic!("runs after a prevent")
            }));
            {
                let chained = chained.clone();
                detour.add_chain_call(Arc::new(move |next: &ChainNext, receiver, args: &mut [Value]| {
                    *chained.lock().unwrap() += 1;
                    next.call(receiver, args)
                }));
            }
            detour.add_after_call(Arc::new(|result: Value, _receiver, _args: &mut [Value]| {
                Ok(Value::I4(result.as_i64().unwrap_or_default() as i32 + 2))
            }));

            let result = detour.handle_call(None, &mut [Value::I4(2), Value::I4(3)]).unwrap();
            assert_eq!(result, Value::I4(42));
            assert_eq!(*chained.lock().unwrap(), 0);
        }

        #[test]
        fn hook_errors_propagate() {
            let detour = MethodDetour::detour_with(&add_method(), &DetourConfig::immediate()).unwrap();
            detour.add_after_call(Arc::new(|_result, _receiver, _args: &mut [Value]| {
                Err(Error::hook("rejected"))
            }));

            let error = detour.handle_call(None, &mut [Value::I4(2), Value::I4(3)]).unwrap_err();
            assert!(matches!(error, Error::Hook(_)));
            assert_eq!(error.to_string(), "rejected");
        }

        #[test]
        fn one_detour_per_method() {
            let method = add_method();
            let barrier = Arc::new(Barrier::new(8));

            let detours: Vec<Arc<MethodDetour>> = (0..8)
                .map(|_| {
                    let method = method.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        MethodDetour::detour_with(&method, &DetourConfig::immediate()).unwrap()
                    })
                })
                .collect::<Vec<_>>()
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .collect();

            assert!(detours.iter().all(|detour| Arc::ptr_eq(detour, &detours[0])));
            assert!(Arc::ptr_eq(&MethodDetour::find(method.handle).unwrap(), &detours[0]));
            assert_eq!(crate::test::compile_count(&method), 1);
        }

        #[test]
        fn native_entry_runs_the_hooks() {
            let method = add_method();
            let detour = MethodDetour::detour(&method).unwrap();
            detour.add_before_call(Arc::new(|_receiver, _args: &mut [Value]| {
                Ok(BeforeCallResult::proceed())
            }));
            detour.add_chain_call(Arc::new(|next: &ChainNext, receiver, args: &mut [Value]| {
                let sum = next.call(receiver, args)?;
                Ok(Value::I4(sum.as_i64().unwrap_or_default() as i32 + 1))
            }));

            // SAFETY: the entry point takes two int32 and returns an int32
            let add: extern "C" fn(i32, i32) -> i32 = unsafe { std::mem::transmute(method.entry_point) };
            assert_eq!(add(2, 3), 6);

            // the proxy behaves the same when called directly
            // SAFETY: as above
            let proxy: extern "C" fn(i32, i32) -> i32 =
                unsafe { std::mem::transmute(detour.proxy_entry()) };
            assert_eq!(proxy(10, 20), 31);
        }

        #[test]
        fn cloned_access() {
            let method = add_method();
            let detour = MethodDetour::detour_with(&method, &DetourConfig::immediate()).unwrap();
            detour.add_chain_call(Arc::new(|_next: &ChainNext, _receiver, _args: &mut [Value]| {
                Ok(Value::I4(0))
            }));

            assert_eq!(detour.cloned().code, ADD_BODY);
            assert_eq!(detour.target().handle, method.handle);
            assert_eq!(
                detour.invoke_cloned(None, &mut [Value::I4(4), Value::I4(5)]).unwrap(),
                Value::I4(9)
            );
            assert_eq!(
                detour.cloned_callable().invoke(&mut [Value::I4(1), Value::I4(1)]).unwrap(),
                Value::I4(2)
            );

            let int32 = ParamType::new(ElementType::I4);
            let proxy = detour
                .wrap_cloned_as(MethodSignature::new(vec![int32, int32], int32))
                .unwrap();
            assert_eq!(proxy.invoke(&mut [Value::I4(6), Value::I4(7)]).unwrap(), Value::I4(13));
            assert!(matches!(
                detour.wrap_cloned_as(MethodSignature::new(vec![int32], int32)),
                Err(Error::ArgumentCount { expected: 2, found: 1 })
            ));
        }

        #[test]
        fn refused_before_patching() {
            let mut method = add_method();
            method.is_dynamic = true;
            assert!(matches!(
                MethodDetour::detour(&method),
                Err(Error::UnsupportedMethodShape(_))
            ));

            let mut method = add_method();
            method.signature.return_type = ParamType::by_ref(ElementType::I4);
            assert!(matches!(
                MethodDetour::detour(&method),
                Err(Error::UnsupportedMethodShape(_))
            ));

            let mut method = add_method();
            method.entry_point = 0;
            assert!(MethodDetour::detour(&method).is_err());

            assert!(MethodDetour::find(method.handle).is_none());
            assert_eq!(crate::test::compile_count(&method), 0);
        }

        #[test]
        fn instance_method_receives_receiver() {
            // ldarg.0 ; ret
            let method = MethodBuilder::new("Self")
                .instance_of(crate::metadata::resolver::TypeRef::new(0x77, "Widget"))
                .body(crate::metadata::method::MethodBody::new(vec![0x02, 0x2A]))
                .params(Vec::new())
                .returns(ParamType::new(ElementType::Object))
                .build();
            let detour = MethodDetour::detour_with(&method, &DetourConfig::immediate()).unwrap();

            let seen = Arc::new(Mutex::new(None));
            {
                let seen = seen.clone();
                detour.add_before_call(Arc::new(move |receiver: Option<&Value>, _args: &mut [Value]| {
                    *seen.lock().unwrap() = receiver.cloned();
                    Ok(BeforeCallResult::proceed())
                }));
            }

            let result = detour.handle_call(Some(&Value::Ref(0xBEEF)), &mut []).unwrap();
            assert_eq!(result, Value::Ref(0xBEEF));
            assert_eq!(*seen.lock().unwrap(), Some(Value::Ref(0xBEEF)));
        }
    }
}
