//! Onion-style chain calls.
//!
//! When a call enters the chain, a frame holding the chain hooks of that moment is
//! pushed onto a thread-local stack. The [`ChainNext`] handles given to the hooks only
//! remember the position of their frame and hook; every step looks the frame up again.
//! A hook that calls back into the detoured method pushes a frame of its own, so
//! re-entrant calls each follow their own snapshot, and the frame is popped when the
//! outer call returns, fails or unwinds.

use std::{cell::RefCell, marker::PhantomData, rc::Rc, sync::Arc};

use log::trace;

use crate::{
    detour::{hooks::ChainCallHook, invoke_original},
    proxy::Value,
    runtime::Invoke,
    Error, Result,
};

struct ChainFrame {
    hooks: Arc<[ChainCallHook]>,
    original: Arc<dyn Invoke>,
    has_receiver: bool,
}

thread_local! {
    static FRAMES: RefCell<Vec<Rc<ChainFrame>>> = const { RefCell::new(Vec::new()) };
}

/// Number of chain calls in progress on the current thread.
#[must_use]
pub fn depth() -> usize {
    FRAMES.with(|frames| frames.borrow().len())
}

struct FrameGuard {
    depth: usize,
}

impl FrameGuard {
    fn push(frame: ChainFrame) -> Self {
        FRAMES.with(|frames| {
            let mut frames = frames.borrow_mut();
            frames.push(Rc::new(frame));
            FrameGuard {
                depth: frames.len() - 1,
            }
        })
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        FRAMES.with(|frames| frames.borrow_mut().truncate(self.depth));
    }
}

/// The rest of the chain, as seen from one chain hook.
///
/// Calling it runs the next older chain hook, or the original method once every hook
/// has been passed. A hook may call it any number of times, or not at all. The handle is
/// bound to the thread and the call it was created for.
pub struct ChainNext {
    depth: usize,
    remaining: usize,
    _thread_bound: PhantomData<Rc<()>>,
}

impl ChainNext {
    /// Invoke the rest of the chain.
    ///
    /// # Errors
    /// Returns whatever the next hook or the original returns, and
    /// [`crate::Error::Impossible`] if used after its call has completed.
    pub fn call(&self, receiver: Option<&Value>, args: &mut [Value]) -> Result<Value> {
        let frame = FRAMES
            .with(|frames| frames.borrow().get(self.depth).cloned())
            .ok_or_else(|| Error::Impossible("chain handle used after its call returned".into()))?;

        match self.remaining.checked_sub(1) {
            Some(index) => {
                trace!("chain hook {index} at depth {}", self.depth);
                let next = ChainNext {
                    depth: self.depth,
                    remaining: index,
                    _thread_bound: PhantomData,
                };
                (frame.hooks[index])(&next, receiver, args)
            }
            None => invoke_original(frame.original.as_ref(), frame.has_receiver, receiver, args),
        }
    }

    /// Returns `true` if calling this handle runs the original rather than another hook.
    #[must_use]
    pub fn is_original(&self) -> bool {
        self.remaining == 0
    }
}

/// Run `hooks` around `original`, most recently registered outermost.
pub(crate) fn run(
    hooks: Arc<[ChainCallHook]>,
    original: Arc<dyn Invoke>,
    has_receiver: bool,
    receiver: Option<&Value>,
    args: &mut [Value],
) -> Result<Value> {
    let remaining = hooks.len();
    let guard = FrameGuard::push(ChainFrame {
        hooks,
        original,
        has_receiver,
    });

    let entry = ChainNext {
        depth: guard.depth,
        remaining,
        _thread_bound: PhantomData,
    };
    entry.call(receiver, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn original() -> Arc<dyn Invoke> {
        Arc::new(|args: &mut [Value]| -> Result<Value> { Ok(Value::I4(args.len() as i32)) })
    }

    #[test]
    fn onion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hook = |name: &'static str| -> ChainCallHook {
            let log = log.clone();
            Arc::new(move |next: &ChainNext, receiver, args: &mut [Value]| {
                log.lock().unwrap().push(name);
                next.call(receiver, args)
            })
        };

        let hooks: Arc<[ChainCallHook]> = vec![hook("x"), hook("y")].into();
        let result = run(hooks, original(), false, None, &mut [Value::Null]).unwrap();

        assert_eq!(result, Value::I4(1));
        assert_eq!(*log.lock().unwrap(), ["y", "x"]);
        assert_eq!(depth(), 0);
    }

    #[test]
    fn short_circuit_and_receiver() {
        let skip: ChainCallHook = Arc::new(|next: &ChainNext, _receiver, _args: &mut [Value]| {
            assert!(next.is_original());
            Ok(Value::I4(-1))
        });
        let result = run(vec![skip].into(), original(), true, None, &mut []).unwrap();
        assert_eq!(result, Value::I4(-1));

        // the receiver is passed to the original as its first argument
        let pass: ChainCallHook =
            Arc::new(|next: &ChainNext, receiver, args: &mut [Value]| next.call(receiver, args));
        let result = run(
            vec![pass].into(),
            original(),
            true,
            Some(&Value::Ref(1)),
            &mut [Value::I4(0)],
        )
        .unwrap();
        assert_eq!(result, Value::I4(2));
    }

    #[test]
    fn nested_frames() {
        let inner: ChainCallHook = Arc::new(|next: &ChainNext, receiver, args: &mut [Value]| {
            assert_eq!(depth(), 2);
            next.call(receiver, args)
        });
        let outer: ChainCallHook = Arc::new(move |next: &ChainNext, receiver, args: &mut [Value]| {
            assert_eq!(depth(), 1);
            let nested = run(vec![inner.clone()].into(), original(), false, None, &mut [])?;
            assert_eq!(nested, Value::I4(0));
            assert_eq!(depth(), 1);
            next.call(receiver, args)
        });

        let result = run(vec![outer].into(), original(), false, None, &mut [Value::Null]).unwrap();
        assert_eq!(result, Value::I4(1));
        assert_eq!(depth(), 0);
    }

    #[test]
    fn errors_pop_the_frame() {
        let failing: ChainCallHook =
            Arc::new(|_next: &ChainNext, _receiver, _args: &mut [Value]| Err(Error::hook("nope")));
        let result = run(vec![failing].into(), original(), false, None, &mut []);

        assert_eq!(result.unwrap_err().to_string(), "nope");
        assert_eq!(depth(), 0);
    }
}
