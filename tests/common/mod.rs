//! Fixtures shared by the integration tests: a table-backed scope, an interpreter for
//! the arithmetic subset of CIL and a descriptor factory with real native entry points.
#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use cildetour::{prelude::*, proxy::memory::CodeAllocator};

/// `ldarg.0; ldarg.1; add; ret`
pub const ADD_BODY: [u8; 4] = [0x02, 0x03, 0x58, 0x2A];

#[cfg(target_arch = "x86_64")]
const NATIVE_ADD: &[u8] = &[0x8D, 0x04, 0x37, 0xC3]; // lea eax, [rdi + rsi]; ret

#[cfg(not(target_arch = "x86_64"))]
const NATIVE_ADD: &[u8] = &[0x8B, 0x44, 0x24, 0x04, 0x03, 0x44, 0x24, 0x08, 0xC3];

/// The host calling convention's view of `int32 Add(int32, int32)`.
pub type AddFn = extern "C" fn(i32, i32) -> i32;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(0x10_0000);

/// Shared record of what ran, in order.
pub type CallLog = Arc<Mutex<Vec<&'static str>>>;

#[derive(Default)]
pub struct TableScope {
    pub members: HashMap<Token, Member>,
    pub strings: HashMap<Token, String>,
    pub signatures: HashMap<Token, Vec<u8>>,
}

impl MetadataScope for TableScope {
    fn resolve_member(&self, token: Token) -> Result<Member> {
        self.members.get(&token).cloned().ok_or(Error::UnresolvedToken(token))
    }

    fn resolve_string(&self, token: Token) -> Result<String> {
        self.strings.get(&token).cloned().ok_or(Error::UnresolvedToken(token))
    }

    fn resolve_signature(&self, token: Token) -> Result<Vec<u8>> {
        self.signatures.get(&token).cloned().ok_or(Error::UnresolvedToken(token))
    }
}

/// Runs `ldarg.N`, `ldc.i4.N`, `add`, `mul` and `ret`, recording each invocation.
#[derive(Default)]
pub struct ArithmeticEngine {
    pub compiles: AtomicUsize,
    pub invocations: Arc<AtomicUsize>,
    pub log: Option<CallLog>,
}

impl ArithmeticEngine {
    pub fn with_log(log: CallLog) -> Self {
        ArithmeticEngine {
            log: Some(log),
            ..ArithmeticEngine::default()
        }
    }
}

impl ExecutionEngine for ArithmeticEngine {
    fn compile(&self, method: Arc<ClonedMethod>) -> Result<Arc<dyn Invoke>> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        let program = decode_stream(&mut Parser::new(&method.code))?;
        let invocations = self.invocations.clone();
        let log = self.log.clone();

        Ok(Arc::new(move |args: &mut [Value]| -> Result<Value> {
            invocations.fetch_add(1, Ordering::SeqCst);
            if let Some(log) = &log {
                log.lock().unwrap().push("original");
            }

            let mut stack: Vec<i64> = Vec::new();
            for instruction in &program {
                match instruction.opcode {
                    0x02..=0x05 => {
                        let arg = &args[usize::from(instruction.opcode - 0x02)];
                        stack.push(arg.as_i64().ok_or_else(|| {
                            Error::Error(format!("argument {arg} is not an integer"))
                        })?);
                    }
                    0x15..=0x1E => stack.push(i64::from(instruction.opcode) - 0x16),
                    0x58 | 0x5A => {
                        let (right, left) = (stack.pop(), stack.pop());
                        let (Some(left), Some(right)) = (left, right) else {
                            return Err(Error::Error("stack underflow".into()));
                        };
                        stack.push(if instruction.opcode == 0x58 {
                            left + right
                        } else {
                            left * right
                        });
                    }
                    0x2A => return Ok(Value::I4(stack.pop().unwrap_or_default() as i32)),
                    _ => return Err(Error::Error(format!("cannot run {instruction}"))),
                }
            }
            Err(Error::Error("missing ret".into()))
        }))
    }
}

/// Route the crate's log output to the test harness.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Copy `code` into executable memory, padded so any jump fits.
pub fn native_stub(code: &[u8]) -> Result<usize> {
    let mut stub = code.to_vec();
    stub.resize(32, 0xCC);
    CodeAllocator::new()?.emit(&stub)
}

/// `static int32 Add(int32, int32)` backed by `engine`, with a native entry point that
/// really adds.
pub fn add_method(engine: Arc<ArithmeticEngine>) -> Result<MethodDescriptor> {
    let int32 = ParamType::new(ElementType::I4);
    Ok(MethodDescriptor {
        name: "Add".into(),
        handle: RuntimeHandle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed)),
        is_static: true,
        declaring_type: Some(TypeRef::new(0x42, "Calculator")),
        module: Arc::new(TableScope::default()),
        signature: MethodSignature::new(vec![int32, int32], int32),
        is_generic_definition: false,
        is_dynamic: false,
        body: Some(MethodBody::new(ADD_BODY.to_vec())),
        entry_point: native_stub(NATIVE_ADD)?,
        engine,
    })
}

/// The entry point of `method` as a callable function.
pub fn native_add(method: &MethodDescriptor) -> AddFn {
    // SAFETY: every descriptor built here has an `int32 (int32, int32)` entry point
    unsafe { std::mem::transmute::<usize, AddFn>(method.entry_point) }
}
