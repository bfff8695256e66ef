use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, LazyLock,
};

use dashmap::DashMap;

use crate::{
    metadata::{
        method::{MethodBody, MethodDescriptor},
        resolver::{MetadataScope, RuntimeHandle, TypeRef},
        signatures::{ElementType, MethodSignature, ParamType},
    },
    proxy::memory::CodeAllocator,
    test::{Interpreter, TableScope},
};

/// `ldarg.0; ldarg.1; add; ret`
pub const ADD_BODY: [u8; 4] = [0x02, 0x03, 0x58, 0x2A];

/// Native `int32 (int32, int32)` adding its arguments, for the host calling convention.
#[cfg(target_arch = "x86_64")]
pub const NATIVE_ADD: &[u8] = &[
    0x8D, 0x04, 0x37, // lea eax, [rdi + rsi]
    0xC3, // ret
];

/// Native `int32 (int32, int32)` adding its arguments, for the host calling convention.
#[cfg(not(target_arch = "x86_64"))]
pub const NATIVE_ADD: &[u8] = &[
    0x8B, 0x44, 0x24, 0x04, // mov eax, [esp + 4]
    0x03, 0x44, 0x24, 0x08, // add eax, [esp + 8]
    0xC3, // ret
];

/// Smallest stub size that leaves room for any jump a redirector writes.
const STUB_SIZE: usize = 16;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(0x1000);
static ENGINES: LazyLock<DashMap<RuntimeHandle, Arc<Interpreter>>> = LazyLock::new(DashMap::new);

/// Copy `code` into executable memory, padded with `int3`; 0 where that is unsupported.
pub fn native_stub(code: &[u8]) -> usize {
    let mut stub = code.to_vec();
    stub.resize(stub.len().max(STUB_SIZE), 0xCC);

    CodeAllocator::new()
        .and_then(|allocator| allocator.emit(&stub))
        .unwrap_or(0)
}

/// Number of clones the engine of `method` has compiled.
pub fn compile_count(method: &MethodDescriptor) -> usize {
    ENGINES
        .get(&method.handle)
        .map_or(0, |engine| engine.compiles())
}

/// Builds [`MethodDescriptor`]s with a fresh handle and their own [`Interpreter`].
///
/// Defaults to a static, global `void ()` method whose body is `ret`.
pub struct MethodBuilder {
    name: String,
    module: Arc<dyn MetadataScope>,
    body: MethodBody,
    params: Vec<ParamType>,
    return_type: ParamType,
    declaring_type: Option<TypeRef>,
    native: Vec<u8>,
}

impl MethodBuilder {
    pub fn new(name: &str) -> Self {
        MethodBuilder {
            name: name.to_string(),
            module: Arc::new(TableScope::new()),
            body: MethodBody::new(vec![0x2A]),
            params: Vec::new(),
            return_type: ParamType::void(),
            declaring_type: None,
            native: vec![0xC3],
        }
    }

    pub fn module(mut self, module: TableScope) -> Self {
        self.module = Arc::new(module);
        self
    }

    pub fn body(mut self, body: MethodBody) -> Self {
        self.body = body;
        self
    }

    pub fn params(mut self, params: Vec<ParamType>) -> Self {
        self.params = params;
        self
    }

    pub fn returns(mut self, return_type: ParamType) -> Self {
        self.return_type = return_type;
        self
    }

    pub fn instance_of(mut self, owner: TypeRef) -> Self {
        self.declaring_type = Some(owner);
        self
    }

    /// The machine code behind the entry point.
    pub fn native(mut self, code: &[u8]) -> Self {
        self.native = code.to_vec();
        self
    }

    pub fn build(self) -> MethodDescriptor {
        let handle = RuntimeHandle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed));
        let engine = Arc::new(Interpreter::default());
        ENGINES.insert(handle, engine.clone());

        let is_static = self.declaring_type.is_none();
        let mut signature = MethodSignature::new(self.params, self.return_type);
        if !is_static {
            signature = signature.with_this();
        }

        MethodDescriptor {
            name: self.name,
            handle,
            is_static,
            declaring_type: self.declaring_type,
            module: self.module,
            signature,
            is_generic_definition: false,
            is_dynamic: false,
            body: Some(self.body),
            entry_point: native_stub(&self.native),
            engine,
        }
    }
}

/// `static int32 Add(int32, int32)` whose entry point really adds.
pub fn add_method() -> MethodDescriptor {
    let int32 = ParamType::new(ElementType::I4);
    MethodBuilder::new("Add")
        .body(MethodBody::new(ADD_BODY.to_vec()))
        .params(vec![int32, int32])
        .returns(int32)
        .native(NATIVE_ADD)
        .build()
}
