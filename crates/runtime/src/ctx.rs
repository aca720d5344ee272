//! The runtime context: constant pool, symbols, singletons, node stack and
//! the installable host hooks.

use crate::{
    cell::GlobalCell,
    error::Error,
    heap::Heap,
    stack::NodeStack,
    value::{Sexp, SexpType},
};
use compact_str::CompactString;
use rustc_hash::FxHashMap;
use std::cell::Cell;

/// Process-wide sentinel values, allocated once per runtime instance and
/// compared by identity.
#[derive(Copy, Clone, Debug)]
pub struct Singletons {
    pub true_v: Sexp,
    pub false_v: Sexp,
    pub na_lgl: Sexp,
    pub nil: Sexp,
    pub missing_arg: Sexp,
    pub unbound_value: Sexp,
    pub global_env: Sexp,
}

/// Append-only store of boxed constants referenced by compiled code. Inserted
/// constants are permanently rooted. The base pointer is republished on every
/// insert; compiled code reloads it through `base_addr` at function entry.
#[derive(Default)]
pub struct ConstantPool {
    items: Vec<Sexp>,
    base: GlobalCell<u64>,
}

impl ConstantPool {
    pub fn insert(&mut self, s: Sexp) -> u32 {
        let idx = self.items.len() as u32;
        self.items.push(s);
        self.base.set(self.items.as_ptr() as u64);
        idx
    }

    pub fn get(&self, idx: u32) -> Sexp {
        self.items[idx as usize]
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Address of the cell holding the pool base pointer.
    pub fn base_addr(&self) -> u64 {
        self.base.addr()
    }

    pub fn iter(&self) -> impl Iterator<Item = Sexp> + '_ {
        self.items.iter().copied()
    }
}

/// A host-language builtin function callable through `call_builtin`.
pub struct HostBuiltin {
    pub name: &'static str,
    pub fun: fn(&mut Ctx, &[Sexp]) -> Result<Sexp, Error>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DeoptFrame {
    pub code: u32,
    pub pc: u32,
    pub stack_size: u32,
    pub in_promise: bool,
}

/// The frame list handed back to the interpreter, in stack order (innermost
/// frame first).
#[derive(Debug)]
pub struct DeoptMetadata {
    pub frames: Vec<DeoptFrame>,
}

pub struct DeoptEvent<'a> {
    pub meta: &'a DeoptMetadata,
    pub args: Vec<Sexp>,
}

pub type DeoptHandler = Box<dyn FnMut(&mut Ctx, &DeoptEvent) -> Sexp>;
pub type PromiseEval = Box<dyn FnMut(&mut Ctx, u64, u32, Sexp) -> Sexp>;
/// Plain function pointer so closure calls can recurse through it.
pub type CallHook = fn(&mut Ctx, Sexp, &[Sexp], Sexp) -> Sexp;
pub type OptimizeHook = fn(Sexp) -> Sexp;

pub struct Ctx {
    pub heap: Heap,
    pub pool: ConstantPool,
    pub stack: NodeStack,
    /// The host visibility flag; compiled code stores 0/1 directly.
    pub visible: GlobalCell<i32>,
    pub singletons: Singletons,
    symbols: FxHashMap<CompactString, Sexp>,
    sym_names: Vec<CompactString>,
    r_builtins: Vec<HostBuiltin>,
    builtin_values: FxHashMap<u32, Sexp>,
    deopt_metas: Vec<Box<DeoptMetadata>>,
    pub deopt_handler: Option<DeoptHandler>,
    pub promise_eval: Option<PromiseEval>,
    pub call_hook: Option<CallHook>,
    pub optimize_hook: Option<OptimizeHook>,
}

thread_local! {
    static CURRENT: Cell<*mut Ctx> = const { Cell::new(std::ptr::null_mut()) };
}

impl Ctx {
    /// The context is boxed so the addresses of its cells stay valid for the
    /// whole runtime lifetime; compiled code embeds them as constants.
    pub fn new(node_limit: u64, stack_capacity: usize) -> Box<Ctx> {
        let mut heap = Heap::new(node_limit);

        let nil = heap.new_nil();
        let true_v = heap.new_lgl(1);
        let false_v = heap.new_lgl(0);
        let na_lgl = heap.new_lgl(crate::value::NA_LOGICAL);
        let missing_arg = heap.new_symbol(0);
        let unbound_value = heap.new_symbol(1);
        let global_env = heap.new_env(nil, Sexp::null());

        let singletons = Singletons {
            true_v,
            false_v,
            na_lgl,
            nil,
            missing_arg,
            unbound_value,
            global_env,
        };

        Box::new(Ctx {
            heap,
            pool: ConstantPool::default(),
            stack: NodeStack::new(stack_capacity),
            visible: GlobalCell::new(1),
            singletons,
            symbols: FxHashMap::default(),
            sym_names: vec![CompactString::from(""), CompactString::from("")],
            r_builtins: Vec::new(),
            builtin_values: FxHashMap::default(),
            deopt_metas: Vec::new(),
            deopt_handler: None,
            promise_eval: None,
            call_hook: None,
            optimize_hook: None,
        })
    }

    /// Install this context as the current one for the duration of `f`.
    /// Builtin entry points called from compiled code find it there.
    pub fn enter<R>(&mut self, f: impl FnOnce(&mut Ctx) -> R) -> R {
        struct Reset(*mut Ctx);
        impl Drop for Reset {
            fn drop(&mut self) {
                CURRENT.with(|c| c.set(self.0));
            }
        }
        let previous = CURRENT.with(|c| c.replace(self as *mut Ctx));
        let _reset = Reset(previous);
        f(self)
    }

    /// # Safety
    /// Only callable below an active `enter`, and the caller must not hold
    /// any other reference into the context.
    pub(crate) unsafe fn current<'a>() -> &'a mut Ctx {
        let p = CURRENT.with(|c| c.get());
        assert!(!p.is_null(), "no runtime context installed");
        unsafe { &mut *p }
    }

    pub fn intern(&mut self, name: &str) -> Sexp {
        if let Some(&s) = self.symbols.get(name) {
            return s;
        }
        let idx = self.sym_names.len();
        self.sym_names.push(CompactString::from(name));
        let s = self.heap.new_symbol(idx);
        self.symbols.insert(CompactString::from(name), s);
        s
    }

    pub fn sym_name(&self, sym: Sexp) -> &str {
        &self.sym_names[sym.sym_name_index()]
    }

    pub fn register_builtin(&mut self, b: HostBuiltin) -> u32 {
        self.r_builtins.push(b);
        self.r_builtins.len() as u32 - 1
    }

    pub fn builtin(&self, id: u32) -> &HostBuiltin {
        &self.r_builtins[id as usize]
    }

    /// The boxed value representing a host builtin, allocated on first use.
    pub fn builtin_value(&mut self, id: u32) -> Sexp {
        if let Some(&s) = self.builtin_values.get(&id) {
            return s;
        }
        let s = self.heap.new_builtin(id as u64);
        self.builtin_values.insert(id, s);
        s
    }

    /// Register a deopt frame list; its address is embedded in compiled code
    /// and stays valid for the lifetime of the context.
    pub fn add_deopt_metadata(&mut self, meta: DeoptMetadata) -> *const DeoptMetadata {
        self.deopt_metas.push(Box::new(meta));
        &*self.deopt_metas[self.deopt_metas.len() - 1] as *const DeoptMetadata
    }

    /// Run a GC cycle with the context's roots plus any extra ones.
    pub fn collect_garbage(&mut self, extra_roots: &[Sexp]) {
        let mut roots: Vec<Sexp> = Vec::new();
        let s = &self.singletons;
        roots.extend([
            s.true_v,
            s.false_v,
            s.na_lgl,
            s.nil,
            s.missing_arg,
            s.unbound_value,
            s.global_env,
        ]);
        roots.extend(self.pool.iter());
        roots.extend(self.symbols.values().copied());
        roots.extend(self.builtin_values.values().copied());
        roots.extend(self.stack.live_values());
        roots.extend(extra_roots.iter().copied());
        self.heap.collect(roots);
    }

    // ---- environment operations shared by the builtins ----

    /// The binding cell for `sym` in exactly `env`, not its parents.
    pub fn local_binding(&self, env: Sexp, sym: Sexp) -> Option<Sexp> {
        debug_assert_eq!(env.sexp_type(), SexpType::Env);
        let mut cell = env.env_bindings();
        while !cell.is_null() && cell.sexp_type() == SexpType::List {
            if cell.tag() == sym {
                return Some(cell);
            }
            cell = cell.cdr();
        }
        None
    }

    /// The binding cell for `sym`, searching the parent chain.
    pub fn lookup_binding(&self, mut env: Sexp, sym: Sexp) -> Option<Sexp> {
        while !env.is_null() {
            if let Some(cell) = self.local_binding(env, sym) {
                return Some(cell);
            }
            env = env.env_parent();
        }
        None
    }

    /// Set or create a binding in exactly `env`.
    pub fn define_binding(&mut self, env: Sexp, sym: Sexp, val: Sexp) {
        if let Some(cell) = self.local_binding(env, sym) {
            cell.set_car(val);
            return;
        }
        let head = env.env_bindings();
        let cell = self.heap.cons(val, head, sym);
        env.set_env_bindings(cell);
    }
}
