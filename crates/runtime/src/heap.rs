//! A simple non-moving node heap with a mark-and-sweep collection.
//!
//! Allocation bumps the `nodes_in_use` counter that compiled code compares
//! against `node_limit` at GC safepoints. A collection is triggered when an
//! allocation finds the heap over its limit; roots are supplied by the
//! context (node stack, constant pool, singletons, interned symbols).

use crate::value::{
    BuiltinSxp, CloSxp, ConsSxp, EnvSxp, PromSxp, Sexp, SexpType, SymSxp, VecSxp,
    STD_VEC_DATA_OFS,
};
use crate::GlobalCell;
use std::alloc::Layout;

pub struct Heap {
    objects: Vec<(*mut u8, Layout)>,
    pub nodes_in_use: GlobalCell<u64>,
    pub node_limit: GlobalCell<u64>,
}

impl Heap {
    pub fn new(node_limit: u64) -> Heap {
        Heap {
            objects: Vec::new(),
            nodes_in_use: GlobalCell::new(0),
            node_limit: GlobalCell::new(node_limit),
        }
    }

    fn alloc_node(&mut self, ty: SexpType, size: usize) -> Sexp {
        let layout = Layout::from_size_align(size, 16).unwrap();
        let p = unsafe { std::alloc::alloc_zeroed(layout) };
        assert!(!p.is_null(), "out of system memory");
        self.objects.push((p, layout));
        self.nodes_in_use.set(self.nodes_in_use.get() + 1);
        let s = unsafe { Sexp::from_raw(p) };
        s.set_info(ty as u64);
        s
    }

    fn alloc_scalar(&mut self, ty: SexpType, payload: usize) -> Sexp {
        let s = self.alloc_node(ty, STD_VEC_DATA_OFS + payload.max(8));
        unsafe { (*(s.as_ptr() as *mut VecSxp)).length = 1 }
        s
    }

    pub fn new_int(&mut self, v: i32) -> Sexp {
        let s = self.alloc_scalar(SexpType::Int, 4);
        s.set_int_value(v);
        s
    }

    pub fn new_real(&mut self, v: f64) -> Sexp {
        let s = self.alloc_scalar(SexpType::Real, 8);
        s.set_real_value(v);
        s
    }

    pub fn new_lgl(&mut self, v: i32) -> Sexp {
        let s = self.alloc_scalar(SexpType::Lgl, 4);
        s.set_int_value(v);
        s
    }

    pub fn new_nil(&mut self) -> Sexp {
        self.alloc_node(SexpType::Nil, std::mem::size_of::<crate::value::SxpHeader>())
    }

    pub fn cons(&mut self, car: Sexp, cdr: Sexp, tag: Sexp) -> Sexp {
        let s = self.alloc_node(SexpType::List, std::mem::size_of::<ConsSxp>());
        s.set_car(car);
        s.set_cdr(cdr);
        s.set_tag(tag);
        s
    }

    pub fn new_env(&mut self, bindings: Sexp, parent: Sexp) -> Sexp {
        let s = self.alloc_node(SexpType::Env, std::mem::size_of::<EnvSxp>());
        s.set_env_bindings(bindings);
        unsafe { (*(s.as_ptr() as *mut EnvSxp)).parent = parent }
        s
    }

    pub fn new_promise(&mut self, code: u64, idx: u64, env: Sexp, value: Sexp) -> Sexp {
        let s = self.alloc_node(SexpType::Prom, std::mem::size_of::<PromSxp>());
        unsafe {
            let p = s.as_ptr() as *mut PromSxp;
            (*p).value = value;
            (*p).code = code;
            (*p).prom_idx = idx;
            (*p).env = env;
        }
        s
    }

    pub fn new_closure(&mut self, formals: Sexp, body: u64, env: Sexp) -> Sexp {
        let s = self.alloc_node(SexpType::Clo, std::mem::size_of::<CloSxp>());
        unsafe {
            let p = s.as_ptr() as *mut CloSxp;
            (*p).formals = formals;
            (*p).body = body;
            (*p).env = env;
        }
        s
    }

    pub fn new_symbol(&mut self, name_index: usize) -> Sexp {
        let s = self.alloc_node(SexpType::Sym, std::mem::size_of::<SymSxp>());
        unsafe { (*(s.as_ptr() as *mut SymSxp)).name = name_index as u64 }
        s
    }

    pub fn new_builtin(&mut self, id: u64) -> Sexp {
        let s = self.alloc_node(SexpType::Builtin, std::mem::size_of::<BuiltinSxp>());
        unsafe { (*(s.as_ptr() as *mut BuiltinSxp)).id = id }
        s
    }

    pub fn nodes_in_use_addr(&self) -> u64 {
        self.nodes_in_use.addr()
    }

    pub fn node_limit_addr(&self) -> u64 {
        self.node_limit.addr()
    }

    pub fn over_limit(&self) -> bool {
        self.nodes_in_use.get() >= self.node_limit.get()
    }

    /// Stop-the-world mark-and-sweep over the given roots.
    pub fn collect(&mut self, roots: impl IntoIterator<Item = Sexp>) {
        let _span = tracing::debug_span!("GC cycle").entered();
        tracing::debug!(nodes_in_use = self.nodes_in_use.get(), "starting GC cycle");

        let mut worklist: Vec<Sexp> = Vec::new();
        for root in roots {
            if !root.is_null() && !root.is_marked() {
                root.set_marked(true);
                worklist.push(root);
            }
        }

        let mut visit = |s: Sexp, worklist: &mut Vec<Sexp>| {
            if !s.is_null() && !s.is_marked() {
                s.set_marked(true);
                worklist.push(s);
            }
        };

        while let Some(s) = worklist.pop() {
            visit(s.attrib(), &mut worklist);
            match s.sexp_type() {
                SexpType::List => {
                    visit(s.car(), &mut worklist);
                    visit(s.cdr(), &mut worklist);
                    visit(s.tag(), &mut worklist);
                }
                SexpType::Env => {
                    visit(s.env_bindings(), &mut worklist);
                    visit(s.env_parent(), &mut worklist);
                }
                SexpType::Prom => {
                    visit(s.prom_value(), &mut worklist);
                    visit(s.prom_env(), &mut worklist);
                }
                SexpType::Clo => {
                    visit(s.clo_formals(), &mut worklist);
                    visit(s.clo_env(), &mut worklist);
                }
                _ => {}
            }
        }

        let mut freed = 0u64;
        self.objects.retain(|&(p, layout)| {
            let s = unsafe { Sexp::from_raw(p) };
            if s.is_marked() {
                s.set_marked(false);
                true
            } else {
                unsafe { std::alloc::dealloc(p, layout) };
                freed += 1;
                false
            }
        });
        self.nodes_in_use
            .set(self.nodes_in_use.get().saturating_sub(freed));

        tracing::debug!(
            nodes_in_use = self.nodes_in_use.get(),
            freed,
            "collected"
        );
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        for &(p, layout) in &self.objects {
            unsafe { std::alloc::dealloc(p, layout) };
        }
    }
}
