//! Statement and expression trees.
//!
//! The instrumenter only needs enough IR to express counter updates,
//! profiling helper calls and virtual-call rewrites, so the expression
//! set is deliberately small.

use cranelift_entity::entity_impl;
use smallvec::SmallVec;

use crate::{Block, Function};

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Expr(u32);
entity_impl!(Expr, "expr");

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Stmt(u32);
entity_impl!(Stmt, "stmt");

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Local(u32);
entity_impl!(Local, "local");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalData {
    /// Holds a GC-tracked object reference.
    pub is_gc_ref: bool,
}

/// Runtime helper functions callable from spliced IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperFunc {
    /// Records the receiver type of a virtual call into a histogram.
    ClassProfile,
    /// One-shot method-entry callback for prejitted code.
    BbtFcnEnter,
}

/// Class-profile candidate info attached to a virtual call during import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassProbe {
    pub probe_index: u32,
    pub il_offset: u32,
    pub stub_addr: usize,
}

/// A virtual (or indirect) call site.
#[derive(Debug, Clone)]
pub struct CallData {
    /// The `this` argument. Rewritten by class-profile instrumentation.
    pub receiver: Expr,
    pub is_virtual: bool,
    pub is_indirect: bool,
    /// Virtual-stub dispatch (interface call) rather than vtable dispatch.
    pub is_virtual_stub: bool,
    /// Dispatch stub address; cleared by probe bookkeeping during import
    /// and restored by the instrumenter.
    pub stub_addr: Option<usize>,
    pub probe: Option<ClassProbe>,
}

#[derive(Debug, Clone)]
pub enum ExprData {
    IntConst(i64),
    /// Embedded method-handle immediate.
    MethodHandleConst(usize),
    LocalRef(Local),
    /// 32-bit load of a profile counter at an embedded buffer address.
    CounterLoad { addr: usize },
    /// 32-bit store of `value` to a profile counter.
    CounterStore { addr: usize, value: Expr },
    Add(Expr, Expr),
    Ne(Expr, Expr),
    Assign { dst: Expr, src: Expr },
    /// Evaluate both operands in order, yield the right one.
    Comma(Expr, Expr),
    HelperCall {
        helper: HelperFunc,
        args: SmallVec<[Expr; 2]>,
    },
    /// Void conditional: when `cond` is false, evaluate `action`.
    Guard { cond: Expr, action: Expr },
    Call(CallData),
}

impl ExprData {
    fn operands(&self) -> SmallVec<[Expr; 2]> {
        match self {
            Self::IntConst(..) | Self::MethodHandleConst(..) | Self::LocalRef(..) => {
                SmallVec::new()
            }
            Self::CounterLoad { .. } => SmallVec::new(),
            Self::CounterStore { value, .. } => [*value].into_iter().collect(),
            Self::Add(lhs, rhs) | Self::Ne(lhs, rhs) | Self::Comma(lhs, rhs) => {
                [*lhs, *rhs].into_iter().collect()
            }
            Self::Assign { dst, src } => [*dst, *src].into_iter().collect(),
            Self::HelperCall { args, .. } => args.clone(),
            Self::Guard { cond, action } => [*cond, *action].into_iter().collect(),
            Self::Call(call) => [call.receiver].into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StmtData {
    pub root: Expr,
}

/// IR factory surface. Constructors mirror what the instrumenter splices
/// into the flow graph.
impl Function {
    pub fn make_expr(&mut self, data: ExprData) -> Expr {
        self.exprs.push(data)
    }

    pub fn new_int(&mut self, value: i64) -> Expr {
        self.make_expr(ExprData::IntConst(value))
    }

    pub fn new_method_handle(&mut self, imm: usize) -> Expr {
        self.make_expr(ExprData::MethodHandleConst(imm))
    }

    pub fn new_local_ref(&mut self, local: Local) -> Expr {
        self.make_expr(ExprData::LocalRef(local))
    }

    pub fn new_counter_load(&mut self, addr: usize) -> Expr {
        self.make_expr(ExprData::CounterLoad { addr })
    }

    pub fn new_counter_store(&mut self, addr: usize, value: Expr) -> Expr {
        self.make_expr(ExprData::CounterStore { addr, value })
    }

    pub fn new_add(&mut self, lhs: Expr, rhs: Expr) -> Expr {
        self.make_expr(ExprData::Add(lhs, rhs))
    }

    pub fn new_ne(&mut self, lhs: Expr, rhs: Expr) -> Expr {
        self.make_expr(ExprData::Ne(lhs, rhs))
    }

    pub fn new_assign(&mut self, dst: Expr, src: Expr) -> Expr {
        self.make_expr(ExprData::Assign { dst, src })
    }

    pub fn new_comma(&mut self, lhs: Expr, rhs: Expr) -> Expr {
        self.make_expr(ExprData::Comma(lhs, rhs))
    }

    pub fn new_helper_call(&mut self, helper: HelperFunc, args: &[Expr]) -> Expr {
        self.make_expr(ExprData::HelperCall {
            helper,
            args: args.iter().copied().collect(),
        })
    }

    pub fn new_guard(&mut self, cond: Expr, action: Expr) -> Expr {
        self.make_expr(ExprData::Guard { cond, action })
    }

    /// Allocate a temporary local of reference type.
    pub fn new_ref_temp(&mut self) -> Local {
        self.locals.push(LocalData { is_gc_ref: true })
    }

    pub fn call_data(&self, expr: Expr) -> &CallData {
        match &self.exprs[expr] {
            ExprData::Call(call) => call,
            data => panic!("expected call, found {data:?}"),
        }
    }

    pub fn call_data_mut(&mut self, expr: Expr) -> &mut CallData {
        match &mut self.exprs[expr] {
            ExprData::Call(call) => call,
            data => panic!("expected call, found {data:?}"),
        }
    }

    /// Wrap `root` in a statement at the head of `block`.
    pub fn new_stmt_at_head(&mut self, block: Block, root: Expr) -> Stmt {
        let stmt = self.stmts.push(StmtData { root });
        self.layout.prepend_stmt(stmt, block);
        stmt
    }

    /// Wrap `root` in a statement at the end of `block`.
    pub fn new_stmt_at_end(&mut self, block: Block, root: Expr) -> Stmt {
        let stmt = self.stmts.push(StmtData { root });
        self.layout.append_stmt(stmt, block);
        stmt
    }
}

/// Receives one callback per profilable virtual call found in a block.
pub trait ProbeSink {
    fn on_virtual_call(&mut self, func: &mut Function, call: Expr);
}

/// Walk every statement of `block` in pre-order and hand each virtual,
/// non-indirect call to `sink`. Calls are gathered before the sink runs,
/// so the sink may rewrite the trees it is handed.
pub fn visit_virtual_calls<S: ProbeSink>(func: &mut Function, block: Block, sink: &mut S) {
    let calls = collect_virtual_calls(func, block);
    for call in calls {
        sink.on_virtual_call(func, call);
    }
}

fn collect_virtual_calls(func: &Function, block: Block) -> Vec<Expr> {
    let mut calls = Vec::new();
    let mut stack: Vec<Expr> = Vec::new();

    for stmt in func.layout.iter_stmt(block) {
        stack.push(func.stmts[stmt].root);

        while let Some(expr) = stack.pop() {
            let data = &func.exprs[expr];
            if let ExprData::Call(call) = data {
                if call.is_virtual && !call.is_indirect {
                    calls.push(expr);
                }
            }

            // Pre-order: visit operands left to right.
            let operands = data.operands();
            stack.extend(operands.into_iter().rev());
        }
    }

    calls
}
