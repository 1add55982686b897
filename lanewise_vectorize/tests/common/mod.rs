//! Kernels and an interpreter harness shared by the integration tests.

#![allow(dead_code)]

use lanewise_ir::{
    BinaryOp, Builder, CastOp, CmpOp, Function, InstKind, InterpResult, Interpreter, Memory,
    ParamAttrs, ScalarType, Type, Val, ValueId,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// =============================================================================
// Harness
// =============================================================================

/// Run `func` once per lane group over `items` work items.
///
/// Every buffer is passed as an `i32` array parameter, followed by `extra`.
/// `get_global_id` returns the first work item of the group, all other calls
/// go to `calls`. Returns the final buffer contents.
pub fn run_groups(
    func: &Function,
    items: i64,
    group: i64,
    buffers: &[Vec<i32>],
    extra: &[Val],
    calls: &mut dyn FnMut(&str, &[Val]) -> Option<Val>,
) -> Vec<Vec<i32>> {
    let mut mem = Memory::new();
    let addrs: Vec<u64> = buffers.iter().map(|b| mem.alloc_i32s(b)).collect();
    let mut args: Vec<Val> = addrs.iter().map(|&a| Val::Ptr(a)).collect();
    args.extend_from_slice(extra);

    let mut base = 0;
    while base < items {
        let mut env = |name: &str, call_args: &[Val], _: &mut Memory| -> InterpResult<Option<Val>> {
            match name {
                "get_global_id" => Ok(Some(Val::I64(base))),
                "barrier" => Ok(None),
                other => Ok(calls(other, call_args)),
            }
        };
        Interpreter::new(func)
            .run(&args, &mut mem, &mut env)
            .expect("kernel runs");
        base += group;
    }
    addrs
        .iter()
        .zip(buffers)
        .map(|(&a, b)| mem.read_i32s(a, b.len()).expect("readable"))
        .collect()
}

/// Calls shared by the kernels below.
pub fn standard_calls(name: &str, args: &[Val]) -> Option<Val> {
    match name {
        "complex_call" => Some(Val::I32((args[0].as_i64() * 3 + 1) as i32)),
        "abs" => Some(Val::I32(args[0].as_i64().abs() as i32)),
        other => panic!("unexpected call {}", other),
    }
}

pub fn count(func: &Function, pred: impl Fn(&InstKind) -> bool) -> usize {
    func.insts_in_order()
        .into_iter()
        .filter(|&i| pred(&func.inst(i).kind))
        .count()
}

/// Number of live instructions of `kind` that produce a vector.
pub fn count_vector(func: &Function, pred: impl Fn(&InstKind) -> bool) -> usize {
    func.insts_in_order()
        .into_iter()
        .filter(|&i| pred(&func.inst(i).kind))
        .filter(|&i| {
            func.inst_result(i)
                .is_some_and(|r| func.value_ty(r).as_vector().is_some())
        })
        .count()
}

pub fn calls_to(func: &Function, name: &str) -> usize {
    count(func, |k| matches!(k, InstKind::Call { callee, .. } if callee == name))
}

fn global_id(b: &mut Builder<'_>) -> ValueId {
    let zero = b.const_int(ScalarType::I32, 0);
    b.call_value("get_global_id", &[zero], Type::I64)
}

// =============================================================================
// Kernels
// =============================================================================

/// `out[gid] = in[gid] > 0 ? in[gid] : 0`
pub fn relu() -> Function {
    let mut func = Function::new("relu", Type::VOID);
    let input = func.add_param("in", Type::PTR, ParamAttrs::NOALIAS);
    let out = func.add_param("out", Type::PTR, ParamAttrs::NOALIAS);
    let entry = func.add_block("entry");
    let mut b = Builder::at_end(&mut func, entry);
    let gid = global_id(&mut b);
    let zero = b.const_int(ScalarType::I32, 0);
    let p = b.element_ptr(input, gid, ScalarType::I32);
    let x = b.load(Type::I32, p, None, 4);
    let c = b.cmp(CmpOp::Sgt, x, zero);
    let r = b.select(c, x, zero);
    let q = b.element_ptr(out, gid, ScalarType::I32);
    b.store(q, r, None, 4);
    b.ret(None);
    func
}

/// `x = gid % 2 == 0 ? complex_call(gid) : 0; out[gid] = x`, as a branch.
pub fn branchy_call() -> Function {
    let mut func = Function::new("branchy_call", Type::VOID);
    let out = func.add_param("out", Type::PTR, ParamAttrs::NOALIAS);
    let entry = func.add_block("entry");
    let then_b = func.add_block("then");
    let else_b = func.add_block("else");
    let join = func.add_block("join");

    let mut b = Builder::at_end(&mut func, entry);
    let gid = global_id(&mut b);
    let two = b.const_int(ScalarType::I64, 2);
    let zero = b.const_int(ScalarType::I64, 0);
    let rem = b.binary(BinaryOp::SRem, gid, two);
    let even = b.cmp(CmpOp::Eq, rem, zero);
    b.cond_br(even, then_b, else_b);

    let mut b = Builder::at_end(&mut func, then_b);
    let x = b.call_value("complex_call", &[gid], Type::I32);
    b.br(join);

    let mut b = Builder::at_end(&mut func, else_b);
    let none = b.const_int(ScalarType::I32, 0);
    b.br(join);

    let mut b = Builder::at_end(&mut func, join);
    let merged = b.phi(Type::I32, &[(then_b, x), (else_b, none)]);
    let p = b.element_ptr(out, gid, ScalarType::I32);
    b.store(p, merged, None, 4);
    b.ret(None);
    func
}

/// `out[2 gid] = gid; out[2 gid + 1] = gid * gid`, optionally with a barrier
/// between the two stores.
pub fn spread(with_barrier: bool) -> Function {
    let mut func = Function::new("spread", Type::VOID);
    let out = func.add_param("out", Type::PTR, ParamAttrs::NOALIAS);
    let entry = func.add_block("entry");
    let mut b = Builder::at_end(&mut func, entry);
    let gid = global_id(&mut b);
    let one = b.const_int(ScalarType::I64, 1);
    let two = b.const_int(ScalarType::I64, 2);
    let even = b.mul(gid, two);
    let odd = b.add(even, one);
    let v = b.cast(CastOp::Trunc, gid, ScalarType::I32);
    let sq = b.mul(v, v);
    let p0 = b.element_ptr(out, even, ScalarType::I32);
    b.store(p0, v, None, 4);
    if with_barrier {
        let flags = b.const_int(ScalarType::I32, 1);
        b.call("barrier", &[flags], None, Type::VOID);
    }
    let p1 = b.element_ptr(out, odd, ScalarType::I32);
    b.store(p1, sq, None, 4);
    b.ret(None);
    func
}

/// `if (gid < 2) out[gid] = gid + 10; else out[gid] = 100 / gid;`
pub fn guarded_division() -> Function {
    let mut func = Function::new("guarded_division", Type::VOID);
    let out = func.add_param("out", Type::PTR, ParamAttrs::NOALIAS);
    let entry = func.add_block("entry");
    let then_b = func.add_block("then");
    let else_b = func.add_block("else");
    let join = func.add_block("join");

    let mut b = Builder::at_end(&mut func, entry);
    let gid64 = global_id(&mut b);
    let gid = b.cast(CastOp::Trunc, gid64, ScalarType::I32);
    let two = b.const_int(ScalarType::I32, 2);
    let c = b.cmp(CmpOp::Slt, gid, two);
    let p = b.element_ptr(out, gid64, ScalarType::I32);
    b.cond_br(c, then_b, else_b);

    let mut b = Builder::at_end(&mut func, then_b);
    let ten = b.const_int(ScalarType::I32, 10);
    let a = b.add(gid, ten);
    b.store(p, a, None, 4);
    b.br(join);

    let mut b = Builder::at_end(&mut func, else_b);
    let hundred = b.const_int(ScalarType::I32, 100);
    let q = b.binary(BinaryOp::SDiv, hundred, gid);
    b.store(p, q, None, 4);
    b.br(join);

    Builder::at_end(&mut func, join).ret(None);
    func
}

/// `out[gid] = table[idx[gid]]`
pub fn lookup() -> Function {
    let mut func = Function::new("lookup", Type::VOID);
    let table = func.add_param("table", Type::PTR, ParamAttrs::NOALIAS);
    let idx = func.add_param("idx", Type::PTR, ParamAttrs::NOALIAS);
    let out = func.add_param("out", Type::PTR, ParamAttrs::NOALIAS);
    let entry = func.add_block("entry");
    let mut b = Builder::at_end(&mut func, entry);
    let gid = global_id(&mut b);
    let pi = b.element_ptr(idx, gid, ScalarType::I32);
    let i = b.load(Type::I32, pi, None, 4);
    let pt = b.element_ptr(table, i, ScalarType::I32);
    let x = b.load(Type::I32, pt, None, 4);
    let q = b.element_ptr(out, gid, ScalarType::I32);
    b.store(q, x, None, 4);
    b.ret(None);
    func
}

/// `out[gid] = abs(in[gid])`
pub fn absolute() -> Function {
    let mut func = Function::new("absolute", Type::VOID);
    let input = func.add_param("in", Type::PTR, ParamAttrs::NOALIAS);
    let out = func.add_param("out", Type::PTR, ParamAttrs::NOALIAS);
    let entry = func.add_block("entry");
    let mut b = Builder::at_end(&mut func, entry);
    let gid = global_id(&mut b);
    let p = b.element_ptr(input, gid, ScalarType::I32);
    let x = b.load(Type::I32, p, None, 4);
    let y = b.call_value("abs", &[x], Type::I32);
    let q = b.element_ptr(out, gid, ScalarType::I32);
    b.store(q, y, None, 4);
    b.ret(None);
    func
}

/// `acc = 0; for i in 0..n { acc += gid + i }; out[gid] = acc`
pub fn accumulate() -> Function {
    let mut func = Function::new("accumulate", Type::VOID);
    let out = func.add_param("out", Type::PTR, ParamAttrs::NOALIAS);
    let n = func.add_param("n", Type::I32, ParamAttrs::empty());
    let entry = func.add_block("entry");
    let header = func.add_block("header");
    let body = func.add_block("body");
    let exit = func.add_block("exit");

    let mut b = Builder::at_end(&mut func, entry);
    let gid64 = global_id(&mut b);
    let gid = b.cast(CastOp::Trunc, gid64, ScalarType::I32);
    let zero = b.const_int(ScalarType::I32, 0);
    let one = b.const_int(ScalarType::I32, 1);
    b.br(header);

    let mut b = Builder::at_end(&mut func, header);
    let i = b.phi(Type::I32, &[(entry, zero)]);
    let acc = b.phi(Type::I32, &[(entry, zero)]);
    let c = b.cmp(CmpOp::Slt, i, n);
    b.cond_br(c, body, exit);

    let mut b = Builder::at_end(&mut func, body);
    let t = b.add(gid, i);
    let acc2 = b.add(acc, t);
    let i2 = b.add(i, one);
    b.br(header);

    let mut b = Builder::at_end(&mut func, exit);
    let p = b.element_ptr(out, gid64, ScalarType::I32);
    b.store(p, acc, None, 4);
    b.ret(None);

    for (phi, next) in [(i, i2), (acc, acc2)] {
        let inst = func.def_inst(phi).expect("phi");
        if let InstKind::Phi { incoming } = &mut func.inst_mut(inst).kind {
            incoming.push((body, next));
        }
    }
    func
}

/// Multi-way branch on the work-item id.
pub fn switch_on_id() -> Function {
    let mut func = Function::new("switch_on_id", Type::VOID);
    let out = func.add_param("out", Type::PTR, ParamAttrs::NOALIAS);
    let entry = func.add_block("entry");
    let a = func.add_block("a");
    let exit = func.add_block("exit");
    let mut b = Builder::at_end(&mut func, entry);
    let gid = global_id(&mut b);
    b.switch(gid, vec![(0, a), (1, a)], exit);
    let mut b = Builder::at_end(&mut func, a);
    let seven = b.const_int(ScalarType::I32, 7);
    b.store(out, seven, None, 4);
    b.br(exit);
    Builder::at_end(&mut func, exit).ret(None);
    func
}

/// `i = 0; do { i += 1 } while (i < gid); out[gid] = i`
pub fn divergent_loop() -> Function {
    let mut func = Function::new("divergent_loop", Type::VOID);
    let out = func.add_param("out", Type::PTR, ParamAttrs::NOALIAS);
    let entry = func.add_block("entry");
    let header = func.add_block("header");
    let exit = func.add_block("exit");
    let mut b = Builder::at_end(&mut func, entry);
    let gid64 = global_id(&mut b);
    let gid = b.cast(CastOp::Trunc, gid64, ScalarType::I32);
    let zero = b.const_int(ScalarType::I32, 0);
    b.br(header);
    let mut b = Builder::at_end(&mut func, header);
    let i = b.phi(Type::I32, &[(entry, zero)]);
    let one = b.const_int(ScalarType::I32, 1);
    let next = b.add(i, one);
    let c = b.cmp(CmpOp::Slt, next, gid);
    b.cond_br(c, header, exit);
    let mut b = Builder::at_end(&mut func, exit);
    let p = b.element_ptr(out, gid64, ScalarType::I32);
    b.store(p, next, None, 4);
    b.ret(None);
    let phi = func.def_inst(i).expect("phi");
    if let InstKind::Phi { incoming } = &mut func.inst_mut(phi).kind {
        incoming.push((header, next));
    }
    func
}
