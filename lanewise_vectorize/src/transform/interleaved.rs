//! Interleaved access combining.
//!
//! Strided accesses produced by packetization often come in complete groups:
//! `S` accesses with stride `S` whose start addresses are consecutive
//! elements. Together they cover one contiguous span of `S × N` elements, so
//! they can be replaced by a single wide access and shuffles.
//!
//! # Example
//!
//! ```text
//! %a = interleaved_load <4 x i32>, %p,     stride 2
//! %b = interleaved_load <4 x i32>, %p + 1, stride 2
//!
//! =>
//!
//! %w = load <8 x i32>, %p
//! %a = shuffle %w, <0, 2, 4, 6>
//! %b = shuffle %w, <1, 3, 5, 7>
//! ```
//!
//! # Legality
//!
//! Loads move up to the first member of the group and stores sink to the last
//! one. No instruction in between may synchronize the lane group or touch
//! memory that may alias the group's accesses in a conflicting way.

use crate::analysis::address::{
    access_root, constant_distance, memory_root, roots_may_alias, MemRoot,
};
use crate::builtins::{classify_call, BuiltinInfo, BuiltinKind};
use lanewise_ir::{
    BlockId, Builder, Function, InsertPoint, InstId, InstKind, ScalarType, Type, ValueId,
};
use log::debug;
use rustc_hash::FxHashMap;

/// Candidate strided access.
#[derive(Debug, Clone, Copy)]
struct Access {
    inst: InstId,
    position: usize,
    ptr: ValueId,
    elem: ScalarType,
    stride: i64,
    lanes: u32,
    is_store: bool,
}

/// A complete interleave group, ordered by element offset.
#[derive(Debug)]
struct Group {
    members: Vec<(Access, i64)>,
    stride: i64,
    lanes: u32,
    elem: ScalarType,
    is_store: bool,
}

impl Group {
    fn first(&self) -> Access {
        self.by_position().0
    }

    fn last(&self) -> Access {
        self.by_position().1
    }

    fn by_position(&self) -> (Access, Access) {
        let mut first = self.members[0].0;
        let mut last = first;
        for &(access, _) in &self.members {
            if access.position < first.position {
                first = access;
            }
            if access.position > last.position {
                last = access;
            }
        }
        (first, last)
    }

    fn offset_of(&self, inst: InstId) -> i64 {
        self.members
            .iter()
            .find(|(a, _)| a.inst == inst)
            .map_or(0, |&(_, off)| off)
    }
}

/// Merge complete interleave groups into wide accesses. Returns the number of
/// groups merged.
pub fn combine_interleaved(func: &mut Function, builtins: &dyn BuiltinInfo) -> usize {
    let mut merged = 0;
    for block in func.layout.clone() {
        while let Some(group) = find_group(func, builtins, block) {
            debug!(
                "merging {} {} accesses of stride {} in @{}",
                group.members.len(),
                if group.is_store { "store" } else { "load" },
                group.stride,
                func.name
            );
            if group.is_store {
                merge_stores(func, &group);
            } else {
                merge_loads(func, &group);
            }
            merged += 1;
        }
    }
    merged
}

fn candidates(func: &Function, block: BlockId) -> Vec<Access> {
    let mut out = Vec::new();
    for (position, &inst) in func.block_insts(block).iter().enumerate() {
        let (ptr, stride, data_ty, is_store) = match &func.inst(inst).kind {
            InstKind::InterleavedLoad {
                ptr,
                stride,
                mask: None,
            } => match func.inst_result(inst) {
                Some(r) => (*ptr, *stride, func.value_ty(r), false),
                None => continue,
            },
            InstKind::InterleavedStore {
                ptr,
                value,
                stride,
                mask: None,
            } => (*ptr, *stride, func.value_ty(*value), true),
            _ => continue,
        };
        let lanes = data_ty.as_vector().and_then(|_| data_ty.fixed_lanes());
        let (Some(elem), Some(lanes)) = (data_ty.element(), lanes) else {
            continue;
        };
        if stride < 2 {
            continue;
        }
        out.push(Access {
            inst,
            position,
            ptr,
            elem,
            stride,
            lanes,
            is_store,
        });
    }
    out
}

fn find_group(func: &Function, builtins: &dyn BuiltinInfo, block: BlockId) -> Option<Group> {
    let accesses = candidates(func, block);
    let mut buckets: FxHashMap<(bool, ScalarType, i64, u32), Vec<Access>> = FxHashMap::default();
    for &a in &accesses {
        buckets.entry((a.is_store, a.elem, a.stride, a.lanes)).or_default().push(a);
    }
    // Deterministic: try buckets in the order of their first access.
    let mut keys: Vec<_> = buckets.keys().copied().collect();
    keys.sort_by_key(|k| buckets[k][0].position);

    for key in keys {
        let bucket = &buckets[&key];
        let (is_store, elem, stride, lanes) = key;
        if bucket.len() < stride as usize {
            continue;
        }
        for anchor in bucket {
            let Some(members) = cluster(func, anchor, bucket, elem, stride) else {
                continue;
            };
            let group = Group {
                members,
                stride,
                lanes,
                elem,
                is_store,
            };
            if is_legal(func, builtins, block, &group) {
                return Some(group);
            }
        }
    }
    None
}

/// Members at element offsets `0..stride` relative to the lowest one.
fn cluster(
    func: &Function,
    anchor: &Access,
    bucket: &[Access],
    elem: ScalarType,
    stride: i64,
) -> Option<Vec<(Access, i64)>> {
    let size = elem.size_bytes() as i64;
    let mut found: Vec<(Access, i64)> = Vec::new();
    for &a in bucket {
        let Some(bytes) = constant_distance(func, anchor.ptr, a.ptr) else {
            continue;
        };
        if bytes % size != 0 {
            continue;
        }
        let offset = bytes / size;
        if offset.abs() >= stride {
            continue;
        }
        found.push((a, offset));
    }
    let min = found.iter().map(|&(_, off)| off).min()?;
    for entry in &mut found {
        entry.1 -= min;
    }
    found.retain(|&(_, off)| off < stride);
    found.sort_by_key(|&(a, off)| (off, a.position));
    let complete = found.len() == stride as usize
        && found.iter().enumerate().all(|(k, &(_, off))| off == k as i64);
    complete.then_some(found)
}

fn is_legal(func: &Function, builtins: &dyn BuiltinInfo, block: BlockId, group: &Group) -> bool {
    let (first, last) = group.by_position();
    let root = memory_root(func, first.ptr);
    let insts = func.block_insts(block);
    for &inst in &insts[first.position..=last.position] {
        if group.members.iter().any(|(a, _)| a.inst == inst) {
            continue;
        }
        let kind = &func.inst(inst).kind;
        if let InstKind::Call { .. } = kind {
            match classify_call(builtins, func, inst) {
                Some(
                    BuiltinKind::Pure
                    | BuiltinKind::GroupInvariant
                    | BuiltinKind::LaneIdentity { .. },
                ) => continue,
                _ => return false,
            }
        }
        let conflicts = if group.is_store {
            kind.may_read_memory() || kind.may_write_memory()
        } else {
            kind.may_write_memory()
        };
        if conflicts {
            let other = access_root(func, inst).unwrap_or(MemRoot::Unknown);
            if roots_may_alias(func, other, root) {
                return false;
            }
        }
    }
    true
}

/// Base pointer of the whole span, derived from `from`.
fn span_base(b: &mut Builder<'_>, from: ValueId, offset: i64, elem: ScalarType) -> ValueId {
    if offset == 0 {
        return from;
    }
    let delta = b.const_int(ScalarType::I64, -offset);
    b.element_ptr(from, delta, elem)
}

fn merge_loads(func: &mut Function, group: &Group) {
    let first = group.first();
    let first_offset = group.offset_of(first.inst);
    let stride = group.stride as u32;
    let wide_ty = Type::vector(group.elem, stride * group.lanes);
    let align = group.elem.size_bytes();
    let wide = {
        let mut b = Builder::new(func, InsertPoint::Before(first.inst));
        let base = span_base(&mut b, first.ptr, first_offset, group.elem);
        b.load(wide_ty, base, None, align)
    };
    for &(access, offset) in &group.members {
        let mask = (0..group.lanes).map(|l| l * stride + offset as u32).collect();
        let part = Builder::new(func, InsertPoint::Before(access.inst)).shuffle(&[wide], mask);
        if let Some(old) = func.inst_result(access.inst) {
            func.replace_all_uses(old, part);
        }
        func.remove_inst(access.inst);
    }
}

fn merge_stores(func: &mut Function, group: &Group) {
    let last = group.last();
    let last_offset = group.offset_of(last.inst);
    let stride = group.stride as u32;
    let lanes = group.lanes;
    let values: Vec<ValueId> = group
        .members
        .iter()
        .filter_map(|(a, _)| match func.inst(a.inst).kind {
            InstKind::InterleavedStore { value, .. } => Some(value),
            _ => None,
        })
        .collect();
    let align = group.elem.size_bytes();
    {
        let mut b = Builder::new(func, InsertPoint::Before(last.inst));
        let base = span_base(&mut b, last.ptr, last_offset, group.elem);
        let mask = (0..stride * lanes).map(|e| (e % stride) * lanes + e / stride).collect();
        let wide = b.shuffle(&values, mask);
        b.store(base, wide, None, align);
    }
    for &(access, _) in &group.members {
        func.remove_inst(access.inst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::StandardBuiltins;
    use lanewise_ir::{verify_function, InterpResult, Interpreter, Memory, ParamAttrs, Val};

    /// out[gid] = in[2 gid] + in[2 gid + 1], already packetized over 4 lanes.
    fn pair_sum(between: impl FnOnce(&mut Builder<'_>, ValueId)) -> Function {
        let mut func = Function::new("pair_sum", Type::VOID);
        let input = func.add_param("in", Type::PTR, ParamAttrs::NOALIAS);
        let out = func.add_param("out", Type::PTR, ParamAttrs::NOALIAS);
        let entry = func.add_block("entry");
        let mut b = Builder::at_end(&mut func, entry);
        let zero = b.const_int(ScalarType::I32, 0);
        let one = b.const_int(ScalarType::I64, 1);
        let two = b.const_int(ScalarType::I64, 2);
        let gid = b.call_value("get_global_id", &[zero], Type::I64);
        let even = b.mul(gid, two);
        let odd = b.add(even, one);
        let p0 = b.element_ptr(input, even, ScalarType::I32);
        let p1 = b.element_ptr(input, odd, ScalarType::I32);
        let v4 = Type::vector(ScalarType::I32, 4);
        let a = b.interleaved_load(v4, p0, 2, None);
        between(&mut b, out);
        let c = b.interleaved_load(v4, p1, 2, None);
        let s = b.add(a, c);
        let q = b.element_ptr(out, gid, ScalarType::I32);
        b.store(q, s, None, 4);
        b.ret(None);
        func
    }

    fn count(func: &Function, pred: impl Fn(&InstKind) -> bool) -> usize {
        func.insts_in_order()
            .into_iter()
            .filter(|&i| pred(&func.inst(i).kind))
            .count()
    }

    fn run(func: &Function) -> Vec<i32> {
        let mut mem = Memory::new();
        let input = mem.alloc_i32s(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let out = mem.alloc_i32s(&[0; 4]);
        let mut env = |_: &str, _: &[Val], _: &mut Memory| -> InterpResult<Option<Val>> {
            Ok(Some(Val::I64(0)))
        };
        Interpreter::new(func)
            .run(&[Val::Ptr(input), Val::Ptr(out)], &mut mem, &mut env)
            .expect("runs");
        mem.read_i32s(out, 4).expect("readable")
    }

    #[test]
    fn test_load_pair_merged() {
        let mut func = pair_sum(|_, _| {});
        let before = run(&func);
        let merged = combine_interleaved(&mut func, &StandardBuiltins::new());
        verify_function(&func).expect("valid");
        assert_eq!(merged, 1);
        assert_eq!(count(&func, |k| matches!(k, InstKind::InterleavedLoad { .. })), 0);
        assert_eq!(count(&func, |k| matches!(k, InstKind::Shuffle { .. })), 2);
        assert_eq!(run(&func), before);
        assert_eq!(before, vec![3, 7, 11, 15]);
    }

    #[test]
    fn test_barrier_blocks_merge() {
        let mut func = pair_sum(|b, _| {
            let one = b.const_int(ScalarType::I32, 1);
            b.call("barrier", &[one], None, Type::VOID);
        });
        assert_eq!(combine_interleaved(&mut func, &StandardBuiltins::new()), 0);
        assert_eq!(count(&func, |k| matches!(k, InstKind::InterleavedLoad { .. })), 2);
    }

    #[test]
    fn test_aliasing_store_blocks_merge() {
        let mut func = pair_sum(|b, _| {
            let input = b.func_ref().param_value(0);
            let seven = b.const_int(ScalarType::I32, 7);
            b.store(input, seven, None, 4);
        });
        assert_eq!(combine_interleaved(&mut func, &StandardBuiltins::new()), 0);

        // A store through a distinct noalias parameter does not conflict.
        let mut func = pair_sum(|b, out| {
            let seven = b.const_int(ScalarType::I32, 7);
            b.store(out, seven, None, 4);
        });
        assert_eq!(combine_interleaved(&mut func, &StandardBuiltins::new()), 1);
    }

    #[test]
    fn test_store_pair_merged() {
        // out[2 gid] = v, out[2 gid + 1] = v * v
        let mut func = Function::new("spread", Type::VOID);
        let out = func.add_param("out", Type::PTR, ParamAttrs::NOALIAS);
        let entry = func.add_block("entry");
        let mut b = Builder::at_end(&mut func, entry);
        let one = b.const_int(ScalarType::I64, 1);
        let two = b.const_int(ScalarType::I64, 2);
        let v4 = Type::vector(ScalarType::I32, 4);
        let v = b.step_vector(v4);
        let sq = b.mul(v, v);
        let zero = b.const_int(ScalarType::I64, 0);
        let even = b.mul(zero, two);
        let odd = b.add(even, one);
        let p1 = b.element_ptr(out, odd, ScalarType::I32);
        let p0 = b.element_ptr(out, even, ScalarType::I32);
        b.interleaved_store(p1, sq, 2, None);
        b.interleaved_store(p0, v, 2, None);
        b.ret(None);

        assert_eq!(combine_interleaved(&mut func, &StandardBuiltins::new()), 1);
        verify_function(&func).expect("valid");
        assert_eq!(count(&func, |k| matches!(k, InstKind::InterleavedStore { .. })), 0);
        assert_eq!(count(&func, |k| matches!(k, InstKind::Store { .. })), 1);

        let mut mem = Memory::new();
        let addr = mem.alloc_i32s(&[0; 8]);
        let mut env =
            |_: &str, _: &[Val], _: &mut Memory| -> InterpResult<Option<Val>> { Ok(None) };
        Interpreter::new(&func)
            .run(&[Val::Ptr(addr)], &mut mem, &mut env)
            .expect("runs");
        assert_eq!(mem.read_i32s(addr, 8), Ok(vec![0, 0, 1, 1, 2, 4, 3, 9]));
    }

    #[test]
    fn test_incomplete_group_untouched() {
        // Stride 3 with only offsets 0 and 1 present.
        let mut func = Function::new("partial", Type::VOID);
        let input = func.add_param("in", Type::PTR, ParamAttrs::NOALIAS);
        let entry = func.add_block("entry");
        let mut b = Builder::at_end(&mut func, entry);
        let one = b.const_int(ScalarType::I64, 1);
        let p1 = b.element_ptr(input, one, ScalarType::I32);
        let v4 = Type::vector(ScalarType::I32, 4);
        b.interleaved_load(v4, input, 3, None);
        b.interleaved_load(v4, p1, 3, None);
        b.ret(None);
        assert_eq!(combine_interleaved(&mut func, &StandardBuiltins::new()), 0);
    }
}
