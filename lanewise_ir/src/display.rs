//! Textual form of functions.
//!
//! ```text
//! fn @saxpy(ptr noalias %0, f32 %1) -> void {
//! bb0 entry:
//!   %3 = call @get_global_id(i32 0)
//!   %4 = elementptr f32, ptr %0, i64 %3
//!   ...
//!   ret
//! }
//! ```

use super::function::{Constant, Function, InstId, InstKind, ValueId, ValueKind};
use super::types::{ScalarType, Type};
use std::fmt;

/// Formats an operand with its type.
struct Operand<'a> {
    func: &'a Function,
    value: ValueId,
}

impl fmt::Display for Operand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.func.value(self.value);
        write!(f, "{} ", data.ty)?;
        match data.kind {
            ValueKind::Const(Constant::Bool(b)) => write!(f, "{}", b),
            ValueKind::Const(Constant::Int(i)) => write!(f, "{}", i),
            ValueKind::Const(Constant::Float(x)) => {
                if data.ty.element() == Some(ScalarType::F32) {
                    write!(f, "{:?}", x as f32)
                } else {
                    write!(f, "{:?}", x)
                }
            }
            ValueKind::Undef => f.write_str("undef"),
            ValueKind::Param(_) | ValueKind::Inst(_) => write!(f, "%{}", self.value),
        }
    }
}

fn mask_suffix(func: &Function, mask: Option<ValueId>) -> String {
    match mask {
        Some(m) => format!(", mask {}", Operand { func, value: m }),
        None => String::new(),
    }
}

/// Format one instruction (without indentation or newline).
pub fn format_inst(func: &Function, inst: InstId) -> String {
    let data = func.inst(inst);
    let op = |v: ValueId| Operand { func, value: v }.to_string();
    let body = match &data.kind {
        InstKind::Binary { op: bin, lhs, rhs } => {
            format!("{} {}, {}", bin.name(), op(*lhs), op(*rhs))
        }
        InstKind::Unary { op: un, operand } => format!("{} {}", un.name(), op(*operand)),
        InstKind::Cmp { op: cmp, lhs, rhs } => {
            format!("cmp {} {}, {}", cmp.name(), op(*lhs), op(*rhs))
        }
        InstKind::Cast { op: cast, value } => {
            let to = data.result.map(|r| func.value_ty(r)).unwrap_or(Type::VOID);
            format!("{} {} to {}", cast.name(), op(*value), to)
        }
        InstKind::Select {
            cond,
            then_value,
            else_value,
        } => format!("select {}, {}, {}", op(*cond), op(*then_value), op(*else_value)),
        InstKind::ElementPtr { base, index, elem } => {
            format!("elementptr {}, {}, {}", elem, op(*base), op(*index))
        }
        InstKind::Alloca { elem, count } => format!("alloca {} x {}", count, elem),
        InstKind::Load { ptr, mask, align } => {
            format!("load {}{}, align {}", op(*ptr), mask_suffix(func, *mask), align)
        }
        InstKind::Store {
            ptr,
            value,
            mask,
            align,
        } => format!(
            "store {}, {}{}, align {}",
            op(*value),
            op(*ptr),
            mask_suffix(func, *mask),
            align
        ),
        InstKind::InterleavedLoad { ptr, stride, mask } => format!(
            "interleaved.load {}, stride {}{}",
            op(*ptr),
            stride,
            mask_suffix(func, *mask)
        ),
        InstKind::InterleavedStore {
            ptr,
            value,
            stride,
            mask,
        } => format!(
            "interleaved.store {}, {}, stride {}{}",
            op(*value),
            op(*ptr),
            stride,
            mask_suffix(func, *mask)
        ),
        InstKind::Gather { ptrs, mask } => {
            format!("gather {}{}", op(*ptrs), mask_suffix(func, *mask))
        }
        InstKind::Scatter { ptrs, value, mask } => format!(
            "scatter {}, {}{}",
            op(*value),
            op(*ptrs),
            mask_suffix(func, *mask)
        ),
        InstKind::Call { callee, args, mask } => {
            let args: Vec<String> = args.iter().map(|&a| op(a)).collect();
            format!("call @{}({}){}", callee, args.join(", "), mask_suffix(func, *mask))
        }
        InstKind::Phi { incoming } => {
            let ins: Vec<String> = incoming
                .iter()
                .map(|&(b, v)| format!("[{}, bb{}]", op(v), b))
                .collect();
            format!("phi {}", ins.join(", "))
        }
        InstKind::Splat { value } => format!("splat {}", op(*value)),
        InstKind::StepVector => "stepvector".to_string(),
        InstKind::ExtractElement { vector, index } => {
            format!("extractelement {}, {}", op(*vector), op(*index))
        }
        InstKind::InsertElement {
            vector,
            value,
            index,
        } => format!("insertelement {}, {}, {}", op(*vector), op(*value), op(*index)),
        InstKind::Shuffle { sources, mask } => {
            let srcs: Vec<String> = sources.iter().map(|&s| op(s)).collect();
            let mask: Vec<String> = mask.iter().map(|m| m.to_string()).collect();
            format!("shuffle {}, <{}>", srcs.join(", "), mask.join(", "))
        }
        InstKind::VectorReduce { kind, vector } => {
            format!("reduce.{} {}", kind.name(), op(*vector))
        }
        InstKind::Br { target } => format!("br bb{}", target),
        InstKind::CondBr {
            cond,
            then_block,
            else_block,
        } => format!("condbr {}, bb{}, bb{}", op(*cond), then_block, else_block),
        InstKind::Switch {
            value,
            cases,
            default,
        } => {
            let cases: Vec<String> =
                cases.iter().map(|(c, b)| format!("{} -> bb{}", c, b)).collect();
            format!("switch {}, default bb{} [{}]", op(*value), default, cases.join(", "))
        }
        InstKind::Ret { value: Some(v) } => format!("ret {}", op(*v)),
        InstKind::Ret { value: None } => "ret".to_string(),
        InstKind::Unreachable => "unreachable".to_string(),
    };
    match data.result {
        Some(r) => format!("%{} = {}", r, body),
        None => body,
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn @{}(", self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", p.ty)?;
            if p.attrs.contains(super::function::ParamAttrs::NOALIAS) {
                f.write_str(" noalias")?;
            }
            if p.attrs.contains(super::function::ParamAttrs::READONLY) {
                f.write_str(" readonly")?;
            }
            write!(f, " %{}", p.value)?;
        }
        write!(f, ") -> {}", self.ret_ty)?;
        if let Some(group) = self.vector_width {
            if group.scalable {
                write!(f, " [lanes vscale x {}]", group.lanes)?;
            } else {
                write!(f, " [lanes {}]", group.lanes)?;
            }
        }
        f.write_str(" {\n")?;
        for &block in &self.layout {
            writeln!(f, "bb{} {}:", block, self.block(block).name)?;
            for &inst in self.block_insts(block) {
                writeln!(f, "  {}", format_inst(self, inst))?;
            }
        }
        f.write_str("}\n")
    }
}

// =============================================================================
// Tests
// =============================================================================
