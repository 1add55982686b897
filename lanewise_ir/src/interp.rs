//! Reference interpreter.
//!
//! Executes a [`Function`] over a flat byte-addressed [`Memory`]. Calls are
//! resolved by an [`Environment`]; a call with vector arguments invokes the
//! environment once per active lane, which gives element-wise semantics to
//! every builtin.
//!
//! # Semantics
//!
//! - Integer arithmetic wraps; shift amounts are taken modulo the bit width.
//! - Integer division by zero is an error, never undefined behavior.
//! - Masked-off lanes read as zero and never touch memory.
//! - `undef` reads as zero.
//! - `fmin`/`fmax` return the non-NaN operand when one side is NaN.

use super::function::{Constant, Function, InstId, InstKind, ValueId, ValueKind};
use super::operators::{BinaryOp, CastOp, CmpOp, UnaryOp};
use super::types::{ScalarType, Type};
use rustc_hash::FxHashMap;
use std::fmt;

// =============================================================================
// Errors
// =============================================================================

/// Runtime failure of an interpreted function.
#[derive(Debug, Clone, PartialEq)]
pub enum InterpError {
    /// Integer division or remainder by zero.
    DivisionByZero { inst: InstId },
    /// Access outside of allocated memory.
    OutOfBounds { addr: u64, size: u32 },
    /// The step budget ran out.
    StepLimit { limit: u64 },
    /// Reached an `unreachable` terminator.
    Unreachable { inst: InstId },
    /// Operand shapes the instruction cannot handle.
    TypeMismatch { inst: InstId, message: String },
    /// Wrong number of arguments.
    ArgumentCount { expected: usize, found: usize },
    /// The environment does not know a callee.
    UnknownCallee { name: String },
}

impl fmt::Display for InterpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpError::DivisionByZero { inst } => write!(f, "division by zero at inst {}", inst),
            InterpError::OutOfBounds { addr, size } => {
                write!(f, "out of bounds access of {} bytes at {:#x}", size, addr)
            }
            InterpError::StepLimit { limit } => write!(f, "step limit of {} exceeded", limit),
            InterpError::Unreachable { inst } => write!(f, "reached unreachable at inst {}", inst),
            InterpError::TypeMismatch { inst, message } => {
                write!(f, "type mismatch at inst {}: {}", inst, message)
            }
            InterpError::ArgumentCount { expected, found } => {
                write!(f, "expected {} arguments, found {}", expected, found)
            }
            InterpError::UnknownCallee { name } => write!(f, "unknown callee @{}", name),
        }
    }
}

impl std::error::Error for InterpError {}

/// Result type for interpretation.
pub type InterpResult<T> = Result<T, InterpError>;

// =============================================================================
// Values
// =============================================================================

/// A runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Val {
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Ptr(u64),
    Vector(Vec<Val>),
}

impl Val {
    /// Zero of a scalar type.
    pub fn zero(elem: ScalarType) -> Val {
        Val::from_i64(elem, 0)
    }

    /// Integer bits converted to a scalar of type `elem` (wrapping).
    pub fn from_i64(elem: ScalarType, v: i64) -> Val {
        match elem {
            ScalarType::Bool => Val::Bool(v & 1 != 0),
            ScalarType::I32 => Val::I32(v as i32),
            ScalarType::I64 => Val::I64(v),
            ScalarType::F32 => Val::F32(v as f32),
            ScalarType::F64 => Val::F64(v as f64),
            ScalarType::Ptr => Val::Ptr(v as u64),
        }
    }

    /// Float converted to a scalar of type `elem`.
    pub fn from_f64(elem: ScalarType, v: f64) -> Val {
        match elem {
            ScalarType::F32 => Val::F32(v as f32),
            ScalarType::F64 => Val::F64(v),
            other => Val::from_i64(other, v as i64),
        }
    }

    /// Scalar element type (`None` for vectors).
    pub fn scalar_type(&self) -> Option<ScalarType> {
        Some(match self {
            Val::Bool(_) => ScalarType::Bool,
            Val::I32(_) => ScalarType::I32,
            Val::I64(_) => ScalarType::I64,
            Val::F32(_) => ScalarType::F32,
            Val::F64(_) => ScalarType::F64,
            Val::Ptr(_) => ScalarType::Ptr,
            Val::Vector(_) => return None,
        })
    }

    /// Signed integer view (bools are 0/1, floats truncate).
    pub fn as_i64(&self) -> i64 {
        match self {
            Val::Bool(b) => *b as i64,
            Val::I32(v) => *v as i64,
            Val::I64(v) => *v,
            Val::F32(v) => *v as i64,
            Val::F64(v) => *v as i64,
            Val::Ptr(v) => *v as i64,
            Val::Vector(_) => 0,
        }
    }

    /// Unsigned integer view, zero-extended from the value's width.
    pub fn as_u64(&self) -> u64 {
        match self {
            Val::I32(v) => *v as u32 as u64,
            other => other.as_i64() as u64,
        }
    }

    /// Float view.
    pub fn as_f64(&self) -> f64 {
        match self {
            Val::F32(v) => *v as f64,
            Val::F64(v) => *v,
            other => other.as_i64() as f64,
        }
    }

    /// Truth view (non-zero is true).
    pub fn as_bool(&self) -> bool {
        match self {
            Val::Bool(b) => *b,
            other => other.as_i64() != 0,
        }
    }

    /// Lanes of a vector.
    pub fn lanes(&self) -> Option<&[Val]> {
        match self {
            Val::Vector(lanes) => Some(lanes),
            _ => None,
        }
    }

    /// Lane `i` of a vector; scalars broadcast.
    pub fn lane(&self, i: usize) -> Val {
        match self {
            Val::Vector(lanes) => lanes.get(i).cloned().unwrap_or(Val::Bool(false)),
            scalar => scalar.clone(),
        }
    }
}

// =============================================================================
// Memory
// =============================================================================

/// Bytes below this address are never allocated, so 0 is a null pointer.
const MEMORY_BASE: u64 = 64;

/// Flat little-endian byte memory with bump allocation.
#[derive(Debug, Clone)]
pub struct Memory {
    bytes: Vec<u8>,
}

impl Memory {
    /// Create an empty memory.
    pub fn new() -> Self {
        Memory {
            bytes: vec![0; MEMORY_BASE as usize],
        }
    }

    /// Allocate `size` zeroed bytes aligned to `align`.
    pub fn alloc(&mut self, size: u64, align: u64) -> u64 {
        let align = align.max(1);
        let addr = (self.bytes.len() as u64).div_ceil(align) * align;
        self.bytes.resize((addr + size) as usize, 0);
        addr
    }

    fn check(&self, addr: u64, size: u32) -> InterpResult<usize> {
        let end = addr.checked_add(size as u64);
        match end {
            Some(end) if addr >= MEMORY_BASE && end <= self.bytes.len() as u64 => Ok(addr as usize),
            _ => Err(InterpError::OutOfBounds { addr, size }),
        }
    }

    /// Read a scalar.
    pub fn read(&self, addr: u64, elem: ScalarType) -> InterpResult<Val> {
        let size = elem.size_bytes();
        let at = self.check(addr, size)?;
        let mut raw = [0u8; 8];
        raw[..size as usize].copy_from_slice(&self.bytes[at..at + size as usize]);
        let bits = u64::from_le_bytes(raw);
        Ok(match elem {
            ScalarType::Bool => Val::Bool(bits & 1 != 0),
            ScalarType::I32 => Val::I32(bits as u32 as i32),
            ScalarType::I64 => Val::I64(bits as i64),
            ScalarType::F32 => Val::F32(f32::from_bits(bits as u32)),
            ScalarType::F64 => Val::F64(f64::from_bits(bits)),
            ScalarType::Ptr => Val::Ptr(bits),
        })
    }

    /// Write a scalar.
    pub fn write(&mut self, addr: u64, value: &Val) -> InterpResult<()> {
        let (bits, size): (u64, u32) = match value {
            Val::Bool(b) => (*b as u64, 1),
            Val::I32(v) => (*v as u32 as u64, 4),
            Val::I64(v) => (*v as u64, 8),
            Val::F32(v) => (v.to_bits() as u64, 4),
            Val::F64(v) => (v.to_bits(), 8),
            Val::Ptr(v) => (*v, 8),
            Val::Vector(_) => return Err(InterpError::OutOfBounds { addr, size: 0 }),
        };
        let at = self.check(addr, size)?;
        self.bytes[at..at + size as usize].copy_from_slice(&bits.to_le_bytes()[..size as usize]);
        Ok(())
    }

    /// Allocate and fill an `i32` array.
    pub fn alloc_i32s(&mut self, data: &[i32]) -> u64 {
        let addr = self.alloc(data.len() as u64 * 4, 16);
        for (i, &v) in data.iter().enumerate() {
            let at = addr as usize + i * 4;
            self.bytes[at..at + 4].copy_from_slice(&v.to_le_bytes());
        }
        addr
    }

    /// Allocate and fill an `f32` array.
    pub fn alloc_f32s(&mut self, data: &[f32]) -> u64 {
        let addr = self.alloc(data.len() as u64 * 4, 16);
        for (i, &v) in data.iter().enumerate() {
            let at = addr as usize + i * 4;
            self.bytes[at..at + 4].copy_from_slice(&v.to_le_bytes());
        }
        addr
    }

    /// Read an `i32` array.
    pub fn read_i32s(&self, addr: u64, count: usize) -> InterpResult<Vec<i32>> {
        (0..count)
            .map(|i| self.read(addr + i as u64 * 4, ScalarType::I32).map(|v| v.as_i64() as i32))
            .collect()
    }

    /// Read an `f32` array.
    pub fn read_f32s(&self, addr: u64, count: usize) -> InterpResult<Vec<f32>> {
        (0..count)
            .map(|i| {
                self.read(addr + i as u64 * 4, ScalarType::F32).map(|v| match v {
                    Val::F32(x) => x,
                    other => other.as_f64() as f32,
                })
            })
            .collect()
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Environment
// =============================================================================

/// Resolves calls made by interpreted code.
///
/// Arguments are always scalars; vector calls are split per lane by the
/// interpreter.
pub trait Environment {
    fn call(&mut self, callee: &str, args: &[Val], memory: &mut Memory)
        -> InterpResult<Option<Val>>;
}

impl<F> Environment for F
where
    F: FnMut(&str, &[Val], &mut Memory) -> InterpResult<Option<Val>>,
{
    fn call(
        &mut self,
        callee: &str,
        args: &[Val],
        memory: &mut Memory,
    ) -> InterpResult<Option<Val>> {
        self(callee, args, memory)
    }
}

// =============================================================================
// Scalar Semantics
// =============================================================================

macro_rules! int_binop {
    ($op:expr, $a:expr, $b:expr, $ity:ty, $uty:ty, $bits:expr, $inst:expr) => {{
        let a: $ity = $a;
        let b: $ity = $b;
        let shift = (b as u32) % $bits;
        match $op {
            BinaryOp::Add => a.wrapping_add(b),
            BinaryOp::Sub => a.wrapping_sub(b),
            BinaryOp::Mul => a.wrapping_mul(b),
            BinaryOp::SDiv | BinaryOp::SRem | BinaryOp::UDiv | BinaryOp::URem if b == 0 => {
                return Err(InterpError::DivisionByZero { inst: $inst });
            }
            BinaryOp::SDiv => a.wrapping_div(b),
            BinaryOp::SRem => a.wrapping_rem(b),
            BinaryOp::UDiv => ((a as $uty) / (b as $uty)) as $ity,
            BinaryOp::URem => ((a as $uty) % (b as $uty)) as $ity,
            BinaryOp::And => a & b,
            BinaryOp::Or => a | b,
            BinaryOp::Xor => a ^ b,
            BinaryOp::Shl => a.wrapping_shl(shift),
            BinaryOp::AShr => a.wrapping_shr(shift),
            BinaryOp::LShr => ((a as $uty) >> shift) as $ity,
            BinaryOp::SMin => a.min(b),
            BinaryOp::SMax => a.max(b),
            BinaryOp::UMin => (a as $uty).min(b as $uty) as $ity,
            BinaryOp::UMax => (a as $uty).max(b as $uty) as $ity,
            _ => {
                return Err(InterpError::TypeMismatch {
                    inst: $inst,
                    message: format!("{} on integers", $op.name()),
                })
            }
        }
    }};
}

macro_rules! float_binop {
    ($op:expr, $a:expr, $b:expr, $inst:expr) => {{
        let (a, b) = ($a, $b);
        match $op {
            BinaryOp::FAdd => a + b,
            BinaryOp::FSub => a - b,
            BinaryOp::FMul => a * b,
            BinaryOp::FDiv => a / b,
            BinaryOp::FMin => a.min(b),
            BinaryOp::FMax => a.max(b),
            _ => {
                return Err(InterpError::TypeMismatch {
                    inst: $inst,
                    message: format!("{} on floats", $op.name()),
                })
            }
        }
    }};
}

/// Apply a binary operator to two scalars.
pub fn eval_binary(op: BinaryOp, a: &Val, b: &Val, inst: InstId) -> InterpResult<Val> {
    Ok(match (a, b) {
        (Val::I32(x), Val::I32(y)) => Val::I32(int_binop!(op, *x, *y, i32, u32, 32, inst)),
        (Val::I64(x), Val::I64(y)) => Val::I64(int_binop!(op, *x, *y, i64, u64, 64, inst)),
        (Val::Ptr(x), Val::Ptr(y)) => {
            Val::Ptr(int_binop!(op, *x as i64, *y as i64, i64, u64, 64, inst) as u64)
        }
        (Val::F32(x), Val::F32(y)) => Val::F32(float_binop!(op, *x, *y, inst)),
        (Val::F64(x), Val::F64(y)) => Val::F64(float_binop!(op, *x, *y, inst)),
        (Val::Bool(x), Val::Bool(y)) => Val::Bool(match op {
            BinaryOp::And | BinaryOp::UMin | BinaryOp::SMax => x & y,
            BinaryOp::Or | BinaryOp::UMax | BinaryOp::SMin => x | y,
            BinaryOp::Xor => x ^ y,
            _ => {
                return Err(InterpError::TypeMismatch {
                    inst,
                    message: format!("{} on bools", op.name()),
                })
            }
        }),
        _ => {
            return Err(InterpError::TypeMismatch {
                inst,
                message: format!("{} operands {:?} and {:?}", op.name(), a, b),
            })
        }
    })
}

fn eval_unary(op: UnaryOp, a: &Val, inst: InstId) -> InterpResult<Val> {
    Ok(match (op, a) {
        (UnaryOp::Neg, Val::I32(x)) => Val::I32(x.wrapping_neg()),
        (UnaryOp::Neg, Val::I64(x)) => Val::I64(x.wrapping_neg()),
        (UnaryOp::Not, Val::Bool(x)) => Val::Bool(!x),
        (UnaryOp::Not, Val::I32(x)) => Val::I32(!x),
        (UnaryOp::Not, Val::I64(x)) => Val::I64(!x),
        (UnaryOp::FNeg, Val::F32(x)) => Val::F32(-x),
        (UnaryOp::FNeg, Val::F64(x)) => Val::F64(-x),
        (UnaryOp::FAbs, Val::F32(x)) => Val::F32(x.abs()),
        (UnaryOp::FAbs, Val::F64(x)) => Val::F64(x.abs()),
        (UnaryOp::Sqrt, Val::F32(x)) => Val::F32(x.sqrt()),
        (UnaryOp::Sqrt, Val::F64(x)) => Val::F64(x.sqrt()),
        _ => {
            return Err(InterpError::TypeMismatch {
                inst,
                message: format!("{} on {:?}", op.name(), a),
            })
        }
    })
}

fn eval_cmp(op: CmpOp, a: &Val, b: &Val) -> Val {
    let r = if op.is_float() {
        let (x, y) = (a.as_f64(), b.as_f64());
        match op {
            CmpOp::FEq => x == y,
            CmpOp::FNe => !x.is_nan() && !y.is_nan() && x != y,
            CmpOp::FLt => x < y,
            CmpOp::FLe => x <= y,
            CmpOp::FGt => x > y,
            _ => x >= y,
        }
    } else {
        let (x, y) = (a.as_i64(), b.as_i64());
        let (ux, uy) = (a.as_u64(), b.as_u64());
        match op {
            CmpOp::Eq => ux == uy,
            CmpOp::Ne => ux != uy,
            CmpOp::Slt => x < y,
            CmpOp::Sle => x <= y,
            CmpOp::Sgt => x > y,
            CmpOp::Sge => x >= y,
            CmpOp::Ult => ux < uy,
            CmpOp::Ule => ux <= uy,
            CmpOp::Ugt => ux > uy,
            _ => ux >= uy,
        }
    };
    Val::Bool(r)
}

fn eval_cast(op: CastOp, a: &Val, to: ScalarType) -> Val {
    match op {
        CastOp::SExt => match a {
            Val::Bool(b) => Val::from_i64(to, -(*b as i64)),
            other => Val::from_i64(to, other.as_i64()),
        },
        CastOp::ZExt => Val::from_i64(to, a.as_u64() as i64),
        CastOp::Trunc => Val::from_i64(to, a.as_i64()),
        CastOp::SIToFP => Val::from_f64(to, a.as_i64() as f64),
        CastOp::FPToSI => Val::from_i64(to, a.as_f64() as i64),
        CastOp::FPExt | CastOp::FPTrunc => Val::from_f64(to, a.as_f64()),
    }
}

fn const_val(c: Constant, elem: ScalarType) -> Val {
    match c {
        Constant::Bool(b) => Val::Bool(b),
        Constant::Int(i) => Val::from_i64(elem, i),
        Constant::Float(f) => Val::from_f64(elem, f),
    }
}

/// Apply `f` lane-wise; a scalar next to a vector is broadcast.
fn map2(a: &Val, b: &Val, mut f: impl FnMut(&Val, &Val) -> InterpResult<Val>) -> InterpResult<Val> {
    match (a, b) {
        (Val::Vector(xs), Val::Vector(ys)) => xs
            .iter()
            .zip(ys)
            .map(|(x, y)| f(x, y))
            .collect::<InterpResult<Vec<_>>>()
            .map(Val::Vector),
        (Val::Vector(xs), y) => xs
            .iter()
            .map(|x| f(x, y))
            .collect::<InterpResult<Vec<_>>>()
            .map(Val::Vector),
        (x, Val::Vector(ys)) => ys
            .iter()
            .map(|y| f(x, y))
            .collect::<InterpResult<Vec<_>>>()
            .map(Val::Vector),
        (x, y) => f(x, y),
    }
}

fn map1(a: &Val, mut f: impl FnMut(&Val) -> InterpResult<Val>) -> InterpResult<Val> {
    match a {
        Val::Vector(xs) => xs
            .iter()
            .map(&mut f)
            .collect::<InterpResult<Vec<_>>>()
            .map(Val::Vector),
        x => f(x),
    }
}

// =============================================================================
// Interpreter
// =============================================================================

/// Executes one function invocation at a time.
pub struct Interpreter<'f> {
    func: &'f Function,
    vscale: u32,
    step_limit: u64,
}

impl<'f> Interpreter<'f> {
    /// Interpreter with `vscale = 1` and a one million step budget.
    pub fn new(func: &'f Function) -> Self {
        Interpreter {
            func,
            vscale: 1,
            step_limit: 1_000_000,
        }
    }

    /// Runtime multiplier for scalable vector types.
    pub fn with_vscale(mut self, vscale: u32) -> Self {
        self.vscale = vscale.max(1);
        self
    }

    /// Maximum number of executed instructions.
    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    fn lanes_of(&self, ty: Type) -> usize {
        match ty {
            Type::Vector(v) if v.scalable => (v.lanes * self.vscale) as usize,
            Type::Vector(v) => v.lanes as usize,
            _ => 1,
        }
    }

    fn zero_of(&self, ty: Type) -> Val {
        match ty {
            Type::Vector(v) => Val::Vector(vec![Val::zero(v.elem); self.lanes_of(ty)]),
            Type::Scalar(s) => Val::zero(s),
            Type::Void => Val::Bool(false),
        }
    }

    /// Run the function to completion.
    pub fn run(
        &self,
        args: &[Val],
        memory: &mut Memory,
        env: &mut dyn Environment,
    ) -> InterpResult<Option<Val>> {
        let func = self.func;
        if args.len() != func.params.len() {
            return Err(InterpError::ArgumentCount {
                expected: func.params.len(),
                found: args.len(),
            });
        }
        let mut frame = Frame {
            args,
            values: FxHashMap::default(),
        };
        let Some(mut block) = func.entry_block() else {
            return Ok(None);
        };
        let mut prev = None;
        let mut steps = 0u64;

        loop {
            let insts = func.block_insts(block);

            // Phis read their inputs simultaneously.
            let mut phi_values = Vec::new();
            for &inst in insts {
                let InstKind::Phi { incoming } = &func.inst(inst).kind else {
                    break;
                };
                let input = incoming
                    .iter()
                    .find(|(b, _)| Some(*b) == prev)
                    .map(|&(_, v)| v);
                let value = match input {
                    Some(v) => frame.get(self, v),
                    None => self.zero_of(self.result_ty(inst)),
                };
                phi_values.push((inst, value));
            }
            for (inst, value) in phi_values {
                if let Some(r) = func.inst_result(inst) {
                    frame.values.insert(r, value);
                }
            }

            for &inst in insts {
                let kind = &func.inst(inst).kind;
                if kind.is_phi() {
                    continue;
                }
                steps += 1;
                if steps > self.step_limit {
                    return Err(InterpError::StepLimit {
                        limit: self.step_limit,
                    });
                }
                match kind {
                    InstKind::Br { target } => {
                        prev = Some(block);
                        block = *target;
                        break;
                    }
                    InstKind::CondBr {
                        cond,
                        then_block,
                        else_block,
                    } => {
                        prev = Some(block);
                        block = if frame.get(self, *cond).as_bool() {
                            *then_block
                        } else {
                            *else_block
                        };
                        break;
                    }
                    InstKind::Switch {
                        value,
                        cases,
                        default,
                    } => {
                        let v = frame.get(self, *value).as_i64();
                        prev = Some(block);
                        block = cases
                            .iter()
                            .find(|(c, _)| *c == v)
                            .map(|&(_, b)| b)
                            .unwrap_or(*default);
                        break;
                    }
                    InstKind::Ret { value } => {
                        return Ok(value.map(|v| frame.get(self, v)));
                    }
                    InstKind::Unreachable => return Err(InterpError::Unreachable { inst }),
                    _ => {
                        let value = self.eval(inst, &mut frame, memory, env)?;
                        if let (Some(r), Some(value)) = (func.inst_result(inst), value) {
                            frame.values.insert(r, value);
                        }
                    }
                }
            }
        }
    }

    fn result_ty(&self, inst: InstId) -> Type {
        self.func
            .inst_result(inst)
            .map(|r| self.func.value_ty(r))
            .unwrap_or(Type::VOID)
    }

    fn elem_of(&self, inst: InstId) -> ScalarType {
        self.result_ty(inst).element().unwrap_or(ScalarType::Bool)
    }

    fn mismatch(&self, inst: InstId, message: &str) -> InterpError {
        InterpError::TypeMismatch {
            inst,
            message: message.to_string(),
        }
    }

    fn eval(
        &self,
        inst: InstId,
        frame: &mut Frame<'_>,
        memory: &mut Memory,
        env: &mut dyn Environment,
    ) -> InterpResult<Option<Val>> {
        let func = self.func;
        let ty = self.result_ty(inst);
        let value = match &func.inst(inst).kind {
            InstKind::Binary { op, lhs, rhs } => {
                let (a, b) = (frame.get(self, *lhs), frame.get(self, *rhs));
                map2(&a, &b, |x, y| eval_binary(*op, x, y, inst))?
            }
            InstKind::Unary { op, operand } => {
                map1(&frame.get(self, *operand), |x| eval_unary(*op, x, inst))?
            }
            InstKind::Cmp { op, lhs, rhs } => {
                let (a, b) = (frame.get(self, *lhs), frame.get(self, *rhs));
                map2(&a, &b, |x, y| Ok(eval_cmp(*op, x, y)))?
            }
            InstKind::Cast { op, value } => {
                let to = self.elem_of(inst);
                map1(&frame.get(self, *value), |x| Ok(eval_cast(*op, x, to)))?
            }
            InstKind::Select {
                cond,
                then_value,
                else_value,
            } => {
                let c = frame.get(self, *cond);
                let (t, e) = (frame.get(self, *then_value), frame.get(self, *else_value));
                match &c {
                    Val::Vector(lanes) => Val::Vector(
                        lanes
                            .iter()
                            .enumerate()
                            .map(|(i, m)| if m.as_bool() { t.lane(i) } else { e.lane(i) })
                            .collect(),
                    ),
                    scalar => {
                        if scalar.as_bool() {
                            t
                        } else {
                            e
                        }
                    }
                }
            }
            InstKind::ElementPtr { base, index, elem } => {
                let size = elem.size_bytes() as i64;
                let (b, i) = (frame.get(self, *base), frame.get(self, *index));
                map2(&b, &i, |p, idx| {
                    Ok(Val::Ptr(p.as_u64().wrapping_add(idx.as_i64().wrapping_mul(size) as u64)))
                })?
            }
            InstKind::Alloca { elem, count } => {
                let size = elem.size_bytes() as u64;
                Val::Ptr(memory.alloc(size * (*count).max(1) as u64, size.max(8)))
            }
            InstKind::Load { ptr, mask, .. } => {
                let base = frame.get(self, *ptr).as_u64();
                let mask = mask.map(|m| frame.get(self, m));
                let elem = self.elem_of(inst);
                let step = elem.size_bytes() as u64;
                self.load_lanes(ty, mask.as_ref(), memory, |i| base.wrapping_add(i as u64 * step))?
            }
            InstKind::InterleavedLoad { ptr, stride, mask } => {
                let base = frame.get(self, *ptr).as_u64();
                let mask = mask.map(|m| frame.get(self, m));
                let step = (self.elem_of(inst).size_bytes() as i64).wrapping_mul(*stride);
                self.load_lanes(ty, mask.as_ref(), memory, |i| {
                    base.wrapping_add((i as i64).wrapping_mul(step) as u64)
                })?
            }
            InstKind::Gather { ptrs, mask } => {
                let ptrs = frame.get(self, *ptrs);
                let mask = mask.map(|m| frame.get(self, m));
                self.load_lanes(ty, mask.as_ref(), memory, |i| ptrs.lane(i).as_u64())?
            }
            InstKind::Store {
                ptr, value, mask, ..
            } => {
                let base = frame.get(self, *ptr).as_u64();
                let v = frame.get(self, *value);
                let mask = mask.map(|m| frame.get(self, m));
                let step = func.value_ty(*value).element().map_or(1, |e| e.size_bytes()) as u64;
                self.store_lanes(&v, mask.as_ref(), memory, |i| {
                    base.wrapping_add(i as u64 * step)
                })?;
                return Ok(None);
            }
            InstKind::InterleavedStore {
                ptr,
                value,
                stride,
                mask,
            } => {
                let base = frame.get(self, *ptr).as_u64();
                let v = frame.get(self, *value);
                let mask = mask.map(|m| frame.get(self, m));
                let size = func.value_ty(*value).element().map_or(1, |e| e.size_bytes()) as i64;
                let step = size.wrapping_mul(*stride);
                self.store_lanes(&v, mask.as_ref(), memory, |i| {
                    base.wrapping_add((i as i64).wrapping_mul(step) as u64)
                })?;
                return Ok(None);
            }
            InstKind::Scatter { ptrs, value, mask } => {
                let ptrs = frame.get(self, *ptrs);
                let v = frame.get(self, *value);
                let mask = mask.map(|m| frame.get(self, m));
                self.store_lanes(&v, mask.as_ref(), memory, |i| ptrs.lane(i).as_u64())?;
                return Ok(None);
            }
            InstKind::Call { callee, args, mask } => {
                let args: Vec<Val> = args.iter().map(|&a| frame.get(self, a)).collect();
                let mask = mask.map(|m| frame.get(self, m));
                return self.call(callee, &args, mask.as_ref(), ty, memory, env);
            }
            InstKind::Splat { value } => {
                let v = frame.get(self, *value);
                Val::Vector(vec![v; self.lanes_of(ty)])
            }
            InstKind::StepVector => {
                let elem = self.elem_of(inst);
                Val::Vector((0..self.lanes_of(ty)).map(|i| Val::from_i64(elem, i as i64)).collect())
            }
            InstKind::ExtractElement { vector, index } => {
                let v = frame.get(self, *vector);
                let i = frame.get(self, *index).as_i64();
                v.lanes()
                    .and_then(|lanes| usize::try_from(i).ok().and_then(|i| lanes.get(i)))
                    .cloned()
                    .ok_or_else(|| self.mismatch(inst, "extract index out of range"))?
            }
            InstKind::InsertElement {
                vector,
                value,
                index,
            } => {
                let mut lanes = frame
                    .get(self, *vector)
                    .lanes()
                    .map(|l| l.to_vec())
                    .ok_or_else(|| self.mismatch(inst, "insert into a scalar"))?;
                let i = frame.get(self, *index).as_i64();
                let slot = usize::try_from(i)
                    .ok()
                    .and_then(|i| lanes.get_mut(i))
                    .ok_or_else(|| self.mismatch(inst, "insert index out of range"))?;
                *slot = frame.get(self, *value);
                Val::Vector(lanes)
            }
            InstKind::Shuffle { sources, mask } => {
                let mut all = Vec::new();
                for &s in sources {
                    match frame.get(self, s) {
                        Val::Vector(lanes) => all.extend(lanes),
                        scalar => all.push(scalar),
                    }
                }
                let lanes = mask
                    .iter()
                    .map(|&m| all.get(m as usize).cloned())
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| self.mismatch(inst, "shuffle index out of range"))?;
                Val::Vector(lanes)
            }
            InstKind::VectorReduce { kind, vector } => {
                let v = frame.get(self, *vector);
                let lanes = v
                    .lanes()
                    .ok_or_else(|| self.mismatch(inst, "reduce of a scalar"))?;
                let mut acc = lanes
                    .first()
                    .cloned()
                    .ok_or_else(|| self.mismatch(inst, "reduce of an empty vector"))?;
                for lane in &lanes[1..] {
                    acc = eval_binary(kind.binary_op(), &acc, lane, inst)?;
                }
                acc
            }
            InstKind::Phi { .. }
            | InstKind::Br { .. }
            | InstKind::CondBr { .. }
            | InstKind::Switch { .. }
            | InstKind::Ret { .. }
            | InstKind::Unreachable => return Ok(None),
        };
        Ok(Some(value))
    }

    fn load_lanes(
        &self,
        ty: Type,
        mask: Option<&Val>,
        memory: &Memory,
        addr: impl Fn(usize) -> u64,
    ) -> InterpResult<Val> {
        let elem = ty.element().unwrap_or(ScalarType::Bool);
        let active = |i: usize| mask.map_or(true, |m| m.lane(i).as_bool());
        if !ty.is_vector() {
            return if active(0) {
                memory.read(addr(0), elem)
            } else {
                Ok(Val::zero(elem))
            };
        }
        let lanes = (0..self.lanes_of(ty))
            .map(|i| {
                if active(i) {
                    memory.read(addr(i), elem)
                } else {
                    Ok(Val::zero(elem))
                }
            })
            .collect::<InterpResult<Vec<_>>>()?;
        Ok(Val::Vector(lanes))
    }

    fn store_lanes(
        &self,
        value: &Val,
        mask: Option<&Val>,
        memory: &mut Memory,
        addr: impl Fn(usize) -> u64,
    ) -> InterpResult<()> {
        let active = |i: usize| mask.map_or(true, |m| m.lane(i).as_bool());
        match value {
            Val::Vector(lanes) => {
                for (i, lane) in lanes.iter().enumerate() {
                    if active(i) {
                        memory.write(addr(i), lane)?;
                    }
                }
                Ok(())
            }
            scalar => {
                if active(0) {
                    memory.write(addr(0), scalar)?;
                }
                Ok(())
            }
        }
    }

    fn call(
        &self,
        callee: &str,
        args: &[Val],
        mask: Option<&Val>,
        ty: Type,
        memory: &mut Memory,
        env: &mut dyn Environment,
    ) -> InterpResult<Option<Val>> {
        let vector_lanes = args
            .iter()
            .chain(mask)
            .filter_map(|a| a.lanes().map(|l| l.len()))
            .max();
        let elem = ty.element().unwrap_or(ScalarType::Bool);

        let Some(lanes) = vector_lanes else {
            if mask.is_some_and(|m| !m.as_bool()) {
                return Ok((!ty.is_void()).then(|| self.zero_of(ty)));
            }
            return env.call(callee, args, memory);
        };

        let mut results = Vec::with_capacity(lanes);
        for i in 0..lanes {
            if mask.is_some_and(|m| !m.lane(i).as_bool()) {
                results.push(Val::zero(elem));
                continue;
            }
            let lane_args: Vec<Val> = args.iter().map(|a| a.lane(i)).collect();
            let r = env.call(callee, &lane_args, memory)?;
            results.push(r.unwrap_or_else(|| Val::zero(elem)));
        }
        Ok((!ty.is_void()).then_some(Val::Vector(results)))
    }
}

struct Frame<'a> {
    args: &'a [Val],
    values: FxHashMap<ValueId, Val>,
}

impl Frame<'_> {
    fn get(&self, interp: &Interpreter<'_>, v: ValueId) -> Val {
        let data = interp.func.value(v);
        match data.kind {
            ValueKind::Param(i) => self.args.get(i as usize).cloned().unwrap_or(Val::Bool(false)),
            ValueKind::Const(c) => {
                let elem = data.ty.element().unwrap_or(ScalarType::Bool);
                let scalar = const_val(c, elem);
                match data.ty {
                    Type::Vector(_) => Val::Vector(vec![scalar; interp.lanes_of(data.ty)]),
                    _ => scalar,
                }
            }
            ValueKind::Undef => interp.zero_of(data.ty),
            ValueKind::Inst(_) => self
                .values
                .get(&v)
                .cloned()
                .unwrap_or_else(|| interp.zero_of(data.ty)),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
