//! Value types of the kernel IR.
//!
//! Scalars are the types a single lane computes with. Vectors are produced by
//! the vectorizer and hold one element per lane of a lane group:
//!
//! ```text
//!   i32            scalar
//!   <4 x i32>      fixed vector, 4 lanes
//!   <vscale x 4 x i32>   scalable vector, 4 × vscale lanes
//! ```

use std::fmt;

// =============================================================================
// Scalar Types
// =============================================================================

/// Element type of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ScalarType {
    /// One-bit truth value (stored as one byte).
    Bool = 0,
    /// 32-bit two's complement integer.
    I32 = 1,
    /// 64-bit two's complement integer.
    I64 = 2,
    /// IEEE-754 single precision.
    F32 = 3,
    /// IEEE-754 double precision.
    F64 = 4,
    /// 64-bit address into the flat memory space.
    Ptr = 5,
}

impl ScalarType {
    /// Size in bytes when stored in memory.
    #[inline]
    pub const fn size_bytes(self) -> u32 {
        match self {
            ScalarType::Bool => 1,
            ScalarType::I32 | ScalarType::F32 => 4,
            ScalarType::I64 | ScalarType::F64 | ScalarType::Ptr => 8,
        }
    }

    /// Size in bits as held in a register.
    #[inline]
    pub const fn bits(self) -> u32 {
        match self {
            ScalarType::Bool => 1,
            _ => self.size_bytes() * 8,
        }
    }

    /// Check for an integer type (`Bool` excluded).
    #[inline]
    pub const fn is_int(self) -> bool {
        matches!(self, ScalarType::I32 | ScalarType::I64)
    }

    /// Check for a floating-point type.
    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, ScalarType::F32 | ScalarType::F64)
    }

    /// Textual name.
    pub const fn name(self) -> &'static str {
        match self {
            ScalarType::Bool => "bool",
            ScalarType::I32 => "i32",
            ScalarType::I64 => "i64",
            ScalarType::F32 => "f32",
            ScalarType::F64 => "f64",
            ScalarType::Ptr => "ptr",
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Vector Types
// =============================================================================

/// A vector of scalar elements, one per lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VectorType {
    /// Element type.
    pub elem: ScalarType,
    /// Lane count (minimum lane count when scalable).
    pub lanes: u32,
    /// Whether the real lane count is `lanes × vscale`.
    pub scalable: bool,
}

impl VectorType {
    /// Fixed-width vector.
    #[inline]
    pub const fn fixed(elem: ScalarType, lanes: u32) -> Self {
        Self {
            elem,
            lanes,
            scalable: false,
        }
    }

    /// Scalable vector with `lanes` as the minimum lane count.
    #[inline]
    pub const fn scalable(elem: ScalarType, lanes: u32) -> Self {
        Self {
            elem,
            lanes,
            scalable: true,
        }
    }

    /// Minimum size in bits.
    #[inline]
    pub const fn min_bits(&self) -> u32 {
        self.elem.bits() * self.lanes
    }
}

// =============================================================================
// Types
// =============================================================================

/// Type of an IR value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    /// No value (stores, branches, void calls).
    Void,
    /// A single element.
    Scalar(ScalarType),
    /// One element per lane.
    Vector(VectorType),
}

impl Type {
    pub const VOID: Type = Type::Void;
    pub const BOOL: Type = Type::Scalar(ScalarType::Bool);
    pub const I32: Type = Type::Scalar(ScalarType::I32);
    pub const I64: Type = Type::Scalar(ScalarType::I64);
    pub const F32: Type = Type::Scalar(ScalarType::F32);
    pub const F64: Type = Type::Scalar(ScalarType::F64);
    pub const PTR: Type = Type::Scalar(ScalarType::Ptr);

    /// Fixed-width vector type.
    #[inline]
    pub const fn vector(elem: ScalarType, lanes: u32) -> Type {
        Type::Vector(VectorType::fixed(elem, lanes))
    }

    /// Element type of a scalar or vector (`None` for void).
    #[inline]
    pub const fn element(self) -> Option<ScalarType> {
        match self {
            Type::Void => None,
            Type::Scalar(s) => Some(s),
            Type::Vector(v) => Some(v.elem),
        }
    }

    /// Check for a vector type.
    #[inline]
    pub const fn is_vector(self) -> bool {
        matches!(self, Type::Vector(_))
    }

    /// Check for a scalar type.
    #[inline]
    pub const fn is_scalar(self) -> bool {
        matches!(self, Type::Scalar(_))
    }

    /// Check for void.
    #[inline]
    pub const fn is_void(self) -> bool {
        matches!(self, Type::Void)
    }

    /// Vector descriptor if this is a vector.
    #[inline]
    pub const fn as_vector(self) -> Option<VectorType> {
        match self {
            Type::Vector(v) => Some(v),
            _ => None,
        }
    }

    /// Fixed lane count: 1 for scalars, `None` for void and scalable vectors.
    #[inline]
    pub const fn fixed_lanes(self) -> Option<u32> {
        match self {
            Type::Scalar(_) => Some(1),
            Type::Vector(v) if !v.scalable => Some(v.lanes),
            _ => None,
        }
    }

    /// Widen a scalar type to a vector with the same lane shape as `shape`.
    ///
    /// Void stays void and vectors keep their element type.
    #[inline]
    pub const fn with_lanes(self, shape: VectorType) -> Type {
        match self {
            Type::Void => Type::Void,
            Type::Scalar(elem) | Type::Vector(VectorType { elem, .. }) => {
                Type::Vector(VectorType {
                    elem,
                    lanes: shape.lanes,
                    scalable: shape.scalable,
                })
            }
        }
    }

    /// Same shape, different element type.
    #[inline]
    pub const fn with_element(self, elem: ScalarType) -> Type {
        match self {
            Type::Void => Type::Void,
            Type::Scalar(_) => Type::Scalar(elem),
            Type::Vector(v) => Type::Vector(VectorType {
                elem,
                lanes: v.lanes,
                scalable: v.scalable,
            }),
        }
    }

    /// Size in bytes when stored (minimum size for scalable vectors).
    #[inline]
    pub const fn size_bytes(self) -> u32 {
        match self {
            Type::Void => 0,
            Type::Scalar(s) => s.size_bytes(),
            Type::Vector(v) => v.elem.size_bytes() * v.lanes,
        }
    }
}

impl From<ScalarType> for Type {
    fn from(s: ScalarType) -> Self {
        Type::Scalar(s)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => f.write_str("void"),
            Type::Scalar(s) => write!(f, "{}", s),
            Type::Vector(v) if v.scalable => write!(f, "<vscale x {} x {}>", v.lanes, v.elem),
            Type::Vector(v) => write!(f, "<{} x {}>", v.lanes, v.elem),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
