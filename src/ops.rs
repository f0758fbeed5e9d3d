//! Elementwise operation descriptors.
//!
//! An operation is resolved to an executable unit by its name and the element
//! kind tag of the buffer it runs on:
//!
//! - **Arithmetic** (`ArithOp`): add, sub, rsub, mul, div, rdiv, each in a
//!   scalar form (`add_scalar`) and a two-buffer strided form (`add_strided`).
//! - **Transforms** (`Transform`): named unary functions such as `sigmoid` or
//!   `pow`, configured by an untyped argument list.
//!
//! The host backend turns a descriptor into a loop body (`host_kernels`), the
//! device backend into a kernel entry point of the same name.

use std::fmt;

use crate::element::{Element, Scalar};
use crate::error::{BufferError, BufferResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    /// `operand - self`
    RSub,
    Mul,
    Div,
    /// `operand / self`
    RDiv,
}

/// Which kernel family an arithmetic op is launched through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpForm {
    Scalar,
    Strided,
}

impl ArithOp {
    pub const ALL: [ArithOp; 6] = [
        ArithOp::Add,
        ArithOp::Sub,
        ArithOp::RSub,
        ArithOp::Mul,
        ArithOp::Div,
        ArithOp::RDiv,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::RSub => "rsub",
            ArithOp::Mul => "mul",
            ArithOp::Div => "div",
            ArithOp::RDiv => "rdiv",
        }
    }

    pub const fn kernel_name(self, form: OpForm) -> &'static str {
        match (self, form) {
            (ArithOp::Add, OpForm::Scalar) => "add_scalar",
            (ArithOp::Sub, OpForm::Scalar) => "sub_scalar",
            (ArithOp::RSub, OpForm::Scalar) => "rsub_scalar",
            (ArithOp::Mul, OpForm::Scalar) => "mul_scalar",
            (ArithOp::Div, OpForm::Scalar) => "div_scalar",
            (ArithOp::RDiv, OpForm::Scalar) => "rdiv_scalar",
            (ArithOp::Add, OpForm::Strided) => "add_strided",
            (ArithOp::Sub, OpForm::Strided) => "sub_strided",
            (ArithOp::RSub, OpForm::Strided) => "rsub_strided",
            (ArithOp::Mul, OpForm::Strided) => "mul_strided",
            (ArithOp::Div, OpForm::Strided) => "div_strided",
            (ArithOp::RDiv, OpForm::Strided) => "rdiv_strided",
        }
    }

    /// `x op y` where `x` is the buffer element and `y` the operand.
    #[inline(always)]
    pub fn apply<E: Element>(self, x: E, y: E) -> E {
        match self {
            ArithOp::Add => x.elem_add(y),
            ArithOp::Sub => x.elem_sub(y),
            ArithOp::RSub => y.elem_sub(x),
            ArithOp::Mul => x.elem_mul(y),
            ArithOp::Div => x.elem_div(y),
            ArithOp::RDiv => y.elem_div(x),
        }
    }
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Named unary transforms. Parameterized variants carry their configuring
/// argument, so `Pow(2.0)` and `Pow(3.0)` are distinct operations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transform {
    Neg,
    Abs,
    Exp,
    Log,
    Sqrt,
    Sigmoid,
    Tanh,
    /// Clamp to `[-1, 1]`.
    HardTanh,
    Floor,
    Round,
    Sign,
    Identity,
    Pow(f64),
    /// `max(x, threshold)`
    Max(f64),
    /// `min(x, threshold)`
    Min(f64),
    /// Clamp to `[-k, k]`.
    Stabilize(f64),
    /// 1 where `x == v`, else 0.
    EqualTo(f64),
    NotEqualTo(f64),
    GreaterThan(f64),
    LessThan(f64),
}

impl Transform {
    pub const fn name(&self) -> &'static str {
        match self {
            Transform::Neg => "neg",
            Transform::Abs => "abs",
            Transform::Exp => "exp",
            Transform::Log => "log",
            Transform::Sqrt => "sqrt",
            Transform::Sigmoid => "sigmoid",
            Transform::Tanh => "tanh",
            Transform::HardTanh => "hard_tanh",
            Transform::Floor => "floor",
            Transform::Round => "round",
            Transform::Sign => "sign",
            Transform::Identity => "identity",
            Transform::Pow(_) => "pow",
            Transform::Max(_) => "max",
            Transform::Min(_) => "min",
            Transform::Stabilize(_) => "stabilize",
            Transform::EqualTo(_) => "eq",
            Transform::NotEqualTo(_) => "neq",
            Transform::GreaterThan(_) => "gt",
            Transform::LessThan(_) => "lt",
        }
    }

    /// The configuring argument passed to kernels, 0 for unparameterized ops.
    pub const fn arg(&self) -> f64 {
        match self {
            Transform::Pow(v)
            | Transform::Max(v)
            | Transform::Min(v)
            | Transform::Stabilize(v)
            | Transform::EqualTo(v)
            | Transform::NotEqualTo(v)
            | Transform::GreaterThan(v)
            | Transform::LessThan(v) => *v,
            _ => 0.0,
        }
    }

    /// Build a transform from its name and untyped argument list.
    pub fn parse(name: &str, args: &[Scalar]) -> BufferResult<Self> {
        let unary = |t: Transform| -> BufferResult<Transform> {
            if args.is_empty() {
                Ok(t)
            } else {
                Err(BufferError::InvalidArgument(format!(
                    "{name} takes no arguments, got {}",
                    args.len()
                )))
            }
        };
        let with_arg = |make: fn(f64) -> Transform| -> BufferResult<Transform> {
            match args {
                [value] => {
                    let v = value.to_f64();
                    if v.is_nan() {
                        return Err(BufferError::InvalidArgument(format!(
                            "{name} argument must not be NaN"
                        )));
                    }
                    Ok(make(v))
                }
                _ => Err(BufferError::InvalidArgument(format!(
                    "{name} takes exactly one argument, got {}",
                    args.len()
                ))),
            }
        };

        match name {
            "neg" => unary(Transform::Neg),
            "abs" => unary(Transform::Abs),
            "exp" => unary(Transform::Exp),
            "log" => unary(Transform::Log),
            "sqrt" => unary(Transform::Sqrt),
            "sigmoid" => unary(Transform::Sigmoid),
            "tanh" => unary(Transform::Tanh),
            "hard_tanh" => unary(Transform::HardTanh),
            "floor" => unary(Transform::Floor),
            "round" => unary(Transform::Round),
            "sign" => unary(Transform::Sign),
            "identity" => unary(Transform::Identity),
            "pow" => with_arg(Transform::Pow),
            "max" => with_arg(Transform::Max),
            "min" => with_arg(Transform::Min),
            "stabilize" => with_arg(Transform::Stabilize),
            "eq" => with_arg(Transform::EqualTo),
            "neq" => with_arg(Transform::NotEqualTo),
            "gt" => with_arg(Transform::GreaterThan),
            "lt" => with_arg(Transform::LessThan),
            other => Err(BufferError::InvalidArgument(format!(
                "unknown elementwise transform '{other}'"
            ))),
        }
    }

    /// Evaluate on one value, computed in f64.
    #[inline]
    pub fn eval(&self, x: f64) -> f64 {
        let indicator = |b: bool| if b { 1.0 } else { 0.0 };
        match *self {
            Transform::Neg => -x,
            Transform::Abs => x.abs(),
            Transform::Exp => x.exp(),
            Transform::Log => x.ln(),
            Transform::Sqrt => x.sqrt(),
            Transform::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Transform::Tanh => x.tanh(),
            Transform::HardTanh => x.clamp(-1.0, 1.0),
            Transform::Floor => x.floor(),
            Transform::Round => x.round(),
            Transform::Sign => {
                if x > 0.0 {
                    1.0
                } else if x < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
            Transform::Identity => x,
            Transform::Pow(p) => x.powf(p),
            Transform::Max(t) => x.max(t),
            Transform::Min(t) => x.min(t),
            // NaN bounds leave x unchanged
            Transform::Stabilize(k) => x.max(-k.abs()).min(k.abs()),
            Transform::EqualTo(v) => indicator(x == v),
            Transform::NotEqualTo(v) => indicator(x != v),
            Transform::GreaterThan(v) => indicator(x > v),
            Transform::LessThan(v) => indicator(x < v),
        }
    }

    #[inline]
    pub fn apply<E: Element>(&self, x: E) -> E {
        E::from_f64(self.eval(x.to_f64()))
    }
}

/// A configured, reusable elementwise operation.
///
/// Obtain shared instances through [`crate::op_cache::element_wise_op`] so that
/// repeated use of the same configuration does not rebuild the descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementWiseOp {
    transform: Transform,
}

impl ElementWiseOp {
    pub fn new(transform: Transform) -> Self {
        Self { transform }
    }

    pub fn create(name: &str, args: &[Scalar]) -> BufferResult<Self> {
        Transform::parse(name, args).map(Self::new)
    }

    pub fn name(&self) -> &'static str {
        self.transform.name()
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }
}
