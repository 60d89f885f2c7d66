//! Operators, comparisons and indexing on script values.
//!
//! Nothing here calls back into script code, so container borrows taken in
//! this module never overlap with user-level mutation.

use std::cmp::Ordering;
use std::mem::size_of;
use std::rc::Rc;

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Signed, ToPrimitive, Zero};

use super::ast::{BinOp, CmpOp, UnaryOp};
use super::error::{ErrorKind, ScriptError, ScriptResult};
use super::format::percent_format;
use super::heap;
use super::value::{DictObj, SetObj, Value, MAX_VALUE_DEPTH};

const SLOT: usize = size_of::<Value>();

#[derive(Debug, Clone, Copy)]
enum Num<'a> {
    Int(i64),
    Big(&'a BigInt),
    Float(f64),
}

impl Num<'_> {
    /// Lossy; magnitudes past `f64` become infinite.
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Big(b) => b.to_f64().unwrap_or(f64::NAN),
            Num::Float(f) => f,
        }
    }

    /// Float operand for mixed arithmetic, as Python converts it.
    fn to_float(self) -> ScriptResult<f64> {
        let f = self.as_f64();
        match self {
            Num::Big(_) if !f.is_finite() => Err(ScriptError::new(
                ErrorKind::OverflowError,
                "int too large to convert to float",
            )),
            _ => Ok(f),
        }
    }

    fn to_big(self) -> Option<BigInt> {
        match self {
            Num::Int(i) => Some(BigInt::from(i)),
            Num::Big(b) => Some(b.clone()),
            Num::Float(_) => None,
        }
    }
}

fn number(value: &Value) -> Option<Num<'_>> {
    match value {
        Value::Bool(b) => Some(Num::Int(*b as i64)),
        Value::Int(i) => Some(Num::Int(*i)),
        Value::BigInt(b) => Some(Num::Big(b.value())),
        Value::Float(f) => Some(Num::Float(*f)),
        _ => None,
    }
}

fn num_cmp(x: Num, y: Num) -> Option<Ordering> {
    match (x, y) {
        (Num::Int(a), Num::Int(b)) => Some(a.cmp(&b)),
        (Num::Float(_), _) | (_, Num::Float(_)) => x.as_f64().partial_cmp(&y.as_f64()),
        (a, b) => Some(a.to_big().cmp(&b.to_big())),
    }
}

fn too_deep(what: &str) -> ScriptError {
    ScriptError::recursion(format!("maximum recursion depth exceeded in {}", what))
}

/// `==`. Nesting past the depth limit raises `RecursionError`.
pub fn py_eq(a: &Value, b: &Value) -> ScriptResult<bool> {
    eq_at(a, b, 0)
}

fn eq_at(a: &Value, b: &Value, depth: usize) -> ScriptResult<bool> {
    if depth > MAX_VALUE_DEPTH {
        return Err(too_deep("comparison"));
    }
    Ok(match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x.as_str() == y.as_str(),
        (Value::List(x), Value::List(y)) => {
            Rc::ptr_eq(x, y) || seq_eq(x.borrow().items(), y.borrow().items(), depth)?
        }
        (Value::Tuple(x), Value::Tuple(y)) => seq_eq(x.items(), y.items(), depth)?,
        (Value::Dict(x), Value::Dict(y)) => {
            if Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            let (x, y) = (x.borrow(), y.borrow());
            if x.len() != y.len() {
                return Ok(false);
            }
            for (k, v) in x.iter() {
                let matched = match k.hash_key().ok().and_then(|h| y.get(&h)) {
                    Some(w) => eq_at(v, w, depth + 1)?,
                    None => false,
                };
                if !matched {
                    return Ok(false);
                }
            }
            true
        }
        (Value::Set(x), Value::Set(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.entries().all(|(h, _)| y.contains(h))
        }
        (Value::Range(x), Value::Range(y)) => {
            let (lx, ly) = (x.len(), y.len());
            lx == ly && (lx == 0 || (x.start == y.start && (lx == 1 || x.step == y.step)))
        }
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Method(x), Value::Method(y)) => Rc::ptr_eq(x, y),
        (Value::Exception(x), Value::Exception(y)) => Rc::ptr_eq(x, y),
        (Value::Builtin(x), Value::Builtin(y)) => x == y,
        (Value::ExceptionType(x), Value::ExceptionType(y)) => x == y,
        _ => match (number(a), number(b)) {
            (Some(x), Some(y)) => num_cmp(x, y) == Some(Ordering::Equal),
            _ => false,
        },
    })
}

fn seq_eq(xs: &[Value], ys: &[Value], depth: usize) -> ScriptResult<bool> {
    if xs.len() != ys.len() {
        return Ok(false);
    }
    for (x, y) in xs.iter().zip(ys) {
        if !eq_at(x, y, depth + 1)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Total order used by `sorted`, `min` and `max`. Unorderable pairs are a `TypeError`.
pub fn py_cmp(a: &Value, b: &Value) -> ScriptResult<Ordering> {
    cmp_at(a, b, "<", 0)
}

fn cmp_at(a: &Value, b: &Value, symbol: &str, depth: usize) -> ScriptResult<Ordering> {
    if depth > MAX_VALUE_DEPTH {
        return Err(too_deep("comparison"));
    }
    if let (Some(x), Some(y)) = (number(a), number(b)) {
        return Ok(num_cmp(x, y).unwrap_or(Ordering::Equal));
    }
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x.as_str().cmp(y.as_str())),
        (Value::List(x), Value::List(y)) => seq_cmp(x.borrow().items(), y.borrow().items(), symbol, depth),
        (Value::Tuple(x), Value::Tuple(y)) => seq_cmp(x.items(), y.items(), symbol, depth),
        (Value::Set(_), Value::Set(_)) => Ok(if subset(a, b, true) {
            Ordering::Less
        } else if subset(b, a, true) {
            Ordering::Greater
        } else {
            Ordering::Equal
        }),
        _ => Err(ScriptError::type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            symbol,
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn seq_cmp(xs: &[Value], ys: &[Value], symbol: &str, depth: usize) -> ScriptResult<Ordering> {
    for (x, y) in xs.iter().zip(ys) {
        if !eq_at(x, y, depth + 1)? {
            return cmp_at(x, y, symbol, depth + 1);
        }
    }
    Ok(xs.len().cmp(&ys.len()))
}

fn subset(a: &Value, b: &Value, proper: bool) -> bool {
    match (a, b) {
        (Value::Set(x), Value::Set(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.entries().all(|(h, _)| y.contains(h)) && (!proper || x.len() < y.len())
        }
        _ => false,
    }
}

fn identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::BigInt(x), Value::BigInt(y)) => Rc::ptr_eq(x, y),
        (Value::Str(x), Value::Str(y)) => Rc::ptr_eq(x, y) || x.as_str() == y.as_str(),
        (Value::List(x), Value::List(y)) => Rc::ptr_eq(x, y),
        (Value::Tuple(x), Value::Tuple(y)) => Rc::ptr_eq(x, y),
        (Value::Dict(x), Value::Dict(y)) => Rc::ptr_eq(x, y),
        (Value::Set(x), Value::Set(y)) => Rc::ptr_eq(x, y),
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Exception(x), Value::Exception(y)) => Rc::ptr_eq(x, y),
        (Value::Builtin(x), Value::Builtin(y)) => x == y,
        (Value::ExceptionType(x), Value::ExceptionType(y)) => x == y,
        _ => false,
    }
}

pub fn compare(op: CmpOp, a: &Value, b: &Value) -> ScriptResult<bool> {
    let ordering_test = |o: Ordering| match op {
        CmpOp::Lt => o == Ordering::Less,
        CmpOp::LtE => o != Ordering::Greater,
        CmpOp::Gt => o == Ordering::Greater,
        _ => o != Ordering::Less,
    };
    match op {
        CmpOp::Eq => py_eq(a, b),
        CmpOp::NotEq => Ok(!py_eq(a, b)?),
        CmpOp::Is => Ok(identical(a, b)),
        CmpOp::IsNot => Ok(!identical(a, b)),
        CmpOp::In => contains(b, a),
        CmpOp::NotIn => Ok(!contains(b, a)?),
        CmpOp::Lt | CmpOp::LtE | CmpOp::Gt | CmpOp::GtE => {
            if let (Some(x), Some(y)) = (number(a), number(b)) {
                return Ok(num_cmp(x, y).is_some_and(ordering_test));
            }
            if let (Value::Set(_), Value::Set(_)) = (a, b) {
                return Ok(match op {
                    CmpOp::Lt => subset(a, b, true),
                    CmpOp::LtE => subset(a, b, false),
                    CmpOp::Gt => subset(b, a, true),
                    _ => subset(b, a, false),
                });
            }
            Ok(ordering_test(cmp_at(a, b, op.symbol(), 0)?))
        }
    }
}

pub fn contains(container: &Value, item: &Value) -> ScriptResult<bool> {
    match container {
        Value::Str(s) => match item {
            Value::Str(sub) => Ok(s.as_str().contains(sub.as_str())),
            other => Err(ScriptError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(l) => Ok(position(l.borrow().items(), item)?.is_some()),
        Value::Tuple(t) => Ok(position(t.items(), item)?.is_some()),
        Value::Dict(d) => Ok(d.borrow().contains(&item.hash_key()?)),
        Value::Set(s) => Ok(s.borrow().contains(&item.hash_key()?)),
        Value::Range(r) => Ok(match item {
            Value::Float(f) if f.fract() == 0.0 => r.contains(*f as i64),
            other => other.as_int().is_some_and(|i| r.contains(i)),
        }),
        other => Err(ScriptError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

/// Index of the first element equal to `item`.
pub fn position(items: &[Value], item: &Value) -> ScriptResult<Option<usize>> {
    for (i, x) in items.iter().enumerate() {
        if py_eq(x, item)? {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

/// An int too large to use as a length, count or position.
pub fn index_overflow() -> ScriptError {
    ScriptError::new(ErrorKind::OverflowError, "cannot fit 'int' into an index-sized integer")
}

fn unsupported(op: BinOp, a: &Value, b: &Value) -> ScriptError {
    ScriptError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        a.type_name(),
        b.type_name()
    ))
}

pub fn binary(op: BinOp, a: &Value, b: &Value) -> ScriptResult<Value> {
    match (op, a, b) {
        (BinOp::Add, Value::Str(x), Value::Str(y)) => {
            let (x, y) = (x.as_str(), y.as_str());
            heap::reserve(x.len() + y.len())?;
            let mut out = String::with_capacity(x.len() + y.len());
            out.push_str(x);
            out.push_str(y);
            Ok(Value::str(out))
        }
        (BinOp::Add, Value::List(x), Value::List(y)) => {
            let items = concat(x.borrow().items(), y.borrow().items())?;
            Ok(Value::list(items))
        }
        (BinOp::Add, Value::Tuple(x), Value::Tuple(y)) => Ok(Value::tuple(concat(x.items(), y.items())?)),
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if n.as_int().is_some() => {
            let count = n.as_int().unwrap_or(0).max(0) as usize;
            heap::reserve(s.as_str().len().saturating_mul(count))?;
            Ok(Value::str(s.as_str().repeat(count)))
        }
        (BinOp::Mul, Value::List(l), n) | (BinOp::Mul, n, Value::List(l)) if n.as_int().is_some() => {
            let items = repeat(l.borrow().items(), n.as_int().unwrap_or(0))?;
            Ok(Value::list(items))
        }
        (BinOp::Mul, Value::Tuple(t), n) | (BinOp::Mul, n, Value::Tuple(t)) if n.as_int().is_some() => {
            Ok(Value::tuple(repeat(t.items(), n.as_int().unwrap_or(0))?))
        }
        (BinOp::Mul, Value::Str(_) | Value::List(_) | Value::Tuple(_), Value::BigInt(_))
        | (BinOp::Mul, Value::BigInt(_), Value::Str(_) | Value::List(_) | Value::Tuple(_)) => Err(index_overflow()),
        (BinOp::Mod, Value::Str(template), args) => Ok(Value::str(percent_format(template.as_str(), args)?)),
        (BinOp::Sub | BinOp::BitOr | BinOp::BitAnd | BinOp::BitXor, Value::Set(x), Value::Set(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            let mut out = SetObj::new();
            match op {
                BinOp::Sub => {
                    for (h, v) in x.entries().filter(|(h, _)| !y.contains(h)) {
                        out.add_hashed(h.clone(), v.clone());
                    }
                }
                BinOp::BitOr => {
                    for (h, v) in x.entries().chain(y.entries()) {
                        out.add_hashed(h.clone(), v.clone());
                    }
                }
                BinOp::BitAnd => {
                    for (h, v) in x.entries().filter(|(h, _)| y.contains(h)) {
                        out.add_hashed(h.clone(), v.clone());
                    }
                }
                _ => {
                    for (h, v) in x.entries().filter(|(h, _)| !y.contains(h)) {
                        out.add_hashed(h.clone(), v.clone());
                    }
                    for (h, v) in y.entries().filter(|(h, _)| !x.contains(h)) {
                        out.add_hashed(h.clone(), v.clone());
                    }
                }
            }
            Ok(Value::set(out))
        }
        (BinOp::BitOr, Value::Dict(x), Value::Dict(y)) => {
            let mut out = DictObj::new();
            for (k, v) in x.borrow().iter().chain(y.borrow().iter()) {
                out.insert(k.clone(), v.clone())?;
            }
            Ok(Value::dict(out))
        }
        _ => match (number(a), number(b)) {
            (Some(Num::Int(x)), Some(Num::Int(y))) => int_op(op, x, y, a, b),
            (Some(x @ Num::Float(_)), Some(y)) | (Some(x), Some(y @ Num::Float(_))) => {
                float_op(op, x.to_float()?, y.to_float()?, a, b)
            }
            (Some(x), Some(y)) => match (x.to_big(), y.to_big()) {
                (Some(x), Some(y)) => big_op(op, x, y, a, b),
                _ => Err(unsupported(op, a, b)),
            },
            _ => Err(unsupported(op, a, b)),
        },
    }
}

fn concat(xs: &[Value], ys: &[Value]) -> ScriptResult<Vec<Value>> {
    heap::reserve((xs.len() + ys.len()).saturating_mul(SLOT))?;
    let mut items = Vec::with_capacity(xs.len() + ys.len());
    items.extend_from_slice(xs);
    items.extend_from_slice(ys);
    Ok(items)
}

fn repeat(items: &[Value], count: i64) -> ScriptResult<Vec<Value>> {
    let count = count.max(0) as usize;
    let total = items.len().saturating_mul(count);
    heap::reserve(total.saturating_mul(SLOT))?;
    let mut out = Vec::with_capacity(total);
    for _ in 0..count {
        out.extend_from_slice(items);
    }
    Ok(out)
}

/// Machine-word fast path. Results that leave `i64` are redone in [`big_op`].
fn int_op(op: BinOp, x: i64, y: i64, a: &Value, b: &Value) -> ScriptResult<Value> {
    let int = |r: Option<i64>| match r {
        Some(r) => Ok(Value::Int(r)),
        None => big_op(op, BigInt::from(x), BigInt::from(y), a, b),
    };
    match op {
        BinOp::Add => int(x.checked_add(y)),
        BinOp::Sub => int(x.checked_sub(y)),
        BinOp::Mul => int(x.checked_mul(y)),
        BinOp::Div => {
            if y == 0 {
                return Err(ScriptError::zero_division("division by zero"));
            }
            Ok(Value::Float(x as f64 / y as f64))
        }
        BinOp::FloorDiv | BinOp::Mod => {
            if y == 0 {
                return Err(ScriptError::zero_division("integer division or modulo by zero"));
            }
            let r = x.checked_rem(y).unwrap_or(0);
            let adjust = r != 0 && ((r < 0) != (y < 0));
            if op == BinOp::Mod {
                return Ok(Value::Int(if adjust { r + y } else { r }));
            }
            match x.checked_div(y) {
                Some(q) => Ok(Value::Int(if adjust { q - 1 } else { q })),
                None => int(None),
            }
        }
        BinOp::Pow => {
            if y < 0 {
                if x == 0 {
                    return Err(ScriptError::zero_division("0.0 cannot be raised to a negative power"));
                }
                return Ok(Value::Float((x as f64).powf(y as f64)));
            }
            int(u32::try_from(y).ok().and_then(|exp| x.checked_pow(exp)))
        }
        BinOp::LShift => {
            if y < 0 {
                return Err(ScriptError::value_error("negative shift count"));
            }
            if x == 0 {
                return Ok(Value::Int(0));
            }
            let shifted = (y < 63).then(|| x << y).filter(|s| s >> y == x);
            int(shifted)
        }
        BinOp::RShift => {
            if y < 0 {
                return Err(ScriptError::value_error("negative shift count"));
            }
            Ok(Value::Int(if y >= 64 { if x < 0 { -1 } else { 0 } } else { x >> y }))
        }
        BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => {
            let r = match op {
                BinOp::BitAnd => x & y,
                BinOp::BitOr => x | y,
                _ => x ^ y,
            };
            if let (Value::Bool(_), Value::Bool(_)) = (a, b) {
                return Ok(Value::Bool(r != 0));
            }
            Ok(Value::Int(r))
        }
        BinOp::MatMul => Err(unsupported(op, a, b)),
    }
}

/// Bytes needed for an integer of `bits` bits.
fn bits_to_bytes(bits: u64) -> usize {
    usize::try_from(bits.div_ceil(8)).unwrap_or(usize::MAX)
}


/// Arbitrary precision arithmetic. Large results are reserved against the
/// memory ceiling before they are built.
fn big_op(op: BinOp, x: BigInt, y: BigInt, a: &Value, b: &Value) -> ScriptResult<Value> {
    let result = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => {
            heap::reserve(bits_to_bytes(x.bits().saturating_add(y.bits())))?;
            x * y
        }
        BinOp::Div => {
            if y.is_zero() {
                return Err(ScriptError::zero_division("division by zero"));
            }
            let q = Num::Big(&x).to_float()? / Num::Big(&y).to_float()?;
            return Ok(Value::Float(q));
        }
        BinOp::FloorDiv | BinOp::Mod => {
            if y.is_zero() {
                return Err(ScriptError::zero_division("integer division or modulo by zero"));
            }
            if op == BinOp::Mod {
                x.mod_floor(&y)
            } else {
                x.div_floor(&y)
            }
        }
        BinOp::Pow => {
            if y.is_negative() {
                if x.is_zero() {
                    return Err(ScriptError::zero_division("0.0 cannot be raised to a negative power"));
                }
                let f = Num::Big(&x).to_float()?.powf(Num::Big(&y).to_float()?);
                return Ok(Value::Float(f));
            }
            let exp = match y.to_u32() {
                Some(exp) => exp,
                // only 0, 1 and -1 survive an exponent this large
                None if x.is_zero() || x.is_one() => return Ok(Value::int(x)),
                None if x == BigInt::from(-1) => return Ok(Value::Int(if y.is_odd() { -1 } else { 1 })),
                None => return Err(ScriptError::memory()),
            };
            heap::reserve(bits_to_bytes(x.bits().saturating_mul(u64::from(exp))))?;
            x.pow(exp)
        }
        BinOp::LShift => {
            if y.is_negative() {
                return Err(ScriptError::value_error("negative shift count"));
            }
            let shift = y.to_usize().ok_or_else(index_overflow)?;
            if x.is_zero() {
                return Ok(Value::Int(0));
            }
            heap::reserve(bits_to_bytes(x.bits().saturating_add(shift as u64)))?;
            x << shift
        }
        BinOp::RShift => {
            if y.is_negative() {
                return Err(ScriptError::value_error("negative shift count"));
            }
            match y.to_u64() {
                Some(shift) if shift < x.bits() => x >> shift as usize,
                _ => return Ok(Value::Int(if x.is_negative() { -1 } else { 0 })),
            }
        }
        BinOp::BitAnd => x & y,
        BinOp::BitOr => x | y,
        BinOp::BitXor => x ^ y,
        BinOp::MatMul => return Err(unsupported(op, a, b)),
    };
    Ok(Value::int(result))
}

fn float_op(op: BinOp, x: f64, y: f64, a: &Value, b: &Value) -> ScriptResult<Value> {
    let r = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y == 0.0 {
                return Err(ScriptError::zero_division("float division by zero"));
            }
            x / y
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                return Err(ScriptError::zero_division("float floor division by zero"));
            }
            (x / y).floor()
        }
        BinOp::Mod => {
            if y == 0.0 {
                return Err(ScriptError::zero_division("float modulo"));
            }
            let r = x % y;
            if r != 0.0 && ((r < 0.0) != (y < 0.0)) {
                r + y
            } else {
                r
            }
        }
        BinOp::Pow => {
            if x == 0.0 && y < 0.0 {
                return Err(ScriptError::zero_division("0.0 cannot be raised to a negative power"));
            }
            let r = x.powf(y);
            if r.is_nan() && !x.is_nan() && !y.is_nan() {
                return Err(ScriptError::value_error("math domain error"));
            }
            if r.is_infinite() && x.is_finite() && y.is_finite() {
                return Err(ScriptError::new(ErrorKind::OverflowError, "numerical result out of range"));
            }
            r
        }
        _ => return Err(unsupported(op, a, b)),
    };
    Ok(Value::Float(r))
}

pub fn unary(op: UnaryOp, value: &Value) -> ScriptResult<Value> {
    let symbol = match op {
        UnaryOp::Not => return Ok(Value::Bool(!value.truthy())),
        UnaryOp::Neg => "-",
        UnaryOp::Pos => "+",
        UnaryOp::Invert => "~",
    };
    match (op, value) {
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Pos, Value::Float(f)) => Ok(Value::Float(*f)),
        (_, Value::BigInt(b)) => {
            let x = b.value();
            Ok(match op {
                UnaryOp::Neg => Value::int(-x),
                UnaryOp::Pos => value.clone(),
                _ => Value::int(-(x + 1u32)),
            })
        }
        (_, v) if v.as_int().is_some() => {
            let i = v.as_int().unwrap_or(0);
            Ok(match op {
                UnaryOp::Neg => i.checked_neg().map_or_else(|| Value::int(-BigInt::from(i)), Value::Int),
                UnaryOp::Pos => Value::Int(i),
                _ => Value::Int(!i),
            })
        }
        _ => Err(ScriptError::type_error(format!(
            "bad operand type for unary {}: '{}'",
            symbol,
            value.type_name()
        ))),
    }
}

pub fn len(value: &Value) -> ScriptResult<usize> {
    match value {
        Value::Str(s) => Ok(s.as_str().chars().count()),
        Value::List(l) => Ok(l.borrow().len()),
        Value::Tuple(t) => Ok(t.items().len()),
        Value::Dict(d) => Ok(d.borrow().len()),
        Value::Set(s) => Ok(s.borrow().len()),
        Value::Range(r) => Ok(r.len()),
        other => Err(ScriptError::type_error(format!(
            "object of type '{}' has no len()",
            other.type_name()
        ))),
    }
}

pub fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let i = if index < 0 { index + len } else { index };
    (0..len).contains(&i).then_some(i as usize)
}

fn seq_index(index: &Value, kind: &str) -> ScriptResult<i64> {
    if let Value::BigInt(_) = index {
        return Err(ScriptError::index_error("cannot fit 'int' into an index-sized integer"));
    }
    index.as_int().ok_or_else(|| {
        ScriptError::type_error(format!(
            "{} indices must be integers or slices, not {}",
            kind,
            index.type_name()
        ))
    })
}

pub fn get_item(container: &Value, index: &Value) -> ScriptResult<Value> {
    match container {
        Value::List(l) => {
            let i = seq_index(index, "list")?;
            let list = l.borrow();
            normalize_index(i, list.len())
                .map(|i| list.items()[i].clone())
                .ok_or_else(|| ScriptError::index_error("list index out of range"))
        }
        Value::Tuple(t) => {
            let i = seq_index(index, "tuple")?;
            normalize_index(i, t.items().len())
                .map(|i| t.items()[i].clone())
                .ok_or_else(|| ScriptError::index_error("tuple index out of range"))
        }
        Value::Str(s) => {
            let i = seq_index(index, "string")?;
            let s = s.as_str();
            normalize_index(i, s.chars().count())
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::str(c.to_string()))
                .ok_or_else(|| ScriptError::index_error("string index out of range"))
        }
        Value::Range(r) => {
            let i = seq_index(index, "range")?;
            normalize_index(i, r.len())
                .map(|i| Value::Int(r.get(i)))
                .ok_or_else(|| ScriptError::index_error("range object index out of range"))
        }
        Value::Dict(d) => d
            .borrow()
            .lookup(index)?
            .ok_or_else(|| ScriptError::key_error(index.repr())),
        other => Err(ScriptError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// Slice bounds as given in `a[lower:upper:step]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SliceSpec {
    pub lower: Option<i64>,
    pub upper: Option<i64>,
    pub step: Option<i64>,
}

impl SliceSpec {
    pub fn bound(value: Option<&Value>) -> ScriptResult<Option<i64>> {
        match value {
            None | Some(Value::None) => Ok(None),
            Some(v) => v.as_int().map(Some).ok_or_else(|| {
                ScriptError::type_error("slice indices must be integers or None")
            }),
        }
    }

    fn step(&self) -> ScriptResult<i64> {
        match self.step.unwrap_or(1) {
            0 => Err(ScriptError::value_error("slice step cannot be zero")),
            step => Ok(step),
        }
    }

    /// Clamped `(start, stop)` for a forward slice.
    fn forward(&self, len: usize) -> (usize, usize) {
        let len = len as i64;
        let clamp = |v: i64| if v < 0 { (v + len).max(0) } else { v.min(len) };
        let start = self.lower.map(clamp).unwrap_or(0);
        let stop = self.upper.map(clamp).unwrap_or(len).max(start);
        (start as usize, stop as usize)
    }

    pub fn positions(&self, len: usize) -> ScriptResult<Vec<usize>> {
        let step = self.step()?;
        if step > 0 {
            let (start, stop) = self.forward(len);
            return Ok((start..stop).step_by(step as usize).collect());
        }
        let n = len as i64;
        let clamp = |v: i64| if v < 0 { (v + n).max(-1) } else { v.min(n - 1) };
        let mut i = self.lower.map(clamp).unwrap_or(n - 1);
        let stop = self.upper.map(clamp).unwrap_or(-1);
        let mut out = Vec::new();
        while i > stop {
            out.push(i as usize);
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
        Ok(out)
    }
}

pub fn get_slice(container: &Value, slice: &SliceSpec) -> ScriptResult<Value> {
    match container {
        Value::List(l) => {
            let list = l.borrow();
            let positions = slice.positions(list.len())?;
            heap::reserve(positions.len().saturating_mul(SLOT))?;
            Ok(Value::list(positions.iter().map(|&i| list.items()[i].clone()).collect()))
        }
        Value::Tuple(t) => {
            let positions = slice.positions(t.items().len())?;
            Ok(Value::tuple(positions.iter().map(|&i| t.items()[i].clone()).collect()))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.as_str().chars().collect();
            let positions = slice.positions(chars.len())?;
            Ok(Value::str(positions.iter().map(|&i| chars[i]).collect::<String>()))
        }
        Value::Range(r) => {
            let positions = slice.positions(r.len())?;
            heap::reserve(positions.len().saturating_mul(SLOT))?;
            Ok(Value::list(positions.iter().map(|&i| Value::Int(r.get(i))).collect()))
        }
        other => Err(ScriptError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

pub fn set_item(container: &Value, index: Value, value: Value) -> ScriptResult<()> {
    match container {
        Value::List(l) => {
            let i = seq_index(&index, "list")?;
            let mut list = l.borrow_mut();
            let i = normalize_index(i, list.len())
                .ok_or_else(|| ScriptError::index_error("list assignment index out of range"))?;
            list.update(|items| items[i] = value);
            Ok(())
        }
        Value::Dict(d) => d.borrow_mut().insert(index, value),
        other => Err(ScriptError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

pub fn set_slice(container: &Value, slice: &SliceSpec, values: Vec<Value>) -> ScriptResult<()> {
    let Value::List(l) = container else {
        return Err(ScriptError::type_error(format!(
            "'{}' object does not support slice assignment",
            container.type_name()
        )));
    };
    let mut list = l.borrow_mut();
    if slice.step()? == 1 {
        let (start, stop) = slice.forward(list.len());
        list.update(|items| {
            items.splice(start..stop, values);
        });
        return Ok(());
    }
    let positions = slice.positions(list.len())?;
    if positions.len() != values.len() {
        return Err(ScriptError::value_error(format!(
            "attempt to assign sequence of size {} to extended slice of size {}",
            values.len(),
            positions.len()
        )));
    }
    list.update(|items| {
        for (p, v) in positions.into_iter().zip(values) {
            items[p] = v;
        }
    });
    Ok(())
}

pub fn del_item(container: &Value, index: &Value) -> ScriptResult<()> {
    match container {
        Value::List(l) => {
            let i = seq_index(index, "list")?;
            let mut list = l.borrow_mut();
            let i = normalize_index(i, list.len())
                .ok_or_else(|| ScriptError::index_error("list assignment index out of range"))?;
            list.update(|items| items.remove(i));
            Ok(())
        }
        Value::Dict(d) => {
            let key = index.hash_key()?;
            let removed = d.borrow_mut().remove(&key);
            removed.map(|_| ()).ok_or_else(|| ScriptError::key_error(index.repr()))
        }
        other => Err(ScriptError::type_error(format!(
            "'{}' object doesn't support item deletion",
            other.type_name()
        ))),
    }
}

pub fn del_slice(container: &Value, slice: &SliceSpec) -> ScriptResult<()> {
    let Value::List(l) = container else {
        return Err(ScriptError::type_error(format!(
            "'{}' object doesn't support item deletion",
            container.type_name()
        )));
    };
    let mut list = l.borrow_mut();
    let positions = slice.positions(list.len())?;
    let mut doomed = vec![false; list.len()];
    for p in positions {
        doomed[p] = true;
    }
    list.update(|items| {
        let mut i = 0;
        items.retain(|_| {
            let keep = !doomed[i];
            i += 1;
            keep
        });
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> Value {
        Value::list(values.iter().map(|&i| Value::Int(i)).collect())
    }

    #[test]
    fn numeric_equality_crosses_types() {
        assert!(py_eq(&Value::Int(1), &Value::Float(1.0)).unwrap());
        assert!(py_eq(&Value::Bool(true), &Value::Int(1)).unwrap());
        assert!(!py_eq(&ints(&[1]), &Value::tuple(vec![Value::Int(1)])).unwrap());
    }

    fn nested(depth: usize) -> Value {
        let mut value = Value::list(Vec::new());
        for _ in 0..depth {
            value = Value::list(vec![value]);
        }
        value
    }

    #[test]
    fn deep_equality_raises_recursion_error() {
        let err = py_eq(&nested(5_000), &nested(5_000)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::RecursionError);
        let err = compare(CmpOp::Lt, &nested(5_000), &nested(5_001)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::RecursionError);
        assert!(py_eq(&nested(50), &nested(50)).unwrap());
    }

    #[test]
    fn floor_division_and_modulo_round_toward_negative_infinity() {
        let div = binary(BinOp::FloorDiv, &Value::Int(-7), &Value::Int(2)).unwrap();
        let rem = binary(BinOp::Mod, &Value::Int(-7), &Value::Int(2)).unwrap();
        assert_eq!(div.as_int(), Some(-4));
        assert_eq!(rem.as_int(), Some(1));
    }

    #[test]
    fn integers_promote_past_i64() {
        let doubled = binary(BinOp::Mul, &Value::Int(i64::MAX), &Value::Int(2)).unwrap();
        assert_eq!(doubled.repr(), "18446744073709551614");
        let back = binary(BinOp::FloorDiv, &doubled, &Value::Int(2)).unwrap();
        assert!(matches!(back, Value::Int(i64::MAX)));

        let quarter = binary(BinOp::Pow, &Value::Int(2), &Value::Int(62)).unwrap();
        let half = binary(BinOp::Add, &quarter, &quarter).unwrap();
        let max = binary(BinOp::Sub, &half, &Value::Int(1)).unwrap();
        assert!(matches!(max, Value::Int(i64::MAX)));

        let big = binary(BinOp::Pow, &Value::Int(10), &Value::Int(30)).unwrap();
        assert_eq!(big.repr(), "1000000000000000000000000000000");
        assert!(compare(CmpOp::Gt, &big, &Value::Int(i64::MAX)).unwrap());
        assert!(py_eq(&big, &Value::Float(1e30)).unwrap());
        assert_eq!(unary(UnaryOp::Neg, &Value::Int(i64::MIN)).unwrap().repr(), "9223372036854775808");
        let rem = binary(BinOp::Mod, &Value::int(-BigInt::from(u64::MAX)), &Value::Int(10)).unwrap();
        assert_eq!(rem.as_int(), Some(5));

        let err = binary(BinOp::Div, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ZeroDivisionError);
    }

    #[test]
    fn mixed_type_ordering_is_a_type_error() {
        let err = compare(CmpOp::Lt, &Value::Int(1), &Value::str("a")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeError);
        assert!(err.message.contains("'<'"));
    }

    #[test]
    fn sequences_compare_lexicographically() {
        assert_eq!(py_cmp(&ints(&[1, 2]), &ints(&[1, 3])).unwrap(), Ordering::Less);
        assert_eq!(py_cmp(&ints(&[1, 2, 0]), &ints(&[1, 2])).unwrap(), Ordering::Greater);
    }

    #[test]
    fn slices_follow_python_clamping() {
        let list = ints(&[0, 1, 2, 3, 4]);
        let rev = SliceSpec { step: Some(-1), ..SliceSpec::default() };
        assert_eq!(get_slice(&list, &rev).unwrap().repr(), "[4, 3, 2, 1, 0]");
        let mid = SliceSpec { lower: Some(1), upper: Some(-1), step: None };
        assert_eq!(get_slice(&list, &mid).unwrap().repr(), "[1, 2, 3]");
        let wide = SliceSpec { lower: Some(-100), upper: Some(100), step: Some(2) };
        assert_eq!(get_slice(&list, &wide).unwrap().repr(), "[0, 2, 4]");
    }

    #[test]
    fn slice_assignment_splices() {
        let list = ints(&[0, 1, 2, 3]);
        let spec = SliceSpec { lower: Some(1), upper: Some(3), step: None };
        set_slice(&list, &spec, vec![Value::Int(9)]).unwrap();
        assert_eq!(list.repr(), "[0, 9, 3]");
    }

    #[test]
    fn string_repetition_and_membership() {
        let s = binary(BinOp::Mul, &Value::str("ab"), &Value::Int(3)).unwrap();
        assert_eq!(s.to_str(), "ababab");
        assert!(contains(&Value::str("hello"), &Value::str("ell")).unwrap());
        assert!(contains(&Value::str("hello"), &Value::Int(1)).is_err());
    }
}
