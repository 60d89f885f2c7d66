//! Builtin functions and the methods of the builtin types.

use std::cmp::Ordering;
use std::mem::size_of;

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{FromPrimitive, Signed, ToPrimitive};

use super::ast::BinOp;
use super::error::{ErrorKind, ScriptError, ScriptResult};
use super::format::format_template;
use super::heap;
use super::interp::{Interpreter, Iter};
use super::ops::{self, normalize_index};
use super::value::{DictObj, RangeObj, SetObj, Value};
use crate::sort::try_sort_indices;

const SLOT: usize = size_of::<Value>();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Print,
    Len,
    Range,
    Str,
    Int,
    Float,
    Bool,
    List,
    Dict,
    Set,
    Tuple,
    Abs,
    Max,
    Min,
    Sum,
    Sorted,
    Enumerate,
    Zip,
    Map,
    Filter,
    Reversed,
    Any,
    All,
    Round,
}

const BUILTINS: &[(Builtin, &str)] = &[
    (Builtin::Print, "print"),
    (Builtin::Len, "len"),
    (Builtin::Range, "range"),
    (Builtin::Str, "str"),
    (Builtin::Int, "int"),
    (Builtin::Float, "float"),
    (Builtin::Bool, "bool"),
    (Builtin::List, "list"),
    (Builtin::Dict, "dict"),
    (Builtin::Set, "set"),
    (Builtin::Tuple, "tuple"),
    (Builtin::Abs, "abs"),
    (Builtin::Max, "max"),
    (Builtin::Min, "min"),
    (Builtin::Sum, "sum"),
    (Builtin::Sorted, "sorted"),
    (Builtin::Enumerate, "enumerate"),
    (Builtin::Zip, "zip"),
    (Builtin::Map, "map"),
    (Builtin::Filter, "filter"),
    (Builtin::Reversed, "reversed"),
    (Builtin::Any, "any"),
    (Builtin::All, "all"),
    (Builtin::Round, "round"),
];

impl Builtin {
    pub fn name(self) -> &'static str {
        BUILTINS
            .iter()
            .find(|(builtin, _)| *builtin == self)
            .map(|(_, name)| *name)
            .unwrap_or("builtin")
    }

    pub fn from_name(name: &str) -> Option<Builtin> {
        BUILTINS.iter().find(|(_, n)| *n == name).map(|(builtin, _)| *builtin)
    }
}

const LIST_METHODS: &[&str] = &[
    "append", "extend", "insert", "remove", "pop", "index", "count", "sort", "reverse", "copy", "clear",
];
const DICT_METHODS: &[&str] = &[
    "get", "keys", "values", "items", "pop", "popitem", "setdefault", "update", "copy", "clear",
];
const SET_METHODS: &[&str] = &[
    "add",
    "remove",
    "discard",
    "pop",
    "union",
    "intersection",
    "difference",
    "symmetric_difference",
    "issubset",
    "issuperset",
    "isdisjoint",
    "update",
    "copy",
    "clear",
];
const STR_METHODS: &[&str] = &[
    "lower", "upper", "strip", "lstrip", "rstrip", "split", "rsplit", "splitlines", "join", "replace",
    "startswith", "endswith", "find", "rfind", "index", "rindex", "count", "isdigit", "isalpha", "isalnum",
    "isspace", "isupper", "islower", "isnumeric", "isdecimal", "istitle", "title", "capitalize", "swapcase",
    "zfill", "center", "ljust", "rjust", "format",
];
const TUPLE_METHODS: &[&str] = &["count", "index"];

pub fn has_method(receiver: &Value, name: &str) -> bool {
    let table = match receiver {
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Set(_) => SET_METHODS,
        Value::Str(_) => STR_METHODS,
        Value::Tuple(_) => TUPLE_METHODS,
        _ => return false,
    };
    table.contains(&name)
}

/// Keyword arguments not yet consumed by a call.
struct Keywords(Option<DictObj>);

impl Keywords {
    fn take(&mut self, name: &str) -> Option<Value> {
        let dict = self.0.as_mut()?;
        let key = Value::str(name).hash_key().ok()?;
        dict.remove(&key).map(|(_, value)| value)
    }

    fn finish(self, func: &str) -> ScriptResult<()> {
        match self.0.as_ref().and_then(|dict| dict.keys().into_iter().next()) {
            Some(key) => Err(ScriptError::type_error(format!(
                "'{}' is an invalid keyword argument for {}()",
                key.to_str(),
                func
            ))),
            None => Ok(()),
        }
    }
}

fn arity(func: &str, args: &[Value], min: usize, max: usize) -> ScriptResult<()> {
    let given = args.len();
    if (min..=max).contains(&given) {
        return Ok(());
    }
    let plural = |n: usize| if n == 1 { "" } else { "s" };
    let message = if min == max {
        format!("{}() takes exactly {} argument{} ({} given)", func, min, plural(min), given)
    } else if given < min {
        format!("{}() expected at least {} argument{}, got {}", func, min, plural(min), given)
    } else {
        format!("{}() expected at most {} argument{}, got {}", func, max, plural(max), given)
    };
    Err(ScriptError::type_error(message))
}

fn int_arg(value: &Value) -> ScriptResult<i64> {
    if let Value::BigInt(_) = value {
        return Err(ops::index_overflow());
    }
    value.as_int().ok_or_else(|| {
        ScriptError::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ))
    })
}

fn str_arg<'a>(func: &str, value: &'a Value) -> ScriptResult<&'a str> {
    value.as_str().ok_or_else(|| {
        ScriptError::type_error(format!(
            "{}() argument must be str, not {}",
            func,
            value.type_name()
        ))
    })
}

fn optional(value: Option<Value>) -> Option<Value> {
    value.filter(|v| !matches!(v, Value::None))
}

/// Visit each element, checking the interrupt flag between elements.
fn each(
    interp: &mut Interpreter,
    iterable: &Value,
    mut f: impl FnMut(&mut Interpreter, Value) -> ScriptResult<bool>,
) -> ScriptResult<()> {
    for item in Iter::new(iterable)? {
        interp.tick()?;
        if !f(interp, item)? {
            break;
        }
    }
    Ok(())
}

fn materialize(interp: &mut Interpreter, iterable: &Value) -> ScriptResult<Vec<Value>> {
    interp.tick()?;
    iterable.to_items()
}

/// Stable sort by `key`, comparing with the language's ordering.
pub fn sort_values(
    interp: &mut Interpreter,
    items: Vec<Value>,
    key: Option<Value>,
    reverse: bool,
) -> ScriptResult<Vec<Value>> {
    let keys = match optional(key) {
        Some(key) => items
            .iter()
            .map(|item| interp.call_value(&key, vec![item.clone()], None))
            .collect::<ScriptResult<Vec<_>>>()?,
        None => items.clone(),
    };
    let order = try_sort_indices(keys.len(), |a, b| {
        if reverse {
            ops::py_cmp(&keys[b], &keys[a])
        } else {
            ops::py_cmp(&keys[a], &keys[b])
        }
    })?;
    Ok(order.into_iter().map(|i| items[i].clone()).collect())
}

pub fn call_builtin(
    interp: &mut Interpreter,
    builtin: Builtin,
    args: Vec<Value>,
    kwargs: Option<DictObj>,
) -> ScriptResult<Value> {
    let name = builtin.name();
    let mut keywords = Keywords(kwargs);
    let result = match builtin {
        Builtin::Print => {
            let text = |value: Option<Value>, default: &str| match optional(value) {
                None => Ok(default.to_string()),
                Some(Value::Str(s)) => Ok(s.as_str().to_string()),
                Some(other) => Err(ScriptError::type_error(format!(
                    "sep and end must be None or a string, not {}",
                    other.type_name()
                ))),
            };
            let sep = text(keywords.take("sep"), " ")?;
            let end = text(keywords.take("end"), "\n")?;
            keywords.take("flush");
            let mut line = args
                .iter()
                .map(Value::checked_str)
                .collect::<ScriptResult<Vec<_>>>()?
                .join(&sep);
            line.push_str(&end);
            interp.write_output(&line);
            Value::None
        }
        Builtin::Len => {
            arity(name, &args, 1, 1)?;
            Value::Int(ops::len(&args[0])? as i64)
        }
        Builtin::Range => {
            arity(name, &args, 1, 3)?;
            let ints = args.iter().map(int_arg).collect::<ScriptResult<Vec<_>>>()?;
            let (start, stop, step) = match ints.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => unreachable!("arity checked"),
            };
            if step == 0 {
                return Err(ScriptError::value_error("range() arg 3 must not be zero"));
            }
            Value::Range(RangeObj { start, stop, step })
        }
        Builtin::Str => {
            arity(name, &args, 0, 1)?;
            Value::str(args.first().map(Value::checked_str).transpose()?.unwrap_or_default())
        }
        Builtin::Int => {
            arity(name, &args, 0, 2)?;
            let base = match args.get(1).cloned().or_else(|| keywords.take("base")) {
                Some(base) => Some(int_arg(&base)?),
                None => None,
            };
            match (args.first(), base) {
                (None, _) => Value::Int(0),
                (Some(Value::Str(s)), base) => Value::int(parse_int(s.as_str(), base.unwrap_or(10))?),
                (Some(_), Some(_)) => return Err(ScriptError::type_error("int() can't convert non-string with explicit base")),
                (Some(Value::Float(f)), None) => Value::int(float_to_int(*f)?),
                (Some(v), None) => Value::int(v.to_bigint().ok_or_else(|| {
                    ScriptError::type_error(format!(
                        "int() argument must be a string or a real number, not '{}'",
                        v.type_name()
                    ))
                })?),
            }
        }
        Builtin::Float => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Value::Float(0.0),
                Some(Value::Float(f)) => Value::Float(*f),
                Some(Value::Str(s)) => Value::Float(parse_float(s.as_str())?),
                Some(Value::BigInt(b)) => Value::Float(
                    b.value()
                        .to_f64()
                        .filter(|f| f.is_finite())
                        .ok_or_else(|| ScriptError::new(ErrorKind::OverflowError, "int too large to convert to float"))?,
                ),
                Some(v) => Value::Float(v.as_int().map(|i| i as f64).ok_or_else(|| {
                    ScriptError::type_error(format!(
                        "float() argument must be a string or a real number, not '{}'",
                        v.type_name()
                    ))
                })?),
            }
        }
        Builtin::Bool => {
            arity(name, &args, 0, 1)?;
            Value::Bool(args.first().is_some_and(Value::truthy))
        }
        Builtin::List => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                Some(iterable) => Value::list(materialize(interp, iterable)?),
                None => Value::list(Vec::new()),
            }
        }
        Builtin::Tuple => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                Some(iterable) => Value::tuple(materialize(interp, iterable)?),
                None => Value::tuple(Vec::new()),
            }
        }
        Builtin::Set => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                Some(iterable) => Value::set(SetObj::from_values(materialize(interp, iterable)?)?),
                None => Value::set(SetObj::new()),
            }
        }
        Builtin::Dict => {
            arity(name, &args, 0, 1)?;
            let mut dict = DictObj::new();
            if let Some(source) = args.first() {
                update_dict(interp, &mut dict, source)?;
            }
            if let Some(extra) = keywords.0.take() {
                for (k, v) in extra.items() {
                    dict.insert(k, v)?;
                }
            }
            Value::dict(dict)
        }
        Builtin::Abs => {
            arity(name, &args, 1, 1)?;
            match &args[0] {
                Value::Float(f) => Value::Float(f.abs()),
                v => match v.to_bigint() {
                    Some(i) => Value::int(i.abs()),
                    None => {
                        return Err(ScriptError::type_error(format!(
                            "bad operand type for abs(): '{}'",
                            v.type_name()
                        )))
                    }
                },
            }
        }
        Builtin::Max | Builtin::Min => {
            let key = optional(keywords.take("key"));
            let default = keywords.take("default");
            let want = if builtin == Builtin::Max { Ordering::Greater } else { Ordering::Less };
            extreme(interp, name, args, key, default, want)?
        }
        Builtin::Sum => {
            arity(name, &args, 1, 2)?;
            let mut total = args.get(1).cloned().or_else(|| keywords.take("start")).unwrap_or(Value::Int(0));
            if let Value::Str(_) = total {
                return Err(ScriptError::type_error("sum() can't sum strings [use ''.join(seq) instead]"));
            }
            each(interp, &args[0], |_, item| {
                total = ops::binary(BinOp::Add, &total, &item)?;
                Ok(true)
            })?;
            total
        }
        Builtin::Sorted => {
            arity(name, &args, 1, 1)?;
            let key = keywords.take("key");
            let reverse = keywords.take("reverse").is_some_and(|v| v.truthy());
            let items = materialize(interp, &args[0])?;
            Value::list(sort_values(interp, items, key, reverse)?)
        }
        Builtin::Enumerate => {
            arity(name, &args, 1, 2)?;
            let start = match args.get(1).cloned().or_else(|| keywords.take("start")) {
                Some(start) => int_arg(&start)?,
                None => 0,
            };
            let items = materialize(interp, &args[0])?;
            heap::reserve(items.len().saturating_mul(SLOT * 3))?;
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                let index = start.checked_add(i as i64).ok_or_else(ScriptError::overflow)?;
                out.push(Value::tuple(vec![Value::Int(index), item]));
            }
            Value::list(out)
        }
        Builtin::Zip => {
            let columns = args
                .iter()
                .map(|arg| materialize(interp, arg))
                .collect::<ScriptResult<Vec<_>>>()?;
            let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
            heap::reserve(rows.saturating_mul(SLOT * (columns.len() + 1)))?;
            Value::list(
                (0..rows)
                    .map(|i| Value::tuple(columns.iter().map(|column| column[i].clone()).collect()))
                    .collect(),
            )
        }
        Builtin::Map => {
            if args.len() < 2 {
                return Err(ScriptError::type_error("map() must have at least two arguments."));
            }
            let func = args[0].clone();
            let columns = args[1..]
                .iter()
                .map(|arg| materialize(interp, arg))
                .collect::<ScriptResult<Vec<_>>>()?;
            let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
            let mut out = Vec::with_capacity(rows);
            for i in 0..rows {
                let call_args = columns.iter().map(|column| column[i].clone()).collect();
                out.push(interp.call_value(&func, call_args, None)?);
            }
            Value::list(out)
        }
        Builtin::Filter => {
            arity(name, &args, 2, 2)?;
            let predicate = optional(Some(args[0].clone()));
            let mut out = Vec::new();
            for item in materialize(interp, &args[1])? {
                let keep = match &predicate {
                    Some(predicate) => interp.call_value(predicate, vec![item.clone()], None)?.truthy(),
                    None => item.truthy(),
                };
                if keep {
                    out.push(item);
                }
            }
            Value::list(out)
        }
        Builtin::Reversed => {
            arity(name, &args, 1, 1)?;
            match &args[0] {
                v @ (Value::List(_) | Value::Tuple(_) | Value::Str(_) | Value::Range(_) | Value::Dict(_)) => {
                    let mut items = materialize(interp, v)?;
                    items.reverse();
                    Value::list(items)
                }
                other => {
                    return Err(ScriptError::type_error(format!(
                        "'{}' object is not reversible",
                        other.type_name()
                    )))
                }
            }
        }
        Builtin::Any | Builtin::All => {
            arity(name, &args, 1, 1)?;
            let any = builtin == Builtin::Any;
            let mut result = !any;
            each(interp, &args[0], |_, item| {
                if item.truthy() == any {
                    result = any;
                    return Ok(false);
                }
                Ok(true)
            })?;
            Value::Bool(result)
        }
        Builtin::Round => {
            arity(name, &args, 1, 2)?;
            let digits = match optional(args.get(1).cloned().or_else(|| keywords.take("ndigits"))) {
                Some(d) => Some(int_arg(&d)?),
                None => None,
            };
            round(&args[0], digits)?
        }
    };
    keywords.finish(name)?;
    Ok(result)
}

fn extreme(
    interp: &mut Interpreter,
    func: &str,
    args: Vec<Value>,
    key: Option<Value>,
    default: Option<Value>,
    want: Ordering,
) -> ScriptResult<Value> {
    let items = match args.len() {
        0 => return Err(ScriptError::type_error(format!("{}() expected at least 1 argument, got 0", func))),
        1 => materialize(interp, &args[0])?,
        _ if default.is_some() => {
            return Err(ScriptError::type_error(format!(
                "Cannot specify a default for {}() with multiple positional arguments",
                func
            )))
        }
        _ => args,
    };
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        interp.tick()?;
        let rank = match &key {
            Some(key) => interp.call_value(key, vec![item.clone()], None)?,
            None => item.clone(),
        };
        let better = match &best {
            Some((best_rank, _)) => ops::py_cmp(&rank, best_rank)? == want,
            None => true,
        };
        if better {
            best = Some((rank, item));
        }
    }
    match (best, default) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(ScriptError::value_error(format!("{}() arg is an empty sequence", func))),
    }
}

fn update_dict(interp: &mut Interpreter, dict: &mut DictObj, source: &Value) -> ScriptResult<()> {
    if let Value::Dict(other) = source {
        let items = other.borrow().items();
        for (k, v) in items {
            dict.insert(k, v)?;
        }
        return Ok(());
    }
    for (i, pair) in materialize(interp, source)?.iter().enumerate() {
        let pair = pair.to_items().map_err(|_| {
            ScriptError::type_error(format!(
                "cannot convert dictionary update sequence element #{} to a sequence",
                i
            ))
        })?;
        let [k, v]: [Value; 2] = pair.try_into().map_err(|pair: Vec<Value>| {
            ScriptError::value_error(format!(
                "dictionary update sequence element #{} has length {}; 2 is required",
                i,
                pair.len()
            ))
        })?;
        dict.insert(k, v)?;
    }
    Ok(())
}

fn parse_int(text: &str, base: i64) -> ScriptResult<BigInt> {
    let invalid = || {
        ScriptError::value_error(format!(
            "invalid literal for int() with base {}: {}",
            base,
            Value::str(text).repr()
        ))
    };
    if base != 0 && !(2..=36).contains(&base) {
        return Err(ScriptError::value_error("int() base must be >= 2 and <= 36, or 0"));
    }
    let trimmed = text.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let lower = digits.to_ascii_lowercase();
    let prefixed = [("0x", 16), ("0o", 8), ("0b", 2)]
        .into_iter()
        .find(|(prefix, radix)| lower.starts_with(prefix) && (base == 0 || base == *radix));
    let (digits, radix) = match prefixed {
        Some((prefix, radix)) => (&digits[prefix.len()..], radix),
        None => (digits, if base == 0 { 10 } else { base }),
    };
    let digits = digits.strip_prefix('_').filter(|_| prefixed.is_some()).unwrap_or(digits);
    if digits.is_empty() || digits.starts_with(['_', '+', '-']) || digits.ends_with('_') || digits.contains("__") {
        return Err(invalid());
    }
    let cleaned: String = digits.chars().filter(|&c| c != '_').collect();
    let magnitude = BigInt::parse_bytes(cleaned.as_bytes(), radix as u32).ok_or_else(invalid)?;
    Ok(if negative { -magnitude } else { magnitude })
}

fn parse_float(text: &str) -> ScriptResult<f64> {
    let invalid = || {
        ScriptError::value_error(format!(
            "could not convert string to float: {}",
            Value::str(text).repr()
        ))
    };
    let trimmed = text.trim();
    if trimmed.starts_with('_') || trimmed.ends_with('_') || trimmed.contains("__") {
        return Err(invalid());
    }
    let cleaned: String = trimmed.chars().filter(|&c| c != '_').collect();
    cleaned.parse::<f64>().map_err(|_| invalid())
}

fn float_to_int(f: f64) -> ScriptResult<BigInt> {
    if f.is_nan() {
        return Err(ScriptError::value_error("cannot convert float NaN to integer"));
    }
    BigInt::from_f64(f.trunc()).ok_or_else(|| {
        ScriptError::new(ErrorKind::OverflowError, "cannot convert float infinity to integer")
    })
}

fn round(value: &Value, digits: Option<i64>) -> ScriptResult<Value> {
    match (value, digits) {
        (Value::Float(f), None) => Ok(Value::int(float_to_int(f.round_ties_even())?)),
        (Value::Float(f), Some(_)) if !f.is_finite() => Ok(Value::Float(*f)),
        (Value::Float(f), Some(d)) if d >= 0 => {
            if d > 300 {
                return Ok(Value::Float(*f));
            }
            let text = format!("{:.*}", d as usize, f);
            Ok(Value::Float(text.parse().unwrap_or(*f)))
        }
        (Value::Float(f), Some(d)) => {
            let scale = 10f64.powi(d.unsigned_abs().min(400) as i32);
            let rounded = (f / scale).round_ties_even() * scale;
            Ok(Value::Float(if rounded.is_finite() { rounded } else { 0.0 }))
        }
        (v, digits) => {
            let i = v.to_bigint().ok_or_else(|| {
                ScriptError::type_error(format!(
                    "type {} doesn't define __round__ method",
                    v.type_name()
                ))
            })?;
            let d = match digits {
                Some(d) if d < 0 => d,
                _ => return Ok(Value::int(i)),
            };
            // rounding to more digits than the value has gives zero
            let exp = match u32::try_from(d.unsigned_abs()) {
                Ok(exp) if u64::from(exp) <= i.bits() => exp,
                _ => return Ok(Value::Int(0)),
            };
            let p = BigInt::from(10u32).pow(exp);
            let (q, r) = i.div_mod_floor(&p);
            let twice: BigInt = r * 2u32;
            let q = if twice > p || (twice == p && q.is_odd()) { q + 1u32 } else { q };
            Ok(Value::int(q * p))
        }
    }
}

pub fn call_method(
    interp: &mut Interpreter,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
    kwargs: Option<DictObj>,
) -> ScriptResult<Value> {
    interp.tick()?;
    let mut keywords = Keywords(kwargs);
    let result = match receiver {
        Value::List(_) => list_method(interp, receiver, name, args, &mut keywords)?,
        Value::Dict(_) => dict_method(interp, receiver, name, args, &mut keywords)?,
        Value::Set(_) => set_method(interp, receiver, name, args)?,
        Value::Str(s) => {
            if name == "format" {
                let kwargs = keywords.0.take().unwrap_or_default();
                Value::str(format_template(s.as_str(), &args, &kwargs)?)
            } else {
                str_method(interp, s.as_str(), name, args)?
            }
        }
        Value::Tuple(t) => sequence_method(t.items(), "tuple", name, &args)?,
        other => {
            return Err(ScriptError::new(
                ErrorKind::AttributeError,
                format!("'{}' object has no attribute '{}'", other.type_name(), name),
            ))
        }
    };
    keywords.finish(name)?;
    Ok(result)
}

fn sequence_method(items: &[Value], kind: &str, name: &str, args: &[Value]) -> ScriptResult<Value> {
    match name {
        "count" => {
            arity(name, args, 1, 1)?;
            let mut count = 0;
            for x in items {
                if ops::py_eq(x, &args[0])? {
                    count += 1;
                }
            }
            Ok(Value::Int(count))
        }
        "index" => {
            arity(name, args, 1, 3)?;
            let len = items.len() as i64;
            let bound = |i: usize, default: i64| -> ScriptResult<usize> {
                let v = match args.get(i) {
                    Some(v) => int_arg(v)?,
                    None => default,
                };
                Ok((if v < 0 { (v + len).max(0) } else { v.min(len) }) as usize)
            };
            let (start, end) = (bound(1, 0)?, bound(2, len)?);
            let window = items.get(start..end.max(start)).unwrap_or_default();
            ops::position(window, &args[0])?
                .map(|i| Value::Int((start + i) as i64))
                .ok_or_else(|| ScriptError::value_error(format!("{}.index(x): x not in {}", kind, kind)))
        }
        _ => Err(ScriptError::new(
            ErrorKind::AttributeError,
            format!("'{}' object has no attribute '{}'", kind, name),
        )),
    }
}

fn list_method(
    interp: &mut Interpreter,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
    keywords: &mut Keywords,
) -> ScriptResult<Value> {
    let Value::List(list) = receiver else {
        return Ok(Value::None);
    };
    match name {
        "append" => {
            arity(name, &args, 1, 1)?;
            let item = args.into_iter().next().unwrap_or(Value::None);
            list.borrow_mut().update(|items| items.push(item));
        }
        "extend" => {
            arity(name, &args, 1, 1)?;
            let extra = materialize(interp, &args[0])?;
            heap::reserve(extra.len().saturating_mul(SLOT))?;
            list.borrow_mut().update(|items| items.extend(extra));
        }
        "insert" => {
            arity(name, &args, 2, 2)?;
            let index = int_arg(&args[0])?;
            let mut list = list.borrow_mut();
            let len = list.len() as i64;
            let at = if index < 0 { (index + len).max(0) } else { index.min(len) } as usize;
            let item = args[1].clone();
            list.update(|items| items.insert(at, item));
        }
        "remove" => {
            arity(name, &args, 1, 1)?;
            let position = ops::position(list.borrow().items(), &args[0])?;
            match position {
                Some(i) => {
                    let removed = list.borrow_mut().update(|items| items.remove(i));
                    drop(removed);
                }
                None => return Err(ScriptError::value_error("list.remove(x): x not in list")),
            }
        }
        "pop" => {
            arity(name, &args, 0, 1)?;
            let index = match args.first() {
                Some(i) => int_arg(i)?,
                None => -1,
            };
            let mut list = list.borrow_mut();
            if list.is_empty() {
                return Err(ScriptError::index_error("pop from empty list"));
            }
            let i = normalize_index(index, list.len())
                .ok_or_else(|| ScriptError::index_error("pop index out of range"))?;
            return Ok(list.update(|items| items.remove(i)));
        }
        "index" | "count" => {
            let items = list.borrow().items().to_vec();
            return sequence_method(&items, "list", name, &args);
        }
        "sort" => {
            arity(name, &args, 0, 0)?;
            let key = keywords.take("key");
            let reverse = keywords.take("reverse").is_some_and(|v| v.truthy());
            let items = list.borrow().items().to_vec();
            let sorted = sort_values(interp, items, key, reverse)?;
            let previous = list.borrow_mut().update(|items| std::mem::replace(items, sorted));
            drop(previous);
        }
        "reverse" => {
            arity(name, &args, 0, 0)?;
            list.borrow_mut().update(|items| items.reverse());
        }
        "copy" => {
            arity(name, &args, 0, 0)?;
            let items = list.borrow().items().to_vec();
            return Ok(Value::list(items));
        }
        "clear" => {
            arity(name, &args, 0, 0)?;
            let previous = list.borrow_mut().update(std::mem::take);
            drop(previous);
        }
        _ => {
            return Err(ScriptError::new(
                ErrorKind::AttributeError,
                format!("'list' object has no attribute '{}'", name),
            ))
        }
    }
    Ok(Value::None)
}

fn dict_method(
    interp: &mut Interpreter,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
    keywords: &mut Keywords,
) -> ScriptResult<Value> {
    let Value::Dict(dict) = receiver else {
        return Ok(Value::None);
    };
    match name {
        "get" => {
            arity(name, &args, 1, 2)?;
            let found = dict.borrow().lookup(&args[0])?;
            Ok(found.or_else(|| args.get(1).cloned()).unwrap_or(Value::None))
        }
        "keys" => Ok(Value::list(dict.borrow().keys())),
        "values" => Ok(Value::list(dict.borrow().values())),
        "items" => {
            let items = dict.borrow().items();
            heap::reserve(items.len().saturating_mul(SLOT * 3))?;
            Ok(Value::list(
                items.into_iter().map(|(k, v)| Value::tuple(vec![k, v])).collect(),
            ))
        }
        "pop" => {
            arity(name, &args, 1, 2)?;
            let key = args[0].hash_key()?;
            let removed = dict.borrow_mut().remove(&key);
            match (removed, args.get(1)) {
                (Some((_, value)), _) => Ok(value),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(ScriptError::key_error(args[0].repr())),
            }
        }
        "popitem" => {
            arity(name, &args, 0, 0)?;
            let last = dict.borrow_mut().pop_last();
            last.map(|(k, v)| Value::tuple(vec![k, v]))
                .ok_or_else(|| ScriptError::key_error("'popitem(): dictionary is empty'"))
        }
        "setdefault" => {
            arity(name, &args, 1, 2)?;
            let existing = dict.borrow().lookup(&args[0])?;
            if let Some(value) = existing {
                return Ok(value);
            }
            let value = args.get(1).cloned().unwrap_or(Value::None);
            dict.borrow_mut().insert(args[0].clone(), value.clone())?;
            Ok(value)
        }
        "update" => {
            arity(name, &args, 0, 1)?;
            let mut staged = DictObj::new();
            if let Some(source) = args.first() {
                update_dict(interp, &mut staged, source)?;
            }
            if let Some(extra) = keywords.0.take() {
                for (k, v) in extra.items() {
                    staged.insert(k, v)?;
                }
            }
            let mut dict = dict.borrow_mut();
            for (k, v) in staged.items() {
                dict.insert(k, v)?;
            }
            Ok(Value::None)
        }
        "copy" => {
            let items = dict.borrow().items();
            let mut copy = DictObj::new();
            for (k, v) in items {
                copy.insert(k, v)?;
            }
            Ok(Value::dict(copy))
        }
        "clear" => {
            dict.borrow_mut().clear();
            Ok(Value::None)
        }
        _ => Err(ScriptError::new(
            ErrorKind::AttributeError,
            format!("'dict' object has no attribute '{}'", name),
        )),
    }
}

fn set_method(interp: &mut Interpreter, receiver: &Value, name: &str, args: Vec<Value>) -> ScriptResult<Value> {
    let Value::Set(set) = receiver else {
        return Ok(Value::None);
    };
    let others = |interp: &mut Interpreter| -> ScriptResult<Vec<SetObj>> {
        args.iter()
            .map(|arg| match arg {
                Value::Set(other) => SetObj::from_values(other.borrow().values()),
                other => SetObj::from_values(materialize(interp, other)?),
            })
            .collect()
    };
    match name {
        "add" => {
            arity(name, &args, 1, 1)?;
            set.borrow_mut().add(args[0].clone())?;
        }
        "remove" | "discard" => {
            arity(name, &args, 1, 1)?;
            let key = args[0].hash_key()?;
            let removed = set.borrow_mut().remove(&key);
            if removed.is_none() && name == "remove" {
                return Err(ScriptError::key_error(args[0].repr()));
            }
        }
        "pop" => {
            arity(name, &args, 0, 0)?;
            let popped = set.borrow_mut().pop();
            return popped.ok_or_else(|| ScriptError::key_error("'pop from an empty set'"));
        }
        "union" | "intersection" | "difference" | "symmetric_difference" => {
            let others = others(interp)?;
            let mut result = SetObj::from_values(set.borrow().values())?;
            for other in &others {
                let current = result;
                result = SetObj::new();
                match name {
                    "union" => {
                        for (h, v) in current.entries().chain(other.entries()) {
                            result.add_hashed(h.clone(), v.clone());
                        }
                    }
                    "intersection" => {
                        for (h, v) in current.entries().filter(|(h, _)| other.contains(h)) {
                            result.add_hashed(h.clone(), v.clone());
                        }
                    }
                    "difference" => {
                        for (h, v) in current.entries().filter(|(h, _)| !other.contains(h)) {
                            result.add_hashed(h.clone(), v.clone());
                        }
                    }
                    _ => {
                        for (h, v) in current.entries().filter(|(h, _)| !other.contains(h)) {
                            result.add_hashed(h.clone(), v.clone());
                        }
                        for (h, v) in other.entries().filter(|(h, _)| !current.contains(h)) {
                            result.add_hashed(h.clone(), v.clone());
                        }
                    }
                }
            }
            return Ok(Value::set(result));
        }
        "issubset" | "issuperset" | "isdisjoint" => {
            arity(name, &args, 1, 1)?;
            let other = others(interp)?.pop().unwrap_or_default();
            let set = set.borrow();
            let answer = match name {
                "issubset" => set.entries().all(|(h, _)| other.contains(h)),
                "issuperset" => other.entries().all(|(h, _)| set.contains(h)),
                _ => !set.entries().any(|(h, _)| other.contains(h)),
            };
            return Ok(Value::Bool(answer));
        }
        "update" => {
            let others = others(interp)?;
            let mut set = set.borrow_mut();
            for other in &others {
                for (h, v) in other.entries() {
                    set.add_hashed(h.clone(), v.clone());
                }
            }
        }
        "copy" => {
            let values = set.borrow().values();
            return Ok(Value::set(SetObj::from_values(values)?));
        }
        "clear" => set.borrow_mut().clear(),
        _ => {
            return Err(ScriptError::new(
                ErrorKind::AttributeError,
                format!("'set' object has no attribute '{}'", name),
            ))
        }
    }
    Ok(Value::None)
}

/// Clamp optional character bounds the way slices do.
fn char_window(len: usize, start: Option<&Value>, end: Option<&Value>) -> ScriptResult<(usize, usize)> {
    let n = len as i64;
    let clamp = |v: i64| (if v < 0 { (v + n).max(0) } else { v.min(n) }) as usize;
    let start = match optional(start.cloned()) {
        Some(v) => clamp(int_arg(&v)?),
        None => 0,
    };
    let end = match optional(end.cloned()) {
        Some(v) => clamp(int_arg(&v)?),
        None => len,
    };
    Ok((start, end))
}

fn byte_offset(s: &str, chars: usize) -> usize {
    s.char_indices().nth(chars).map(|(b, _)| b).unwrap_or(s.len())
}

fn str_list(parts: Vec<String>) -> ScriptResult<Value> {
    heap::reserve(parts.len().saturating_mul(SLOT))?;
    Ok(Value::list(parts.into_iter().map(Value::str).collect()))
}

fn split_whitespace(s: &str, maxsplit: Option<usize>) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if maxsplit.is_some_and(|m| out.len() >= m) {
            out.push(rest.to_string());
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(i) => {
                out.push(rest[..i].to_string());
                rest = rest[i..].trim_start();
            }
            None => {
                out.push(rest.to_string());
                break;
            }
        }
    }
    out
}

fn rsplit_whitespace(s: &str, maxsplit: Option<usize>) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = s.trim_end();
    while !rest.is_empty() {
        if maxsplit.is_some_and(|m| out.len() >= m) {
            out.push(rest.to_string());
            break;
        }
        match rest.rfind(char::is_whitespace) {
            Some(i) => {
                let ws = rest[i..].chars().next().map(char::len_utf8).unwrap_or(1);
                out.push(rest[i + ws..].to_string());
                rest = rest[..i].trim_end();
            }
            None => {
                out.push(rest.to_string());
                break;
            }
        }
    }
    out.reverse();
    out
}

fn pad(s: &str, width: &Value, fill: Option<&Value>, align: char) -> ScriptResult<String> {
    let width = int_arg(width)?.max(0) as usize;
    let fill = match fill {
        Some(Value::Str(f)) if f.as_str().chars().count() == 1 => f.as_str().chars().next().unwrap_or(' '),
        Some(_) => {
            return Err(ScriptError::type_error(
                "The fill character must be exactly one character long",
            ))
        }
        None => ' ',
    };
    let len = s.chars().count();
    if len >= width {
        return Ok(s.to_string());
    }
    heap::reserve(width.saturating_mul(fill.len_utf8()))?;
    let margin = width - len;
    let left = match align {
        '<' => 0,
        '>' => margin,
        _ => margin / 2 + (margin & width & 1),
    };
    let fill = |n: usize| fill.to_string().repeat(n);
    Ok(format!("{}{}{}", fill(left), s, fill(margin - left)))
}

fn str_method(interp: &mut Interpreter, s: &str, name: &str, args: Vec<Value>) -> ScriptResult<Value> {
    let predicate = |test: fn(&str) -> bool| -> ScriptResult<Value> {
        arity(name, &args, 0, 0)?;
        Ok(Value::Bool(!s.is_empty() && test(s)))
    };
    let strip_chars = |args: &[Value]| -> ScriptResult<Option<Vec<char>>> {
        arity(name, args, 0, 1)?;
        match optional(args.first().cloned()) {
            Some(Value::Str(chars)) => Ok(Some(chars.as_str().chars().collect())),
            Some(other) => Err(ScriptError::type_error(format!(
                "{} arg must be None or str, not {}",
                name,
                other.type_name()
            ))),
            None => Ok(None),
        }
    };
    let maxsplit = |args: &[Value]| -> ScriptResult<Option<usize>> {
        match args.get(1) {
            Some(v) => {
                let m = int_arg(v)?;
                Ok(usize::try_from(m).ok())
            }
            None => Ok(None),
        }
    };

    let value = match name {
        "lower" => Value::str(s.to_lowercase()),
        "upper" => Value::str(s.to_uppercase()),
        "strip" | "lstrip" | "rstrip" => {
            let chars = strip_chars(&args)?;
            let matches = |c: char| match &chars {
                Some(set) => set.contains(&c),
                None => c.is_whitespace(),
            };
            Value::str(match name {
                "strip" => s.trim_matches(matches),
                "lstrip" => s.trim_start_matches(matches),
                _ => s.trim_end_matches(matches),
            })
        }
        "split" | "rsplit" => {
            arity(name, &args, 0, 2)?;
            let limit = maxsplit(&args)?;
            let parts: Vec<String> = match optional(args.first().cloned()) {
                None if name == "split" => split_whitespace(s, limit),
                None => rsplit_whitespace(s, limit),
                Some(sep) => {
                    let sep = str_arg(name, &sep)?.to_string();
                    if sep.is_empty() {
                        return Err(ScriptError::value_error("empty separator"));
                    }
                    match (name, limit) {
                        ("split", Some(m)) => s.splitn(m + 1, sep.as_str()).map(str::to_string).collect(),
                        ("split", None) => s.split(sep.as_str()).map(str::to_string).collect(),
                        (_, Some(m)) => {
                            let mut parts: Vec<String> = s.rsplitn(m + 1, sep.as_str()).map(str::to_string).collect();
                            parts.reverse();
                            parts
                        }
                        (_, None) => s.split(sep.as_str()).map(str::to_string).collect(),
                    }
                }
            };
            return str_list(parts);
        }
        "splitlines" => {
            arity(name, &args, 0, 1)?;
            let keep = args.first().is_some_and(Value::truthy);
            let mut parts = Vec::new();
            let mut rest = s;
            while !rest.is_empty() {
                match rest.find(['\n', '\r']) {
                    Some(i) => {
                        let sep = if rest[i..].starts_with("\r\n") { 2 } else { 1 };
                        parts.push(rest[..if keep { i + sep } else { i }].to_string());
                        rest = &rest[i + sep..];
                    }
                    None => {
                        parts.push(rest.to_string());
                        break;
                    }
                }
            }
            return str_list(parts);
        }
        "join" => {
            arity(name, &args, 1, 1)?;
            let items = materialize(interp, &args[0])?;
            let mut total = s.len().saturating_mul(items.len());
            for (i, item) in items.iter().enumerate() {
                match item.as_str() {
                    Some(part) => total = total.saturating_add(part.len()),
                    None => {
                        return Err(ScriptError::type_error(format!(
                            "sequence item {}: expected str instance, {} found",
                            i,
                            item.type_name()
                        )))
                    }
                }
            }
            heap::reserve(total)?;
            let parts: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            Value::str(parts.join(s))
        }
        "replace" => {
            arity(name, &args, 2, 3)?;
            let old = str_arg(name, &args[0])?;
            let new = str_arg(name, &args[1])?;
            let limit = match args.get(2) {
                Some(v) => usize::try_from(int_arg(v)?).ok(),
                None => None,
            };
            let occurrences = if old.is_empty() { s.chars().count() + 1 } else { s.matches(old).count() };
            let count = limit.map_or(occurrences, |l| l.min(occurrences));
            heap::reserve(s.len().saturating_add(count.saturating_mul(new.len())))?;
            Value::str(match limit {
                Some(l) => s.replacen(old, new, l),
                None => s.replace(old, new),
            })
        }
        "startswith" | "endswith" => {
            arity(name, &args, 1, 3)?;
            let len = s.chars().count();
            let (start, end) = char_window(len, args.get(1), args.get(2))?;
            let window = if start <= end { &s[byte_offset(s, start)..byte_offset(s, end)] } else { "" };
            let candidates: Vec<Value> = match &args[0] {
                Value::Tuple(t) => t.items().to_vec(),
                other => vec![other.clone()],
            };
            let mut hit = false;
            for candidate in &candidates {
                let affix = candidate.as_str().ok_or_else(|| {
                    ScriptError::type_error(format!(
                        "{} first arg must be str or a tuple of str, not {}",
                        name,
                        candidate.type_name()
                    ))
                })?;
                hit |= if name == "startswith" { window.starts_with(affix) } else { window.ends_with(affix) };
            }
            Value::Bool(hit && start <= end)
        }
        "find" | "rfind" | "index" | "rindex" | "count" => {
            arity(name, &args, 1, 3)?;
            let sub = str_arg(name, &args[0])?;
            let len = s.chars().count();
            let (start, end) = char_window(len, args.get(1), args.get(2))?;
            if start > end {
                return Ok(Value::Int(if name == "count" { 0 } else { -1 }));
            }
            let offset = byte_offset(s, start);
            let window = &s[offset..byte_offset(s, end)];
            if name == "count" {
                let n = if sub.is_empty() { window.chars().count() + 1 } else { window.matches(sub).count() };
                return Ok(Value::Int(n as i64));
            }
            let found = if name.starts_with('r') { window.rfind(sub) } else { window.find(sub) };
            match found {
                Some(b) => Value::Int((start + window[..b].chars().count()) as i64),
                None if name.ends_with("index") => return Err(ScriptError::value_error("substring not found")),
                None => Value::Int(-1),
            }
        }
        "isdigit" | "isdecimal" => predicate(|s| s.chars().all(|c| c.is_ascii_digit()))?,
        "isnumeric" => predicate(|s| s.chars().all(char::is_numeric))?,
        "isalpha" => predicate(|s| s.chars().all(char::is_alphabetic))?,
        "isalnum" => predicate(|s| s.chars().all(char::is_alphanumeric))?,
        "isspace" => predicate(|s| s.chars().all(char::is_whitespace))?,
        "isupper" => predicate(|s| {
            s.chars().any(char::is_uppercase) && !s.chars().any(char::is_lowercase)
        })?,
        "islower" => predicate(|s| {
            s.chars().any(char::is_lowercase) && !s.chars().any(char::is_uppercase)
        })?,
        "istitle" => predicate(|s| title_case(s) == s && s.chars().any(char::is_alphabetic))?,
        "title" => Value::str(title_case(s)),
        "capitalize" => {
            let mut chars = s.chars();
            Value::str(match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect::<String>(),
                None => String::new(),
            })
        }
        "swapcase" => Value::str(
            s.chars()
                .flat_map(|c| -> Vec<char> {
                    if c.is_uppercase() {
                        c.to_lowercase().collect()
                    } else {
                        c.to_uppercase().collect()
                    }
                })
                .collect::<String>(),
        ),
        "zfill" => {
            arity(name, &args, 1, 1)?;
            let width = int_arg(&args[0])?.max(0) as usize;
            let len = s.chars().count();
            if len >= width {
                Value::str(s)
            } else {
                heap::reserve(width)?;
                let (sign, digits) = match s.chars().next() {
                    Some(c @ ('+' | '-')) => (c.to_string(), &s[1..]),
                    _ => (String::new(), s),
                };
                Value::str(format!("{}{}{}", sign, "0".repeat(width - len), digits))
            }
        }
        "center" | "ljust" | "rjust" => {
            arity(name, &args, 1, 2)?;
            let align = match name {
                "ljust" => '<',
                "rjust" => '>',
                _ => '^',
            };
            Value::str(pad(s, &args[0], args.get(1), align)?)
        }
        _ => {
            return Err(ScriptError::new(
                ErrorKind::AttributeError,
                format!("'str' object has no attribute '{}'", name),
            ))
        }
    };
    if matches!(name, "lower" | "upper" | "title" | "capitalize" | "swapcase") {
        arity(name, &args, 0, 0)?;
    }
    Ok(value)
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut previous_cased = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if previous_cased {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            previous_cased = true;
        } else {
            out.push(c);
            previous_cased = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{parse_module, InterpreterOptions};
    use arbiter_common::config::SandboxPolicy;

    fn eval(source: &str) -> String {
        let module = parse_module(&format!("result = {}\n", source)).unwrap();
        let mut interp = Interpreter::new(&SandboxPolicy::default(), InterpreterOptions::default());
        interp.run_module(&module).unwrap();
        interp.global("result").unwrap().repr()
    }

    fn eval_err(source: &str) -> ErrorKind {
        let module = parse_module(&format!("result = {}\n", source)).unwrap();
        let mut interp = Interpreter::new(&SandboxPolicy::default(), InterpreterOptions::default());
        interp.run_module(&module).unwrap_err().kind
    }

    #[test]
    fn names_round_trip() {
        for (builtin, name) in BUILTINS {
            assert_eq!(Builtin::from_name(name), Some(*builtin));
            assert_eq!(builtin.name(), *name);
        }
    }

    #[test]
    fn conversions() {
        assert_eq!(eval("int(' -42 ')"), "-42");
        assert_eq!(eval("int('ff', 16)"), "255");
        assert_eq!(eval("int(3.9)"), "3");
        assert_eq!(eval("float('1_000.5')"), "1000.5");
        assert_eq!(eval("list('abc')"), "['a', 'b', 'c']");
        assert_eq!(eval("dict([('a', 1)], b=2)"), "{'a': 1, 'b': 2}");
        assert_eq!(eval_err("int('x1')"), ErrorKind::ValueError);
    }

    #[test]
    fn aggregates() {
        assert_eq!(eval("sum([1, 2.5, True])"), "4.5");
        assert_eq!(eval("max([3, 1, 4], key=lambda x: -x)"), "1");
        assert_eq!(eval("min([], default=None)"), "None");
        assert_eq!(eval("any(x > 2 for x in [1, 5, 0])"), "True");
        assert_eq!(eval_err("max([])"), ErrorKind::ValueError);
    }

    #[test]
    fn sorting_is_stable_and_typed() {
        assert_eq!(
            eval("sorted([(1, 'b'), (0, 'z'), (1, 'a')], key=lambda p: p[0], reverse=True)"),
            "[(1, 'b'), (1, 'a'), (0, 'z')]"
        );
        assert_eq!(eval_err("sorted([1, 'a'])"), ErrorKind::TypeError);
    }

    #[test]
    fn rounding_is_half_even() {
        assert_eq!(eval("round(2.5)"), "2");
        assert_eq!(eval("round(3.5)"), "4");
        assert_eq!(eval("round(2.675, 2)"), "2.67");
        assert_eq!(eval("round(1250, -2)"), "1200");
    }

    #[test]
    fn string_methods() {
        assert_eq!(eval("'  a  b c '.split()"), "['a', 'b', 'c']");
        assert_eq!(eval("'a,b,,c'.split(',', 1)"), "['a', 'b,,c']");
        assert_eq!(eval("'a b c'.rsplit(None, 1)"), "['a b', 'c']");
        assert_eq!(eval("'-'.join(['x', 'y'])"), "'x-y'");
        assert_eq!(eval("'héllo'.find('l')"), "2");
        assert_eq!(eval("'hello world'.title()"), "'Hello World'");
        assert_eq!(eval("'42'.zfill(5)"), "'00042'");
        assert_eq!(eval("'ab'.center(5, '*')"), "'**ab*'");
        assert_eq!(eval("'{} is {age}'.format('Bo', age=3)"), "'Bo is 3'");
        assert_eq!(eval_err("'-'.join([1])"), ErrorKind::TypeError);
    }

    #[test]
    fn list_and_dict_methods() {
        let module = parse_module(
            "a = [3, 1, 2]\na.sort()\na.insert(0, 9)\nlast = a.pop()\nd = {'x': 1}\nd.update(y=2)\nv = d.setdefault('z', [])\nv.append(1)\n",
        )
        .unwrap();
        let mut interp = Interpreter::new(&SandboxPolicy::default(), InterpreterOptions::default());
        interp.run_module(&module).unwrap();
        assert_eq!(interp.global("a").unwrap().repr(), "[9, 1, 2]");
        assert_eq!(interp.global("last").unwrap().repr(), "3");
        assert_eq!(interp.global("d").unwrap().repr(), "{'x': 1, 'y': 2, 'z': [1]}");
    }

    #[test]
    fn set_methods() {
        assert_eq!(eval("sorted({1, 2, 3}.intersection([2, 3, 4]))"), "[2, 3]");
        assert_eq!(eval("{1, 2}.issubset(range(5))"), "True");
        assert_eq!(eval_err("set().pop()"), ErrorKind::KeyError);
    }
}
