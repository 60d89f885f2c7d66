use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::mem::size_of;
use std::rc::Rc;

use arbiter_common::render::{format_float, repr_str};
use num_bigint::BigInt;
use num_traits::{FromPrimitive, ToPrimitive};
use serde_json::{Map, Number, Value as Json};

use super::arena;
use super::ast::FunctionDef;
use super::builtins::Builtin;
use super::error::{ErrorKind, ScriptError, ScriptResult};
use super::heap::{self, Charge};
use super::interp::Scope;

const SLOT: usize = size_of::<Value>();
const DICT_ENTRY: usize = size_of::<(HashKey, Value, Value)>() + size_of::<(HashKey, usize)>();
const SET_ENTRY: usize = size_of::<(HashKey, Value)>() + size_of::<(HashKey, usize)>();

/// Nesting beyond which rendering, comparison, hashing and conversion raise
/// `RecursionError` instead of descending.
pub const MAX_VALUE_DEPTH: usize = 200;

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    /// Integers outside `i64`. Results that fit go back to `Int`.
    BigInt(Rc<BigNum>),
    Float(f64),
    Str(Rc<Text>),
    List(Rc<RefCell<ListObj>>),
    Tuple(Rc<TupleObj>),
    Dict(Rc<RefCell<DictObj>>),
    Set(Rc<RefCell<SetObj>>),
    Range(RangeObj),
    Function(Rc<Closure>),
    Builtin(Builtin),
    Method(Rc<BoundMethod>),
    ExceptionType(ErrorKind),
    Exception(Rc<ExceptionObj>),
}

pub struct Text {
    value: String,
    _charge: Charge,
}

impl Text {
    pub fn new(value: String) -> Self {
        let charge = Charge::new(value.capacity());
        Self { value, _charge: charge }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl PartialEq for Text {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for Text {}

impl Hash for Text {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl fmt::Debug for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.value)
    }
}

pub struct BigNum {
    value: BigInt,
    _charge: Charge,
}

impl BigNum {
    pub fn value(&self) -> &BigInt {
        &self.value
    }
}

impl fmt::Debug for BigNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

pub struct ListObj {
    items: Vec<Value>,
    charge: Charge,
}

impl ListObj {
    pub fn new(items: Vec<Value>) -> Self {
        let charge = Charge::new(items.capacity() * SLOT);
        Self { items, charge }
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Mutate the backing vector and settle the memory charge afterwards.
    pub fn update<R>(&mut self, f: impl FnOnce(&mut Vec<Value>) -> R) -> R {
        let result = f(&mut self.items);
        self.charge.resize(self.items.capacity() * SLOT);
        result
    }

    pub(crate) fn drain(&mut self) -> Vec<Value> {
        self.update(std::mem::take)
    }
}

impl Drop for ListObj {
    fn drop(&mut self) {
        drain_nested(std::mem::take(&mut self.items));
    }
}

pub struct TupleObj {
    items: Vec<Value>,
    _charge: Charge,
}

impl TupleObj {
    pub fn new(items: Vec<Value>) -> Self {
        let charge = Charge::new(items.capacity() * SLOT);
        Self { items, _charge: charge }
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }
}

impl Drop for TupleObj {
    fn drop(&mut self) {
        drain_nested(std::mem::take(&mut self.items));
    }
}

/// Hashable projection of a value. Numbers that compare equal hash equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    None,
    Int(i64),
    Big(BigInt),
    Float(u64),
    Str(Rc<Text>),
    Tuple(Vec<HashKey>),
    Type(ErrorKind),
}

/// Insertion-ordered mapping.
#[derive(Default)]
pub struct DictObj {
    entries: Vec<(HashKey, Value, Value)>,
    index: HashMap<HashKey, usize>,
    charge: Charge,
}

impl DictObj {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &HashKey) -> Option<&Value> {
        self.index.get(key).map(|&i| &self.entries[i].2)
    }

    pub fn lookup(&self, key: &Value) -> ScriptResult<Option<Value>> {
        let hashed = key.hash_key()?;
        Ok(self.get(&hashed).cloned())
    }

    pub fn contains(&self, key: &HashKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn insert(&mut self, key: Value, value: Value) -> ScriptResult<()> {
        let hashed = key.hash_key()?;
        self.insert_hashed(hashed, key, value);
        Ok(())
    }

    /// Existing keys keep their position and original key object.
    pub fn insert_hashed(&mut self, hashed: HashKey, key: Value, value: Value) {
        if let Some(&i) = self.index.get(&hashed) {
            self.entries[i].2 = value;
            return;
        }
        self.index.insert(hashed.clone(), self.entries.len());
        self.entries.push((hashed, key, value));
        self.recharge();
    }

    pub fn remove(&mut self, key: &HashKey) -> Option<(Value, Value)> {
        let i = self.index.remove(key)?;
        let (_, k, v) = self.entries.remove(i);
        for (j, (hashed, _, _)) in self.entries.iter().enumerate().skip(i) {
            if let Some(slot) = self.index.get_mut(hashed) {
                *slot = j;
            }
        }
        self.recharge();
        Some((k, v))
    }

    pub fn pop_last(&mut self) -> Option<(Value, Value)> {
        let (hashed, k, v) = self.entries.pop()?;
        self.index.remove(&hashed);
        self.recharge();
        Some((k, v))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|(_, k, v)| (k, v))
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, _, v)| v.clone()).collect()
    }

    pub fn items(&self) -> Vec<(Value, Value)> {
        self.entries.iter().map(|(_, k, v)| (k.clone(), v.clone())).collect()
    }

    pub fn clear(&mut self) {
        let entries = std::mem::take(&mut self.entries);
        self.index = HashMap::new();
        self.recharge();
        drain_nested(entries.into_iter().flat_map(|(_, k, v)| [k, v]).collect());
    }

    pub(crate) fn drain(&mut self) -> Vec<Value> {
        let entries = std::mem::take(&mut self.entries);
        self.index = HashMap::new();
        self.recharge();
        entries.into_iter().flat_map(|(_, k, v)| [k, v]).collect()
    }

    fn recharge(&mut self) {
        self.charge.resize(self.entries.capacity() * DICT_ENTRY);
    }
}

impl Drop for DictObj {
    fn drop(&mut self) {
        let entries = std::mem::take(&mut self.entries);
        drain_nested(entries.into_iter().flat_map(|(_, k, v)| [k, v]).collect());
    }
}

/// Insertion-ordered set.
#[derive(Default)]
pub struct SetObj {
    entries: Vec<(HashKey, Value)>,
    index: HashMap<HashKey, usize>,
    charge: Charge,
}

impl SetObj {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: Vec<Value>) -> ScriptResult<Self> {
        let mut set = Self::new();
        for value in values {
            set.add(value)?;
        }
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &HashKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn add(&mut self, value: Value) -> ScriptResult<()> {
        let hashed = value.hash_key()?;
        self.add_hashed(hashed, value);
        Ok(())
    }

    pub fn add_hashed(&mut self, hashed: HashKey, value: Value) {
        if self.index.contains_key(&hashed) {
            return;
        }
        self.index.insert(hashed.clone(), self.entries.len());
        self.entries.push((hashed, value));
        self.charge.resize(self.entries.capacity() * SET_ENTRY);
    }

    pub fn remove(&mut self, key: &HashKey) -> Option<Value> {
        let i = self.index.remove(key)?;
        let (_, v) = self.entries.remove(i);
        for (j, (hashed, _)) in self.entries.iter().enumerate().skip(i) {
            if let Some(slot) = self.index.get_mut(hashed) {
                *slot = j;
            }
        }
        self.charge.resize(self.entries.capacity() * SET_ENTRY);
        Some(v)
    }

    pub fn pop(&mut self) -> Option<Value> {
        let (hashed, v) = self.entries.pop()?;
        self.index.remove(&hashed);
        Some(v)
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&HashKey, &Value)> {
        self.entries.iter().map(|(h, v)| (h, v))
    }

    pub fn clear(&mut self) {
        let values = self.drain();
        drain_nested(values);
    }

    pub(crate) fn drain(&mut self) -> Vec<Value> {
        let entries = std::mem::take(&mut self.entries);
        self.index = HashMap::new();
        self.charge.resize(0);
        entries.into_iter().map(|(_, v)| v).collect()
    }
}

impl Drop for SetObj {
    fn drop(&mut self) {
        let entries = std::mem::take(&mut self.entries);
        drain_nested(entries.into_iter().map(|(_, v)| v).collect());
    }
}

/// Release values without recursing into nested containers, so dropping a
/// deeply nested structure never grows the native stack.
pub(crate) fn drain_nested(mut stack: Vec<Value>) {
    while let Some(value) = stack.pop() {
        match value {
            Value::List(rc) => {
                if let Ok(cell) = Rc::try_unwrap(rc) {
                    stack.append(&mut cell.into_inner().drain());
                }
            }
            Value::Dict(rc) => {
                if let Ok(cell) = Rc::try_unwrap(rc) {
                    stack.append(&mut cell.into_inner().drain());
                }
            }
            Value::Set(rc) => {
                if let Ok(cell) = Rc::try_unwrap(rc) {
                    stack.append(&mut cell.into_inner().drain());
                }
            }
            Value::Tuple(rc) => {
                if let Ok(mut tuple) = Rc::try_unwrap(rc) {
                    stack.append(&mut tuple.items);
                }
            }
            Value::Method(rc) => {
                if let Ok(method) = Rc::try_unwrap(rc) {
                    stack.push(method.receiver);
                }
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeObj {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeObj {
    pub fn len(&self) -> usize {
        let (start, stop, step) = (self.start as i128, self.stop as i128, self.step as i128);
        let n = if step > 0 && start < stop {
            (stop - start - 1) / step + 1
        } else if step < 0 && start > stop {
            (start - stop - 1) / (-step) + 1
        } else {
            0
        };
        usize::try_from(n).unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, i: usize) -> i64 {
        (self.start as i128 + i as i128 * self.step as i128) as i64
    }

    pub fn contains(&self, value: i64) -> bool {
        let (v, start, step) = (value as i128, self.start as i128, self.step as i128);
        let in_bounds = if step > 0 {
            v >= start && v < self.stop as i128
        } else {
            v <= start && v > self.stop as i128
        };
        in_bounds && (v - start) % step == 0
    }
}

pub struct Closure {
    pub def: Rc<FunctionDef>,
    /// Aligned with `def.params`.
    pub defaults: Vec<Option<Value>>,
    pub scope: Rc<Scope>,
}

pub struct BoundMethod {
    pub receiver: Value,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionObj {
    pub kind: ErrorKind,
    pub message: String,
}

impl ExceptionObj {
    pub fn to_error(&self) -> ScriptError {
        ScriptError::new(self.kind, self.message.clone())
    }
}

impl From<&ScriptError> for ExceptionObj {
    fn from(err: &ScriptError) -> Self {
        Self {
            kind: err.kind,
            message: err.message.clone(),
        }
    }
}

impl Value {
    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(Rc::new(Text::new(s.into())))
    }

    pub fn list(items: Vec<Value>) -> Value {
        let list = Rc::new(RefCell::new(ListObj::new(items)));
        arena::track_list(&list);
        Value::List(list)
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(TupleObj::new(items)))
    }

    pub fn dict(dict: DictObj) -> Value {
        let dict = Rc::new(RefCell::new(dict));
        arena::track_dict(&dict);
        Value::Dict(dict)
    }

    pub fn set(set: SetObj) -> Value {
        let set = Rc::new(RefCell::new(set));
        arena::track_set(&set);
        Value::Set(set)
    }

    /// Integer value, kept as `Int` whenever it fits.
    pub fn int(value: BigInt) -> Value {
        match value.to_i64() {
            Some(i) => Value::Int(i),
            None => {
                let charge = Charge::new(value.bits().div_ceil(8) as usize);
                Value::BigInt(Rc::new(BigNum { value, _charge: charge }))
            }
        }
    }

    /// Arbitrary precision view of bools and integers.
    pub fn to_bigint(&self) -> Option<BigInt> {
        match self {
            Value::BigInt(b) => Some(b.value().clone()),
            other => other.as_int().map(BigInt::from),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) | Value::BigInt(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::Range(_) => "range",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Method(_) => "method",
            Value::ExceptionType(_) => "type",
            Value::Exception(e) => e.kind.name(),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::BigInt(_) => true,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.as_str().is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Tuple(t) => !t.items().is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            Value::Set(s) => !s.borrow().is_empty(),
            Value::Range(r) => !r.is_empty(),
            _ => true,
        }
    }

    /// Integer view of ints and bools.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn hash_key(&self) -> ScriptResult<HashKey> {
        self.hash_key_at(0)
    }

    fn hash_key_at(&self, depth: usize) -> ScriptResult<HashKey> {
        if depth > MAX_VALUE_DEPTH {
            return Err(ScriptError::recursion("maximum recursion depth exceeded while hashing"));
        }
        Ok(match self {
            Value::None => HashKey::None,
            Value::Bool(b) => HashKey::Int(*b as i64),
            Value::Int(i) => HashKey::Int(*i),
            Value::BigInt(b) => HashKey::Big(b.value().clone()),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.abs() < 9.2e18 {
                    HashKey::Int(*f as i64)
                } else if f.fract() == 0.0 {
                    match BigInt::from_f64(*f) {
                        Some(b) => b.to_i64().map_or(HashKey::Big(b), HashKey::Int),
                        None => HashKey::Float(f.to_bits()),
                    }
                } else {
                    HashKey::Float(f.to_bits())
                }
            }
            Value::Str(s) => HashKey::Str(s.clone()),
            Value::Tuple(t) => HashKey::Tuple(
                t.items()
                    .iter()
                    .map(|item| item.hash_key_at(depth + 1))
                    .collect::<ScriptResult<_>>()?,
            ),
            Value::ExceptionType(kind) => HashKey::Type(*kind),
            other => return Err(ScriptError::type_error(format!("unhashable type: '{}'", other.type_name()))),
        })
    }

    /// Materialize an iterable into its elements.
    pub fn to_items(&self) -> ScriptResult<Vec<Value>> {
        match self {
            Value::Str(s) => {
                let count = s.as_str().chars().count();
                heap::reserve(count.saturating_mul(SLOT + size_of::<Text>() + 8))?;
                Ok(s.as_str().chars().map(|c| Value::str(c.to_string())).collect())
            }
            Value::List(l) => Ok(l.borrow().items().to_vec()),
            Value::Tuple(t) => Ok(t.items().to_vec()),
            Value::Dict(d) => Ok(d.borrow().keys()),
            Value::Set(s) => Ok(s.borrow().values()),
            Value::Range(r) => {
                let len = r.len();
                heap::reserve(len.saturating_mul(SLOT))?;
                Ok((0..len).map(|i| Value::Int(r.get(i))).collect())
            }
            other => Err(ScriptError::type_error(format!("'{}' object is not iterable", other.type_name()))),
        }
    }

    /// Display form for diagnostics. Nesting past [`MAX_VALUE_DEPTH`] shows as `...`.
    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out, 0);
        out
    }

    /// `repr()` as scripts see it.
    pub fn checked_repr(&self) -> ScriptResult<String> {
        let mut out = String::new();
        if self.write_repr(&mut out, 0) {
            Ok(out)
        } else {
            Err(ScriptError::recursion(
                "maximum recursion depth exceeded while getting the repr of an object",
            ))
        }
    }

    /// `str()` of the value.
    pub fn to_str(&self) -> String {
        match self {
            Value::Str(s) => s.as_str().to_string(),
            Value::Exception(e) => e.message.clone(),
            other => other.repr(),
        }
    }

    /// `str()` as scripts see it.
    pub fn checked_str(&self) -> ScriptResult<String> {
        match self {
            Value::Str(_) | Value::Exception(_) => Ok(self.to_str()),
            other => other.checked_repr(),
        }
    }

    /// Returns false when some part was cut off at the depth limit.
    fn write_repr(&self, out: &mut String, depth: usize) -> bool {
        if depth > MAX_VALUE_DEPTH {
            out.push_str("...");
            return false;
        }
        match self {
            Value::None => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(i) => out.push_str(&i.to_string()),
            Value::BigInt(b) => out.push_str(&b.value().to_string()),
            Value::Float(f) => out.push_str(&format_float(*f)),
            Value::Str(s) => out.push_str(&repr_str(s.as_str())),
            Value::List(l) => {
                out.push('[');
                let complete = write_items(l.borrow().items(), out, depth);
                out.push(']');
                return complete;
            }
            Value::Tuple(t) => {
                out.push('(');
                let complete = write_items(t.items(), out, depth);
                if t.items().len() == 1 {
                    out.push(',');
                }
                out.push(')');
                return complete;
            }
            Value::Dict(d) => {
                let mut complete = true;
                out.push('{');
                for (i, (k, v)) in d.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    complete &= k.write_repr(out, depth + 1);
                    out.push_str(": ");
                    complete &= v.write_repr(out, depth + 1);
                }
                out.push('}');
                return complete;
            }
            Value::Set(s) => {
                let set = s.borrow();
                if set.is_empty() {
                    out.push_str("set()");
                } else {
                    out.push('{');
                    let complete = write_items(&set.values(), out, depth);
                    out.push('}');
                    return complete;
                }
            }
            Value::Range(r) => {
                if r.step == 1 {
                    out.push_str(&format!("range({}, {})", r.start, r.stop));
                } else {
                    out.push_str(&format!("range({}, {}, {})", r.start, r.stop, r.step));
                }
            }
            Value::Function(c) => out.push_str(&format!("<function {}>", c.def.name)),
            Value::Builtin(b) => out.push_str(&format!("<built-in function {}>", b.name())),
            Value::Method(m) => out.push_str(&format!(
                "<built-in method {} of {} object>",
                m.name,
                m.receiver.type_name()
            )),
            Value::ExceptionType(kind) => out.push_str(&format!("<class '{}'>", kind.name())),
            Value::Exception(e) => {
                if e.message.is_empty() {
                    out.push_str(&format!("{}()", e.kind.name()));
                } else {
                    out.push_str(&format!("{}({})", e.kind.name(), repr_str(&e.message)));
                }
            }
        }
        true
    }

    pub fn from_json(json: &Json) -> Value {
        match json {
            Json::Null => Value::None,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => match (n.as_i64(), n.as_u64()) {
                (Some(i), _) => Value::Int(i),
                (None, Some(u)) => Value::int(BigInt::from(u)),
                _ => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::str(s.clone()),
            Json::Array(items) => Value::list(items.iter().map(Value::from_json).collect()),
            Json::Object(map) => {
                let mut dict = DictObj::new();
                for (k, v) in map {
                    let key = Rc::new(Text::new(k.clone()));
                    dict.insert_hashed(HashKey::Str(key.clone()), Value::Str(key), Value::from_json(v));
                }
                Value::dict(dict)
            }
        }
    }

    /// Convert a returned value for comparison. Sets become arrays, non-string
    /// dict keys become their `str()`, non-finite floats become strings.
    pub fn to_json(&self) -> ScriptResult<Json> {
        self.to_json_at(0)
    }

    fn to_json_at(&self, depth: usize) -> ScriptResult<Json> {
        if depth > MAX_VALUE_DEPTH {
            return Err(ScriptError::recursion("returned value is nested too deeply"));
        }
        let array = |items: &[Value]| -> ScriptResult<Json> {
            Ok(Json::Array(
                items.iter().map(|v| v.to_json_at(depth + 1)).collect::<ScriptResult<_>>()?,
            ))
        };
        Ok(match self {
            Value::None => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            // JSON readers hold integers as i64, u64 or f64
            Value::BigInt(b) => match b.value().to_u64() {
                Some(u) => Json::from(u),
                None => match b.value().to_f64().and_then(Number::from_f64) {
                    Some(n) => Json::Number(n),
                    None => Json::String(b.value().to_string()),
                },
            },
            Value::Float(f) => match Number::from_f64(*f) {
                Some(n) => Json::Number(n),
                None => Json::String(format_float(*f)),
            },
            Value::Str(s) => Json::String(s.as_str().to_string()),
            Value::List(l) => array(l.borrow().items())?,
            Value::Tuple(t) => array(t.items())?,
            Value::Set(s) => array(&s.borrow().values())?,
            Value::Range(_) => array(&self.to_items()?)?,
            Value::Dict(d) => {
                let mut map = Map::new();
                for (k, v) in d.borrow().iter() {
                    map.insert(k.to_str(), v.to_json_at(depth + 1)?);
                }
                Json::Object(map)
            }
            other => Json::String(other.repr()),
        })
    }
}

fn write_items(items: &[Value], out: &mut String, depth: usize) -> bool {
    let mut complete = true;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        complete &= item.write_repr(out, depth + 1);
    }
    complete
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_round_trip_preserves_shape() {
        let input = json!({"name": "x", "scores": [1, 2.5, null, true]});
        let value = Value::from_json(&input);
        assert_eq!(value.to_json().unwrap(), input);
    }

    #[test]
    fn repr_matches_python() {
        let value = Value::from_json(&json!([1, "a", [true, null], 2.0]));
        assert_eq!(value.repr(), "[1, 'a', [True, None], 2.0]");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).repr(), "(1,)");
        assert_eq!(Value::set(SetObj::new()).repr(), "set()");
    }

    #[test]
    fn equal_numbers_share_hash_keys() {
        assert_eq!(Value::Int(1).hash_key().unwrap(), Value::Bool(true).hash_key().unwrap());
        assert_eq!(Value::Float(2.0).hash_key().unwrap(), Value::Int(2).hash_key().unwrap());
        assert!(Value::list(vec![]).hash_key().is_err());
    }

    #[test]
    fn dict_keeps_insertion_order_after_removal() {
        let mut dict = DictObj::new();
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            dict.insert(Value::str(*key), Value::Int(i as i64)).unwrap();
        }
        dict.remove(&Value::str("a").hash_key().unwrap());
        dict.insert(Value::str("a"), Value::Int(9)).unwrap();
        let keys: Vec<String> = dict.keys().iter().map(|k| k.to_str()).collect();
        assert_eq!(keys, vec!["b", "c", "a"]);
        assert_eq!(dict.lookup(&Value::str("c")).unwrap().and_then(|v| v.as_int()), Some(2));
    }

    #[test]
    fn range_length_and_membership() {
        let r = RangeObj { start: 10, stop: 0, step: -3 };
        assert_eq!(r.len(), 4);
        assert_eq!(r.get(3), 1);
        assert!(r.contains(4));
        assert!(!r.contains(5));
    }

    #[test]
    fn dropping_deep_nesting_keeps_the_stack_flat() {
        let mut value = Value::list(Vec::new());
        for i in 0..2_000_000 {
            value = if i % 2 == 0 {
                Value::list(vec![value])
            } else {
                Value::tuple(vec![value, Value::Int(i)])
            };
        }
        drop(value);
    }

    #[test]
    fn deep_values_raise_recursion_error() {
        let mut list = Value::list(Vec::new());
        let mut tuple = Value::tuple(Vec::new());
        for _ in 0..MAX_VALUE_DEPTH + 5 {
            list = Value::list(vec![list]);
            tuple = Value::tuple(vec![tuple]);
        }
        assert_eq!(list.checked_repr().unwrap_err().kind, ErrorKind::RecursionError);
        assert_eq!(list.checked_str().unwrap_err().kind, ErrorKind::RecursionError);
        assert_eq!(tuple.hash_key().unwrap_err().kind, ErrorKind::RecursionError);
        assert_eq!(list.to_json().unwrap_err().kind, ErrorKind::RecursionError);
        assert!(list.repr().ends_with("]]"));
    }

    #[test]
    fn big_integers_hash_like_equal_floats() {
        let big = Value::int(BigInt::from(1u64 << 63));
        assert_eq!(big.type_name(), "int");
        assert_eq!(big.hash_key().unwrap(), Value::Float(9223372036854775808.0).hash_key().unwrap());
        assert!(matches!(Value::int(BigInt::from(7)), Value::Int(7)));
        assert_eq!(Value::Float(9.21e18).hash_key().unwrap(), Value::Int(9_210_000_000_000_000_000).hash_key().unwrap());
    }

    #[test]
    fn non_string_keys_are_stringified_in_json() {
        let mut dict = DictObj::new();
        dict.insert(Value::Int(1), Value::str("one")).unwrap();
        assert_eq!(Value::dict(dict).to_json().unwrap(), json!({"1": "one"}));
    }
}
