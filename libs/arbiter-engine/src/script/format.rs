//! String formatting: the format-spec mini-language, `str.format` and `%`.

use arbiter_common::render::format_float;
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive};

use super::error::{ErrorKind, ScriptError, ScriptResult};
use super::heap;
use super::value::{DictObj, Value};

#[derive(Debug, Default)]
struct Spec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    alternate: bool,
    zero: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

fn invalid(spec: &str) -> ScriptError {
    ScriptError::value_error(format!("Invalid format specifier '{}'", spec))
}

fn parse_spec(text: &str) -> ScriptResult<Spec> {
    let chars: Vec<char> = text.chars().collect();
    let mut spec = Spec::default();
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
    if chars.len() >= 2 && is_align(chars[1]) {
        spec.fill = Some(chars[0]);
        spec.align = Some(chars[1]);
        i = 2;
    } else if chars.first().copied().is_some_and(is_align) {
        spec.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c) = chars.get(i).filter(|c| matches!(c, '+' | '-' | ' ')) {
        spec.sign = Some(c);
        i += 1;
    }
    if chars.get(i) == Some(&'#') {
        spec.alternate = true;
        i += 1;
    }
    if chars.get(i) == Some(&'0') {
        spec.zero = true;
        i += 1;
    }
    let digits = |i: &mut usize| -> ScriptResult<Option<usize>> {
        let start = *i;
        while chars.get(*i).is_some_and(|c| c.is_ascii_digit()) {
            *i += 1;
        }
        if *i == start {
            return Ok(None);
        }
        let text: String = chars[start..*i].iter().collect();
        text.parse().map(Some).map_err(|_| invalid(&text))
    };
    spec.width = digits(&mut i)?.unwrap_or(0);
    if let Some(&c) = chars.get(i).filter(|c| matches!(c, ',' | '_')) {
        spec.grouping = Some(c);
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        spec.precision = Some(digits(&mut i)?.ok_or_else(|| ScriptError::value_error("Format specifier missing precision"))?);
    }
    if let Some(&c) = chars.get(i) {
        spec.kind = Some(c);
        i += 1;
    }
    if i != chars.len() {
        return Err(invalid(text));
    }
    Ok(spec)
}

/// `format(value, spec)`.
pub fn format_value(value: &Value, spec: &str) -> ScriptResult<String> {
    if spec.is_empty() {
        return value.checked_str();
    }
    let spec = parse_spec(spec)?;
    let unknown = |k: char| {
        ScriptError::value_error(format!(
            "Unknown format code '{}' for object of type '{}'",
            k,
            value.type_name()
        ))
    };
    let float_of = |k: char| match value {
        Value::Float(f) => Ok(*f),
        v => v.to_bigint().and_then(|i| i.to_f64()).ok_or_else(|| unknown(k)),
    };
    let int_of = |k: char| -> ScriptResult<BigInt> {
        match value {
            Value::Int(_) | Value::Bool(_) | Value::BigInt(_) => value.to_bigint().ok_or_else(|| unknown(k)),
            _ => Err(unknown(k)),
        }
    };

    let (body, numeric) = match spec.kind {
        None => match value {
            Value::Float(f) => match spec.precision {
                Some(p) => (general(*f, p.max(1), spec.alternate, false), true),
                None => (format_float(*f), true),
            },
            Value::Int(i) => (i.to_string(), true),
            Value::BigInt(b) => (b.value().to_string(), true),
            Value::Str(s) => (truncate(s.as_str(), spec.precision), false),
            other => (truncate(&other.checked_str()?, spec.precision), false),
        },
        Some('s') => match value {
            Value::Str(s) => (truncate(s.as_str(), spec.precision), false),
            _ => return Err(unknown('s')),
        },
        Some('d') => (int_of('d')?.to_string(), true),
        Some('n') => (int_of('n')?.to_string(), true),
        Some(k @ ('x' | 'X' | 'o' | 'b')) => {
            let i = int_of(k)?;
            let magnitude = i.magnitude();
            let digits = match k {
                'x' => format!("{:x}", magnitude),
                'X' => format!("{:X}", magnitude),
                'o' => format!("{:o}", magnitude),
                _ => format!("{:b}", magnitude),
            };
            let prefix = if spec.alternate {
                match k {
                    'x' => "0x",
                    'X' => "0X",
                    'o' => "0o",
                    _ => "0b",
                }
            } else {
                ""
            };
            let sign = if i.is_negative() { "-" } else { "" };
            (format!("{}{}{}", sign, prefix, digits), true)
        }
        Some('c') => {
            let code = int_of('c')?;
            let c = code
                .to_u32()
                .and_then(char::from_u32)
                .ok_or_else(|| ScriptError::new(ErrorKind::OverflowError, "%c arg not in range(0x110000)"))?;
            (c.to_string(), false)
        }
        Some(k @ ('f' | 'F')) => {
            let f = float_of(k)?;
            let body = fixed(f, spec.precision.unwrap_or(6), spec.alternate);
            (if k == 'F' { body.to_uppercase() } else { body }, true)
        }
        Some(k @ ('e' | 'E')) => {
            let f = float_of(k)?;
            let body = scientific(f, spec.precision.unwrap_or(6), spec.alternate);
            (if k == 'E' { body.to_uppercase() } else { body }, true)
        }
        Some(k @ ('g' | 'G')) => {
            let f = float_of(k)?;
            let body = general(f, spec.precision.unwrap_or(6).max(1), spec.alternate, true);
            (if k == 'G' { body.to_uppercase() } else { body }, true)
        }
        Some('%') => {
            let f = float_of('%')?;
            (format!("{}%", fixed(f * 100.0, spec.precision.unwrap_or(6), spec.alternate)), true)
        }
        Some(k) => return Err(unknown(k)),
    };

    let (sign, digits) = if numeric {
        match body.strip_prefix('-') {
            Some(rest) => ("-".to_string(), rest.to_string()),
            None => (
                match spec.sign {
                    Some('+') => "+".to_string(),
                    Some(' ') => " ".to_string(),
                    _ => String::new(),
                },
                body,
            ),
        }
    } else {
        (String::new(), body)
    };
    let digits = match spec.grouping {
        Some(sep) if numeric => group(&digits, sep),
        _ => digits,
    };

    let len = sign.chars().count() + digits.chars().count();
    let (fill, align) = match (spec.fill, spec.align, spec.zero) {
        (fill, Some(align), _) => (fill.unwrap_or(' '), align),
        (_, None, true) if numeric => ('0', '='),
        (_, None, _) => (' ', if numeric { '>' } else { '<' }),
    };
    if len >= spec.width {
        return Ok(format!("{}{}", sign, digits));
    }
    let pad = spec.width - len;
    heap::reserve(pad)?;
    let padding = |n: usize| fill.to_string().repeat(n);
    Ok(match align {
        '<' => format!("{}{}{}", sign, digits, padding(pad)),
        '^' => format!("{}{}{}{}", padding(pad / 2), sign, digits, padding(pad - pad / 2)),
        '=' => format!("{}{}{}", sign, padding(pad), digits),
        _ => format!("{}{}{}", padding(pad), sign, digits),
    })
}

fn truncate(s: &str, precision: Option<usize>) -> String {
    match precision {
        Some(p) => s.chars().take(p).collect(),
        None => s.to_string(),
    }
}

fn non_finite(f: f64) -> Option<String> {
    if f.is_nan() {
        Some("nan".to_string())
    } else if f.is_infinite() {
        Some(if f > 0.0 { "inf" } else { "-inf" }.to_string())
    } else {
        None
    }
}

fn fixed(f: f64, precision: usize, alternate: bool) -> String {
    if let Some(s) = non_finite(f) {
        return s;
    }
    let s = format!("{:.*}", precision, f);
    if alternate && precision == 0 {
        format!("{}.", s)
    } else {
        s
    }
}

fn split_exponent(s: &str) -> (String, i32) {
    match s.split_once('e') {
        Some((mantissa, exp)) => (mantissa.to_string(), exp.parse().unwrap_or(0)),
        None => (s.to_string(), 0),
    }
}

fn join_exponent(mantissa: &str, exp: i32) -> String {
    format!("{}e{}{:02}", mantissa, if exp < 0 { '-' } else { '+' }, exp.abs())
}

fn scientific(f: f64, precision: usize, alternate: bool) -> String {
    if let Some(s) = non_finite(f) {
        return s;
    }
    let (mut mantissa, exp) = split_exponent(&format!("{:.*e}", precision, f));
    if alternate && precision == 0 {
        mantissa.push('.');
    }
    join_exponent(&mantissa, exp)
}

/// `g` formatting. Without an explicit type Python keeps at least one decimal.
fn general(f: f64, precision: usize, alternate: bool, explicit: bool) -> String {
    if let Some(s) = non_finite(f) {
        return s;
    }
    if f == 0.0 {
        let zero = if f.is_sign_negative() { "-0" } else { "0" };
        return if explicit { zero.to_string() } else { format!("{}.0", zero) };
    }
    let (_, exp) = split_exponent(&format!("{:.*e}", precision - 1, f));
    let strip = |s: String| -> String {
        if alternate || !s.contains('.') {
            return s;
        }
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    };
    if exp < -4 || exp >= precision as i32 {
        let (mantissa, exp) = split_exponent(&format!("{:.*e}", precision - 1, f));
        return join_exponent(&strip(mantissa), exp);
    }
    let decimals = (precision as i32 - 1 - exp).max(0) as usize;
    let s = strip(format!("{:.*}", decimals, f));
    if !explicit && !s.contains('.') {
        format!("{}.0", s)
    } else {
        s
    }
}

fn group(digits: &str, sep: char) -> String {
    let (int_part, rest) = match digits.find(|c: char| !c.is_ascii_digit()) {
        Some(i) => digits.split_at(i),
        None => (digits, ""),
    };
    let mut out = String::new();
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            out.push(sep);
        }
        out.push(c);
    }
    out.push_str(rest);
    out
}

/// `template.format(*args, **kwargs)`. Field names may be empty, positional
/// indices or keyword names.
pub fn format_template(template: &str, args: &[Value], kwargs: &DictObj) -> ScriptResult<String> {
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::new();
    let mut auto_index = 0;
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                out.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                out.push('}');
                i += 2;
            }
            '}' => return Err(ScriptError::value_error("Single '}' encountered in format string")),
            '{' => {
                let close = chars[i + 1..]
                    .iter()
                    .position(|&c| c == '}')
                    .map(|p| p + i + 1)
                    .ok_or_else(|| ScriptError::value_error("Single '{' encountered in format string"))?;
                let field: String = chars[i + 1..close].iter().collect();
                let (head, spec) = field.split_once(':').unwrap_or((field.as_str(), ""));
                let (name, conversion) = match head.split_once('!') {
                    Some((name, conv)) => (name, Some(conv)),
                    None => (head, None),
                };
                let value = if name.is_empty() {
                    let value = args.get(auto_index).cloned().ok_or_else(|| {
                        ScriptError::index_error(format!(
                            "Replacement index {} out of range for positional args tuple",
                            auto_index
                        ))
                    })?;
                    auto_index += 1;
                    value
                } else if let Ok(n) = name.parse::<usize>() {
                    args.get(n).cloned().ok_or_else(|| {
                        ScriptError::index_error(format!(
                            "Replacement index {} out of range for positional args tuple",
                            n
                        ))
                    })?
                } else if name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                    kwargs
                        .lookup(&Value::str(name))?
                        .ok_or_else(|| ScriptError::key_error(format!("'{}'", name)))?
                } else {
                    return Err(ScriptError::value_error(format!("unsupported format field '{}'", name)));
                };
                let value = match conversion {
                    None => value,
                    Some("r") | Some("a") => Value::str(value.checked_repr()?),
                    Some("s") => Value::str(value.checked_str()?),
                    Some(other) => {
                        return Err(ScriptError::value_error(format!(
                            "Unknown conversion specifier {}",
                            other
                        )))
                    }
                };
                out.push_str(&format_value(&value, spec)?);
                i = close + 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Ok(out)
}

/// `template % args` with the common conversions.
pub fn percent_format(template: &str, args: &Value) -> ScriptResult<String> {
    let args: Vec<Value> = match args {
        Value::Tuple(t) => t.items().to_vec(),
        other => vec![other.clone()],
    };
    let chars: Vec<char> = template.chars().collect();
    let mut next = args.iter();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '%' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        i += 1;
        let mut flags = String::new();
        while let Some(&c) = chars.get(i).filter(|c| matches!(c, '-' | '+' | ' ' | '0' | '#')) {
            flags.push(c);
            i += 1;
        }
        let mut width = String::new();
        while let Some(&c) = chars.get(i).filter(|c| c.is_ascii_digit()) {
            width.push(c);
            i += 1;
        }
        let mut precision = String::new();
        if chars.get(i) == Some(&'.') {
            precision.push('.');
            i += 1;
            while let Some(&c) = chars.get(i).filter(|c| c.is_ascii_digit()) {
                precision.push(c);
                i += 1;
            }
            if precision == "." {
                precision.push('0');
            }
        }
        let conversion = chars
            .get(i)
            .copied()
            .ok_or_else(|| ScriptError::value_error("incomplete format"))?;
        i += 1;
        if conversion == '%' {
            out.push('%');
            continue;
        }
        let arg = next
            .next()
            .ok_or_else(|| ScriptError::type_error("not enough arguments for format string"))?;

        let mut spec = String::new();
        if flags.contains('-') {
            spec.push('<');
        } else if matches!(conversion, 's' | 'r' | 'a' | 'c') {
            spec.push('>');
        }
        if flags.contains('+') {
            spec.push('+');
        } else if flags.contains(' ') {
            spec.push(' ');
        }
        if flags.contains('#') {
            spec.push('#');
        }
        if flags.contains('0') && !flags.contains('-') {
            spec.push('0');
        }
        spec.push_str(&width);
        spec.push_str(&precision);

        let (value, kind) = match conversion {
            's' => (Value::str(arg.checked_str()?), 's'),
            'r' | 'a' => (Value::str(arg.checked_repr()?), 's'),
            'd' | 'i' | 'u' => match arg {
                Value::Float(f) if f.is_finite() => (Value::Int(f.trunc() as i64), 'd'),
                other if other.to_bigint().is_some() => (other.clone(), 'd'),
                other => {
                    return Err(ScriptError::type_error(format!(
                        "%{} format: a real number is required, not {}",
                        conversion,
                        other.type_name()
                    )))
                }
            },
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' | 'x' | 'X' | 'o' | 'c' => (arg.clone(), conversion),
            other => {
                return Err(ScriptError::value_error(format!(
                    "unsupported format character '{}'",
                    other
                )))
            }
        };
        spec.push(kind);
        out.push_str(&format_value(&value, &spec)?);
    }
    if next.next().is_some() {
        return Err(ScriptError::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(value: Value, spec: &str) -> String {
        format_value(&value, spec).unwrap()
    }

    #[test]
    fn fixed_point_and_padding() {
        assert_eq!(fmt(Value::Float(3.14159), ".2f"), "3.14");
        assert_eq!(fmt(Value::Int(42), "05d"), "00042");
        assert_eq!(fmt(Value::Int(-42), "+6"), "   -42");
        assert_eq!(fmt(Value::str("ab"), "^6"), "  ab  ");
        assert_eq!(fmt(Value::str("ab"), "*>4"), "**ab");
    }

    #[test]
    fn grouping_and_radix() {
        assert_eq!(fmt(Value::Int(1234567), ","), "1,234,567");
        assert_eq!(fmt(Value::Float(1234.5), ",.1f"), "1,234.5");
        assert_eq!(fmt(Value::Int(255), "#x"), "0xff");
        assert_eq!(fmt(Value::Int(5), "b"), "101");
    }

    #[test]
    fn general_and_scientific() {
        assert_eq!(fmt(Value::Float(1234.5), "e"), "1.234500e+03");
        assert_eq!(fmt(Value::Float(0.00001), "g"), "1e-05");
        assert_eq!(fmt(Value::Float(2.5), "g"), "2.5");
        assert_eq!(fmt(Value::Float(0.25), ".1%"), "25.0%");
    }

    #[test]
    fn format_codes_check_types() {
        assert!(format_value(&Value::str("x"), "d").is_err());
        assert!(format_value(&Value::Int(1), "s").is_err());
    }

    #[test]
    fn template_fields() {
        let mut kwargs = DictObj::new();
        kwargs.insert(Value::str("name"), Value::str("Ada")).unwrap();
        kwargs.insert(Value::str("total"), Value::Float(3.0)).unwrap();
        let args = [Value::Int(1), Value::Int(2)];
        let out = format_template("{} + {1} = {total:.1f}, {name!r} {{ok}}", &args, &kwargs).unwrap();
        assert_eq!(out, "1 + 2 = 3.0, 'Ada' {ok}");
    }

    #[test]
    fn percent_style() {
        let args = Value::tuple(vec![Value::str("x"), Value::Float(2.0), Value::Int(7)]);
        assert_eq!(percent_format("%s=%.2f (%03d) 100%%", &args).unwrap(), "x=2.00 (007) 100%");
        assert!(percent_format("%s %s", &Value::str("a")).is_err());
        assert!(percent_format("%s", &Value::tuple(vec![Value::Int(1), Value::Int(2)])).is_err());
    }
}
