//! printf-style `format`.

use thorn_core::gc::{bad_argument, NativeContext, NativeError, NativeResult};
use thorn_core::value::Value;

/// Parsed `%[flags][width][.precision]` prefix of a conversion.
#[derive(Debug, Default)]
struct FormatSpec {
    left: bool,
    plus: bool,
    space: bool,
    zero: bool,
    alt: bool,
    width: usize,
    precision: Option<usize>,
}

impl FormatSpec {
    fn parse(fmt: &[u8], i: &mut usize) -> Self {
        let mut spec = FormatSpec::default();
        while let Some(&c) = fmt.get(*i) {
            match c {
                b'-' => spec.left = true,
                b'+' => spec.plus = true,
                b' ' => spec.space = true,
                b'0' => spec.zero = true,
                b'#' => spec.alt = true,
                _ => break,
            }
            *i += 1;
        }
        spec.width = read_digits(fmt, i).unwrap_or(0);
        if fmt.get(*i) == Some(&b'.') {
            *i += 1;
            spec.precision = Some(read_digits(fmt, i).unwrap_or(0));
        }
        spec
    }

    /// Pad `body` to the field width. Zero padding goes after any sign.
    fn pad(&self, body: &str, numeric: bool) -> String {
        let len = body.chars().count();
        if len >= self.width {
            return body.to_string();
        }
        let fill = self.width - len;
        if self.left {
            format!("{body}{}", " ".repeat(fill))
        } else if self.zero && numeric {
            let (sign, digits) = match body.as_bytes().first() {
                Some(b'-' | b'+' | b' ') => body.split_at(1),
                _ => ("", body),
            };
            format!("{sign}{}{digits}", "0".repeat(fill))
        } else {
            format!("{}{body}", " ".repeat(fill))
        }
    }

    fn sign(&self, negative: bool) -> &'static str {
        if negative {
            "-"
        } else if self.plus {
            "+"
        } else if self.space {
            " "
        } else {
            ""
        }
    }
}

fn read_digits(fmt: &[u8], i: &mut usize) -> Option<usize> {
    let start = *i;
    while fmt.get(*i).is_some_and(u8::is_ascii_digit) {
        *i += 1;
    }
    std::str::from_utf8(&fmt[start..*i]).ok()?.parse().ok()
}

/// Rewrite Rust's exponent form ("1.5e5") in C style ("1.5e+05").
fn fix_scientific_notation(s: &str) -> String {
    let Some(pos) = s.find(['e', 'E']) else {
        return s.to_string();
    };
    let (mantissa, rest) = s.split_at(pos);
    let (e_char, exp) = rest.split_at(1);
    let (sign, digits) = match exp.strip_prefix('-') {
        Some(d) => ("-", d),
        None => ("+", exp.strip_prefix('+').unwrap_or(exp)),
    };
    let digits = digits.trim_start_matches('0');
    format!("{mantissa}{e_char}{sign}{digits:0>2}")
}

fn format_exp(f: f64, prec: usize, upper: bool) -> String {
    let s = fix_scientific_notation(&format!("{:.prec$e}", f.abs()));
    if upper {
        s.to_uppercase()
    } else {
        s
    }
}

/// C `%g`: shortest of `%e` and `%f` at `prec` significant digits.
fn format_general(f: f64, prec: usize, alt: bool, upper: bool) -> String {
    let prec = prec.max(1);
    let sci = format!("{:.*e}", prec - 1, f.abs());
    let exp: i32 = sci
        .rfind('e')
        .and_then(|pos| sci[pos + 1..].parse().ok())
        .unwrap_or(0);
    let mut s = if exp < -4 || exp >= prec as i32 {
        fix_scientific_notation(&sci)
    } else {
        let decimals = (prec as i32 - exp - 1).max(0) as usize;
        format!("{:.decimals$}", f.abs())
    };
    if !alt {
        s = strip_trailing_zeros(&s);
    }
    if upper {
        s.to_uppercase()
    } else {
        s
    }
}

fn strip_trailing_zeros(s: &str) -> String {
    let (mantissa, exp) = match s.find('e') {
        Some(pos) => s.split_at(pos),
        None => (s, ""),
    };
    if !mantissa.contains('.') {
        return s.to_string();
    }
    let mantissa = mantissa.trim_end_matches('0').trim_end_matches('.');
    format!("{mantissa}{exp}")
}

fn check_integer(ctx: &NativeContext, n: usize) -> Result<i64, NativeError> {
    let f = ctx.check_number(n, "format")?;
    if !f.is_finite() {
        return Err(bad_argument(n, "format", "number", ctx.arg(n)));
    }
    Ok(f.trunc() as i64)
}

fn format_integer(spec: &FormatSpec, n: i64) -> String {
    let mut digits = n.unsigned_abs().to_string();
    if let Some(p) = spec.precision {
        if digits.len() < p {
            digits = format!("{digits:0>p$}");
        }
    }
    spec.pad(&format!("{}{digits}", spec.sign(n < 0)), spec.precision.is_none())
}

fn format_unsigned(spec: &FormatSpec, conv: u8, n: i64) -> String {
    // Negative values wrap to their 32-bit two's complement form.
    let u = if n < 0 { n as u32 as u64 } else { n as u64 };
    let body = match conv {
        b'o' if spec.alt && u != 0 => format!("0{u:o}"),
        b'o' => format!("{u:o}"),
        b'x' if spec.alt && u != 0 => format!("0x{u:x}"),
        b'x' => format!("{u:x}"),
        b'X' if spec.alt && u != 0 => format!("0X{u:X}"),
        b'X' => format!("{u:X}"),
        _ => u.to_string(),
    };
    spec.pad(&body, true)
}

fn format_float(spec: &FormatSpec, conv: u8, f: f64) -> String {
    let body = if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        "inf".to_string()
    } else {
        let prec = spec.precision.unwrap_or(6);
        match conv {
            b'e' | b'E' => format_exp(f, prec, conv == b'E'),
            b'g' | b'G' => format_general(f, prec, spec.alt, conv == b'G'),
            _ => format!("{:.prec$}", f.abs()),
        }
    };
    let negative = f.is_sign_negative() && !f.is_nan();
    let body = format!("{}{body}", spec.sign(negative));
    spec.pad(&body, f.is_finite())
}

fn quote(bytes: &[u8], out: &mut Vec<u8>) {
    out.push(b'"');
    for &b in bytes {
        match b {
            b'"' => out.extend_from_slice(b"\\\""),
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\n' => out.extend_from_slice(b"\\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            0 => out.extend_from_slice(b"\\000"),
            _ => out.push(b),
        }
    }
    out.push(b'"');
}

/// `format(fmt, ...)`.
pub fn native_format(ctx: &mut NativeContext) -> NativeResult {
    let fmt = ctx.check_bytes(0, "format")?;
    let mut out: Vec<u8> = Vec::with_capacity(fmt.len());
    let mut arg = 0usize;
    let mut i = 0;

    while i < fmt.len() {
        let c = fmt[i];
        i += 1;
        if c != b'%' {
            out.push(c);
            continue;
        }
        if fmt.get(i) == Some(&b'%') {
            out.push(b'%');
            i += 1;
            continue;
        }
        let spec = FormatSpec::parse(&fmt, &mut i);
        let Some(&conv) = fmt.get(i) else {
            return Err(NativeError::Message(
                "invalid conversion '%' to 'format'".to_string(),
            ));
        };
        i += 1;
        arg += 1;
        if arg >= ctx.args.len() {
            return Err(bad_argument(arg, "format", "value", Value::Nil));
        }
        match conv {
            b'd' | b'i' => {
                let n = check_integer(ctx, arg)?;
                out.extend_from_slice(format_integer(&spec, n).as_bytes());
            }
            b'u' | b'o' | b'x' | b'X' => {
                let n = check_integer(ctx, arg)?;
                out.extend_from_slice(format_unsigned(&spec, conv, n).as_bytes());
            }
            b'c' => {
                let n = check_integer(ctx, arg)?;
                out.push(n as u8);
            }
            b'e' | b'E' | b'f' | b'g' | b'G' => {
                let f = ctx.check_number(arg, "format")? as f64;
                out.extend_from_slice(format_float(&spec, conv, f).as_bytes());
            }
            b'q' => {
                let bytes = ctx.check_bytes(arg, "format")?;
                quote(&bytes, &mut out);
            }
            b's' => {
                let v = ctx.arg(arg);
                let mut bytes = match v {
                    Value::String(id) => ctx.strings.get_bytes(id).to_vec(),
                    _ => ctx.to_display(v).into_bytes(),
                };
                if let Some(p) = spec.precision {
                    bytes.truncate(p);
                }
                let text = String::from_utf8_lossy(&bytes);
                out.extend_from_slice(spec.pad(&text, false).as_bytes());
            }
            other => {
                return Err(NativeError::Message(format!(
                    "invalid conversion '%{}' to 'format'",
                    other as char
                )));
            }
        }
    }

    Ok(vec![ctx.new_string(&out)])
}
