// Binary operator registry: symbol, precedence, associativity, scalar callable,
// and the static output-type table the compiler uses to tag binop subtrees.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::eval::EvalError;
use crate::value::{JNode, JType};

/// Extra binding power given to a right-associative binop when it competes
/// with itself on the operator stack.
pub const RIGHT_ASSOC_EPSILON: f64 = 0.1;

/// A binary infix operator. The callable is defined on scalar operands;
/// vectorization over iterables happens in the evaluator.
#[derive(Debug)]
pub struct Binop {
    pub sym: &'static str,
    pub precedence: f64,
    pub func: fn(&JNode, &JNode) -> Result<JNode, EvalError>,
}

impl Binop {
    #[inline]
    pub fn is_right_assoc(&self) -> bool {
        matches!(self.sym, "**" | "-**")
    }

    /// Boolean-classified binops return a bool per element pair. They never
    /// recurse into container elements: two nested containers compare as
    /// single values (deep equality), keeping filter masks flat.
    #[inline]
    pub fn is_boolean(&self) -> bool {
        matches!(self.sym, "==" | "!=" | "<" | "<=" | ">" | ">=" | "=~")
    }

    /// The precedence used when this binop arrives at the operator stack.
    #[inline]
    pub fn effective_precedence(&self) -> f64 {
        if self.is_right_assoc() {
            self.precedence + RIGHT_ASSOC_EPSILON
        } else {
            self.precedence
        }
    }

    /// Static output type for this binop given the operand type sets.
    ///
    /// Returns the smallest set the compiler can prove covers the result.
    /// The rules, in priority order:
    /// - either operand iterable → iterable of the same container shape;
    ///   an array definitely mixed with an object is an error
    /// - boolean-classified binops → bool
    /// - `/` and `**` → float; `//` → int
    /// - bitwise with a definite float operand → error
    /// - arithmetic on two definite bools → error; `+` on strings → string;
    ///   otherwise int if both definitely int, else num
    pub fn out_type(&self, lt: JType, rt: JType) -> Result<JType, EvalError> {
        if (JType::ARR.contains(lt) && JType::OBJ.contains(rt))
            || (JType::OBJ.contains(lt) && JType::ARR.contains(rt))
        {
            return Err(EvalError::Type(format!(
                "binop '{}' cannot combine an array with an object",
                self.sym
            )));
        }
        let scalar_out = match self.sym {
            "==" | "!=" | "<" | "<=" | ">" | ">=" | "=~" => JType::BOOL,
            "/" | "**" | "-**" => JType::FLOAT,
            "//" => JType::INT,
            "&" | "|" | "^" => {
                if JType::FLOAT.contains(lt) || JType::FLOAT.contains(rt) {
                    return Err(EvalError::Type(format!(
                        "bitwise '{}' cannot take a float operand",
                        self.sym
                    )));
                }
                JType::INT | JType::BOOL
            }
            "+" => arith_out(self.sym, lt, rt, true)?,
            _ => arith_out(self.sym, lt, rt, false)?,
        };
        let iter_part = lt.union(rt).intersection(JType::ITERABLE);
        if JType::ITERABLE.contains(lt) || JType::ITERABLE.contains(rt) {
            // one side is definitely a container, so the result is one too
            Ok(iter_part)
        } else if iter_part.is_empty() {
            Ok(scalar_out)
        } else {
            Ok(iter_part | scalar_out)
        }
    }
}

/// Output set for the polymorphic arithmetic binops (`+`, `-`, `*`, `%`).
fn arith_out(sym: &str, lt: JType, rt: JType, allow_str: bool) -> Result<JType, EvalError> {
    if JType::BOOL.contains(lt) && JType::BOOL.contains(rt) {
        return Err(EvalError::Type(format!(
            "arithmetic binop '{}' cannot take two boolean operands",
            sym
        )));
    }
    if JType::INT.contains(lt) && JType::INT.contains(rt) {
        return Ok(JType::INT);
    }
    if allow_str && JType::STR.contains(lt) && JType::STR.contains(rt) {
        return Ok(JType::STR);
    }
    let mut out = JType::NUM;
    if allow_str && lt.intersects(JType::STR) && rt.intersects(JType::STR) {
        out = out | JType::STR;
    }
    Ok(out)
}

// ── Registry ─────────────────────────────────────────────────────────────────

static BINOPS: Lazy<HashMap<&'static str, Binop>> = Lazy::new(|| {
    let table = [
        Binop { sym: "|", precedence: 0.0, func: bit_or },
        Binop { sym: "^", precedence: 1.0, func: bit_xor },
        Binop { sym: "&", precedence: 2.0, func: bit_and },
        Binop { sym: "==", precedence: 3.0, func: eq },
        Binop { sym: "!=", precedence: 3.0, func: ne },
        Binop { sym: "<", precedence: 3.0, func: lt },
        Binop { sym: "<=", precedence: 3.0, func: le },
        Binop { sym: ">", precedence: 3.0, func: gt },
        Binop { sym: ">=", precedence: 3.0, func: ge },
        Binop { sym: "=~", precedence: 3.0, func: regex_match },
        Binop { sym: "+", precedence: 4.0, func: add },
        Binop { sym: "-", precedence: 4.0, func: sub },
        Binop { sym: "*", precedence: 5.0, func: mul },
        Binop { sym: "/", precedence: 5.0, func: div },
        Binop { sym: "//", precedence: 5.0, func: floordiv },
        Binop { sym: "%", precedence: 5.0, func: modulo },
        Binop { sym: "**", precedence: 6.0, func: pow },
    ];
    table.into_iter().map(|b| (b.sym, b)).collect()
});

/// The synthetic negate-then-power binop: `-x ** y` parses to `negpow(x, y)`
/// so that unary minus binds less tightly than `**`, matching `-(x ** y)`.
static NEGPOW: Lazy<Binop> = Lazy::new(|| Binop {
    sym: "-**",
    precedence: 6.0,
    func: negpow,
});

/// Look up a binop by symbol or keyword spelling (`and`, `or`, `xor`).
pub fn lookup(name: &str) -> Option<&'static Binop> {
    let sym = match name {
        "and" => "&",
        "or" => "|",
        "xor" => "^",
        other => other,
    };
    BINOPS.get(sym)
}

pub fn negpow_binop() -> &'static Binop {
    &NEGPOW
}

// ── Scalar implementations ───────────────────────────────────────────────────

/// Numeric view for arithmetic: bools coerce to 0/1 unless *both* operands
/// are bools (that combination is rejected statically and dynamically).
fn arith_pair(sym: &str, l: &JNode, r: &JNode) -> Result<(f64, f64, bool), EvalError> {
    if l.as_bool().is_some() && r.as_bool().is_some() {
        return Err(EvalError::Type(format!(
            "arithmetic binop '{}' cannot take two boolean operands",
            sym
        )));
    }
    let widen = |x: &JNode| -> Option<(f64, bool)> {
        match x {
            JNode::Int(n) => Some((*n as f64, true)),
            JNode::Bool(b) => Some((*b as i64 as f64, true)),
            JNode::Float(n) => Some((*n, false)),
            _ => None,
        }
    };
    match (widen(l), widen(r)) {
        (Some((lf, li)), Some((rf, ri))) => Ok((lf, rf, li && ri)),
        _ => Err(EvalError::Type(format!(
            "binop '{}' cannot take operands of type {} and {}",
            sym,
            l.type_tag(),
            r.type_tag()
        ))),
    }
}

fn int_or_float(v: f64, int_result: bool) -> JNode {
    if int_result {
        JNode::Int(v as i64)
    } else {
        JNode::Float(v)
    }
}

fn add(l: &JNode, r: &JNode) -> Result<JNode, EvalError> {
    if let (JNode::Str(a), JNode::Str(b)) = (l, r) {
        return Ok(JNode::string(format!("{}{}", a, b)));
    }
    let (lf, rf, ints) = arith_pair("+", l, r)?;
    Ok(int_or_float(lf + rf, ints))
}

fn sub(l: &JNode, r: &JNode) -> Result<JNode, EvalError> {
    let (lf, rf, ints) = arith_pair("-", l, r)?;
    Ok(int_or_float(lf - rf, ints))
}

fn mul(l: &JNode, r: &JNode) -> Result<JNode, EvalError> {
    let (lf, rf, ints) = arith_pair("*", l, r)?;
    Ok(int_or_float(lf * rf, ints))
}

fn div(l: &JNode, r: &JNode) -> Result<JNode, EvalError> {
    let (lf, rf, _) = arith_pair("/", l, r)?;
    Ok(JNode::Float(lf / rf))
}

fn floordiv(l: &JNode, r: &JNode) -> Result<JNode, EvalError> {
    let (lf, rf, _) = arith_pair("//", l, r)?;
    if rf == 0.0 {
        return Err(EvalError::Type("integer division by zero".to_string()));
    }
    Ok(JNode::Int((lf / rf).floor() as i64))
}

fn modulo(l: &JNode, r: &JNode) -> Result<JNode, EvalError> {
    let (lf, rf, ints) = arith_pair("%", l, r)?;
    if rf == 0.0 {
        return Err(EvalError::Type("modulo by zero".to_string()));
    }
    Ok(int_or_float(lf % rf, ints))
}

fn pow(l: &JNode, r: &JNode) -> Result<JNode, EvalError> {
    let (lf, rf, _) = arith_pair("**", l, r)?;
    Ok(JNode::Float(lf.powf(rf)))
}

fn negpow(l: &JNode, r: &JNode) -> Result<JNode, EvalError> {
    let (lf, rf, _) = arith_pair("**", l, r)?;
    Ok(JNode::Float(-lf.powf(rf)))
}

fn bitwise(sym: &str, l: &JNode, r: &JNode) -> Result<JNode, EvalError> {
    match (l, r) {
        (JNode::Int(a), JNode::Int(b)) => Ok(JNode::Int(match sym {
            "&" => a & b,
            "|" => a | b,
            _ => a ^ b,
        })),
        (JNode::Bool(a), JNode::Bool(b)) => Ok(JNode::Bool(match sym {
            "&" => a & b,
            "|" => a | b,
            _ => a ^ b,
        })),
        _ => Err(EvalError::Type(format!(
            "bitwise '{}' requires two ints or two bools, got {} and {}",
            sym,
            l.type_tag(),
            r.type_tag()
        ))),
    }
}

fn bit_and(l: &JNode, r: &JNode) -> Result<JNode, EvalError> {
    bitwise("&", l, r)
}

fn bit_or(l: &JNode, r: &JNode) -> Result<JNode, EvalError> {
    bitwise("|", l, r)
}

fn bit_xor(l: &JNode, r: &JNode) -> Result<JNode, EvalError> {
    bitwise("^", l, r)
}

fn eq(l: &JNode, r: &JNode) -> Result<JNode, EvalError> {
    Ok(JNode::Bool(l == r))
}

fn ne(l: &JNode, r: &JNode) -> Result<JNode, EvalError> {
    Ok(JNode::Bool(l != r))
}

fn compare(sym: &str, l: &JNode, r: &JNode) -> Result<std::cmp::Ordering, EvalError> {
    let ord = match (l, r) {
        (JNode::Str(a), JNode::Str(b)) => Some(a.cmp(b)),
        (JNode::Bool(a), JNode::Bool(b)) => Some(a.cmp(b)),
        _ => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };
    ord.ok_or_else(|| {
        EvalError::Type(format!(
            "binop '{}' cannot compare {} with {}",
            sym,
            l.type_tag(),
            r.type_tag()
        ))
    })
}

fn lt(l: &JNode, r: &JNode) -> Result<JNode, EvalError> {
    Ok(JNode::Bool(compare("<", l, r)?.is_lt()))
}

fn le(l: &JNode, r: &JNode) -> Result<JNode, EvalError> {
    Ok(JNode::Bool(compare("<=", l, r)?.is_le()))
}

fn gt(l: &JNode, r: &JNode) -> Result<JNode, EvalError> {
    Ok(JNode::Bool(compare(">", l, r)?.is_gt()))
}

fn ge(l: &JNode, r: &JNode) -> Result<JNode, EvalError> {
    Ok(JNode::Bool(compare(">=", l, r)?.is_ge()))
}

fn regex_match(l: &JNode, r: &JNode) -> Result<JNode, EvalError> {
    let s = l.as_str().ok_or_else(|| {
        EvalError::Type(format!(
            "left side of '=~' must be a string, got {}",
            l.type_tag()
        ))
    })?;
    match r {
        JNode::Regex(re) => Ok(JNode::Bool(re.is_match(s))),
        JNode::Str(pat) => {
            let re = Regex::new(pat)
                .map_err(|e| EvalError::Type(format!("invalid regex in '=~': {}", e)))?;
            Ok(JNode::Bool(re.is_match(s)))
        }
        _ => Err(EvalError::Type(format!(
            "right side of '=~' must be a regex or string, got {}",
            r.type_tag()
        ))),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
