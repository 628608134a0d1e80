// Built-in function registry: arities, per-argument type sets, output tags,
// vectorization flags, and the implementations behind them.

use std::cmp::Ordering;
use std::collections::HashMap;

use indexmap::IndexMap;
use once_cell::sync::Lazy;

use crate::eval::EvalError;
use crate::indexer::slice_indices;
use crate::value::{JNode, JType};

/// A built-in function.
///
/// `input_types[i]` is the permitted type set for argument `i`; for variadic
/// functions the last entry repeats. Vectorized functions map element-wise
/// over an iterable first argument. Mutating functions sort through a
/// copy-on-write handle; the flag records the classification for callers
/// that re-run queries against shared documents.
#[derive(Debug)]
pub struct ArgFunction {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
    pub input_types: Vec<JType>,
    pub out_type: JType,
    pub vectorized: bool,
    pub mutates: bool,
    pub func: fn(&[JNode]) -> Result<JNode, EvalError>,
}

impl ArgFunction {
    #[inline]
    pub fn is_variadic(&self) -> bool {
        self.max_args == usize::MAX
    }

    /// Permitted type set at argument position `i`.
    pub fn arg_type(&self, i: usize) -> JType {
        match self.input_types.get(i) {
            Some(t) => *t,
            None => *self
                .input_types
                .last()
                .expect("every registered function declares at least one argument type"),
        }
    }
}

/// Look up a function by name.
pub fn lookup(name: &str) -> Option<&'static ArgFunction> {
    FUNCTIONS.get(name)
}

/// The registered unary-minus function (also reachable as `uminus(x)`).
pub(crate) fn uminus() -> &'static ArgFunction {
    lookup("uminus").expect("uminus is registered")
}

// ── Registry ─────────────────────────────────────────────────────────────────

static FUNCTIONS: Lazy<HashMap<&'static str, ArgFunction>> = Lazy::new(|| {
    let any = JType::ANYTHING;
    let it = JType::ITERABLE;
    let table = vec![
        // Reducing / structural functions
        ArgFunction { name: "len", min_args: 1, max_args: 1, input_types: vec![it], out_type: JType::INT, vectorized: false, mutates: false, func: len_fn },
        ArgFunction { name: "sum", min_args: 1, max_args: 1, input_types: vec![JType::ARR], out_type: JType::FLOAT, vectorized: false, mutates: false, func: sum_fn },
        ArgFunction { name: "avg", min_args: 1, max_args: 1, input_types: vec![JType::ARR], out_type: JType::FLOAT, vectorized: false, mutates: false, func: avg_fn },
        ArgFunction { name: "mean", min_args: 1, max_args: 1, input_types: vec![JType::ARR], out_type: JType::FLOAT, vectorized: false, mutates: false, func: avg_fn },
        ArgFunction { name: "max", min_args: 1, max_args: 1, input_types: vec![JType::ARR], out_type: JType::NUM, vectorized: false, mutates: false, func: max_fn },
        ArgFunction { name: "min", min_args: 1, max_args: 1, input_types: vec![JType::ARR], out_type: JType::NUM, vectorized: false, mutates: false, func: min_fn },
        ArgFunction { name: "sorted", min_args: 1, max_args: 2, input_types: vec![JType::ARR, JType::BOOL | JType::NULL], out_type: JType::ARR, vectorized: false, mutates: true, func: sorted_fn },
        ArgFunction { name: "sort_by", min_args: 2, max_args: 3, input_types: vec![JType::ARR, JType::STR | JType::INT, JType::BOOL | JType::NULL], out_type: JType::ARR, vectorized: false, mutates: true, func: sort_by_fn },
        ArgFunction { name: "max_by", min_args: 2, max_args: 2, input_types: vec![JType::ARR, JType::STR | JType::INT], out_type: any, vectorized: false, mutates: false, func: max_by_fn },
        ArgFunction { name: "min_by", min_args: 2, max_args: 2, input_types: vec![JType::ARR, JType::STR | JType::INT], out_type: any, vectorized: false, mutates: false, func: min_by_fn },
        ArgFunction { name: "keys", min_args: 1, max_args: 1, input_types: vec![JType::OBJ], out_type: JType::ARR, vectorized: false, mutates: false, func: keys_fn },
        ArgFunction { name: "values", min_args: 1, max_args: 1, input_types: vec![JType::OBJ], out_type: JType::ARR, vectorized: false, mutates: false, func: values_fn },
        ArgFunction { name: "items", min_args: 1, max_args: 1, input_types: vec![JType::OBJ], out_type: JType::ARR, vectorized: false, mutates: false, func: items_fn },
        ArgFunction { name: "unique", min_args: 1, max_args: 2, input_types: vec![JType::ARR, JType::BOOL | JType::NULL], out_type: JType::ARR, vectorized: false, mutates: false, func: unique_fn },
        ArgFunction { name: "flatten", min_args: 1, max_args: 2, input_types: vec![JType::ARR, JType::INT | JType::NULL], out_type: JType::ARR, vectorized: false, mutates: false, func: flatten_fn },
        ArgFunction { name: "range", min_args: 1, max_args: 3, input_types: vec![JType::INT, JType::INT | JType::NULL, JType::INT | JType::NULL], out_type: JType::ARR, vectorized: false, mutates: false, func: range_fn },
        ArgFunction { name: "index", min_args: 2, max_args: 3, input_types: vec![JType::ARR, any, JType::BOOL | JType::NULL], out_type: JType::INT, vectorized: false, mutates: false, func: index_fn },
        ArgFunction { name: "in", min_args: 2, max_args: 2, input_types: vec![any, it], out_type: JType::BOOL, vectorized: false, mutates: false, func: in_fn },
        ArgFunction { name: "concat", min_args: 2, max_args: usize::MAX, input_types: vec![it], out_type: it, vectorized: false, mutates: false, func: concat_fn },
        ArgFunction { name: "append", min_args: 2, max_args: usize::MAX, input_types: vec![JType::ARR, any], out_type: JType::ARR, vectorized: false, mutates: false, func: append_fn },
        ArgFunction { name: "dict", min_args: 1, max_args: 1, input_types: vec![JType::ARR], out_type: JType::OBJ, vectorized: false, mutates: false, func: dict_fn },
        ArgFunction { name: "zip", min_args: 2, max_args: usize::MAX, input_types: vec![JType::ARR], out_type: JType::ARR, vectorized: false, mutates: false, func: zip_fn },
        // Vectorized scalar functions
        ArgFunction { name: "abs", min_args: 1, max_args: 1, input_types: vec![JType::NUM | it], out_type: JType::NUM, vectorized: true, mutates: false, func: abs_fn },
        ArgFunction { name: "float", min_args: 1, max_args: 1, input_types: vec![JType::NUM | JType::BOOL | JType::STR | it], out_type: JType::FLOAT, vectorized: true, mutates: false, func: float_fn },
        ArgFunction { name: "int", min_args: 1, max_args: 1, input_types: vec![JType::NUM | JType::BOOL | JType::STR | it], out_type: JType::INT, vectorized: true, mutates: false, func: int_fn },
        ArgFunction { name: "round", min_args: 1, max_args: 2, input_types: vec![JType::NUM | it, JType::INT | JType::NULL], out_type: JType::NUM, vectorized: true, mutates: false, func: round_fn },
        ArgFunction { name: "not", min_args: 1, max_args: 1, input_types: vec![JType::BOOL | it], out_type: JType::BOOL, vectorized: true, mutates: false, func: not_fn },
        ArgFunction { name: "uminus", min_args: 1, max_args: 1, input_types: vec![JType::NUM | it], out_type: JType::NUM, vectorized: true, mutates: false, func: uminus_fn },
        ArgFunction { name: "log", min_args: 1, max_args: 2, input_types: vec![JType::NUM | it, JType::NUM | JType::NULL], out_type: JType::FLOAT, vectorized: true, mutates: false, func: log_fn },
        ArgFunction { name: "log2", min_args: 1, max_args: 1, input_types: vec![JType::NUM | it], out_type: JType::FLOAT, vectorized: true, mutates: false, func: log2_fn },
        ArgFunction { name: "is_expr", min_args: 1, max_args: 1, input_types: vec![any], out_type: JType::BOOL, vectorized: true, mutates: false, func: is_expr_fn },
        ArgFunction { name: "is_num", min_args: 1, max_args: 1, input_types: vec![any], out_type: JType::BOOL, vectorized: true, mutates: false, func: is_num_fn },
        ArgFunction { name: "is_str", min_args: 1, max_args: 1, input_types: vec![any], out_type: JType::BOOL, vectorized: true, mutates: false, func: is_str_fn },
        ArgFunction { name: "isna", min_args: 1, max_args: 1, input_types: vec![any], out_type: JType::BOOL, vectorized: true, mutates: false, func: isna_fn },
        ArgFunction { name: "ifelse", min_args: 3, max_args: 3, input_types: vec![JType::BOOL | it, any, any], out_type: any, vectorized: true, mutates: false, func: ifelse_fn },
        ArgFunction { name: "str", min_args: 1, max_args: 1, input_types: vec![any], out_type: JType::STR, vectorized: true, mutates: false, func: str_fn },
        ArgFunction { name: "s_len", min_args: 1, max_args: 1, input_types: vec![JType::STR | it], out_type: JType::INT, vectorized: true, mutates: false, func: s_len_fn },
        ArgFunction { name: "s_lower", min_args: 1, max_args: 1, input_types: vec![JType::STR | it], out_type: JType::STR, vectorized: true, mutates: false, func: s_lower_fn },
        ArgFunction { name: "s_upper", min_args: 1, max_args: 1, input_types: vec![JType::STR | it], out_type: JType::STR, vectorized: true, mutates: false, func: s_upper_fn },
        ArgFunction { name: "s_strip", min_args: 1, max_args: 1, input_types: vec![JType::STR | it], out_type: JType::STR, vectorized: true, mutates: false, func: s_strip_fn },
        ArgFunction { name: "s_slice", min_args: 2, max_args: 2, input_types: vec![JType::STR | it, JType::INT_OR_SLICE], out_type: JType::STR, vectorized: true, mutates: false, func: s_slice_fn },
        ArgFunction { name: "s_sub", min_args: 3, max_args: 3, input_types: vec![JType::STR | it, JType::STR_OR_REGEX, JType::STR], out_type: JType::STR, vectorized: true, mutates: false, func: s_sub_fn },
        ArgFunction { name: "s_find", min_args: 2, max_args: 2, input_types: vec![JType::STR | it, JType::REGEX], out_type: JType::ARR, vectorized: true, mutates: false, func: s_find_fn },
        ArgFunction { name: "s_count", min_args: 2, max_args: 2, input_types: vec![JType::STR | it, JType::STR_OR_REGEX], out_type: JType::INT, vectorized: true, mutates: false, func: s_count_fn },
        ArgFunction { name: "s_split", min_args: 1, max_args: 2, input_types: vec![JType::STR | it, JType::STR_OR_REGEX | JType::NULL], out_type: JType::ARR, vectorized: true, mutates: false, func: s_split_fn },
        ArgFunction { name: "s_mul", min_args: 2, max_args: 2, input_types: vec![JType::STR | it, JType::INT], out_type: JType::STR, vectorized: true, mutates: false, func: s_mul_fn },
    ];
    table.into_iter().map(|f| (f.name, f)).collect()
});

// ── Shared helpers ───────────────────────────────────────────────────────────

fn type_err(func: &str, want: &str, got: &JNode) -> EvalError {
    EvalError::Type(format!("{} requires {}, got {}", func, want, got.type_tag()))
}

fn expect_array<'a>(func: &str, x: &'a JNode) -> Result<&'a Vec<JNode>, EvalError> {
    x.as_array().ok_or_else(|| type_err(func, "an array", x))
}

fn expect_str<'a>(func: &str, x: &'a JNode) -> Result<&'a str, EvalError> {
    x.as_str().ok_or_else(|| type_err(func, "a string", x))
}

fn expect_num(func: &str, x: &JNode) -> Result<f64, EvalError> {
    x.as_f64().ok_or_else(|| type_err(func, "a number", x))
}

/// Scalar ordering for sort keys: numbers by value, strings lexically.
/// Callers verify homogeneity first, so mixed pairs cannot reach this.
fn cmp_scalar(a: &JNode, b: &JNode) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.as_str().unwrap_or("").cmp(b.as_str().unwrap_or("")),
    }
}

fn check_sortable(func: &str, keys: &[JNode]) -> Result<(), EvalError> {
    let all_num = keys.iter().all(JNode::is_num);
    let all_str = keys.iter().all(JNode::is_str);
    if all_num || all_str {
        Ok(())
    } else {
        Err(EvalError::Type(format!(
            "{} requires keys that are all numbers or all strings",
            func
        )))
    }
}

/// The sub-value `sort_by`/`max_by`/`min_by` order elements by: an index
/// into a sub-array or a key into a sub-object.
fn extract_key(func: &str, elem: &JNode, key: &JNode) -> Result<JNode, EvalError> {
    match key {
        JNode::Int(i) => {
            let arr = expect_array(func, elem)?;
            let len = arr.len() as i64;
            let idx = if *i < 0 { *i + len } else { *i };
            if idx < 0 || idx >= len {
                return Err(EvalError::Type(format!(
                    "{}: key index {} out of range for element of length {}",
                    func, i, len
                )));
            }
            Ok(arr[idx as usize].clone())
        }
        JNode::Str(k) => elem.get(k).cloned().ok_or_else(|| {
            EvalError::Type(format!("{}: element has no key \"{}\"", func, k))
        }),
        other => Err(type_err(func, "a string or int key", other)),
    }
}

// ── Reducing / structural implementations ────────────────────────────────────

fn len_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    match &args[0] {
        JNode::Array(a) => Ok(JNode::Int(a.len() as i64)),
        JNode::Object(m) => Ok(JNode::Int(m.len() as i64)),
        other => Err(type_err("len", "an array or object", other)),
    }
}

fn sum_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    let arr = expect_array("sum", &args[0])?;
    let mut total = 0.0;
    for x in arr {
        total += expect_num("sum", x)?;
    }
    Ok(JNode::Float(total))
}

fn avg_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    let arr = expect_array("avg", &args[0])?;
    let mut total = 0.0;
    for x in arr {
        total += expect_num("avg", x)?;
    }
    Ok(JNode::Float(total / arr.len() as f64))
}

fn fold_extreme(func: &str, args: &[JNode], want_max: bool) -> Result<JNode, EvalError> {
    let arr = expect_array(func, &args[0])?;
    let mut best: Option<(f64, &JNode)> = None;
    for x in arr {
        let v = expect_num(func, x)?;
        let better = match best {
            None => true,
            Some((b, _)) => {
                if want_max {
                    v > b
                } else {
                    v < b
                }
            }
        };
        if better {
            best = Some((v, x));
        }
    }
    match best {
        Some((_, x)) => Ok(x.clone()),
        None => Err(EvalError::Type(format!("{} of an empty array", func))),
    }
}

fn max_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    fold_extreme("max", args, true)
}

fn min_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    fold_extreme("min", args, false)
}

fn sorted_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    let reverse = args[1].as_bool().unwrap_or(false);
    let mut out = args[0].clone();
    let v = out
        .as_array_mut()
        .ok_or_else(|| type_err("sorted", "an array", &args[0]))?;
    check_sortable("sorted", v)?;
    v.sort_by(cmp_scalar);
    if reverse {
        v.reverse();
    }
    Ok(out)
}

fn sort_by_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    let key = &args[1];
    let reverse = args[2].as_bool().unwrap_or(false);
    let mut out = args[0].clone();
    let v = out
        .as_array_mut()
        .ok_or_else(|| type_err("sort_by", "an array", &args[0]))?;
    let keys = v
        .iter()
        .map(|e| extract_key("sort_by", e, key))
        .collect::<Result<Vec<_>, _>>()?;
    check_sortable("sort_by", &keys)?;
    let mut paired: Vec<(JNode, JNode)> = keys.into_iter().zip(std::mem::take(v)).collect();
    paired.sort_by(|a, b| cmp_scalar(&a.0, &b.0));
    if reverse {
        paired.reverse();
    }
    *v = paired.into_iter().map(|(_, e)| e).collect();
    Ok(out)
}

fn extreme_by(func: &str, args: &[JNode], want_max: bool) -> Result<JNode, EvalError> {
    let arr = expect_array(func, &args[0])?;
    let key = &args[1];
    let mut best: Option<(JNode, &JNode)> = None;
    for elem in arr {
        let k = extract_key(func, elem, key)?;
        let better = match &best {
            None => true,
            Some((b, _)) => {
                let ord = cmp_scalar(&k, b);
                if want_max {
                    ord == Ordering::Greater
                } else {
                    ord == Ordering::Less
                }
            }
        };
        if better {
            best = Some((k, elem));
        }
    }
    match best {
        Some((_, elem)) => Ok(elem.clone()),
        None => Err(EvalError::Type(format!("{} of an empty array", func))),
    }
}

fn max_by_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    extreme_by("max_by", args, true)
}

fn min_by_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    extreme_by("min_by", args, false)
}

fn keys_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    let map = args[0]
        .as_object()
        .ok_or_else(|| type_err("keys", "an object", &args[0]))?;
    Ok(JNode::array(
        map.keys().map(|k| JNode::string(k.as_str())).collect(),
    ))
}

fn values_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    let map = args[0]
        .as_object()
        .ok_or_else(|| type_err("values", "an object", &args[0]))?;
    Ok(JNode::array(map.values().cloned().collect()))
}

fn items_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    let map = args[0]
        .as_object()
        .ok_or_else(|| type_err("items", "an object", &args[0]))?;
    Ok(JNode::array(
        map.iter()
            .map(|(k, v)| JNode::array(vec![JNode::string(k.as_str()), v.clone()]))
            .collect(),
    ))
}

fn unique_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    let arr = expect_array("unique", &args[0])?;
    let sort = args[1].as_bool().unwrap_or(false);
    let mut out: Vec<JNode> = Vec::new();
    for x in arr {
        if !out.contains(x) {
            out.push(x.clone());
        }
    }
    if sort {
        check_sortable("unique", &out)?;
        out.sort_by(cmp_scalar);
    }
    Ok(JNode::array(out))
}

fn flatten_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    let arr = expect_array("flatten", &args[0])?;
    let depth = args[1].as_int().unwrap_or(1);
    let mut cur = arr.clone();
    for _ in 0..depth {
        if !cur.iter().any(JNode::is_array) {
            break;
        }
        let mut next = Vec::with_capacity(cur.len());
        for x in cur {
            match x {
                JNode::Array(inner) => next.extend(inner.iter().cloned()),
                other => next.push(other),
            }
        }
        cur = next;
    }
    Ok(JNode::array(cur))
}

fn range_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    let first = args[0]
        .as_int()
        .ok_or_else(|| type_err("range", "an int", &args[0]))?;
    let (start, stop, step) = match (args[1].as_int(), args[2].as_int()) {
        (None, _) => (0, first, 1),
        (Some(stop), None) => (first, stop, 1),
        (Some(stop), Some(step)) => (first, stop, step),
    };
    if step == 0 {
        return Err(EvalError::Type("range step cannot be 0".to_string()));
    }
    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        out.push(JNode::Int(i));
        i += step;
    }
    Ok(JNode::array(out))
}

fn index_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    let arr = expect_array("index", &args[0])?;
    let elt = &args[1];
    let reverse = args[2].as_bool().unwrap_or(false);
    let found = if reverse {
        arr.iter().rposition(|x| x == elt)
    } else {
        arr.iter().position(|x| x == elt)
    };
    Ok(JNode::Int(found.map(|i| i as i64).unwrap_or(-1)))
}

fn in_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    match &args[1] {
        JNode::Array(arr) => Ok(JNode::Bool(arr.contains(&args[0]))),
        JNode::Object(map) => {
            let key = expect_str("in (object membership)", &args[0])?;
            Ok(JNode::Bool(map.contains_key(key)))
        }
        other => Err(type_err("in", "an array or object", other)),
    }
}

fn concat_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    if args.iter().all(JNode::is_array) {
        let mut out = Vec::new();
        for a in args {
            out.extend(a.as_array().into_iter().flatten().cloned());
        }
        return Ok(JNode::array(out));
    }
    if args.iter().all(JNode::is_object) {
        let mut out = IndexMap::new();
        for a in args {
            for (k, v) in a.as_object().into_iter().flatten() {
                out.insert(k.clone(), v.clone());
            }
        }
        return Ok(JNode::object(out));
    }
    Err(EvalError::Type(
        "concat requires all arrays or all objects".to_string(),
    ))
}

fn append_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    let mut out = expect_array("append", &args[0])?.clone();
    out.extend(args[1..].iter().cloned());
    Ok(JNode::array(out))
}

fn dict_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    let arr = expect_array("dict", &args[0])?;
    let mut out = IndexMap::with_capacity(arr.len());
    for pair in arr {
        let kv = expect_array("dict", pair)?;
        if kv.len() != 2 {
            return Err(EvalError::Type(
                "dict requires an array of [key, value] pairs".to_string(),
            ));
        }
        let key = expect_str("dict (pair key)", &kv[0])?;
        out.insert(key.to_string(), kv[1].clone());
    }
    Ok(JNode::object(out))
}

fn zip_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    let arrs = args
        .iter()
        .map(|a| expect_array("zip", a))
        .collect::<Result<Vec<_>, _>>()?;
    let len = arrs[0].len();
    if arrs.iter().any(|a| a.len() != len) {
        return Err(EvalError::Type(
            "zip requires arrays of equal length".to_string(),
        ));
    }
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        out.push(JNode::array(arrs.iter().map(|a| a[i].clone()).collect()));
    }
    Ok(JNode::array(out))
}

// ── Vectorized scalar implementations ────────────────────────────────────────

fn abs_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    match &args[0] {
        JNode::Int(n) => Ok(JNode::Int(n.abs())),
        JNode::Float(n) => Ok(JNode::Float(n.abs())),
        other => Err(type_err("abs", "a number", other)),
    }
}

fn float_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    match &args[0] {
        JNode::Bool(b) => Ok(JNode::Float(*b as i64 as f64)),
        JNode::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(JNode::Float)
            .map_err(|_| EvalError::Type(format!("float cannot parse \"{}\"", s))),
        other => Ok(JNode::Float(expect_num("float", other)?)),
    }
}

fn int_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    match &args[0] {
        JNode::Int(n) => Ok(JNode::Int(*n)),
        JNode::Float(n) => Ok(JNode::Int(n.trunc() as i64)),
        JNode::Bool(b) => Ok(JNode::Int(*b as i64)),
        JNode::Str(s) => {
            let t = s.trim();
            if let Ok(n) = t.parse::<i64>() {
                Ok(JNode::Int(n))
            } else if let Ok(f) = t.parse::<f64>() {
                Ok(JNode::Int(f.trunc() as i64))
            } else {
                Err(EvalError::Type(format!("int cannot parse \"{}\"", s)))
            }
        }
        other => Err(type_err("int", "a number, bool, or string", other)),
    }
}

fn round_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    let ndigits = args[1].as_int().unwrap_or(0);
    match &args[0] {
        JNode::Int(n) => Ok(JNode::Int(*n)),
        JNode::Float(f) => {
            if ndigits == 0 {
                Ok(JNode::Int(f.round() as i64))
            } else {
                let mult = 10f64.powi(ndigits as i32);
                Ok(JNode::Float((f * mult).round() / mult))
            }
        }
        other => Err(type_err("round", "a number", other)),
    }
}

fn not_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    match &args[0] {
        JNode::Bool(b) => Ok(JNode::Bool(!b)),
        other => Err(type_err("not", "a bool", other)),
    }
}

fn uminus_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    match &args[0] {
        JNode::Int(n) => Ok(JNode::Int(-n)),
        JNode::Float(n) => Ok(JNode::Float(-n)),
        other => Err(type_err("unary '-'", "a number", other)),
    }
}

fn log_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    let x = expect_num("log", &args[0])?;
    match args[1].as_f64() {
        None => Ok(JNode::Float(x.ln())),
        Some(base) => Ok(JNode::Float(x.ln() / base.ln())),
    }
}

fn log2_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    Ok(JNode::Float(expect_num("log2", &args[0])?.log2()))
}

fn is_expr_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    Ok(JNode::Bool(args[0].is_iterable()))
}

fn is_num_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    Ok(JNode::Bool(args[0].is_num()))
}

fn is_str_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    Ok(JNode::Bool(args[0].is_str()))
}

fn isna_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    Ok(JNode::Bool(matches!(&args[0], JNode::Float(f) if f.is_nan())))
}

fn ifelse_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    match &args[0] {
        JNode::Bool(true) => Ok(args[1].clone()),
        JNode::Bool(false) => Ok(args[2].clone()),
        other => Err(type_err("ifelse", "a bool condition", other)),
    }
}

fn str_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    match &args[0] {
        JNode::Str(s) => Ok(JNode::Str(s.clone())),
        scalar => Ok(JNode::string(scalar.to_string())),
    }
}

fn s_len_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    let s = expect_str("s_len", &args[0])?;
    Ok(JNode::Int(s.chars().count() as i64))
}

fn s_lower_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    Ok(JNode::string(expect_str("s_lower", &args[0])?.to_lowercase()))
}

fn s_upper_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    Ok(JNode::string(expect_str("s_upper", &args[0])?.to_uppercase()))
}

fn s_strip_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    Ok(JNode::string(expect_str("s_strip", &args[0])?.trim()))
}

fn s_slice_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    let s = expect_str("s_slice", &args[0])?;
    let chars: Vec<char> = s.chars().collect();
    match &args[1] {
        JNode::Int(i) => {
            let len = chars.len() as i64;
            let idx = if *i < 0 { *i + len } else { *i };
            if idx < 0 || idx >= len {
                return Err(EvalError::Type(format!(
                    "s_slice index {} out of range for string of length {}",
                    i, len
                )));
            }
            Ok(JNode::string(chars[idx as usize].to_string()))
        }
        JNode::Slicer(sl) => {
            let out: String = slice_indices(chars.len(), sl).map(|i| chars[i]).collect();
            Ok(JNode::string(out))
        }
        other => Err(type_err("s_slice", "an int or slice", other)),
    }
}

fn s_sub_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    let s = expect_str("s_sub", &args[0])?;
    let repl = expect_str("s_sub (replacement)", &args[2])?;
    match &args[1] {
        JNode::Regex(re) => Ok(JNode::string(re.replace_all(s, repl).into_owned())),
        JNode::Str(pat) => Ok(JNode::string(s.replace(pat.as_ref(), repl))),
        other => Err(type_err("s_sub", "a string or regex pattern", other)),
    }
}

fn s_find_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    let s = expect_str("s_find", &args[0])?;
    let re = args[1]
        .as_regex()
        .ok_or_else(|| type_err("s_find", "a regex", &args[1]))?;
    Ok(JNode::array(
        re.find_iter(s).map(|m| JNode::string(m.as_str())).collect(),
    ))
}

fn s_count_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    let s = expect_str("s_count", &args[0])?;
    let count = match &args[1] {
        JNode::Regex(re) => re.find_iter(s).count(),
        JNode::Str(pat) => s.matches(pat.as_ref()).count(),
        other => return Err(type_err("s_count", "a string or regex pattern", other)),
    };
    Ok(JNode::Int(count as i64))
}

fn s_split_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    let s = expect_str("s_split", &args[0])?;
    let pieces: Vec<JNode> = match &args[1] {
        JNode::Null => s.split_whitespace().map(JNode::string).collect(),
        JNode::Str(sep) => s.split(sep.as_ref()).map(JNode::string).collect(),
        JNode::Regex(re) => re.split(s).map(JNode::string).collect(),
        other => return Err(type_err("s_split", "a string, regex, or null", other)),
    };
    Ok(JNode::array(pieces))
}

fn s_mul_fn(args: &[JNode]) -> Result<JNode, EvalError> {
    let s = expect_str("s_mul", &args[0])?;
    let n = args[1]
        .as_int()
        .ok_or_else(|| type_err("s_mul", "an int", &args[1]))?;
    Ok(JNode::string(s.repeat(n.max(0) as usize)))
}

// ── Tests ────────────────────────────────────────────────────────────────────
