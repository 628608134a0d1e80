// Evaluator: resolves late-bound references, vectorizes binops over
// iterables, and dispatches vectorized functions.

use std::rc::Rc;

use indexmap::IndexMap;
use thiserror::Error;

use crate::binop::Binop;
use crate::functions::ArgFunction;
use crate::value::{JNode, JType};

/// Runtime errors raised while applying a compiled query (or while the
/// compiler folds a constant subtree).
#[derive(Error, Debug)]
pub enum EvalError {
    /// Shape mismatch between two iterables in a binop or boolean index,
    /// or a non-bool element in a bool mask.
    #[error("vectorized arithmetic error: {0}")]
    VectorizedArithmetic(String),

    /// A late-bound value resolved to something its consumer cannot take.
    #[error("type error: {0}")]
    Type(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),
}

/// Evaluate a compiled value against an input. Late-bound references call
/// their closure; everything else is already the answer.
pub fn resolve(node: &JNode, input: &JNode) -> Result<JNode, EvalError> {
    match node {
        JNode::CurJson { func, .. } => func(input),
        other => Ok(other.clone()),
    }
}

// ── Binop resolution ─────────────────────────────────────────────────────────

/// Combine two compiled operands under a binop.
///
/// If neither operand is late-bound the result is computed immediately
/// (constant folding). Otherwise the result is a new late-bound reference
/// whose tag comes from the static output-type table and whose closure
/// resolves both sides before vectorizing.
pub fn resolve_binop(op: &'static Binop, left: JNode, right: JNode) -> Result<JNode, EvalError> {
    let out = op.out_type(left.type_tag(), right.type_tag())?;
    if !left.is_cur_json() && !right.is_cur_json() {
        return vec_binop(op, &left, &right);
    }
    Ok(JNode::cur_json(
        out,
        Rc::new(move |input: &JNode| {
            let lv = resolve(&left, input)?;
            let rv = resolve(&right, input)?;
            vec_binop(op, &lv, &rv)
        }),
    ))
}

/// Apply a binop to resolved operands, vectorizing over iterables.
///
/// Two arrays must have equal length; two objects must have equal key sets;
/// a scalar broadcasts across the other side's elements. Arithmetic binops
/// recurse into nested containers (`[[1],[2]] + 1` adds all the way down);
/// boolean-classified binops compare container elements as whole values,
/// so a filter mask stays flat no matter how nested the data is.
pub fn vec_binop(op: &'static Binop, l: &JNode, r: &JNode) -> Result<JNode, EvalError> {
    // element-level application, per the classification above
    let elem = |a: &JNode, b: &JNode| -> Result<JNode, EvalError> {
        if op.is_boolean() && (a.is_iterable() || b.is_iterable()) {
            (op.func)(a, b)
        } else {
            vec_binop(op, a, b)
        }
    };
    match (l, r) {
        (JNode::Array(la), JNode::Array(ra)) => {
            if la.len() != ra.len() {
                return Err(EvalError::VectorizedArithmetic(format!(
                    "binop '{}' on arrays of unequal length ({} and {})",
                    op.sym,
                    la.len(),
                    ra.len()
                )));
            }
            let mut out = Vec::with_capacity(la.len());
            for (a, b) in la.iter().zip(ra.iter()) {
                out.push(elem(a, b)?);
            }
            Ok(JNode::array(out))
        }
        (JNode::Object(lo), JNode::Object(ro)) => {
            if lo.len() != ro.len() || !lo.keys().all(|k| ro.contains_key(k)) {
                return Err(EvalError::VectorizedArithmetic(format!(
                    "binop '{}' on objects with different key sets",
                    op.sym
                )));
            }
            let mut out = IndexMap::with_capacity(lo.len());
            for (k, a) in lo.iter() {
                out.insert(k.clone(), elem(a, &ro[k])?);
            }
            Ok(JNode::object(out))
        }
        (JNode::Array(_), JNode::Object(_)) | (JNode::Object(_), JNode::Array(_)) => {
            Err(EvalError::VectorizedArithmetic(format!(
                "binop '{}' cannot combine an array with an object",
                op.sym
            )))
        }
        (JNode::Array(la), _) => {
            let mut out = Vec::with_capacity(la.len());
            for a in la.iter() {
                out.push(elem(a, r)?);
            }
            Ok(JNode::array(out))
        }
        (_, JNode::Array(ra)) => {
            let mut out = Vec::with_capacity(ra.len());
            for b in ra.iter() {
                out.push(elem(l, b)?);
            }
            Ok(JNode::array(out))
        }
        (JNode::Object(lo), _) => {
            let mut out = IndexMap::with_capacity(lo.len());
            for (k, a) in lo.iter() {
                out.insert(k.clone(), elem(a, r)?);
            }
            Ok(JNode::object(out))
        }
        (_, JNode::Object(ro)) => {
            let mut out = IndexMap::with_capacity(ro.len());
            for (k, b) in ro.iter() {
                out.insert(k.clone(), elem(l, b)?);
            }
            Ok(JNode::object(out))
        }
        _ => (op.func)(l, r),
    }
}

// ── Function application ─────────────────────────────────────────────────────

/// Apply a registry function to compiled arguments.
///
/// With no late-bound argument the call happens immediately. Otherwise the
/// result is a late-bound reference that resolves every argument, then
/// dispatches. The output tag of a vectorized call mirrors the first
/// argument's container shape when that is statically known.
pub fn apply_arg_function(f: &'static ArgFunction, args: Vec<JNode>) -> Result<JNode, EvalError> {
    if !args.iter().any(JNode::is_cur_json) {
        return call_function(f, &args);
    }
    let out = static_out_type(f, &args);
    Ok(JNode::cur_json(
        out,
        Rc::new(move |input: &JNode| {
            let mut resolved = Vec::with_capacity(args.len());
            for a in &args {
                resolved.push(resolve(a, input)?);
            }
            call_function(f, &resolved)
        }),
    ))
}

fn static_out_type(f: &'static ArgFunction, args: &[JNode]) -> JType {
    if !f.vectorized {
        return f.out_type;
    }
    let first = args[0].type_tag();
    if JType::ARR.contains(first) {
        JType::ARR
    } else if JType::OBJ.contains(first) {
        JType::OBJ
    } else if first.intersects(JType::ITERABLE) {
        f.out_type | first.intersection(JType::ITERABLE)
    } else {
        f.out_type
    }
}

/// Call with fully resolved arguments, mapping element-wise when the
/// function is vectorized and its first argument is an iterable.
pub fn call_function(f: &'static ArgFunction, args: &[JNode]) -> Result<JNode, EvalError> {
    if !f.vectorized {
        return (f.func)(args);
    }
    match &args[0] {
        JNode::Array(arr) => {
            let mut out = Vec::with_capacity(arr.len());
            for elem in arr.iter() {
                out.push(call_elementwise(f, elem, args)?);
            }
            Ok(JNode::array(out))
        }
        JNode::Object(map) => {
            let mut out = IndexMap::with_capacity(map.len());
            for (k, elem) in map.iter() {
                out.insert(k.clone(), call_elementwise(f, elem, args)?);
            }
            Ok(JNode::object(out))
        }
        _ => (f.func)(args),
    }
}

fn call_elementwise(
    f: &'static ArgFunction,
    elem: &JNode,
    args: &[JNode],
) -> Result<JNode, EvalError> {
    let mut argv = Vec::with_capacity(args.len());
    argv.push(elem.clone());
    argv.extend(args[1..].iter().cloned());
    (f.func)(&argv)
}

// ── Tests ────────────────────────────────────────────────────────────────────
