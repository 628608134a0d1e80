// Indexer engine: compiled indexer descriptors, lazy (key, value) pair
// iterators over selections, and the chain-application loop.

use std::rc::Rc;

use indexmap::IndexMap;
use regex::Regex;

use crate::eval::{self, EvalError};
use crate::value::{JNode, Slicer};

// ── Compiled indexer descriptors ─────────────────────────────────────────────

/// One child of a varname list: a literal key or a key pattern.
#[derive(Clone, Debug)]
pub enum VarnameChild {
    Name(Rc<str>),
    Pattern(Rc<Regex>),
}

impl VarnameChild {
    fn matches(&self, key: &str) -> bool {
        match self {
            VarnameChild::Name(n) => n.as_ref() == key,
            VarnameChild::Pattern(re) => re.is_match(key),
        }
    }
}

/// One child of a slicer list: a single index or a slice.
#[derive(Clone, Debug)]
pub enum SlicerChild {
    Int(i64),
    Slice(Slicer),
}

/// A compiled projection: a fixed ordered sequence of sub-expressions,
/// possibly late-bound against the value being projected.
#[derive(Clone, Debug)]
pub enum Projection {
    Array(Vec<JNode>),
    Object(Vec<(Rc<str>, JNode)>),
}

#[derive(Clone, Debug)]
pub enum IndexerKind {
    /// `.key`, `."key"`, `.g\`re\``, `[key1, g\`re\`, ...]` over objects.
    Varnames(Vec<VarnameChild>),
    /// `..key` and friends: descend, yielding matches at every level.
    RecursiveVarnames(Vec<VarnameChild>),
    /// `[0]`, `[1:5:2, -1]` over arrays.
    Slicers(Vec<SlicerChild>),
    /// `.*` / `[*]`: every pair of the container.
    Star,
    /// `[expr]` where the expression produces a bool or bool container.
    BooleanIndex(JNode),
    /// `{...}`: reshape into a new array or object.
    Proj(Projection),
}

/// An indexer plus the flags the chain loop dispatches on.
#[derive(Clone, Debug)]
pub struct Indexer {
    pub kind: IndexerKind,
    /// Statically known to select exactly one element, so the chain unwraps
    /// the container: a lone literal key or a lone int index.
    pub singleton: bool,
}

impl Indexer {
    pub fn varnames(children: Vec<VarnameChild>) -> Self {
        let singleton = matches!(children.as_slice(), [VarnameChild::Name(_)]);
        Indexer {
            kind: IndexerKind::Varnames(children),
            singleton,
        }
    }

    pub fn recursive_varnames(children: Vec<VarnameChild>) -> Self {
        Indexer {
            kind: IndexerKind::RecursiveVarnames(children),
            singleton: false,
        }
    }

    pub fn slicers(children: Vec<SlicerChild>) -> Self {
        let singleton = matches!(children.as_slice(), [SlicerChild::Int(_)]);
        Indexer {
            kind: IndexerKind::Slicers(children),
            singleton,
        }
    }

    pub fn star() -> Self {
        Indexer {
            kind: IndexerKind::Star,
            singleton: false,
        }
    }

    pub fn boolean(mask: JNode) -> Self {
        Indexer {
            kind: IndexerKind::BooleanIndex(mask),
            singleton: false,
        }
    }

    pub fn projection(proj: Projection) -> Self {
        Indexer {
            kind: IndexerKind::Proj(proj),
            singleton: false,
        }
    }

    /// Whether applying this indexer to `obj` yields an object (vs an array).
    fn emits_object(&self, obj: &JNode) -> bool {
        match self.kind {
            IndexerKind::Varnames(_) => true,
            IndexerKind::Star | IndexerKind::BooleanIndex(_) => obj.is_object(),
            _ => false,
        }
    }
}

// ── Pair iteration ───────────────────────────────────────────────────────────

/// The key half of a selection pair.
#[derive(Clone, Debug)]
pub enum PairKey {
    Index(usize),
    Name(Rc<str>),
}

impl PairKey {
    fn into_string(self) -> String {
        match self {
            PairKey::Index(i) => i.to_string(),
            PairKey::Name(n) => n.to_string(),
        }
    }
}

type PairIter<'a> = Box<dyn Iterator<Item = (PairKey, JNode)> + 'a>;

/// Indices selected by a slice over a sequence of the given length.
pub(crate) fn slice_indices(len: usize, s: &Slicer) -> impl Iterator<Item = usize> {
    let n = len as i64;
    let step = s.step.unwrap_or(1);
    let norm = |x: i64| if x < 0 { x + n } else { x };
    let (start, stop) = if step > 0 {
        (
            s.start.map(norm).unwrap_or(0).clamp(0, n),
            s.stop.map(norm).unwrap_or(n).clamp(0, n),
        )
    } else {
        (
            s.start.map(norm).unwrap_or(n - 1).clamp(-1, n - 1),
            s.stop.map(norm).unwrap_or(-1).clamp(-1, n - 1),
        )
    };
    std::iter::successors(Some(start), move |&i| Some(i + step))
        .take_while(move |&i| if step > 0 { i < stop } else { i > stop })
        .map(|i| i as usize)
}

fn star_pairs(obj: &JNode) -> Result<PairIter<'_>, EvalError> {
    match obj {
        JNode::Object(map) => Ok(Box::new(map.iter().map(|(k, v)| {
            (PairKey::Name(Rc::from(k.as_str())), v.clone())
        }))),
        JNode::Array(arr) => Ok(Box::new(
            arr.iter()
                .enumerate()
                .map(|(i, v)| (PairKey::Index(i), v.clone())),
        )),
        other => Err(EvalError::Type(format!(
            "cannot iterate the pairs of a {}",
            other.type_tag()
        ))),
    }
}

/// The lazy sequence of (key, child) pairs this indexer selects from `obj`.
fn pairs<'a>(idxr: &'a Indexer, obj: &'a JNode) -> Result<PairIter<'a>, EvalError> {
    match &idxr.kind {
        IndexerKind::Varnames(children) => {
            let map = obj.as_object().ok_or_else(|| {
                EvalError::Type(format!(
                    "cannot select keys from a {}",
                    obj.type_tag()
                ))
            })?;
            Ok(Box::new(children.iter().flat_map(move |c| -> PairIter<'a> {
                match c {
                    // non-existent literal keys are silently skipped
                    VarnameChild::Name(n) => match map.get(n.as_ref()) {
                        Some(v) => {
                            Box::new(std::iter::once((PairKey::Name(n.clone()), v.clone())))
                        }
                        None => Box::new(std::iter::empty()),
                    },
                    VarnameChild::Pattern(re) => {
                        Box::new(map.iter().filter(|(k, _)| re.is_match(k)).map(|(k, v)| {
                            (PairKey::Name(Rc::from(k.as_str())), v.clone())
                        }))
                    }
                }
            })))
        }
        IndexerKind::Slicers(children) => {
            let arr = obj.as_array().ok_or_else(|| {
                EvalError::Type(format!(
                    "cannot slice a {}",
                    obj.type_tag()
                ))
            })?;
            Ok(Box::new(children.iter().flat_map(move |c| -> PairIter<'a> {
                match c {
                    SlicerChild::Int(i) => {
                        let len = arr.len() as i64;
                        let idx = if *i < 0 { *i + len } else { *i };
                        if (0..len).contains(&idx) {
                            let idx = idx as usize;
                            Box::new(std::iter::once((PairKey::Index(idx), arr[idx].clone())))
                        } else {
                            Box::new(std::iter::empty())
                        }
                    }
                    SlicerChild::Slice(s) => Box::new(
                        slice_indices(arr.len(), s).map(move |i| (PairKey::Index(i), arr[i].clone())),
                    ),
                }
            })))
        }
        IndexerKind::Star => star_pairs(obj),
        IndexerKind::BooleanIndex(mask_src) => bool_index_pairs(mask_src, obj),
        IndexerKind::RecursiveVarnames(children) => {
            let mut out = Vec::new();
            recursive_collect(children, obj, &mut out);
            Ok(Box::new(
                out.into_iter()
                    .enumerate()
                    .map(|(i, v)| (PairKey::Index(i), v)),
            ))
        }
        IndexerKind::Proj(_) => Err(EvalError::Type(
            "projections are applied by the chain loop, not iterated".to_string(),
        )),
    }
}

/// Recursive descent: at each object, yield values whose key matches one of
/// the configured children and recurse into the rest; arrays are traversed
/// without being matched. Keys are visited once in document order, so a
/// rooted subtree can never be yielded twice.
fn recursive_collect(children: &[VarnameChild], node: &JNode, out: &mut Vec<JNode>) {
    match node {
        JNode::Object(map) => {
            for (k, v) in map.iter() {
                if children.iter().any(|c| c.matches(k)) {
                    out.push(v.clone());
                } else {
                    recursive_collect(children, v, out);
                }
            }
        }
        JNode::Array(arr) => {
            for v in arr.iter() {
                recursive_collect(children, v, out);
            }
        }
        _ => {}
    }
}

/// Boolean indexing per the mask the filter expression produced.
fn bool_index_pairs<'a>(mask_src: &JNode, obj: &'a JNode) -> Result<PairIter<'a>, EvalError> {
    let mask = eval::resolve(mask_src, obj)?;
    match &mask {
        JNode::Bool(true) => star_pairs(obj),
        JNode::Bool(false) => Ok(Box::new(std::iter::empty())),
        JNode::Array(mask_arr) => {
            let arr = obj.as_array().ok_or_else(|| {
                EvalError::VectorizedArithmetic(format!(
                    "array-valued filter applied to a {}",
                    obj.type_tag()
                ))
            })?;
            if mask_arr.len() != arr.len() {
                return Err(EvalError::VectorizedArithmetic(format!(
                    "filter mask has length {} but the array has length {}",
                    mask_arr.len(),
                    arr.len()
                )));
            }
            let mut selected = Vec::new();
            for (i, (keep, v)) in mask_arr.iter().zip(arr.iter()).enumerate() {
                match keep {
                    JNode::Bool(true) => selected.push((PairKey::Index(i), v.clone())),
                    JNode::Bool(false) => {}
                    other => {
                        return Err(EvalError::VectorizedArithmetic(format!(
                            "filter mask element is a {}, not a bool",
                            other.type_tag()
                        )))
                    }
                }
            }
            Ok(Box::new(selected.into_iter()))
        }
        JNode::Object(mask_map) => {
            let map = obj.as_object().ok_or_else(|| {
                EvalError::VectorizedArithmetic(format!(
                    "object-valued filter applied to a {}",
                    obj.type_tag()
                ))
            })?;
            if mask_map.len() != map.len() || !map.keys().all(|k| mask_map.contains_key(k)) {
                return Err(EvalError::VectorizedArithmetic(
                    "filter mask and object have different key sets".to_string(),
                ));
            }
            let mut selected = Vec::new();
            for (k, v) in map.iter() {
                match &mask_map[k] {
                    JNode::Bool(true) => {
                        selected.push((PairKey::Name(Rc::from(k.as_str())), v.clone()))
                    }
                    JNode::Bool(false) => {}
                    other => {
                        return Err(EvalError::VectorizedArithmetic(format!(
                            "filter mask value for \"{}\" is a {}, not a bool",
                            k,
                            other.type_tag()
                        )))
                    }
                }
            }
            Ok(Box::new(selected.into_iter()))
        }
        other => Err(EvalError::VectorizedArithmetic(format!(
            "filter expression produced a {}, not a bool or bool container",
            other.type_tag()
        ))),
    }
}

// ── Chain application ────────────────────────────────────────────────────────

fn empty_container(emits_object: bool) -> JNode {
    if emits_object {
        JNode::object(IndexMap::new())
    } else {
        JNode::array(Vec::new())
    }
}

fn is_empty_container(v: &JNode) -> bool {
    match v {
        JNode::Array(a) => a.is_empty(),
        JNode::Object(m) => m.is_empty(),
        _ => false,
    }
}

/// Apply the projection's children to the containing value.
fn apply_projection(proj: &Projection, obj: &JNode) -> Result<JNode, EvalError> {
    match proj {
        Projection::Array(children) => {
            let mut out = Vec::with_capacity(children.len());
            for c in children {
                out.push(eval::resolve(c, obj)?);
            }
            Ok(JNode::array(out))
        }
        Projection::Object(pairs) => {
            let mut out = IndexMap::with_capacity(pairs.len());
            for (k, c) in pairs {
                out.insert(k.to_string(), eval::resolve(c, obj)?);
            }
            Ok(JNode::object(out))
        }
    }
}

/// Apply an indexer chain left-to-right.
///
/// A singleton indexer unwraps its container; zero yields produce an empty
/// container of the indexer's shape; empty sub-results are elided from the
/// enclosing container so filtered-out paths leave no holes; projections
/// materialize immediately and the rest of the chain continues from the
/// projected value.
pub fn apply_indexer_chain(obj: &JNode, idxrs: &[Indexer]) -> Result<JNode, EvalError> {
    let Some((idxr, rest)) = idxrs.split_first() else {
        return Ok(obj.clone());
    };

    if let IndexerKind::Proj(proj) = &idxr.kind {
        let projected = apply_projection(proj, obj)?;
        return apply_indexer_chain(&projected, rest);
    }

    let emits_object = idxr.emits_object(obj);
    let mut it = pairs(idxr, obj)?;

    if idxr.singleton {
        return match it.next() {
            Some((_, v)) => apply_indexer_chain(&v, rest),
            None => Ok(empty_container(emits_object)),
        };
    }

    if rest.is_empty() {
        if emits_object {
            let mut map = IndexMap::new();
            for (k, v) in it {
                map.insert(k.into_string(), v);
            }
            Ok(JNode::object(map))
        } else {
            Ok(JNode::array(it.map(|(_, v)| v).collect()))
        }
    } else if emits_object {
        let mut map = IndexMap::new();
        for (k, v) in it {
            let sub = apply_indexer_chain(&v, rest)?;
            if !is_empty_container(&sub) {
                map.insert(k.into_string(), sub);
            }
        }
        Ok(JNode::object(map))
    } else {
        let mut out = Vec::new();
        for (_, v) in it {
            let sub = apply_indexer_chain(&v, rest)?;
            if !is_empty_container(&sub) {
                out.push(sub);
            }
        }
        Ok(JNode::array(out))
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jnode;
    use crate::value::JType;

    fn slicer(start: Option<i64>, stop: Option<i64>, step: Option<i64>) -> Slicer {
        Slicer::new(start, stop, step).unwrap()
    }

    #[test]
    fn test_slice_indices_vectors() {
        let idx = |s: Slicer, len: usize| slice_indices(len, &s).collect::<Vec<_>>();

        assert_eq!(idx(slicer(None, Some(3), Some(2)), 3), vec![0, 2]);
        assert_eq!(idx(slicer(None, None, None), 3), vec![0, 1, 2]);
        assert_eq!(idx(slicer(Some(1), None, None), 3), vec![1, 2]);
        // negative indices count from the end
        assert_eq!(idx(slicer(Some(-2), None, None), 4), vec![2, 3]);
        assert_eq!(idx(slicer(None, Some(-1), None), 4), vec![0, 1, 2]);
        // out-of-range bounds clip
        assert_eq!(idx(slicer(Some(-10), Some(100), None), 3), vec![0, 1, 2]);
        // empty iff stop <= start with positive step
        assert_eq!(idx(slicer(Some(2), Some(2), None), 5), Vec::<usize>::new());
        assert_eq!(idx(slicer(Some(3), Some(1), None), 5), Vec::<usize>::new());
        // negative step walks backwards
        assert_eq!(idx(slicer(None, None, Some(-1)), 3), vec![2, 1, 0]);
        assert_eq!(idx(slicer(Some(3), Some(0), Some(-2)), 5), vec![3, 1]);
        assert_eq!(idx(slicer(None, None, Some(-1)), 0), Vec::<usize>::new());
    }

    #[test]
    fn test_varname_chain() {
        let doc = jnode!({"a": {"b": 7}, "c": 1});
        let chain = vec![
            Indexer::varnames(vec![VarnameChild::Name("a".into())]),
            Indexer::varnames(vec![VarnameChild::Name("b".into())]),
        ];
        // singleton keys unwrap all the way to the scalar
        assert_eq!(apply_indexer_chain(&doc, &chain).unwrap(), jnode!(7));
    }

    #[test]
    fn test_missing_key_yields_empty_container() {
        let doc = jnode!({"a": 1});
        let chain = vec![Indexer::varnames(vec![VarnameChild::Name("nope".into())])];
        assert_eq!(apply_indexer_chain(&doc, &chain).unwrap(), jnode!({}));
    }

    #[test]
    fn test_regex_varname_emits_object() {
        let doc = jnode!({"ab": 1, "cd": 2, "ae": 3});
        let re = Rc::new(Regex::new("^a").unwrap());
        let chain = vec![Indexer::varnames(vec![VarnameChild::Pattern(re)])];
        assert_eq!(
            apply_indexer_chain(&doc, &chain).unwrap(),
            jnode!({"ab": 1, "ae": 3})
        );
    }

    #[test]
    fn test_star_and_slicer() {
        let doc = jnode!([10, 20, 30, 40]);
        let star = vec![Indexer::star()];
        assert_eq!(apply_indexer_chain(&doc, &star).unwrap(), doc);

        let chain = vec![Indexer::slicers(vec![
            SlicerChild::Slice(slicer(None, Some(2), None)),
            SlicerChild::Int(-1),
        ])];
        assert_eq!(
            apply_indexer_chain(&doc, &chain).unwrap(),
            jnode!([10, 20, 40])
        );

        // lone out-of-range index: empty array, not an error
        let chain = vec![Indexer::slicers(vec![SlicerChild::Int(9)])];
        assert_eq!(apply_indexer_chain(&doc, &chain).unwrap(), jnode!([]));
    }

    #[test]
    fn test_slicer_on_object_is_type_error() {
        let doc = jnode!({"a": 1});
        let chain = vec![Indexer::slicers(vec![SlicerChild::Int(0)])];
        assert!(matches!(
            apply_indexer_chain(&doc, &chain).unwrap_err(),
            EvalError::Type(_)
        ));
    }

    #[test]
    fn test_boolean_index_masks() {
        // constant scalar mask
        let doc = jnode!([1, 2, 3]);
        let all = vec![Indexer::boolean(jnode!(true))];
        assert_eq!(apply_indexer_chain(&doc, &all).unwrap(), doc);
        let none = vec![Indexer::boolean(jnode!(false))];
        assert_eq!(apply_indexer_chain(&doc, &none).unwrap(), jnode!([]));

        // array mask selects matching positions
        let mask = vec![Indexer::boolean(jnode!([true, false, true]))];
        assert_eq!(apply_indexer_chain(&doc, &mask).unwrap(), jnode!([1, 3]));

        // length mismatch and non-bool elements fail
        let bad_len = vec![Indexer::boolean(jnode!([true]))];
        assert!(matches!(
            apply_indexer_chain(&doc, &bad_len).unwrap_err(),
            EvalError::VectorizedArithmetic(_)
        ));
        let bad_elem = vec![Indexer::boolean(jnode!([true, 1, false]))];
        assert!(matches!(
            apply_indexer_chain(&doc, &bad_elem).unwrap_err(),
            EvalError::VectorizedArithmetic(_)
        ));

        // object mask keeps the object shape
        let obj = jnode!({"a": 1, "b": 2});
        let mask = vec![Indexer::boolean(jnode!({"a": true, "b": false}))];
        assert_eq!(apply_indexer_chain(&obj, &mask).unwrap(), jnode!({"a": 1}));
        let bad_keys = vec![Indexer::boolean(jnode!({"a": true, "x": false}))];
        assert!(matches!(
            apply_indexer_chain(&obj, &bad_keys).unwrap_err(),
            EvalError::VectorizedArithmetic(_)
        ));
    }

    #[test]
    fn test_filtered_empties_are_elided() {
        // filter inside a chain: rows that lose every element disappear
        // instead of leaving empty arrays behind
        let doc = jnode!([[1, 5], [2], [6, 7]]);
        let keep_big = JNode::cur_json(
            JType::ARR,
            Rc::new(|row: &JNode| {
                let arr = row.as_array().expect("rows are arrays");
                Ok(JNode::array(
                    arr.iter()
                        .map(|x| JNode::Bool(x.as_f64().unwrap_or(0.0) > 4.0))
                        .collect(),
                ))
            }),
        );
        let chain = vec![Indexer::star(), Indexer::boolean(keep_big)];
        assert_eq!(
            apply_indexer_chain(&doc, &chain).unwrap(),
            jnode!([[5], [6, 7]])
        );
    }

    #[test]
    fn test_recursive_search_no_duplicates() {
        let doc = jnode!({"ab": {"ab": 9}, "nest": {"ab": 2}});
        // two patterns that both match "ab": each occurrence still yields once,
        // and a matched subtree is not descended into (the inner "ab": 9
        // arrives only as part of its parent)
        let chain = vec![Indexer::recursive_varnames(vec![
            VarnameChild::Name("ab".into()),
            VarnameChild::Pattern(Rc::new(Regex::new("^a").unwrap())),
        ])];
        assert_eq!(
            apply_indexer_chain(&doc, &chain).unwrap(),
            jnode!([{"ab": 9}, 2])
        );
    }

    #[test]
    fn test_recursive_search_through_arrays() {
        let doc = jnode!({"rows": [{"x": 1}, {"y": {"x": 2}}]});
        let chain = vec![Indexer::recursive_varnames(vec![VarnameChild::Name(
            "x".into(),
        )])];
        assert_eq!(apply_indexer_chain(&doc, &chain).unwrap(), jnode!([1, 2]));
    }

    #[test]
    fn test_projection() {
        let doc = jnode!({"a": 1, "b": 2});
        let first = JNode::cur_json(
            JType::ANYTHING,
            Rc::new(|v: &JNode| Ok(v.get("a").cloned().unwrap_or(JNode::Null))),
        );
        let chain = vec![Indexer::projection(Projection::Object(vec![
            ("x".into(), first),
            ("two".into(), jnode!(2)),
        ]))];
        assert_eq!(
            apply_indexer_chain(&doc, &chain).unwrap(),
            jnode!({"x": 1, "two": 2})
        );

        let arr_proj = vec![Indexer::projection(Projection::Array(vec![
            jnode!(1),
            jnode!("k"),
        ]))];
        assert_eq!(
            apply_indexer_chain(&doc, &arr_proj).unwrap(),
            jnode!([1, "k"])
        );
    }
}
