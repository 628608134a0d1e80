// JNode: Rc-wrapped JSON value type for O(1) cloning, plus the engine-only
// variants (compiled regex, compiled slice, late-bound current-JSON reference).

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use regex::Regex;
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::eval::EvalError;

// ── Type tags ────────────────────────────────────────────────────────────────

/// Flag-set type tag for [`JNode`].
///
/// Single-bit values tag concrete variants; unions like [`JType::NUM`] and
/// [`JType::ITERABLE`] are the predicate sets the registries check arguments
/// against. A late-bound reference carries the union of every type its
/// closure may produce.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct JType(u16);

impl JType {
    pub const NULL: JType = JType(1);
    pub const BOOL: JType = JType(1 << 1);
    pub const INT: JType = JType(1 << 2);
    pub const FLOAT: JType = JType(1 << 3);
    pub const STR: JType = JType(1 << 4);
    pub const ARR: JType = JType(1 << 5);
    pub const OBJ: JType = JType(1 << 6);
    pub const REGEX: JType = JType(1 << 7);
    pub const SLICE: JType = JType(1 << 8);

    pub const NUM: JType = JType(Self::INT.0 | Self::FLOAT.0);
    pub const ITERABLE: JType = JType(Self::ARR.0 | Self::OBJ.0);
    pub const STR_OR_REGEX: JType = JType(Self::STR.0 | Self::REGEX.0);
    pub const INT_OR_SLICE: JType = JType(Self::INT.0 | Self::SLICE.0);
    pub const SCALAR: JType = JType(Self::NULL.0 | Self::BOOL.0 | Self::NUM.0 | Self::STR.0);
    /// Every queryable type; the tag of `@` before its input is known.
    pub const ANYTHING: JType = JType(Self::SCALAR.0 | Self::ITERABLE.0);

    /// True if the two sets share at least one type.
    #[inline]
    pub fn intersects(self, other: JType) -> bool {
        self.0 & other.0 != 0
    }

    /// True if `other` is a subset of this set.
    #[inline]
    pub fn contains(self, other: JType) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn union(self, other: JType) -> JType {
        JType(self.0 | other.0)
    }

    #[inline]
    pub fn intersection(self, other: JType) -> JType {
        JType(self.0 & other.0)
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for JType {
    type Output = JType;

    fn bitor(self, rhs: JType) -> JType {
        self.union(rhs)
    }
}

impl fmt::Display for JType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(JType, &str); 9] = [
            (JType::NULL, "null"),
            (JType::BOOL, "bool"),
            (JType::INT, "int"),
            (JType::FLOAT, "float"),
            (JType::STR, "string"),
            (JType::ARR, "array"),
            (JType::OBJ, "object"),
            (JType::REGEX, "regex"),
            (JType::SLICE, "slice"),
        ];
        if *self == JType::ANYTHING {
            return write!(f, "anything");
        }
        let mut first = true;
        for (bit, name) in NAMES {
            if self.contains(bit) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        if first {
            write!(f, "none")?;
        }
        Ok(())
    }
}

impl fmt::Debug for JType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JType({})", self)
    }
}

// ── Slicer ───────────────────────────────────────────────────────────────────

/// A compiled slice: up to three optional integers with Python semantics
/// (half-open, negative indices count from the end, out-of-range clips).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slicer {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub step: Option<i64>,
}

impl Slicer {
    /// A step of 0 is rejected at construction; there is no other way to
    /// build one, so downstream code never re-checks.
    pub fn new(
        start: Option<i64>,
        stop: Option<i64>,
        step: Option<i64>,
    ) -> Result<Self, EvalError> {
        if step == Some(0) {
            return Err(EvalError::Type("slice step cannot be 0".to_string()));
        }
        Ok(Slicer { start, stop, step })
    }
}

impl fmt::Display for Slicer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.start {
            write!(f, "{}", s)?;
        }
        write!(f, ":")?;
        if let Some(s) = self.stop {
            write!(f, "{}", s)?;
        }
        if let Some(s) = self.step {
            write!(f, ":{}", s)?;
        }
        Ok(())
    }
}

// ── JNode ────────────────────────────────────────────────────────────────────

/// The function inside a late-bound reference: input document → result.
pub type CurFn = Rc<dyn Fn(&JNode) -> Result<JNode, EvalError>>;

/// A JSON-like value with O(1) clone semantics via Rc-wrapping.
///
/// Standard JSON types (`Array`, `Object`, `Str`) are wrapped in `Rc` for
/// cheap cloning. The engine-only variants are `Regex` (compiled pattern),
/// `Slicer` (indexer construct, never a query result), and `CurJson`: a
/// late-bound reference to the current input, carrying the closure to run
/// once the input is supplied and the output type set the compiler inferred.
#[derive(Clone)]
pub enum JNode {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Array(Rc<Vec<JNode>>),
    Object(Rc<IndexMap<String, JNode>>),

    // Engine-only variants
    Regex(Rc<Regex>),
    Slicer(Slicer),
    CurJson { tag: JType, func: CurFn },
}

// ── Type checks ──────────────────────────────────────────────────────────────

impl JNode {
    /// The tag matching this value's variant. Never stale: the variant *is*
    /// the tag, except for `CurJson` which reports its declared output set.
    pub fn type_tag(&self) -> JType {
        match self {
            JNode::Null => JType::NULL,
            JNode::Bool(_) => JType::BOOL,
            JNode::Int(_) => JType::INT,
            JNode::Float(_) => JType::FLOAT,
            JNode::Str(_) => JType::STR,
            JNode::Array(_) => JType::ARR,
            JNode::Object(_) => JType::OBJ,
            JNode::Regex(_) => JType::REGEX,
            JNode::Slicer(_) => JType::SLICE,
            JNode::CurJson { tag, .. } => *tag,
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, JNode::Null)
    }

    #[inline]
    pub fn is_num(&self) -> bool {
        matches!(self, JNode::Int(_) | JNode::Float(_))
    }

    #[inline]
    pub fn is_str(&self) -> bool {
        matches!(self, JNode::Str(_))
    }

    #[inline]
    pub fn is_array(&self) -> bool {
        matches!(self, JNode::Array(_))
    }

    #[inline]
    pub fn is_object(&self) -> bool {
        matches!(self, JNode::Object(_))
    }

    /// Array or object.
    #[inline]
    pub fn is_iterable(&self) -> bool {
        matches!(self, JNode::Array(_) | JNode::Object(_))
    }

    /// True for a late-bound reference.
    #[inline]
    pub fn is_cur_json(&self) -> bool {
        matches!(self, JNode::CurJson { .. })
    }
}

// ── Extraction ───────────────────────────────────────────────────────────────

impl JNode {
    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            JNode::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            JNode::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric view: `Int` and `Float` both widen to f64.
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            JNode::Int(n) => Some(*n as f64),
            JNode::Float(n) => Some(*n),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            JNode::Str(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn as_array(&self) -> Option<&Vec<JNode>> {
        match self {
            JNode::Array(arr) => Some(arr),
            _ => None,
        }
    }

    #[inline]
    pub fn as_object(&self) -> Option<&IndexMap<String, JNode>> {
        match self {
            JNode::Object(map) => Some(map),
            _ => None,
        }
    }

    #[inline]
    pub fn as_regex(&self) -> Option<&Regex> {
        match self {
            JNode::Regex(re) => Some(re),
            _ => None,
        }
    }

    #[inline]
    pub fn as_slicer(&self) -> Option<&Slicer> {
        match self {
            JNode::Slicer(s) => Some(s),
            _ => None,
        }
    }

    /// Mutable view of the inner Vec, cloning if shared (`Rc::make_mut`).
    #[inline]
    pub fn as_array_mut(&mut self) -> Option<&mut Vec<JNode>> {
        match self {
            JNode::Array(arr) => Some(Rc::make_mut(arr)),
            _ => None,
        }
    }

    /// Mutable view of the inner IndexMap, cloning if shared.
    #[inline]
    pub fn as_object_mut(&mut self) -> Option<&mut IndexMap<String, JNode>> {
        match self {
            JNode::Object(map) => Some(Rc::make_mut(map)),
            _ => None,
        }
    }

    /// Index into an object by key.
    #[inline]
    pub fn get(&self, key: &str) -> Option<&JNode> {
        match self {
            JNode::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Index into an array by position.
    #[inline]
    pub fn get_index(&self, index: usize) -> Option<&JNode> {
        match self {
            JNode::Array(arr) => arr.get(index),
            _ => None,
        }
    }
}

// ── Constructors ─────────────────────────────────────────────────────────────

impl JNode {
    #[inline]
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        JNode::Str(s.into())
    }

    #[inline]
    pub fn array(v: Vec<JNode>) -> Self {
        JNode::Array(Rc::new(v))
    }

    #[inline]
    pub fn object(m: IndexMap<String, JNode>) -> Self {
        JNode::Object(Rc::new(m))
    }

    #[inline]
    pub fn regex(re: Regex) -> Self {
        JNode::Regex(Rc::new(re))
    }

    /// A late-bound reference with the given declared output set.
    #[inline]
    pub fn cur_json(tag: JType, func: CurFn) -> Self {
        JNode::CurJson { tag, func }
    }

    /// The identity reference: `@` before any indexing.
    pub fn identity() -> Self {
        JNode::CurJson {
            tag: JType::ANYTHING,
            func: Rc::new(|input: &JNode| Ok(input.clone())),
        }
    }
}

// ── From impls ───────────────────────────────────────────────────────────────

impl From<bool> for JNode {
    #[inline]
    fn from(b: bool) -> Self {
        JNode::Bool(b)
    }
}

impl From<i64> for JNode {
    #[inline]
    fn from(n: i64) -> Self {
        JNode::Int(n)
    }
}

impl From<i32> for JNode {
    #[inline]
    fn from(n: i32) -> Self {
        JNode::Int(n as i64)
    }
}

impl From<usize> for JNode {
    #[inline]
    fn from(n: usize) -> Self {
        JNode::Int(n as i64)
    }
}

impl From<f64> for JNode {
    #[inline]
    fn from(n: f64) -> Self {
        JNode::Float(n)
    }
}

impl From<&str> for JNode {
    #[inline]
    fn from(s: &str) -> Self {
        JNode::Str(s.into())
    }
}

impl From<String> for JNode {
    #[inline]
    fn from(s: String) -> Self {
        JNode::Str(s.into())
    }
}

impl From<Rc<str>> for JNode {
    #[inline]
    fn from(s: Rc<str>) -> Self {
        JNode::Str(s)
    }
}

impl From<Vec<JNode>> for JNode {
    #[inline]
    fn from(v: Vec<JNode>) -> Self {
        JNode::Array(Rc::new(v))
    }
}

impl From<IndexMap<String, JNode>> for JNode {
    #[inline]
    fn from(m: IndexMap<String, JNode>) -> Self {
        JNode::Object(Rc::new(m))
    }
}

// ── PartialEq ────────────────────────────────────────────────────────────────

impl PartialEq for JNode {
    /// Structural equality. `Int` and `Float` compare numerically
    /// (`1 == 1.0`); NaN never equals NaN; late-bound references are never
    /// equal (closures have no structure to compare).
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (JNode::Null, JNode::Null) => true,
            (JNode::Bool(a), JNode::Bool(b)) => a == b,
            (JNode::Int(a), JNode::Int(b)) => a == b,
            (JNode::Float(a), JNode::Float(b)) => a == b,
            (JNode::Int(a), JNode::Float(b)) | (JNode::Float(b), JNode::Int(a)) => {
                *a as f64 == *b
            }
            (JNode::Str(a), JNode::Str(b)) => a == b,
            (JNode::Array(a), JNode::Array(b)) => a == b,
            (JNode::Object(a), JNode::Object(b)) => a == b,
            (JNode::Regex(a), JNode::Regex(b)) => a.as_str() == b.as_str(),
            (JNode::Slicer(a), JNode::Slicer(b)) => a == b,
            _ => false,
        }
    }
}

// ── Debug / Display ──────────────────────────────────────────────────────────

impl fmt::Debug for JNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JNode::CurJson { tag, .. } => write!(f, "CurJson({})", tag),
            JNode::Regex(re) => write!(f, "Regex({:?})", re.as_str()),
            JNode::Slicer(s) => write!(f, "Slicer({})", s),
            other => write!(f, "{}", other),
        }
    }
}

impl fmt::Display for JNode {
    /// The canonical string form of a (constant) compiled query: compact JSON.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JNode::Null => write!(f, "null"),
            JNode::Bool(b) => write!(f, "{}", b),
            JNode::Int(n) => write!(f, "{}", n),
            JNode::Float(n) => format_float(*n, f),
            JNode::Str(s) => write!(f, "\"{}\"", escape_json_string(s)),
            JNode::Array(arr) => {
                write!(f, "[")?;
                for (i, v) in arr.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            JNode::Object(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "\"{}\":{}", escape_json_string(k), v)?;
                }
                write!(f, "}}")
            }
            JNode::Regex(re) => write!(f, "\"{}\"", escape_json_string(re.as_str())),
            JNode::Slicer(s) => write!(f, "\"{}\"", s),
            JNode::CurJson { tag, .. } => write!(f, "\"<current-json:{}>\"", tag),
        }
    }
}

fn escape_json_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => result.push_str("\\\""),
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            c if c < '\x20' => {
                result.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => result.push(c),
        }
    }
    result
}

fn format_float(n: f64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if !n.is_finite() {
        // NaN and +/-Infinity serialize as null (matching JSON)
        write!(f, "null")
    } else {
        // {:?} keeps the trailing ".0" on whole floats, so 3.0 stays a float
        write!(f, "{:?}", n)
    }
}

// ── Serialization ────────────────────────────────────────────────────────────

impl Serialize for JNode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            JNode::Null => serializer.serialize_none(),
            JNode::Bool(b) => serializer.serialize_bool(*b),
            JNode::Int(n) => serializer.serialize_i64(*n),
            JNode::Float(n) => {
                if n.is_finite() {
                    serializer.serialize_f64(*n)
                } else {
                    serializer.serialize_none()
                }
            }
            JNode::Str(s) => serializer.serialize_str(s),
            JNode::Array(arr) => {
                let mut seq = serializer.serialize_seq(Some(arr.len()))?;
                for v in arr.iter() {
                    seq.serialize_element(v)?;
                }
                seq.end()
            }
            JNode::Object(map) => {
                let mut m = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map.iter() {
                    m.serialize_entry(k, v)?;
                }
                m.end()
            }
            JNode::Regex(re) => serializer.serialize_str(re.as_str()),
            JNode::Slicer(_) | JNode::CurJson { .. } => serializer.serialize_none(),
        }
    }
}

// ── Deserialization (single-pass JSON→JNode) ─────────────────────────────────

impl<'de> serde::Deserialize<'de> for JNode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(JNodeVisitor)
    }
}

struct JNodeVisitor;

impl<'de> Visitor<'de> for JNodeVisitor {
    type Value = JNode;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "any valid JSON value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<JNode, E> {
        Ok(JNode::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<JNode, E> {
        Ok(JNode::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<JNode, E> {
        if v <= i64::MAX as u64 {
            Ok(JNode::Int(v as i64))
        } else {
            Ok(JNode::Float(v as f64))
        }
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<JNode, E> {
        Ok(JNode::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<JNode, E> {
        Ok(JNode::string(v))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<JNode, E> {
        Ok(JNode::Str(v.into()))
    }

    fn visit_none<E: de::Error>(self) -> Result<JNode, E> {
        Ok(JNode::Null)
    }

    fn visit_unit<E: de::Error>(self) -> Result<JNode, E> {
        Ok(JNode::Null)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<JNode, A::Error> {
        let mut vec = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(elem) = seq.next_element()? {
            vec.push(elem);
        }
        Ok(JNode::array(vec))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<JNode, A::Error> {
        let mut m = IndexMap::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((k, v)) = map.next_entry()? {
            m.insert(k, v);
        }
        Ok(JNode::object(m))
    }
}

// ── JSON string I/O ──────────────────────────────────────────────────────────

impl JNode {
    /// Serialize to a compact JSON string.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize to a pretty-printed JSON string.
    pub fn to_json_string_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse a JSON string into a JNode (single-pass, no intermediate
    /// serde_json::Value).
    pub fn from_json_str(s: &str) -> Result<JNode, serde_json::Error> {
        serde_json::from_str(s)
    }
}

// ── jnode! macro ─────────────────────────────────────────────────────────────

/// Macro for constructing JNode literals, similar to `serde_json::json!`
///
/// Usage:
///   jnode!(null)            → JNode::Null
///   jnode!(true)            → JNode::Bool(true)
///   jnode!(42)              → JNode::Int(42)
///   jnode!(3.14)            → JNode::Float(3.14)
///   jnode!("hello")         → JNode::Str(Rc::from("hello"))
///   jnode!([1, 2, 3])       → JNode::Array(Rc::new(vec![...]))
///   jnode!({"k": v, ...})   → JNode::Object(Rc::new(IndexMap from pairs))
///   jnode!(expr)            → JNode::from(expr)
#[macro_export]
macro_rules! jnode {
    // null
    (null) => {
        $crate::value::JNode::Null
    };

    // true
    (true) => {
        $crate::value::JNode::Bool(true)
    };

    // false
    (false) => {
        $crate::value::JNode::Bool(false)
    };

    // Array
    ([ $($elem:tt),* $(,)? ]) => {
        $crate::value::JNode::Array(std::rc::Rc::new(vec![ $( $crate::jnode!($elem) ),* ]))
    };

    // Object
    ({ $($key:tt : $val:tt),* $(,)? }) => {
        {
            #[allow(unused_mut)]
            let mut map = indexmap::IndexMap::new();
            $(
                map.insert(($key).to_string(), $crate::jnode!($val));
            )*
            $crate::value::JNode::Object(std::rc::Rc::new(map))
        }
    };

    // Expression (fallback — numbers, variables, function calls, etc.)
    ($other:expr) => {
        $crate::value::JNode::from($other)
    };
}

// ── Tests ────────────────────────────────────────────────────────────────────
