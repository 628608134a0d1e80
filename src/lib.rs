// remespath - RemesPath query engine over in-memory JSON
// Copyright (c) 2025 remespath contributors
// Licensed under the MIT License

//! # remespath
//!
//! RemesPath: a query language and execution engine over in-memory JSON.
//!
//! A query is lexed, parsed into a compiled query object, and executed
//! against a JSON document to produce another JSON value. The language
//! combines path navigation (field access, array slicing, recursive descent,
//! regex key match), filtering (boolean indexing), array/object projections,
//! a library of vectorized scalar and reducing functions, and
//! arithmetic/comparison binops with full precedence and associativity.
//! `@` denotes the current input; inside an indexer it rebinds to the value
//! being indexed.
//!
//! ## Architecture
//!
//! - `value` — the `JNode` tagged union plus the engine-only variants
//! - `lexer` — query text → token sequence
//! - `binop` / `functions` — the operator and built-in function registries
//! - `parser` — tokens → compiled query, folding input-independent subtrees
//! - `indexer` — lazy iteration over path/slice/filter/projection selections
//! - `eval` — late-bound resolution and vectorization
//! - `cache` — an LRU-bounded compile cache keyed by query text
//!
//! ## Example
//!
//! ```
//! use remespath::{compile, search, JNode};
//!
//! let doc = JNode::from_json_str(r#"{"foo": [1, 2, 3]}"#).unwrap();
//!
//! // one-shot
//! let result = search("@.foo[@ > 1] + 10", &doc).unwrap();
//! assert_eq!(result, JNode::from_json_str("[12, 13]").unwrap());
//!
//! // compile once, apply many times
//! let q = compile("len(@.foo)").unwrap();
//! assert_eq!(q.apply(&doc).unwrap(), JNode::Int(3));
//! ```

use std::fmt;

use thiserror::Error;
use tracing::debug;

pub mod binop;
pub mod cache;
pub mod eval;
pub mod functions;
pub mod indexer;
pub mod lexer;
pub mod parser;
pub mod value;

pub use cache::QueryCache;
pub use eval::EvalError;
pub use lexer::LexError;
pub use parser::ParseError;
pub use value::{JNode, JType, Slicer};

/// Any error a `compile`/`search`/`apply` call can surface.
///
/// All errors are fatal to the current call; nothing is retried. The engine
/// is stateless across calls apart from the opt-in query cache.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// A compiled query: a constant value when the query is input-independent,
/// otherwise a late-bound closure over the input. Immutable and reusable.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledQuery {
    root: JNode,
}

impl CompiledQuery {
    /// True if the query never looks at its input.
    pub fn is_const(&self) -> bool {
        !self.root.is_cur_json()
    }

    /// The constant value, for input-independent queries.
    pub fn as_const(&self) -> Option<&JNode> {
        if self.is_const() {
            Some(&self.root)
        } else {
            None
        }
    }

    /// Run the query against an input document. Repeatable; the result may
    /// share structure with the input but the input is never modified.
    pub fn apply(&self, input: &JNode) -> Result<JNode, QueryError> {
        Ok(eval::resolve(&self.root, input)?)
    }
}

impl fmt::Display for CompiledQuery {
    /// Constant compiled queries print as standard JSON.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)
    }
}

/// Compile a query without caching.
pub fn compile(query: &str) -> Result<CompiledQuery, QueryError> {
    let toks = lexer::lex(query)?;
    let root = parser::parse(&toks)?;
    debug!(constant = !root.is_cur_json(), "compiled query");
    Ok(CompiledQuery { root })
}

/// Compile and run a query in one step. For repeated evaluation of the same
/// query, use [`compile`] or a [`RemesParser`] instead.
pub fn search(query: &str, input: &JNode) -> Result<JNode, QueryError> {
    compile(query)?.apply(input)
}

/// A compiling front-end with an LRU-bounded cache of compiled queries.
pub struct RemesParser {
    cache: QueryCache,
}

impl RemesParser {
    pub const DEFAULT_CACHE_CAPACITY: usize = 64;

    pub fn new() -> Self {
        Self::with_cache_capacity(Self::DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_cache_capacity(capacity: usize) -> Self {
        RemesParser {
            cache: QueryCache::new(capacity),
        }
    }

    /// Compile through the cache.
    pub fn compile(&mut self, query: &str) -> Result<CompiledQuery, QueryError> {
        if let Some(hit) = self.cache.get(query) {
            return Ok(hit.clone());
        }
        let compiled = compile(query)?;
        self.cache.insert(query, compiled.clone());
        Ok(compiled)
    }

    /// Compile (through the cache) and run.
    pub fn search(&mut self, query: &str, input: &JNode) -> Result<JNode, QueryError> {
        self.compile(query)?.apply(input)
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }
}

impl Default for RemesParser {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
