// Integration tests for the full pipeline: lexer + parser + evaluator.
//
// Every query is checked through both `search` and `compile` + `apply`,
// since the two entry points must agree.

use remespath::{compile, jnode, search, JNode, QueryError, RemesParser};

fn foo_doc() -> JNode {
    JNode::from_json_str(
        r#"{
            "foo": [[0, 1, 2], [3.0, 4.0, 5.0], [6.0, 7.0, 8.0]],
            "bar": {"a": false, "b": ["a`g", "bah"]},
            "baz": "z",
            "quz": {},
            "jub": [],
            "guzo": [[[1]], [[2], [3]]],
            "7": [{"foo": 2}, 1],
            "_": {"0": 0}
        }"#,
    )
    .unwrap()
}

/// Assert a query's result through both entry points.
fn check(query: &str, expected: JNode) {
    let doc = foo_doc();
    let via_search = search(query, &doc).unwrap();
    assert_eq!(via_search, expected, "search({:?})", query);
    let via_apply = compile(query).unwrap().apply(&doc).unwrap();
    assert_eq!(via_apply, expected, "apply(compile({:?}))", query);
}

// ── Seed scenarios ───────────────────────────────────────────────────────────

#[test]
fn test_constant_arithmetic() {
    check("2 - 4 * 3.5", jnode!(-12.0));
}

#[test]
fn test_vectorized_addition_of_rows() {
    check("@.foo[0] + @.foo[1]", jnode!([3.0, 5.0, 7.0]));
}

#[test]
fn test_boolean_filter_on_row() {
    check("@.foo[1][@ > 3.5]", jnode!([4.0, 5.0]));
}

#[test]
fn test_stepped_slice_of_rows() {
    check("@.foo[:3:2]", jnode!([[0, 1, 2], [6.0, 7.0, 8.0]]));
}

#[test]
fn test_recursive_regex_key_search() {
    check(r"@..g`\d`", jnode!([[{"foo": 2}, 1], 0]));
}

#[test]
fn test_sort_by_then_slice() {
    check(
        "sort_by(@.foo, 0, true)[:2]",
        jnode!([[6.0, 7.0, 8.0], [3.0, 4.0, 5.0]]),
    );
}

#[test]
fn test_object_projection() {
    check(
        "@.foo{f: @[0], b: @[1][:2]}",
        jnode!({"f": [0, 1, 2], "b": [3.0, 4.0]}),
    );
}

#[test]
fn test_range_function() {
    check("range(2, 19, 5)", jnode!([2, 7, 12, 17]));
}

// ── Invariants ───────────────────────────────────────────────────────────────

#[test]
fn test_identity_round_trip() {
    for doc in [
        foo_doc(),
        jnode!(null),
        jnode!(3.5),
        jnode!("x"),
        jnode!([]),
        jnode!({}),
        jnode!([1, [2, {"a": null}]]),
    ] {
        assert_eq!(search("@", &doc).unwrap(), doc);
    }
}

#[test]
fn test_filtering_idempotence() {
    let arr = jnode!([1, "a", [2], {"b": 3}]);
    assert_eq!(search("@[@ == @]", &arr).unwrap(), arr);
    let obj = foo_doc();
    assert_eq!(search("@[@ == @]", &obj).unwrap(), obj);
}

#[test]
fn test_compile_is_deterministic() {
    // constant queries compile to structurally equal values
    assert_eq!(compile("2 + 3 * 4").unwrap(), compile("2 + 3 * 4").unwrap());
    // late-bound queries agree on every application
    let doc = foo_doc();
    let a = compile("@.foo[:][@ > 2]").unwrap();
    let b = compile("@.foo[:][@ > 2]").unwrap();
    assert_eq!(a.apply(&doc).unwrap(), b.apply(&doc).unwrap());
}

#[test]
fn test_constant_query_is_input_independent() {
    let q = compile("3 ** 2 - 1").unwrap();
    let expected = q.as_const().cloned().expect("input-independent query");
    for doc in [jnode!(null), jnode!([1, 2]), foo_doc()] {
        assert_eq!(search("3 ** 2 - 1", &doc).unwrap(), expected);
    }
}

#[test]
fn test_search_is_pure() {
    let doc = foo_doc();
    let first = search("@.foo[:][@ > 2.5]", &doc).unwrap();
    let second = search("@.foo[:][@ > 2.5]", &doc).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_precedence_table() {
    // or < xor < and < comparison < additive < multiplicative < power
    check("true | true ^ true", jnode!(true));
    check("true ^ true & false", jnode!(true));
    check("1 == 1 & 2 == 2", jnode!(true));
    check("1 + 1 == 2", jnode!(true));
    check("2 + 3 * 4", jnode!(14));
    check("12 / 3 * 2", jnode!(8.0));
    check("2 * 3 ** 2", jnode!(18.0));
    check("2 ** 3 ** 2", jnode!(512.0));
    check("-2 ** 2", jnode!(-4.0));
}

// ── Boundary behaviors ───────────────────────────────────────────────────────

#[test]
fn test_slice_boundaries() {
    check("@.foo[0][-2:]", jnode!([1, 2]));
    check("@.foo[0][::-1]", jnode!([2, 1, 0]));
    check("@.foo[0][10:]", jnode!([]));
    check("@.foo[0][2:1]", jnode!([]));
    check("@.foo[0][-100:100]", jnode!([0, 1, 2]));
    check("@.foo[-1]", jnode!([6.0, 7.0, 8.0]));
}

#[test]
fn test_singleton_key_unwraps() {
    // a lone literal key returns the value itself, not a one-key object
    check("@.baz", jnode!("z"));
    check("@.quz", jnode!({}));
    check("@.jub", jnode!([]));
    // a regex selector keeps the object wrapper even with one match
    check("@.g`^baz$`", jnode!({"baz": "z"}));
    // a missing literal key is silently skipped
    check("@.nope", jnode!({}));
}

#[test]
fn test_recursive_search_dedups_under_aliasing() {
    let shared = jnode!({"target": 7});
    let doc = jnode!({"a": (shared.clone()), "b": (shared)});
    // the same Rc-shared subtree sits at two rooted paths: two yields,
    // each path exactly once
    assert_eq!(search("@..target", &doc).unwrap(), jnode!([7, 7]));
}

#[test]
fn test_vectorized_function_on_empty_iterables() {
    check("s_len(@.jub)", jnode!([]));
    check("abs(@.quz)", jnode!({}));
}

#[test]
fn test_mutating_sorts_never_touch_the_input() {
    let doc = foo_doc();
    let sorted_desc = search("sort_by(@.foo, 0, true)", &doc).unwrap();
    assert_eq!(
        sorted_desc,
        jnode!([[6.0, 7.0, 8.0], [3.0, 4.0, 5.0], [0, 1, 2]])
    );
    // re-running against the same document sees the original order
    assert_eq!(search("@.foo[0][0]", &doc).unwrap(), jnode!(0));
    assert_eq!(search("sort_by(@.foo, 0, true)", &doc).unwrap(), sorted_desc);
}

// ── Broader query surface ────────────────────────────────────────────────────

#[test]
fn test_regex_filter_over_strings() {
    check("@.bar.b[@ =~ g`^a`]", jnode!(["a`g"]));
}

#[test]
fn test_star_indexers() {
    check("@.foo[*][0]", jnode!([0, 3.0, 6.0]));
    check("@.bar.*", jnode!({"a": false, "b": ["a`g", "bah"]}));
}

#[test]
fn test_varname_list_over_object() {
    check("@[`baz`, `quz`]", jnode!({"baz": "z", "quz": {}}));
}

#[test]
fn test_nested_function_calls() {
    check("sum(flatten(@.guzo, 2))", jnode!(6.0));
    check("max_by(@.foo, 0)", jnode!([6.0, 7.0, 8.0]));
    check("@.`7`[0].foo", jnode!(2));
    check("s_upper(@.baz)", jnode!("Z"));
    check("in(1, @.foo[0])", jnode!(true));
    check("ifelse(len(@.jub) == 0, `empty`, `full`)", jnode!("empty"));
}

#[test]
fn test_at_rebinds_inside_indexers() {
    // inside the filter, @ is the array being filtered, not the root
    // document: the mask picks rows whose first element is at least 3
    check(
        "@.foo[@[:][0] >= 3]",
        jnode!([[3.0, 4.0, 5.0], [6.0, 7.0, 8.0]]),
    );
}

#[test]
fn test_array_projection() {
    check("@.foo{len(@), @[0][0]}", jnode!([3, 0]));
}

// ── Error kinds ──────────────────────────────────────────────────────────────

#[test]
fn test_shape_mismatch_is_vectorized_arithmetic() {
    let doc = foo_doc();
    let err = search("@.foo[0] + @.foo[0][:2]", &doc).unwrap_err();
    assert!(
        matches!(err, QueryError::Eval(remespath::EvalError::VectorizedArithmetic(_))),
        "unexpected error {:?}",
        err
    );
    // a non-bool filter mask fails the same way
    let err = search("@.foo[@[0]]", &doc).unwrap_err();
    assert!(matches!(
        err,
        QueryError::Eval(remespath::EvalError::VectorizedArithmetic(_))
    ));
    // and so does a scalar non-bool mask
    let err = search("@.foo[len(@)]", &doc).unwrap_err();
    assert!(matches!(
        err,
        QueryError::Eval(remespath::EvalError::VectorizedArithmetic(_))
    ));
}

#[test]
fn test_recursive_slicers_are_not_implemented() {
    let err = compile("@..[1]").unwrap_err();
    assert!(matches!(
        err,
        QueryError::Eval(remespath::EvalError::NotImplemented(_))
    ));
}

#[test]
fn test_mixed_bracket_list_is_a_parse_error() {
    assert!(matches!(
        compile("@[`a`, 1]").unwrap_err(),
        QueryError::Parse(_)
    ));
}

// ── Caching front-end ────────────────────────────────────────────────────────

#[test]
fn test_remes_parser_agrees_with_search() {
    let doc = foo_doc();
    let mut parser = RemesParser::new();
    for query in ["@.foo[0] + @.foo[1]", "range(2, 19, 5)", "@.foo[0] + @.foo[1]"] {
        assert_eq!(
            parser.search(query, &doc).unwrap(),
            search(query, &doc).unwrap(),
            "query {:?}",
            query
        );
    }
    assert_eq!(parser.cache().len(), 2);
}
