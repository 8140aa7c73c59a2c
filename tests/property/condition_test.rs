// tests/property/condition_test.rs

//! `Condition::parse`/`eval_numeric` consistency (spec.md §8): a parsed
//! numeric condition must agree with directly evaluating the same operator
//! against the same literal, for any operator/value/probe combination.

use odin_agent::core::alerter::condition::Condition;
use proptest::prelude::*;

fn expected(op: &str, actual: f64, expected_literal: f64) -> bool {
    match op {
        ">" => actual > expected_literal,
        ">=" => actual >= expected_literal,
        "<" => actual < expected_literal,
        "<=" => actual <= expected_literal,
        "==" => actual == expected_literal,
        "!=" => actual != expected_literal,
        _ => unreachable!(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 200, ..ProptestConfig::default() })]

    #[test]
    fn parsed_numeric_condition_agrees_with_direct_comparison(
        op in prop::sample::select(vec![">", ">=", "<", "<=", "==", "!="]),
        literal in -1000.0f64..1000.0,
        probe in -1000.0f64..1000.0,
    ) {
        let source = format!("container.cpu_percent {op} {literal}");
        let condition = Condition::parse(&source).unwrap();

        prop_assert_eq!(condition.eval_numeric(probe), expected(op, probe, literal));
        prop_assert_eq!(condition.to_string(), source);
    }

    #[test]
    fn rejects_non_numeric_literal_for_numeric_field(
        garbage in "[a-zA-Z]{1,10}".prop_filter("must not parse as f64 (e.g. \"nan\", \"inf\")", |s| s.parse::<f64>().is_err())
    ) {
        let source = format!("container.cpu_percent > {garbage}");
        prop_assert!(Condition::parse(&source).is_err());
    }
}
