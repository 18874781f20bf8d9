use bson::{Bson, Document, doc};
use docbridge::expression::{Expression, Operator};
use docbridge::query::{compile, compile_or_empty};
use proptest::prelude::*;

fn leaf() -> impl Strategy<Value = Expression> {
    ("[a-z]{1,6}", any::<i32>(), 0usize..6).prop_map(|(field, n, op)| {
        let operator = [
            Operator::Equal,
            Operator::NotEqual,
            Operator::LessThan,
            Operator::LessOrEqual,
            Operator::GreaterThan,
            Operator::GreaterOrEqual,
        ][op];
        Expression::predicate(field, operator, n)
    })
}

fn tree() -> impl Strategy<Value = Expression> {
    leaf().prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Expression::And),
            prop::collection::vec(inner, 0..4).prop_map(Expression::Or),
        ]
    })
}

/// Number of nodes a compiled document should carry for `expr`.
fn shape(expr: &Expression) -> usize {
    match expr {
        Expression::Predicate { .. } => 1,
        Expression::And(c) | Expression::Or(c) => c.iter().map(shape).sum::<usize>() + 1,
    }
}

fn compiled_shape(doc: &Document) -> usize {
    match doc.iter().next() {
        None => 1,
        Some((key, Bson::Array(items))) if key == "$and" || key == "$or" => {
            1 + items
                .iter()
                .map(|b| match b {
                    Bson::Document(d) => compiled_shape(d),
                    _ => 0,
                })
                .sum::<usize>()
        }
        Some(_) => 1,
    }
}

proptest! {
    #[test]
    fn prop_compile_preserves_tree_shape(expr in tree()) {
        match compile(&expr) {
            None => prop_assert!(expr.is_empty()),
            Some(doc) => prop_assert_eq!(compiled_shape(&doc), shape(&expr)),
        }
    }

    #[test]
    fn prop_top_level_connective_is_absent_iff_empty(children in prop::collection::vec(leaf(), 0..5)) {
        let and = Expression::And(children.clone());
        prop_assert_eq!(compile(&and).is_none(), children.is_empty());
        if children.is_empty() {
            prop_assert_eq!(compile_or_empty(&and), doc! {});
        }
    }

    #[test]
    fn prop_compile_is_deterministic(expr in tree()) {
        prop_assert_eq!(compile(&expr), compile(&expr.clone()));
    }
}
