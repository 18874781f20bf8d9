use crate::expression::{Expression, FULL_TEXT_FIELD, Operator};
use bson::{Bson, Document, doc};

/// Compiles an expression into a filter document.
///
/// `None` is the absent filter: an `And`/`Or` without children constrains nothing, so
/// callers must treat it as "match everything".
#[must_use]
pub fn compile(expr: &Expression) -> Option<Document> {
    match expr {
        Expression::Predicate { field, operator, value } => Some(predicate(field, *operator, value)),
        Expression::And(children) => connective("$and", children),
        Expression::Or(children) => connective("$or", children),
    }
}

/// Like [`compile`], with the absent filter rendered as `{}`.
#[must_use]
pub fn compile_or_empty(expr: &Expression) -> Document {
    compile(expr).unwrap_or_default()
}

fn predicate(field: &str, operator: Operator, value: &Bson) -> Document {
    if field == FULL_TEXT_FIELD {
        return doc! { "$text": { "$search": value.clone() } };
    }
    let mut out = Document::new();
    out.insert(field, operator_doc(operator, value));
    out
}

fn connective(key: &str, children: &[Expression]) -> Option<Document> {
    if children.is_empty() {
        return None;
    }
    // A nested empty connective is an unconstrained branch, rendered as `{}`.
    let compiled: Vec<Bson> = children.iter().map(|c| Bson::Document(compile_or_empty(c))).collect();
    let mut out = Document::new();
    out.insert(key, compiled);
    Some(out)
}

/// Native operator document for one predicate. Mismatched operator/value combinations
/// produce an empty document instead of an error.
fn operator_doc(operator: Operator, value: &Bson) -> Document {
    let value = value.clone();
    match operator {
        Operator::Equal => doc! { "$eq": value },
        Operator::NotEqual => doc! { "$ne": value },
        Operator::LessThan => doc! { "$lt": value },
        Operator::LessOrEqual => doc! { "$lte": value },
        Operator::GreaterOrEqual => doc! { "$gte": value },
        Operator::GreaterThan => doc! { "$gt": value },
        Operator::In => doc! { "$in": value },
        Operator::NotIn => doc! { "$nin": value },
        Operator::InAll => doc! { "$all": value },
        Operator::Exists => match value {
            Bson::Boolean(present) => doc! { "$exists": present },
            _ => Document::new(),
        },
        Operator::GeoWithin => doc! { "$geoWithin": { "$geometry": value } },
        Operator::GeoIntersects => doc! { "$geoIntersects": { "$geometry": value } },
        Operator::BeginsWith => pattern(&value, |s| format!("^{s}")),
        Operator::Contains => pattern(&value, str::to_string),
        Operator::EndsWith => pattern(&value, |s| format!("{s}$")),
    }
}

fn pattern(value: &Bson, build: impl FnOnce(&str) -> String) -> Document {
    match value {
        Bson::String(s) => doc! { "$regex": build(s), "$options": "i" },
        _ => Document::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Polygon;

    #[test]
    fn empty_connectives_are_absent() {
        assert_eq!(compile(&Expression::And(vec![])), None);
        assert_eq!(compile(&Expression::Or(vec![])), None);
    }

    #[test]
    fn comparison_table() {
        let cases = [
            (Operator::Equal, "$eq"),
            (Operator::NotEqual, "$ne"),
            (Operator::LessThan, "$lt"),
            (Operator::LessOrEqual, "$lte"),
            (Operator::GreaterOrEqual, "$gte"),
            (Operator::GreaterThan, "$gt"),
            (Operator::In, "$in"),
            (Operator::NotIn, "$nin"),
            (Operator::InAll, "$all"),
        ];
        for (op, key) in cases {
            let out = compile(&Expression::predicate("age", op, 7)).unwrap();
            let mut expected = Document::new();
            expected.insert(key, 7);
            assert_eq!(out, doc! { "age": expected }, "operator {op}");
        }
    }

    #[test]
    fn string_patterns() {
        assert_eq!(
            compile(&Expression::begins_with("x", "ab")).unwrap(),
            doc! { "x": { "$regex": "^ab", "$options": "i" } }
        );
        assert_eq!(
            compile(&Expression::ends_with("x", "ab")).unwrap(),
            doc! { "x": { "$regex": "ab$", "$options": "i" } }
        );
        assert_eq!(
            compile(&Expression::contains("x", "ab")).unwrap(),
            doc! { "x": { "$regex": "ab", "$options": "i" } }
        );
    }

    #[test]
    fn non_string_pattern_and_non_bool_exists_are_dropped() {
        assert_eq!(compile(&Expression::predicate("x", Operator::Contains, 5)).unwrap(), doc! { "x": {} });
        assert_eq!(compile(&Expression::predicate("x", Operator::Exists, "yes")).unwrap(), doc! { "x": {} });
        assert_eq!(compile(&Expression::exists("x", false)).unwrap(), doc! { "x": { "$exists": false } });
    }

    #[test]
    fn full_text_ignores_operator() {
        let expr = Expression::predicate(FULL_TEXT_FIELD, Operator::GreaterThan, "hello");
        assert_eq!(compile(&expr).unwrap(), doc! { "$text": { "$search": "hello" } });
    }

    #[test]
    fn geo_intersects_keeps_geometry() {
        let polygon = Polygon::new(vec![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0], [7.0, 8.0]]);
        let out = compile(&Expression::geo_intersects("loc", &polygon)).unwrap();
        let expected = doc! {
            "loc": { "$geoIntersects": { "$geometry": {
                "type": "Polygon",
                "coordinates": [[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0], [7.0, 8.0]]],
            } } }
        };
        assert_eq!(out, expected);
    }

    #[test]
    fn connectives_preserve_child_order() {
        let expr = Expression::Or(vec![
            Expression::equal("a", 1),
            Expression::And(vec![]),
            Expression::equal("b", 2),
        ]);
        assert_eq!(
            compile(&expr).unwrap(),
            doc! { "$or": [{ "a": { "$eq": 1 } }, {}, { "b": { "$eq": 2 } }] }
        );
    }
}
