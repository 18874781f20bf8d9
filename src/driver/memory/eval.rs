use bson::{Bson, Document};
use regex::RegexBuilder;
use std::cmp::Ordering;

use crate::driver::DriverError;

const MAX_PATH_DEPTH: usize = 32;
const MAX_SORT_FIELDS: usize = 8;
const BAD_VALUE: i32 = 2;

/// Evaluates a filter document against `doc`. `fold_case` makes string equality,
/// ordering and membership case-insensitive (collation strength 1 or 2).
pub fn matches(doc: &Document, filter: &Document, fold_case: bool) -> Result<bool, DriverError> {
    for (key, cond) in filter {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(key, cond)? {
                    if !matches(doc, clause, fold_case)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for clause in clauses(key, cond)? {
                    if matches(doc, clause, fold_case)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$text" => text_search(doc, cond)?,
            op if op.starts_with('$') => {
                return Err(bad_value(format!("unknown top level operator: {op}")));
            }
            path => field_matches(get_path(doc, path), cond, fold_case)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clauses<'a>(key: &str, cond: &'a Bson) -> Result<Vec<&'a Document>, DriverError> {
    let Bson::Array(items) = cond else {
        return Err(bad_value(format!("{key} must be an array")));
    };
    if items.is_empty() {
        return Err(bad_value(format!("{key} must be a nonempty array")));
    }
    items
        .iter()
        .map(|item| match item {
            Bson::Document(d) => Ok(d),
            _ => Err(bad_value(format!("{key} entries must be objects"))),
        })
        .collect()
}

fn field_matches(value: Option<&Bson>, cond: &Bson, fold_case: bool) -> Result<bool, DriverError> {
    match cond {
        Bson::Document(ops) if ops.keys().next().is_some_and(|k| k.starts_with('$')) => {
            operators_match(value, ops, fold_case)
        }
        literal => Ok(equals(value, literal, fold_case)),
    }
}

fn operators_match(value: Option<&Bson>, ops: &Document, fold_case: bool) -> Result<bool, DriverError> {
    for (op, arg) in ops {
        let ok = match op.as_str() {
            "$eq" => equals(value, arg, fold_case),
            "$ne" => !equals(value, arg, fold_case),
            "$lt" => ordered(value, arg, fold_case, Ordering::is_lt),
            "$lte" => ordered(value, arg, fold_case, Ordering::is_le),
            "$gt" => ordered(value, arg, fold_case, Ordering::is_gt),
            "$gte" => ordered(value, arg, fold_case, Ordering::is_ge),
            "$in" => member_of(value, array_arg(op, arg)?, fold_case),
            "$nin" => !member_of(value, array_arg(op, arg)?, fold_case),
            "$all" => contains_all(value, array_arg(op, arg)?, fold_case),
            "$exists" => value.is_some() == truthy(arg),
            "$regex" => {
                let options = ops.get_str("$options").unwrap_or_default();
                regex_match(value, arg, options)?
            }
            "$options" => true,
            "$geoWithin" | "$geoIntersects" | "$near" | "$nearSphere" => {
                return Err(DriverError::Unsupported(format!(
                    "{op} requires a geospatial index, which the in-memory store does not have"
                )));
            }
            other => return Err(bad_value(format!("unknown operator: {other}"))),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn array_arg<'a>(op: &str, arg: &'a Bson) -> Result<&'a [Bson], DriverError> {
    match arg {
        Bson::Array(items) => Ok(items),
        _ => Err(bad_value(format!("{op} needs an array"))),
    }
}

/// Equality with array traversal: an array field matches when the whole array or any
/// element equals `target`. A missing field equals `null`.
fn equals(value: Option<&Bson>, target: &Bson, fold_case: bool) -> bool {
    match value {
        None => matches!(target, Bson::Null),
        Some(Bson::Array(items)) if !matches!(target, Bson::Array(_)) => {
            items.iter().any(|item| same(item, target, fold_case))
        }
        Some(v) => same(v, target, fold_case),
    }
}

fn same(a: &Bson, b: &Bson, fold_case: bool) -> bool {
    match (a, b) {
        (Bson::String(x), Bson::String(y)) if fold_case => x.to_lowercase() == y.to_lowercase(),
        _ if is_number(a) && is_number(b) => compare_bson(a, b, false) == Ordering::Equal,
        _ => a == b,
    }
}

fn ordered(value: Option<&Bson>, target: &Bson, fold_case: bool, accept: fn(Ordering) -> bool) -> bool {
    let comparable = |v: &Bson| {
        (is_number(v) && is_number(target)) || type_rank(v) == type_rank(target)
    };
    match value {
        None => false,
        Some(Bson::Array(items)) => items
            .iter()
            .any(|item| comparable(item) && accept(compare_bson(item, target, fold_case))),
        Some(v) => comparable(v) && accept(compare_bson(v, target, fold_case)),
    }
}

fn member_of(value: Option<&Bson>, set: &[Bson], fold_case: bool) -> bool {
    set.iter().any(|candidate| equals(value, candidate, fold_case))
}

fn contains_all(value: Option<&Bson>, required: &[Bson], fold_case: bool) -> bool {
    if required.is_empty() {
        return false;
    }
    required.iter().all(|r| equals(value, r, fold_case))
}

fn truthy(v: &Bson) -> bool {
    match v {
        Bson::Boolean(b) => *b,
        Bson::Null | Bson::Undefined => false,
        Bson::Int32(i) => *i != 0,
        Bson::Int64(i) => *i != 0,
        Bson::Double(f) => *f != 0.0,
        _ => true,
    }
}

fn regex_match(value: Option<&Bson>, pattern: &Bson, options: &str) -> Result<bool, DriverError> {
    let Bson::String(pattern) = pattern else {
        return Err(bad_value("$regex has to be a string"));
    };
    let re = RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .build()
        .map_err(|e| bad_value(format!("invalid regular expression: {e}")))?;
    Ok(match value {
        Some(Bson::String(s)) => re.is_match(s),
        Some(Bson::Array(items)) => items.iter().any(|i| matches!(i, Bson::String(s) if re.is_match(s))),
        _ => false,
    })
}

/// Case-insensitive term search over every string in the document. Any term matches.
fn text_search(doc: &Document, cond: &Bson) -> Result<bool, DriverError> {
    let search = match cond {
        Bson::Document(d) => d.get_str("$search").map_err(|_| bad_value("$search must be a string"))?,
        _ => return Err(bad_value("$text needs an object")),
    };
    let terms: Vec<String> = search.split_whitespace().map(str::to_lowercase).collect();
    if terms.is_empty() {
        return Ok(false);
    }
    let mut haystack = Vec::new();
    collect_strings(&Bson::Document(doc.clone()), &mut haystack);
    Ok(haystack.iter().any(|s| {
        let s = s.to_lowercase();
        terms.iter().any(|t| s.contains(t.as_str()))
    }))
}

fn collect_strings(v: &Bson, out: &mut Vec<String>) {
    match v {
        Bson::String(s) => out.push(s.clone()),
        Bson::Array(items) => items.iter().for_each(|i| collect_strings(i, out)),
        Bson::Document(d) => d.values().for_each(|i| collect_strings(i, out)),
        _ => {}
    }
}

pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    if path.is_empty() {
        return None;
    }
    let mut cur = doc;
    let mut parts = path.split('.').peekable();
    let mut depth = 0usize;
    while let Some(part) = parts.next() {
        depth += 1;
        if depth > MAX_PATH_DEPTH {
            return None;
        }
        let v = cur.get(part)?;
        if parts.peek().is_none() {
            return Some(v);
        }
        match v {
            Bson::Document(d) => cur = d,
            _ => return None,
        }
    }
    None
}

/// Orders documents by a native sort specification (`{field: 1 | -1, ...}`).
pub fn compare_docs(a: &Document, b: &Document, sort: &Document, fold_case: bool) -> Ordering {
    for (field, direction) in sort.iter().take(MAX_SORT_FIELDS) {
        let ord = match (get_path(a, field), get_path(b, field)) {
            (Some(x), Some(y)) => compare_bson(x, y, fold_case),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            let descending = matches!(direction, Bson::Int32(d) if *d < 0)
                || matches!(direction, Bson::Int64(d) if *d < 0)
                || matches!(direction, Bson::Double(d) if *d < 0.0);
            return if descending { ord.reverse() } else { ord };
        }
    }
    Ordering::Equal
}

/// Applies an inclusion projection. `_id` is kept unless explicitly excluded; a projection
/// with no inclusions removes the excluded fields instead.
pub fn project(doc: &Document, projection: &Document) -> Document {
    let included: Vec<&str> = projection
        .iter()
        .filter(|(k, v)| k.as_str() != "_id" && truthy(v))
        .map(|(k, _)| k.as_str())
        .collect();
    let keep_id = projection.get("_id").is_none_or(truthy);
    if included.is_empty() {
        let mut out = doc.clone();
        for (k, v) in projection {
            if !truthy(v) {
                out.remove(k);
            }
        }
        return out;
    }
    let mut out = Document::new();
    if keep_id {
        if let Some(id) = doc.get("_id") {
            out.insert("_id", id.clone());
        }
    }
    for field in included {
        if let Some(v) = get_path(doc, field) {
            out.insert(field, v.clone());
        }
    }
    out
}

pub fn compare_bson(a: &Bson, b: &Bson, fold_case: bool) -> Ordering {
    if is_number(a) && is_number(b) {
        return as_f64(a).total_cmp(&as_f64(b));
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) if fold_case => x.to_lowercase().cmp(&y.to_lowercase()),
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::DateTime(x), Bson::DateTime(y)) => x.cmp(y),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn is_number(x: &Bson) -> bool {
    matches!(x, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_))
}

#[allow(clippy::cast_precision_loss)]
fn as_f64(x: &Bson) -> f64 {
    match x {
        Bson::Int32(i) => f64::from(*i),
        Bson::Int64(i) => *i as f64,
        Bson::Double(f) => *f,
        Bson::Decimal128(d) => d.to_string().parse::<f64>().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

/// Canonical comparison order of BSON types. Numbers share one rank.
const fn type_rank(v: &Bson) -> u8 {
    match v {
        Bson::MinKey => 0,
        Bson::Null | Bson::Undefined => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
        Bson::Symbol(_) | Bson::String(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        Bson::RegularExpression(_) => 11,
        Bson::DbPointer(_) => 12,
        Bson::JavaScriptCode(_) => 13,
        Bson::JavaScriptCodeWithScope(_) => 14,
        Bson::MaxKey => 255,
    }
}

/// Applies `$set`, `$unset` and `$inc` to `doc`. Returns whether anything changed.
pub fn apply_update(doc: &mut Document, update: &Document) -> Result<bool, DriverError> {
    if update.is_empty() || update.keys().any(|k| !k.starts_with('$')) {
        return Err(bad_value("update document requires atomic operators"));
    }
    let mut changed = false;
    for (op, arg) in update {
        let Bson::Document(fields) = arg else {
            return Err(bad_value(format!("modifier {op} needs an object")));
        };
        for (path, value) in fields {
            if path == "_id" {
                return Err(DriverError::Write {
                    code: 66,
                    message: "performing an update on the path '_id' would modify the immutable field '_id'"
                        .to_string(),
                });
            }
            changed |= match op.as_str() {
                "$set" => set_path(doc, path, value.clone()),
                "$unset" => unset_path(doc, path),
                "$inc" => {
                    let current = get_path(doc, path).cloned().unwrap_or(Bson::Int32(0));
                    let next = add_numbers(&current, value)
                        .ok_or_else(|| bad_value(format!("cannot apply $inc to {path}")))?;
                    set_path(doc, path, next)
                }
                other => return Err(bad_value(format!("unknown modifier: {other}"))),
            };
        }
    }
    Ok(changed)
}

fn add_numbers(a: &Bson, b: &Bson) -> Option<Bson> {
    Some(match (a, b) {
        (Bson::Int32(x), Bson::Int32(y)) => x.checked_add(*y).map_or_else(
            || Bson::Int64(i64::from(*x) + i64::from(*y)),
            Bson::Int32,
        ),
        (Bson::Int32(x), Bson::Int64(y)) | (Bson::Int64(y), Bson::Int32(x)) => Bson::Int64(i64::from(*x) + y),
        (Bson::Int64(x), Bson::Int64(y)) => Bson::Int64(x + y),
        _ if is_number(a) && is_number(b) => Bson::Double(as_f64(a) + as_f64(b)),
        _ => return None,
    })
}

fn set_path(root: &mut Document, path: &str, value: Bson) -> bool {
    with_parent(root, path, |parent, last| {
        let old = parent.insert(last, value.clone());
        old.as_ref() != Some(&value)
    })
}

fn unset_path(root: &mut Document, path: &str) -> bool {
    with_parent(root, path, |parent, last| parent.remove(last).is_some())
}

/// Runs `f` on the document holding the last segment of `path`, creating intermediate
/// sub-documents as needed.
fn with_parent<R>(root: &mut Document, path: &str, f: impl FnOnce(&mut Document, &str) -> R) -> R {
    let Some((head, rest)) = path.split_once('.') else {
        return f(root, path);
    };
    if !matches!(root.get(head), Some(Bson::Document(_))) {
        root.insert(head, Document::new());
    }
    match root.get_mut(head) {
        Some(Bson::Document(child)) => with_parent(child, rest, f),
        _ => f(root, path),
    }
}

fn bad_value(message: impl Into<String>) -> DriverError {
    DriverError::Command { code: BAD_VALUE, message: message.into() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn person() -> Document {
        doc! {
            "_id": 1,
            "name": "Alice",
            "age": 30,
            "tags": ["red", "blue"],
            "address": { "city": "Lyon" },
        }
    }

    #[test]
    fn comparison_operators() {
        let d = person();
        assert!(matches(&d, &doc! { "age": { "$gte": 30 } }, false).unwrap());
        assert!(!matches(&d, &doc! { "age": { "$gt": 30 } }, false).unwrap());
        assert!(matches(&d, &doc! { "age": { "$lt": 30.5 } }, false).unwrap());
        assert!(!matches(&d, &doc! { "age": { "$lt": "zzz" } }, false).unwrap());
    }

    #[test]
    fn equality_traverses_arrays_and_paths() {
        let d = person();
        assert!(matches(&d, &doc! { "tags": { "$eq": "blue" } }, false).unwrap());
        assert!(matches(&d, &doc! { "address.city": "Lyon" }, false).unwrap());
        assert!(matches(&d, &doc! { "missing": { "$eq": null } }, false).unwrap());
        assert!(matches(&d, &doc! { "tags": { "$all": ["red", "blue"] } }, false).unwrap());
        assert!(!matches(&d, &doc! { "tags": { "$all": ["red", "green"] } }, false).unwrap());
    }

    #[test]
    fn connectives_and_membership() {
        let d = person();
        let filter = doc! { "$or": [{ "age": { "$eq": 1 } }, { "name": { "$in": ["Bob", "Alice"] } }] };
        assert!(matches(&d, &filter, false).unwrap());
        assert!(!matches(&d, &doc! { "$and": [{ "age": 30 }, { "name": { "$nin": ["Alice"] } }] }, false).unwrap());
        assert!(matches(&d, &doc! { "$and": [{}] }, false).unwrap());
    }

    #[test]
    fn regex_and_fold_case() {
        let d = person();
        assert!(matches(&d, &doc! { "name": { "$regex": "^al", "$options": "i" } }, false).unwrap());
        assert!(!matches(&d, &doc! { "name": { "$regex": "^al" } }, false).unwrap());
        assert!(matches(&d, &doc! { "name": { "$eq": "ALICE" } }, true).unwrap());
        assert!(!matches(&d, &doc! { "name": { "$eq": "ALICE" } }, false).unwrap());
    }

    #[test]
    fn text_search_matches_any_term() {
        let d = person();
        assert!(matches(&d, &doc! { "$text": { "$search": "paris lyon" } }, false).unwrap());
        assert!(!matches(&d, &doc! { "$text": { "$search": "paris" } }, false).unwrap());
    }

    #[test]
    fn geo_operators_are_unsupported() {
        let err = matches(&person(), &doc! { "loc": { "$geoWithin": { "$geometry": {} } } }, false);
        assert!(matches!(err, Err(DriverError::Unsupported(_))));
    }

    #[test]
    fn malformed_filters_are_command_errors() {
        let err = matches(&person(), &doc! { "age": { "$in": 5 } }, false).unwrap_err();
        assert!(matches!(err, DriverError::Command { code: 2, .. }));
        assert!(matches(&person(), &doc! { "$where": "1" }, false).is_err());
    }

    #[test]
    fn projection_keeps_id_unless_excluded() {
        let d = person();
        assert_eq!(project(&d, &doc! { "name": 1 }), doc! { "_id": 1, "name": "Alice" });
        assert_eq!(project(&d, &doc! { "name": 1, "_id": 0 }), doc! { "name": "Alice" });
    }

    #[test]
    fn sort_follows_directions() {
        let a = doc! { "n": 1, "s": "b" };
        let b = doc! { "n": 2, "s": "A" };
        assert_eq!(compare_docs(&a, &b, &doc! { "n": -1 }, false), Ordering::Greater);
        assert_eq!(compare_docs(&a, &b, &doc! { "s": 1 }, false), Ordering::Greater);
        assert_eq!(compare_docs(&a, &b, &doc! { "s": 1 }, true), Ordering::Greater);
        assert_eq!(compare_docs(&a, &b, &doc! { "missing": 1 }, false), Ordering::Equal);
    }

    #[test]
    fn update_operators() {
        let mut d = person();
        assert!(apply_update(&mut d, &doc! { "$set": { "address.zip": "69000" }, "$inc": { "age": 1 } }).unwrap());
        assert_eq!(d.get_document("address").unwrap().get_str("zip").unwrap(), "69000");
        assert_eq!(d.get_i32("age").unwrap(), 31);
        assert!(!apply_update(&mut d, &doc! { "$unset": { "nope": "" } }).unwrap());
        assert!(apply_update(&mut d, &doc! { "name": "x" }).is_err());
        assert!(matches!(
            apply_update(&mut d, &doc! { "$set": { "_id": 2 } }),
            Err(DriverError::Write { code: 66, .. })
        ));
    }
}
