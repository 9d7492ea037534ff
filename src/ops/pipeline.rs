//! Pipeline-stage operators.
//!
//! Each stage receives the current lazy sequence, its stage argument and
//! the evaluation context, and returns a new lazy sequence. Per-element
//! stages (`$match`, `$project`, `$unwind`, ...) stay streaming;
//! whole-collection stages (`$sort`, `$group`, `$bucket`, `$sample`,
//! ...) go through `transform`, which materializes their input once.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use rand::seq::SliceRandom;

use super::types_match;
use crate::aggregator::Aggregator;
use crate::codec;
use crate::error::{Error, Result};
use crate::eval::{Collation, EvalContext, compute_value};
use crate::lazy::Lazy;
use crate::path;
use crate::query::Query;
use crate::registry::{self, GroupFn, OperatorClass, OperatorImpl, Registry};
use crate::value::{Map, Value};

pub(crate) fn install(reg: &mut Registry) {
    let ops: &[(&str, fn(Lazy, &Value, &EvalContext) -> Result<Lazy>)] = &[
        ("$match", match_stage),
        ("$project", project),
        ("$addFields", add_fields),
        ("$set", add_fields),
        ("$unset", unset),
        ("$group", group),
        ("$sort", sort),
        ("$unwind", unwind),
        ("$skip", skip),
        ("$limit", limit),
        ("$count", count),
        ("$sample", sample),
        ("$sortByCount", sort_by_count),
        ("$replaceRoot", replace_root),
        ("$replaceWith", replace_with),
        ("$redact", redact),
        ("$bucket", bucket),
        ("$bucketAuto", bucket_auto),
        ("$lookup", lookup),
        ("$facet", facet),
        ("$out", out),
    ];
    for (name, f) in ops {
        reg.builtin(name, OperatorImpl::Pipeline(Arc::new(*f)));
    }
}

// ---- filtering & reshaping ----

fn match_stage(input: Lazy, args: &Value, ctx: &EvalContext) -> Result<Lazy> {
    let query = Query::with_config(args.clone(), ctx.config().clone())?;
    Ok(input.filter(move |doc| query.test(doc)))
}

/// Filter by an already-compiled query; used by the cursor, which does
/// not go through the stage registry.
pub(crate) fn filter_by_query(input: Lazy, query: Query) -> Lazy {
    input.filter(move |doc| query.test(doc))
}

/// How one projection key projects its path.
enum ProjField {
    Include,
    Exclude,
    Expr(Value),
    Op(String, Value),
}

pub(crate) struct Projection {
    fields: Vec<(String, ProjField)>,
    inclusion: bool,
    id_excluded: bool,
}

/// Compile a projection document: flatten nested plain objects into
/// dotted paths, classify each key, and reject inclusion/exclusion
/// mixing (the identity field excepted).
pub(crate) fn compile_projection(spec: &Value, id_key: &str) -> Result<Projection> {
    let obj = spec
        .as_object()
        .filter(|m| !m.is_empty())
        .ok_or_else(|| Error::Projection("projection must be a non-empty object".to_string()))?;
    let mut fields = Vec::new();
    flatten_projection("", obj, &mut fields)?;
    let mut has_include = false;
    let mut has_exclude = false;
    let mut id_excluded = false;
    for (path, field) in &fields {
        let is_id = path == id_key;
        match field {
            // Including the identity field also switches to inclusion
            // mode; excluding it is the one exclusion allowed there
            ProjField::Include | ProjField::Expr(_) => has_include = true,
            ProjField::Exclude if is_id => id_excluded = true,
            ProjField::Exclude => has_exclude = true,
            ProjField::Op(_, _) => {}
        }
    }
    if has_include && has_exclude {
        return Err(Error::Projection(
            "cannot mix inclusion and exclusion in projection".to_string(),
        ));
    }
    Ok(Projection {
        fields,
        inclusion: has_include,
        id_excluded,
    })
}

fn flatten_projection(
    prefix: &str,
    obj: &Map,
    out: &mut Vec<(String, ProjField)>,
) -> Result<()> {
    for (key, value) in obj {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        let field = match value {
            Value::Int(_) | Value::Float(_) | Value::Bool(_) => {
                if value.is_truthy() {
                    ProjField::Include
                } else {
                    ProjField::Exclude
                }
            }
            Value::Object(sub) => {
                let has_dollar = sub.keys().any(|k| k.starts_with('$'));
                if !has_dollar {
                    flatten_projection(&path, sub, out)?;
                    continue;
                }
                match sub.iter().next() {
                    Some((op, args))
                        if sub.len() == 1 && registry::lookup_projection(op).is_some() =>
                    {
                        ProjField::Op(op.clone(), args.clone())
                    }
                    _ => ProjField::Expr(value.clone()),
                }
            }
            _ => ProjField::Expr(value.clone()),
        };
        out.push((path, field));
    }
    Ok(())
}

/// Apply a compiled projection to one document.
pub(crate) fn project_doc(doc: &Value, proj: &Projection, ctx: &EvalContext) -> Result<Value> {
    let id_key = ctx.id_key();
    if proj.inclusion {
        let mut out = Value::Object(Map::new());
        // Identity passthrough unless explicitly excluded
        if !proj.id_excluded
            && !proj.fields.iter().any(|(p, _)| p == id_key)
            && let Some(obj) = doc.as_object()
            && let Some(id) = obj.get(id_key)
        {
            path::set_value(&mut out, id_key, id.clone());
        }
        for (sel, field) in &proj.fields {
            match field {
                ProjField::Include => include_path(doc, sel, &mut out),
                ProjField::Exclude => {}
                ProjField::Expr(expr) => {
                    let v = compute_value(doc, expr, None, ctx)?;
                    if !v.is_missing() {
                        path::set_value(&mut out, sel, v);
                    }
                }
                ProjField::Op(op, args) => {
                    apply_projection_op(doc, op, args, sel, ctx, &mut out)?;
                }
            }
        }
        Ok(out)
    } else {
        let mut out = doc.clone();
        for (sel, field) in &proj.fields {
            match field {
                ProjField::Exclude => path::remove_value(&mut out, sel),
                ProjField::Op(op, args) => {
                    apply_projection_op(doc, op, args, sel, ctx, &mut out)?;
                }
                ProjField::Include | ProjField::Expr(_) => {}
            }
        }
        Ok(out)
    }
}

/// Plain path inclusion. A trailing `.$` positional marker projects the
/// first element of the addressed array.
fn include_path(doc: &Value, sel: &str, out: &mut Value) {
    if let Some(base) = sel.strip_suffix(".$") {
        if let Value::Array(items) = path::resolve(doc, base)
            && let Some(first) = items.first()
        {
            path::set_value(out, base, Value::Array(vec![first.clone()]));
        }
        return;
    }
    let sub = path::resolve_obj(doc, sel, false);
    path::merge(out, sub);
}

fn apply_projection_op(
    doc: &Value,
    op: &str,
    args: &Value,
    sel: &str,
    ctx: &EvalContext,
    out: &mut Value,
) -> Result<()> {
    let f = registry::lookup_projection(op)
        .ok_or_else(|| Error::UnknownOperator(OperatorClass::Projection, op.to_string()))?;
    let v = f(doc, args, sel, ctx)?;
    if v.is_missing() {
        path::remove_value(out, sel);
    } else {
        path::set_value(out, sel, v);
    }
    Ok(())
}

fn project(input: Lazy, args: &Value, ctx: &EvalContext) -> Result<Lazy> {
    let proj = compile_projection(args, ctx.id_key())?;
    let ctx = ctx.clone();
    Ok(input.map(move |doc| project_doc(&doc, &proj, &ctx.for_doc(&doc))))
}

fn add_fields(input: Lazy, args: &Value, ctx: &EvalContext) -> Result<Lazy> {
    let spec = args
        .as_object()
        .cloned()
        .ok_or_else(|| Error::Pipeline("$addFields: expected an object argument".to_string()))?;
    let ctx = ctx.clone();
    Ok(input.map(move |doc| {
        let dctx = ctx.for_doc(&doc);
        let mut out = doc.clone();
        // Every expression sees the stage's input document; new fields
        // cannot reference each other
        for (sel, expr) in &spec {
            let v = compute_value(&doc, expr, None, &dctx)?;
            if v.is_missing() {
                path::remove_value(&mut out, sel);
            } else {
                path::set_value(&mut out, sel, v);
            }
        }
        Ok(out)
    }))
}

fn unset(input: Lazy, args: &Value, _ctx: &EvalContext) -> Result<Lazy> {
    let paths: Vec<String> = match args {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| Error::Pipeline("$unset: expected field path strings".to_string()))
            })
            .collect::<Result<_>>()?,
        _ => {
            return Err(Error::Pipeline(
                "$unset: expected a field path or array of field paths".to_string(),
            ));
        }
    };
    Ok(input.map(move |mut doc| {
        for sel in &paths {
            path::remove_value(&mut doc, sel);
        }
        Ok(doc)
    }))
}

// ---- grouping ----

type Accumulator = (String, GroupFn, Value);

fn compile_accumulators(obj: &Map, id_key: &str) -> Result<Vec<Accumulator>> {
    let mut fields = Vec::new();
    for (key, value) in obj {
        if key == id_key {
            continue;
        }
        let spec = value.as_object().filter(|m| m.len() == 1).ok_or_else(|| {
            Error::Pipeline(format!(
                "$group: field '{}' must be a single-accumulator object",
                key
            ))
        })?;
        for (op, expr) in spec {
            let f = registry::lookup_group(op)
                .ok_or_else(|| Error::UnknownOperator(OperatorClass::Group, op.clone()))?;
            fields.push((key.clone(), f, expr.clone()));
        }
    }
    Ok(fields)
}

/// Evaluate one accumulator over a group's member documents.
fn accumulate(members: &[Value], f: &GroupFn, expr: &Value, ctx: &EvalContext) -> Result<Value> {
    let mut values = Vec::with_capacity(members.len());
    for member in members {
        values.push(compute_value(member, expr, None, &ctx.for_doc(member))?);
    }
    f(&values)
}

fn group(input: Lazy, args: &Value, ctx: &EvalContext) -> Result<Lazy> {
    let obj = args
        .as_object()
        .ok_or_else(|| Error::Pipeline("$group: expected an object argument".to_string()))?;
    let id_key = ctx.id_key().to_string();
    let id_expr = obj
        .get(&id_key)
        .cloned()
        .ok_or_else(|| Error::Pipeline(format!("$group: missing '{}' expression", id_key)))?;
    let fields = compile_accumulators(obj, &id_key)?;
    let ctx = ctx.clone();
    Ok(input.transform(move |docs| {
        // Group keys hash via the canonical encoding; first-seen order
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, (Value, Vec<Value>)> = HashMap::new();
        for doc in docs {
            let key = compute_value(&doc, &id_expr, None, &ctx.for_doc(&doc))?;
            let hash = codec::encode(&key);
            groups
                .entry(hash.clone())
                .or_insert_with(|| {
                    order.push(hash.clone());
                    (key, Vec::new())
                })
                .1
                .push(doc);
        }
        let mut out = Vec::with_capacity(order.len());
        for hash in &order {
            let (key, members) = &groups[hash];
            let mut result = Map::new();
            // A missing group key drops the id field from the output
            if !key.is_missing() {
                result.insert(id_key.clone(), key.clone());
            }
            for (field, f, expr) in &fields {
                let v = accumulate(members, f, expr, &ctx)?;
                if !v.is_missing() {
                    result.insert(field.clone(), v);
                }
            }
            out.push(Value::Object(result));
        }
        Ok(out)
    }))
}

// ---- ordering ----

pub(crate) fn compile_sort_spec(args: &Value) -> Result<Vec<(String, i64)>> {
    let obj = args
        .as_object()
        .filter(|m| !m.is_empty())
        .ok_or_else(|| Error::Pipeline("$sort: expected a non-empty object argument".to_string()))?;
    let mut spec = Vec::with_capacity(obj.len());
    for (key, dir) in obj {
        match dir.as_i64() {
            Some(1) => spec.push((key.clone(), 1)),
            Some(-1) => spec.push((key.clone(), -1)),
            _ => {
                return Err(Error::Pipeline(format!(
                    "$sort: direction for '{}' must be 1 or -1",
                    key
                )));
            }
        }
    }
    Ok(spec)
}

fn collated_compare(a: &Value, b: &Value, collation: Option<&Collation>) -> Ordering {
    if let Some(c) = collation
        && c.strength <= 2
        && let (Value::String(x), Value::String(y)) = (a, b)
    {
        return x.to_lowercase().cmp(&y.to_lowercase());
    }
    a.compare(b)
}

/// Stable multi-key sort. For every key, documents whose key resolves to
/// null or missing sort before all others regardless of direction.
pub(crate) fn sort_docs(docs: &mut [Value], spec: &[(String, i64)], collation: Option<&Collation>) {
    docs.sort_by(|a, b| {
        for (key, dir) in spec {
            let va = path::resolve(a, key);
            let vb = path::resolve(b, key);
            let ord = match (va.is_nil(), vb.is_nil()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => {
                    let ord = collated_compare(&va, &vb, collation);
                    if *dir < 0 { ord.reverse() } else { ord }
                }
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

fn sort(input: Lazy, args: &Value, ctx: &EvalContext) -> Result<Lazy> {
    let spec = compile_sort_spec(args)?;
    let collation = ctx.collation().cloned();
    Ok(input.transform(move |mut docs| {
        sort_docs(&mut docs, &spec, collation.as_ref());
        Ok(docs)
    }))
}

fn sort_by_count(input: Lazy, args: &Value, ctx: &EvalContext) -> Result<Lazy> {
    let expr = args.clone();
    let id_key = ctx.id_key().to_string();
    let ctx = ctx.clone();
    Ok(input.transform(move |docs| {
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, (Value, i64)> = HashMap::new();
        for doc in docs {
            let key = compute_value(&doc, &expr, None, &ctx.for_doc(&doc))?;
            let hash = codec::encode(&key);
            groups
                .entry(hash.clone())
                .or_insert_with(|| {
                    order.push(hash.clone());
                    (key, 0)
                })
                .1 += 1;
        }
        let mut out: Vec<(Value, i64)> = order.iter().map(|h| groups[h].clone()).collect();
        out.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(out
            .into_iter()
            .map(|(key, n)| {
                Value::object([(id_key.as_str(), key), ("count", Value::Int(n))])
            })
            .collect())
    }))
}

// ---- expansion & slicing ----

fn unwind(input: Lazy, args: &Value, _ctx: &EvalContext) -> Result<Lazy> {
    let (sel, index_field, preserve) = match args {
        Value::String(s) => (s.clone(), None, false),
        Value::Object(obj) => {
            let sel = obj
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::Pipeline("$unwind: missing string 'path'".to_string()))?
                .to_string();
            let index_field = match obj.get("includeArrayIndex") {
                Some(Value::String(s)) => Some(s.clone()),
                None => None,
                Some(_) => {
                    return Err(Error::Pipeline(
                        "$unwind: includeArrayIndex must be a string".to_string(),
                    ));
                }
            };
            let preserve = obj
                .get("preserveNullAndEmptyArrays")
                .map(Value::is_truthy)
                .unwrap_or(false);
            (sel, index_field, preserve)
        }
        _ => {
            return Err(Error::Pipeline(
                "$unwind: expected a field path or options object".to_string(),
            ));
        }
    };
    let sel = sel
        .strip_prefix('$')
        .ok_or_else(|| Error::Pipeline("$unwind: path must start with $".to_string()))?
        .to_string();
    Ok(input.flat_map(move |doc| {
        let resolved = path::resolve(&doc, &sel);
        match resolved {
            Value::Array(items) => {
                if items.is_empty() {
                    if !preserve {
                        return Ok(vec![]);
                    }
                    let mut d = doc;
                    path::remove_value(&mut d, &sel);
                    if let Some(ix) = &index_field {
                        path::set_value(&mut d, ix, Value::Null);
                    }
                    return Ok(vec![d]);
                }
                Ok(items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| {
                        let mut d = doc.clone();
                        path::set_value(&mut d, &sel, item);
                        if let Some(ix) = &index_field {
                            path::set_value(&mut d, ix, Value::Int(i as i64));
                        }
                        d
                    })
                    .collect())
            }
            Value::Missing | Value::Null => {
                if !preserve {
                    return Ok(vec![]);
                }
                let mut d = doc;
                if let Some(ix) = &index_field {
                    path::set_value(&mut d, ix, Value::Null);
                }
                Ok(vec![d])
            }
            // A non-array value unwinds to itself
            _ => {
                let mut d = doc;
                if let Some(ix) = &index_field {
                    path::set_value(&mut d, ix, Value::Null);
                }
                Ok(vec![d])
            }
        }
    }))
}

fn stage_usize(args: &Value, op: &str) -> Result<usize> {
    args.as_i64()
        .filter(|n| *n >= 0)
        .map(|n| n as usize)
        .ok_or_else(|| Error::Pipeline(format!("{}: expected a non-negative integer", op)))
}

fn skip(input: Lazy, args: &Value, _ctx: &EvalContext) -> Result<Lazy> {
    Ok(input.drop(stage_usize(args, "$skip")?))
}

fn limit(input: Lazy, args: &Value, _ctx: &EvalContext) -> Result<Lazy> {
    Ok(input.take(stage_usize(args, "$limit")?))
}

fn count(input: Lazy, args: &Value, _ctx: &EvalContext) -> Result<Lazy> {
    let name = args
        .as_str()
        .filter(|s| !s.is_empty() && !s.starts_with('$') && !s.contains('.'))
        .ok_or_else(|| {
            Error::Pipeline("$count: expected a non-empty field name without '$' or '.'".to_string())
        })?
        .to_string();
    Ok(input.transform(move |docs| {
        Ok(vec![Value::object([(name.as_str(), Value::Int(docs.len() as i64))])])
    }))
}

fn sample(input: Lazy, args: &Value, _ctx: &EvalContext) -> Result<Lazy> {
    let size = match args {
        Value::Object(obj) => obj
            .get("size")
            .and_then(Value::as_i64)
            .filter(|n| *n >= 0)
            .ok_or_else(|| Error::Pipeline("$sample: missing non-negative 'size'".to_string()))?,
        _ => return Err(Error::Pipeline("$sample: expected {size: N}".to_string())),
    } as usize;
    Ok(input.transform(move |docs| {
        let mut rng = rand::thread_rng();
        Ok(docs.choose_multiple(&mut rng, size).cloned().collect())
    }))
}

// ---- root replacement & redaction ----

fn replace_new_root(input: Lazy, expr: Value, ctx: &EvalContext) -> Lazy {
    let ctx = ctx.clone();
    input.map(move |doc| {
        let v = compute_value(&doc, &expr, None, &ctx.for_doc(&doc))?;
        match v {
            Value::Object(_) => Ok(v),
            other => Err(Error::Type(format!(
                "$replaceRoot: new root must be an object, got {}",
                other.type_name()
            ))),
        }
    })
}

fn replace_root(input: Lazy, args: &Value, ctx: &EvalContext) -> Result<Lazy> {
    let expr = args
        .as_object()
        .and_then(|obj| obj.get("newRoot"))
        .cloned()
        .ok_or_else(|| Error::Pipeline("$replaceRoot: missing 'newRoot'".to_string()))?;
    Ok(replace_new_root(input, expr, ctx))
}

fn replace_with(input: Lazy, args: &Value, ctx: &EvalContext) -> Result<Lazy> {
    Ok(replace_new_root(input, args.clone(), ctx))
}

fn redact_value(doc: &Value, expr: &Value, ctx: &EvalContext) -> Result<Value> {
    let verdict = compute_value(doc, expr, None, &ctx.for_doc(doc))?;
    match verdict.as_str() {
        Some("$$KEEP") => Ok(doc.clone()),
        Some("$$PRUNE") => Ok(Value::Missing),
        Some("$$DESCEND") => {
            let Some(obj) = doc.as_object() else {
                return Ok(doc.clone());
            };
            let mut out = Map::new();
            for (k, v) in obj {
                let kept = match v {
                    Value::Object(_) => redact_value(v, expr, ctx)?,
                    Value::Array(items) => {
                        let mut arr = Vec::new();
                        for item in items {
                            let r = match item {
                                Value::Object(_) => redact_value(item, expr, ctx)?,
                                other => other.clone(),
                            };
                            if !r.is_missing() {
                                arr.push(r);
                            }
                        }
                        Value::Array(arr)
                    }
                    other => other.clone(),
                };
                if !kept.is_missing() {
                    out.insert(k.clone(), kept);
                }
            }
            Ok(Value::Object(out))
        }
        _ => Err(Error::Type(
            "$redact: expression must resolve to $$KEEP, $$PRUNE or $$DESCEND".to_string(),
        )),
    }
}

fn redact(input: Lazy, args: &Value, ctx: &EvalContext) -> Result<Lazy> {
    let expr = args.clone();
    let ctx = ctx.clone();
    Ok(input
        .map(move |doc| redact_value(&doc, &expr, &ctx))
        .filter(|doc| Ok(!doc.is_missing())))
}

// ---- bucketing ----

/// Evaluate a `$bucket`/`$bucketAuto` output spec over a bucket's
/// members; defaults to `{count: N}`.
fn bucket_output(members: &[Value], output: Option<&Map>, ctx: &EvalContext) -> Result<Map> {
    let mut result = Map::new();
    match output {
        None => {
            result.insert("count".to_string(), Value::Int(members.len() as i64));
        }
        Some(spec) => {
            let fields = compile_accumulators(spec, "")?;
            for (field, f, expr) in &fields {
                let v = accumulate(members, f, expr, ctx)?;
                if !v.is_missing() {
                    result.insert(field.clone(), v);
                }
            }
        }
    }
    Ok(result)
}

fn bucket(input: Lazy, args: &Value, ctx: &EvalContext) -> Result<Lazy> {
    let obj = args
        .as_object()
        .ok_or_else(|| Error::Pipeline("$bucket: expected an object argument".to_string()))?;
    let group_by = obj
        .get("groupBy")
        .cloned()
        .ok_or_else(|| Error::Pipeline("$bucket: missing 'groupBy'".to_string()))?;
    let boundaries = obj
        .get("boundaries")
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| Error::Pipeline("$bucket: missing 'boundaries' array".to_string()))?;
    if boundaries.len() < 2 {
        return Err(Error::Pipeline("$bucket: at least 2 boundaries required".to_string()));
    }
    for pair in boundaries.windows(2) {
        if !types_match(&pair[0], &pair[1]) {
            return Err(Error::Pipeline(
                "$bucket: boundaries must share one type".to_string(),
            ));
        }
        if pair[0].compare(&pair[1]) != Ordering::Less {
            return Err(Error::Pipeline(
                "$bucket: boundaries must be strictly ascending".to_string(),
            ));
        }
    }
    let default = obj.get("default").cloned();
    let output = obj.get("output").and_then(Value::as_object).cloned();
    let id_key = ctx.id_key().to_string();
    let ctx = ctx.clone();
    Ok(input.transform(move |docs| {
        let mut buckets: Vec<Vec<Value>> = vec![Vec::new(); boundaries.len() - 1];
        let mut default_bucket: Vec<Value> = Vec::new();
        for doc in docs {
            let key = compute_value(&doc, &group_by, None, &ctx.for_doc(&doc))?;
            let slot = if types_match(&key, &boundaries[0]) {
                boundaries
                    .windows(2)
                    .position(|pair| {
                        key.compare(&pair[0]) != Ordering::Less
                            && key.compare(&pair[1]) == Ordering::Less
                    })
            } else {
                None
            };
            match slot {
                Some(i) => buckets[i].push(doc),
                None => {
                    if default.is_none() {
                        return Err(Error::Pipeline(
                            "$bucket: value outside boundaries and no default given".to_string(),
                        ));
                    }
                    default_bucket.push(doc);
                }
            }
        }
        let mut out = Vec::new();
        for (i, members) in buckets.iter().enumerate() {
            if members.is_empty() {
                continue;
            }
            let mut result = Map::new();
            result.insert(id_key.clone(), boundaries[i].clone());
            result.extend(bucket_output(members, output.as_ref(), &ctx)?);
            out.push(Value::Object(result));
        }
        if let Some(default_id) = &default
            && !default_bucket.is_empty()
        {
            let mut result = Map::new();
            result.insert(id_key.clone(), default_id.clone());
            result.extend(bucket_output(&default_bucket, output.as_ref(), &ctx)?);
            out.push(Value::Object(result));
        }
        Ok(out)
    }))
}

fn bucket_auto(input: Lazy, args: &Value, ctx: &EvalContext) -> Result<Lazy> {
    let obj = args
        .as_object()
        .ok_or_else(|| Error::Pipeline("$bucketAuto: expected an object argument".to_string()))?;
    let group_by = obj
        .get("groupBy")
        .cloned()
        .ok_or_else(|| Error::Pipeline("$bucketAuto: missing 'groupBy'".to_string()))?;
    let bucket_count = obj
        .get("buckets")
        .and_then(Value::as_i64)
        .filter(|n| *n > 0)
        .ok_or_else(|| Error::Pipeline("$bucketAuto: 'buckets' must be a positive integer".to_string()))?
        as usize;
    let output = obj.get("output").and_then(Value::as_object).cloned();
    let id_key = ctx.id_key().to_string();
    let ctx = ctx.clone();
    Ok(input.transform(move |docs| {
        if docs.is_empty() {
            return Ok(vec![]);
        }
        let mut keyed: Vec<(Value, Value)> = Vec::with_capacity(docs.len());
        for doc in docs {
            let key = compute_value(&doc, &group_by, None, &ctx.for_doc(&doc))?;
            keyed.push((key, doc));
        }
        keyed.sort_by(|a, b| a.0.compare(&b.0));
        let approx = (keyed.len() as f64 / bucket_count as f64).round().max(1.0) as usize;
        // Runs of equal keys always land in the same bucket, so a bucket
        // can grow past the approximate size
        let mut partitions: Vec<Vec<(Value, Value)>> = Vec::new();
        let mut current: Vec<(Value, Value)> = Vec::new();
        for entry in keyed {
            let oversized = current.len() >= approx
                && partitions.len() + 1 < bucket_count
                && current
                    .last()
                    .is_none_or(|last| last.0.compare(&entry.0) != Ordering::Equal);
            if oversized {
                partitions.push(std::mem::take(&mut current));
            }
            current.push(entry);
        }
        if !current.is_empty() {
            partitions.push(current);
        }
        let mut out = Vec::with_capacity(partitions.len());
        let mut prev_max: Option<Value> = None;
        for (i, partition) in partitions.iter().enumerate() {
            let first_key = partition[0].0.clone();
            let last_key = partition[partition.len() - 1].0.clone();
            // The lower boundary carries over from the previous bucket
            let min = prev_max.take().unwrap_or(first_key);
            let max = match partitions.get(i + 1) {
                Some(next) => next[0].0.clone(),
                None => last_key,
            };
            prev_max = Some(max.clone());
            let members: Vec<Value> = partition.iter().map(|(_, d)| d.clone()).collect();
            let mut result = Map::new();
            result.insert(
                id_key.clone(),
                Value::object([("min", min), ("max", max)]),
            );
            result.extend(bucket_output(&members, output.as_ref(), &ctx)?);
            out.push(Value::Object(result));
        }
        Ok(out)
    }))
}

// ---- joins & facets ----

fn lookup(input: Lazy, args: &Value, _ctx: &EvalContext) -> Result<Lazy> {
    let obj = args
        .as_object()
        .ok_or_else(|| Error::Pipeline("$lookup: expected an object argument".to_string()))?;
    let from = obj
        .get("from")
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| Error::Pipeline("$lookup: 'from' must be an embedded array collection".to_string()))?;
    let get_str = |key: &str| -> Result<String> {
        obj.get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::Pipeline(format!("$lookup: missing string '{}'", key)))
    };
    let local_field = get_str("localField")?;
    let foreign_field = get_str("foreignField")?;
    let as_field = get_str("as")?;
    // Hash the foreign collection by its join key; missing keys join as
    // null
    let mut hashed: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, doc) in from.iter().enumerate() {
        let mut key = path::resolve(doc, &foreign_field);
        if key.is_missing() {
            key = Value::Null;
        }
        hashed.entry(codec::encode(&key)).or_default().push(i);
    }
    Ok(input.map(move |mut doc| {
        let mut local = path::resolve(&doc, &local_field);
        if local.is_missing() {
            local = Value::Null;
        }
        let mut keys = vec![codec::encode(&local)];
        if let Value::Array(items) = &local {
            keys.extend(items.iter().map(codec::encode));
        }
        let mut indices: Vec<usize> = keys
            .iter()
            .filter_map(|k| hashed.get(k))
            .flatten()
            .copied()
            .collect();
        indices.sort_unstable();
        indices.dedup();
        let matches: Vec<Value> = indices.into_iter().map(|i| from[i].clone()).collect();
        path::set_value(&mut doc, &as_field, Value::Array(matches));
        Ok(doc)
    }))
}

fn facet(input: Lazy, args: &Value, ctx: &EvalContext) -> Result<Lazy> {
    let spec = args
        .as_object()
        .filter(|m| !m.is_empty())
        .cloned()
        .ok_or_else(|| Error::Pipeline("$facet: expected a non-empty object argument".to_string()))?;
    let mut facets: Vec<(String, Aggregator)> = Vec::with_capacity(spec.len());
    for (name, stages) in &spec {
        let stages = stages
            .as_array()
            .cloned()
            .ok_or_else(|| Error::Pipeline(format!("$facet: '{}' must be a pipeline array", name)))?;
        facets.push((name.clone(), Aggregator::for_context(stages, ctx)));
    }
    Ok(input.transform(move |docs| {
        let mut result = Map::new();
        for (name, aggregator) in &facets {
            result.insert(name.clone(), Value::Array(aggregator.run(&docs, None)?));
        }
        Ok(vec![Value::Object(result)])
    }))
}

// ---- output ----

fn out(input: Lazy, _args: &Value, ctx: &EvalContext) -> Result<Lazy> {
    let sink = ctx
        .sink()
        .cloned()
        .ok_or_else(|| {
            Error::Pipeline("$out: no sink configured; set AggregateOptions::sink".to_string())
        })?;
    Ok(input.map(move |doc| {
        sink.borrow_mut().push(doc.clone());
        Ok(doc)
    }))
}
