use std::fmt;

use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};

use super::errors::{FilterError, FilterResult};
use super::path::FieldPath;
use super::QueryContext;

/// A compiled custom operator: document in, match out.
pub struct Predicate {
    name: String,
    test: Box<dyn Fn(&Value) -> FilterResult<bool> + Send + Sync>,
}

impl Predicate {
    pub fn new<F>(name: &str, test: F) -> Self
    where
        F: Fn(&Value) -> FilterResult<bool> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            test: Box::new(test),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn test(&self, doc: &Value) -> FilterResult<bool> {
        (self.test)(doc)
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Predicate").field(&self.name).finish()
    }
}

/// A compiled filter expression tree.
#[derive(Debug)]
pub enum Matcher {
    /// `$and`, and the implicit conjunction of a filter's keys
    All(Vec<Matcher>),
    /// `$or`
    Any(Vec<Matcher>),
    /// `$nor`
    Nor(Vec<Matcher>),
    /// Top-level `$not`
    Not(Box<Matcher>),
    /// Every op must hold for the value at the path
    Field(FieldPath, Vec<FieldOp>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonType {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl JsonType {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "null" => Some(JsonType::Null),
            "bool" | "boolean" => Some(JsonType::Bool),
            "number" | "int" | "long" | "double" | "decimal" => Some(JsonType::Number),
            "string" => Some(JsonType::String),
            "array" => Some(JsonType::Array),
            "object" => Some(JsonType::Object),
            _ => None,
        }
    }

    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => JsonType::Null,
            Value::Bool(_) => JsonType::Bool,
            Value::Number(_) => JsonType::Number,
            Value::String(_) => JsonType::String,
            Value::Array(_) => JsonType::Array,
            Value::Object(_) => JsonType::Object,
        }
    }
}

/// One operator applied to a field.
#[derive(Debug)]
pub enum FieldOp {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Type(JsonType),
    Regex(Regex),
    Size(usize),
    All(Vec<Value>),
    ElemMatch(ElemMatch),
    Not(Vec<FieldOp>),
    Custom(Predicate),
}

#[derive(Debug)]
pub enum ElemMatch {
    /// Elements are documents matched by a sub-filter
    Document(Box<Matcher>),
    /// Elements are values tested by operators
    Value(Vec<FieldOp>),
}

/// Compile a filter document.
pub fn compile(filter: &Value, ctx: &QueryContext) -> FilterResult<Matcher> {
    let Value::Object(map) = filter else {
        return Err(FilterError::malformed(format!(
            "filter must be an object, got {filter}"
        )));
    };

    let mut clauses = Vec::with_capacity(map.len());
    for (key, value) in map {
        let clause = match key.as_str() {
            "$and" => Matcher::All(compile_list(key, value, ctx)?),
            "$or" => Matcher::Any(compile_list(key, value, ctx)?),
            "$nor" => Matcher::Nor(compile_list(key, value, ctx)?),
            "$not" => Matcher::Not(Box::new(compile(value, ctx)?)),
            "$where" => {
                return Err(FilterError::malformed("$where is not supported"));
            }
            op if op.starts_with('$') => {
                return Err(FilterError::UnknownOperator(op.to_string()));
            }
            field => {
                let path = FieldPath::parse(field);
                let ops = compile_field(&path, value, ctx)?;
                Matcher::Field(path, ops)
            }
        };
        clauses.push(clause);
    }

    if clauses.len() == 1 {
        if let Some(only) = clauses.pop() {
            return Ok(only);
        }
    }
    Ok(Matcher::All(clauses))
}

fn compile_list(op: &str, value: &Value, ctx: &QueryContext) -> FilterResult<Vec<Matcher>> {
    match value {
        Value::Array(items) if !items.is_empty() => {
            items.iter().map(|item| compile(item, ctx)).collect()
        }
        _ => Err(FilterError::malformed(format!(
            "{op} expects a non-empty array of filters"
        ))),
    }
}

/// Whether `value` is an operator expression (`{ "$op": ... }`).
fn is_operator_object(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}

fn compile_field(path: &FieldPath, value: &Value, ctx: &QueryContext) -> FilterResult<Vec<FieldOp>> {
    match value {
        Value::Object(map) if is_operator_object(map) => compile_ops(path, map, ctx),
        Value::Object(map) if map.keys().any(|k| k.starts_with('$')) => {
            Err(FilterError::malformed(format!(
                "'{path}' mixes operators and fields"
            )))
        }
        other => Ok(vec![FieldOp::Eq(other.clone())]),
    }
}

fn compile_ops(
    path: &FieldPath,
    map: &Map<String, Value>,
    ctx: &QueryContext,
) -> FilterResult<Vec<FieldOp>> {
    let mut ops = Vec::with_capacity(map.len());

    for (name, config) in map {
        let op = match name.as_str() {
            "$eq" => FieldOp::Eq(config.clone()),
            "$ne" => FieldOp::Ne(config.clone()),
            "$gt" => FieldOp::Gt(config.clone()),
            "$gte" => FieldOp::Gte(config.clone()),
            "$lt" => FieldOp::Lt(config.clone()),
            "$lte" => FieldOp::Lte(config.clone()),
            "$in" => FieldOp::In(expect_array(name, config)?),
            "$nin" => FieldOp::Nin(expect_array(name, config)?),
            "$all" => FieldOp::All(expect_array(name, config)?),
            "$exists" => match config {
                Value::Bool(flag) => FieldOp::Exists(*flag),
                _ => return Err(FilterError::config(name, "expected a boolean")),
            },
            "$type" => {
                let parsed = config.as_str().and_then(JsonType::parse);
                match parsed {
                    Some(ty) => FieldOp::Type(ty),
                    None => {
                        return Err(FilterError::config(
                            name,
                            format!("unknown type {config}"),
                        ))
                    }
                }
            }
            "$size" => match config.as_u64() {
                Some(size) => FieldOp::Size(size as usize),
                None => {
                    return Err(FilterError::config(name, "expected a non-negative integer"))
                }
            },
            "$regex" => FieldOp::Regex(build_regex(config, map.get("$options"))?),
            "$options" => {
                if map.contains_key("$regex") {
                    continue;
                }
                return Err(FilterError::malformed("$options without $regex"));
            }
            "$elemMatch" => FieldOp::ElemMatch(compile_elem_match(config, ctx)?),
            "$not" => match config {
                Value::Object(inner) if is_operator_object(inner) => {
                    FieldOp::Not(compile_ops(path, inner, ctx)?)
                }
                _ => {
                    return Err(FilterError::config(
                        name,
                        "expected an operator expression",
                    ))
                }
            },
            custom => match ctx.operators().get(custom) {
                Some(factory) => FieldOp::Custom(factory(path, config, ctx)?),
                None => return Err(FilterError::UnknownOperator(custom.to_string())),
            },
        };
        ops.push(op);
    }

    Ok(ops)
}

fn expect_array(op: &str, config: &Value) -> FilterResult<Vec<Value>> {
    match config {
        Value::Array(items) => Ok(items.clone()),
        _ => Err(FilterError::config(op, "expected an array")),
    }
}

fn build_regex(pattern: &Value, options: Option<&Value>) -> FilterResult<Regex> {
    let Some(pattern) = pattern.as_str() else {
        return Err(FilterError::config("$regex", "expected a string pattern"));
    };

    let mut builder = RegexBuilder::new(pattern);
    if let Some(options) = options {
        let Some(flags) = options.as_str() else {
            return Err(FilterError::config("$options", "expected a string"));
        };
        for flag in flags.chars() {
            match flag {
                'i' => builder.case_insensitive(true),
                'm' => builder.multi_line(true),
                's' => builder.dot_matches_new_line(true),
                'x' => builder.ignore_whitespace(true),
                other => {
                    return Err(FilterError::config(
                        "$options",
                        format!("unsupported flag '{other}'"),
                    ))
                }
            };
        }
    }

    Ok(builder.build()?)
}

fn compile_elem_match(config: &Value, ctx: &QueryContext) -> FilterResult<ElemMatch> {
    let Value::Object(map) = config else {
        return Err(FilterError::config("$elemMatch", "expected an object"));
    };

    let logical = map
        .keys()
        .any(|k| matches!(k.as_str(), "$and" | "$or" | "$nor"));

    if is_operator_object(map) && !logical {
        Ok(ElemMatch::Value(compile_ops(&FieldPath::root(), map, ctx)?))
    } else {
        Ok(ElemMatch::Document(Box::new(compile(config, ctx)?)))
    }
}
