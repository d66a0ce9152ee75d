//! # Filter, Sort and Pagination Engine
//!
//! Declarative record selection over JSON records:
//! - a predicate tree of field and logical conditions, compiled once and then
//!   evaluated per record
//! - stable multi-key sorting with null/missing values always last
//! - page or offset based slicing and a response envelope with counts
//! - a lossless flat query-parameter encoding of the options

use crate::etl::error::{EtlError, Result};
use crate::etl::utils::{compare_values, get_path, is_nullish, loose_eq, to_text};
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Comparison applied by a field condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Contains,
    Ncontains,
    Startswith,
    Endswith,
    Regex,
    Exists,
    Nexists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    And,
    Or,
    Not,
}

/// Leaf condition: compare the value at `field` (a dot path) with `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCondition {
    pub field: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Value,
}

/// Internal node combining child conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalCondition {
    pub operator: LogicalOperator,
    pub conditions: Vec<FilterCondition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FilterCondition {
    Field(FieldCondition),
    Logical(LogicalCondition),
}

impl FilterCondition {
    pub fn field(field: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        FilterCondition::Field(FieldCondition {
            field: field.into(),
            operator,
            value,
        })
    }

    pub fn and(conditions: Vec<FilterCondition>) -> Self {
        FilterCondition::Logical(LogicalCondition {
            operator: LogicalOperator::And,
            conditions,
        })
    }

    pub fn or(conditions: Vec<FilterCondition>) -> Self {
        FilterCondition::Logical(LogicalCondition {
            operator: LogicalOperator::Or,
            conditions,
        })
    }

    pub fn not(condition: FilterCondition) -> Self {
        FilterCondition::Logical(LogicalCondition {
            operator: LogicalOperator::Not,
            conditions: vec![condition],
        })
    }

    /// Check the tree's invariants and pre-build its regexes.
    pub fn compile(&self) -> Result<CompiledCondition> {
        match self {
            FilterCondition::Field(leaf) => {
                let pattern = match leaf.operator {
                    FilterOperator::Regex => {
                        let source = leaf.value.as_str().ok_or_else(|| {
                            EtlError::Configuration(format!(
                                "regex condition on '{}' needs a string pattern",
                                leaf.field
                            ))
                        })?;
                        let regex = Regex::new(source).map_err(|e| {
                            EtlError::Configuration(format!(
                                "invalid regex for '{}': {}",
                                leaf.field, e
                            ))
                        })?;
                        Some(regex)
                    }
                    _ => None,
                };
                Ok(CompiledCondition::Field {
                    condition: leaf.clone(),
                    pattern,
                })
            }
            FilterCondition::Logical(node) => {
                if node.operator == LogicalOperator::Not && node.conditions.len() != 1 {
                    return Err(EtlError::Configuration(format!(
                        "'not' condition requires exactly one child, got {}",
                        node.conditions.len()
                    )));
                }
                let children = node
                    .conditions
                    .iter()
                    .map(FilterCondition::compile)
                    .collect::<Result<Vec<_>>>()?;
                Ok(CompiledCondition::Logical {
                    operator: node.operator,
                    children,
                })
            }
        }
    }
}

/// A validated condition tree ready for repeated evaluation.
#[derive(Debug, Clone)]
pub enum CompiledCondition {
    Field {
        condition: FieldCondition,
        pattern: Option<Regex>,
    },
    Logical {
        operator: LogicalOperator,
        children: Vec<CompiledCondition>,
    },
}

impl CompiledCondition {
    pub fn matches(&self, record: &Value) -> bool {
        match self {
            CompiledCondition::Field { condition, pattern } => {
                evaluate_field(record, condition, pattern.as_ref())
            }
            CompiledCondition::Logical { operator, children } => match operator {
                LogicalOperator::And => children.iter().all(|c| c.matches(record)),
                LogicalOperator::Or => children.iter().any(|c| c.matches(record)),
                LogicalOperator::Not => !children.iter().all(|c| c.matches(record)),
            },
        }
    }
}

fn evaluate_field(record: &Value, condition: &FieldCondition, pattern: Option<&Regex>) -> bool {
    let actual = get_path(record, &condition.field);
    let expected = &condition.value;

    let actual = match actual {
        None | Some(Value::Null) => return condition.operator == FilterOperator::Nexists,
        Some(value) => value,
    };

    match condition.operator {
        FilterOperator::Eq => loose_eq(actual, expected),
        FilterOperator::Neq => !loose_eq(actual, expected),
        FilterOperator::Gt => compare_values(actual, expected) == Some(Ordering::Greater),
        FilterOperator::Gte => matches!(
            compare_values(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        FilterOperator::Lt => compare_values(actual, expected) == Some(Ordering::Less),
        FilterOperator::Lte => matches!(
            compare_values(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        FilterOperator::In => member_of(actual, expected),
        FilterOperator::Nin => !member_of(actual, expected),
        FilterOperator::Contains => contains(actual, expected),
        FilterOperator::Ncontains => !contains(actual, expected),
        FilterOperator::Startswith => match expected {
            Value::String(prefix) => scalar_text(actual).is_some_and(|s| s.starts_with(prefix.as_str())),
            _ => false,
        },
        FilterOperator::Endswith => match expected {
            Value::String(suffix) => scalar_text(actual).is_some_and(|s| s.ends_with(suffix.as_str())),
            _ => false,
        },
        FilterOperator::Regex => match (pattern, scalar_text(actual)) {
            (Some(regex), Some(text)) => regex.is_match(&text),
            _ => false,
        },
        FilterOperator::Exists => true,
        FilterOperator::Nexists => false,
    }
}

fn member_of(actual: &Value, candidates: &Value) -> bool {
    candidates
        .as_array()
        .is_some_and(|list| list.iter().any(|c| loose_eq(actual, c)))
}

fn contains(actual: &Value, needle: &Value) -> bool {
    match (actual, needle) {
        (Value::String(haystack), Value::String(part)) => haystack.contains(part.as_str()),
        (Value::Array(items), _) => items.iter().any(|item| loose_eq(item, needle)),
        _ => false,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => Some(to_text(value)),
        _ => None,
    }
}

/// Evaluate one condition against one record.
pub fn evaluate(record: &Value, condition: &FilterCondition) -> Result<bool> {
    Ok(condition.compile()?.matches(record))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// `page`/`page_size` (1-based) takes precedence over `offset`/`limit`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Pagination {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl Pagination {
    pub fn page(page: usize, page_size: usize) -> Self {
        Self {
            page: Some(page),
            page_size: Some(page_size),
            ..Default::default()
        }
    }

    pub fn offset(offset: usize, limit: Option<usize>) -> Self {
        Self {
            offset: Some(offset),
            limit,
            ..Default::default()
        }
    }

    fn page_based(&self) -> Option<(usize, usize)> {
        self.page.zip(self.page_size)
    }

    /// Half-open index range of the slice, clamped to `[0, len]`.
    pub fn bounds(&self, len: usize) -> (usize, usize) {
        let (start, end) = match self.page_based() {
            // Pages are 1-based; page 0 ends before the first record
            Some((0, _)) => (0, 0),
            Some((page, size)) => {
                let start = (page - 1).saturating_mul(size);
                (start, start.saturating_add(size))
            }
            None => {
                let start = self.offset.unwrap_or(0);
                let end = match self.limit {
                    Some(limit) => start.saturating_add(limit),
                    None => len,
                };
                (start, end)
            }
        };
        let start = start.min(len);
        (start, end.clamp(start, len))
    }
}

/// Everything [`apply`] can do to a dataset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterOptions {
    pub filter: Option<FilterCondition>,
    pub sort: Vec<SortSpec>,
    pub pagination: Option<Pagination>,
    pub include_count: bool,
}

impl FilterOptions {
    pub fn from_json(input: &Value) -> Result<Self> {
        serde_json::from_value(input.clone()).map_err(EtlError::from_serde)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_next_page: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_previous_page: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterResponse {
    pub data: Vec<Value>,
    pub meta: ResponseMeta,
}

/// Keep the records matching `condition`, preserving their order.
pub fn apply_filter(data: Vec<Value>, condition: &FilterCondition) -> Result<Vec<Value>> {
    let compiled = condition.compile()?;
    Ok(data.into_iter().filter(|r| compiled.matches(r)).collect())
}

/// Stable multi-key sort. Null or missing values sort last in either direction.
pub fn apply_sorting(mut data: Vec<Value>, sort: &[SortSpec]) -> Vec<Value> {
    if sort.is_empty() {
        return data;
    }
    data.sort_by(|a, b| compare_records(a, b, sort));
    data
}

fn compare_records(a: &Value, b: &Value, sort: &[SortSpec]) -> Ordering {
    for key in sort {
        let left = get_path(a, &key.field);
        let right = get_path(b, &key.field);
        let ordering = match (is_nullish(left), is_nullish(right)) {
            (true, true) => Ordering::Equal,
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            (false, false) => match (left, right) {
                (Some(l), Some(r)) => compare_values(l, r).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            },
        };
        let ordering = match key.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Slice out one page or offset window.
pub fn apply_pagination(data: Vec<Value>, pagination: &Pagination) -> Vec<Value> {
    let (start, end) = pagination.bounds(data.len());
    data.into_iter().skip(start).take(end - start).collect()
}

/// Filter, sort and paginate `data`, and describe the result.
pub fn apply(data: Vec<Value>, options: &FilterOptions) -> Result<FilterResponse> {
    let input_len = data.len();
    let data = match &options.filter {
        Some(condition) => apply_filter(data, condition)?,
        None => data,
    };
    let data = apply_sorting(data, &options.sort);
    let total = data.len();
    debug!("Filter kept {} of {} records", total, input_len);

    let data = match &options.pagination {
        Some(pagination) => apply_pagination(data, pagination),
        None => data,
    };

    let mut meta = ResponseMeta::default();
    if options.include_count {
        meta.total_count = Some(total);
        if let Some((page, page_size)) = options.pagination.as_ref().and_then(Pagination::page_based) {
            let page_count = if page_size == 0 {
                0
            } else {
                total.div_ceil(page_size)
            };
            meta.page = Some(page);
            meta.page_size = Some(page_size);
            meta.page_count = Some(page_count);
            meta.has_next_page = Some(page < page_count);
            meta.has_previous_page = Some(page > 1);
        }
    }

    Ok(FilterResponse { data, meta })
}

/// Flatten options into query-string parameters.
pub fn to_query_params(options: &FilterOptions) -> Result<BTreeMap<String, String>> {
    let mut params = BTreeMap::new();

    if let Some(condition) = &options.filter {
        let json = serde_json::to_string(condition)
            .map_err(|e| EtlError::Serialization(e.to_string()))?;
        params.insert("filter".to_string(), json);
    }

    if !options.sort.is_empty() {
        let sort = options
            .sort
            .iter()
            .map(|key| format!("{}:{}", escape_sort_field(&key.field), key.direction.as_str()))
            .collect::<Vec<_>>()
            .join(",");
        params.insert("sort".to_string(), sort);
    }

    if let Some(pagination) = &options.pagination {
        let fields = [
            ("page", pagination.page),
            ("pageSize", pagination.page_size),
            ("offset", pagination.offset),
            ("limit", pagination.limit),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                params.insert(key.to_string(), value.to_string());
            }
        }
    }

    params.insert("count".to_string(), options.include_count.to_string());
    Ok(params)
}

/// Rebuild options from query-string parameters.
pub fn from_query_params(params: &BTreeMap<String, String>) -> Result<FilterOptions> {
    let filter = match params.get("filter") {
        Some(json) => {
            let condition: FilterCondition =
                serde_json::from_str(json).map_err(EtlError::from_serde)?;
            condition.compile()?;
            Some(condition)
        }
        None => None,
    };

    let sort = match params.get("sort") {
        Some(text) => text
            .split(',')
            .filter(|part| !part.is_empty())
            .map(parse_sort_spec)
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };

    let number = |key: &str| -> Result<Option<usize>> {
        params
            .get(key)
            .map(|raw| {
                raw.parse::<usize>().map_err(|e| {
                    EtlError::Deserialization(format!("invalid {key} '{raw}': {e}"))
                })
            })
            .transpose()
    };
    let pagination = Pagination {
        page: number("page")?,
        page_size: number("pageSize")?,
        offset: number("offset")?,
        limit: number("limit")?,
    };
    let pagination = (pagination != Pagination::default()).then_some(pagination);

    let include_count = match params.get("count").map(String::as_str) {
        None | Some("false") => false,
        Some("true") => true,
        Some(other) => {
            return Err(EtlError::Deserialization(format!(
                "invalid count flag '{other}'"
            )));
        }
    };

    Ok(FilterOptions {
        filter,
        sort,
        pagination,
        include_count,
    })
}

fn parse_sort_spec(part: &str) -> Result<SortSpec> {
    let (field, direction) = match part.rsplit_once(':') {
        Some((field, "asc")) => (field, SortDirection::Asc),
        Some((field, "desc")) => (field, SortDirection::Desc),
        Some((_, other)) => {
            return Err(EtlError::Deserialization(format!(
                "invalid sort direction '{other}'"
            )));
        }
        None => (part, SortDirection::Asc),
    };
    Ok(SortSpec {
        field: unescape_sort_field(field)?,
        direction,
    })
}

// `,` separates sort keys, so it is percent-encoded inside field names
fn escape_sort_field(field: &str) -> String {
    field.replace('%', "%25").replace(',', "%2C")
}

fn unescape_sort_field(field: &str) -> Result<String> {
    let mut out = String::with_capacity(field.len());
    let mut rest = field;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest.get(pos + 1..pos + 3);
        match code {
            Some("25") => out.push('%'),
            Some(c) if c.eq_ignore_ascii_case("2C") => out.push(','),
            _ => {
                return Err(EtlError::Deserialization(format!(
                    "invalid escape in sort field '{field}'"
                )));
            }
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Ok(out)
}
