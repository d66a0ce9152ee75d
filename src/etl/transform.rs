//! # Transform Primitives
//!
//! Ready-made transformers for batch pipelines (`Vec<T>` in, `Vec<R>` out),
//! record field edits on single JSON objects, and CSV encoding.

use crate::etl::error::{EtlError, Result};
use crate::etl::pipeline::{FnTransformer, Transformer};
use crate::etl::utils::to_text;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;

type Batch<T, R> = FnTransformer<Box<dyn Fn(Vec<T>) -> Result<Vec<R>> + Send + Sync>>;

fn batch<T, R, F>(f: F) -> Batch<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(Vec<T>) -> Result<Vec<R>> + Send + Sync + 'static,
{
    FnTransformer(Box::new(f))
}

/// Apply `f` to every element.
pub fn map<T, R, F>(f: F) -> Batch<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> R + Send + Sync + 'static,
{
    batch(move |items: Vec<T>| Ok(items.into_iter().map(&f).collect()))
}

/// Apply a fallible `f` to every element; the first error aborts the batch.
pub fn try_map<T, R, F>(f: F) -> Batch<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Result<R> + Send + Sync + 'static,
{
    batch(move |items: Vec<T>| items.into_iter().map(&f).collect())
}

/// Run a transformer over every element, one at a time, in order.
pub fn each<T, R, S>(stage: S) -> Each<T, R, S>
where
    S: Transformer<T, R>,
    T: Send + 'static,
    R: Send + 'static,
{
    Each {
        stage,
        _types: PhantomData,
    }
}

pub struct Each<T, R, S> {
    stage: S,
    _types: PhantomData<fn(T) -> R>,
}

#[async_trait]
impl<T, R, S> Transformer<Vec<T>, Vec<R>> for Each<T, R, S>
where
    T: Send + 'static,
    R: Send + 'static,
    S: Transformer<T, R>,
{
    async fn transform(&self, input: Vec<T>) -> Result<Vec<R>> {
        let mut output = Vec::with_capacity(input.len());
        for item in input {
            output.push(self.stage.transform(item).await?);
        }
        Ok(output)
    }
}

/// Keep the elements matching `predicate`.
pub fn filter<T, P>(predicate: P) -> Batch<T, T>
where
    T: Send + 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    batch(move |items: Vec<T>| Ok(items.into_iter().filter(|item| predicate(item)).collect()))
}

/// Group elements by key; groups appear in first-seen key order.
pub fn group_by<T, K>(
    key: K,
) -> FnTransformer<impl Fn(Vec<T>) -> Result<Vec<(String, Vec<T>)>> + Send + Sync>
where
    K: Fn(&T) -> String + Send + Sync + 'static,
{
    FnTransformer(move |items: Vec<T>| {
        let mut groups: Vec<(String, Vec<T>)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for item in items {
            let k = key(&item);
            match index.get(&k) {
                Some(&i) => groups[i].1.push(item),
                None => {
                    index.insert(k.clone(), groups.len());
                    groups.push((k, vec![item]));
                }
            }
        }
        Ok(groups)
    })
}

/// Concatenate nested batches.
pub fn flatten<T: Send + 'static>() -> Batch<Vec<T>, T> {
    batch(|items: Vec<Vec<T>>| Ok(items.into_iter().flatten().collect()))
}

/// Drop repeated elements, keeping the first occurrence.
pub fn distinct<T>() -> Batch<T, T>
where
    T: PartialEq + Send + 'static,
{
    batch(|items: Vec<T>| {
        let mut unique: Vec<T> = Vec::with_capacity(items.len());
        for item in items {
            if !unique.contains(&item) {
                unique.push(item);
            }
        }
        Ok(unique)
    })
}

/// Drop elements whose key was already seen, keeping the first occurrence.
pub fn distinct_by<T, K>(key: K) -> Batch<T, T>
where
    T: Send + 'static,
    K: Fn(&T) -> String + Send + Sync + 'static,
{
    batch(move |items: Vec<T>| {
        let mut seen = HashSet::new();
        Ok(items.into_iter().filter(|item| seen.insert(key(item))).collect())
    })
}

/// Stable sort with a caller comparator.
pub fn sort_by<T, C>(compare: C) -> Batch<T, T>
where
    T: Send + 'static,
    C: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
{
    batch(move |mut items: Vec<T>| {
        items.sort_by(|a, b| compare(a, b));
        Ok(items)
    })
}

/// Keep at most `count` leading elements.
pub fn limit<T: Send + 'static>(count: usize) -> Batch<T, T> {
    batch(move |items: Vec<T>| Ok(items.into_iter().take(count).collect()))
}

/// Drop `count` leading elements.
pub fn skip<T: Send + 'static>(count: usize) -> Batch<T, T> {
    batch(move |items: Vec<T>| Ok(items.into_iter().skip(count).collect()))
}

pub fn take_while<T, P>(predicate: P) -> Batch<T, T>
where
    T: Send + 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    batch(move |items: Vec<T>| Ok(items.into_iter().take_while(|item| predicate(item)).collect()))
}

pub fn skip_while<T, P>(predicate: P) -> Batch<T, T>
where
    T: Send + 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    batch(move |items: Vec<T>| Ok(items.into_iter().skip_while(|item| predicate(item)).collect()))
}

type Record = FnTransformer<Box<dyn Fn(Value) -> Result<Value> + Send + Sync>>;

/// Set `name` on an object record to a value computed from the record.
pub fn add_field<F>(name: impl Into<String>, compute: F) -> Record
where
    F: Fn(&Value) -> Value + Send + Sync + 'static,
{
    let name = name.into();
    FnTransformer(Box::new(move |mut record: Value| {
        let value = compute(&record);
        if let Value::Object(map) = &mut record {
            map.insert(name.clone(), value);
        }
        Ok(record)
    }))
}

/// Remove the named fields from an object record.
pub fn remove_fields<S: AsRef<str>>(names: &[S]) -> Record {
    let names: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();
    FnTransformer(Box::new(move |mut record: Value| {
        if let Value::Object(map) = &mut record {
            for name in &names {
                map.remove(name);
            }
        }
        Ok(record)
    }))
}

/// Move the value of `from` to `to`. Records without `from` pass through.
pub fn rename_field(from: impl Into<String>, to: impl Into<String>) -> Record {
    let (from, to) = (from.into(), to.into());
    FnTransformer(Box::new(move |mut record: Value| {
        if let Value::Object(map) = &mut record {
            if let Some(value) = map.remove(&from) {
                map.insert(to.clone(), value);
            }
        }
        Ok(record)
    }))
}

/// CSV layout options
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CsvOptions {
    /// Single-byte field separator, given as a one-character string in JSON
    #[serde(deserialize_with = "single_byte")]
    pub delimiter: u8,
    /// Whether the first row names the columns
    pub header: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            header: true,
        }
    }
}

impl CsvOptions {
    pub fn from_json(input: &Value) -> Result<Self> {
        serde_json::from_value(input.clone()).map_err(EtlError::from_serde)
    }
}

fn single_byte<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u8, D::Error> {
    let text = String::deserialize(deserializer)?;
    match text.as_bytes() {
        [byte] => Ok(*byte),
        _ => Err(serde::de::Error::custom(format!(
            "delimiter must be a single byte, got '{text}'"
        ))),
    }
}

/// Encode object records as CSV.
///
/// Columns are the union of record keys in first-seen order. `null` and
/// missing fields become empty cells; nested values are written as JSON.
pub fn to_csv(records: &[Value], options: &CsvOptions) -> Result<String> {
    let mut columns: Vec<String> = Vec::new();
    for record in records {
        if let Value::Object(map) = record {
            for key in map.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
    }

    if columns.is_empty() {
        return Ok(String::new());
    }

    let mut writer = csv::WriterBuilder::new()
        .delimiter(options.delimiter)
        .from_writer(Vec::new());

    if options.header {
        writer
            .write_record(&columns)
            .map_err(|e| EtlError::Serialization(e.to_string()))?;
    }
    for record in records {
        let row = columns.iter().map(|column| match record.get(column) {
            None | Some(Value::Null) => String::new(),
            Some(value) => to_text(value),
        });
        writer
            .write_record(row)
            .map_err(|e| EtlError::Serialization(e.to_string()))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| EtlError::Serialization(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| EtlError::Serialization(e.to_string()))
}

/// Decode CSV into object records with string values.
///
/// Without a header row the columns are keyed `"0"`, `"1"`, ...
pub fn from_csv(text: &str, options: &CsvOptions) -> Result<Vec<Value>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(options.delimiter)
        .has_headers(options.header)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Option<Vec<String>> = if options.header {
        let row = reader
            .headers()
            .map_err(|e| EtlError::Deserialization(e.to_string()))?;
        Some(row.iter().map(str::to_string).collect())
    } else {
        None
    };

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| EtlError::Deserialization(e.to_string()))?;
        let mut record = Map::new();
        for (i, cell) in row.iter().enumerate() {
            let key = match &headers {
                Some(names) => match names.get(i) {
                    Some(name) => name.clone(),
                    None => i.to_string(),
                },
                None => i.to_string(),
            };
            record.insert(key, Value::String(cell.to_string()));
        }
        records.push(Value::Object(record));
    }
    Ok(records)
}
