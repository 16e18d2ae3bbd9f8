//! Query wrapping and reply decoding for primary servers.
//!
//! Wrapped queries come back as a three item list
//! `(withinSizeLimit; runOutcome; consoleText)` where `runOutcome` is
//! `((1b;`); value)` on success or `((0b;`); message; backtrace)` on error.
//! The server tree query returns a dictionary
//! `namespace -> name -> (type; count; isTable; isPartitioned; names; isView)`.
//! Both shapes are decoded here so nothing past this module sees them.

use crate::error::QdeskError;
use crate::models::{EntityRecord, Value};

/// Evaluates the query text and tags the result as ok.
const EVAL_LAMBDA: &str = "{((1b;`);value x)}";

/// Identity query used to trigger a watch refresh.
pub const IDENTITY_QUERY: &str = "::";

/// Longest rendering of an unexpected reply kept in error messages.
const PREVIEW_LEN: usize = 200;

/// Returns every namespace's objects with their metadata.
pub const TREE_QUERY: &str = "/ qdesk - server tree\n\
{nsl:\".\",/:string `,key `;\n \
nsf:{[ns]\n  \
ff:{[viewset;v;fullname;sname]\n   \
findColArgs:{$[.Q.qt x; cols x; 100h~type x; (value x)1; `$()]};\n   \
safeCount:{$[.Q.qp x; $[`pn in key `.Q; {$[count x;sum x;-1]} .Q.pn y; -1]; count x]};\n   \
(@[type;v;0h]; .[safeCount;(v;fullname);-2]; @[.Q.qt;v;0b]; @[.Q.qp;v;0b]; @[findColArgs;v;()]; .[in;(sname;viewset);0b])};\n  \
vws:system \"b \",ns;\n  \
n:asc key[`$ns] except `;\n  \
fn:$[ns~enlist \".\"; n; ns,/:\".\",/:string n];\n  \
n!.'[ff[vws;;;]; flip (@[`$ns;n]; fn; n)]};\n \
(`$nsl)!@[nsf;;()!()] each nsl}[]";

/// Escape text so it can be embedded in a string literal.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}

/// Wrap a query so the reply reports size, outcome and console text.
///
/// `max_return_size` of zero means unbounded.
pub fn wrap_query(query: &str, max_return_size: u64) -> String {
    let max = if max_return_size == 0 {
        "0Wj".to_string()
    } else {
        format!("{max_return_size}j")
    };
    format!(
        "{{v:$[`trp in key .Q; .Q.trp[{EVAL_LAMBDA};x;{{((0b;`);x;$[4<count y; .Q.sbt -4 _ y; \"\"])}}]; {EVAL_LAMBDA} x]; \
a:{max}>@[-22!;v;{{0}}]; (a;$[a;v;0b];.Q.s v 1)}} \"{}\"",
        escape(query)
    )
}

/// Outcome of evaluating a wrapped query.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Evaluation succeeded.
    Ok(Value),
    /// Evaluation raised an error.
    Err {
        /// Error title.
        message: String,
        /// Backtrace with the wrapper's frames removed.
        stack_trace: Option<String>,
    },
    /// The value was larger than the configured limit.
    Oversized,
}

/// Decoded reply to a wrapped query.
#[derive(Debug, Clone, PartialEq)]
pub struct WrappedReply {
    pub within_size_limit: bool,
    pub outcome: RunOutcome,
    pub console_text: String,
}

fn preview(value: &Value) -> String {
    let mut line = value.to_string();
    if line.len() > PREVIEW_LEN {
        let mut end = PREVIEW_LEN;
        while !line.is_char_boundary(end) {
            end -= 1;
        }
        line.truncate(end);
        line.push_str("...");
    }
    line
}

/// Decode the reply to a query built by [`wrap_query`].
pub fn decode_wrapped_reply(reply: Value) -> Result<WrappedReply, QdeskError> {
    let items = match reply {
        Value::List(items) if items.len() == 3 => items,
        other => {
            return Err(QdeskError::protocol(format!(
                "Server sent an unwrapped reply: {}",
                preview(&other)
            )))
        }
    };

    let mut items = items.into_iter();
    let (Some(size_ok), Some(outcome), Some(console)) = (items.next(), items.next(), items.next())
    else {
        return Err(QdeskError::protocol("Wrapped reply is missing items"));
    };

    let within_size_limit = size_ok.as_bool().ok_or_else(|| {
        QdeskError::protocol(format!("Expected size flag, got {}", size_ok.type_name()))
    })?;

    let console_text = match console {
        Value::Chars(s) | Value::Symbol(s) => s,
        Value::Char(c) => c.to_string(),
        Value::List(v) if v.is_empty() => String::new(),
        other => {
            return Err(QdeskError::protocol(format!(
                "Expected console text, got {}",
                other.type_name()
            )))
        }
    };

    let outcome = if within_size_limit { decode_outcome(outcome)? } else { RunOutcome::Oversized };

    Ok(WrappedReply { within_size_limit, outcome, console_text })
}

/// The status item is `(1b;`)`; a bare boolean is accepted too.
fn run_status(status: &Value) -> Option<bool> {
    match status {
        Value::Bool(b) => Some(*b),
        Value::Bools(bs) => bs.first().copied(),
        Value::List(items) => items.first().and_then(Value::as_bool),
        _ => None,
    }
}

fn decode_outcome(outcome: Value) -> Result<RunOutcome, QdeskError> {
    let items = match outcome {
        Value::List(items) if items.len() >= 2 => items,
        other => {
            return Err(QdeskError::protocol(format!(
                "Expected run outcome, got {}",
                preview(&other)
            )))
        }
    };

    let ok = run_status(&items[0])
        .ok_or_else(|| QdeskError::protocol("Run outcome has no status flag"))?;

    let mut rest = items.into_iter().skip(1);
    if ok {
        return Ok(RunOutcome::Ok(rest.next().unwrap_or(Value::Null)));
    }

    let message = rest.next().and_then(|v| v.as_text()).unwrap_or_default();
    let stack_trace = rest
        .next()
        .and_then(|v| v.as_text())
        .map(|t| trim_stack_trace(&t))
        .filter(|t| !t.is_empty());
    Ok(RunOutcome::Err { message, stack_trace })
}

/// Drop the backtrace frames that belong to the wrapper itself.
pub fn trim_stack_trace(trace: &str) -> String {
    if let Some(p) = trace.find(EVAL_LAMBDA).filter(|p| *p > 0) {
        if let Some(q) = trace[..p].rfind('\n').filter(|q| *q > 0) {
            return trace[..q].to_string();
        }
    }
    trace.to_string()
}

/// One object in a namespace listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectReply {
    pub name: String,
    /// The record, or why it could not be read.
    pub record: Result<EntityRecord, String>,
}

/// One namespace in the server tree reply.
#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceReply {
    pub name: String,
    /// `None` when the namespace had the wrong shape.
    pub objects: Option<Vec<ObjectReply>>,
}

/// Decoded reply to [`TREE_QUERY`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetadataReply {
    pub namespaces: Vec<NamespaceReply>,
}

/// Decode the reply to [`TREE_QUERY`].
///
/// Only the outer dictionary must be well formed; malformed namespaces and
/// records are reported individually.
pub fn decode_metadata_reply(reply: Value) -> Result<MetadataReply, QdeskError> {
    let malformed = || QdeskError::protocol("Never received proper format reply from server.");

    let (keys, values) = match reply {
        Value::Dict(keys, values) => (*keys, *values),
        _ => return Err(malformed()),
    };
    let names = keys.as_symbols().ok_or_else(malformed)?.to_vec();
    let values = match values {
        Value::List(values) => values,
        _ => return Err(malformed()),
    };
    if names.len() != values.len() {
        return Err(malformed());
    }

    let namespaces = names
        .into_iter()
        .zip(values)
        .map(|(name, listing)| NamespaceReply { name, objects: decode_namespace(listing) })
        .collect();
    Ok(MetadataReply { namespaces })
}

fn decode_namespace(listing: Value) -> Option<Vec<ObjectReply>> {
    let (keys, values) = match listing {
        Value::Dict(keys, values) => (*keys, *values),
        _ => return None,
    };
    let names = keys.as_symbols()?.to_vec();
    let records = match values {
        Value::List(records) => records,
        other if other.is_empty() => Vec::new(),
        _ => return None,
    };
    if names.len() != records.len() {
        return None;
    }

    Some(
        names
            .into_iter()
            .zip(records)
            .map(|(name, record)| ObjectReply { name, record: decode_record(&record) })
            .collect(),
    )
}

fn decode_record(record: &Value) -> Result<EntityRecord, String> {
    let items = record
        .as_list()
        .ok_or_else(|| format!("expected a list, got {}", record.type_name()))?;
    if items.len() < 6 {
        return Err(format!("expected 6 fields, got {}", items.len()));
    }

    Ok(EntityRecord {
        type_code: items[0].as_i16().unwrap_or(0),
        row_count: items[1].as_i64().unwrap_or(-1),
        is_table: items[2].as_bool().unwrap_or(false),
        is_partitioned: items[3].as_bool().unwrap_or(false),
        names: items[4].as_symbols().map(<[String]>::to_vec),
        is_view: items[5].as_bool().unwrap_or(false),
    })
}
