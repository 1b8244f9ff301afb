//! Value lists: explicit `[a,b,c]` lists and `[start:end:+k]` /
//! `[start:end:*k]` ranges.

use serde::Serialize;

use crate::error::{ExpandError, ExpandResult};

/// Marker token flagging a list as the thread-count axis.
pub const THREAD_MARKER: char = '$';

/// An ordered list of values for one sweep axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValueList {
    pub values: Vec<String>,
    /// Set when the source list carried the thread-count marker.
    pub thread_axis: bool,
}

/// Range step rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Add(u64),
    Mul(u64),
}

impl ValueList {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Parse the text between a pair of brackets into a value list.
pub fn parse_value_list(inner: &str) -> ExpandResult<ValueList> {
    let thread_axis = inner.contains(THREAD_MARKER);
    let cleaned = inner.replace(THREAD_MARKER, "");
    let cleaned = cleaned.trim();

    let values = if cleaned.contains(',') {
        let items: Vec<String> = cleaned.split(',').map(|v| v.trim().to_string()).collect();
        if items.iter().any(|v| v.is_empty()) {
            return Err(ExpandError::bad_list(inner, "empty list element"));
        }
        items
    } else if cleaned.contains(':') {
        let (start, end, step) = parse_range(inner, cleaned)?;
        expand_range(start, end, step)
            .into_iter()
            .map(|v| v.to_string())
            .collect()
    } else if cleaned.is_empty() {
        return Err(ExpandError::bad_list(inner, "empty list"));
    } else {
        vec![cleaned.to_string()]
    };

    Ok(ValueList {
        values,
        thread_axis,
    })
}

fn parse_range(spec: &str, cleaned: &str) -> ExpandResult<(i64, i64, Step)> {
    let parts: Vec<&str> = cleaned.split(':').map(str::trim).collect();
    let [start, end, step] = parts.as_slice() else {
        return Err(ExpandError::bad_list(spec, "range needs start:end:step"));
    };

    let start: i64 = start
        .parse()
        .map_err(|_| ExpandError::bad_list(spec, format!("range start {start:?} is not an integer")))?;
    let end: i64 = end
        .parse()
        .map_err(|_| ExpandError::bad_list(spec, format!("range end {end:?} is not an integer")))?;

    let (op, amount) = step.split_at(step.chars().next().map_or(0, char::len_utf8));
    let amount: u64 = amount
        .parse()
        .map_err(|_| ExpandError::bad_list(spec, format!("step {step:?} is not +k or *k")))?;

    let step = match op {
        "+" if amount >= 1 => Step::Add(amount),
        "+" => return Err(ExpandError::bad_list(spec, "increment must be at least 1")),
        "*" if amount >= 2 && start >= 1 => Step::Mul(amount),
        "*" if amount < 2 => return Err(ExpandError::bad_list(spec, "multiplier must be at least 2")),
        "*" => return Err(ExpandError::bad_list(spec, "geometric range must start at 1 or above")),
        _ => return Err(ExpandError::bad_list(spec, format!("step {step:?} is not +k or *k"))),
    };
    Ok((start, end, step))
}

/// Enumerate `start, start∘k, …` while the value stays `<= end`.
pub fn expand_range(start: i64, end: i64, step: Step) -> Vec<i64> {
    let mut values = Vec::new();
    let mut current = start;
    while current <= end {
        values.push(current);
        let next = match step {
            Step::Add(k) => i64::try_from(k).ok().and_then(|k| current.checked_add(k)),
            Step::Mul(k) => i64::try_from(k).ok().and_then(|k| current.checked_mul(k)),
        };
        match next {
            Some(n) => current = n,
            None => break,
        }
    }
    values
}
