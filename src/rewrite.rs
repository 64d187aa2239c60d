//! Placeholder rewriting and inline argument substitution.
//!
//! Application queries use `?` ordinal placeholders. The query service
//! numbers them `$1`, `$2`, ... and the first `arg_count` arguments are
//! substituted into the statement text directly; anything beyond that is
//! left for the request's `args` field.

use std::fmt::Write as _;

use crate::{N1qlError, Params, Result, Value};

/// Replaces every `?` with `$1`, `$2`, ... in one left-to-right pass.
///
/// Returns the rewritten text and the number of placeholders found.
pub(crate) fn prepare_query(query: &str) -> (String, usize) {
    let mut count = 0usize;
    let mut rewritten = String::with_capacity(query.len() + 8);
    for ch in query.chars() {
        if ch == '?' {
            count += 1;
            let _ = write!(rewritten, "${count}");
        } else {
            rewritten.push(ch);
        }
    }
    (rewritten, count)
}

/// Substitutes `$1..=$arg_count` in `query` with the encoded leading
/// arguments and returns the arguments left over.
///
/// Markers are matched on their full digit run, so `$1` never matches the
/// prefix of `$10`. Substituted text is not rescanned.
pub(crate) fn prepare_positional_args(
    query: &str,
    arg_count: usize,
    mut args: Vec<Value>,
) -> Result<(String, Vec<Value>)> {
    let rest = args.split_off(arg_count.min(args.len()));
    let inline = args
        .iter()
        .map(encode_arg)
        .collect::<Result<Vec<_>>>()?;

    let mut out = String::with_capacity(query.len());
    let mut tail = query;
    while let Some(dollar) = tail.find('$') {
        out.push_str(&tail[..dollar]);
        let after = &tail[dollar + 1..];
        let digits = after
            .find(|ch: char| !ch.is_ascii_digit())
            .unwrap_or(after.len());
        let replacement = after[..digits]
            .parse::<usize>()
            .ok()
            .and_then(|ordinal| ordinal.checked_sub(1))
            .and_then(|index| inline.get(index));
        match replacement {
            Some(encoded) => out.push_str(encoded),
            None => {
                out.push('$');
                out.push_str(&after[..digits]);
            }
        }
        tail = &after[digits..];
    }
    out.push_str(tail);

    Ok((out, rest))
}

/// Rewrites placeholders and inlines positional arguments for an ad-hoc
/// statement, checking the placeholder count first.
pub(crate) fn bind_statement(query: &str, params: Params) -> Result<(String, Params)> {
    let (rewritten, placeholders) = prepare_query(query);
    let supplied = params.positional_len();
    if placeholders != supplied {
        return Err(N1qlError::ArgumentCountMismatch {
            placeholders,
            args: supplied,
        });
    }

    match params {
        Params::Positional(args) => {
            let (statement, rest) = prepare_positional_args(&rewritten, placeholders, args)?;
            Ok((statement, Params::Positional(rest)))
        }
        named @ Params::Named(_) => Ok((rewritten, named)),
    }
}

/// Encodes one argument as N1QL/JSON literal text.
///
/// Strings are emitted as escaped JSON strings, so a quote inside the value
/// cannot terminate the literal early. Raw JSON bytes are inlined verbatim.
pub(crate) fn encode_arg(value: &Value) -> Result<String> {
    match value {
        Value::Null => Ok("null".to_owned()),
        Value::Bool(value) => Ok(value.to_string()),
        Value::Integer(value) => Ok(value.to_string()),
        Value::Float(value) => {
            if !value.is_finite() {
                return Err(N1qlError::InvalidArgument(format!(
                    "non-finite float value '{value}' is unsupported"
                )));
            }
            Ok(value.to_string())
        }
        Value::Text(value) => serde_json::to_string(value)
            .map_err(|err| N1qlError::InvalidArgument(format!("cannot encode string: {err}"))),
        Value::RawJson(bytes) => String::from_utf8(bytes.clone())
            .map_err(|err| N1qlError::InvalidArgument(format!("raw JSON is not UTF-8: {err}"))),
    }
}

/// Encodes bind arguments as the JSON array sent in the `args` field.
pub(crate) fn build_positional_arg_list(args: &[Value]) -> Result<Option<String>> {
    if args.is_empty() {
        return Ok(None);
    }
    let encoded = args
        .iter()
        .map(encode_arg)
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(format!("[{}]", encoded.join(","))))
}
