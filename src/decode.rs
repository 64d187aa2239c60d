use serde_json::{json, value::RawValue, Value as JsonValue};

use crate::{
    rows::{StreamParts, Trailer},
    wire::QueryResponse,
    ExecResult, N1qlError, Result, Signature,
};

/// Plan returned by a `PREPARE` round trip.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PreparedPlan {
    pub plan: String,
    pub name: Option<String>,
    pub signature: Signature,
}

/// Splits a query response into the pieces a row stream consumes.
///
/// Outside passthrough mode, server errors with no rows fail right away;
/// otherwise they are delivered after the last row, or after the decode
/// failure when `results` is not an array.
pub(crate) fn decode_query_response(
    response: QueryResponse,
    passthrough: bool,
) -> Result<StreamParts> {
    let errors = response.server_errors();
    let (elements, failure) = match split_results(response.results) {
        Ok(elements) => (elements, None),
        Err(err) => (Vec::new(), Some(err)),
    };

    if passthrough {
        let signature = match Signature::from_json(response.signature) {
            Signature::Null => Signature::wildcard(),
            signature => signature,
        };
        let extras = json!({
            "requestID": response.request_id,
            "status": response.status,
            "signature": signature.to_json(),
        });
        let errors_record = json!({
            "errors": errors.as_ref().map(|errors| errors.raw().clone()),
        });
        return Ok(StreamParts {
            signature,
            leading: vec![extras, response.metrics.unwrap_or(JsonValue::Null)],
            elements,
            failure,
            trailer: Some(Trailer::Record(errors_record)),
        });
    }

    let trailer = match errors {
        Some(errors) if elements.is_empty() && failure.is_none() => {
            return Err(N1qlError::query(errors));
        }
        Some(errors) => Some(Trailer::Error(N1qlError::query(errors))),
        None => None,
    };

    Ok(StreamParts {
        signature: Signature::from_json(response.signature),
        leading: Vec::new(),
        elements,
        failure,
        trailer,
    })
}

/// Splits the raw `results` array into its elements without decoding them.
fn split_results(results: Option<Box<RawValue>>) -> Result<Vec<Box<RawValue>>> {
    match results {
        None => Ok(Vec::new()),
        Some(results) => serde_json::from_str(results.get())
            .map_err(|err| N1qlError::Decode(format!("cannot decode results array: {err}"))),
    }
}

/// Extracts the plan, its optional name and the signature from a `PREPARE` response.
pub(crate) fn decode_prepared(response: QueryResponse) -> Result<PreparedPlan> {
    if let Some(errors) = response.server_errors() {
        return Err(N1qlError::query(errors));
    }

    let results = response
        .results
        .ok_or_else(|| N1qlError::Internal("no prepared results returned".to_owned()))?;
    let first = serde_json::from_str::<Vec<JsonValue>>(results.get())
        .map_err(|err| N1qlError::Decode(format!("invalid prepared results: {err}")))?
        .into_iter()
        .next()
        .ok_or_else(|| N1qlError::Internal("no prepared results returned".to_owned()))?;

    let is_empty = match &first {
        JsonValue::Null => true,
        JsonValue::Object(fields) => fields.is_empty(),
        _ => false,
    };
    if is_empty {
        return Err(N1qlError::Internal("prepared plan is empty".to_owned()));
    }

    let name = first
        .get("name")
        .and_then(JsonValue::as_str)
        .filter(|name| !name.is_empty())
        .map(str::to_owned);
    let plan = serde_json::to_string(&first)
        .map_err(|err| N1qlError::Decode(format!("cannot serialize prepared plan: {err}")))?;

    Ok(PreparedPlan {
        plan,
        name,
        signature: Signature::from_json(response.signature),
    })
}

/// Turns a DML response into an affected-row count.
///
/// An `errors` field fails the call even when a mutation count is present;
/// the count is kept in [`N1qlError::Query::partial_mutations`].
pub(crate) fn decode_exec_result(response: QueryResponse) -> Result<ExecResult> {
    let mutation_count = response
        .metrics
        .as_ref()
        .map(mutation_count)
        .transpose()?
        .flatten();

    if let Some(errors) = response.server_errors() {
        return Err(N1qlError::Query {
            errors,
            partial_mutations: mutation_count,
        });
    }

    Ok(ExecResult {
        affected_row_count: mutation_count.unwrap_or(0),
        last_insert_id: 0,
    })
}

fn mutation_count(metrics: &JsonValue) -> Result<Option<u64>> {
    let metrics = metrics
        .as_object()
        .ok_or_else(|| N1qlError::Decode(format!("metrics is not an object: {metrics}")))?;
    let Some(count) = metrics.get("mutationCount") else {
        return Ok(None);
    };
    count
        .as_u64()
        .or_else(|| {
            count
                .as_f64()
                .filter(|value| value.is_finite() && *value >= 0.0)
                .map(|value| value as u64)
        })
        .map(Some)
        .ok_or_else(|| N1qlError::Decode(format!("invalid mutationCount '{count}'")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{decode_exec_result, decode_prepared, decode_query_response};
    use crate::{rows::Trailer, wire::QueryResponse, N1qlError, Signature};

    fn response(body: serde_json::Value) -> QueryResponse {
        serde_json::from_str(&body.to_string()).expect("valid response")
    }

    #[test]
    fn exec_reads_mutation_count() {
        let result = decode_exec_result(response(json!({"metrics": {"mutationCount": 5}})))
            .expect("must decode");
        assert_eq!(result.affected_row_count, 5);
        assert_eq!(result.last_insert_id, 0);
    }

    #[test]
    fn exec_without_mutation_count_is_zero() {
        let result = decode_exec_result(response(json!({"metrics": {"elapsedTime": "1ms"}})))
            .expect("must decode");
        assert_eq!(result.affected_row_count, 0);
        let result = decode_exec_result(response(json!({}))).expect("must decode");
        assert_eq!(result.affected_row_count, 0);
    }

    #[test]
    fn exec_errors_win_over_mutation_count() {
        let err = decode_exec_result(response(json!({
            "metrics": {"mutationCount": 5},
            "errors": [{"code": 12009, "msg": "DML Error"}]
        })))
        .expect_err("must fail");

        match err {
            N1qlError::Query {
                errors,
                partial_mutations,
            } => {
                assert_eq!(partial_mutations, Some(5));
                assert_eq!(errors.entries()[0].code, 12009);
            }
            other => panic!("expected query error, got {other:?}"),
        }
    }

    #[test]
    fn exec_rejects_bad_metrics() {
        let err = decode_exec_result(response(json!({"metrics": {"mutationCount": "many"}})))
            .expect_err("must fail");
        assert!(matches!(err, N1qlError::Decode(_)));
    }

    #[test]
    fn prepared_plan_and_name() {
        let plan = decode_prepared(response(json!({
            "results": [{"name": "p1", "operator": {"#operator": "Sequence"}}],
            "signature": {"id": "json"}
        })))
        .expect("must decode");

        assert_eq!(plan.name.as_deref(), Some("p1"));
        assert_eq!(
            plan.plan,
            r##"{"name":"p1","operator":{"#operator":"Sequence"}}"##
        );
        assert_eq!(plan.signature.columns(), vec!["id"]);
    }

    #[test]
    fn prepared_errors_are_query_errors() {
        let err = decode_prepared(response(json!({
            "errors": [{"code": 3000, "msg": "syntax error - at FROM"}]
        })))
        .expect_err("must fail");
        assert!(matches!(err, N1qlError::Query { .. }));
    }

    #[test]
    fn prepared_without_plan_is_internal() {
        for body in [json!({}), json!({"results": []}), json!({"results": [{}]})] {
            let err = decode_prepared(response(body)).expect_err("must fail");
            assert!(matches!(err, N1qlError::Internal(_)));
        }
    }

    #[test]
    fn query_errors_without_rows_fail_immediately() {
        let err = decode_query_response(
            response(json!({"results": [], "errors": [{"code": 4040, "msg": "no such prepared"}]})),
            false,
        )
        .expect_err("must fail");
        assert!(matches!(err, N1qlError::Query { .. }));
    }

    #[test]
    fn query_errors_with_rows_become_trailer() {
        let parts = decode_query_response(
            response(json!({"results": [1], "errors": [{"code": 5000, "msg": "late"}]})),
            false,
        )
        .expect("must decode");
        assert_eq!(parts.elements.len(), 1);
        assert!(parts.failure.is_none());
        assert!(matches!(parts.trailer, Some(Trailer::Error(_))));
    }

    #[test]
    fn non_array_results_keep_server_errors() {
        let parts = decode_query_response(
            response(json!({"results": {}, "errors": [{"code": 5000, "msg": "internal"}]})),
            false,
        )
        .expect("must decode");
        assert!(parts.elements.is_empty());
        assert!(matches!(parts.failure, Some(N1qlError::Decode(_))));
        assert!(matches!(parts.trailer, Some(Trailer::Error(N1qlError::Query { .. }))));
    }

    #[test]
    fn null_results_yield_no_elements() {
        let parts = decode_query_response(response(json!({"results": null})), false)
            .expect("must decode");
        assert!(parts.elements.is_empty());
        assert!(parts.failure.is_none());
        assert!(parts.trailer.is_none());
    }

    #[test]
    fn passthrough_defaults_signature_and_adds_records() {
        let parts = decode_query_response(
            response(json!({
                "requestID": "r1",
                "signature": null,
                "results": [],
                "status": "success",
                "metrics": {"resultCount": 0}
            })),
            true,
        )
        .expect("must decode");

        assert_eq!(parts.signature, Signature::wildcard());
        assert_eq!(parts.leading.len(), 2);
        assert_eq!(parts.leading[0]["requestID"], json!("r1"));
        assert_eq!(parts.leading[0]["signature"], json!({"*": "*"}));
        assert_eq!(parts.leading[1], json!({"resultCount": 0}));
        assert!(matches!(parts.trailer, Some(Trailer::Record(ref record)) if record["errors"].is_null()));
    }
}
