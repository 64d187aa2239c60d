use std::time::{SystemTime, UNIX_EPOCH};

use n1ql_http::{param, Connection, ConnectionOptions, N1qlError, Value};

struct LiveTarget {
    endpoints: Vec<String>,
    keyspace: String,
    credentials: Option<(String, String)>,
}

fn load_live_target() -> Result<LiveTarget, String> {
    let urls = std::env::var("N1QL_QUERY_URL")
        .map_err(|_| "N1QL_QUERY_URL env is required".to_owned())?;
    let endpoints = urls
        .split(',')
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(n1ql_http::query_service_url)
        .collect::<Vec<_>>();
    if endpoints.is_empty() {
        return Err("N1QL_QUERY_URL lists no endpoints".to_owned());
    }

    let keyspace = std::env::var("N1QL_KEYSPACE").unwrap_or_else(|_| "default".to_owned());
    let credentials = match (std::env::var("N1QL_USER"), std::env::var("N1QL_PASSWORD")) {
        (Ok(user), Ok(password)) => Some((user, password)),
        _ => None,
    };

    Ok(LiveTarget {
        endpoints,
        keyspace,
        credentials,
    })
}

fn unique_suffix() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock must be after epoch")
        .as_millis()
}

#[tokio::test]
async fn live_roundtrip_and_prepared_execution() {
    let target = match load_live_target() {
        Ok(target) => target,
        Err(_) => {
            eprintln!("skipping live test: N1QL_QUERY_URL not set");
            return;
        }
    };

    let mut options = ConnectionOptions::new()
        .with_param(param::SCAN_CONSISTENCY, "request_plus")
        .expect("valid param");
    if let Some((user, password)) = target.credentials {
        options = options.with_credentials([(user, password)]);
    }

    let conn = Connection::open(target.endpoints, options)
        .await
        .expect("open must succeed");
    let keyspace = &target.keyspace;
    let key = format!("live_{}", unique_suffix());

    let inserted = conn
        .execute(
            &format!("INSERT INTO `{keyspace}` (KEY, VALUE) VALUES (?, ?)"),
            [
                Value::text(key.clone()),
                Value::raw_json(r#"{"name":"Kit","kind":"live"}"#),
            ],
        )
        .await
        .expect("insert must succeed");
    assert_eq!(inserted.affected_row_count, 1);

    let rows = conn
        .query(
            &format!("SELECT name FROM `{keyspace}` USE KEYS ?"),
            [Value::text(key.clone())],
        )
        .await
        .expect("query must succeed")
        .try_collect()
        .await
        .expect("rows must decode");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_by_name("name"), Some("\"Kit\""));

    let mut stmt = conn
        .prepare(&format!("SELECT RAW kind FROM `{keyspace}` USE KEYS ?"))
        .await
        .expect("prepare must succeed");
    assert_eq!(stmt.num_input(), 1);
    let kinds = stmt
        .query([Value::text(key.clone())])
        .await
        .expect("prepared query must succeed")
        .try_collect()
        .await
        .expect("rows must decode");
    assert_eq!(kinds.len(), 1);
    assert_eq!(kinds[0].get(0), Some("\"live\""));

    let err = conn
        .query(&format!("SELEC name FROM `{keyspace}`"), ())
        .await
        .expect_err("syntax error must surface");
    assert!(matches!(err, N1qlError::Query { .. }));

    let cleanup = conn
        .execute(
            &format!("DELETE FROM `{keyspace}` USE KEYS ?"),
            [Value::text(key)],
        )
        .await;
    if let Err(err) = cleanup {
        panic!("cleanup failed: {err}");
    }
}
