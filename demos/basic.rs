use n1ql_http::{param, query_service_url, Connection, ConnectionOptions, Value};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let node = std::env::var("N1QL_QUERY_URL")?;
    let options = ConnectionOptions::new().with_param(param::SCAN_CONSISTENCY, "request_plus")?;

    let conn = Connection::open([query_service_url(&node)], options).await?;

    let result = conn
        .execute(
            "UPSERT INTO `default` (KEY, VALUE) VALUES (?, ?)",
            [
                Value::text("user::kit"),
                Value::raw_json(r#"{"name":"Kit","age":31}"#),
            ],
        )
        .await?;
    println!("upserted {} document(s)", result.affected_row_count);

    let mut rows = conn
        .query(
            "SELECT name, age FROM `default` WHERE age > ?",
            [Value::integer(30)],
        )
        .await?;
    println!("columns: {:?}", rows.columns());
    while let Some(row) = rows.next().await? {
        println!("{:?}", row.values());
    }

    let mut stmt = conn
        .prepare("SELECT RAW name FROM `default` USE KEYS ?")
        .await?;
    for row in stmt.query([Value::text("user::kit")]).await?.try_collect().await? {
        println!("prepared: {:?}", row.get(0));
    }

    Ok(())
}
