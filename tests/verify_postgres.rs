//! Runs against a real server configured through DB_USER, DB_PASSWORD,
//! DB_HOST, DB_PORT and DB_NAME. Everything lives in its own schema.
#![cfg(feature = "pg-tests")]

mod common;

use serde_json::{json, Value};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

const SCHEMA: &str = "portal_verify";

fn db_env() -> anyhow::Result<Vec<(&'static str, String)>> {
    ["DB_USER", "DB_PASSWORD", "DB_HOST", "DB_NAME"]
        .into_iter()
        .chain(std::env::var("DB_PORT").is_ok().then_some("DB_PORT"))
        .map(|name| -> anyhow::Result<_> { Ok((name, std::env::var(name)?)) })
        .collect()
}

fn connect(rt: &tokio::runtime::Runtime) -> anyhow::Result<PgPool> {
    let port = std::env::var("DB_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(5432);
    let opts = PgConnectOptions::new()
        .host(&std::env::var("DB_HOST")?)
        .port(port)
        .username(&std::env::var("DB_USER")?)
        .password(&std::env::var("DB_PASSWORD")?)
        .database(&std::env::var("DB_NAME")?);
    Ok(rt.block_on(PgPoolOptions::new().max_connections(1).connect_with(opts))?)
}

fn feature_collection(x: f64, y: f64) -> Value {
    json!({
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "properties": {},
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[x, y], [x + 20.0, y], [x + 20.0, y + 20.0], [x, y + 20.0], [x, y]]]
            }
        }]
    })
}

fn seed(rt: &tokio::runtime::Runtime, pool: &PgPool) -> anyhow::Result<()> {
    rt.block_on(async {
        for sql in [
            format!("DROP SCHEMA IF EXISTS {SCHEMA} CASCADE"),
            format!("CREATE SCHEMA {SCHEMA}"),
            format!(
                "CREATE TABLE {SCHEMA}.items (id integer PRIMARY KEY, label text, \
                 price numeric, added date, tags jsonb)"
            ),
            format!(
                "INSERT INTO {SCHEMA}.items VALUES \
                 (1, 'alpha', 1.50, '2024-01-02', '[\"a\"]'), \
                 (2, 'beta', NULL, NULL, NULL)"
            ),
            format!("CREATE TABLE {SCHEMA}.shapes (id integer PRIMARY KEY, name text, geometry jsonb)"),
        ] {
            sqlx::query(&sql).execute(pool).await?;
        }
        for (id, x) in [(1, 530000.0), (2, 530500.0), (3, 531000.0)] {
            sqlx::query(&format!(
                "INSERT INTO {SCHEMA}.shapes VALUES ($1, $2, $3)"
            ))
            .bind(id)
            .bind(format!("shape {id}"))
            .bind(sqlx::types::Json(feature_collection(x, 180000.0)))
            .execute(pool)
            .await?;
        }
        anyhow::Ok(())
    })
}

fn portal_env(db: &[(&'static str, String)], schema: &str, target: &str) -> Vec<(&'static str, String)> {
    let mut envs = db.to_vec();
    envs.push(("PORTAL_TABLE_QUERY", format!("select * from {schema}.{target} order by id")));
    envs.push(("PORTAL_MAP_QUERY", format!("select * from {schema}.shapes order by id")));
    envs.push(("PORTAL_TARGET_TABLE", format!("{schema}.{target}")));
    envs
}

#[test]
fn pages_read_edit_and_map_a_real_database() -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    let pool = connect(&rt)?;
    seed(&rt, &pool)?;

    let envs = portal_env(&db_env()?, SCHEMA, "items");
    let envs: Vec<(&str, &str)> = envs.iter().map(|(k, v)| (*k, v.as_str())).collect();
    let (_server, addr) = common::spawn_server(&envs)?;
    let client = common::client()?;

    // Table page.
    let view = common::get_json(&client, addr, "/api/table")?;
    assert!(view["error"].is_null(), "{view}");
    let columns: Vec<&str> = view["table"]["columns"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    assert_eq!(columns, ["id", "label", "price", "added", "tags"]);
    assert_eq!(
        view["table"]["rows"][0],
        json!([1, "alpha", "1.50", "2024-01-02", ["a"]])
    );
    assert_eq!(view["table"]["rows"][1], json!([2, "beta", null, null, null]));

    // Editor: full-table replace.
    let (status, outcome) = common::post_json(
        &client,
        addr,
        "/api/editor/save",
        &json!({
            "columns": ["id", "label", "price", "added", "tags"],
            "rows": [
                [1, "alpha", "2.25", "2024-01-02", ["a", "b"]],
                [3, "gamma", "", "", null]
            ]
        }),
    )?;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(outcome["saved"], true, "{outcome}");
    assert_eq!(outcome["message"], "Changes saved successfully!");

    let stored: Vec<(i32, Option<String>)> = rt.block_on(
        sqlx::query_as(&format!("SELECT id, label FROM {SCHEMA}.items ORDER BY id"))
            .fetch_all(&pool),
    )?;
    assert_eq!(stored, vec![(1, Some("alpha".into())), (3, Some("gamma".into()))]);

    // A failing save leaves the table untouched.
    let (_, outcome) = common::post_json(
        &client,
        addr,
        "/api/editor/save",
        &json!({"columns": ["id", "label"], "rows": [[5, "x"], [5, "y"]]}),
    )?;
    assert_eq!(outcome["saved"], false);
    let count: i64 = rt.block_on(
        sqlx::query_scalar(&format!("SELECT count(*) FROM {SCHEMA}.items")).fetch_one(&pool),
    )?;
    assert_eq!(count, 2);

    // Map page with a highlight.
    let view = common::get_json(&client, addr, "/api/map")?;
    let layers = view["map"]["layers"].as_array().unwrap();
    assert_eq!(layers.len(), 1);
    assert_eq!(layers[0]["data"]["features"].as_array().unwrap().len(), 3);
    let lat = view["map"]["view_state"]["latitude"].as_f64().unwrap();
    assert!((lat - 51.5).abs() < 0.05, "{lat}");

    let (_, view) = common::post_json(
        &client,
        addr,
        "/api/map/selection",
        &json!({"rows": [1], "fingerprint": view["fingerprint"]}),
    )?;
    let layers = view["map"]["layers"].as_array().unwrap();
    assert_eq!(layers.len(), 2);
    assert_eq!(layers[0]["fill_color"], json!([200, 30, 0, 100]));
    assert_eq!(layers[1]["data"]["features"].as_array().unwrap().len(), 1);
    let row_data = layers[1]["data"]["features"][0]["properties"]["row_data"]
        .as_str()
        .unwrap();
    assert!(row_data.contains("shape 2"), "{row_data}");

    let (_, view) = common::post_json(&client, addr, "/api/map/refresh", &json!(null))?;
    assert_eq!(view["map"]["layers"].as_array().unwrap().len(), 1);

    rt.block_on(sqlx::query(&format!("DROP SCHEMA {SCHEMA} CASCADE")).execute(&pool))?;
    Ok(())
}

const ROUND_TRIP_SCHEMA: &str = "portal_round_trip";

/// Every column as its text form, so values of any type compare exactly.
fn events_as_text(
    rt: &tokio::runtime::Runtime,
    pool: &PgPool,
) -> anyhow::Result<Vec<Vec<Option<String>>>> {
    let rows: Vec<(Option<String>, Option<String>, Option<String>, Option<String>, Option<String>, Option<String>)> =
        rt.block_on(
            sqlx::query_as(&format!(
                "SELECT id::text, at::text, tags::text, note, span::text, addr::text \
                 FROM {ROUND_TRIP_SCHEMA}.events ORDER BY id"
            ))
            .fetch_all(pool),
        )?;
    Ok(rows
        .into_iter()
        .map(|(a, b, c, d, e, f)| vec![a, b, c, d, e, f])
        .collect())
}

#[test]
fn saving_an_unchanged_grid_keeps_every_value() -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    let pool = connect(&rt)?;
    rt.block_on(async {
        for sql in [
            format!("DROP SCHEMA IF EXISTS {ROUND_TRIP_SCHEMA} CASCADE"),
            format!("CREATE SCHEMA {ROUND_TRIP_SCHEMA}"),
            format!(
                "CREATE TABLE {ROUND_TRIP_SCHEMA}.events (id integer PRIMARY KEY, at time, \
                 tags text[], note text, span interval, addr inet)"
            ),
            format!(
                "INSERT INTO {ROUND_TRIP_SCHEMA}.events VALUES \
                 (1, '12:30', '{{a,b}}', NULL, '1 day 02:00', '10.0.0.1'), \
                 (2, NULL, '{{}}', '', NULL, NULL), \
                 (3, '23:59:59.5', NULL, 'plain', '-3 hours', '::1')"
            ),
            format!("CREATE TABLE {ROUND_TRIP_SCHEMA}.shapes (id integer PRIMARY KEY, geometry jsonb)"),
        ] {
            sqlx::query(&sql).execute(&pool).await?;
        }
        anyhow::Ok(())
    })?;
    let before = events_as_text(&rt, &pool)?;

    let envs = portal_env(&db_env()?, ROUND_TRIP_SCHEMA, "events");
    let envs: Vec<(&str, &str)> = envs.iter().map(|(k, v)| (*k, v.as_str())).collect();
    let (_server, addr) = common::spawn_server(&envs)?;
    let client = common::client()?;

    let view = common::get_json(&client, addr, "/api/editor")?;
    assert!(view["error"].is_null(), "{view}");
    let table = &view["table"];
    assert!(table.get("unreadable").is_none(), "{table}");
    let columns: Vec<Value> = table["columns"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].clone())
        .collect();
    assert_eq!(table["rows"][0][1], json!("12:30:00"));
    assert_eq!(table["rows"][0][2], json!("{a,b}"));

    let (status, outcome) = common::post_json(
        &client,
        addr,
        "/api/editor/save",
        &json!({"columns": columns, "rows": table["rows"]}),
    )?;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(outcome["saved"], true, "{outcome}");

    assert_eq!(events_as_text(&rt, &pool)?, before);

    rt.block_on(sqlx::query(&format!("DROP SCHEMA {ROUND_TRIP_SCHEMA} CASCADE")).execute(&pool))?;
    Ok(())
}
