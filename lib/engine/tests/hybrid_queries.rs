//! End-to-end hybrid query tests over an embedded graph and an in-memory
//! virtualized backend: two widgets with one sensor each, serving the
//! series `ts1` (values 100..159) and `ts2` (values 300..359), one point
//! per second from 2022-06-01T08:46:00Z.

use anyhow::Result;
use chrontext::{
    CancellationToken, ChrontextError, EmbeddedOxigraph, Engine,
    InMemoryVirtualizedDatabase, PathEntry, Template,
};
use datafusion::arrow::array::{Int64Array, RecordBatch, StringArray, TimestampMicrosecondArray};
use datafusion::arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use oxigraph::io::RdfFormat;
use oxrdf::vocab::xsd;
use oxrdf::{NamedNode, Term};
use std::collections::HashMap;
use std::sync::Arc;

const CT: &str = "https://github.com/DataTreehouse/chrontext#";
const SERIES_START_MICROS: i64 = 1_654_073_160_000_000; // 2022-06-01T08:46:00Z
const PREFIXES: &str = "\
    PREFIX xsd: <http://www.w3.org/2001/XMLSchema#>\n\
    PREFIX ct: <https://github.com/DataTreehouse/chrontext#>\n\
    PREFIX types: <http://example.org/types#>\n";

const TESTDATA: &str = r#"
<http://example.org/case#w1> <http://www.w3.org/1999/02/22-rdf-syntax-ns#type> <http://example.org/types#BigWidget> .
<http://example.org/case#w2> <http://www.w3.org/1999/02/22-rdf-syntax-ns#type> <http://example.org/types#SmallWidget> .
<http://example.org/case#w1> <http://example.org/types#hasSensor> <http://example.org/case#s1> .
<http://example.org/case#w2> <http://example.org/types#hasSensor> <http://example.org/case#s2> .
<http://example.org/case#s1> <https://github.com/DataTreehouse/chrontext#hasTimeseries> <http://example.org/case#tsn1> .
<http://example.org/case#s2> <https://github.com/DataTreehouse/chrontext#hasTimeseries> <http://example.org/case#tsn2> .
<http://example.org/case#tsn1> <https://github.com/DataTreehouse/chrontext#hasExternalId> "ts1" .
<http://example.org/case#tsn1> <https://github.com/DataTreehouse/chrontext#hasResource> "my_resource" .
<http://example.org/case#tsn2> <https://github.com/DataTreehouse/chrontext#hasExternalId> "ts2" .
<http://example.org/case#tsn2> <https://github.com/DataTreehouse/chrontext#hasResource> "my_resource" .
"#;

fn series_batch() -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new(
            "timestamp",
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            false,
        ),
        Field::new("value", DataType::Int64, false),
    ]));
    let mut ids = Vec::new();
    let mut timestamps = Vec::new();
    let mut values = Vec::new();
    for (series, base_value) in [("ts1", 100i64), ("ts2", 300i64)] {
        for second in 0..60i64 {
            ids.push(series);
            timestamps.push(SERIES_START_MICROS + second * 1_000_000);
            values.push(base_value + second);
        }
    }
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(TimestampMicrosecondArray::from(timestamps).with_timezone("UTC")),
            Arc::new(Int64Array::from(values)),
        ],
    )
    .unwrap()
}

fn engine() -> Result<Engine> {
    let template = Template::timeseries(
        NamedNode::new(format!("{CT}my_resource"))?,
        xsd::INTEGER.into_owned(),
    );
    let store = EmbeddedOxigraph::from_reader(RdfFormat::NTriples, TESTDATA.as_bytes())?;
    let backend =
        InMemoryVirtualizedDatabase::new([("my_resource".to_owned(), series_batch())].into())?;
    Ok(Engine::new(
        [("my_resource".to_owned(), template)].into(),
        Arc::new(store),
        Some(Arc::new(backend)),
    )?)
}

fn integer_at(
    response: &chrontext::EngineResponse,
    row: usize,
    column: &str,
) -> Option<i64> {
    match response.table.value(row, column)? {
        Term::Literal(l) => l.value().parse().ok(),
        _ => None,
    }
}

fn string_at(response: &chrontext::EngineResponse, row: usize, column: &str) -> String {
    match response.table.value(row, column) {
        Some(Term::Literal(l)) => l.value().to_owned(),
        Some(Term::NamedNode(nn)) => nn.as_str().to_owned(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

#[tokio::test]
async fn simple_hybrid_filter() -> Result<()> {
    let engine = engine()?;
    let response = engine
        .query(&format!(
            "{PREFIXES}
            SELECT ?w ?t ?v WHERE {{
                ?w a types:BigWidget .
                ?w types:hasSensor/ct:hasTimeseries/ct:hasDataPoint ?dp .
                ?dp ct:hasTimestamp ?t .
                ?dp ct:hasValue ?v .
                FILTER(?t > \"2022-06-01T08:46:53Z\"^^xsd:dateTime && ?v < 200)
            }}"
        ))
        .await?;

    assert_eq!(
        response.table.columns(),
        &["w".to_owned(), "t".to_owned(), "v".to_owned()]
    );
    assert_eq!(response.table.len(), 6);
    let mut values: Vec<i64> = (0..response.table.len())
        .map(|i| integer_at(&response, i, "v").unwrap())
        .collect();
    values.sort_unstable();
    assert_eq!(values, vec![154, 155, 156, 157, 158, 159]);

    // Both filter conjuncts and the projection were pushed down.
    assert_eq!(
        response.pushdown_paths,
        vec![vec![PathEntry::FilterInner, PathEntry::ProjectInner]]
    );
    assert_eq!(
        response.rdf_datatypes.get("t").map(NamedNode::as_ref),
        Some(xsd::DATE_TIME)
    );
    assert_eq!(
        response.rdf_datatypes.get("v").map(NamedNode::as_ref),
        Some(xsd::INTEGER)
    );
    Ok(())
}

#[tokio::test]
async fn group_by_with_seconds_bucket_and_having() -> Result<()> {
    let engine = engine()?;
    let response = engine
        .query(&format!(
            "{PREFIXES}
            SELECT ?w (SUM(?v) AS ?s) WHERE {{
                ?w a types:BigWidget .
                ?w types:hasSensor ?sen .
                ?sen ct:hasTimeseries ?ts .
                ?ts ct:hasDataPoint ?dp .
                ?dp ct:hasTimestamp ?t .
                ?dp ct:hasValue ?v .
                BIND(xsd:integer(FLOOR(SECONDS(?t)/5.0)) AS ?b)
                FILTER(?t > \"2022-06-01T08:46:53Z\"^^xsd:dateTime)
            }} GROUP BY ?w ?b
            HAVING(SUM(?v) > 100)"
        ))
        .await?;

    assert_eq!(response.table.len(), 2);
    let mut sums: Vec<i64> = (0..response.table.len())
        .map(|i| integer_at(&response, i, "s").unwrap())
        .collect();
    sums.sort_unstable();
    // Seconds 54 fall in bucket 10, seconds 55..59 in bucket 11.
    assert_eq!(sums, vec![154, 155 + 156 + 157 + 158 + 159]);

    assert_eq!(response.pushdown_paths.len(), 1);
    let path = &response.pushdown_paths[0];
    assert_eq!(path.last(), Some(&PathEntry::ProjectInner));
    let project_at = path.len() - 1;
    let extend_at = path
        .iter()
        .position(|e| *e == PathEntry::ExtendInner)
        .expect("the bucket BIND is pushed");
    let filter_at = path
        .iter()
        .position(|e| *e == PathEntry::FilterInner)
        .expect("the timestamp filter is pushed");
    assert!(extend_at < project_at);
    assert!(filter_at < project_at);
    assert!(path.contains(&PathEntry::GroupInner));
    Ok(())
}

#[tokio::test]
async fn unknown_class_yields_empty_result_with_schema() -> Result<()> {
    let engine = engine()?;
    let response = engine
        .query(&format!(
            "{PREFIXES}
            SELECT ?w ?t ?v WHERE {{
                ?w a types:NoSuchWidget .
                ?w types:hasSensor/ct:hasTimeseries/ct:hasDataPoint ?dp .
                ?dp ct:hasTimestamp ?t .
                ?dp ct:hasValue ?v .
                FILTER(?t > \"2022-06-01T08:46:53Z\"^^xsd:dateTime && ?v < 200)
            }}"
        ))
        .await?;
    assert!(response.table.is_empty());
    assert_eq!(
        response.table.columns(),
        &["w".to_owned(), "t".to_owned(), "v".to_owned()]
    );
    Ok(())
}

#[tokio::test]
async fn union_of_two_group_bys() -> Result<()> {
    let engine = engine()?;
    let response = engine
        .query(&format!(
            "{PREFIXES}
            SELECT ?w ?kind ?s WHERE {{
              {{
                SELECT ?w ?kind (SUM(?v) AS ?s) WHERE {{
                    ?w types:hasSensor ?sen .
                    ?sen ct:hasTimeseries ?ts .
                    ?ts ct:hasDataPoint ?dp .
                    ?dp ct:hasTimestamp ?t .
                    ?dp ct:hasValue ?v .
                    BIND(\"late\" AS ?kind)
                    FILTER(?t > \"2022-06-01T08:46:53Z\"^^xsd:dateTime)
                }} GROUP BY ?w ?kind
              }}
              UNION
              {{
                SELECT ?w ?kind (SUM(?v) AS ?s) WHERE {{
                    ?w types:hasSensor ?sen .
                    ?sen ct:hasTimeseries ?ts .
                    ?ts ct:hasDataPoint ?dp .
                    ?dp ct:hasTimestamp ?t .
                    ?dp ct:hasValue ?v .
                    BIND(\"big\" AS ?kind)
                    FILTER(?v >= 300)
                }} GROUP BY ?w ?kind
              }}
            }}"
        ))
        .await?;

    let mut rows: Vec<(String, String, i64)> = (0..response.table.len())
        .map(|i| {
            (
                string_at(&response, i, "w"),
                string_at(&response, i, "kind"),
                integer_at(&response, i, "s").unwrap(),
            )
        })
        .collect();
    rows.sort();
    assert_eq!(
        rows,
        vec![
            ("http://example.org/case#w1".to_owned(), "late".to_owned(), 939),
            ("http://example.org/case#w2".to_owned(), "big".to_owned(), 19770),
            ("http://example.org/case#w2".to_owned(), "late".to_owned(), 2139),
        ]
    );

    assert_eq!(response.pushdown_paths.len(), 2);
    assert!(response.pushdown_paths[0].contains(&PathEntry::UnionLeftSide));
    assert!(response.pushdown_paths[1].contains(&PathEntry::UnionRightSide));
    Ok(())
}

#[tokio::test]
async fn minus_removes_shared_timestamps() -> Result<()> {
    let engine = engine()?;
    let response = engine
        .query(&format!(
            "{PREFIXES}
            SELECT ?w ?t ?v WHERE {{
                ?w types:hasSensor/ct:hasTimeseries ?ts .
                ?ts ct:hasDataPoint ?dp .
                ?dp ct:hasTimestamp ?t .
                ?dp ct:hasValue ?v .
                MINUS {{
                    ?other ct:hasDataPoint ?dp2 .
                    ?dp2 ct:hasTimestamp ?t .
                    ?dp2 ct:hasValue ?v2 .
                    FILTER(?v2 > 330)
                }}
            }}"
        ))
        .await?;

    // ts2 exceeds 330 from second 31 on, removing those timestamps from
    // both series: 2 * 60 - 2 * 29 rows remain.
    assert_eq!(response.table.len(), 62);

    assert_eq!(response.pushdown_paths.len(), 2);
    assert!(response.pushdown_paths[0].contains(&PathEntry::MinusLeftSide));
    assert!(response.pushdown_paths[1].contains(&PathEntry::MinusRightSide));
    assert!(response.pushdown_paths[1].contains(&PathEntry::FilterInner));
    Ok(())
}

#[tokio::test]
async fn dt_sugar_with_avg_over_five_second_buckets() -> Result<()> {
    let engine = engine()?;
    let response = engine
        .query(&format!(
            "{PREFIXES}
            SELECT ?w WHERE {{
                ?w a types:BigWidget .
                ?w types:hasSensor ?sen .
                ?sen ct:hasTimeseries ?ts .
                DT {{ timestamp = ?t,
                      from = \"2022-06-01T08:46:53Z\",
                      aggregation = \"avg\",
                      interval = \"5s\" }}
            }}"
        ))
        .await?;

    assert!(response
        .table
        .columns()
        .contains(&"ts_value_avg".to_owned()));
    assert_eq!(response.table.len(), 2);
    let mut avgs: Vec<String> = (0..response.table.len())
        .map(|i| string_at(&response, i, "ts_value_avg"))
        .collect();
    avgs.sort();
    // Seconds 53..54 average to 153.5, seconds 55..59 to 157.
    assert_eq!(
        avgs.iter().map(|v| v.parse::<f64>().unwrap()).fold(0.0, f64::max),
        157.0
    );
    assert!(avgs.iter().any(|v| v.parse::<f64>().unwrap() == 153.5));
    assert_eq!(
        response.rdf_datatypes.get("ts_value_avg").map(NamedNode::as_ref),
        Some(xsd::DOUBLE)
    );
    Ok(())
}

#[tokio::test]
async fn static_only_queries_bypass_the_backend() -> Result<()> {
    let engine = engine()?;
    let response = engine
        .query(&format!(
            "{PREFIXES}
            SELECT ?w WHERE {{ ?w a types:BigWidget }}"
        ))
        .await?;
    assert_eq!(response.table.len(), 1);
    assert!(response.pushdown_paths.is_empty());
    Ok(())
}

#[tokio::test]
async fn cancellation_before_io_returns_no_rows() -> Result<()> {
    let engine = engine()?;
    let token = CancellationToken::new();
    token.cancel();
    let result = engine
        .query_with_options(
            &format!(
                "{PREFIXES}
                SELECT ?w WHERE {{ ?w a types:BigWidget }}"
            ),
            true,
            token,
        )
        .await;
    assert!(matches!(result, Err(ChrontextError::CancellationError)));
    Ok(())
}

#[tokio::test]
async fn queries_without_backend_fail_as_unavailable() -> Result<()> {
    let template = Template::timeseries(
        NamedNode::new(format!("{CT}my_resource"))?,
        xsd::INTEGER.into_owned(),
    );
    let store = EmbeddedOxigraph::from_reader(RdfFormat::NTriples, TESTDATA.as_bytes())?;
    let engine: Engine = Engine::new(
        [("my_resource".to_owned(), template)].into(),
        Arc::new(store),
        None,
    )?;
    let result = engine
        .query(&format!(
            "{PREFIXES}
            SELECT ?v WHERE {{
                ?ts ct:hasDataPoint ?dp . ?dp ct:hasValue ?v .
            }}"
        ))
        .await;
    assert!(matches!(result, Err(ChrontextError::BackendUnavailable)));
    Ok(())
}

#[tokio::test]
async fn unregistered_resource_names_are_rejected() -> Result<()> {
    let data = format!(
        "{TESTDATA}\n\
         <http://example.org/case#tsn3> <https://github.com/DataTreehouse/chrontext#hasExternalId> \"ts3\" .\n\
         <http://example.org/case#tsn3> <https://github.com/DataTreehouse/chrontext#hasResource> \"mystery\" .\n"
    );
    let template = Template::timeseries(
        NamedNode::new(format!("{CT}my_resource"))?,
        xsd::INTEGER.into_owned(),
    );
    let store = EmbeddedOxigraph::from_reader(RdfFormat::NTriples, data.as_bytes())?;
    let backend =
        InMemoryVirtualizedDatabase::new([("my_resource".to_owned(), series_batch())].into())?;
    let engine = Engine::new(
        [("my_resource".to_owned(), template)].into(),
        Arc::new(store),
        Some(Arc::new(backend)),
    )?;
    let result = engine
        .query(&format!(
            "{PREFIXES}
            SELECT ?v WHERE {{
                ?ts ct:hasDataPoint ?dp . ?dp ct:hasValue ?v .
            }}"
        ))
        .await;
    assert!(matches!(result, Err(ChrontextError::SchemaError(_))));
    Ok(())
}

#[tokio::test]
async fn schema_errors_refuse_engine_construction() -> Result<()> {
    let mut template = Template::timeseries(
        NamedNode::new(format!("{CT}my_resource"))?,
        xsd::INTEGER.into_owned(),
    );
    template.parameters[0].rdf_type = chrontext::RDFType::integer();
    let store = EmbeddedOxigraph::from_reader(RdfFormat::NTriples, TESTDATA.as_bytes())?;
    let result = Engine::new(
        [("my_resource".to_owned(), template)].into(),
        Arc::new(store),
        None,
    );
    assert!(matches!(result, Err(ChrontextError::SchemaError(_))));
    Ok(())
}

#[tokio::test]
async fn limit_is_pushed_and_applied() -> Result<()> {
    let engine = engine()?;
    let response = engine
        .query(&format!(
            "{PREFIXES}
            SELECT ?w ?t ?v WHERE {{
                ?w types:hasSensor/ct:hasTimeseries/ct:hasDataPoint ?dp .
                ?dp ct:hasTimestamp ?t .
                ?dp ct:hasValue ?v .
            }} LIMIT 7"
        ))
        .await?;
    assert_eq!(response.table.len(), 7);
    assert!(response.pushdown_paths[0].contains(&PathEntry::SliceInner));
    Ok(())
}
