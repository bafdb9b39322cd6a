//! End-to-end exercises of the exchange service over a real local
//! store: the metadata surface, the append → splits → rows path, the
//! queue-driven ingestion loop and TTL expiry.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_stream::StreamExt;
use tonic::Request;

use eventlake_cluster::{Cluster, InProcessHub};
use eventlake_core::{Column, ColumnType, FileWriter, Schema, Value};
use eventlake_ingest::{
    notification, FetchConfig, Fetcher, Ingestor, MemoryQueue, NotificationQueue, ObjectRef,
    QueueConfig, QueueReader,
};
use eventlake_proto::exchange::exchange_server::Exchange;
use eventlake_proto::exchange::{
    AppendRequest, ListTablesRequest, RowsRequest, SplitsRequest, TableMetadataRequest, TimeRange,
};
use eventlake_server::ExchangeService;
use eventlake_store::{DiskStore, NodesTable, Store, Sweeper, TimeSeries, TimeSeriesConfig};
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};

fn event_schema() -> Schema {
    Schema::new(vec![
        Column::new("tile", ColumnType::String),
        Column::new("time", ColumnType::Timestamp),
        Column::new("speed", ColumnType::Float64),
    ])
}

fn file_of(rows: &[(Option<&str>, i64, f64)]) -> Bytes {
    let mut writer = FileWriter::new(event_schema());
    for (tile, time, speed) in rows {
        writer
            .push_row(vec![
                tile.map(|t| Value::String(t.to_string())),
                Some(Value::Timestamp(*time)),
                Some(Value::Float64(*speed)),
            ])
            .unwrap();
    }
    writer.finish()
}

struct Stack {
    service: ExchangeService,
    store: Arc<DiskStore>,
    _dir: tempfile::TempDir,
}

fn stack() -> Stack {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(DiskStore::open(dir.path()).unwrap());
    let hub = InProcessHub::new();
    let cluster = Cluster::new(hub.transport(), "n1", "10.0.0.1:8042");
    let eventlog = TimeSeries::new(
        TimeSeriesConfig {
            name: "eventlog".into(),
            key_column: "tile".into(),
            time_column: "time".into(),
            ttl: Duration::from_secs(3600),
        },
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::clone(&cluster),
    );
    let nodes = NodesTable::new(cluster);
    Stack {
        service: ExchangeService::new(eventlog, nodes),
        store,
        _dir: dir,
    }
}

/// Splits then streamed pages, flattened to `(tile, time)` rows.
async fn scan(service: &ExchangeService, t0: i64, t1: i64) -> Vec<(String, i64)> {
    let splits = service
        .get_splits(Request::new(SplitsRequest {
            table: "eventlog".into(),
            range: Some(TimeRange {
                start_ns: t0,
                end_ns: t1,
            }),
            partition: String::new(),
        }))
        .await
        .unwrap()
        .into_inner()
        .splits;

    let mut rows = Vec::new();
    for split in splits {
        let mut stream = service
            .get_rows(Request::new(RowsRequest {
                table: "eventlog".into(),
                token: split.token,
                columns: vec!["tile".into(), "time".into()],
            }))
            .await
            .unwrap()
            .into_inner();

        while let Some(page) = stream.next().await {
            let page = page.unwrap();
            let tiles = &page.columns[0];
            let times = &page.columns[1];
            for r in 0..page.row_count as usize {
                rows.push((tiles.string_values[r].clone(), times.timestamp_values[r]));
            }
        }
    }
    rows.sort();
    rows
}

#[tokio::test]
async fn test_list_tables() {
    let stack = stack();
    let response = stack
        .service
        .list_tables(Request::new(ListTablesRequest {}))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.tables, vec!["eventlog", "nodes"]);
}

#[tokio::test]
async fn test_table_metadata() {
    let stack = stack();
    let response = stack
        .service
        .get_table_metadata(Request::new(TableMetadataRequest {
            table: "eventlog".into(),
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.table, "eventlog");
    let names: Vec<&str> = response.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["tile", "time"]);
    assert_eq!(response.columns[1].r#type, "timestamp");
}

#[tokio::test]
async fn test_unknown_table_is_not_found() {
    let stack = stack();
    let status = stack
        .service
        .get_table_metadata(Request::new(TableMetadataRequest {
            table: "missing".into(),
        }))
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::NotFound);
}

#[tokio::test]
async fn test_append_then_scan() {
    let stack = stack();
    let payload = file_of(&[
        (Some("a"), 10, 1.0),
        (Some("b"), 20, 2.0),
        (Some("a"), 30, 3.0),
    ]);

    let response = stack
        .service
        .append(Request::new(AppendRequest {
            payload: payload.to_vec(),
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.appended_blocks, 2);
    assert_eq!(response.dropped_rows, 0);

    let rows = scan(&stack.service, 0, 100).await;
    assert_eq!(
        rows,
        vec![
            ("a".to_string(), 10),
            ("a".to_string(), 30),
            ("b".to_string(), 20)
        ]
    );
}

#[tokio::test]
async fn test_append_counts_dropped_rows() {
    let stack = stack();
    let payload = file_of(&[(Some("a"), 10, 1.0), (None, 20, 2.0)]);
    let response = stack
        .service
        .append(Request::new(AppendRequest {
            payload: payload.to_vec(),
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.appended_blocks, 1);
    assert_eq!(response.dropped_rows, 1);

    let rows = scan(&stack.service, 0, 100).await;
    assert_eq!(rows, vec![("a".to_string(), 10)]);
}

#[tokio::test]
async fn test_append_rejects_unknown_format() {
    let stack = stack();
    let status = stack
        .service
        .append(Request::new(AppendRequest {
            payload: b"PAR1 some other format".to_vec(),
        }))
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::InvalidArgument);
}

#[tokio::test]
async fn test_nodes_table_roundtrip() {
    let stack = stack();
    let splits = stack
        .service
        .get_splits(Request::new(SplitsRequest {
            table: "nodes".into(),
            range: None,
            partition: String::new(),
        }))
        .await
        .unwrap()
        .into_inner()
        .splits;
    assert_eq!(splits.len(), 1);
    assert_eq!(splits[0].host, "10.0.0.1:8042");

    let mut stream = stack
        .service
        .get_rows(Request::new(RowsRequest {
            table: "nodes".into(),
            token: splits[0].token.clone(),
            columns: vec![],
        }))
        .await
        .unwrap()
        .into_inner();
    let page = stream.next().await.unwrap().unwrap();
    assert_eq!(page.row_count, 1);
    assert_eq!(page.columns[0].string_values[0], "10.0.0.1:8042");
}

#[tokio::test]
async fn test_queue_driven_ingestion_end_to_end() {
    let stack = stack();

    let objects = Arc::new(InMemory::new());
    objects
        .put(
            &Path::from("2024/batch-1.elcf"),
            PutPayload::from(file_of(&[(Some("a"), 10, 1.0), (Some("b"), 20, 2.0)]).to_vec()),
        )
        .await
        .unwrap();

    let queue = MemoryQueue::new(Duration::from_secs(10));
    queue
        .push(Bytes::from(notification::encode(&[ObjectRef::new(
            "events",
            "2024/batch-1.elcf",
        )])))
        .await;

    let reader = QueueReader::new(
        Arc::clone(&queue) as Arc<dyn NotificationQueue>,
        QueueConfig {
            queue_url: "memory://q".into(),
            region: "local".into(),
            wait_timeout: Duration::from_millis(20),
            visibility_timeout: Duration::from_secs(10),
        },
    );
    let fetcher = Fetcher::with_store(
        Arc::clone(&objects) as Arc<dyn ObjectStore>,
        FetchConfig::default(),
    );
    let ingestor = Ingestor::new(
        reader,
        fetcher,
        Arc::new(stack.service.clone()) as Arc<dyn eventlake_ingest::Appender>,
    );

    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(async move { ingestor.run(rx).await });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while queue.outstanding().await > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tx.send(true).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;

    let rows = scan(&stack.service, 0, 100).await;
    assert_eq!(rows, vec![("a".to_string(), 10), ("b".to_string(), 20)]);
}

#[tokio::test]
async fn test_duplicate_notification_duplicates_rows() {
    // At-least-once by design: replaying a message appends equivalent
    // blocks under fresh keys, so duplication is observable.
    let stack = stack();
    let payload = file_of(&[(Some("a"), 10, 1.0)]);
    for _ in 0..2 {
        stack
            .service
            .append(Request::new(AppendRequest {
                payload: payload.to_vec(),
            }))
            .await
            .unwrap();
    }
    let rows = scan(&stack.service, 0, 100).await;
    assert_eq!(rows, vec![("a".to_string(), 10), ("a".to_string(), 10)]);
}

#[tokio::test]
async fn test_expired_blocks_vanish_after_sweep() {
    let stack = stack();

    // Two blocks: one far in the past, one recent.
    let now_ns = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos() as i64;
    let old = now_ns - 7_200 * 1_000_000_000;
    let payload = file_of(&[(Some("old"), old, 1.0)]);
    stack
        .service
        .append(Request::new(AppendRequest {
            payload: payload.to_vec(),
        }))
        .await
        .unwrap();
    let payload = file_of(&[(Some("new"), now_ns, 1.0)]);
    stack
        .service
        .append(Request::new(AppendRequest {
            payload: payload.to_vec(),
        }))
        .await
        .unwrap();

    let sweeper = Sweeper::new(
        Arc::clone(&stack.store) as Arc<dyn Store>,
        Duration::from_secs(3600),
    );
    assert_eq!(sweeper.sweep_once(now_ns).unwrap(), 1);

    let rows = scan(&stack.service, 0, i64::MAX).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0, "new");
}
