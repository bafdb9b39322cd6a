//! The exchange service.
//!
//! One gRPC surface covers the whole node: the metadata endpoints the
//! query engine probes first, split enumeration, streamed page fetches,
//! and the append entry point. Appends detect the payload format
//! (columnar file magic), repartition by the configured key column and
//! land every block in the event-log table, the same path the
//! ingestion loop drives through the [`Appender`] capability.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::warn;

use eventlake_core::block::from_columnar_by;
use eventlake_core::FileReader;
use eventlake_ingest::{Appender, IngestError};
use eventlake_proto::exchange::exchange_server::Exchange;
use eventlake_proto::exchange::{
    AppendRequest, AppendResponse, ListTablesRequest, ListTablesResponse, RowsPage, RowsRequest,
    Split, SplitsRequest, SplitsResponse, TableMetadataRequest, TableMetadataResponse,
};
use eventlake_store::{NodesTable, SplitRequest, StoreError, Table, TimeSeries};

use crate::error::{Result, ServerError};
use crate::metrics;
use crate::page::{meta_to_proto, page_to_proto};

#[derive(Clone)]
pub struct ExchangeService {
    tables: Arc<HashMap<String, Arc<dyn Table>>>,
    events: Arc<TimeSeries>,
}

impl ExchangeService {
    pub fn new(events: Arc<TimeSeries>, nodes: Arc<NodesTable>) -> Self {
        let mut tables: HashMap<String, Arc<dyn Table>> = HashMap::new();
        tables.insert(
            events.name().to_string(),
            Arc::clone(&events) as Arc<dyn Table>,
        );
        tables.insert(nodes.name().to_string(), nodes as Arc<dyn Table>);
        Self {
            tables: Arc::new(tables),
            events,
        }
    }

    fn table(&self, name: &str) -> std::result::Result<Arc<dyn Table>, Status> {
        self.tables
            .get(name)
            .cloned()
            .ok_or_else(|| Status::not_found(format!("unknown table: {name}")))
    }

    /// Decode a payload, repartition it and append every block.
    ///
    /// Returns `(blocks appended, rows dropped)`. Decode errors happen
    /// before any block is appended, so a failed file commits nothing.
    pub async fn append_payload(&self, payload: &[u8]) -> Result<(usize, usize)> {
        if !FileReader::sniff(payload) {
            return Err(ServerError::Codec(eventlake_core::Error::InvalidMagic));
        }

        let timer = metrics::APPEND_LATENCY.start_timer();
        let repartitioned = from_columnar_by(payload, &self.events.config().key_column)?;
        let appended = repartitioned.blocks.len();
        let mut rows = 0usize;
        for block in repartitioned.blocks {
            rows += block.row_count();
            self.events.append(block).await?;
        }
        timer.observe_duration();

        metrics::INGESTED_BLOCKS_TOTAL.inc_by(appended as u64);
        metrics::INGESTED_ROWS_TOTAL.inc_by(rows as u64);
        metrics::DROPPED_ROWS_TOTAL.inc_by(repartitioned.dropped_rows as u64);
        Ok((appended, repartitioned.dropped_rows))
    }
}

/// The narrow capability the ingestion loop depends on.
#[async_trait]
impl Appender for ExchangeService {
    async fn append(&self, payload: Bytes) -> eventlake_ingest::Result<()> {
        self.append_payload(&payload)
            .await
            .map(|_| ())
            .map_err(|e| IngestError::Append(e.to_string()))
    }
}

#[tonic::async_trait]
impl Exchange for ExchangeService {
    async fn list_tables(
        &self,
        _request: Request<ListTablesRequest>,
    ) -> std::result::Result<Response<ListTablesResponse>, Status> {
        let mut tables: Vec<String> = self.tables.keys().cloned().collect();
        tables.sort();
        Ok(Response::new(ListTablesResponse { tables }))
    }

    async fn get_table_metadata(
        &self,
        request: Request<TableMetadataRequest>,
    ) -> std::result::Result<Response<TableMetadataResponse>, Status> {
        let req = request.into_inner();
        let table = self.table(&req.table)?;
        Ok(Response::new(meta_to_proto(table.meta())))
    }

    #[tracing::instrument(skip(self, request), fields(table = %request.get_ref().table))]
    async fn get_splits(
        &self,
        request: Request<SplitsRequest>,
    ) -> std::result::Result<Response<SplitsResponse>, Status> {
        let req = request.into_inner();
        let table = self.table(&req.table)?;

        let split_req = SplitRequest {
            t0: req.range.as_ref().map(|r| r.start_ns),
            t1: req.range.as_ref().map(|r| r.end_ns),
            partition: (!req.partition.is_empty()).then_some(req.partition),
        };
        let splits = table.splits(&split_req).await.map_err(to_status)?;
        metrics::SPLITS_SERVED_TOTAL.inc_by(splits.len() as u64);

        Ok(Response::new(SplitsResponse {
            splits: splits
                .into_iter()
                .map(|s| Split {
                    token: s.token,
                    host: s.host.unwrap_or_default(),
                })
                .collect(),
        }))
    }

    type GetRowsStream = ReceiverStream<std::result::Result<RowsPage, Status>>;

    async fn get_rows(
        &self,
        request: Request<RowsRequest>,
    ) -> std::result::Result<Response<Self::GetRowsStream>, Status> {
        let req = request.into_inner();
        let table = self.table(&req.table)?;

        let (tx, rx) = tokio::sync::mpsc::channel(4);
        tokio::spawn(async move {
            match table.read_split(&req.token, &req.columns).await {
                Ok(pages) => {
                    for page in pages {
                        metrics::PAGES_SERVED_TOTAL.inc();
                        if tx.send(Ok(page_to_proto(page))).await.is_err() {
                            // Caller went away; stop streaming.
                            return;
                        }
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(to_status(e))).await;
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn append(
        &self,
        request: Request<AppendRequest>,
    ) -> std::result::Result<Response<AppendResponse>, Status> {
        let req = request.into_inner();
        match self.append_payload(&req.payload).await {
            Ok((appended_blocks, dropped_rows)) => Ok(Response::new(AppendResponse {
                appended_blocks: appended_blocks as u32,
                dropped_rows: dropped_rows as u32,
            })),
            Err(e) => {
                warn!(error = %e, "append rejected");
                Err(match e {
                    ServerError::Store(inner) => to_status(inner),
                    ServerError::Codec(inner) => Status::invalid_argument(inner.to_string()),
                    other => Status::internal(other.to_string()),
                })
            }
        }
    }
}

fn to_status(e: StoreError) -> Status {
    match e {
        StoreError::UnknownTable(table) => Status::not_found(format!("unknown table: {table}")),
        StoreError::InvalidSplit => Status::invalid_argument("invalid split token"),
        StoreError::ColumnNotFound(column) => {
            Status::invalid_argument(format!("column not found: {column}"))
        }
        StoreError::AppendUnsupported(table) => {
            Status::failed_precondition(format!("table {table} does not accept appends"))
        }
        StoreError::Unavailable(reason) => Status::unavailable(reason),
        StoreError::Codec(e) => Status::invalid_argument(e.to_string()),
    }
}
