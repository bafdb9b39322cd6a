//! The nodes virtual table.
//!
//! A read-only view over cluster membership the query engine uses to
//! learn the serving fleet: one row per live member with its serving
//! `address`, the current `peers` count, and the member's `shard_key`
//! (its node id, the value consistent hashing keys on).

use std::sync::Arc;

use async_trait::async_trait;

use eventlake_cluster::Cluster;
use eventlake_core::{Column, ColumnData, ColumnType, Value};

use crate::error::{Result, StoreError};
use crate::table::{AssignedSplit, Page, SplitRequest, Table, TableMeta};

const NODES_TOKEN: &[u8] = b"nodes/all";

pub struct NodesTable {
    cluster: Arc<Cluster>,
}

impl NodesTable {
    pub fn new(cluster: Arc<Cluster>) -> Arc<Self> {
        Arc::new(Self { cluster })
    }
}

#[async_trait]
impl Table for NodesTable {
    fn name(&self) -> &str {
        "nodes"
    }

    fn meta(&self) -> TableMeta {
        TableMeta {
            name: "nodes".to_string(),
            columns: vec![
                Column::new("address", ColumnType::String),
                Column::new("peers", ColumnType::Int64),
                Column::new("shard_key", ColumnType::String),
            ],
        }
    }

    async fn splits(&self, _req: &SplitRequest) -> Result<Vec<AssignedSplit>> {
        // Membership is tiny and local; one split served by this node.
        Ok(vec![AssignedSplit {
            token: NODES_TOKEN.to_vec(),
            host: Some(self.cluster.address().to_string()),
        }])
    }

    async fn read_split(&self, token: &[u8], columns: &[String]) -> Result<Vec<Page>> {
        if token != NODES_TOKEN {
            return Err(StoreError::InvalidSplit);
        }

        let members = self.cluster.members();
        let peers = members.len() as i64;

        let mut address = ColumnData::new(ColumnType::String);
        let mut peer_counts = ColumnData::new(ColumnType::Int64);
        let mut shard_key = ColumnData::new(ColumnType::String);
        for member in &members {
            address
                .push(Some(Value::String(member.address.clone())))
                .expect("string cell");
            peer_counts
                .push(Some(Value::Int64(peers)))
                .expect("int cell");
            shard_key
                .push(Some(Value::String(member.node_id.clone())))
                .expect("string cell");
        }

        let all: Vec<(Column, ColumnData)> = vec![
            (Column::new("address", ColumnType::String), address),
            (Column::new("peers", ColumnType::Int64), peer_counts),
            (Column::new("shard_key", ColumnType::String), shard_key),
        ];

        let selected = if columns.is_empty() {
            all
        } else {
            let mut out = Vec::with_capacity(columns.len());
            for name in columns {
                let found = all
                    .iter()
                    .find(|(c, _)| &c.name == name)
                    .ok_or_else(|| StoreError::ColumnNotFound(name.clone()))?;
                out.push(found.clone());
            }
            out
        };

        Ok(vec![Page {
            columns: selected,
            row_count: members.len(),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventlake_cluster::InProcessHub;

    fn nodes_table() -> Arc<NodesTable> {
        let hub = InProcessHub::new();
        let cluster = Cluster::new(hub.transport(), "n1", "10.0.0.1:8042");
        NodesTable::new(cluster)
    }

    #[tokio::test]
    async fn test_single_local_split() {
        let table = nodes_table();
        let splits = table.splits(&SplitRequest::default()).await.unwrap();
        assert_eq!(splits.len(), 1);
        assert_eq!(splits[0].host.as_deref(), Some("10.0.0.1:8042"));
    }

    #[tokio::test]
    async fn test_read_lists_members() {
        let table = nodes_table();
        let splits = table.splits(&SplitRequest::default()).await.unwrap();
        let pages = table.read_split(&splits[0].token, &[]).await.unwrap();

        assert_eq!(pages.len(), 1);
        let page = &pages[0];
        assert_eq!(page.row_count, 1);
        assert_eq!(page.columns.len(), 3);
        assert_eq!(
            page.columns[0].1.value(0),
            Some(Value::String("10.0.0.1:8042".into()))
        );
        assert_eq!(page.columns[1].1.value(0), Some(Value::Int64(1)));
        assert_eq!(
            page.columns[2].1.value(0),
            Some(Value::String("n1".into()))
        );
    }

    #[tokio::test]
    async fn test_projection() {
        let table = nodes_table();
        let splits = table.splits(&SplitRequest::default()).await.unwrap();
        let pages = table
            .read_split(&splits[0].token, &["peers".to_string()])
            .await
            .unwrap();
        assert_eq!(pages[0].columns.len(), 1);
        assert_eq!(pages[0].columns[0].0.name, "peers");
    }

    #[tokio::test]
    async fn test_bad_token_rejected() {
        let table = nodes_table();
        assert!(matches!(
            table.read_split(b"garbage", &[]).await,
            Err(StoreError::InvalidSplit)
        ));
    }

    #[tokio::test]
    async fn test_append_rejected() {
        use eventlake_core::block::from_columnar_by;
        use eventlake_core::{FileWriter, Schema};

        let table = nodes_table();
        let schema = Schema::new(vec![
            Column::new("k", ColumnType::String),
            Column::new("time", ColumnType::Timestamp),
        ]);
        let mut writer = FileWriter::new(schema);
        writer
            .push_row(vec![
                Some(Value::String("x".into())),
                Some(Value::Timestamp(1)),
            ])
            .unwrap();
        let block = from_columnar_by(&writer.finish(), "k")
            .unwrap()
            .blocks
            .remove(0);

        assert!(matches!(
            table.append(block).await,
            Err(StoreError::AppendUnsupported(_))
        ));
    }
}
