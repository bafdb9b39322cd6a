//! Conversions from in-memory pages to the exchange wire shapes.

use eventlake_core::{Column, ColumnData};
use eventlake_proto::exchange::{ColumnBlock, ColumnMeta, RowsPage, TableMetadataResponse};
use eventlake_store::{Page, TableMeta};

pub fn page_to_proto(page: Page) -> RowsPage {
    RowsPage {
        row_count: page.row_count as u32,
        columns: page
            .columns
            .into_iter()
            .map(|(column, data)| column_to_proto(column, data))
            .collect(),
    }
}

fn column_to_proto(column: Column, data: ColumnData) -> ColumnBlock {
    let mut block = ColumnBlock {
        name: column.name,
        r#type: column.kind.name().to_string(),
        ..Default::default()
    };
    match data {
        ColumnData::Int64 { values, nulls } => {
            block.int64_values = values;
            block.nulls = nulls;
        }
        ColumnData::Float64 { values, nulls } => {
            block.float64_values = values;
            block.nulls = nulls;
        }
        ColumnData::Bool { values, nulls } => {
            block.bool_values = values;
            block.nulls = nulls;
        }
        ColumnData::String { values, nulls } => {
            block.string_values = values;
            block.nulls = nulls;
        }
        ColumnData::Timestamp { values, nulls } => {
            block.timestamp_values = values;
            block.nulls = nulls;
        }
        ColumnData::Json { values, nulls } => {
            block.json_values = values.into_iter().map(|b| b.to_vec()).collect();
            block.nulls = nulls;
        }
    }
    block
}

pub fn meta_to_proto(meta: TableMeta) -> TableMetadataResponse {
    TableMetadataResponse {
        table: meta.name,
        columns: meta
            .columns
            .into_iter()
            .map(|c| ColumnMeta {
                name: c.name,
                r#type: c.kind.name().to_string(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventlake_core::{ColumnType, Value};

    #[test]
    fn test_page_conversion_keeps_values_and_nulls() {
        let mut tiles = ColumnData::new(ColumnType::String);
        tiles.push(Some(Value::String("a".into()))).unwrap();
        tiles.push(None).unwrap();
        let mut counts = ColumnData::new(ColumnType::Int64);
        counts.push(Some(Value::Int64(7))).unwrap();
        counts.push(Some(Value::Int64(8))).unwrap();

        let page = Page {
            columns: vec![
                (Column::new("tile", ColumnType::String), tiles),
                (Column::new("count", ColumnType::Int64), counts),
            ],
            row_count: 2,
        };

        let proto = page_to_proto(page);
        assert_eq!(proto.row_count, 2);
        assert_eq!(proto.columns[0].name, "tile");
        assert_eq!(proto.columns[0].r#type, "string");
        assert_eq!(proto.columns[0].string_values, vec!["a", ""]);
        assert_eq!(proto.columns[0].nulls, vec![false, true]);
        assert_eq!(proto.columns[1].int64_values, vec![7, 8]);
    }

    #[test]
    fn test_meta_conversion() {
        let meta = TableMeta {
            name: "eventlog".into(),
            columns: vec![
                Column::new("tile", ColumnType::String),
                Column::new("time", ColumnType::Timestamp),
            ],
        };
        let proto = meta_to_proto(meta);
        assert_eq!(proto.table, "eventlog");
        assert_eq!(proto.columns.len(), 2);
        assert_eq!(proto.columns[1].r#type, "timestamp");
    }
}
