use crate::backend::pg_session::{PgColumn, QueryOutcome};
use crate::protocol::mysql::basic::Field;
use crate::protocol::mysql::packet::packet_writer::PacketWriter;
use crate::protocol::mysql::packet::writers;
use crate::protocol::mysql::UTF8_GENERAL_CI;
use crate::translate::types::{project_column, project_value};

use hashbrown::HashMap;
use mysql_common::constants::{CapabilityFlags, ColumnFlags, ColumnType, StatusFlags};
use std::io;
use tokio::io::AsyncWrite;

/// Row encoding of a resultset. Chosen by the command that produced it:
/// COM_QUERY and the metadata paths are text, COM_STMT_EXECUTE is binary.
/// Cross-wiring the two leaves the client with a busy-buffer failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wire {
    Text,
    Binary,
}

/// A fully projected resultset, ready to serialize in either encoding.
#[derive(Debug)]
pub struct Resultset {
    pub fields: Vec<Field>,
    pub name_index: HashMap<String, usize>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl Resultset {
    pub fn new(fields: Vec<Field>, rows: Vec<Vec<Option<String>>>) -> Self {
        let name_index = fields
            .iter()
            .enumerate()
            .map(|(idx, f)| (f.name.clone(), idx))
            .collect();
        Self {
            fields,
            name_index,
            rows,
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.name_index.get(name).copied()
    }
}

/// Build MySQL fields from a PostgreSQL row descriptor and project every
/// value into its MySQL text shape.
pub fn project_outcome(outcome: &QueryOutcome) -> Resultset {
    let fields = fields_from_columns(&outcome.columns);
    let rows = outcome
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .zip(outcome.columns.iter())
                .map(|(value, column)| {
                    value
                        .as_ref()
                        .map(|raw| project_value(column.type_oid, raw))
                })
                .collect()
        })
        .collect();
    Resultset::new(fields, rows)
}

pub fn fields_from_columns(columns: &[PgColumn]) -> Vec<Field> {
    columns
        .iter()
        .map(|column| {
            let projection = project_column(column.type_oid, column.type_modifier);
            Field {
                schema: String::new(),
                table: String::new(),
                org_table: String::new(),
                name: column.name.clone(),
                org_name: column.name.clone(),
                charset: projection.charset,
                column_length: projection.column_length,
                column_type: projection.tag,
                flags: projection.flags,
                decimals: projection.decimals,
            }
        })
        .collect()
}

/// A utf8 VAR_STRING field for locally synthesized rows.
pub fn text_field(name: &str) -> Field {
    Field {
        schema: String::new(),
        table: String::new(),
        org_table: String::new(),
        name: name.to_string(),
        org_name: name.to_string(),
        charset: UTF8_GENERAL_CI,
        column_length: 255,
        column_type: ColumnType::MYSQL_TYPE_VAR_STRING,
        flags: ColumnFlags::empty(),
        decimals: 0,
    }
}

pub async fn write_resultset<W>(
    w: &mut PacketWriter<W>,
    client_capabilities: CapabilityFlags,
    resultset: &Resultset,
    wire: Wire,
    status: StatusFlags,
) -> io::Result<()>
where
    W: AsyncWrite + Send + Unpin,
{
    writers::write_resultset_header(w, resultset.fields.len()).await?;
    writers::write_column_definitions(&resultset.fields, w, client_capabilities, false).await?;
    for row in &resultset.rows {
        match wire {
            Wire::Text => writers::write_text_row(w, row).await?,
            Wire::Binary => writers::write_binary_row(w, &resultset.fields, row).await?,
        }
    }
    writers::write_resultset_end(w, client_capabilities, status).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::types::oid;

    fn outcome() -> QueryOutcome {
        QueryOutcome {
            columns: vec![
                PgColumn {
                    name: "id".to_string(),
                    type_oid: oid::INT4,
                    type_modifier: -1,
                },
                PgColumn {
                    name: "price".to_string(),
                    type_oid: oid::NUMERIC,
                    type_modifier: ((10 << 16) | 2) + 4,
                },
                PgColumn {
                    name: "active".to_string(),
                    type_oid: oid::BOOL,
                    type_modifier: -1,
                },
            ],
            rows: vec![vec![
                Some("1".to_string()),
                Some("99.99".to_string()),
                Some("t".to_string()),
            ]],
            command_tag: Some("SELECT 1".to_string()),
        }
    }

    #[test]
    fn test_projection_metadata_invariants() {
        let rs = project_outcome(&outcome());
        for field in &rs.fields {
            assert!(field.column_length > 0, "{field:?}");
            assert!(field.charset == 33 || field.charset == 63, "{field:?}");
        }
        let price = &rs.fields[1];
        assert_eq!(price.column_type, ColumnType::MYSQL_TYPE_NEWDECIMAL);
        assert_eq!(price.charset, 63);
        assert_eq!(price.column_length, 11);
        assert_eq!(price.decimals, 2);
    }

    #[test]
    fn test_projection_values_and_name_index() {
        let rs = project_outcome(&outcome());
        assert_eq!(rs.rows[0][1], Some("99.99".to_string()));
        assert_eq!(rs.rows[0][2], Some("1".to_string()));
        assert_eq!(rs.column_index("price"), Some(1));
        assert_eq!(rs.column_index("missing"), None);
    }

    #[tokio::test]
    async fn test_text_and_binary_emission_differ() {
        let rs = project_outcome(&outcome());
        let caps = CapabilityFlags::CLIENT_DEPRECATE_EOF;
        let mut text = PacketWriter::new(Vec::new());
        write_resultset(&mut text, caps, &rs, Wire::Text, StatusFlags::empty())
            .await
            .unwrap();
        let mut binary = PacketWriter::new(Vec::new());
        write_resultset(&mut binary, caps, &rs, Wire::Binary, StatusFlags::empty())
            .await
            .unwrap();
        assert_ne!(text.inner_writer, binary.inner_writer);
    }
}
