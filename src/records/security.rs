use crate::error::{FetchError, Result};

use super::{Cell, ColumnDef, ColumnSpec, ColumnType, Record};

const SECURITY_COLUMNS: &[ColumnDef] = &[
    ColumnDef::required("secid", &["secid"], ColumnType::Text),
    ColumnDef::required("name", &["name", "secname", "shortname"], ColumnType::Text),
    ColumnDef::required("type", &["type", "sectype"], ColumnType::Text),
    ColumnDef::optional(
        "board_group",
        &["board_group", "boardgroupid", "boardgroup"],
        ColumnType::Integer,
    ),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityRow {
    pub secid: String,
    pub name: String,
    pub security_type: String,
    pub board_group: Option<i64>,
}

impl Record for SecurityRow {
    type Key = String;

    const SPEC: ColumnSpec = ColumnSpec {
        columns: SECURITY_COLUMNS,
        key: "secid",
    };

    // listings keep the order ISS returns them in
    const ORDERED: bool = false;

    fn from_cells(cells: Vec<Cell>, row: usize) -> Result<Self> {
        let [secid, name, security_type, board_group]: [Cell; 4] = cells
            .try_into()
            .map_err(|_| FetchError::format("security row does not match its column layout"))?;

        Ok(SecurityRow {
            secid: secid.into_text("secid", row)?,
            name: name.into_text("name", row)?,
            security_type: security_type.into_text("type", row)?,
            board_group: board_group.into_optional_integer("board_group", row)?,
        })
    }

    fn key(&self) -> String {
        self.secid.clone()
    }

    fn to_cells(&self) -> Vec<Cell> {
        vec![
            Cell::Text(self.secid.clone()),
            Cell::Text(self.name.clone()),
            Cell::Text(self.security_type.clone()),
            self.board_group.map_or(Cell::Null, Cell::Integer),
        ]
    }
}
