mod parser;

use std::io::Read;
use std::path::Path;

use serde::Serialize;

use crate::workflows::turnos::CatalogItemRef;

/// Starting stock for one catalog item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockEntry {
    pub item: CatalogItemRef,
    pub name: String,
    pub stock: i64,
}

#[derive(Debug)]
pub enum InventoryImportError {
    Io(std::io::Error),
    Csv(csv::Error),
    UnknownKind { line: u64, kind: String },
    Duplicate { line: u64, item: CatalogItemRef },
}

impl std::fmt::Display for InventoryImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InventoryImportError::Io(err) => write!(f, "failed to read inventory file: {}", err),
            InventoryImportError::Csv(err) => write!(f, "invalid inventory CSV data: {}", err),
            InventoryImportError::UnknownKind { line, kind } => write!(
                f,
                "line {}: unknown item kind '{}' (expected medicine or supply)",
                line, kind
            ),
            InventoryImportError::Duplicate { line, item } => {
                write!(f, "line {}: {} listed more than once", line, item)
            }
        }
    }
}

impl std::error::Error for InventoryImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InventoryImportError::Io(err) => Some(err),
            InventoryImportError::Csv(err) => Some(err),
            InventoryImportError::UnknownKind { .. } | InventoryImportError::Duplicate { .. } => {
                None
            }
        }
    }
}

impl From<std::io::Error> for InventoryImportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for InventoryImportError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

/// Loads catalog stock from a `kind,id,name,stock` CSV export.
pub struct InventoryImporter;

impl InventoryImporter {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Vec<StockEntry>, InventoryImportError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Vec<StockEntry>, InventoryImportError> {
        let mut entries: Vec<StockEntry> = Vec::new();
        for (index, row) in parser::parse_rows(reader)?.into_iter().enumerate() {
            let line = index as u64 + 2;
            let item = match row.kind.to_ascii_lowercase().as_str() {
                "medicine" | "medicamento" => CatalogItemRef::Medicine(row.id),
                "supply" | "insumo" => CatalogItemRef::Supply(row.id),
                _ => {
                    return Err(InventoryImportError::UnknownKind {
                        line,
                        kind: row.kind,
                    })
                }
            };
            if entries.iter().any(|entry| entry.item == item) {
                return Err(InventoryImportError::Duplicate { line, item });
            }
            entries.push(StockEntry {
                item,
                name: row.name.unwrap_or_default(),
                stock: row.stock,
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn imports_medicines_and_supplies() {
        let csv = "kind,id,name,stock\nmedicine,3,Paracetamol 500mg,10\n supply ,7,Gauze, 0\n";
        let entries = InventoryImporter::from_reader(Cursor::new(csv)).expect("imports");

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].item, CatalogItemRef::Medicine(3));
        assert_eq!(entries[0].stock, 10);
        assert_eq!(entries[1].item, CatalogItemRef::Supply(7));
        assert_eq!(entries[1].name, "Gauze");
    }

    #[test]
    fn rejects_unknown_kinds_and_duplicates() {
        let unknown = "kind,id,name,stock\nvaccine,1,Flu,3\n";
        match InventoryImporter::from_reader(Cursor::new(unknown)) {
            Err(InventoryImportError::UnknownKind { line: 2, kind }) => assert_eq!(kind, "vaccine"),
            other => panic!("expected unknown kind error, got {other:?}"),
        }

        let duplicate = "kind,id,name,stock\nmedicine,1,A,3\nmedicine,1,A,4\n";
        assert!(matches!(
            InventoryImporter::from_reader(Cursor::new(duplicate)),
            Err(InventoryImportError::Duplicate { line: 3, .. })
        ));
    }

    #[test]
    fn surfaces_malformed_numbers() {
        let csv = "kind,id,name,stock\nmedicine,one,A,3\n";
        assert!(matches!(
            InventoryImporter::from_reader(Cursor::new(csv)),
            Err(InventoryImportError::Csv(_))
        ));
    }
}
