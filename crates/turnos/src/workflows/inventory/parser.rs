use serde::{Deserialize, Deserializer};
use std::io::Read;

#[derive(Debug, Deserialize)]
pub(crate) struct InventoryRow {
    pub(crate) kind: String,
    pub(crate) id: u64,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub(crate) name: Option<String>,
    pub(crate) stock: i64,
}

pub(crate) fn parse_rows<R: Read>(reader: R) -> Result<Vec<InventoryRow>, csv::Error> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    csv_reader.deserialize::<InventoryRow>().collect()
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.and_then(|raw| {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }))
}
