//! JSON-lines tables: one row object per line, blank lines ignored.

use std::{
    fs,
    io::{BufRead, BufReader, Write},
    path::Path,
    sync::Arc,
};

use anyhow::{Context, bail};
use tablescan_core::TableRow;
use tablescan_core::store::InMemoryTableStore;

pub fn load_table(path: &Path) -> anyhow::Result<Arc<InMemoryTableStore>> {
    let file = fs::File::open(path)
        .with_context(|| format!("failed to open table {}", path.display()))?;

    let mut rows = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line
            .with_context(|| format!("failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let row: TableRow = serde_json::from_str(&line).with_context(|| {
            format!("{}:{}: invalid row", path.display(), index + 1)
        })?;
        rows.push(row);
    }

    let name = table_name(path)?;
    let table = InMemoryTableStore::from_rows(name, rows)
        .with_context(|| format!("table {} has invalid keys", path.display()))?;
    Ok(Arc::new(table))
}

fn table_name(path: &Path) -> anyhow::Result<String> {
    match path.file_stem().and_then(|stem| stem.to_str()) {
        Some(stem) if !stem.is_empty() => Ok(stem.to_string()),
        _ => bail!("cannot derive a table name from {}", path.display()),
    }
}

pub fn write_rows<W: Write>(rows: &[TableRow], mut writer: W) -> anyhow::Result<()> {
    for row in rows {
        serde_json::to_writer(&mut writer, row)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}
