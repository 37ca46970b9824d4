use std::io;

use anyhow::Result;

use crate::{db::RecordStore, model::Observation};

pub async fn run(store: &dyn RecordStore) -> Result<()> {
    let records = store.all().await?;
    write(&records, io::stdout().lock())?;
    Ok(())
}

/// Writes observations as CSV with a header row, timestamps in milliseconds.
pub fn write(records: &[Observation], writer: impl io::Write) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for record in records {
        csv.serialize(record)?;
    }
    csv.flush()?;
    Ok(())
}
