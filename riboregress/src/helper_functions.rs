use std::env;
use std::path::{Path, PathBuf};

use polars::prelude::*;

/// Root of the data directory; falls back to ./data when the environment
/// variable is unset.
pub fn data_root() -> PathBuf {
    match env::var_os("RIBOREGRESS_DATA") {
        Some(val) => PathBuf::from(val),
        None => PathBuf::from("./data"),
    }
}

/// Read a tab-separated table with a header row.
pub fn read_tsv(path: &Path) -> PolarsResult<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .map_parse_options(|opts| opts.with_separator(b'\t'))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()
}

/// Write a DataFrame as tab-separated text.
pub fn write_tsv(df: &mut DataFrame, path: &Path) -> PolarsResult<()> {
    let mut file = std::fs::File::create(path)?;
    CsvWriter::new(&mut file)
        .with_separator(b'\t')
        .finish(df)?;
    Ok(())
}
