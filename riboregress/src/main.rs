use std::env;
use std::fs::{create_dir_all, File};
use std::path::PathBuf;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::RegressOptions;
use crate::data_handling::alignment::TableReadSource;
use crate::data_handling::offsets::OffsetTable;
use crate::data_handling::orf_store::{CdsStore, OrfStore};
use crate::data_handling::transcripts::{FamilyTable, TranscriptTable};
use crate::helper_functions::{data_root, write_tsv};
use crate::models::RunContext;

mod config;
mod data_handling;
mod driver;
mod error;
mod helper_functions;
mod metagene;
mod models;
mod regression;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting ORF strength regression");

    let data = data_root();
    let opts = RegressOptions {
        start_only: env::var_os("RIBOREGRESS_STARTONLY").is_some(),
        metagene_path: env::var_os("RIBOREGRESS_METAGENE").map(PathBuf::from),
        ..RegressOptions::default()
    };
    opts.validate()?;

    // all stores load before dispatch; anything empty fails the run here
    let offsets = OffsetTable::from_file(&data.join("offsets.txt"), opts.max5mis)?;
    let transcripts = TranscriptTable::from_bed_file(&data.join("transcripts.bed"))?;
    let families = FamilyTable::from_file(&data.join("tfams.txt"))?;
    let orf_store = OrfStore::from_table(&data.join("orfs.tsv"))?;
    orf_store.validate_membership(&families)?;
    let cds_store = CdsStore::from_table(&data.join("cds.tsv"))?;
    let reads = TableReadSource::from_table(&data.join("readcounts.tsv"), &offsets)?;
    info!(
        "Context ready: {} transcripts across {} chromosomes",
        transcripts.len(),
        orf_store.chroms().len()
    );

    let ctx = RunContext {
        opts,
        offsets,
        transcripts,
        families,
        orf_store,
        cds_store,
        reads,
    };

    let template = driver::obtain_template(&ctx)?;

    let Some(outdir) = env::var_os("RIBOREGRESS_OUT") else {
        info!("No output directory configured; wrote metagene profile only");
        return Ok(());
    };
    let outdir = PathBuf::from(outdir);
    create_dir_all(&outdir)?;

    let mut output = driver::run_regression_pass(&ctx, &template)?;
    write_tsv(&mut output.orf_strengths, &outdir.join("orf_strengths.tsv"))?;
    write_tsv(&mut output.start_strengths, &outdir.join("start_strengths.tsv"))?;
    if let Some(stops) = output.stop_strengths.as_mut() {
        write_tsv(stops, &outdir.join("stop_strengths.tsv"))?;
    }
    serde_json::to_writer_pretty(
        File::create(outdir.join("skipped_families.json"))?,
        &output.skipped,
    )?;

    info!(
        "Wrote {} ORF strengths to {}",
        output.orf_strengths.height(),
        outdir.display()
    );
    Ok(())
}
