//! driver.rs – parallel dispatch and result merging
//!
//! The metagene pass partitions by chromosome and merges additive partial
//! sums; the regression pass partitions by transcript family, the natural
//! unit because families are maximal read-competing sets. Units share
//! nothing mutable: every worker reads the one RunContext and the one
//! ProfileTemplate. Merge order is irrelevant because results are keyed
//! by family and coordinate; the only blocking point is the final
//! collect.

use std::collections::BTreeMap;

use polars::prelude::*;
use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::metagene::{self, MetagenePartial, ProfileTemplate};
use crate::models::{
    CandidateOrf, OrfStrengthRecord, RunContext, StartStrengthRecord, StopStrengthRecord,
};
use crate::error::RegressResult;
use crate::regression::{self, FamilyOutcome};

/// One skipped family in the run-level report.
#[derive(Debug, Clone, Serialize)]
pub struct SkipRecord {
    pub tfam: String,
    pub reason: String,
}

pub struct RunOutput {
    pub orf_strengths: DataFrame,
    pub start_strengths: DataFrame,
    /// Absent in start-only mode.
    pub stop_strengths: Option<DataFrame>,
    pub skipped: Vec<SkipRecord>,
}

/// Load the metagene template when the configured file already exists;
/// otherwise estimate it, persisting to the configured path afterward.
pub fn obtain_template(ctx: &RunContext) -> RegressResult<ProfileTemplate> {
    if let Some(path) = &ctx.opts.metagene_path {
        if path.is_file() {
            return ProfileTemplate::load(path, ctx.offsets.rdlens());
        }
    }
    let template = run_metagene_pass(ctx)?;
    if let Some(path) = &ctx.opts.metagene_path {
        template.save(path)?;
    }
    Ok(template)
}

/// Chromosome-parallel template estimation. Division by the inclusion
/// count happens once after the merge, so per-chromosome partials stay
/// additive.
pub fn run_metagene_pass(ctx: &RunContext) -> RegressResult<ProfileTemplate> {
    let chroms = ctx.orf_store.chroms();
    info!("Estimating metagene profile over {} chromosomes", chroms.len());
    let partials: Vec<RegressResult<MetagenePartial>> = chroms
        .par_iter()
        .map(|chrom| metagene::accumulate_chrom(ctx, chrom))
        .collect();

    let (s0, s1) = ctx.opts.start_nt();
    let (t0, t1) = ctx.opts.stop_nt();
    let mut merged = MetagenePartial::zeros(
        ctx.offsets.nbins(),
        (s1 - s0) as usize,
        (t1 - t0) as usize,
    );
    for partial in partials {
        merged = merged.merge(partial?);
    }
    metagene::finalize(ctx, merged)
}

/// Family-parallel regression over every chromosome.
pub fn run_regression_pass(
    ctx: &RunContext,
    template: &ProfileTemplate,
) -> RegressResult<RunOutput> {
    let mut units: Vec<(String, Vec<CandidateOrf>)> = Vec::new();
    for chrom in ctx.orf_store.chroms() {
        let mut by_tfam: BTreeMap<String, Vec<CandidateOrf>> = BTreeMap::new();
        for orf in ctx.orf_store.regression_candidates(chrom) {
            by_tfam.entry(orf.tfam.clone()).or_default().push(orf);
        }
        units.extend(by_tfam);
    }
    info!("Regressing {} transcript families", units.len());

    let outcomes: Vec<FamilyOutcome> = units
        .par_iter()
        .map(|(tfam, orfs)| regression::regress_family(ctx, template, tfam, orfs))
        .collect();

    let mut orfs: Vec<OrfStrengthRecord> = Vec::new();
    let mut starts: Vec<StartStrengthRecord> = Vec::new();
    let mut stops: Vec<StopStrengthRecord> = Vec::new();
    let mut skipped: Vec<SkipRecord> = Vec::new();
    for outcome in outcomes {
        match outcome {
            FamilyOutcome::Fitted(result) => {
                orfs.extend(result.orfs);
                starts.extend(result.starts);
                stops.extend(result.stops);
            }
            FamilyOutcome::Empty { tfam, reason } => skipped.push(SkipRecord {
                tfam,
                reason: reason.to_string(),
            }),
        }
    }
    info!(
        "Fitted {} ORFs, {} starts, {} stops; {} families skipped",
        orfs.len(),
        starts.len(),
        stops.len(),
        skipped.len()
    );

    orfs.sort_by(|a, b| {
        (&a.orf.chrom, a.orf.gcoord, &a.orf.name).cmp(&(&b.orf.chrom, b.orf.gcoord, &b.orf.name))
    });
    starts.sort_by(|a, b| (&a.chrom, a.gcoord, &a.tfam).cmp(&(&b.chrom, b.gcoord, &b.tfam)));
    stops.sort_by(|a, b| (&a.chrom, a.gstop, &a.tfam).cmp(&(&b.chrom, b.gstop, &b.tfam)));

    Ok(RunOutput {
        orf_strengths: orf_frame(&orfs)?,
        start_strengths: start_frame(&starts)?,
        stop_strengths: if ctx.opts.start_only {
            None
        } else {
            Some(stop_frame(&stops)?)
        },
        skipped,
    })
}

// ───────── output tables ─────────

fn orf_frame(records: &[OrfStrengthRecord]) -> PolarsResult<DataFrame> {
    let mut df = DataFrame::default();
    df.with_column(Series::new(
        "orfname".into(),
        records.iter().map(|r| r.orf.name.as_str()).collect::<Vec<_>>(),
    ))?;
    df.with_column(Series::new(
        "tfam".into(),
        records.iter().map(|r| r.orf.tfam.as_str()).collect::<Vec<_>>(),
    ))?;
    df.with_column(Series::new(
        "tid".into(),
        records.iter().map(|r| r.orf.tid.as_str()).collect::<Vec<_>>(),
    ))?;
    df.with_column(Series::new(
        "tcoord".into(),
        records.iter().map(|r| r.orf.tcoord).collect::<Vec<_>>(),
    ))?;
    df.with_column(Series::new(
        "tstop".into(),
        records.iter().map(|r| r.orf.tstop).collect::<Vec<_>>(),
    ))?;
    df.with_column(Series::new(
        "chrom".into(),
        records.iter().map(|r| r.orf.chrom.as_str()).collect::<Vec<_>>(),
    ))?;
    df.with_column(Series::new(
        "gcoord".into(),
        records.iter().map(|r| r.orf.gcoord).collect::<Vec<_>>(),
    ))?;
    df.with_column(Series::new(
        "gstop".into(),
        records.iter().map(|r| r.orf.gstop).collect::<Vec<_>>(),
    ))?;
    df.with_column(Series::new(
        "strand".into(),
        records.iter().map(|r| r.orf.strand.symbol()).collect::<Vec<_>>(),
    ))?;
    df.with_column(Series::new(
        "codon".into(),
        records.iter().map(|r| r.orf.codon.as_str()).collect::<Vec<_>>(),
    ))?;
    df.with_column(Series::new(
        "AAlen".into(),
        records.iter().map(|r| r.orf.aalen).collect::<Vec<_>>(),
    ))?;
    df.with_column(Series::new(
        "orftype".into(),
        records.iter().map(|r| r.orf.orftype.as_str()).collect::<Vec<_>>(),
    ))?;
    df.with_column(Series::new(
        "annot_start".into(),
        records.iter().map(|r| r.orf.annot_start).collect::<Vec<_>>(),
    ))?;
    df.with_column(Series::new(
        "annot_stop".into(),
        records.iter().map(|r| r.orf.annot_stop).collect::<Vec<_>>(),
    ))?;
    df.with_column(Series::new(
        "orf_strength".into(),
        records.iter().map(|r| r.strength).collect::<Vec<_>>(),
    ))?;
    df.with_column(Series::new(
        "W_orf".into(),
        records.iter().map(|r| r.weight).collect::<Vec<_>>(),
    ))?;
    Ok(df)
}

fn start_frame(records: &[StartStrengthRecord]) -> PolarsResult<DataFrame> {
    let mut df = DataFrame::default();
    df.with_column(Series::new(
        "tfam".into(),
        records.iter().map(|r| r.tfam.as_str()).collect::<Vec<_>>(),
    ))?;
    df.with_column(Series::new(
        "chrom".into(),
        records.iter().map(|r| r.chrom.as_str()).collect::<Vec<_>>(),
    ))?;
    df.with_column(Series::new(
        "gcoord".into(),
        records.iter().map(|r| r.gcoord).collect::<Vec<_>>(),
    ))?;
    df.with_column(Series::new(
        "strand".into(),
        records.iter().map(|r| r.strand.symbol()).collect::<Vec<_>>(),
    ))?;
    df.with_column(Series::new(
        "codon".into(),
        records.iter().map(|r| r.codon.as_str()).collect::<Vec<_>>(),
    ))?;
    df.with_column(Series::new(
        "start_strength".into(),
        records.iter().map(|r| r.strength).collect::<Vec<_>>(),
    ))?;
    df.with_column(Series::new(
        "W_start".into(),
        records.iter().map(|r| r.weight).collect::<Vec<_>>(),
    ))?;
    Ok(df)
}

fn stop_frame(records: &[StopStrengthRecord]) -> PolarsResult<DataFrame> {
    let mut df = DataFrame::default();
    df.with_column(Series::new(
        "tfam".into(),
        records.iter().map(|r| r.tfam.as_str()).collect::<Vec<_>>(),
    ))?;
    df.with_column(Series::new(
        "chrom".into(),
        records.iter().map(|r| r.chrom.as_str()).collect::<Vec<_>>(),
    ))?;
    df.with_column(Series::new(
        "gstop".into(),
        records.iter().map(|r| r.gstop).collect::<Vec<_>>(),
    ))?;
    df.with_column(Series::new(
        "strand".into(),
        records.iter().map(|r| r.strand.symbol()).collect::<Vec<_>>(),
    ))?;
    df.with_column(Series::new(
        "stop_strength".into(),
        records.iter().map(|r| r.strength).collect::<Vec<_>>(),
    ))?;
    df.with_column(Series::new(
        "W_stop".into(),
        records.iter().map(|r| r.weight).collect::<Vec<_>>(),
    ))?;
    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegressOptions;
    use crate::data_handling::alignment::TableReadSource;
    use crate::data_handling::offsets::OffsetTable;
    use crate::data_handling::orf_store::{CdsStore, OrfStore};
    use crate::data_handling::transcripts::{FamilyTable, Transcript, TranscriptTable};
    use crate::models::Strand;

    fn orf(
        name: &str,
        tfam: &str,
        tid: &str,
        chrom: &str,
        tcoord: i64,
        tstop: i64,
    ) -> CandidateOrf {
        CandidateOrf {
            name: name.to_string(),
            tfam: tfam.to_string(),
            tid: tid.to_string(),
            tcoord,
            tstop,
            chrom: chrom.to_string(),
            gcoord: tcoord,
            gstop: tstop,
            strand: Strand::Forward,
            codon: "ATG".to_string(),
            aalen: (tstop - tcoord) / 3 - 1,
            orftype: "new".to_string(),
            annot_start: true,
            annot_stop: true,
        }
    }

    fn transcript(tid: &str, chrom: &str) -> Transcript {
        Transcript {
            tid: tid.to_string(),
            chrom: chrom.to_string(),
            strand: Strand::Forward,
            exons: vec![(0, 500)],
        }
    }

    fn two_family_context() -> RunContext {
        // fam1 on chr1 has reads over its ORF; fam2 on chr2 has none
        let offsets = OffsetTable::from_entries(&[(28, 0)], 0);
        let mut entries: Vec<(&str, Strand, i64, u32, u8, f64)> = (97..400)
            .map(|pos| ("chr1", Strand::Forward, pos, 28u32, 0u8, 1.0))
            .collect();
        entries.push(("chr1", Strand::Forward, 10, 28, 0, 2.0));
        let reads = TableReadSource::from_entries(&entries, &offsets);
        RunContext {
            opts: RegressOptions::default(),
            offsets,
            transcripts: TranscriptTable::from_transcripts(vec![
                transcript("t1", "chr1"),
                transcript("t2", "chr2"),
            ]),
            families: FamilyTable::from_pairs(&[("t1", "fam1"), ("t2", "fam2")]),
            orf_store: OrfStore::from_orfs(vec![
                orf("orf1", "fam1", "t1", "chr1", 100, 400),
                orf("orf2", "fam2", "t2", "chr2", 100, 400),
            ]),
            cds_store: CdsStore::from_names(&["orf1"]),
            reads,
        }
    }

    #[test]
    fn heterogeneous_outcomes_merge_into_one_output() {
        let ctx = two_family_context();
        let template = ProfileTemplate::uniform(vec![28], (-3, 150), (-21, 0), 1.0);
        let output = run_regression_pass(&ctx, &template).unwrap();

        assert_eq!(output.orf_strengths.height(), 1);
        assert_eq!(output.start_strengths.height(), 1);
        assert_eq!(output.stop_strengths.as_ref().unwrap().height(), 1);
        assert_eq!(output.skipped.len(), 1);
        assert_eq!(output.skipped[0].tfam, "fam2");
    }

    #[test]
    fn start_only_mode_omits_stop_table() {
        let mut ctx = two_family_context();
        ctx.opts.start_only = true;
        let template = ProfileTemplate::uniform(vec![28], (-3, 150), (-21, 0), 1.0);
        let output = run_regression_pass(&ctx, &template).unwrap();
        assert!(output.stop_strengths.is_none());
        assert_eq!(output.start_strengths.height(), 1);
    }

    #[test]
    fn metagene_pass_recovers_uniform_density() {
        let offsets = OffsetTable::from_entries(&[(28, 0)], 0);
        let entries: Vec<(&str, Strand, i64, u32, u8, f64)> = (12..75)
            .map(|pos| ("chr1", Strand::Forward, pos, 28u32, 0u8, 1.0))
            .collect();
        let reads = TableReadSource::from_entries(&entries, &offsets);
        let ctx = RunContext {
            opts: RegressOptions {
                start_range: (1, 2),
                stop_range: (4, 0),
                min_cds_reads: 10.0,
                ..RegressOptions::default()
            },
            offsets,
            transcripts: TranscriptTable::from_transcripts(vec![transcript("t1", "chr1")]),
            families: FamilyTable::from_pairs(&[("t1", "fam1")]),
            orf_store: OrfStore::from_orfs(vec![orf("orf1", "fam1", "t1", "chr1", 15, 75)]),
            cds_store: CdsStore::from_names(&["orf1"]),
            reads,
        };
        let template = run_metagene_pass(&ctx).unwrap();
        assert_eq!(template.start_nt, (-3, 6));
        assert_eq!(template.stop_nt, (-12, 0));
        assert!(template.start.iter().all(|&v| (v - 1.0).abs() < 1e-12));
        assert!(template.body.iter().all(|&v| (v - 1.0).abs() < 1e-12));
        assert!(template.stop.iter().all(|&v| (v - 1.0).abs() < 1e-12));
    }

    #[test]
    fn computed_and_reloaded_templates_agree() {
        let offsets = OffsetTable::from_entries(&[(28, 0)], 0);
        let entries: Vec<(&str, Strand, i64, u32, u8, f64)> = (12..75)
            .map(|pos| ("chr1", Strand::Forward, pos, 28u32, 0u8, if pos % 3 == 0 { 2.0 } else { 0.5 }))
            .collect();
        let reads = TableReadSource::from_entries(&entries, &offsets);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metagene.tsv");
        let ctx = RunContext {
            opts: RegressOptions {
                start_range: (1, 2),
                stop_range: (4, 0),
                min_cds_reads: 10.0,
                metagene_path: Some(path.clone()),
                ..RegressOptions::default()
            },
            offsets,
            transcripts: TranscriptTable::from_transcripts(vec![transcript("t1", "chr1")]),
            families: FamilyTable::from_pairs(&[("t1", "fam1")]),
            orf_store: OrfStore::from_orfs(vec![orf("orf1", "fam1", "t1", "chr1", 15, 75)]),
            cds_store: CdsStore::from_names(&["orf1"]),
            reads,
        };
        // first call computes and persists, second loads the file
        let computed = obtain_template(&ctx).unwrap();
        assert!(path.is_file());
        let loaded = obtain_template(&ctx).unwrap();
        assert_eq!(computed.start, loaded.start);
        assert_eq!(computed.body, loaded.body);
        assert_eq!(computed.stop, loaded.stop);
        assert_eq!(computed.start_nt, loaded.start_nt);
        assert_eq!(computed.stop_nt, loaded.stop_nt);
    }
}
