//! orf_store.rs – candidate-ORF and annotated-CDS stores
//!
//! Both stores are tab-separated tables loaded through polars and held in
//! memory as native rows, queryable by chromosome. The ORF store carries
//! every candidate found on the transcriptome; the CDS store names the
//! annotated ORFs used to build the metagene.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use polars::prelude::*;
use tracing::{info, warn};

use crate::error::{RegressError, RegressResult};
use crate::helper_functions::read_tsv;
use crate::models::{CandidateOrf, Strand};

use super::transcripts::FamilyTable;

pub struct OrfStore {
    by_chrom: HashMap<String, Vec<CandidateOrf>>,
    chroms: Vec<String>,
}

impl OrfStore {
    pub fn from_table(path: &Path) -> RegressResult<OrfStore> {
        let df = read_tsv(path)?;
        if df.height() == 0 {
            return Err(RegressError::InputIntegrity(format!(
                "ORF store {} is empty",
                path.display()
            )));
        }

        let orfname = df.column("orfname")?.str()?;
        let tfam = df.column("tfam")?.str()?;
        let tid = df.column("tid")?.str()?;
        let tcoord = df.column("tcoord")?.i64()?;
        let tstop = df.column("tstop")?.i64()?;
        let aalen = df.column("AAlen")?.i64()?;
        let chrom = df.column("chrom")?.str()?;
        let gcoord = df.column("gcoord")?.i64()?;
        let gstop = df.column("gstop")?.i64()?;
        let strand = df.column("strand")?.str()?;
        let codon = df.column("codon")?.str()?;
        let orftype = df.column("orftype")?.str()?;
        let annot_start = df.column("annot_start")?.bool()?;
        let annot_stop = df.column("annot_stop")?.bool()?;

        let mut by_chrom: HashMap<String, Vec<CandidateOrf>> = HashMap::new();
        for i in 0..df.height() {
            let row_strand = strand
                .get(i)
                .and_then(Strand::from_symbol)
                .ok_or_else(|| {
                    RegressError::InputIntegrity(format!(
                        "ORF store row {}: missing or bad strand",
                        i
                    ))
                })?;
            let orf = CandidateOrf {
                name: required_str(orfname.get(i), i, "orfname")?,
                tfam: required_str(tfam.get(i), i, "tfam")?,
                tid: required_str(tid.get(i), i, "tid")?,
                tcoord: required(tcoord.get(i), i, "tcoord")?,
                tstop: required(tstop.get(i), i, "tstop")?,
                chrom: required_str(chrom.get(i), i, "chrom")?,
                gcoord: required(gcoord.get(i), i, "gcoord")?,
                gstop: required(gstop.get(i), i, "gstop")?,
                strand: row_strand,
                codon: required_str(codon.get(i), i, "codon")?,
                aalen: required(aalen.get(i), i, "AAlen")?,
                orftype: required_str(orftype.get(i), i, "orftype")?,
                annot_start: annot_start.get(i).unwrap_or(false),
                annot_stop: annot_stop.get(i).unwrap_or(false),
            };
            by_chrom.entry(orf.chrom.clone()).or_default().push(orf);
        }

        let mut chroms: Vec<String> = by_chrom.keys().cloned().collect();
        chroms.sort();
        info!(
            "Loaded {} candidate ORFs across {} chromosomes",
            df.height(),
            chroms.len()
        );
        Ok(OrfStore { by_chrom, chroms })
    }

    pub fn chroms(&self) -> &[String] {
        &self.chroms
    }

    /// Every stored ORF row on one chromosome.
    pub fn orfs_on(&self, chrom: &str) -> &[CandidateOrf] {
        self.by_chrom.get(chrom).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Rows eligible for regression: a stop downstream of the start and at
    /// least one transcript position upstream of the start. An ORF whose
    /// start is the first transcript base could never collect a read at its
    /// start codon.
    pub fn regression_candidates(&self, chrom: &str) -> Vec<CandidateOrf> {
        self.orfs_on(chrom)
            .iter()
            .filter(|orf| orf.tstop > 0 && orf.tcoord > 0)
            .cloned()
            .collect()
    }

    /// Cross-check every row's family assignment against the membership
    /// table; a transcript the table has never seen, or a conflicting
    /// assignment, means the stores were built from different annotation
    /// runs.
    pub fn validate_membership(&self, families: &FamilyTable) -> RegressResult<()> {
        for orfs in self.by_chrom.values() {
            for orf in orfs {
                match families.family_of(&orf.tid) {
                    Some(tfam) if tfam == orf.tfam => {}
                    Some(tfam) => {
                        return Err(RegressError::InputIntegrity(format!(
                            "ORF {} assigns {} to family {}, membership table says {}",
                            orf.name, orf.tid, orf.tfam, tfam
                        )))
                    }
                    None => {
                        return Err(RegressError::InputIntegrity(format!(
                            "transcript {} (ORF {}) missing from family membership table",
                            orf.tid, orf.name
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn from_orfs(orfs: Vec<CandidateOrf>) -> OrfStore {
        let mut by_chrom: HashMap<String, Vec<CandidateOrf>> = HashMap::new();
        for orf in orfs {
            by_chrom.entry(orf.chrom.clone()).or_default().push(orf);
        }
        let mut chroms: Vec<String> = by_chrom.keys().cloned().collect();
        chroms.sort();
        OrfStore { by_chrom, chroms }
    }
}

fn required<T>(val: Option<T>, row: usize, col: &str) -> RegressResult<T> {
    val.ok_or_else(|| {
        RegressError::InputIntegrity(format!("ORF store row {}: null {}", row, col))
    })
}

fn required_str(val: Option<&str>, row: usize, col: &str) -> RegressResult<String> {
    required(val, row, col).map(str::to_string)
}

/// Names of annotated CDS ORFs; the metagene pass draws its references
/// from the intersection of this set with the ORF store.
pub struct CdsStore {
    annotated: HashSet<String>,
}

impl CdsStore {
    pub fn from_table(path: &Path) -> RegressResult<CdsStore> {
        let df = read_tsv(path)?;
        let orfname = df.column("orfname")?.str()?;
        let annotated: HashSet<String> = orfname
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect();
        if annotated.is_empty() {
            warn!("CDS store {} names no annotated ORFs", path.display());
        } else {
            info!("Loaded {} annotated CDS names", annotated.len());
        }
        Ok(CdsStore { annotated })
    }

    pub fn is_annotated(&self, orfname: &str) -> bool {
        self.annotated.contains(orfname)
    }

    #[cfg(test)]
    pub fn from_names(names: &[&str]) -> CdsStore {
        CdsStore {
            annotated: names.iter().map(|s| s.to_string()).collect(),
        }
    }
}
