use std::fmt;

use crate::config::RegressOptions;
use crate::data_handling::alignment::TableReadSource;
use crate::data_handling::offsets::OffsetTable;
use crate::data_handling::orf_store::{CdsStore, OrfStore};
use crate::data_handling::transcripts::{FamilyTable, TranscriptTable};

/// Genomic strand of a transcript or candidate ORF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strand {
    Forward,
    Reverse,
}

impl Strand {
    pub fn from_symbol(sym: &str) -> Option<Strand> {
        match sym {
            "+" => Some(Strand::Forward),
            "-" => Some(Strand::Reverse),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Strand::Forward => "+",
            Strand::Reverse => "-",
        }
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// One candidate open reading frame on one transcript.
///
/// Transcript coordinates (`tcoord`, `tstop`) are 0-based half-open in
/// spliced transcript space; `gcoord`/`gstop` are the genomic positions of
/// the start and stop codons. Synthetic candidates reuse the coordinate
/// fields as markers: abortive-initiation stubs carry `gstop == gcoord`
/// with `tstop == tcoord + 3`, histop stubs carry `gcoord == gstop` with
/// `tcoord == tstop`.
#[derive(Debug, Clone)]
pub struct CandidateOrf {
    pub name: String,
    pub tfam: String,
    pub tid: String,
    pub tcoord: i64,
    pub tstop: i64,
    pub chrom: String,
    pub gcoord: i64,
    pub gstop: i64,
    pub strand: Strand,
    pub codon: String,
    pub aalen: i64,
    pub orftype: String,
    pub annot_start: bool,
    pub annot_stop: bool,
}

impl CandidateOrf {
    /// Histop stub covering the final bases before a stop codon.
    pub fn is_histop(&self) -> bool {
        self.tcoord == self.tstop
    }

    /// Abortive-initiation stub at a start codon.
    pub fn is_abortive(&self) -> bool {
        self.gcoord == self.gstop && self.tcoord != self.tstop
    }

    /// A real ORF spanning from its start to a distinct stop.
    pub fn is_elongating(&self) -> bool {
        self.gcoord != self.gstop
    }
}

/// Fitted strength and confidence weight for one retained candidate.
#[derive(Debug, Clone)]
pub struct OrfStrengthRecord {
    pub orf: CandidateOrf,
    pub strength: f64,
    pub weight: f64,
}

/// Aggregated strength at one genomic start codon.
#[derive(Debug, Clone)]
pub struct StartStrengthRecord {
    pub tfam: String,
    pub chrom: String,
    pub gcoord: i64,
    pub strand: Strand,
    pub codon: String,
    pub strength: f64,
    pub weight: f64,
}

/// Aggregated strength at one genomic stop codon.
#[derive(Debug, Clone)]
pub struct StopStrengthRecord {
    pub tfam: String,
    pub chrom: String,
    pub gstop: i64,
    pub strand: Strand,
    pub strength: f64,
    pub weight: f64,
}

/// Read-only inputs broadcast to every parallel unit.
///
/// Built once in `main` after all stores load; nothing in here is mutated
/// for the rest of the run, so references can be shared freely across
/// worker threads.
pub struct RunContext {
    pub opts: RegressOptions,
    pub offsets: OffsetTable,
    pub transcripts: TranscriptTable,
    pub families: FamilyTable,
    pub orf_store: OrfStore,
    pub cds_store: CdsStore,
    pub reads: TableReadSource,
}
