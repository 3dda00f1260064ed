//! metagene.rs – positional read-density templates
//!
//! The metagene profile is the expected shape of ribosome footprint
//! density over a coding sequence: a start-window template, a 3-position
//! codon template for the CDS body, and a stop-window template, one row
//! per accepted read length. It is estimated once per run from annotated
//! CDSs (or loaded verbatim from a previously saved file) and is read-only
//! afterward.

use std::collections::HashSet;
use std::path::Path;

use ndarray::{concatenate, s, Array2, ArrayView2, Axis};
use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::config::SHORT_STOP_NT;
use crate::error::{RegressError, RegressResult};
use crate::helper_functions::{read_tsv, write_tsv};
use crate::models::{CandidateOrf, RunContext};

/// Start/body/stop read-density templates plus their window bounds.
#[derive(Debug, Clone)]
pub struct ProfileTemplate {
    pub rdlens: Vec<u32>,
    /// [bins, s1 - s0] density around the start codon.
    pub start: Array2<f64>,
    /// [bins, 3] phase-averaged density over interior codons.
    pub body: Array2<f64>,
    /// [bins, t1 - t0] density around the stop codon.
    pub stop: Array2<f64>,
    pub start_nt: (i64, i64),
    pub stop_nt: (i64, i64),
}

impl ProfileTemplate {
    /// Columns of the expected profile for an ORF of `orflen` nt.
    pub fn profile_columns(&self, orflen: i64) -> i64 {
        orflen + self.stop_nt.1 - self.start_nt.0
    }

    /// Expected density profile for an ORF of `orflen` nucleotides
    /// (including the stop codon). `orflen` must be a positive multiple
    /// of 3; callers validate before dispatch. Output shape is
    /// [bins, orflen + t1 - s0] in all four length regimes, and equal
    /// lengths always produce identical output.
    pub fn expected_profile(&self, orflen: i64) -> Array2<f64> {
        debug_assert!(orflen > 0 && orflen % 3 == 0);
        let (s0, s1) = self.start_nt;
        let (t0, t1) = self.stop_nt;
        let stoplen = (t1 - t0) as usize;

        if orflen >= s1 - t0 {
            // full start window, full stop window, body tiled over the gap
            let reps = ((orflen - s1 + t0) / 3) as usize;
            if reps == 0 {
                hstack(&[self.start.view(), self.stop.view()])
            } else {
                let tiled = tile_columns(&self.body, reps);
                hstack(&[self.start.view(), tiled.view(), self.stop.view()])
            }
        } else if orflen >= s1 + SHORT_STOP_NT {
            // full start window, stop window truncated from the front
            let from = (s1 - t0 - orflen) as usize;
            hstack(&[self.start.view(), self.stop.slice(s![.., from..])])
        } else if orflen >= SHORT_STOP_NT {
            // truncated start head plus the short-stop slice
            let head = (orflen - SHORT_STOP_NT - s0) as usize;
            let tail = stoplen - (SHORT_STOP_NT + t1) as usize;
            hstack(&[
                self.start.slice(s![.., ..head]),
                self.stop.slice(s![.., tail..]),
            ])
        } else {
            // very short: minimal 3-nt head, correspondingly sized stop tail
            let head = (3 - s0) as usize;
            let from = (3 - orflen - t0) as usize;
            hstack(&[
                self.start.slice(s![.., ..head]),
                self.stop.slice(s![.., from..]),
            ])
        }
    }

    /// Tabular layout: region/position index plus one column per read
    /// length, matching the on-disk metagene file.
    pub fn to_frame(&self) -> PolarsResult<DataFrame> {
        let (s0, s1) = self.start_nt;
        let (t0, t1) = self.stop_nt;
        let mut region: Vec<&str> = Vec::new();
        let mut position: Vec<i64> = Vec::new();
        region.extend(std::iter::repeat("START").take((s1 - s0) as usize));
        position.extend(s0..s1);
        region.extend(std::iter::repeat("CDS").take(3));
        position.extend(0..3);
        region.extend(std::iter::repeat("STOP").take((t1 - t0) as usize));
        position.extend(t0..t1);

        let nrows = position.len();
        let mut df = DataFrame::default();
        df.with_column(Series::new("region".into(), region))?;
        df.with_column(Series::new("position".into(), position))?;
        for (bin, &rdlen) in self.rdlens.iter().enumerate() {
            let mut col: Vec<f64> = Vec::with_capacity(nrows);
            col.extend(self.start.row(bin).iter());
            col.extend(self.body.row(bin).iter());
            col.extend(self.stop.row(bin).iter());
            df.with_column(Series::new(PlSmallStr::from(rdlen.to_string()), col))?;
        }
        Ok(df)
    }

    pub fn save(&self, path: &Path) -> RegressResult<()> {
        let mut df = self.to_frame()?;
        write_tsv(&mut df, path)?;
        info!("Wrote metagene profile to {}", path.display());
        Ok(())
    }

    /// Load a previously saved template. Window bounds are re-derived from
    /// the position index; the read-length columns must match the offset
    /// table's accepted lengths exactly.
    pub fn load(path: &Path, expected_rdlens: &[u32]) -> RegressResult<ProfileTemplate> {
        let df = read_tsv(path)?;
        let names = df.get_column_names();
        if names.len() != expected_rdlens.len() + 2 {
            return Err(RegressError::Configuration(format!(
                "metagene file {} has {} read-length columns, offset table has {}",
                path.display(),
                names.len().saturating_sub(2),
                expected_rdlens.len()
            )));
        }
        let rdlens: Vec<u32> = names[2..]
            .iter()
            .map(|name| {
                name.parse().map_err(|_| {
                    RegressError::Configuration(format!(
                        "metagene file {}: column '{}' is not a read length",
                        path.display(),
                        name
                    ))
                })
            })
            .collect::<RegressResult<_>>()?;
        if rdlens != expected_rdlens {
            return Err(RegressError::Configuration(format!(
                "metagene file {}: read lengths {:?} do not match offset table {:?}",
                path.display(),
                rdlens,
                expected_rdlens
            )));
        }

        let start = region_block(&df, &rdlens, "START", path)?;
        let body = region_block(&df, &rdlens, "CDS", path)?;
        let stop = region_block(&df, &rdlens, "STOP", path)?;
        if body.1.ncols() != 3 {
            return Err(RegressError::Configuration(format!(
                "metagene file {}: CDS block has {} positions, expected 3",
                path.display(),
                body.1.ncols()
            )));
        }
        info!("Loaded metagene profile from {}", path.display());
        Ok(ProfileTemplate {
            rdlens,
            start: start.1,
            body: body.1,
            stop: stop.1,
            start_nt: start.0,
            stop_nt: stop.0,
        })
    }

    #[cfg(test)]
    pub fn uniform(
        rdlens: Vec<u32>,
        start_nt: (i64, i64),
        stop_nt: (i64, i64),
        value: f64,
    ) -> ProfileTemplate {
        let bins = rdlens.len();
        ProfileTemplate {
            start: Array2::from_elem((bins, (start_nt.1 - start_nt.0) as usize), value),
            body: Array2::from_elem((bins, 3), value),
            stop: Array2::from_elem((bins, (stop_nt.1 - stop_nt.0) as usize), value),
            rdlens,
            start_nt,
            stop_nt,
        }
    }
}

fn hstack(parts: &[ArrayView2<f64>]) -> Array2<f64> {
    concatenate(Axis(1), parts).expect("profile blocks share the bin axis")
}

fn tile_columns(block: &Array2<f64>, reps: usize) -> Array2<f64> {
    let mut tiled = Array2::zeros((block.nrows(), block.ncols() * reps));
    for rep in 0..reps {
        tiled
            .slice_mut(s![.., rep * block.ncols()..(rep + 1) * block.ncols()])
            .assign(block);
    }
    tiled
}

/// One region's rows as ((min pos, max pos + 1), [bins, positions]).
fn region_block(
    df: &DataFrame,
    rdlens: &[u32],
    region: &str,
    path: &Path,
) -> RegressResult<((i64, i64), Array2<f64>)> {
    let regions = df.column("region")?.str()?;
    let positions = df.column("position")?.i64()?;
    let mut rows: Vec<(i64, usize)> = Vec::new();
    for i in 0..df.height() {
        if regions.get(i) == Some(region) {
            let pos = positions.get(i).ok_or_else(|| {
                RegressError::Configuration(format!(
                    "metagene file {}: null position in {} block",
                    path.display(),
                    region
                ))
            })?;
            rows.push((pos, i));
        }
    }
    if rows.is_empty() {
        return Err(RegressError::Configuration(format!(
            "metagene file {}: no {} block",
            path.display(),
            region
        )));
    }
    rows.sort_unstable();
    let bounds = (rows[0].0, rows.last().unwrap().0 + 1);
    let mut block = Array2::zeros((rdlens.len(), rows.len()));
    for (bin, rdlen) in rdlens.iter().enumerate() {
        let col = df.column(&rdlen.to_string())?.f64()?;
        for (j, &(_, i)) in rows.iter().enumerate() {
            block[[bin, j]] = col.get(i).unwrap_or(f64::NAN);
        }
    }
    Ok((bounds, block))
}

// ───────── estimation ─────────

/// Partial template sums for one chromosome. Sums and inclusion counts
/// merge additively across chromosomes; division by the count is deferred
/// to the final merge so partial ordering cannot bias the average.
#[derive(Debug, Clone)]
pub struct MetagenePartial {
    pub start: Array2<f64>,
    pub body: Array2<f64>,
    pub stop: Array2<f64>,
    pub included: usize,
}

impl MetagenePartial {
    pub fn zeros(bins: usize, startlen: usize, stoplen: usize) -> MetagenePartial {
        MetagenePartial {
            start: Array2::zeros((bins, startlen)),
            body: Array2::zeros((bins, 3)),
            stop: Array2::zeros((bins, stoplen)),
            included: 0,
        }
    }

    pub fn merge(mut self, other: MetagenePartial) -> MetagenePartial {
        self.start += &other.start;
        self.body += &other.body;
        self.stop += &other.stop;
        self.included += other.included;
        self
    }
}

/// Accumulate normalized density over one chromosome's reference CDSs:
/// the longest annotated ORF per family, with enough 5' and 3' flank to
/// cover the configured windows and at least `min_cds_reads` in the
/// window. Each included CDS is normalized by its own mean so highly
/// expressed genes cannot dominate the template.
pub fn accumulate_chrom(ctx: &RunContext, chrom: &str) -> RegressResult<MetagenePartial> {
    let opts = &ctx.opts;
    let (s0, s1) = opts.start_nt();
    let (t0, t1) = opts.stop_nt();
    let startlen = (s1 - s0) as usize;
    let stoplen = (t1 - t0) as usize;
    let nbins = ctx.offsets.nbins();
    let mut partial = MetagenePartial::zeros(nbins, startlen, stoplen);

    let mut refs: Vec<&CandidateOrf> = ctx
        .orf_store
        .orfs_on(chrom)
        .iter()
        .filter(|orf| {
            ctx.cds_store.is_annotated(&orf.name)
                && orf.tstop > 0
                && orf.tcoord > -s0
                && orf.aalen > opts.min_aalen()
        })
        .collect();
    // the longest annotated CDS in each transcript family
    refs.sort_by(|a, b| b.aalen.cmp(&a.aalen));
    let mut seen: HashSet<&str> = HashSet::new();
    refs.retain(|orf| seen.insert(orf.tfam.as_str()));

    for orf in refs {
        let Some(transcript) = ctx.transcripts.get(&orf.tid) else {
            warn!(
                "transcript {} for annotated ORF {} not in BED input; skipped",
                orf.tid, orf.name
            );
            continue;
        };
        let tlen = transcript.len() as i64;
        if tlen < orf.tstop + t1 {
            // 3' UTR too short to cover the stop window
            continue;
        }
        let local = transcript.local_positions();
        let window = &local[(orf.tcoord + s0) as usize..(orf.tstop + t1) as usize];
        let cdslen = window.len();
        let hashed = ctx
            .reads
            .hashed_counts(&orf.chrom, orf.strand, window, &ctx.offsets);

        let mut counts = Array2::<f64>::zeros((nbins, cdslen));
        for ((rdlen, _nmis), row) in &hashed {
            let Some(bin) = ctx.offsets.bin_of(*rdlen) else {
                continue;
            };
            for (j, v) in row.iter().enumerate() {
                counts[[bin, j]] += v;
            }
        }

        let total = counts.sum();
        if total < opts.min_cds_reads {
            continue;
        }
        counts /= total / counts.len() as f64;

        partial.start += &counts.slice(s![.., ..startlen]);
        let interior = counts.slice(s![.., startlen..cdslen - stoplen]);
        let ncodons = interior.ncols() / 3;
        for bin in 0..nbins {
            for phase in 0..3 {
                let mut acc = 0.0;
                for codon in 0..ncodons {
                    acc += interior[[bin, 3 * codon + phase]];
                }
                partial.body[[bin, phase]] += acc / ncodons as f64;
            }
        }
        partial.stop += &counts.slice(s![.., cdslen - stoplen..]);
        partial.included += 1;
    }
    debug!("{}: {} CDSs included in metagene", chrom, partial.included);
    Ok(partial)
}

/// Divide the merged sums by the inclusion count.
pub fn finalize(ctx: &RunContext, partial: MetagenePartial) -> RegressResult<ProfileTemplate> {
    if partial.included == 0 {
        return Err(RegressError::InputIntegrity(
            "no reference CDS passed the metagene filters".to_string(),
        ));
    }
    let n = partial.included as f64;
    info!("Metagene profile averaged over {} CDSs", partial.included);
    Ok(ProfileTemplate {
        rdlens: ctx.offsets.rdlens().to_vec(),
        start: partial.start / n,
        body: partial.body / n,
        stop: partial.stop / n,
        start_nt: ctx.opts.start_nt(),
        stop_nt: ctx.opts.stop_nt(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> ProfileTemplate {
        // start window (-3, 6), stop window (-12, 0)
        let mut t = ProfileTemplate::uniform(vec![28, 29], (-3, 6), (-12, 0), 0.0);
        for (j, v) in t.start.iter_mut().enumerate() {
            *v = j as f64;
        }
        for (j, v) in t.body.iter_mut().enumerate() {
            *v = 100.0 + j as f64;
        }
        for (j, v) in t.stop.iter_mut().enumerate() {
            *v = 200.0 + j as f64;
        }
        t
    }

    #[test]
    fn profile_length_law_holds_in_all_regimes() {
        let t = template();
        // long cutoff is s1 - t0 = 18; medium cutoff is s1 + 9 = 15
        for orflen in [3i64, 6, 9, 12, 15, 18, 21, 60] {
            let prof = t.expected_profile(orflen);
            assert_eq!(prof.nrows(), 2);
            assert_eq!(
                prof.ncols() as i64,
                t.profile_columns(orflen),
                "wrong width at orflen {}",
                orflen
            );
        }
    }

    #[test]
    fn equal_lengths_are_bit_identical() {
        let t = template();
        for orflen in [3i64, 9, 15, 33] {
            assert_eq!(t.expected_profile(orflen), t.expected_profile(orflen));
        }
    }

    #[test]
    fn long_regime_tiles_body_between_windows() {
        let t = template();
        let prof = t.expected_profile(24); // two body codons
        assert_eq!(prof.ncols(), 27);
        // columns 9..15 are the tiled body for bin 0
        for rep in 0..2 {
            for phase in 0..3 {
                assert_eq!(prof[[0, 9 + rep * 3 + phase]], 100.0 + phase as f64);
            }
        }
        // stop block occupies the last 12 columns
        assert_eq!(prof[[0, 15]], 200.0);
    }

    #[test]
    fn medium_regime_truncates_stop_from_front() {
        let t = template();
        let prof = t.expected_profile(15);
        // start block intact, then the last 9 stop columns
        assert_eq!(prof[[0, 8]], 8.0);
        assert_eq!(prof[[0, 9]], 203.0);
        assert_eq!(prof.ncols(), 18);
    }

    #[test]
    fn very_short_regime_keeps_three_nt_head() {
        let t = template();
        let prof = t.expected_profile(3);
        // with t1 = 0 the whole profile is the 6-nt start head
        assert_eq!(prof.ncols(), 6);
        assert_eq!(prof[[0, 0]], 0.0);
        assert_eq!(prof[[0, 5]], 5.0);
    }

    #[test]
    fn frame_round_trip_is_bit_identical() {
        let t = template();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metagene.tsv");
        t.save(&path).unwrap();
        let back = ProfileTemplate::load(&path, &[28, 29]).unwrap();
        assert_eq!(back.start_nt, t.start_nt);
        assert_eq!(back.stop_nt, t.stop_nt);
        assert_eq!(back.start, t.start);
        assert_eq!(back.body, t.body);
        assert_eq!(back.stop, t.stop);
    }

    #[test]
    fn load_rejects_mismatched_read_lengths() {
        let t = template();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metagene.tsv");
        t.save(&path).unwrap();
        assert!(ProfileTemplate::load(&path, &[28, 30]).is_err());
        assert!(ProfileTemplate::load(&path, &[28]).is_err());
    }
}
