use bio::stats::{LogProb, PHREDProb, Prob};
use lazy_static::lazy_static;

lazy_static! {
    /// A miscalled base reads as any of the three other bases.
    static ref PROB_CONFUSION: LogProb = LogProb::from(Prob(1.0 / 3.0));
}

/// Inputs of one forward evaluation: read y against haplotype x with
/// position-specific gap-open penalties over the haplotype.
pub struct Alignment<'a> {
    pub read: &'a [u8],
    pub base_qualities: &'a [u8],
    pub haplotype: &'a [u8],
    pub gap_open: &'a [LogProb],
    pub gap_extend: LogProb,
    /// Mismatch probability floor from the error model.
    pub snv_error: f64,
}

/// Three-state (match, insertion, deletion) pair HMM evaluated with the
/// forward algorithm in log space. The haplotype's flanks are free: the read
/// may begin and end anywhere on it.
pub struct PairHmm {
    match_row: [Vec<LogProb>; 2],
    insertion_row: [Vec<LogProb>; 2],
    deletion_row: [Vec<LogProb>; 2],
}

impl Default for PairHmm {
    fn default() -> Self {
        PairHmm {
            match_row: [Vec::new(), Vec::new()],
            insertion_row: [Vec::new(), Vec::new()],
            deletion_row: [Vec::new(), Vec::new()],
        }
    }
}

impl PairHmm {
    pub fn new() -> Self {
        Self::default()
    }

    /// ln P(read | haplotype); `ln_zero` when the haplotype cannot carry the
    /// read's footprint.
    pub fn prob_related(&mut self, alignment: &Alignment) -> LogProb {
        let read_len = alignment.read.len();
        let hap_len = alignment.haplotype.len();
        if read_len == 0 || hap_len < read_len {
            return LogProb::ln_zero();
        }
        debug_assert_eq!(alignment.gap_open.len(), hap_len);

        let columns = hap_len + 1;
        for k in 0..2 {
            for row in [
                &mut self.match_row[k],
                &mut self.insertion_row[k],
                &mut self.deletion_row[k],
            ] {
                row.clear();
                row.resize(columns, LogProb::ln_zero());
            }
        }

        // uniform free start over haplotype positions
        let start = LogProb::from(Prob(1.0 / hap_len as f64));
        let mut prev = 0;
        let mut curr = 1;
        for i in 1..=read_len {
            for j in 1..=hap_len {
                let emission = emission(alignment, i - 1, j - 1);
                let gap_open = alignment.gap_open[j - 1];
                let stay = gap_open.ln_one_minus_exp();
                let close = alignment.gap_extend.ln_one_minus_exp();

                let from_match = if i == 1 {
                    start
                } else {
                    self.match_row[prev][j - 1] + stay
                };
                let from_insertion = self.insertion_row[prev][j - 1] + close;
                let from_deletion = self.deletion_row[prev][j - 1] + close;
                self.match_row[curr][j] = emission
                    + from_match
                        .ln_add_exp(from_insertion)
                        .ln_add_exp(from_deletion);

                // insertion: read base consumed, haplotype stays
                self.insertion_row[curr][j] = (self.match_row[prev][j] + gap_open)
                    .ln_add_exp(self.insertion_row[prev][j] + alignment.gap_extend);

                // deletion: haplotype base consumed, read stays
                self.deletion_row[curr][j] = (self.match_row[curr][j - 1] + gap_open)
                    .ln_add_exp(self.deletion_row[curr][j - 1] + alignment.gap_extend);
            }
            std::mem::swap(&mut prev, &mut curr);
        }

        // free end anywhere on the haplotype
        let finals: Vec<LogProb> = (1..=hap_len)
            .map(|j| self.match_row[prev][j].ln_add_exp(self.insertion_row[prev][j]))
            .collect();
        LogProb::ln_sum_exp(&finals).cap_numerical_overshoot(1e-6)
    }
}

fn emission(alignment: &Alignment, read_index: usize, hap_index: usize) -> LogProb {
    let read_base = alignment.read[read_index].to_ascii_uppercase();
    let hap_base = alignment.haplotype[hap_index].to_ascii_uppercase();
    let miscall = *Prob::from(LogProb::from(PHREDProb(f64::from(
        alignment.base_qualities[read_index],
    ))));
    let error = (miscall + alignment.snv_error).min(0.75);
    if read_base == hap_base && read_base != b'N' {
        LogProb::from(Prob(1.0 - error))
    } else {
        LogProb::from(Prob(error)) + *PROB_CONFUSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::likelihood::error_model::ErrorModel;

    fn align(read: &[u8], quals: &[u8], haplotype: &[u8]) -> LogProb {
        let model = ErrorModel::from_name_or_path("PCR").unwrap();
        let gap_open = model.gap_open_penalties(haplotype);
        let mut hmm = PairHmm::new();
        hmm.prob_related(&Alignment {
            read,
            base_qualities: quals,
            haplotype,
            gap_open: &gap_open,
            gap_extend: model.gap_extend_prob(),
            snv_error: model.snv_error,
        })
    }

    #[test]
    fn perfect_match_beats_mismatch() {
        let haplotype = b"ACGTACGTACGTACGT";
        let read = b"TACGTACG";
        let quals = vec![30u8; read.len()];
        let matching = align(read, &quals, haplotype);
        let mismatching = align(b"TACGAACG", &quals, haplotype);
        assert!(matching > mismatching);
        assert!(*matching < 0.0);
        // dominated by the uniform start over 16 offsets
        assert!(*matching > -4.0);
    }

    #[test]
    fn matching_haplotype_beats_reference_for_variant_read() {
        let reference = b"AAAAAAAAAAAAAAAAAAAA";
        let alternate = b"AAAAAAAAATAAAAAAAAAA";
        let read = b"AAAATAAAA";
        let quals = vec![30u8; read.len()];
        let on_alt = align(read, &quals, alternate);
        let on_ref = align(read, &quals, reference);
        assert!(on_alt > on_ref);
        // roughly the miscall probability apart
        assert!(*on_ref - *on_alt < -4.0);
    }

    #[test]
    fn short_haplotype_is_impossible() {
        let lik = align(b"ACGTACGT", &[30; 8], b"ACGT");
        assert_eq!(lik, LogProb::ln_zero());
    }

    #[test]
    fn low_quality_mismatch_is_cheap() {
        let haplotype = b"ACGTACGTACGTACGT";
        let quals_high = vec![30u8; 8];
        let mut quals_low = quals_high.clone();
        quals_low[4] = 2;
        let mismatch_high = align(b"TACGAACG", &quals_high, haplotype);
        let mismatch_low = align(b"TACGAACG", &quals_low, haplotype);
        assert!(mismatch_low > mismatch_high);
    }

    #[test]
    fn indel_read_pays_gap_penalty_once() {
        let haplotype = b"ACGTTGCAATCGGATCCTAG";
        // read with a one-base deletion relative to the haplotype
        let read = b"GCAATCGATCCTAG";
        let quals = vec![30u8; read.len()];
        let deleted = align(read, &quals, haplotype);
        let clean = align(b"GCAATCGGATCCTAG", &[30; 15], haplotype);
        assert!(clean > deleted);
        assert!(*deleted > -15.0, "gap too expensive: {:?}", deleted);
    }
}
