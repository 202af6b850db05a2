use std::fs;
use std::path::Path;

use anyhow::Result;
use bio::stats::{LogProb, Prob};

use crate::errors::UserError;

/// Sequencing error model: SNV error floor plus indel (gap) penalties,
/// with gap-open scaled up inside tandem repeats.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorModel {
    /// Mismatch probability floor applied on top of reported base qualities.
    pub snv_error: f64,
    /// Gap-open probability in non-repetitive sequence.
    pub gap_open: f64,
    /// Gap-extension probability.
    pub gap_extend: f64,
    /// Per-repeat-copy multiplier on the gap-open probability.
    pub repeat_multiplier: f64,
}

/// Longest repeat period considered by the indel error model.
const MAX_REPEAT_PERIOD: usize = 3;
/// Gap-open probability never exceeds this, repeats notwithstanding.
const MAX_GAP_OPEN: f64 = 0.2;

impl ErrorModel {
    /// A built-in profile by name, or a parameter file path.
    pub fn from_name_or_path(name: &str) -> Result<Self> {
        match name {
            "PCR" => Ok(ErrorModel {
                snv_error: 3e-4,
                gap_open: 1e-3,
                gap_extend: 0.18,
                repeat_multiplier: 2.0,
            }),
            "PCR-free" => Ok(ErrorModel {
                snv_error: 3e-4,
                gap_open: 2.5e-4,
                gap_extend: 0.1,
                repeat_multiplier: 1.8,
            }),
            "10X" => Ok(ErrorModel {
                snv_error: 4e-4,
                gap_open: 1.5e-3,
                gap_extend: 0.16,
                repeat_multiplier: 2.0,
            }),
            "ultra-sensitive" => Ok(ErrorModel {
                snv_error: 1e-5,
                gap_open: 5e-5,
                gap_extend: 0.05,
                repeat_multiplier: 1.5,
            }),
            other => {
                let path = Path::new(other);
                if path.is_file() {
                    let content = fs::read_to_string(path)?;
                    Self::parse(content.trim())
                } else if other.contains('=') {
                    Self::parse(other)
                } else {
                    Err(UserError::UnknownErrorModelProfile {
                        name: other.to_owned(),
                    }
                    .into())
                }
            }
        }
    }

    /// Parse `snv=..,open=..,extend=..,repeat=..` with PCR defaults for
    /// omitted keys.
    fn parse(spec: &str) -> Result<Self> {
        let mut model = Self::from_name_or_path("PCR")?;
        for pair in spec.split(',') {
            let mut kv = pair.splitn(2, '=');
            let key = kv.next().unwrap_or("").trim();
            let value: f64 = kv
                .next()
                .ok_or_else(|| UserError::UnknownErrorModelProfile {
                    name: spec.to_owned(),
                })?
                .trim()
                .parse()
                .map_err(|_| UserError::UnknownErrorModelProfile {
                    name: spec.to_owned(),
                })?;
            match key {
                "snv" => model.snv_error = value,
                "open" => model.gap_open = value,
                "extend" => model.gap_extend = value,
                "repeat" => model.repeat_multiplier = value,
                _ => {
                    return Err(UserError::UnknownErrorModelProfile {
                        name: spec.to_owned(),
                    }
                    .into())
                }
            }
        }
        Ok(model)
    }

    /// Position-specific gap-open probabilities over a haplotype sequence:
    /// positions inside a tandem repeat (period <= 3) open gaps more easily,
    /// scaled by the number of repeat copies.
    pub fn gap_open_penalties(&self, sequence: &[u8]) -> Vec<LogProb> {
        let copies = max_repeat_copies(sequence);
        sequence
            .iter()
            .enumerate()
            .map(|(i, _)| {
                let scaled = self.gap_open
                    * self
                        .repeat_multiplier
                        .powi(copies[i].saturating_sub(1) as i32);
                LogProb::from(Prob(scaled.min(MAX_GAP_OPEN)))
            })
            .collect()
    }

    pub fn gap_extend_prob(&self) -> LogProb {
        LogProb::from(Prob(self.gap_extend))
    }
}

/// For each position, the copy count of the longest tandem repeat tract
/// (period <= MAX_REPEAT_PERIOD) covering it.
fn max_repeat_copies(sequence: &[u8]) -> Vec<u32> {
    let mut result = vec![1u32; sequence.len()];
    for period in 1..=MAX_REPEAT_PERIOD.min(sequence.len()) {
        let mut run_start = 0usize;
        let mut i = 0usize;
        while i + period < sequence.len() {
            if sequence[i].eq_ignore_ascii_case(&sequence[i + period]) {
                i += 1;
                continue;
            }
            close_run(&mut result, run_start, i + period, period);
            i += 1;
            run_start = i;
        }
        close_run(&mut result, run_start, sequence.len(), period);
    }
    result
}

fn close_run(result: &mut [u32], start: usize, end: usize, period: usize) {
    let len = end - start;
    let copies = (len / period) as u32;
    if copies >= 2 {
        for slot in &mut result[start..end] {
            *slot = (*slot).max(copies);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_profiles_resolve() {
        let pcr = ErrorModel::from_name_or_path("PCR").unwrap();
        let pcr_free = ErrorModel::from_name_or_path("PCR-free").unwrap();
        assert!(pcr.gap_open > pcr_free.gap_open);
        assert!(ErrorModel::from_name_or_path("nonsense").is_err());
    }

    #[test]
    fn parses_inline_overrides() {
        let model = ErrorModel::from_name_or_path("open=1e-2,extend=0.3").unwrap();
        assert!((model.gap_open - 1e-2).abs() < 1e-12);
        assert!((model.gap_extend - 0.3).abs() < 1e-12);
        assert!((model.snv_error - 3e-4).abs() < 1e-12);
    }

    #[test]
    fn homopolymer_opens_gaps_more_easily() {
        let model = ErrorModel::from_name_or_path("PCR").unwrap();
        let penalties = model.gap_open_penalties(b"ACGTAAAAAAGTC");
        // inside the A*6 run the open probability is larger (less negative)
        assert!(penalties[6] > penalties[1]);
    }

    #[test]
    fn repeat_copies_are_counted() {
        let copies = max_repeat_copies(b"GATATATC");
        // AT x3 from position 1
        assert!(copies[2] >= 3);
        assert_eq!(copies[0], 1);
    }
}
