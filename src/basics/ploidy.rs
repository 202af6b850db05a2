use std::collections::HashMap;

use itertools::Itertools;

use crate::errors::UserError;

/// One `contig=ploidy` or `sample:contig=ploidy` declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContigPloidy {
    pub sample: Option<String>,
    pub contig: String,
    pub ploidy: usize,
}

impl ContigPloidy {
    fn same_scope(&self, other: &Self) -> bool {
        self.sample == other.sample && self.contig == other.contig
    }
}

/// Partial function (sample?, contig) -> ploidy with most-specific-wins
/// lookup and an organism-wide default.
#[derive(Debug, Clone)]
pub struct PloidyMap {
    default: usize,
    contigs: HashMap<String, usize>,
    sample_contigs: HashMap<(String, String), usize>,
}

impl PloidyMap {
    pub fn new(default: usize) -> Self {
        PloidyMap {
            default,
            contigs: HashMap::new(),
            sample_contigs: HashMap::new(),
        }
    }

    /// Build from flat declarations; two declarations for the same scope
    /// with different ploidies abort with the ambiguous-ploidy user error
    /// naming the offenders.
    pub fn from_declarations(
        default: usize,
        declarations: &[ContigPloidy],
    ) -> Result<Self, UserError> {
        let mut sorted = declarations.to_vec();
        sorted.sort_by(|a, b| {
            (&a.sample, &a.contig, a.ploidy).cmp(&(&b.sample, &b.contig, b.ploidy))
        });
        sorted.dedup();
        let ambiguous: Vec<&ContigPloidy> = sorted
            .windows(2)
            .filter(|w| w[0].same_scope(&w[1]))
            .flat_map(|w| [&w[0], &w[1]])
            .collect();
        if !ambiguous.is_empty() {
            let entries = ambiguous
                .iter()
                .unique()
                .map(|cp| match &cp.sample {
                    Some(sample) => format!("{}:{}={}", sample, cp.contig, cp.ploidy),
                    None => format!("{}={}", cp.contig, cp.ploidy),
                })
                .join(", ");
            return Err(UserError::AmbiguousPloidy { entries });
        }
        let mut result = PloidyMap::new(default);
        for cp in sorted {
            match cp.sample {
                Some(sample) => result.set_sample_contig(sample, cp.contig, cp.ploidy),
                None => result.set_contig(cp.contig, cp.ploidy),
            }
        }
        Ok(result)
    }

    pub fn set_contig<C: Into<String>>(&mut self, contig: C, ploidy: usize) {
        self.contigs.insert(contig.into(), ploidy);
    }

    pub fn set_sample_contig<S: Into<String>, C: Into<String>>(
        &mut self,
        sample: S,
        contig: C,
        ploidy: usize,
    ) {
        self.sample_contigs
            .insert((sample.into(), contig.into()), ploidy);
    }

    pub fn of(&self, sample: &str, contig: &str) -> usize {
        if let Some(&ploidy) = self
            .sample_contigs
            .get(&(sample.to_owned(), contig.to_owned()))
        {
            return ploidy;
        }
        if let Some(&ploidy) = self.contigs.get(contig) {
            return ploidy;
        }
        self.default
    }

    pub fn default_ploidy(&self) -> usize {
        self.default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn most_specific_wins() {
        let mut map = PloidyMap::new(2);
        map.set_contig("X", 1);
        map.set_sample_contig("tumour", "X", 2);
        assert_eq!(map.of("normal", "1"), 2);
        assert_eq!(map.of("normal", "X"), 1);
        assert_eq!(map.of("tumour", "X"), 2);
    }

    #[test]
    fn ambiguous_declarations_are_rejected() {
        let declarations = vec![
            ContigPloidy {
                sample: None,
                contig: "X".into(),
                ploidy: 1,
            },
            ContigPloidy {
                sample: None,
                contig: "X".into(),
                ploidy: 2,
            },
        ];
        let err = PloidyMap::from_declarations(2, &declarations).unwrap_err();
        match err {
            UserError::AmbiguousPloidy { entries } => {
                assert!(entries.contains("X=1"));
                assert!(entries.contains("X=2"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn repeated_identical_declarations_are_fine() {
        let declarations = vec![
            ContigPloidy {
                sample: None,
                contig: "Y".into(),
                ploidy: 1,
            };
            2
        ];
        let map = PloidyMap::from_declarations(2, &declarations).unwrap();
        assert_eq!(map.of("s", "Y"), 1);
    }
}
