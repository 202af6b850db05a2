use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::UserError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sex {
    Female,
    Male,
    Unknown,
}

#[derive(Debug, Clone)]
struct Member {
    sex: Sex,
    mother: Option<String>,
    father: Option<String>,
}

/// A directed acyclic sample graph: each member optionally points at its
/// mother and father.
#[derive(Debug, Clone, Default)]
pub struct Pedigree {
    members: HashMap<String, Member>,
}

/// A (mother, father, child) unit extracted from samples and/or pedigree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trio {
    pub mother: String,
    pub father: String,
    pub child: String,
}

impl Pedigree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_founder<S: Into<String>>(&mut self, name: S, sex: Sex) {
        self.members.insert(
            name.into(),
            Member {
                sex,
                mother: None,
                father: None,
            },
        );
    }

    pub fn add_descendant<S: Into<String>>(
        &mut self,
        name: S,
        sex: Sex,
        mother: &str,
        father: &str,
    ) {
        self.members.insert(
            name.into(),
            Member {
                sex,
                mother: Some(mother.to_owned()),
                father: Some(father.to_owned()),
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.members.contains_key(name)
    }

    pub fn sex_of(&self, name: &str) -> Option<Sex> {
        self.members.get(name).map(|m| m.sex)
    }

    pub fn mother_of(&self, name: &str) -> Option<&str> {
        self.members.get(name)?.mother.as_deref()
    }

    pub fn father_of(&self, name: &str) -> Option<&str> {
        self.members.get(name)?.father.as_deref()
    }

    pub fn is_parent_of(&self, parent: &str, child: &str) -> bool {
        self.mother_of(child) == Some(parent) || self.father_of(child) == Some(parent)
    }

    /// Do the given samples form exactly one (mother, father, child) unit of
    /// this pedigree?
    pub fn is_trio(&self, samples: &[String]) -> bool {
        self.extract_trio(samples).is_some()
    }

    pub fn extract_trio(&self, samples: &[String]) -> Option<Trio> {
        if samples.len() != 3 {
            return None;
        }
        for child in samples {
            let mother = self.mother_of(child)?.to_owned();
            let father = self.father_of(child)?.to_owned();
            if samples.contains(&mother) && samples.contains(&father) && mother != father {
                return Some(Trio {
                    mother,
                    father,
                    child: child.clone(),
                });
            }
        }
        None
    }
}

impl Trio {
    /// Assemble a trio from explicit parent options, validating composition
    /// against the sample set.
    pub fn from_parent_options(
        samples: &[String],
        maternal: &str,
        paternal: &str,
    ) -> Result<Self, UserError> {
        if samples.len() != 3 {
            return Err(UserError::BadTrioSampleCount {
                num_samples: samples.len(),
            });
        }
        if maternal == paternal {
            return Err(UserError::SameTrioParents {
                sample: maternal.to_owned(),
            });
        }
        let mut unmatched = Vec::new();
        for parent in [maternal, paternal] {
            if !samples.iter().any(|s| s == parent) {
                unmatched.push(parent.to_owned());
            }
        }
        if !unmatched.is_empty() {
            return Err(UserError::TrioParentNotInSampleSet { unmatched });
        }
        let child = samples
            .iter()
            .find(|s| s.as_str() != maternal && s.as_str() != paternal)
            .expect("three samples with two distinct parents leave one child")
            .clone();
        Ok(Trio {
            mother: maternal.to_owned(),
            father: paternal.to_owned(),
            child,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family() -> Pedigree {
        let mut ped = Pedigree::new();
        ped.add_founder("mum", Sex::Female);
        ped.add_founder("dad", Sex::Male);
        ped.add_descendant("kid", Sex::Unknown, "mum", "dad");
        ped
    }

    #[test]
    fn trio_detection() {
        let ped = family();
        let samples = vec!["mum".to_owned(), "dad".to_owned(), "kid".to_owned()];
        assert!(ped.is_trio(&samples));
        let trio = ped.extract_trio(&samples).unwrap();
        assert_eq!(trio.child, "kid");
        assert_eq!(trio.mother, "mum");

        let unrelated = vec!["mum".to_owned(), "dad".to_owned(), "other".to_owned()];
        assert!(!ped.is_trio(&unrelated));
    }

    #[test]
    fn explicit_trio_composition_errors() {
        let samples = vec!["a".to_owned(), "b".to_owned(), "c".to_owned()];
        assert!(matches!(
            Trio::from_parent_options(&samples, "a", "a"),
            Err(UserError::SameTrioParents { .. })
        ));
        assert!(matches!(
            Trio::from_parent_options(&samples, "a", "x"),
            Err(UserError::TrioParentNotInSampleSet { .. })
        ));
        let trio = Trio::from_parent_options(&samples, "a", "b").unwrap();
        assert_eq!(trio.child, "c");
        assert!(matches!(
            Trio::from_parent_options(&samples[..2].to_vec(), "a", "b"),
            Err(UserError::BadTrioSampleCount { num_samples: 2 })
        ));
    }
}
