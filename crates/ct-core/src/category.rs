//! Species category roles and the classifier that assigns them.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::types::Species;

/// The role a detection plays in the survey process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    /// Opens a survey (or re-triggers an open one).
    Primary,
    /// A recurrent event inside an open survey.
    Secondary,
    /// Censors an open survey.
    Tertiary,
    /// Not part of the survey process.
    Ignored,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Tertiary => "tertiary",
            Self::Ignored => "ignored",
        };
        write!(f, "{s}")
    }
}

/// How species outside the primary and secondary sets are treated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TertiaryPolicy {
    /// Every other observed species censors surveys.
    #[default]
    Complement,
    /// Only the listed species censor; anything unlisted is ignored.
    Explicit(BTreeSet<Species>),
}

/// Caller-supplied species sets for each category role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySets {
    pub primary: BTreeSet<Species>,
    #[serde(default)]
    pub secondary: BTreeSet<Species>,
    #[serde(default)]
    pub tertiary: TertiaryPolicy,
}

impl CategorySets {
    /// Builds sets from plain labels. Blank labels are rejected.
    pub fn from_labels<P, S>(
        primary: P,
        secondary: S,
        tertiary: Option<Vec<String>>,
    ) -> Result<Self, ConfigurationError>
    where
        P: IntoIterator,
        P::Item: Into<String>,
        S: IntoIterator,
        S::Item: Into<String>,
    {
        let primary = species_set(primary, Category::Primary)?;
        let secondary = species_set(secondary, Category::Secondary)?;
        let tertiary = match tertiary {
            None => TertiaryPolicy::Complement,
            Some(labels) => TertiaryPolicy::Explicit(species_set(labels, Category::Tertiary)?),
        };
        Ok(Self {
            primary,
            secondary,
            tertiary,
        })
    }

    /// Checks the sets on their own, before any detection is read: the
    /// primary set is non-empty and no label is listed under two roles.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.primary.is_empty() {
            return Err(ConfigurationError::EmptyPrimarySet);
        }
        check_disjoint(&self.primary, Category::Primary, &self.secondary, Category::Secondary)?;
        if let TertiaryPolicy::Explicit(listed) = &self.tertiary {
            check_disjoint(&self.primary, Category::Primary, listed, Category::Tertiary)?;
            check_disjoint(&self.secondary, Category::Secondary, listed, Category::Tertiary)?;
        }
        Ok(())
    }
}

fn species_set<I>(labels: I, role: Category) -> Result<BTreeSet<Species>, ConfigurationError>
where
    I: IntoIterator,
    I::Item: Into<String>,
{
    labels
        .into_iter()
        .map(|label| {
            let label: String = label.into();
            if label.trim().is_empty() {
                return Err(ConfigurationError::BlankSpeciesLabel { role });
            }
            Species::new(label).map_err(|_| ConfigurationError::BlankSpeciesLabel { role })
        })
        .collect()
}

/// Resolved species-to-category mapping for one run.
///
/// The tertiary complement is computed once from the species observed in
/// the whole input and never recomputed per site.
#[derive(Debug, Clone)]
pub struct Classifier {
    primary: BTreeSet<Species>,
    secondary: BTreeSet<Species>,
    tertiary: BTreeSet<Species>,
    unlisted: Category,
}

impl Classifier {
    /// Resolves the category sets against the observed species.
    pub fn new<'a, I>(sets: &CategorySets, observed: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = &'a Species>,
    {
        sets.validate()?;

        let (tertiary, unlisted) = match &sets.tertiary {
            TertiaryPolicy::Explicit(listed) => (listed.clone(), Category::Ignored),
            TertiaryPolicy::Complement => {
                let complement = observed
                    .into_iter()
                    .filter(|s| !sets.primary.contains(*s) && !sets.secondary.contains(*s))
                    .cloned()
                    .collect();
                (complement, Category::Tertiary)
            }
        };

        tracing::debug!(
            primary = sets.primary.len(),
            secondary = sets.secondary.len(),
            tertiary = tertiary.len(),
            %unlisted,
            "resolved species categories"
        );

        Ok(Self {
            primary: sets.primary.clone(),
            secondary: sets.secondary.clone(),
            tertiary,
            unlisted,
        })
    }

    /// Returns the category of a species label.
    pub fn classify(&self, species: &Species) -> Category {
        if self.primary.contains(species) {
            Category::Primary
        } else if self.secondary.contains(species) {
            Category::Secondary
        } else if self.tertiary.contains(species) {
            Category::Tertiary
        } else {
            self.unlisted
        }
    }

    /// The resolved tertiary set (the complement, when defaulted).
    pub const fn tertiary(&self) -> &BTreeSet<Species> {
        &self.tertiary
    }
}

fn check_disjoint(
    a: &BTreeSet<Species>,
    a_role: Category,
    b: &BTreeSet<Species>,
    b_role: Category,
) -> Result<(), ConfigurationError> {
    match a.intersection(b).next() {
        Some(species) => Err(ConfigurationError::OverlappingCategories {
            species: species.clone(),
            first: a_role,
            second: b_role,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn species(labels: &[&str]) -> BTreeSet<Species> {
        labels.iter().map(|s| Species::new(*s).unwrap()).collect()
    }

    fn sp(label: &str) -> Species {
        Species::new(label).unwrap()
    }

    #[test]
    fn complement_policy_treats_other_observed_species_as_tertiary() {
        let sets = CategorySets {
            primary: species(&["lynx"]),
            secondary: species(&["roe_deer"]),
            tertiary: TertiaryPolicy::Complement,
        };
        let observed = species(&["lynx", "roe_deer", "human", "dog"]);
        let classifier = Classifier::new(&sets, &observed).unwrap();

        assert_eq!(classifier.classify(&sp("lynx")), Category::Primary);
        assert_eq!(classifier.classify(&sp("roe_deer")), Category::Secondary);
        assert_eq!(classifier.classify(&sp("human")), Category::Tertiary);
        assert_eq!(classifier.tertiary(), &species(&["dog", "human"]));
        // Unobserved labels still fall under the default policy.
        assert_eq!(classifier.classify(&sp("badger")), Category::Tertiary);
    }

    #[test]
    fn explicit_policy_ignores_unlisted_species() {
        let sets = CategorySets {
            primary: species(&["lynx"]),
            secondary: species(&["roe_deer"]),
            tertiary: TertiaryPolicy::Explicit(species(&["human"])),
        };
        let observed = species(&["lynx", "roe_deer", "human", "dog"]);
        let classifier = Classifier::new(&sets, &observed).unwrap();

        assert_eq!(classifier.classify(&sp("human")), Category::Tertiary);
        assert_eq!(classifier.classify(&sp("dog")), Category::Ignored);
    }

    #[test]
    fn overlapping_sets_are_a_configuration_error() {
        let sets = CategorySets {
            primary: species(&["lynx", "fox"]),
            secondary: species(&["fox"]),
            tertiary: TertiaryPolicy::Complement,
        };
        let err = Classifier::new(&sets, &BTreeSet::new()).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::OverlappingCategories {
                species: sp("fox"),
                first: Category::Primary,
                second: Category::Secondary,
            }
        );

        let sets = CategorySets {
            primary: species(&["lynx"]),
            secondary: species(&["roe_deer"]),
            tertiary: TertiaryPolicy::Explicit(species(&["roe_deer"])),
        };
        let err = Classifier::new(&sets, &BTreeSet::new()).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::OverlappingCategories {
                first: Category::Secondary,
                second: Category::Tertiary,
                ..
            }
        ));
    }

    #[test]
    fn empty_primary_set_is_rejected() {
        let sets = CategorySets::default();
        assert_eq!(
            Classifier::new(&sets, &BTreeSet::new()).unwrap_err(),
            ConfigurationError::EmptyPrimarySet
        );
    }

    #[test]
    fn from_labels_builds_explicit_policy() {
        let sets =
            CategorySets::from_labels(["lynx"], ["roe_deer"], Some(vec!["human".to_string()]))
                .unwrap();
        assert_eq!(sets.tertiary, TertiaryPolicy::Explicit(species(&["human"])));

        let sets = CategorySets::from_labels(["lynx"], Vec::<String>::new(), None).unwrap();
        assert_eq!(sets.tertiary, TertiaryPolicy::Complement);
    }

    #[test]
    fn blank_labels_are_a_configuration_error() {
        assert_eq!(
            CategorySets::from_labels([""], Vec::<String>::new(), None).unwrap_err(),
            ConfigurationError::BlankSpeciesLabel {
                role: Category::Primary
            }
        );
        assert_eq!(
            CategorySets::from_labels(["lynx"], ["  "], None).unwrap_err(),
            ConfigurationError::BlankSpeciesLabel {
                role: Category::Secondary
            }
        );
    }

    #[test]
    fn sets_validate_without_observed_species() {
        let sets = CategorySets::from_labels(["lynx"], ["roe_deer"], None).unwrap();
        assert_eq!(sets.validate(), Ok(()));

        let sets =
            CategorySets::from_labels(["lynx"], ["roe_deer"], Some(vec!["lynx".to_string()]))
                .unwrap();
        assert!(matches!(
            sets.validate(),
            Err(ConfigurationError::OverlappingCategories {
                first: Category::Primary,
                second: Category::Tertiary,
                ..
            })
        ));
    }

    #[test]
    fn display_uses_lowercase_role_names() {
        let names: Vec<_> = [
            Category::Primary,
            Category::Secondary,
            Category::Tertiary,
            Category::Ignored,
        ]
        .iter()
        .map(ToString::to_string)
        .collect();
        assert_eq!(names, ["primary", "secondary", "tertiary", "ignored"]);
    }
}
