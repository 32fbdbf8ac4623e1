//! Validated identifier newtypes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Generates a validated string ID newtype with common trait implementations.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new value after validation.
            pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
                let id = id.into();
                if id.is_empty() {
                    return Err(ValidationError::Empty { field: $field_name });
                }
                Ok(Self(id))
            }

            /// Returns the value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id!(
    /// A survey site identifier (one camera station).
    SiteId, "site ID"
);

define_string_id!(
    /// A species label as recorded by the detection source.
    ///
    /// Labels are compared verbatim; no case folding is applied.
    Species, "species"
);

define_string_id!(
    /// Identifier of one survey episode, unique across an output table.
    SurveyId, "survey ID"
);

impl SurveyId {
    /// Builds the `{site}-{ordinal}` identifier of a site's n-th survey.
    ///
    /// The ordinal is purely numeric, so splitting at the last `-` always
    /// recovers the site, which keeps ids unique across sites.
    pub fn for_site(site: &SiteId, ordinal: usize) -> Self {
        Self(format!("{site}-{ordinal}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ids_are_rejected() {
        assert_eq!(
            SiteId::new(""),
            Err(ValidationError::Empty { field: "site ID" })
        );
        assert!(Species::new("").is_err());
    }

    #[test]
    fn deserialize_rejects_empty_species() {
        let result: Result<Species, _> = serde_json::from_str(r#""""#);
        assert!(result.is_err());
    }

    #[test]
    fn survey_ids_do_not_collide_across_dashed_sites() {
        let plain = SiteId::new("A").unwrap();
        let dashed = SiteId::new("A-1").unwrap();

        let from_plain: Vec<_> = (1..=20).map(|n| SurveyId::for_site(&plain, n)).collect();
        let from_dashed: Vec<_> = (1..=20).map(|n| SurveyId::for_site(&dashed, n)).collect();

        assert!(from_plain.iter().all(|id| !from_dashed.contains(id)));
        assert_eq!(from_dashed[0].as_str(), "A-1-1");
    }
}
