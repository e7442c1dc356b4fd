//! Domain records shared by stores, workflows and routes.

mod account;
mod document;
mod house;
mod onboarding;
mod profile;
mod report;
mod token;

pub use account::*;
pub use document::*;
pub use house::*;
pub use onboarding::*;
pub use profile::*;
pub use report::*;
pub use token::*;

/// Stored or received label does not match any known variant.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("unknown value `{0}`")]
pub struct UnknownLabel(pub String);

/// Declare an enum persisted and exchanged through a fixed text label.
macro_rules! labeled_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $label:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
            serde::Serialize, serde::Deserialize,
        )]
        $vis enum $name {
            $($(#[$vmeta])* #[serde(rename = $label)] $variant),+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Text label used on the wire and in storage.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::model::UnknownLabel;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
                    .ok_or_else(|| $crate::model::UnknownLabel(s.to_owned()))
            }
        }
    };
}

pub(crate) use labeled_enum;

labeled_enum! {
    /// Account role.
    pub enum Role {
        Hr => "HR",
        Employee => "EMPLOYEE",
    }
}

labeled_enum! {
    /// Denormalized onboarding state carried by every account.
    pub enum OnboardingStatus {
        NotStarted => "NOT_STARTED",
        Pending => "PENDING",
        Approved => "APPROVED",
        Rejected => "REJECTED",
    }
}

labeled_enum! {
    /// State of anything HR reviews: onboarding applications and OPT documents.
    pub enum ReviewStatus {
        Pending => "PENDING",
        Approved => "APPROVED",
        Rejected => "REJECTED",
    }
}

impl From<ReviewStatus> for OnboardingStatus {
    fn from(status: ReviewStatus) -> Self {
        match status {
            ReviewStatus::Pending => OnboardingStatus::Pending,
            ReviewStatus::Approved => OnboardingStatus::Approved,
            ReviewStatus::Rejected => OnboardingStatus::Rejected,
        }
    }
}

labeled_enum! {
    pub enum WorkAuthorizationType {
        Citizen => "CITIZEN",
        GreenCard => "GREEN_CARD",
        H1b => "H1B",
        L2 => "L2",
        F1CptOpt => "F1_CPT_OPT",
        H4 => "H4",
        Other => "OTHER",
    }
}

labeled_enum! {
    pub enum Gender {
        Male => "MALE",
        Female => "FEMALE",
        NoAnswer => "NO_ANSWER",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod with_crate_result {
        // A single-parameter `Result` alias in scope must not leak into the expansion.
        #[allow(unused_imports)]
        use crate::error::Result;

        crate::model::labeled_enum! {
            pub enum Shade {
                Light => "LIGHT",
                Dark => "DARK",
            }
        }
    }

    #[test]
    fn test_labels_expand_next_to_crate_result() {
        use with_crate_result::Shade;

        assert_eq!("dark".parse::<Shade>(), Ok(Shade::Dark));
        assert_eq!(Shade::Light.to_string(), "LIGHT");
    }

    #[test]
    fn test_labels_round_trip_through_text() {
        assert_eq!("f1_cpt_opt".parse(), Ok(WorkAuthorizationType::F1CptOpt));
        assert_eq!(OnboardingStatus::NotStarted.to_string(), "NOT_STARTED");
        assert!("SOMETHING".parse::<Role>().is_err());
    }

    #[test]
    fn test_labels_are_used_by_serde() {
        let json = serde_json::to_string(&ReviewStatus::Rejected).unwrap();
        assert_eq!(json, "\"REJECTED\"");
        let gender: Gender = serde_json::from_str("\"NO_ANSWER\"").unwrap();
        assert_eq!(gender, Gender::NoAnswer);
    }
}
