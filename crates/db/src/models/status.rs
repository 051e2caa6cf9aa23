//! Status helper enums mapping to SMALLSERIAL/SMALLINT lookup tables.
//!
//! Each enum variant's discriminant matches the seed data order (1-based)
//! in the corresponding `*_statuses` database table.

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Lower-case name, matching the `name` column of the lookup table.
            pub fn name(self) -> &'static str {
                match self {
                    $( $name::$variant => $label ),+
                }
            }

            /// Resolve a database status ID back into the enum.
            pub fn from_id(id: StatusId) -> Option<Self> {
                match id {
                    $( $val => Some($name::$variant), )+
                    _ => None,
                }
            }

            /// Resolve a lower-case status name (as used in query strings).
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $( $label => Some($name::$variant), )+
                    _ => None,
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }
    };
}

define_status_enum! {
    /// Lifecycle status of a persisted job run.
    JobRunStatus {
        Pending = 1 => "pending",
        Running = 2 => "running",
        Success = 3 => "success",
        Failed = 4 => "failed",
    }
}

impl JobRunStatus {
    /// `Success` and `Failed` are terminal; nothing moves a run out of them.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobRunStatus::Success | JobRunStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_match_seed_data() {
        assert_eq!(JobRunStatus::Pending.id(), 1);
        assert_eq!(JobRunStatus::Running.id(), 2);
        assert_eq!(JobRunStatus::Success.id(), 3);
        assert_eq!(JobRunStatus::Failed.id(), 4);
    }

    #[test]
    fn from_id_round_trips_known_ids() {
        for status in [
            JobRunStatus::Pending,
            JobRunStatus::Running,
            JobRunStatus::Success,
            JobRunStatus::Failed,
        ] {
            assert_eq!(JobRunStatus::from_id(status.id()), Some(status));
        }
        assert_eq!(JobRunStatus::from_id(0), None);
        assert_eq!(JobRunStatus::from_id(9), None);
    }

    #[test]
    fn from_name_accepts_lowercase_only() {
        assert_eq!(JobRunStatus::from_name("failed"), Some(JobRunStatus::Failed));
        assert_eq!(JobRunStatus::from_name("Failed"), None);
    }

    #[test]
    fn only_success_and_failed_are_terminal() {
        assert!(!JobRunStatus::Pending.is_terminal());
        assert!(!JobRunStatus::Running.is_terminal());
        assert!(JobRunStatus::Success.is_terminal());
        assert!(JobRunStatus::Failed.is_terminal());
    }
}
