use sea_orm::DeriveActiveEnum;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// How a single attempt ended, as recorded in `job_execution`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    EnumIter,
    EnumString,
    Display,
)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "job_result")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobResult {
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "timed_out")]
    TimedOut,
    #[sea_orm(string_value = "lease_expired")]
    LeaseExpired,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_result_names_match_database_enum() {
        assert_eq!(JobResult::LeaseExpired.to_string(), "lease_expired");
        assert_eq!(JobResult::from_str("timed_out").unwrap(), JobResult::TimedOut);
        assert_eq!(
            serde_json::to_value(JobResult::Completed).unwrap(),
            serde_json::json!("completed")
        );
    }
}
