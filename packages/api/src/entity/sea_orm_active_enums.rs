use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "DonationStatus")]
#[serde(rename_all = "snake_case")]
pub enum DonationStatus {
    /// The only value ever written by the ingestion paths
    #[sea_orm(string_value = "succeeded")]
    Succeeded,
}

#[derive(Debug, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "QuestionStatus")]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "answered")]
    Answered,
    #[sea_orm(string_value = "rejected")]
    Rejected,
}
