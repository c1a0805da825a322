//! `SeaORM` Entity for recorded donations

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One recorded act of financial support
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(schema_name = "public", table_name = "donations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub id: String,
    /// Idempotency key supplied by the payment provider. The unique index is
    /// what makes concurrent duplicate deliveries safe; the handler maps a
    /// violation on insert to the "skipped" outcome.
    #[sea_orm(column_type = "Text", nullable, unique)]
    pub transaction_id: Option<String>,
    /// Smallest currency unit (yen, cents). Never a float once persisted.
    pub amount: i64,
    /// Provider-declared currency, or the configured default
    #[sea_orm(column_type = "Text")]
    pub currency: String,
    pub status: super::sea_orm_active_enums::DonationStatus,
    #[sea_orm(column_type = "Text")]
    pub donor_name: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub message: Option<String>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
