pub mod donation;
pub mod question;
pub mod sea_orm_active_enums;
pub mod work;
