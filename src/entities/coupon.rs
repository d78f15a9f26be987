use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub discount_amount: Decimal,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::coupon_usage::Entity")]
    CouponUsages,
}

impl Related<super::coupon_usage::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CouponUsages.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// A coupon is redeemable when active and not past its expiry.
    pub fn is_redeemable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |exp| exp > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn coupon(is_active: bool, expires_at: Option<DateTime<Utc>>) -> Model {
        Model {
            id: Uuid::new_v4(),
            code: "SAVE10".to_string(),
            discount_amount: dec!(10.00),
            is_active,
            expires_at,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn active_coupon_without_expiry_is_redeemable() {
        assert!(coupon(true, None).is_redeemable(Utc::now()));
    }

    #[test]
    fn inactive_coupon_is_not_redeemable() {
        assert!(!coupon(false, None).is_redeemable(Utc::now()));
    }

    #[test]
    fn expired_coupon_is_not_redeemable() {
        let past = Utc::now() - chrono::Duration::hours(1);
        assert!(!coupon(true, Some(past)).is_redeemable(Utc::now()));
    }
}
