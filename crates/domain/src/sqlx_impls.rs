//! # SQLx 数据库类型转换实现
//!
//! 状态类枚举统一以 VARCHAR 存储

use crate::value_objects::{
    ArtifactType, DistributionStrategy, ExecutionStatus, ExternalTaskStatus, NotificationType,
    StreamStatus,
};

macro_rules! impl_varchar_enum {
    ($($ty:ty),* $(,)?) => {
        $(
            impl sqlx::Type<sqlx::Postgres> for $ty {
                fn type_info() -> sqlx::postgres::PgTypeInfo {
                    sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
                }

                fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
                    <&str as sqlx::Type<sqlx::Postgres>>::compatible(ty)
                }
            }

            impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $ty {
                fn decode(
                    value: sqlx::postgres::PgValueRef<'r>,
                ) -> Result<Self, sqlx::error::BoxDynError> {
                    let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
                    s.parse::<$ty>().map_err(Into::into)
                }
            }

            impl<'q> sqlx::Encode<'q, sqlx::Postgres> for $ty {
                fn encode_by_ref(
                    &self,
                    buf: &mut sqlx::postgres::PgArgumentBuffer,
                ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                    <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
                }
            }
        )*
    };
}

impl_varchar_enum!(
    ExecutionStatus,
    StreamStatus,
    ExternalTaskStatus,
    ArtifactType,
    NotificationType,
    DistributionStrategy,
);
