pub mod insert;
pub mod select;

use core::str::FromStr;

use std::io::Write;

use diesel::{
    backend::Backend,
    deserialize::{self, FromSql, FromSqlRow},
    expression::AsExpression,
    pg::Pg,
    serialize::{self, IsNull, Output, ToSql},
};
use safe_keeper_domain::{outbound, request, safe, signature, tx, utxo};

use crate::persistence::schema::sql_types;

/// Declares a newtype over a domain state enum stored as the PostgreSQL enum of the same name,
/// whose labels are the snake case variant names.
macro_rules! pg_enum {
    ($module:ident :: $name:ident) => {
        #[derive(Debug, Clone, Copy, AsExpression, FromSqlRow)]
        #[diesel(sql_type = sql_types::$name)]
        pub struct $name($module::$name);

        impl $name {
            pub fn into_inner(self) -> $module::$name {
                self.0
            }
        }

        impl From<$module::$name> for $name {
            fn from(inner: $module::$name) -> Self {
                Self(inner)
            }
        }

        impl ToSql<sql_types::$name, Pg> for $name {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
                out.write_all(<&str>::from(&self.0).as_bytes())?;

                Ok(IsNull::No)
            }
        }

        impl FromSql<sql_types::$name, Pg> for $name {
            fn from_sql(bz: <Pg as Backend>::RawValue<'_>) -> deserialize::Result<Self> {
                str::from_utf8(bz.as_bytes())
                    .map(FromStr::from_str)?
                    .map(Self)
                    .map_err(From::from)
            }
        }
    };
}

pg_enum!(request::RequestState);
pg_enum!(safe::SafeState);
pg_enum!(utxo::UtxoKind);
pg_enum!(utxo::UtxoState);
pg_enum!(tx::TransactionState);
pg_enum!(signature::SignatureState);
pg_enum!(outbound::OutboundKind);
