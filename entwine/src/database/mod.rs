//!
//! Database connections the persisters run their queries on.
//!

use crate::query::Placeholder;
use crate::row::Row;
use crate::value::Value;
use crate::EntwineResult;

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

/// A blocking connection able to run one SELECT with positional parameters.
pub trait Connection {
    type Row: Row;

    fn placeholder(&self) -> Placeholder {
        Placeholder::Anonymous
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> EntwineResult<Vec<Self::Row>>;
}

impl<C: Connection + ?Sized> Connection for &mut C {
    type Row = C::Row;

    fn placeholder(&self) -> Placeholder {
        (**self).placeholder()
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> EntwineResult<Vec<Self::Row>> {
        (**self).query(sql, params)
    }
}
