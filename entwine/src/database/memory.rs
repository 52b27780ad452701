use std::collections::VecDeque;

use super::Connection;
use crate::query::Placeholder;
use crate::row::MemoryRow;
use crate::value::Value;
use crate::EntwineResult;

/// A statement run on a [ScriptedConnection].
#[derive(Clone, Debug, PartialEq)]
pub struct Executed {
    pub sql: String,
    pub params: Vec<Value>,
}

///
/// Connection answering queries with result sets queued in advance, one per
/// query and in order. Once the queue is empty, queries return no row.
///
#[derive(Debug)]
pub struct ScriptedConnection {
    placeholder: Placeholder,
    results: VecDeque<Vec<MemoryRow>>,
    executed: Vec<Executed>,
}

impl ScriptedConnection {
    pub fn new() -> Self {
        Self {
            placeholder: Placeholder::Anonymous,
            results: VecDeque::new(),
            executed: vec![],
        }
    }

    pub fn with_placeholder(mut self, placeholder: Placeholder) -> Self {
        self.placeholder = placeholder;
        self
    }

    pub fn push_result(&mut self, rows: Vec<MemoryRow>) -> &mut Self {
        self.results.push_back(rows);
        self
    }

    pub fn executed(&self) -> &[Executed] {
        &self.executed
    }
}

impl Default for ScriptedConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection for ScriptedConnection {
    type Row = MemoryRow;

    fn placeholder(&self) -> Placeholder {
        self.placeholder
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> EntwineResult<Vec<MemoryRow>> {
        log::trace!("scripted query: {} {:?}", sql, params);
        self.executed.push(Executed {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        Ok(self.results.pop_front().unwrap_or_default())
    }
}
