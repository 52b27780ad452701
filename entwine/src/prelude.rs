pub use crate::database::memory::ScriptedConnection;
pub use crate::database::Connection;
pub use crate::entity::{entity, AnyEntity, Entity, EntityType};
pub use crate::inflater::{EntityInflater, RelationFixer, RowMerger, TypedInflater, TypedMerger};
pub use crate::mapping::{EntityMapping, MappingConfiguration, RelationMapping};
pub use crate::persister::{LoadOptions, PersisterRegistry};
pub use crate::row::{ColumnedRow, MemoryRow, Row};
pub use crate::schema::{Column, SqlType, Table};
pub use crate::tree::{Join, JoinKind, JoinTree};
pub use crate::value::{FromValue, Value};
pub use crate::{EntwineError, EntwineResult};
