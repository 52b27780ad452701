//!
//! PostgreSQL through sqlx.
//!
//! sqlx is asynchronous, so loads over a [PgPool] drive the
//! [CycleLoader] step by step instead of using a blocking [super::Connection].
//!

use sqlx::postgres::{PgArguments, PgPool, PgRow};
use sqlx::query::Query;

use crate::cycle::CycleLoader;
use crate::entity::{AnyEntity, Entity, EntityType};
use crate::inflate::{Inflated, TreeInflater};
use crate::persister::{Persister, PersisterRegistry};
use crate::query::Placeholder;
use crate::row::Row;
use crate::schema::SqlType;
use crate::value::Value;
use crate::EntwineResult;

impl Row for PgRow {
    fn value(&self, alias: &str, sql_type: SqlType) -> EntwineResult<Value> {
        Ok(match sql_type {
            SqlType::Boolean => sqlx::Row::try_get::<Option<bool>, _>(self, alias)?.into(),
            SqlType::Integer => sqlx::Row::try_get::<Option<i32>, _>(self, alias)?.into(),
            SqlType::BigInt => sqlx::Row::try_get::<Option<i64>, _>(self, alias)?.into(),
            SqlType::Double => sqlx::Row::try_get::<Option<f64>, _>(self, alias)?.into(),
            SqlType::Text => sqlx::Row::try_get::<Option<String>, _>(self, alias)?.into(),
        })
    }
}

fn bind<'q>(
    query: Query<'q, sqlx::Postgres, PgArguments>,
    value: &Value,
) -> Query<'q, sqlx::Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(None::<i64>),
        Value::Bool(value) => query.bind(*value),
        Value::Int(value) => query.bind(*value),
        Value::Float(value) => query.bind(*value),
        Value::Text(value) => query.bind(value.clone()),
        Value::Composite(values) => values.iter().fold(query, bind),
    }
}

async fn fetch(
    pool: &PgPool,
    persister: &Persister,
    identifiers: Option<&[Value]>,
) -> EntwineResult<Inflated> {
    let (sql, params) = persister.statement(identifiers, Placeholder::Numbered);
    let query = params.iter().fold(sqlx::query(&sql), bind);
    let rows = query.fetch_all(pool).await?;
    log::debug!("{} rows for {}", rows.len(), persister.entity_type().name());
    TreeInflater::new(persister.query()).run(rows)
}

async fn run_deferred_loads(pool: &PgPool, loader: &mut CycleLoader<'_>) -> EntwineResult<()> {
    while loader.has_pending() {
        for follow_up in loader.pending_requests() {
            let persister = loader.registry().persister(&follow_up.entity_type)?;
            let inflated = fetch(pool, persister, Some(&follow_up.identifiers)).await?;
            loader.absorb(&inflated);
        }
        loader.resolve()?;
    }
    Ok(())
}

pub async fn select_all(
    pool: &PgPool,
    registry: &PersisterRegistry,
    entity_type: &EntityType,
) -> EntwineResult<Vec<AnyEntity>> {
    let inflated = fetch(pool, registry.persister(entity_type)?, None).await?;

    let mut loader = CycleLoader::new(registry);
    loader.absorb(&inflated);
    run_deferred_loads(pool, &mut loader).await?;

    Ok(inflated.into_roots())
}

pub async fn select_by_ids(
    pool: &PgPool,
    registry: &PersisterRegistry,
    entity_type: &EntityType,
    identifiers: &[Value],
) -> EntwineResult<Vec<AnyEntity>> {
    let persister = registry.persister(entity_type)?;

    let mut loader = CycleLoader::new(registry);
    let mut roots = vec![];
    for batch in registry.batches(identifiers) {
        let inflated = fetch(pool, persister, Some(&batch)).await?;
        loader.absorb(&inflated);
        roots.extend(inflated.into_roots());
    }
    run_deferred_loads(pool, &mut loader).await?;

    Ok(roots)
}

pub async fn select_all_of<T: Send + 'static>(
    pool: &PgPool,
    registry: &PersisterRegistry,
) -> EntwineResult<Vec<Entity<T>>> {
    select_all(pool, registry, &EntityType::of::<T>())
        .await?
        .iter()
        .map(AnyEntity::downcast::<T>)
        .collect()
}
