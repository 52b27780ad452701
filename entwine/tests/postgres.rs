#![cfg(feature = "postgres")]

use entwine::database::postgres;
use entwine::prelude::*;

#[derive(Debug)]
pub struct Author {
    name: String,
    books: Vec<Entity<Book>>,
}

#[derive(Debug)]
pub struct Book {
    title: String,
    author: Option<Entity<Author>>,
}

fn col(table: &Table, name: &str) -> Column {
    table.column(name).unwrap().clone()
}

fn registry() -> EntwineResult<PersisterRegistry> {
    let author = Table::builder("author")
        .primary_key("id", SqlType::BigInt)
        .column("name", SqlType::Text)
        .build();
    let book = Table::builder("book")
        .primary_key("id", SqlType::BigInt)
        .column("title", SqlType::Text)
        .column("author_id", SqlType::BigInt)
        .build();
    let (name, title) = (col(&author, "name"), col(&book, "title"));

    MappingConfiguration::new()
        .add(
            EntityMapping::new(TypedInflater::new(&author, move |row| {
                Ok(Author {
                    name: row.try_get(&name)?,
                    books: vec![],
                })
            }))
            .relation(RelationMapping::to::<Book>(
                &col(&author, "id"),
                &col(&book, "author_id"),
                RelationFixer::collect(|author: &mut Author| &mut author.books),
            )),
        )
        .add(
            EntityMapping::new(TypedInflater::new(&book, move |row| {
                Ok(Book {
                    title: row.try_get(&title)?,
                    author: None,
                })
            }))
            .relation(RelationMapping::to::<Author>(
                &col(&book, "author_id"),
                &col(&author, "id"),
                RelationFixer::assign(|book: &mut Book| &mut book.author),
            )),
        )
        .build()
}

async fn pool() -> Result<sqlx::PgPool, Box<dyn std::error::Error>> {
    let url = std::env::var("DATABASE_URL")?;
    let pool = sqlx::PgPool::connect(&url).await?;

    for statement in [
        "drop table if exists book",
        "drop table if exists author",
        "create table author (id bigint primary key, name text not null)",
        "create table book (id bigint primary key, title text not null, author_id bigint not null references author(id))",
        "insert into author values (1, 'Le Guin')",
        "insert into book values (10, 'The Dispossessed', 1), (11, 'The Lathe of Heaven', 1)",
    ] {
        sqlx::query(statement).execute(&pool).await?;
    }
    Ok(pool)
}

#[tokio::test]
#[ignore = "needs DATABASE_URL pointing to a scratch PostgreSQL database"]
async fn books_link_back_to_their_author() -> Result<(), Box<dyn std::error::Error>> {
    let pool = pool().await?;
    let registry = registry()?;

    let authors = postgres::select_all_of::<Author>(&pool, &registry).await?;
    assert_eq!(authors.len(), 1);

    let author = authors[0].lock();
    assert_eq!(author.name, "Le Guin");
    let mut titles: Vec<_> = author
        .books
        .iter()
        .map(|book| book.lock().title.clone())
        .collect();
    titles.sort();
    assert_eq!(titles, vec!["The Dispossessed", "The Lathe of Heaven"]);

    for book in &author.books {
        let back = book.lock().author.clone().unwrap();
        assert!(std::sync::Arc::ptr_eq(&back, &authors[0]));
    }
    Ok(())
}

#[tokio::test]
#[ignore = "needs DATABASE_URL pointing to a scratch PostgreSQL database"]
async fn select_by_ids_binds_numbered_parameters() -> Result<(), Box<dyn std::error::Error>> {
    let pool = pool().await?;
    let registry = registry()?;

    let books = postgres::select_by_ids(
        &pool,
        &registry,
        &EntityType::of::<Book>(),
        &[Value::Int(11), Value::Int(99)],
    )
    .await?;

    assert_eq!(books.len(), 1);
    let book = books[0].downcast::<Book>()?;
    let author = book.lock().author.clone().unwrap();
    assert_eq!(author.lock().name, "Le Guin");
    Ok(())
}
