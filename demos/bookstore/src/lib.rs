//! Bookstore demo for graft.
//!
//! Builds a small schema of authors and books, then executes a few
//! operations against it and prints the responses.
//!
//! # Usage
//!
//! ```bash
//! # Page through the catalogue three books at a time
//! graft-bookstore --page-size 3
//!
//! # Resolve sibling fields in one task, without batching
//! graft-bookstore --serial --no-batching
//!
//! # Show dispatch rounds and field timings
//! RUST_LOG=graft=debug graft-bookstore
//! ```

use clap::Parser;
use futures::future::BoxFuture;
use graft_core::GraphQLError;
use graft_pagination::{paginate, PagingArguments, PagingOptions, SortDefinition};
use graft_runtime::{
    BatchLoader, BatchResult, Executor, ExecutorConfig, Field, FieldDef, FnMiddleware,
    ObjectDef, Operation, Request, RequestData, ResolverError, ResolverMap, ResolverResult,
    Response, Schema, SchemaBuilder, SchemaError, TypeRef,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

#[derive(Parser, Debug)]
#[command(name = "graft-bookstore")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Books per page
    #[arg(long, default_value_t = 3)]
    pub page_size: usize,

    /// Poll sibling fields within one task instead of spawning them
    #[arg(long)]
    pub serial: bool,

    /// Fetch every author on its own
    #[arg(long)]
    pub no_batching: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Author {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: String,
    pub title: String,
    pub year: Option<i32>,
    pub author_id: String,
}

/// In-memory catalogue.
#[derive(Debug, Default)]
pub struct Store {
    authors: Vec<Author>,
    books: RwLock<Vec<Book>>,
}

impl Store {
    /// Creates a store with a few authors and books.
    pub fn seeded() -> Self {
        let authors = [("1", "Ursula K. Le Guin"), ("2", "Frank Herbert"), ("3", "Octavia E. Butler")]
            .into_iter()
            .map(|(id, name)| Author {
                id: id.to_string(),
                name: name.to_string(),
            })
            .collect();
        let books = [
            ("1", "A Wizard of Earthsea", 1968, "1"),
            ("2", "The Left Hand of Darkness", 1969, "1"),
            ("3", "The Dispossessed", 1974, "1"),
            ("4", "Dune", 1965, "2"),
            ("5", "Dune Messiah", 1969, "2"),
            ("6", "Kindred", 1979, "3"),
            ("7", "Parable of the Sower", 1993, "3"),
            ("8", "Dawn", 1987, "3"),
        ]
        .into_iter()
        .map(|(id, title, year, author_id)| Book {
            id: id.to_string(),
            title: title.to_string(),
            year: Some(year),
            author_id: author_id.to_string(),
        })
        .collect();
        Self {
            authors,
            books: RwLock::new(books),
        }
    }

    pub fn author(&self, id: &str) -> Option<&Author> {
        self.authors.iter().find(|author| author.id == id)
    }

    pub fn authors(&self) -> &[Author] {
        &self.authors
    }

    pub async fn books(&self) -> Vec<Book> {
        self.books.read().await.clone()
    }

    /// Adds a book, assigning the next id.
    pub async fn add_book(
        &self,
        title: String,
        author_id: String,
        year: Option<i32>,
    ) -> Result<Book, ResolverError> {
        if self.author(&author_id).is_none() {
            return Err(ResolverError::custom(format!("Unknown author {author_id}.")));
        }
        let mut books = self.books.write().await;
        let book = Book {
            id: (books.len() + 1).to_string(),
            title,
            year,
            author_id,
        };
        books.push(book.clone());
        Ok(book)
    }
}

/// Loads authors by id.
pub struct AuthorLoader {
    store: Arc<Store>,
}

impl AuthorLoader {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

impl BatchLoader for AuthorLoader {
    type Key = String;
    type Value = Author;

    fn identity(&self) -> &str {
        "authors"
    }

    fn load(&self, keys: Vec<String>) -> BoxFuture<'_, BatchResult<String, Author>> {
        Box::pin(async move {
            tracing::info!(keys = ?keys, "loading authors");
            Ok(keys
                .into_iter()
                .filter_map(|id| self.store.author(&id).cloned().map(|author| (id, author)))
                .collect())
        })
    }
}

fn to_json<T: Serialize>(value: &T) -> ResolverResult {
    serde_json::to_value(value).map_err(|e| ResolverError::Internal(e.to_string()))
}

fn store(ctx: &graft_runtime::FieldContext) -> Result<Arc<Store>, ResolverError> {
    ctx.data::<Arc<Store>>()
        .cloned()
        .ok_or_else(|| ResolverError::Internal("store missing from request data".into()))
}

fn string_field(parent: &Value, name: &str) -> Result<String, ResolverError> {
    parent
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ResolverError::FieldNotFound(name.to_string()))
}

fn book_sort() -> SortDefinition<Book> {
    SortDefinition::new()
        .ascending("title", |book: &Book| book.title.as_str().into())
        .ascending("id", |book: &Book| book.id.as_str().into())
}

fn resolvers(options: PagingOptions) -> ResolverMap {
    let mut resolvers = ResolverMap::new();

    resolvers.register_async("Query", "books", move |ctx| {
        let options = options.clone();
        async move {
            let args: PagingArguments = ctx.args().parse()?;
            let books = store(&ctx)?.books().await;
            let page = paginate(books, &book_sort(), &args, &options)
                .map_err(|e| ResolverError::GraphQL(GraphQLError::from(e)))?;
            to_json(&page.into_connection())
        }
    });

    resolvers.register_fn("Query", "authors", |ctx| to_json(&store(ctx)?.authors()));

    resolvers.register_async("Mutation", "addBook", |ctx| async move {
        let title: String = ctx.args().require("title")?;
        let author_id: String = ctx.args().require("authorId")?;
        let year: Option<i32> = ctx.args().get_as("year");
        let book = store(&ctx)?.add_book(title, author_id, year).await?;
        to_json(&book)
    });

    resolvers.register_async("Book", "author", |ctx| async move {
        let author_id = string_field(ctx.parent(), "authorId")?;
        let author = ctx.loader::<AuthorLoader>()?.load(author_id).await?;
        to_json(&author)
    });

    resolvers.register_async("Author", "books", |ctx| async move {
        let author_id = string_field(ctx.parent(), "id")?;
        let books: Vec<Book> = store(&ctx)?
            .books()
            .await
            .into_iter()
            .filter(|book| book.author_id == author_id)
            .collect();
        to_json(&books)
    });

    resolvers
}

fn non_null(name: &str) -> TypeRef {
    TypeRef::non_null(TypeRef::named(name))
}

/// Builds the bookstore schema.
pub fn build_schema(page_size: usize) -> Result<Schema, SchemaError> {
    let options = PagingOptions::default()
        .with_default_page_size(Some(page_size))
        .with_total_count(true)
        .with_relative_cursors(true);

    SchemaBuilder::new()
        .query_type("Query")
        .mutation_type("Mutation")
        .middleware(FnMiddleware::new(|ctx, outcome, next| {
            Box::pin(async move {
                let started = Instant::now();
                let outcome = next.invoke(ctx, outcome).await;
                tracing::debug!(path = %ctx.path(), elapsed = ?started.elapsed(), "resolved field");
                outcome
            })
        }))
        .add_type(
            ObjectDef::new("Query")
                .field(FieldDef::new("books", non_null("BookConnection")))
                .field(FieldDef::new("authors", TypeRef::parse("[Author!]!")?)),
        )
        .add_type(ObjectDef::new("Mutation").field(FieldDef::new("addBook", non_null("Book"))))
        .add_type(
            ObjectDef::new("Book")
                .field(FieldDef::new("id", non_null("ID")).skip_middleware())
                .field(FieldDef::new("title", non_null("String")).skip_middleware())
                .field(FieldDef::new("year", TypeRef::named("Int")).skip_middleware())
                .field(FieldDef::new("author", TypeRef::named("Author"))),
        )
        .add_type(
            ObjectDef::new("Author")
                .field(FieldDef::new("id", non_null("ID")).skip_middleware())
                .field(FieldDef::new("name", non_null("String")).skip_middleware())
                .field(FieldDef::new("books", TypeRef::parse("[Book!]!")?)),
        )
        .add_type(
            ObjectDef::new("BookConnection")
                .field(FieldDef::new("edges", TypeRef::parse("[BookEdge!]!")?))
                .field(FieldDef::new("pageInfo", non_null("PageInfo")))
                .field(FieldDef::new("totalCount", TypeRef::named("Int"))),
        )
        .add_type(
            ObjectDef::new("BookEdge")
                .field(FieldDef::new("node", non_null("Book")))
                .field(FieldDef::new("cursor", non_null("String"))),
        )
        .add_type(
            ObjectDef::new("PageInfo")
                .field(FieldDef::new("hasNextPage", non_null("Boolean")))
                .field(FieldDef::new("hasPreviousPage", non_null("Boolean")))
                .field(FieldDef::new("startCursor", TypeRef::named("String")))
                .field(FieldDef::new("endCursor", TypeRef::named("String"))),
        )
        .with_resolvers(resolvers(options))
        .build()
}

/// Creates an executor over the seeded store.
pub fn executor(cli: &Cli, store: Arc<Store>) -> Result<Executor, SchemaError> {
    let config = ExecutorConfig::default()
        .with_parallel_fields(!cli.serial)
        .with_batching(!cli.no_batching);
    Ok(Executor::new(Arc::new(build_schema(cli.page_size)?))
        .with_config(config)
        .with_loader(AuthorLoader::new(store)))
}

fn books_page(after: Option<&str>) -> Operation {
    let mut books = Field::new("books");
    if let Some(after) = after {
        books = books.argument("after", json!(after));
    }
    let books = books
        .select(Field::new("totalCount"))
        .select(
            Field::new("edges").select(Field::new("cursor")).select(
                Field::new("node")
                    .select(Field::new("title"))
                    .select(Field::new("author").select(Field::new("name"))),
            ),
        )
        .select(
            Field::new("pageInfo")
                .select(Field::new("hasNextPage"))
                .select(Field::new("hasPreviousPage"))
                .select(Field::new("endCursor")),
        );
    Operation::query().with_name("BooksPage").select(books)
}

fn add_book(title: &str, author_id: &str) -> Operation {
    Operation::mutation().with_name("AddBook").select(
        Field::new("addBook")
            .argument("title", json!(title))
            .argument("authorId", json!(author_id))
            .select(Field::new("id"))
            .select(Field::new("title"))
            .select(Field::new("author").select(Field::new("name"))),
    )
}

fn authors_with_books() -> Operation {
    Operation::query().with_name("Authors").select(
        Field::new("authors")
            .select(Field::new("name"))
            .select(Field::new("books").select(Field::new("title"))),
    )
}

fn end_cursor(response: &Response) -> Option<String> {
    response
        .data
        .as_ref()?
        .pointer("/books/pageInfo/endCursor")?
        .as_str()
        .map(str::to_string)
}

/// Executes `operation` with the store attached to the request.
pub async fn execute(executor: &Executor, store: &Arc<Store>, operation: Operation) -> Response {
    let request = Request::new(operation).with_data(RequestData::new().with(Arc::clone(store)));
    executor.execute(request).await
}

/// Runs the demo.
pub async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(Store::seeded());
    let executor = executor(&cli, Arc::clone(&store))?;

    let first = execute(&executor, &store, books_page(None)).await;
    println!("{}", serde_json::to_string_pretty(&first)?);

    if let Some(cursor) = end_cursor(&first) {
        let second = execute(&executor, &store, books_page(Some(&cursor))).await;
        println!("{}", serde_json::to_string_pretty(&second)?);
    }

    let added = execute(&executor, &store, add_book("Children of Time", "2")).await;
    println!("{}", serde_json::to_string_pretty(&added)?);

    let authors = execute(&executor, &store, authors_with_books()).await;
    println!("{}", serde_json::to_string_pretty(&authors)?);

    Ok(())
}
