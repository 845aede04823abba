//! Resolver types exposed by the catalog module and their handler declarations.

use resolvkit::{
    ContextId, EventStream, MetadataTableBuilder, ParamSpec, Params, RawArg, RawArgs,
    ResolveError, ResolverDecl, SubscriptionOptions,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::domain::{BookEvent, BookEvents, BookStore};

/// Request object the dispatch layer passes as the resolver context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRequest {
    pub user: String,
}

impl CatalogRequest {
    pub fn new(user: impl Into<String>) -> Self {
        Self { user: user.into() }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, ResolveError> {
    serde_json::to_value(value).map_err(|e| ResolveError::Handler(e.into()))
}

/// Handlers every catalog resolver inherits.
pub struct HealthResolver;

impl HealthResolver {
    fn declare() -> ResolverDecl<Self> {
        ResolverDecl::<Self>::new("HealthResolver")
            .query("health", |_this, _p| async { Ok(json!("ok")) })
            .delegated()
    }
}

/// Shared, request-independent book queries.
pub struct BooksResolver {
    health: Arc<HealthResolver>,
    store: Arc<BookStore>,
    events: Arc<BookEvents>,
}

impl BooksResolver {
    pub fn new(store: Arc<BookStore>, events: Arc<BookEvents>) -> Self {
        Self {
            health: Arc::new(HealthResolver),
            store,
            events,
        }
    }

    fn books(&self) -> Result<Value, ResolveError> {
        to_json(&self.store.list())
    }

    fn book(&self, params: &Params) -> Result<Value, ResolveError> {
        let id: u64 = params.value(0)?;
        to_json(&self.store.get(id))
    }

    fn add_book(&self, params: &Params) -> Result<Value, ResolveError> {
        let title: String = params.value(0)?;
        let author: String = params.value(1)?;
        let book = self.store.add(&title, &author);
        let delivered = self.events.publish(&BookEvent::Added { book: book.clone() });
        info!(id = book.id, delivered, "book added to catalog");
        to_json(&book)
    }

    fn book_added(&self) -> EventStream {
        self.events.subscribe()
    }

    fn declare() -> ResolverDecl<Self> {
        ResolverDecl::<Self>::new("BooksResolver")
            .extends(|this: &Self| Arc::clone(&this.health))
            .query("books", |this: Arc<Self>, _p| async move { this.books() })
            .query("book", |this: Arc<Self>, p: Params| async move { this.book(&p) })
            .params([ParamSpec::Arg("id")])
            .mutation("add_book", |this: Arc<Self>, p: Params| async move {
                this.add_book(&p)
            })
            .name("addBook")
            .params([ParamSpec::Arg("title"), ParamSpec::Arg("author")])
            .subscription(
                "book_added",
                SubscriptionOptions::new()
                    .filter(|payload, args, _ctx| match args.get("author").and_then(Value::as_str) {
                        Some(author) => payload["book"]["author"] == author,
                        None => true,
                    })
                    .resolve(|payload, _args: &RawArgs| Ok(payload["book"].clone())),
                |this: Arc<Self>, _p| async move { Ok(this.book_added()) },
            )
            .name("bookAdded")
            .resolve_field("Book", "related", |this: Arc<Self>, p: Params| async move {
                let parent: Value = p.value(0)?;
                let author = parent["author"].as_str().unwrap_or_default();
                let id = parent["id"].as_u64();
                let related: Vec<_> = this
                    .store
                    .by_author(author)
                    .into_iter()
                    .filter(|b| Some(b.id) != id)
                    .collect();
                to_json(&related)
            })
            .params([ParamSpec::Root])
            .field("title", |_this, p: Params| async move {
                let parent: Value = p.value(0)?;
                Ok(parent["title"].clone())
            })
            .params([ParamSpec::Root])
            .field("author_profile", |_this, p: Params| async move {
                let parent: Value = p.value(0)?;
                Ok(json!({ "name": parent["author"] }))
            })
            .params([ParamSpec::Root])
            .delegated()
            .name("authorProfile")
    }
}

/// Per-request view of the catalog for the calling user.
pub struct ViewerResolver {
    user: String,
    context: Option<ContextId>,
    store: Arc<BookStore>,
    events: Arc<BookEvents>,
}

impl ViewerResolver {
    pub fn new(
        user: String,
        context: Option<ContextId>,
        store: Arc<BookStore>,
        events: Arc<BookEvents>,
    ) -> Self {
        Self {
            user,
            context,
            store,
            events,
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    fn me(&self) -> Value {
        json!({
            "user": self.user,
            "context": self.context.map(|c| c.to_string()),
        })
    }

    fn my_books(&self) -> Result<Value, ResolveError> {
        to_json(&self.store.by_author(&self.user))
    }

    fn declare() -> ResolverDecl<Self> {
        ResolverDecl::<Self>::new("ViewerResolver")
            .query("me", |this: Arc<Self>, _p| async move { Ok(this.me()) })
            .query("my_books", |this: Arc<Self>, _p| async move { this.my_books() })
            .name("myBooks")
            .subscription(
                "my_feed",
                SubscriptionOptions::new().filter(|payload, _args, ctx| {
                    ctx.and_then(RawArg::downcast::<CatalogRequest>)
                        .is_some_and(|req| payload["book"]["author"] == req.user.as_str())
                }),
                |this: Arc<Self>, _p| async move { Ok(this.events.subscribe()) },
            )
            .name("myFeed")
    }
}

/// Resolver types of the catalog module.
pub fn register_resolvers(b: &mut MetadataTableBuilder) {
    b.register(HealthResolver::declare())
        .register(BooksResolver::declare())
        .register(ViewerResolver::declare());
}
