//! Catalog - demo resolver module: a shared book store with live events and a
//! per-request viewer.

use resolvkit::{ContainerBuilder, ResolveCtx, ResolverRegistrator, Scope, REQUEST};
use tracing::debug;

pub mod config;
pub mod domain;
pub mod resolvers;

use config::CatalogConfig;
use domain::{BookEvents, BookStore};

pub use resolvers::{register_resolvers, BooksResolver, CatalogRequest, ViewerResolver};

pub const CATALOG_MODULE: &str = "catalog";
pub const VIEWER_MODULE: &str = "viewer";

pub mod tokens {
    pub const STORE: &str = "catalog.store";
    pub const EVENTS: &str = "catalog.events";
    pub const BOOKS: &str = "catalog.books";
    pub const VIEWER: &str = "viewer.resolver";
}

async fn build_store(ctx: ResolveCtx) -> anyhow::Result<BookStore> {
    let cfg: CatalogConfig = ctx.config()?;
    debug!(seed_books = cfg.seed_books, "seeding book store");
    Ok(BookStore::seeded(cfg.seed_books))
}

async fn build_events(ctx: ResolveCtx) -> anyhow::Result<BookEvents> {
    let cfg: CatalogConfig = ctx.config()?;
    Ok(BookEvents::new(cfg.event_buffer))
}

async fn build_books(ctx: ResolveCtx) -> anyhow::Result<BooksResolver> {
    Ok(BooksResolver::new(
        ctx.get::<BookStore>(tokens::STORE)?,
        ctx.get::<BookEvents>(tokens::EVENTS)?,
    ))
}

async fn build_viewer(ctx: ResolveCtx) -> anyhow::Result<ViewerResolver> {
    let request = ctx.request::<CatalogRequest>()?;
    debug!(user = %request.user, context = ?ctx.context_id(), "building viewer");
    Ok(ViewerResolver::new(
        request.user.clone(),
        ctx.context_id(),
        ctx.get::<BookStore>(tokens::STORE)?,
        ctx.get::<BookEvents>(tokens::EVENTS)?,
    ))
}

/// Register the catalog and viewer modules with their providers.
///
/// The viewer is declared singleton but depends on the inbound request, so it is
/// rebuilt for every request context.
pub fn register(b: &mut ContainerBuilder) -> &mut ContainerBuilder {
    b.module(CATALOG_MODULE, &[])
        .module(VIEWER_MODULE, &[CATALOG_MODULE])
        .factory(CATALOG_MODULE, tokens::STORE, Scope::Singleton, &[], build_store)
        .factory(CATALOG_MODULE, tokens::EVENTS, Scope::Singleton, &[], build_events)
        .factory(
            CATALOG_MODULE,
            tokens::BOOKS,
            Scope::Singleton,
            &[tokens::STORE, tokens::EVENTS],
            build_books,
        )
        .factory(
            VIEWER_MODULE,
            tokens::VIEWER,
            Scope::Singleton,
            &[tokens::STORE, tokens::EVENTS, REQUEST],
            build_viewer,
        )
}

// Register resolver metadata via inventory
inventory::submit! {
    ResolverRegistrator(register_resolvers)
}
