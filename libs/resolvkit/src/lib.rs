//! # resolvkit - Resolver discovery and request-scoped execution
//!
//! Finds the query, mutation, subscription and field handlers declared by the providers
//! of a module container and turns each into a dispatch-ready callable bound to the right
//! instance: the shared one for providers with a static dependency tree, or a per-request
//! instance tree for everything that (transitively) depends on the inbound request.
//!
//! ## Features
//!
//! - **Explicit metadata**: handlers are declared with [`ResolverDecl`] builders and
//!   collected via `inventory`, no runtime reflection
//! - **One tree per request**: all handlers invoked under one [`ContextId`] share the
//!   request-scoped instances built for it
//! - **Subscription filters**: optional `(payload, args, context)` predicates gate events
//!   without touching payloads
//!
//! ## Example
//!
//! ```rust,ignore
//! use resolvkit::{ProviderContainer, ResolverDecl, MetadataTableBuilder, ResolversExplorer};
//!
//! struct Books;
//!
//! let mut metadata = MetadataTableBuilder::default();
//! metadata.register(
//!     ResolverDecl::<Books>::new("Books")
//!         .query("books", |_this, _params| async { Ok(serde_json::json!([])) }),
//! );
//!
//! let mut container = ProviderContainer::builder();
//! container.module("catalog", &[]).singleton("catalog", "books", Books);
//! let container = std::sync::Arc::new(container.build()?);
//! container.init().await?;
//!
//! let explorer = ResolversExplorer::new(container, metadata.build()?.into(), Default::default());
//! let groups = explorer.explore()?;
//! ```

pub use async_trait::async_trait;

// Re-export inventory for `inventory::submit!` in resolver crates
pub use inventory;

pub mod container;
pub mod contracts;
pub mod descriptor;
pub mod error;
pub mod explorer;
pub mod external_context;
pub mod handler;
pub mod metadata;
pub mod params;
pub mod request;

pub use container::{ContainerBuilder, InstanceWrapper, ModuleRef, ProviderContainer, ResolveCtx, Scope};
pub use contracts::{ConfigProvider, ModuleContainer};
pub use descriptor::{HandlerDescriptor, HandlerRole, HandlerSummary, ResolverGroups};
pub use error::{ContainerError, ExploreError, ResolveError};
pub use explorer::{ExplorerOptions, ResolversExplorer};
pub use external_context::ExternalContextCreator;
pub use handler::{Callback, EventStream, Instance, Invocable, Method, MethodTransform, SubscriptionCallback};
pub use metadata::{MetadataTable, MetadataTableBuilder, ResolverDecl, ResolverRegistrator, SubscriptionOptions};
pub use params::{GqlParamsFactory, ParamSpec, Params, ParamsFactory, RawArg, RawArgs};
pub use request::{ContextId, RequestRegistry, RequestValue, REQUEST};
