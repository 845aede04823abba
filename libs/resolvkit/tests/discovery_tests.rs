//! End-to-end discovery over a small container: classification, binding and scoping.

use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use resolvkit::handler::MethodBody;
use resolvkit::{
    ContextId, ExploreError, ExplorerOptions, HandlerRole, Instance, Invocable, MetadataTable,
    MetadataTableBuilder, ModuleContainer, Params, ProviderContainer, RawArg, RawArgs,
    ResolveError, ResolverDecl, ResolverGroups, ResolversExplorer, Scope, SubscriptionOptions,
    REQUEST,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Base {
    reply: &'static str,
}

struct Catalog {
    serial: usize,
    base: Arc<Base>,
}

struct Viewer {
    user: String,
    serial: usize,
}

struct Audit;

fn unclassified_body() -> MethodBody {
    MethodBody::Resolve(Arc::new(|_i: Instance, _p: Params| {
        Box::pin(async { Ok(json!("custom")) }) as BoxFuture<'static, Result<Value, ResolveError>>
    }))
}

fn metadata() -> Arc<MetadataTable> {
    let mut b = MetadataTableBuilder::default();
    b.register(
        ResolverDecl::<Base>::new("Base")
            .query("ping", |this: Arc<Base>, _p| async move { Ok(json!(this.reply)) })
            .delegated(),
    );
    b.register(
        ResolverDecl::<Catalog>::new("Catalog")
            .extends(|c: &Catalog| Arc::clone(&c.base))
            .query("books", |this: Arc<Catalog>, _p| async move { Ok(json!(this.serial)) })
            .mutation("add_book", |_this, p: Params| async move { p.value::<Value>(0) })
            .params([resolvkit::ParamSpec::Arg("title")])
            .delegated()
            .subscription(
                "book_events",
                SubscriptionOptions::new()
                    .filter(|payload, _args, _ctx| payload.as_i64().is_some_and(|n| n % 2 == 0)),
                |_this, _p| async { Ok(stream::iter([1, 2, 3, 4]).map(|n| json!(n)).boxed()) },
            )
            .subscription("all_events", SubscriptionOptions::new(), |_this, _p| async {
                Ok(stream::iter([1, 2, 3, 4]).map(|n| json!(n)).boxed())
            })
            .field("title", |_this, _p| async { Ok(json!("plain")) })
            .field("author", |_this, _p| async { Ok(json!("delegated")) })
            .delegated()
            .resolve_field("Book", "reviews", |_this, _p| async { Ok(json!([])) })
            .handler("custom", HandlerRole::Unclassified, unclassified_body())
            .method("helper"),
    );
    b.register(
        ResolverDecl::<Viewer>::new("Viewer")
            .query("me", |this: Arc<Viewer>, p: Params| async move {
                Ok(json!({
                    "user": this.user,
                    "serial": this.serial,
                    "context": p.context_id().map(|c| c.to_string()),
                }))
            })
            .subscription("my_events", SubscriptionOptions::new(), |this: Arc<Viewer>, _p| async move {
                Ok(stream::iter([this.serial]).map(|n| json!(n)).boxed())
            }),
    );
    b.register(ResolverDecl::<Audit>::new("Audit").query("audit_log", |_this, _p| async {
        Ok(json!([]))
    }));
    Arc::new(b.build().expect("metadata"))
}

struct Fixture {
    container: Arc<ProviderContainer>,
    catalog_builds: Arc<AtomicUsize>,
    viewer_builds: Arc<AtomicUsize>,
}

async fn fixture() -> Fixture {
    let catalog_builds = Arc::new(AtomicUsize::new(0));
    let viewer_builds = Arc::new(AtomicUsize::new(0));

    let mut b = ProviderContainer::builder();
    b.module("catalog", &[]).module("viewer", &["catalog"]).module("audit", &[]);

    let counter = Arc::clone(&catalog_builds);
    b.factory("catalog", "catalog", Scope::Singleton, &[], move |_ctx| {
        let serial = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            Ok(Catalog {
                serial,
                base: Arc::new(Base { reply: "pong" }),
            })
        }
    });
    let counter = Arc::clone(&viewer_builds);
    b.factory("viewer", "viewer", Scope::Request, &["catalog", REQUEST], move |ctx| {
        let serial = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            let user = ctx.request::<String>()?;
            Ok::<_, anyhow::Error>(Viewer {
                user: user.as_ref().clone(),
                serial,
            })
        }
    });
    b.factory("audit", "audit", Scope::Transient, &[], |_ctx| async { Ok(Audit) });

    let container = Arc::new(b.build().expect("container"));
    container.init().await.expect("init");
    Fixture {
        container,
        catalog_builds,
        viewer_builds,
    }
}

fn explorer(f: &Fixture, options: ExplorerOptions) -> ResolversExplorer {
    ResolversExplorer::new(f.container.clone(), metadata(), options)
}

fn resolver(groups: &ResolverGroups, role: HandlerRole, name: &str) -> Invocable<Value> {
    Arc::clone(
        groups
            .find(role, name)
            .and_then(|d| d.callback())
            .and_then(|c| c.as_resolve())
            .unwrap_or_else(|| panic!("{role} {name} not bound")),
    )
}

fn call(user: &str) -> RawArgs {
    RawArgs::resolver(
        Value::Null,
        json!({"title": "Dune"}),
        RawArg::object(user.to_string()),
        Value::Null,
    )
}

fn keys(groups: &ResolverGroups) -> Vec<(HandlerRole, &'static str, bool)> {
    groups.descriptors().map(|d| d.key()).collect()
}

#[tokio::test]
async fn classification_decides_what_is_discovered() {
    let f = fixture().await;
    let groups = explorer(&f, ExplorerOptions::default()).explore().unwrap();

    let names = |role| -> Vec<&str> {
        groups.get(role).iter().map(|d| d.method_name).collect()
    };
    assert_eq!(names(HandlerRole::Query), vec!["books", "ping", "me"]);
    assert_eq!(names(HandlerRole::Mutation), vec!["add_book"]);
    assert_eq!(names(HandlerRole::Subscription), vec!["book_events", "all_events", "my_events"]);
    assert_eq!(names(HandlerRole::FieldResolver), vec!["author", "reviews"]);
    assert_eq!(names(HandlerRole::Unclassified), vec!["custom"]);

    // ordinary methods and plain field resolvers never show up
    assert!(groups.descriptors().all(|d| d.method_name != "helper"));
    assert!(groups.descriptors().all(|d| d.method_name != "title"));
    // the transient audit provider has no live instance
    assert!(groups.descriptors().all(|d| d.method_name != "audit_log"));

    assert!(groups.find(HandlerRole::Mutation, "add_book").unwrap().is_delegated);
    assert!(groups.descriptors().all(|d| d.callback().is_some()));
}

#[tokio::test]
async fn static_handlers_share_one_instance() {
    let f = fixture().await;
    let groups = explorer(&f, ExplorerOptions::default()).explore().unwrap();
    let books = resolver(&groups, HandlerRole::Query, "books");
    let add = resolver(&groups, HandlerRole::Mutation, "add_book");

    assert_eq!(books(call("a")).await.unwrap(), json!(0));
    assert_eq!(books(RawArgs::default()).await.unwrap(), json!(0));
    assert_eq!(add(call("b")).await.unwrap(), json!("Dune"));
    assert_eq!(f.catalog_builds.load(Ordering::SeqCst), 1);
    assert_eq!(f.viewer_builds.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn inherited_handler_runs_on_the_derived_instance() {
    let f = fixture().await;
    let groups = explorer(&f, ExplorerOptions::default()).explore().unwrap();
    let ping = resolver(&groups, HandlerRole::Query, "ping");

    assert_eq!(ping(RawArgs::default()).await.unwrap(), json!("pong"));
    assert_eq!(ping(call("a")).await.unwrap(), json!("pong"));
    assert_eq!(f.catalog_builds.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn request_scoped_handlers_build_one_tree_per_request() {
    let f = fixture().await;
    let groups = explorer(&f, ExplorerOptions::default()).explore().unwrap();
    let me = resolver(&groups, HandlerRole::Query, "me");

    let alice = me(call("alice")).await.unwrap();
    let bob = me(call("bob")).await.unwrap();
    assert_eq!(alice["user"], "alice");
    assert_eq!(bob["user"], "bob");
    assert_ne!(alice["serial"], bob["serial"]);
    assert_ne!(alice["context"], bob["context"]);
    assert_eq!(f.viewer_builds.load(Ordering::SeqCst), 2);
    // the static dependency is reused, not rebuilt
    assert_eq!(f.catalog_builds.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn handler_and_subscription_in_one_request_share_the_tree() {
    let f = fixture().await;
    let groups = explorer(&f, ExplorerOptions::default()).explore().unwrap();
    let me = resolver(&groups, HandlerRole::Query, "me");
    let my_events = groups
        .find(HandlerRole::Subscription, "my_events")
        .and_then(|d| d.callback())
        .and_then(|c| c.as_subscription())
        .cloned()
        .unwrap();

    let id = ContextId::new();
    let viewer = me(call("carol").with_context_id(id)).await.unwrap();
    let events: Vec<Value> = (my_events.subscribe)(call("carol").with_context_id(id))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(events, vec![viewer["serial"].clone()]);
    assert_eq!(viewer["context"], json!(id.to_string()));
    assert_eq!(f.viewer_builds.load(Ordering::SeqCst), 1);

    f.container.dispose_context(id);
    assert!(!f.container.request_registry().unwrap().contains(id));
}

#[tokio::test]
async fn subscription_filter_gates_events() {
    let f = fixture().await;
    let groups = explorer(&f, ExplorerOptions::default()).explore().unwrap();
    let subscribe = |name| {
        groups
            .find(HandlerRole::Subscription, name)
            .and_then(|d| d.callback())
            .and_then(|c| c.as_subscription())
            .map(|s| Arc::clone(&s.subscribe))
            .unwrap()
    };

    let filtered: Vec<Value> = subscribe("book_events")(RawArgs::default())
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(filtered, vec![json!(2), json!(4)]);

    let all: Vec<Value> = subscribe("all_events")(RawArgs::default())
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(all, vec![json!(1), json!(2), json!(3), json!(4)]);
}

#[tokio::test]
async fn rediscovery_is_stable() {
    let f = fixture().await;
    let explorer = explorer(&f, ExplorerOptions::default());
    assert!(explorer.current().is_none());

    let first = explorer.explore().unwrap();
    let second = explorer.explore().unwrap();
    assert_eq!(keys(&first), keys(&second));
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&explorer.current().unwrap(), &second));
    assert_eq!(f.catalog_builds.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn include_list_limits_modules() {
    let f = fixture().await;
    let options = ExplorerOptions {
        include: vec!["viewer".into()],
        ..Default::default()
    };
    let groups = explorer(&f, options).explore().unwrap();
    let methods: Vec<&str> = groups.descriptors().map(|d| d.method_name).collect();
    assert_eq!(methods, vec!["me", "my_events"]);

    let options = ExplorerOptions {
        include: vec!["viewer".into(), "missing".into()],
        ..Default::default()
    };
    let err = explorer(&f, options).explore().unwrap_err();
    assert!(matches!(err, ExploreError::UnknownModule(ref m) if m == "missing"));
}

#[tokio::test]
async fn request_argument_position_is_configurable() {
    let f = fixture().await;
    let options = ExplorerOptions {
        request_arg_index: 0,
        ..Default::default()
    };
    let groups = explorer(&f, options).explore().unwrap();
    let me = resolver(&groups, HandlerRole::Query, "me");

    let raw = RawArgs::new(vec![RawArg::object("dave".to_string())]);
    assert_eq!(me(raw).await.unwrap()["user"], "dave");

    let err = me(RawArgs::default()).await.unwrap_err();
    assert!(matches!(err, ResolveError::MissingRequestArg { index: 0 }));
}

#[tokio::test]
async fn handler_errors_reach_the_caller_unchanged() {
    let f = fixture().await;
    let groups = explorer(&f, ExplorerOptions::default()).explore().unwrap();
    let me = resolver(&groups, HandlerRole::Query, "me");

    // request object of the wrong type: the viewer factory fails at injection
    let raw = RawArgs::resolver(Value::Null, json!({}), RawArg::Value(json!(1)), Value::Null);
    let err = me(raw).await.unwrap_err();
    match err {
        ResolveError::Container(resolvkit::ContainerError::Construction { token, .. }) => {
            assert_eq!(token, "viewer");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn metadata_discovered_through_inventory_is_empty_here() {
    // no `inventory::submit!` in this test binary
    assert!(MetadataTable::discover_and_build().unwrap().is_empty());
}
