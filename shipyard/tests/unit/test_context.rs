//! Context stack and runtime config tests

use std::sync::Arc;

use serde_json::json;
use shipyard::config::deferred;
use shipyard::context::{Context, ContextStack, Input, Output};
use shipyard::errors::ShipyardError;
use shipyard::inventory::Host;
use shipyard::remote::LocalExecutor;
use shipyard::runtime::{Runtime, RuntimeParts};

fn context(alias: &str) -> Context {
    Context::new(
        Arc::new(Host::new(alias)),
        Arc::new(Input::new()),
        Output::capture(),
    )
}

#[test]
fn test_stack_push_pop() {
    let stack = ContextStack::new();
    assert!(matches!(stack.pop(), Err(ShipyardError::EmptyContextStack)));

    stack.push(context("web1"));
    stack.push(context("web2"));
    assert_eq!(stack.depth(), 2);
    assert_eq!(stack.current().unwrap().host().alias, "web2");

    assert_eq!(stack.pop().unwrap().host().alias, "web2");
    assert_eq!(stack.current().unwrap().host().alias, "web1");
}

#[test]
fn test_guards_restore_previous_context() {
    let stack = Arc::new(ContextStack::new());
    {
        let _outer = stack.enter(context("web1"));
        {
            let _inner = stack.enter(context("web2"));
            assert_eq!(stack.current().unwrap().host().alias, "web2");
        }
        assert_eq!(stack.current().unwrap().host().alias, "web1");
    }
    assert_eq!(stack.depth(), 0);
    assert!(stack.current().is_err());
}

fn master(hosts: Vec<Host>) -> Runtime {
    let mut parts = RuntimeParts::new(Arc::new(LocalExecutor));
    let mut defaults = shipyard::config::Config::new();
    defaults.set("app", json!("shop").into()).unwrap();
    defaults
        .set("deploy_path", json!("/srv/{{app}}/{{stage}}").into())
        .unwrap();
    defaults.set("stage", json!("production").into()).unwrap();
    defaults
        .set(
            "greeting",
            deferred(|rt| async move {
                let alias = rt.current_host()?.alias.clone();
                Ok(json!(format!("hello {}", alias)))
            }),
        )
        .unwrap();
    parts.defaults = Arc::new(defaults);
    let hosts: Vec<Arc<Host>> = hosts.into_iter().map(Arc::new).collect();
    Runtime::master(parts, &hosts)
}

#[tokio::test]
async fn test_host_config_overrides_defaults() {
    let rt = master(vec![
        Host::new("web1"),
        Host::new("staging").with_config("stage", json!("staging")),
    ]);

    {
        let _guard = rt.enter("web1").unwrap();
        assert_eq!(rt.get_string("deploy_path").await.unwrap(), "/srv/shop/production");
        assert_eq!(rt.get_string("greeting").await.unwrap(), "hello web1");
    }
    {
        let _guard = rt.enter("staging").unwrap();
        assert_eq!(rt.get_string("deploy_path").await.unwrap(), "/srv/shop/staging");
        assert_eq!(rt.get_string("greeting").await.unwrap(), "hello staging");
    }
}

#[tokio::test]
async fn test_set_is_scoped_to_current_host() {
    let rt = master(vec![Host::new("web1"), Host::new("web2")]);

    {
        let _guard = rt.enter("web1").unwrap();
        rt.set("release_path", json!("/srv/shop/releases/3")).unwrap();
        assert!(rt.has("release_path"));
    }
    {
        let _guard = rt.enter("web2").unwrap();
        assert!(!rt.has("release_path"));
        assert!(rt.get("release_path").await.is_err());
    }
    assert_eq!(rt.peek("web1", "release_path"), Some(json!("/srv/shop/releases/3")));
}

#[tokio::test]
async fn test_enter_unknown_host() {
    let rt = master(vec![Host::new("web1")]);
    assert!(matches!(rt.enter("db1"), Err(ShipyardError::UnknownHost(_))));
}
