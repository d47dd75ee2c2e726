//! Integration tests for route groups and dispatch

use std::sync::Arc;
use swiftapi_core::*;

fn app_with(policy: MethodMismatch) -> Application {
    Application::with_config(AppConfig {
        request_logging: false,
        method_mismatch: policy,
        ..AppConfig::default()
    })
}

#[tokio::test]
async fn test_prefix_and_version_compose_paths() {
    let mut app = app_with(MethodMismatch::default());
    app.add_router(|r| {
        r.set_prefix("/api").set_version("v2");
        r.get("/users/{id}", &["id"], |Path(id): Path<u32>| async move {
            format!("user {id}")
        })?;
        Ok(())
    })
    .unwrap();
    let router = app.build().unwrap();

    let response = router.handle(HttpRequest::new("GET", "/api/v2/users/9")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body_str(), "user 9");

    let response = router.handle(HttpRequest::new("GET", "/users/9")).await;
    assert_eq!(response.status, 404);
}

#[tokio::test]
async fn test_placeholders_round_trip() {
    let mut app = app_with(MethodMismatch::default());
    app.add_router(|r| {
        r.get(
            "/orgs/{org}/teams/{team}/members/{member}",
            &["org", "team", "member"],
            |Path(org): Path<String>, Path(team): Path<String>, Path(member): Path<u64>| async move {
                format!("{org}/{team}/{member}")
            },
        )?;
        Ok(())
    })
    .unwrap();
    let router = app.build().unwrap();

    let response = router
        .handle(HttpRequest::new("GET", "/orgs/acme/teams/core/members/17"))
        .await;
    assert_eq!(response.body_str(), "acme/core/17");
}

#[tokio::test]
async fn test_encoded_path_params_are_decoded() {
    let mut app = app_with(MethodMismatch::default());
    app.add_router(|r| {
        r.get("/users/{name}", &["name"], |Path(name): Path<String>| async move { name })?;
        Ok(())
    })
    .unwrap();
    let router = app.build().unwrap();

    for (path, expected) in [
        ("/users/john%20doe", "john doe"),
        ("/users/caf%C3%A9", "café"),
        ("/users/a%2Fb", "a/b"),
    ] {
        let response = router.handle(HttpRequest::new("GET", path)).await;
        assert_eq!(response.status, 200, "{path}");
        assert_eq!(response.body_str(), expected);
    }
}

#[tokio::test]
async fn test_wrong_method_on_first_match_is_405() {
    let mut app = app_with(MethodMismatch::FirstPathMatch);
    app.add_router(|r| {
        r.get("/items/{id}", &["id"], |Path(id): Path<u32>| async move { id.to_string() })?;
        r.post("/items/{id}", &["id"], |Path(id): Path<u32>| async move {
            format!("created {id}")
        })?;
        Ok(())
    })
    .unwrap();
    let router = app.build().unwrap();

    let response = router.handle(HttpRequest::new("POST", "/items/5")).await;
    assert_eq!(response.status, 405);
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["status"], 405);
}

#[tokio::test]
async fn test_collect_policy_keeps_scanning() {
    let mut app = app_with(MethodMismatch::CollectPathMatches);
    app.add_router(|r| {
        r.get("/items/{id}", &["id"], |Path(id): Path<u32>| async move { id.to_string() })?;
        r.post("/items/{id}", &["id"], |Path(id): Path<u32>| async move {
            format!("created {id}")
        })?;
        Ok(())
    })
    .unwrap();
    let router = app.build().unwrap();

    let response = router.handle(HttpRequest::new("POST", "/items/5")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body_str(), "created 5");

    let response = router.handle(HttpRequest::new("DELETE", "/items/5")).await;
    assert_eq!(response.status, 405);
}

#[tokio::test]
async fn test_first_registered_route_wins() {
    let mut app = app_with(MethodMismatch::default());
    app.add_router(|r| {
        r.get("/files/latest", &[], || async { "static" })?;
        r.get("/files/{name}", &["name"], |Path(name): Path<String>| async move { name })?;
        Ok(())
    })
    .unwrap();
    let router = app.build().unwrap();

    assert_eq!(
        router.handle(HttpRequest::new("GET", "/files/latest")).await.body_str(),
        "static"
    );
    assert_eq!(
        router.handle(HttpRequest::new("GET", "/files/report")).await.body_str(),
        "report"
    );
}

#[tokio::test]
async fn test_groups_are_scanned_in_order() {
    let mut app = app_with(MethodMismatch::default());
    app.add_router(|r| {
        r.set_prefix("/v1");
        r.get("/ping", &[], || async { "one" })?;
        Ok(())
    })
    .unwrap();
    app.include({
        let mut group = RouterGroup::new().prefix("/v2");
        group.get("/ping", &[], || async { "two" }).unwrap();
        group
    });
    let router = app.build().unwrap();

    assert_eq!(router.len(), 2);
    assert_eq!(router.handle(HttpRequest::new("GET", "/v1/ping")).await.body_str(), "one");
    assert_eq!(router.handle(HttpRequest::new("GET", "/v2/ping")).await.body_str(), "two");
}

#[tokio::test]
async fn test_add_route_with_several_methods() {
    let mut app = app_with(MethodMismatch::default());
    app.add_router(|r| {
        r.add_route("/health", &["GET", "HEAD"], &["req"], |req: HttpRequest| async move {
            req.method
        })?;
        Ok(())
    })
    .unwrap();
    let router = app.build().unwrap();

    assert_eq!(router.handle(HttpRequest::new("HEAD", "/health")).await.body_str(), "HEAD");
    assert_eq!(router.handle(HttpRequest::new("PUT", "/health")).await.status, 405);
}

#[tokio::test]
async fn test_handler_errors_become_responses() {
    let mut app = app_with(MethodMismatch::default());
    app.add_router(|r| {
        r.get("/secret", &[], || async {
            Err::<String, _>(Error::Forbidden("no access".into()))
        })?;
        r.get("/broken", &[], || async {
            Err::<String, _>(Error::Internal("database password leaked here".into()))
        })?;
        Ok(())
    })
    .unwrap();
    let router = app.build().unwrap();

    let response = router.handle(HttpRequest::new("GET", "/secret")).await;
    assert_eq!(response.status, 403);

    let response = router.handle(HttpRequest::new("GET", "/broken")).await;
    assert_eq!(response.status, 500);
    assert!(!response.body_str().contains("password"));
}

#[test]
fn test_registration_errors() {
    let mut group = RouterGroup::new();
    assert!(matches!(
        group.get("/a/{id", &["id"], |Path(id): Path<u32>| async move { id.to_string() }),
        Err(Error::InvalidRoute(_)) | Err(Error::Registration(_))
    ));
    assert!(matches!(
        group.add_route("/a", &[], &[], || async { "" }),
        Err(Error::Registration(_))
    ));
    assert!(matches!(
        group.get("/a", &["x", "y"], |Query(x): Query<u32>| async move { x.to_string() }),
        Err(Error::Registration(_))
    ));
    assert!(group.routes().is_empty());
}

#[test]
fn test_full_path_uses_group_settings() {
    let group = RouterGroup::new().prefix("api/").version("/v1/");
    assert_eq!(group.full_path("users"), "/api/v1/users");
    assert!(!group.requires_authorization());

    let group = RouterGroup::new().authorization(true);
    assert!(group.requires_authorization());
    assert_eq!(group.full_path("/"), "/");
}

#[tokio::test]
async fn test_router_is_shared_across_tasks() {
    let mut app = app_with(MethodMismatch::default());
    app.add_router(|r| {
        r.get("/double/{n}", &["n"], |Path(n): Path<i64>| async move { (n * 2).to_string() })?;
        Ok(())
    })
    .unwrap();
    let router: Arc<Router> = app.build().unwrap();

    let tasks: Vec<_> = (0..64i64)
        .map(|n| {
            let router = router.clone();
            tokio::spawn(async move {
                let response = router
                    .handle(HttpRequest::new("GET", format!("/double/{n}")))
                    .await;
                (n, response.body_str().to_string())
            })
        })
        .collect();

    for task in tasks {
        let (n, body) = task.await.unwrap();
        assert_eq!(body, (n * 2).to_string());
    }
}
