#[cfg(test)]
mod tests {
    use crate::server::{core::AppConfig, router::build_router};
    use axum::{body::Body, http::Request, http::StatusCode};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_config() -> AppConfig {
        AppConfig {
            rate_limit_requests_per_minute: 10_000,
            bootstrap_admin_role: Some(String::from("Chief")),
            ..AppConfig::default()
        }
    }

    fn app() -> axum::Router {
        build_router(&test_config()).unwrap()
    }

    /// Sends one request to the module API. `role` of `None` is an
    /// anonymous caller; `Some(name)` is an authenticated caller acting
    /// under that role name.
    async fn module_request(
        app: &axum::Router,
        method: &str,
        uri: &str,
        role: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Option<Value>) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-forwarded-for", "203.0.113.7");
        if let Some(role) = role {
            builder = builder
                .header("x-module-auth", "true")
                .header("x-module-role", role);
        }
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        let request = builder
            .body(match body {
                Some(payload) => Body::from(payload.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        if bytes.is_empty() {
            return (status, None);
        }
        (status, serde_json::from_slice(&bytes).ok())
    }

    async fn create_role(app: &axum::Router, name: &str) -> String {
        let (status, body) = module_request(
            app,
            "POST",
            "/roles",
            Some("Chief"),
            Some(json!({"name": name})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body.unwrap()["roleId"].as_str().unwrap().to_owned()
    }

    async fn create_rank(app: &axum::Router, name: &str, role_id: Option<&str>) -> String {
        let mut payload = json!({"name": name});
        if let Some(role_id) = role_id {
            payload["roleId"] = json!(role_id);
        }
        let (status, body) =
            module_request(app, "POST", "/ranks", Some("Chief"), Some(payload)).await;
        assert_eq!(status, StatusCode::OK);
        body.unwrap()["rankId"].as_str().unwrap().to_owned()
    }

    async fn role_names_in_order(app: &axum::Router) -> Vec<String> {
        let (status, body) = module_request(app, "GET", "/roles", Some("Chief"), None).await;
        assert_eq!(status, StatusCode::OK);
        body.unwrap()["roles"]
            .as_array()
            .unwrap()
            .iter()
            .map(|role| role["name"].as_str().unwrap().to_owned())
            .collect()
    }

    async fn available_rank_names(app: &axum::Router, role_id: &str) -> Vec<String> {
        let (status, body) = module_request(
            app,
            "GET",
            &format!("/roles/{role_id}/available-ranks"),
            Some("Chief"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body.unwrap()["ranks"]
            .as_array()
            .unwrap()
            .iter()
            .map(|rank| rank["name"].as_str().unwrap().to_owned())
            .collect()
    }

    async fn access_list_id_by_name(app: &axum::Router, name: &str) -> String {
        let (status, body) =
            module_request(app, "GET", "/access-lists", Some("Chief"), None).await;
        assert_eq!(status, StatusCode::OK);
        body.unwrap()["accessLists"]
            .as_array()
            .unwrap()
            .iter()
            .find(|list| list["name"] == name)
            .unwrap()["accessListId"]
            .as_str()
            .unwrap()
            .to_owned()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = app();
        let (status, body) = module_request(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.unwrap()["status"], "ok");
    }

    #[tokio::test]
    async fn member_list_is_public_by_default() {
        let app = app();
        let (status, body) = module_request(&app, "GET", "/members", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.unwrap()["members"], json!([]));
    }

    #[tokio::test]
    async fn role_list_is_private_by_default() {
        let app = app();
        let (status, body) = module_request(&app, "GET", "/roles", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body.unwrap()["error"], "authentication_required");

        // Any authenticated caller can read the role list.
        let (status, body) = module_request(&app, "GET", "/roles", Some("Nobody"), None).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body.as_ref().unwrap()["roles"]
            .as_array()
            .unwrap()
            .iter()
            .map(|role| role["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["Chief"]);
    }

    #[tokio::test]
    async fn rank_catalog_sits_behind_the_roles_area() {
        let app = app();
        let (status, _) = module_request(&app, "GET", "/ranks", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = module_request(&app, "GET", "/ranks", Some("Nobody"), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn role_writes_require_manage_roles() {
        let app = app();
        let (status, body) =
            module_request(&app, "POST", "/roles", None, Some(json!({"name": "Elder"}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body.unwrap()["error"], "authentication_required");

        let (status, body) = module_request(
            &app,
            "POST",
            "/roles",
            Some("Peasant"),
            Some(json!({"name": "Elder"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body.unwrap()["error"], "insufficient_access");

        let (status, body) = module_request(
            &app,
            "POST",
            "/roles",
            Some("Chief"),
            Some(json!({"name": "Elder", "description": "council"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let body = body.unwrap();
        assert_eq!(body["name"], "Elder");
        assert_eq!(body["description"], "council");
        // The bootstrap role occupies the first position.
        assert_eq!(body["sortOrder"], 2);
    }

    #[tokio::test]
    async fn duplicate_role_name_conflicts() {
        let app = app();
        create_role(&app, "Elder").await;
        let (status, body) = module_request(
            &app,
            "POST",
            "/roles",
            Some("Chief"),
            Some(json!({"name": "Elder"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.unwrap()["error"], "conflict");
    }

    #[tokio::test]
    async fn role_reorder_assigns_dense_positions() {
        let app = app();
        let elder = create_role(&app, "Elder").await;
        let warrior = create_role(&app, "Warrior").await;
        let builder = create_role(&app, "Builder").await;

        let (status, body) = module_request(&app, "GET", "/roles", Some("Chief"), None).await;
        assert_eq!(status, StatusCode::OK);
        let chief = body.unwrap()["roles"]
            .as_array()
            .unwrap()
            .iter()
            .find(|role| role["name"] == "Chief")
            .unwrap()["roleId"]
            .as_str()
            .unwrap()
            .to_owned();

        let (status, _) = module_request(
            &app,
            "PATCH",
            "/roles/order",
            Some("Chief"),
            Some(json!({"roleIds": [builder, elder, warrior, chief]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        assert_eq!(
            role_names_in_order(&app).await,
            vec!["Builder", "Elder", "Warrior", "Chief"]
        );
    }

    #[tokio::test]
    async fn role_reorder_ignores_unknown_ids() {
        let app = app();
        let elder = create_role(&app, "Elder").await;
        let (status, _) = module_request(
            &app,
            "PATCH",
            "/roles/order",
            Some("Chief"),
            Some(json!({"roleIds": ["01ARZ3NDEKTSV4RRFFQ69G5FAV", elder]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(role_names_in_order(&app).await.contains(&String::from("Elder")));
    }

    #[tokio::test]
    async fn role_update_and_idempotent_delete() {
        let app = app();
        let elder = create_role(&app, "Elder").await;

        let (status, body) = module_request(
            &app,
            "PATCH",
            &format!("/roles/{elder}"),
            Some("Chief"),
            Some(json!({"name": "High Elder", "description": "senior council"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let body = body.unwrap();
        assert_eq!(body["name"], "High Elder");
        assert_eq!(body["description"], "senior council");

        let (status, body) = module_request(
            &app,
            "DELETE",
            &format!("/roles/{elder}"),
            Some("Chief"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.unwrap()["ok"], true);
        assert!(!role_names_in_order(&app).await.contains(&String::from("High Elder")));

        // Deleting again stays idempotent.
        let (status, body) = module_request(
            &app,
            "DELETE",
            &format!("/roles/{elder}"),
            Some("Chief"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.unwrap()["ok"], true);
    }

    #[tokio::test]
    async fn updating_a_missing_role_is_not_found() {
        let app = app();
        let (status, body) = module_request(
            &app,
            "PATCH",
            "/roles/01ARZ3NDEKTSV4RRFFQ69G5FAV",
            Some("Chief"),
            Some(json!({"name": "Ghost"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.unwrap()["error"], "not_found");
    }

    #[tokio::test]
    async fn global_rank_names_are_unique() {
        let app = app();
        create_rank(&app, "Novice", None).await;
        let (status, _) = module_request(
            &app,
            "POST",
            "/ranks",
            Some("Chief"),
            Some(json!({"name": "Novice"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        // A role-scoped rank may reuse a global name.
        let builder = create_role(&app, "Builder").await;
        let (status, _) = module_request(
            &app,
            "POST",
            "/ranks",
            Some("Chief"),
            Some(json!({"name": "Novice", "roleId": builder})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn scoping_a_rank_to_an_unknown_role_is_rejected() {
        let app = app();
        let (status, body) = module_request(
            &app,
            "POST",
            "/ranks",
            Some("Chief"),
            Some(json!({"name": "Ghost Rank", "roleId": "01ARZ3NDEKTSV4RRFFQ69G5FAV"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.unwrap()["error"], "invalid_request");
    }

    #[tokio::test]
    async fn unbound_role_offers_the_global_pool() {
        let app = app();
        let builder = create_role(&app, "Builder").await;
        create_rank(&app, "Novice", None).await;
        create_rank(&app, "Veteran", None).await;

        assert_eq!(
            available_rank_names(&app, &builder).await,
            vec!["Novice", "Veteran"]
        );
    }

    #[tokio::test]
    async fn bindings_replace_the_global_pool() {
        let app = app();
        let builder = create_role(&app, "Builder").await;
        create_rank(&app, "Novice", None).await;
        let veteran = create_rank(&app, "Veteran", None).await;

        let (status, _) = module_request(
            &app,
            "PATCH",
            &format!("/role-ranks/{builder}"),
            Some("Chief"),
            Some(json!({"rankIds": [veteran]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        assert_eq!(available_rank_names(&app, &builder).await, vec!["Veteran"]);

        let (status, body) = module_request(&app, "GET", "/role-ranks", None, None).await;
        assert_eq!(status, StatusCode::OK);
        let bindings = body.unwrap();
        let bindings = bindings["roleRanks"].as_array().unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0]["roleId"], builder.as_str());
        assert_eq!(bindings[0]["sortOrder"], 1);
    }

    #[tokio::test]
    async fn scoped_ranks_stay_available_to_their_owner() {
        let app = app();
        let builder = create_role(&app, "Builder").await;
        let veteran = create_rank(&app, "Veteran", None).await;
        create_rank(&app, "Shield Bearer", Some(&builder)).await;

        // Unbound: pool plus the scoped rank.
        assert_eq!(
            available_rank_names(&app, &builder).await,
            vec!["Veteran", "Shield Bearer"]
        );

        // Bound without the scoped rank: it is still offered, after the
        // bound set.
        let (status, _) = module_request(
            &app,
            "PATCH",
            &format!("/role-ranks/{builder}"),
            Some("Chief"),
            Some(json!({"rankIds": [veteran]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            available_rank_names(&app, &builder).await,
            vec!["Veteran", "Shield Bearer"]
        );

        // Another role never sees it.
        let elder = create_role(&app, "Elder").await;
        assert_eq!(available_rank_names(&app, &elder).await, vec!["Veteran"]);
    }

    #[tokio::test]
    async fn binding_a_foreign_scoped_rank_is_rejected() {
        let app = app();
        let builder = create_role(&app, "Builder").await;
        let elder = create_role(&app, "Elder").await;
        let scoped = create_rank(&app, "Shield Bearer", Some(&builder)).await;

        let (status, body) = module_request(
            &app,
            "PATCH",
            &format!("/role-ranks/{elder}"),
            Some("Chief"),
            Some(json!({"rankIds": [scoped]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.unwrap()["error"], "invalid_request");
    }

    #[tokio::test]
    async fn binding_order_can_be_rewritten() {
        let app = app();
        let builder = create_role(&app, "Builder").await;
        let novice = create_rank(&app, "Novice", None).await;
        let veteran = create_rank(&app, "Veteran", None).await;

        let (status, _) = module_request(
            &app,
            "PATCH",
            &format!("/role-ranks/{builder}"),
            Some("Chief"),
            Some(json!({"rankIds": [novice, veteran]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            available_rank_names(&app, &builder).await,
            vec!["Novice", "Veteran"]
        );

        let (status, _) = module_request(
            &app,
            "PATCH",
            &format!("/role-ranks/order/{builder}"),
            Some("Chief"),
            Some(json!({"rankIds": [veteran, novice]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            available_rank_names(&app, &builder).await,
            vec!["Veteran", "Novice"]
        );
    }

    #[tokio::test]
    async fn overrides_rename_global_ranks_per_role() {
        let app = app();
        let elder = create_role(&app, "Elder").await;
        let builder = create_role(&app, "Builder").await;
        let veteran = create_rank(&app, "Veteran", None).await;

        let (status, _) = module_request(
            &app,
            "PATCH",
            &format!("/role-rank-overrides/{elder}"),
            Some("Chief"),
            Some(json!({"overrides": [{"rankId": veteran, "name": "Senior Veteran"}]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = module_request(
            &app,
            "POST",
            "/members",
            Some("Chief"),
            Some(json!({
                "displayName": "Ragnar",
                "roles": ["Elder", "Builder"],
                "roleRanks": [
                    {"roleId": elder, "rankId": veteran},
                    {"roleId": builder, "rankId": veteran},
                ],
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let member = body.unwrap();
        let labels: Vec<(&str, &str)> = member["roleRanks"]
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| {
                (
                    entry["roleId"].as_str().unwrap(),
                    entry["label"].as_str().unwrap(),
                )
            })
            .collect();
        assert!(labels.contains(&(elder.as_str(), "Senior Veteran")));
        assert!(labels.contains(&(builder.as_str(), "Veteran")));
    }

    #[tokio::test]
    async fn overrides_only_attach_to_global_ranks() {
        let app = app();
        let builder = create_role(&app, "Builder").await;
        let scoped = create_rank(&app, "Shield Bearer", Some(&builder)).await;

        let (status, body) = module_request(
            &app,
            "PATCH",
            &format!("/role-rank-overrides/{builder}"),
            Some("Chief"),
            Some(json!({"overrides": [{"rankId": scoped, "name": "Renamed"}]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.unwrap()["error"], "invalid_request");
    }

    #[tokio::test]
    async fn member_assignment_drops_entries_for_unheld_roles() {
        let app = app();
        let elder = create_role(&app, "Elder").await;
        let builder = create_role(&app, "Builder").await;
        let veteran = create_rank(&app, "Veteran", None).await;

        let (status, body) = module_request(
            &app,
            "POST",
            "/members",
            Some("Chief"),
            Some(json!({
                "displayName": "Astrid",
                "roles": ["Builder"],
                "roleRanks": [
                    {"roleId": builder, "rankId": veteran},
                    {"roleId": elder, "rankId": veteran},
                ],
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let member = body.unwrap();
        let entries = member["roleRanks"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["roleId"], builder.as_str());
    }

    #[tokio::test]
    async fn global_rank_assignment_rejects_scoped_ranks() {
        let app = app();
        let builder = create_role(&app, "Builder").await;
        let scoped = create_rank(&app, "Shield Bearer", Some(&builder)).await;

        let (status, body) = module_request(
            &app,
            "POST",
            "/members",
            Some("Chief"),
            Some(json!({
                "displayName": "Astrid",
                "roles": ["Builder"],
                "globalRankId": scoped,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.unwrap()["error"], "invalid_request");
    }

    #[tokio::test]
    async fn member_display_name_must_not_be_blank() {
        let app = app();
        let (status, body) = module_request(
            &app,
            "POST",
            "/members",
            Some("Chief"),
            Some(json!({"displayName": "   "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.unwrap()["error"], "invalid_request");
    }

    #[tokio::test]
    async fn member_status_values_are_restricted() {
        let app = app();
        let (status, _) = module_request(
            &app,
            "POST",
            "/members",
            Some("Chief"),
            Some(json!({"displayName": "Astrid", "status": "banned"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = module_request(
            &app,
            "POST",
            "/members",
            Some("Chief"),
            Some(json!({"displayName": "Astrid", "status": "suspended"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.unwrap()["status"], "suspended");
    }

    #[tokio::test]
    async fn member_update_replaces_the_assignment_block() {
        let app = app();
        create_role(&app, "Builder").await;
        create_role(&app, "Elder").await;
        let veteran = create_rank(&app, "Veteran", None).await;

        let (status, body) = module_request(
            &app,
            "POST",
            "/members",
            Some("Chief"),
            Some(json!({
                "displayName": "Ragnar",
                "roles": ["Builder"],
                "globalRankId": veteran,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let member = body.unwrap();
        let member_id = member["memberId"].as_str().unwrap().to_owned();
        assert_eq!(member["globalRankId"], veteran.as_str());

        // A supplied role set replaces roles, global rank, and role ranks
        // as one block.
        let (status, body) = module_request(
            &app,
            "PATCH",
            &format!("/members/{member_id}"),
            Some("Chief"),
            Some(json!({"roles": ["Elder"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let member = body.unwrap();
        assert_eq!(member["roles"], json!(["Elder"]));
        assert_eq!(member["globalRankId"], Value::Null);
    }

    #[tokio::test]
    async fn member_names_roles_that_do_not_exist_yet() {
        let app = app();
        let (status, _) = module_request(
            &app,
            "POST",
            "/members",
            Some("Chief"),
            Some(json!({"displayName": "Astrid", "roles": ["Gatherer"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(role_names_in_order(&app).await.contains(&String::from("Gatherer")));
    }

    #[tokio::test]
    async fn access_lists_require_authentication_only_to_read() {
        let app = app();
        let (status, _) = module_request(&app, "GET", "/access-lists", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) =
            module_request(&app, "GET", "/access-lists", Some("Nobody"), None).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body.as_ref().unwrap()["accessLists"]
            .as_array()
            .unwrap()
            .iter()
            .map(|list| list["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec!["manage_access_lists", "manage_members", "manage_roles"]
        );
    }

    #[tokio::test]
    async fn access_list_writes_create_named_roles_on_the_fly() {
        let app = app();
        let (status, body) = module_request(
            &app,
            "POST",
            "/access-lists",
            Some("Chief"),
            Some(json!({"name": "view_audit_log", "roles": ["Elder"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.unwrap()["roles"], json!(["Elder"]));
        assert!(role_names_in_order(&app).await.contains(&String::from("Elder")));
    }

    #[tokio::test]
    async fn duplicate_access_list_name_conflicts() {
        let app = app();
        let (status, _) = module_request(
            &app,
            "POST",
            "/access-lists",
            Some("Chief"),
            Some(json!({"name": "manage_roles"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn access_list_membership_gates_writes() {
        let app = app();
        create_role(&app, "Scribe").await;
        let manage_members = access_list_id_by_name(&app, "manage_members").await;

        let (status, _) = module_request(
            &app,
            "POST",
            "/members",
            Some("Scribe"),
            Some(json!({"displayName": "Astrid"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = module_request(
            &app,
            "PATCH",
            &format!("/access-lists/{manage_members}"),
            Some("Chief"),
            Some(json!({"roles": ["Chief", "Scribe"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = module_request(
            &app,
            "POST",
            "/members",
            Some("Scribe"),
            Some(json!({"displayName": "Astrid"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        // Removal revokes immediately.
        let (status, _) = module_request(
            &app,
            "PATCH",
            &format!("/access-lists/{manage_members}"),
            Some("Chief"),
            Some(json!({"roles": ["Chief"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = module_request(
            &app,
            "POST",
            "/members",
            Some("Scribe"),
            Some(json!({"displayName": "Freya"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body.unwrap()["error"], "insufficient_access");
    }

    #[tokio::test]
    async fn deleting_a_role_revokes_its_grants() {
        let app = app();
        let scribe = create_role(&app, "Scribe").await;
        let manage_members = access_list_id_by_name(&app, "manage_members").await;
        let (status, _) = module_request(
            &app,
            "PATCH",
            &format!("/access-lists/{manage_members}"),
            Some("Chief"),
            Some(json!({"roles": ["Chief", "Scribe"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = module_request(
            &app,
            "DELETE",
            &format!("/roles/{scribe}"),
            Some("Chief"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = module_request(
            &app,
            "POST",
            "/members",
            Some("Scribe"),
            Some(json!({"displayName": "Astrid"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn access_list_delete_is_idempotent() {
        let app = app();
        let (status, body) = module_request(
            &app,
            "DELETE",
            "/access-lists/01ARZ3NDEKTSV4RRFFQ69G5FAV",
            Some("Chief"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.unwrap()["ok"], true);
    }

    #[tokio::test]
    async fn visibility_toggles_change_anonymous_reads() {
        let app = app();

        let (status, body) = module_request(
            &app,
            "PATCH",
            "/visibility/members",
            Some("Chief"),
            Some(json!({"isPublic": false})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.unwrap()["isPublic"], false);

        let (status, _) = module_request(&app, "GET", "/members", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = module_request(
            &app,
            "PATCH",
            "/visibility/roles",
            Some("Chief"),
            Some(json!({"isPublic": true})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = module_request(&app, "GET", "/roles", None, None).await;
        assert_eq!(status, StatusCode::OK);

        // The stored rows are readable without authentication.
        let (status, body) = module_request(&app, "GET", "/visibility", None, None).await;
        assert_eq!(status, StatusCode::OK);
        let settings = body.unwrap();
        let settings = settings.as_array().unwrap().clone();
        assert!(settings.contains(&json!({"area": "members", "isPublic": false})));
        assert!(settings.contains(&json!({"area": "roles", "isPublic": true})));
    }

    #[tokio::test]
    async fn visibility_rejects_unknown_areas() {
        let app = app();
        let (status, body) = module_request(
            &app,
            "PATCH",
            "/visibility/billing",
            Some("Chief"),
            Some(json!({"isPublic": true})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.unwrap()["error"], "not_found");
    }

    #[tokio::test]
    async fn visibility_writes_require_manage_roles() {
        let app = app();
        let (status, _) = module_request(
            &app,
            "PATCH",
            "/visibility/members",
            Some("Peasant"),
            Some(json!({"isPublic": false})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn rate_limit_responses_use_the_error_body() {
        let config = AppConfig {
            rate_limit_requests_per_minute: 2,
            ..AppConfig::default()
        };
        let app = build_router(&config).unwrap();
        for _ in 0..2 {
            let (status, _) = module_request(&app, "GET", "/health", None, None).await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, body) = module_request(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body.unwrap()["error"], "rate_limited");
    }

    #[tokio::test]
    async fn renaming_a_missing_role_to_a_taken_name_is_not_found() {
        let app = app();
        create_role(&app, "Elder").await;
        let (status, body) = module_request(
            &app,
            "PATCH",
            "/roles/01ARZ3NDEKTSV4RRFFQ69G5FAV",
            Some("Chief"),
            Some(json!({"name": "Elder"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.unwrap()["error"], "not_found");
    }

    #[tokio::test]
    async fn renaming_a_missing_access_list_to_a_taken_name_is_not_found() {
        let app = app();
        let (status, body) = module_request(
            &app,
            "PATCH",
            "/access-lists/01ARZ3NDEKTSV4RRFFQ69G5FAV",
            Some("Chief"),
            Some(json!({"name": "manage_roles"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.unwrap()["error"], "not_found");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_access_list_and_role_writes_make_progress() {
        let app = app();
        let manage_members = access_list_id_by_name(&app, "manage_members").await;

        let list_app = app.clone();
        let list_writer = tokio::spawn(async move {
            for i in 0..200 {
                let roles = if i % 2 == 0 {
                    json!(["Chief", "Scribe"])
                } else {
                    json!(["Chief"])
                };
                let (status, _) = module_request(
                    &list_app,
                    "PATCH",
                    &format!("/access-lists/{manage_members}"),
                    Some("Chief"),
                    Some(json!({"roles": roles})),
                )
                .await;
                assert_eq!(status, StatusCode::OK);
            }
        });

        let role_app = app.clone();
        let role_writer = tokio::spawn(async move {
            for i in 0..200 {
                let (status, _) = module_request(
                    &role_app,
                    "POST",
                    "/roles",
                    Some("Chief"),
                    Some(json!({"name": format!("Warband {i}")})),
                )
                .await;
                assert_eq!(status, StatusCode::OK);
            }
        });

        tokio::time::timeout(Duration::from_secs(30), async {
            list_writer.await.unwrap();
            role_writer.await.unwrap();
        })
        .await
        .expect("writes should not stall under concurrent load");
    }
}
