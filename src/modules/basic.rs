//! Modules that only carry the shared auth and items routes.

use axum::Router;
use std::sync::Arc;

use super::Module;
use crate::AppState;

pub struct ItemsOnly {
    name: &'static str,
    description: &'static str,
    icon: &'static str,
}

impl Module for ItemsOnly {
    fn name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        self.description
    }

    fn icon(&self) -> &'static str {
        self.icon
    }

    fn endpoints(&self) -> &'static [&'static str] {
        &["/api/items"]
    }

    fn routes(&self) -> Router<Arc<AppState>> {
        Router::new()
    }
}

pub static FORMS: ItemsOnly = ItemsOnly {
    name: "nexora-forms",
    description: "Form builder and surveys",
    icon: "📝",
};

pub static FSM: ItemsOnly = ItemsOnly {
    name: "nexora-fsm",
    description: "Field service management",
    icon: "🚚",
};

pub static LENS: ItemsOnly = ItemsOnly {
    name: "nexora-lens",
    description: "Analytics and insights",
    icon: "🔍",
};

pub static ROUTE: ItemsOnly = ItemsOnly {
    name: "nexora-route",
    description: "Route planning",
    icon: "🗺️",
};

#[cfg(test)]
mod tests {
    use crate::db::Role;
    use crate::testing::{send, TestApp};
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_items_only_modules_serve_items() {
        let app = TestApp::new().await;
        let (_, token) = app.user("mgr", Role::Manager).await;

        for name in ["nexora-forms", "nexora-fsm", "nexora-lens", "nexora-route"] {
            let uri = format!("/module/{}/api/items", name);
            let res = send(&app.router, Method::POST, &uri, Some(&token), Some(json!({"title": name}))).await;
            assert_eq!(res.status, StatusCode::CREATED, "{}", name);

            let res = send(&app.router, Method::GET, &uri, Some(&token), None).await;
            assert_eq!(res.body["total"], 1, "{}", name);

            let res = send(&app.router, Method::GET, &format!("/module/{}/", name), None, None).await;
            assert_eq!(res.body["endpoints"], json!(["/api/items"]));
        }
    }
}
