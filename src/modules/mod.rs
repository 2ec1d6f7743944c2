//! Feature modules mounted by the home app under `/module/<name>`.

pub mod assist;
pub mod basic;
pub mod bigin;
pub mod bookings;
pub mod books;
pub mod commerce;
pub mod crm;
pub mod desk;
pub mod expense;
pub mod inventory;
pub mod invoice;
pub mod items;
pub mod payroll;
pub mod routeiq;
pub mod salesiq;
pub mod service;

use axum::{routing::get, Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::api::auth;
use crate::AppState;

/// One feature area of the suite
pub trait Module: Send + Sync {
    /// Mount name, e.g. `nexora-crm`
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn icon(&self) -> &'static str;

    /// Paths advertised by the module root
    fn endpoints(&self) -> &'static [&'static str];

    /// Stateless modules skip the auth and items routes
    fn uses_database(&self) -> bool {
        true
    }

    /// Carries the generic `/api/items` CRUD
    fn generic_items(&self) -> bool {
        self.uses_database()
    }

    /// Module-specific routes, relative to the mount point
    fn routes(&self) -> Router<Arc<AppState>>;
}

/// Every module the home app serves
pub static MODULES: &[&dyn Module] = &[
    &assist::Assist,
    &bigin::Bigin,
    &bookings::Bookings,
    &books::Books,
    &commerce::Commerce,
    &crm::Crm,
    &desk::Desk,
    &expense::Expense,
    &basic::FORMS,
    &basic::FSM,
    &inventory::Inventory,
    &invoice::Invoicing,
    &basic::LENS,
    &payroll::Payroll,
    &basic::ROUTE,
    &routeiq::RouteIq,
    &salesiq::SalesIq,
    &service::Service,
];

pub fn find(name: &str) -> Option<&'static dyn Module> {
    MODULES.iter().copied().find(|m| m.name() == name)
}

/// Catalogue entry served by `/api/modules`
#[derive(Debug, Clone, Serialize)]
pub struct ModuleInfo {
    pub name: &'static str,
    pub display_name: String,
    pub icon: &'static str,
    pub description: &'static str,
    pub health_url: String,
    pub access_url: String,
}

impl ModuleInfo {
    pub fn new(module: &dyn Module) -> Self {
        let name = module.name();
        Self {
            name,
            display_name: display_name(name),
            icon: module.icon(),
            description: module.description(),
            health_url: format!("/module/{}/api/health", name),
            access_url: format!("/module/{}/", name),
        }
    }
}

/// `nexora-route-iq` -> `Route Iq`
pub fn display_name(name: &str) -> String {
    name.trim_start_matches("nexora-")
        .split('-')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn root_body(module: &dyn Module) -> Value {
    json!({
        "module": module.name(),
        "status": "running",
        "endpoints": module.endpoints(),
    })
}

/// Full router for one module: its own routes plus root, health, and for
/// DB-backed modules the shared auth and items routes.
pub fn router(module: &'static dyn Module) -> Router<Arc<AppState>> {
    let name = module.name();
    let mut router = module
        .routes()
        .route("/", get(move || async move { Json(root_body(module)) }))
        .route(
            "/api/health",
            get(move || async move { Json(json!({"status": "healthy", "service": name})) }),
        );

    if module.uses_database() {
        router = router.nest("/api/auth", auth::router());
    }
    if module.generic_items() {
        router = router.merge(items::router(name));
    }
    router
}

/// Nest every registered module under `/module/<name>`
pub fn mount_all(mut app: Router<Arc<AppState>>) -> Router<Arc<AppState>> {
    for module in MODULES {
        let module: &'static dyn Module = *module;
        let prefix = format!("/module/{}", module.name());
        app = app
            .nest(&prefix, router(module))
            .route(
                &format!("{}/", prefix),
                get(move || async move { Json(root_body(module)) }),
            );
    }
    tracing::info!(count = MODULES.len(), "Mounted modules");
    app
}
