//! Storefront page routing and access rules.
//!
//! The table is evaluated top to bottom and the first matching route wins,
//! so its order matters: `/account` must come before a prefix that would
//! swallow it, and the not-found route closes the table.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use storefront_types::Role;

use crate::auth::Session;

pub const HOME: &str = "/";
pub const SIGNIN: &str = "/signin";
pub const SIGNUP: &str = "/signup";
pub const ADMIN_DASHBOARD: &str = "/admin/dashboard";

/// Page rendered for a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum View {
    Search,
    Home,
    Shop,
    FeaturedProducts,
    RecommendedProducts,
    SignUp,
    SignIn,
    ForgotPassword,
    ViewProduct,
    ViewCategory,
    UserAccount,
    EditAccount,
    Checkout,
    Dashboard,
    ImportProducts,
    Products,
    SiteContent,
    Users,
    AddProduct,
    EditProduct,
    PageNotFound,
}

/// Who may see a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// Anyone
    Open,
    /// Public pages; administrators are kept on the dashboard
    Guest,
    /// Signed-in shoppers
    Client,
    /// Administrators
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// `None` matches every path
    pub pattern: Option<&'static str>,
    pub view: View,
    pub exact: bool,
    pub access: Access,
}

impl Route {
    const fn new(pattern: &'static str, view: View, exact: bool, access: Access) -> Self {
        Self {
            pattern: Some(pattern),
            view,
            exact,
            access,
        }
    }

    /// Match `path`, returning the captured `:param` segments
    pub fn matches(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let Some(pattern) = self.pattern else {
            return Some(BTreeMap::new());
        };

        let expected: Vec<&str> = segments(pattern).collect();
        let actual: Vec<&str> = segments(path).collect();
        if actual.len() < expected.len() || (self.exact && actual.len() != expected.len()) {
            return None;
        }

        let mut params = BTreeMap::new();
        for (want, got) in expected.iter().zip(&actual) {
            match want.strip_prefix(':') {
                Some(name) => {
                    params.insert(name.to_string(), got.to_string());
                }
                None if want == got => {}
                None => return None,
            }
        }
        Some(params)
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

/// Outcome of resolving a path for a caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RouteDecision {
    Render {
        view: View,
        params: BTreeMap<String, String>,
    },
    Redirect {
        to: String,
    },
}

impl RouteDecision {
    fn redirect(to: &str) -> Self {
        RouteDecision::Redirect { to: to.to_string() }
    }
}

#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// The storefront's pages, in matching order
    pub fn storefront() -> Self {
        use Access::*;
        use View::*;

        let routes = vec![
            Route::new("/search/:searchKey", Search, true, Open),
            Route::new(HOME, Home, true, Open),
            Route::new("/shop", Shop, true, Open),
            Route::new("/featured", FeaturedProducts, true, Open),
            Route::new("/recommended", RecommendedProducts, true, Open),
            Route::new(SIGNUP, SignUp, false, Guest),
            Route::new(SIGNIN, SignIn, true, Guest),
            Route::new("/forgot_password", ForgotPassword, false, Guest),
            Route::new("/product/:id", ViewProduct, false, Open),
            Route::new("/category/:id", ViewCategory, false, Open),
            Route::new("/account", UserAccount, true, Client),
            Route::new("/account/edit", EditAccount, true, Client),
            Route::new("/checkout", Checkout, false, Guest),
            Route::new(ADMIN_DASHBOARD, Dashboard, true, Admin),
            Route::new("/admin/import", ImportProducts, false, Admin),
            Route::new("/admin/products", Products, false, Admin),
            Route::new("/admin/content", SiteContent, false, Admin),
            Route::new("/admin/users", Users, false, Admin),
            Route::new("/admin/add", AddProduct, false, Admin),
            Route::new("/admin/edit/:id", EditProduct, false, Admin),
            Route {
                pattern: None,
                view: PageNotFound,
                exact: false,
                access: Guest,
            },
        ];
        Self { routes }
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Decide what `session` sees at `path`
    pub fn resolve(&self, path: &str, session: Option<&Session>) -> RouteDecision {
        let role = session.map(|s| s.role);

        for route in &self.routes {
            let Some(params) = route.matches(path) else {
                continue;
            };

            let render = RouteDecision::Render {
                view: route.view,
                params,
            };
            return match (route.access, role) {
                (Access::Open, _) => render,
                (Access::Guest, Some(Role::Admin)) => RouteDecision::redirect(ADMIN_DASHBOARD),
                (Access::Guest, Some(Role::User))
                    if matches!(route.view, View::SignIn | View::SignUp) =>
                {
                    RouteDecision::redirect(HOME)
                }
                (Access::Guest, _) => render,
                (Access::Client, Some(Role::User)) => render,
                (Access::Client, Some(Role::Admin)) => RouteDecision::redirect(ADMIN_DASHBOARD),
                (Access::Client, None) => RouteDecision::redirect(SIGNIN),
                (Access::Admin, Some(Role::Admin)) => render,
                (Access::Admin, _) => RouteDecision::redirect(HOME),
            };
        }

        // The table always ends with a catch-all
        RouteDecision::Render {
            view: View::PageNotFound,
            params: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> Session {
        Session {
            uid: "u1".to_string(),
            role: Role::User,
        }
    }

    fn admin() -> Session {
        Session {
            uid: "a1".to_string(),
            role: Role::Admin,
        }
    }

    fn renders(decision: RouteDecision, expected: View) {
        match decision {
            RouteDecision::Render { view, .. } => assert_eq!(view, expected),
            other => panic!("expected {:?}, got {:?}", expected, other),
        }
    }

    fn redirects(decision: RouteDecision, expected: &str) {
        assert_eq!(decision, RouteDecision::redirect(expected));
    }

    #[test]
    fn test_params_are_captured() {
        let table = RouteTable::storefront();
        let decision = table.resolve("/product/abc123", None);
        let mut params = BTreeMap::new();
        params.insert("id".to_string(), "abc123".to_string());
        assert_eq!(
            decision,
            RouteDecision::Render {
                view: View::ViewProduct,
                params
            }
        );
    }

    #[test]
    fn test_exact_and_prefix_matching() {
        let table = RouteTable::storefront();
        renders(table.resolve("/shop", None), View::Shop);
        renders(table.resolve("/shop/", None), View::Shop);
        renders(table.resolve("/shop/more", None), View::PageNotFound);
        // Non-exact routes match on segment boundaries only
        renders(table.resolve("/signup/step-2", None), View::SignUp);
        renders(table.resolve("/signupx", None), View::PageNotFound);
    }

    #[test]
    fn test_first_match_wins() {
        let table = RouteTable::storefront();
        renders(table.resolve("/", None), View::Home);
        renders(table.resolve("/search/boots", None), View::Search);
        renders(table.resolve("/account/edit", Some(&user())), View::EditAccount);
    }

    #[test]
    fn test_guest_routes() {
        let table = RouteTable::storefront();
        renders(table.resolve("/signin", None), View::SignIn);
        redirects(table.resolve("/signin", Some(&user())), HOME);
        redirects(table.resolve("/signup", Some(&user())), HOME);
        renders(table.resolve("/checkout/step1", Some(&user())), View::Checkout);
        redirects(table.resolve("/checkout", Some(&admin())), ADMIN_DASHBOARD);
        redirects(table.resolve("/nowhere", Some(&admin())), ADMIN_DASHBOARD);
    }

    #[test]
    fn test_client_routes() {
        let table = RouteTable::storefront();
        renders(table.resolve("/account", Some(&user())), View::UserAccount);
        redirects(table.resolve("/account", None), SIGNIN);
        redirects(table.resolve("/account", Some(&admin())), ADMIN_DASHBOARD);
    }

    #[test]
    fn test_admin_routes() {
        let table = RouteTable::storefront();
        renders(table.resolve("/admin/dashboard", Some(&admin())), View::Dashboard);
        renders(table.resolve("/admin/edit/p1", Some(&admin())), View::EditProduct);
        redirects(table.resolve("/admin/products", Some(&user())), HOME);
        redirects(table.resolve("/admin/users", None), HOME);
    }

    #[test]
    fn test_unknown_paths_render_not_found() {
        let table = RouteTable::storefront();
        renders(table.resolve("/does/not/exist", None), View::PageNotFound);
        renders(table.resolve("/does/not/exist", Some(&user())), View::PageNotFound);
    }

    #[test]
    fn test_decision_wire_format() {
        let value = serde_json::to_value(RouteDecision::redirect(SIGNIN)).unwrap();
        assert_eq!(value, serde_json::json!({ "decision": "redirect", "to": "/signin" }));
    }
}
