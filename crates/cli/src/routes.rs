use console::style;
use storefront_core::{
    auth::Session,
    routes::{Access, RouteDecision, RouteTable},
};
use storefront_types::Role;

/// Caller identity used when resolving a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum AsRole {
    Anonymous,
    User,
    Admin,
}

impl AsRole {
    fn session(self) -> Option<Session> {
        let role = match self {
            AsRole::Anonymous => return None,
            AsRole::User => Role::User,
            AsRole::Admin => Role::Admin,
        };
        Some(Session {
            uid: "cli".to_string(),
            role,
        })
    }
}

#[derive(Debug, Clone, PartialEq, clap::Args)]
pub struct RoutesCommand {
    /// Resolve this path instead of listing the table
    #[arg(long)]
    pub path: Option<String>,

    /// Who is asking
    #[arg(long = "as", value_enum, default_value = "anonymous")]
    pub role: AsRole,
}

fn access_label(access: Access) -> String {
    match access {
        Access::Open => style("open").green().to_string(),
        Access::Guest => style("guest").cyan().to_string(),
        Access::Client => style("client").yellow().to_string(),
        Access::Admin => style("admin").red().to_string(),
    }
}

impl RoutesCommand {
    pub fn describe(&self, table: &RouteTable) -> Vec<String> {
        match &self.path {
            Some(path) => {
                let session = self.role.session();
                let line = match table.resolve(path, session.as_ref()) {
                    RouteDecision::Render { view, params } if params.is_empty() => {
                        format!("{} {:?}", style("render").green(), view)
                    }
                    RouteDecision::Render { view, params } => {
                        format!("{} {:?} {:?}", style("render").green(), view, params)
                    }
                    RouteDecision::Redirect { to } => {
                        format!("{} {}", style("redirect").yellow(), to)
                    }
                };
                vec![line]
            }
            None => table
                .routes()
                .iter()
                .map(|route| {
                    format!(
                        "{:<24} {:<20} {:<6} {}",
                        route.pattern.unwrap_or("*"),
                        format!("{:?}", route.view),
                        if route.exact { "exact" } else { "" },
                        access_label(route.access)
                    )
                })
                .collect(),
        }
    }

    pub fn execute(&self) -> Result<(), String> {
        let table = RouteTable::storefront();
        for line in self.describe(&table) {
            println!("{}", line);
        }
        Ok(())
    }
}
