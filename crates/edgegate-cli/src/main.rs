use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use edgegate_api::{GateOutcome, RouteClass};
use edgegate_connectors::EnvSecretStore;
use edgegate_core::{
    CONFIG_FILE, RoutePolicy, default_config_dir, load_config, write_default_config_file,
};
use edgegate_runtime::{EdgeDecision, EdgeRuntime, GateRequest, build_verifier};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "edgegate", about = "edgegate: edge authentication and tenant routing")]
struct Cli {
    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Write an example edgegate.toml into the config dir
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration (file + environment)
    Config,
    /// Run one request through the gate and tenant resolver
    Check {
        /// Request path, optionally with a query string
        #[arg(long)]
        path: String,
        #[arg(long, default_value = "localhost")]
        host: String,
        /// Value of the x-tenant-domain header
        #[arg(long)]
        tenant_domain: Option<String>,
        /// Raw Cookie header, e.g. "access_token=...; refresh_token=..."
        #[arg(long, default_value = "")]
        cookie: String,
    },
    /// Tenant lookups
    Tenant {
        #[command(subcommand)]
        command: TenantCommands,
    },
    /// Access credential helpers
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
    /// Route policy helpers
    Policy {
        #[command(subcommand)]
        command: PolicyCommands,
    },
}

#[derive(Debug, Subcommand)]
enum TenantCommands {
    /// Resolve the tenant branding for a host
    Resolve {
        #[arg(long)]
        host: String,
        #[arg(long)]
        tenant_domain: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum TokenCommands {
    /// Verify an access credential with the configured key
    Verify { token: String },
}

#[derive(Debug, Subcommand)]
enum PolicyCommands {
    /// Show how a path is classified
    Classify { path: String },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg_dir = cli.config_dir.clone().unwrap_or_else(default_config_dir);

    let load = || load_config(&cfg_dir);

    match cli.command {
        Commands::Init { force } => {
            let path = cfg_dir.join(CONFIG_FILE);
            if force && path.exists() {
                fs::remove_file(&path)?;
            }
            let path = write_default_config_file(&cfg_dir)?;
            pout(
                cli.json,
                serde_json::json!({"message": "init complete", "config": path}),
                &format!("Wrote {}", path.display()),
            )?;
        }
        Commands::Config => {
            let cfg = load()?;
            let value = serde_json::to_value(&cfg)?;
            let text = serde_json::to_string_pretty(&value)?;
            pout(cli.json, value, &text)?;
        }
        Commands::Check {
            path,
            host,
            tenant_domain,
            cookie,
        } => {
            let cfg = load()?;
            let runtime = EdgeRuntime::from_config(&cfg, &EnvSecretStore)?;
            let req = GateRequest::new(&path)
                .with_host(host)
                .with_tenant_domain(tenant_domain)
                .with_cookie_header(&cookie);
            let decision = runtime.handle(&req).await;
            pout(cli.json, serde_json::to_value(&decision)?, &describe(&decision))?;
        }
        Commands::Tenant {
            command: TenantCommands::Resolve {
                host,
                tenant_domain,
            },
        } => {
            let cfg = load()?;
            let runtime = EdgeRuntime::from_config(&cfg, &EnvSecretStore)?;
            let tenant = runtime
                .tenants()
                .resolve(&host, tenant_domain.as_deref())
                .await;
            let text = match &tenant {
                Some(t) => format!("{} ({})", t.name, t.slug),
                None => "No tenant for this host".to_string(),
            };
            pout(cli.json, serde_json::to_value(&tenant)?, &text)?;
        }
        Commands::Token {
            command: TokenCommands::Verify { token },
        } => {
            let cfg = load()?;
            let verifier = build_verifier(&cfg, &EnvSecretStore)?;
            match verifier.verify(&token) {
                Ok(credential) => {
                    let text = format!(
                        "Valid: {} <{}> role={} tenant={}",
                        credential.subject,
                        credential.email,
                        credential.role(),
                        credential.tenant_id().unwrap_or("-")
                    );
                    pout(
                        cli.json,
                        serde_json::json!({"valid": true, "credential": credential}),
                        &text,
                    )?;
                }
                Err(rejection) => {
                    pout(
                        cli.json,
                        serde_json::json!({"valid": false, "reason": rejection.to_string()}),
                        &format!("Invalid: {rejection}"),
                    )?;
                }
            }
        }
        Commands::Policy {
            command: PolicyCommands::Classify { path },
        } => {
            let cfg = load()?;
            let policy = RoutePolicy::from_settings(&cfg.routes);
            let bypassed = policy.is_bypassed(&path);
            let class = policy.classify(&path);
            let text = if bypassed {
                format!("{path}: bypassed")
            } else {
                format!("{path}: {}", describe_class(&class))
            };
            pout(
                cli.json,
                serde_json::json!({"path": path, "bypassed": bypassed, "class": class}),
                &text,
            )?;
        }
    }

    Ok(())
}

fn describe(decision: &EdgeDecision) -> String {
    let outcome = match &decision.outcome {
        GateOutcome::Pass => "pass".to_string(),
        GateOutcome::PassWithCookies { set_cookies } => {
            format!("pass, forwarding {} Set-Cookie directive(s)", set_cookies.len())
        }
        GateOutcome::Redirect(r) => {
            let mut line = format!("redirect ({:?}) to {}", r.kind, r.location);
            if !r.set_cookies.is_empty() {
                line.push_str(&format!(" with {} Set-Cookie directive(s)", r.set_cookies.len()));
            }
            line
        }
    };
    match &decision.tenant {
        Some(t) => format!("{outcome}; tenant {}", t.slug),
        None => format!("{outcome}; no tenant"),
    }
}

fn describe_class(class: &RouteClass) -> String {
    match class {
        RouteClass::Public => "public".to_string(),
        RouteClass::Protected => "protected".to_string(),
        RouteClass::Restricted(roles) => {
            let roles: Vec<&str> = roles.iter().map(|r| r.as_str()).collect();
            format!("restricted to {}", roles.join(", "))
        }
    }
}

pub fn pout(json_mode: bool, value: serde_json::Value, text: &str) -> anyhow::Result<()> {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{text}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use edgegate_api::{Redirect, RedirectKind, Role, SetCookie};
    use std::collections::BTreeSet;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_check_command() {
        let cli = Cli::try_parse_from([
            "edgegate",
            "--json",
            "check",
            "--path",
            "/admin",
            "--cookie",
            "access_token=x",
        ])
        .unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Check { ref path, .. } if path == "/admin"));
    }

    #[test]
    fn describes_redirects() {
        let decision = EdgeDecision {
            outcome: GateOutcome::Redirect(Redirect {
                kind: RedirectKind::Login,
                location: "/login?redirect=%2Fadmin".to_string(),
                set_cookies: vec![SetCookie::new("access_token=; Max-Age=0")],
            }),
            tenant: None,
        };
        assert_eq!(
            describe(&decision),
            "redirect (Login) to /login?redirect=%2Fadmin with 1 Set-Cookie directive(s); no tenant"
        );
    }

    #[test]
    fn describes_restricted_class() {
        let class = RouteClass::Restricted(BTreeSet::from([Role::SuperAdmin]));
        assert_eq!(describe_class(&class), "restricted to super_admin");
    }
}
