// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL API Control CLI
//!
//! Operator tool for provisioning instances on the shared cluster.
//!
//! Usage:
//!   postgresapi-ctl <command> [options]
//!
//! Commands:
//!   create <name> [--encoding <enc>]
//!   show <name>
//!   delete <name>
//!   create-user <name> <host>
//!   drop-user <name> <host>
//!   status <name>
//!   migrate

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use postgresapi_core::{Config, Instance, InstanceRegistry, PgCatalog, migrations};
use serde_json::json;
use tracing::{info, warn};

fn print_usage() {
    eprintln!(
        r#"Usage: postgresapi-ctl <command> [options]

Provision logical PostgreSQL instances on the shared cluster.

COMMANDS:
    create <name>                   Create an instance
    show <name>                     Show an instance and its endpoint
    delete <name>                   Delete an instance and its database
    create-user <name> <host>       Create the login role for a client host
    drop-user <name> <host>         Drop the login role for a client host
    status <name>                   Check whether an instance is up
    migrate                         Apply catalog migrations

CREATE OPTIONS:
    --encoding <enc>                Database encoding (e.g. UTF8)

ENVIRONMENT:
    POSTGRESAPI_DATABASE_URL        Catalog store connection string (required)
    POSTGRESAPI_SALT                Credential derivation key (required)
    POSTGRESAPI_SHARED_HOST         Shared cluster host (default: localhost)
    POSTGRESAPI_SHARED_PORT         Shared cluster port (default: 5432)
    POSTGRESAPI_SHARED_ADMIN        Admin role (default: postgres)
    POSTGRESAPI_SHARED_ADMIN_PASSWORD  Admin password
    POSTGRESAPI_SHARED_PUBLIC_HOST  Host advertised to clients

EXAMPLES:
    # Create an instance; the name is canonicalized
    postgresapi-ctl create "orders db"

    # Issue credentials for a client
    postgresapi-ctl create-user orders 10.0.0.12
"#
    );
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Create {
        name: String,
        encoding: Option<String>,
    },
    Show {
        name: String,
    },
    Delete {
        name: String,
    },
    CreateUser {
        name: String,
        host: String,
    },
    DropUser {
        name: String,
        host: String,
    },
    Status {
        name: String,
    },
    Migrate,
    Help,
}

fn parse_args_from_vec(args: &[String]) -> Result<Command, String> {
    if args.len() < 2 {
        return Err("No command specified".to_string());
    }

    match args[1].as_str() {
        "help" | "--help" | "-h" => Ok(Command::Help),
        "create" => {
            let name = args.get(2).ok_or("Instance name required")?.clone();
            let mut encoding: Option<String> = None;

            let mut i = 3;
            while i < args.len() {
                match args[i].as_str() {
                    "--encoding" => {
                        i += 1;
                        encoding = Some(args.get(i).ok_or("--encoding requires a value")?.clone());
                    }
                    arg => return Err(format!("Unknown argument: {}", arg)),
                }
                i += 1;
            }

            Ok(Command::Create { name, encoding })
        }
        "show" => {
            let name = args.get(2).ok_or("Instance name required")?.clone();
            Ok(Command::Show { name })
        }
        "delete" => {
            let name = args.get(2).ok_or("Instance name required")?.clone();
            Ok(Command::Delete { name })
        }
        "create-user" => {
            let name = args.get(2).ok_or("Instance name required")?.clone();
            let host = args.get(3).ok_or("Client host required")?.clone();
            Ok(Command::CreateUser { name, host })
        }
        "drop-user" => {
            let name = args.get(2).ok_or("Instance name required")?.clone();
            let host = args.get(3).ok_or("Client host required")?.clone();
            Ok(Command::DropUser { name, host })
        }
        "status" => {
            let name = args.get(2).ok_or("Instance name required")?.clone();
            Ok(Command::Status { name })
        }
        "migrate" => Ok(Command::Migrate),
        cmd => Err(format!("Unknown command: {}", cmd)),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let cmd = match parse_args_from_vec(&args) {
        Ok(Command::Help) => {
            print_usage();
            return ExitCode::SUCCESS;
        }
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "postgresapi_core=info".into()),
        )
        .init();

    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    match run(cmd).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cmd: Command) -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to catalog store")?;

    if cmd == Command::Migrate {
        migrations::run(&pool).await?;
        info!("Catalog migrations applied");
        return Ok(());
    }

    let registry = InstanceRegistry::new(&config, Arc::new(PgCatalog::new(pool)));

    match cmd {
        Command::Create { name, encoding } => {
            let instance = match encoding {
                Some(encoding) => registry.create_with_encoding(&name, &encoding).await?,
                None => registry.create(&name).await?,
            };
            print_json(&describe(&registry, &instance)?)?;
        }
        Command::Show { name } => {
            let instance = registry.retrieve(&name).await?;
            print_json(&describe(&registry, &instance)?)?;
        }
        Command::Delete { name } => {
            registry.delete(&name).await?;
            print_json(&json!({ "deleted": name }))?;
        }
        Command::CreateUser { name, host } => {
            let instance = registry.retrieve(&name).await?;
            let credentials = registry.create_user(&instance, &host).await?;
            print_json(&json!({
                "database": instance.name(),
                "host": registry.public_host(&instance)?,
                "port": registry.port(&instance)?,
                "username": credentials.username,
                "password": credentials.password,
            }))?;
        }
        Command::DropUser { name, host } => {
            let instance = registry.retrieve(&name).await?;
            registry.drop_user(&instance, &host).await?;
            print_json(&json!({ "database": instance.name(), "dropped_for": host }))?;
        }
        Command::Status { name } => {
            let instance = registry.retrieve(&name).await?;
            let up = registry.is_up(&instance).await?;
            print_json(&json!({
                "name": instance.name(),
                "state": instance.state(),
                "up": up,
            }))?;
        }
        Command::Migrate | Command::Help => {}
    }

    Ok(())
}

fn describe(
    registry: &InstanceRegistry,
    instance: &Instance,
) -> postgresapi_core::Result<serde_json::Value> {
    Ok(json!({
        "name": instance.name(),
        "state": instance.state(),
        "shared": instance.shared(),
        "host": registry.public_host(instance)?,
        "port": registry.port(instance)?,
    }))
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(a: &[&str]) -> Vec<String> {
        a.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_no_command() {
        let result = parse_args_from_vec(&args(&["postgresapi-ctl"]));
        assert_eq!(result.unwrap_err(), "No command specified");
    }

    #[test]
    fn test_parse_unknown_command() {
        let result = parse_args_from_vec(&args(&["postgresapi-ctl", "frobnicate"]));
        assert_eq!(result.unwrap_err(), "Unknown command: frobnicate");
    }

    #[test]
    fn test_parse_create() {
        let cmd = parse_args_from_vec(&args(&["postgresapi-ctl", "create", "orders db"])).unwrap();
        assert_eq!(
            cmd,
            Command::Create {
                name: "orders db".to_string(),
                encoding: None
            }
        );

        let cmd = parse_args_from_vec(&args(&[
            "postgresapi-ctl",
            "create",
            "orders",
            "--encoding",
            "UTF8",
        ]))
        .unwrap();
        assert_eq!(
            cmd,
            Command::Create {
                name: "orders".to_string(),
                encoding: Some("UTF8".to_string())
            }
        );
    }

    #[test]
    fn test_parse_create_missing_encoding_value() {
        let result =
            parse_args_from_vec(&args(&["postgresapi-ctl", "create", "orders", "--encoding"]));
        assert_eq!(result.unwrap_err(), "--encoding requires a value");
    }

    #[test]
    fn test_parse_user_commands() {
        let cmd = parse_args_from_vec(&args(&[
            "postgresapi-ctl",
            "create-user",
            "orders",
            "10.0.0.12",
        ]))
        .unwrap();
        assert_eq!(
            cmd,
            Command::CreateUser {
                name: "orders".to_string(),
                host: "10.0.0.12".to_string()
            }
        );

        let result = parse_args_from_vec(&args(&["postgresapi-ctl", "drop-user", "orders"]));
        assert_eq!(result.unwrap_err(), "Client host required");
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(
            parse_args_from_vec(&args(&["postgresapi-ctl", "migrate"])).unwrap(),
            Command::Migrate
        );
        assert_eq!(
            parse_args_from_vec(&args(&["postgresapi-ctl", "--help"])).unwrap(),
            Command::Help
        );
        assert_eq!(
            parse_args_from_vec(&args(&["postgresapi-ctl", "status", "orders"])).unwrap(),
            Command::Status {
                name: "orders".to_string()
            }
        );
        assert!(parse_args_from_vec(&args(&["postgresapi-ctl", "show"])).is_err());
    }
}
