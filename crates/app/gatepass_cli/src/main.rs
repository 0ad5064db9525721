// Import and re-export the `error` module
pub use self::error::{Error, Result};
mod error;

use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Commands, DbArgs};
use gatepass_core::GateEngine;
use gatepass_core::auth::Role;
use gatepass_core::auth::jwt::{generate_access_token, resolve_jwt_secret};
use gatepass_core::config::EngineConfig;
use gatepass_core::identity::{self, Actor};
use gatepass_core::models::student::StudentProfile;
use gatepass_core::presence;
use gatepass_core::store::PgStore;
use gatepass_core::uuid::uuidv7;
use sqlx::PgPool;

mod cli;
mod logging;

/// Actor id recorded for changes made from the CLI.
const CLI_ACTOR: &str = "gatepass-cli";

fn main() -> Result<()> {
    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    logging::init()?;

    let args = Cli::parse();

    match args.command {
        Commands::Version => {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        }
        Commands::MintToken {
            subject,
            roles,
            email,
            hours,
        } => {
            if hours <= 0 {
                return Err(Error::Custom("--hours must be positive".into()));
            }
            let roles = roles
                .iter()
                .map(|r| Role::parse(r))
                .collect::<core::result::Result<Vec<_>, _>>()?;
            let token = generate_access_token(
                &subject,
                &email,
                &roles,
                chrono::Duration::hours(hours),
                resolve_jwt_secret().as_bytes(),
            )?;
            println!("{token}");
        }
        command => runtime()?.block_on(run_db(command))?,
    }

    Ok(())
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}

async fn connect(db: &DbArgs) -> Result<PgPool> {
    Ok(PgPool::connect(&db.database_url).await?)
}

async fn engine(db: &DbArgs) -> Result<GateEngine> {
    let pool = connect(db).await?;
    Ok(GateEngine::new(
        Arc::new(PgStore::new(pool)),
        EngineConfig::from_env(),
    ))
}

fn admin() -> Actor {
    Actor::new(CLI_ACTOR, vec![Role::Admin])
}

async fn run_db(command: Commands) -> Result<()> {
    match command {
        Commands::Migrate { db } => {
            let pool = connect(&db).await?;
            gatepass_core::migrate::migrate(&pool).await?;
            log::info!("migrations applied");
        }
        Commands::Enroll {
            db,
            id,
            name,
            roll_number,
            email,
            photo_ref,
        } => {
            let engine = engine(&db).await?;
            let student = identity::enroll(
                &engine,
                StudentProfile {
                    id: id.unwrap_or_else(uuidv7),
                    name,
                    roll_number,
                    email,
                    photo_ref,
                },
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&student)?);
        }
        Commands::Ban {
            db,
            student_id,
            reason,
        } => {
            let engine = engine(&db).await?;
            identity::ban(&engine, student_id, &reason, &admin()).await?;
            log::info!("banned {student_id}");
        }
        Commands::Unban { db, student_id } => {
            let engine = engine(&db).await?;
            identity::unban(&engine, student_id, &admin()).await?;
            log::info!("unbanned {student_id}");
        }
        Commands::Status { db, student_id } => {
            let engine = engine(&db).await?;
            let status = presence::get_status(&engine, student_id).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Version | Commands::MintToken { .. } => {
            return Err(Error::Custom("command does not use the database".into()));
        }
    }
    Ok(())
}
