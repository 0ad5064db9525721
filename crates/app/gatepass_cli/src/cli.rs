use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "gatepass", version, about = "Gatepass operator tools")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// PostgreSQL connection for commands that touch stored records.
#[derive(Args, Debug)]
pub struct DbArgs {
    /// PostgreSQL connection URL.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the CLI version.
    Version,

    /// Apply pending database migrations.
    Migrate {
        #[command(flatten)]
        db: DbArgs,
    },

    /// Enroll a student, or refresh their directory fields.
    Enroll {
        #[command(flatten)]
        db: DbArgs,
        /// Student id; a new one is generated when omitted.
        #[arg(long)]
        id: Option<Uuid>,
        #[arg(long)]
        name: String,
        #[arg(long)]
        roll_number: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        photo_ref: Option<String>,
    },

    /// Ban a student from requesting new gate tokens.
    Ban {
        #[command(flatten)]
        db: DbArgs,
        student_id: Uuid,
        #[arg(long)]
        reason: String,
    },

    /// Lift a student's ban.
    Unban {
        #[command(flatten)]
        db: DbArgs,
        student_id: Uuid,
    },

    /// Show a student's presence and next allowed action.
    Status {
        #[command(flatten)]
        db: DbArgs,
        student_id: Uuid,
    },

    /// Sign a bearer token for a subject, for development and testing.
    MintToken {
        /// Subject: the student id for students, a staff id otherwise.
        #[arg(long)]
        subject: String,
        /// Role name, e.g. `student`, `guard`, `hod`. Repeatable.
        #[arg(long = "role", required = true)]
        roles: Vec<String>,
        #[arg(long, default_value = "")]
        email: String,
        /// Lifetime in hours.
        #[arg(long, default_value_t = 12)]
        hours: i64,
    },
}
