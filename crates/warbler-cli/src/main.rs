use std::io::Write;
use std::process::ExitCode;

use tracing::info;

use warbler_db::{Database, DatabaseConfig};

const USAGE: &str = "usage: warbler <init|stats>

  init    create the users, messages, follows and likes tables
  stats   print row counts for each table

environment:
  WARBLER_DATABASE_URL   sqlite path or url (falls back to DATABASE_URL, then warbler.db)
  WARBLER_DELETE_POLICY  restrict | cascade";

fn main() -> anyhow::Result<ExitCode> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warbler=info".into()),
        )
        .init();

    let command = std::env::args().nth(1);
    let config = DatabaseConfig::from_env()?;

    let mut stdout = std::io::stdout().lock();
    let status = run(command.as_deref(), &config, &mut stdout)?;
    Ok(ExitCode::from(status))
}

/// Dispatch one subcommand. Returns the process exit status.
fn run(command: Option<&str>, config: &DatabaseConfig, out: &mut impl Write) -> anyhow::Result<u8> {
    let Some(command) = command else {
        eprintln!("{USAGE}");
        return Ok(1);
    };

    match command {
        "init" => {
            // Opening runs the migrations.
            Database::connect(config)?;
            info!(location = ?config.location, "schema ready");
        }
        "stats" => {
            let db = Database::connect(config)?;
            let counts = db.table_counts()?;
            writeln!(out, "users     {}", counts.users)?;
            writeln!(out, "messages  {}", counts.messages)?;
            writeln!(out, "follows   {}", counts.follows)?;
            writeln!(out, "likes     {}", counts.likes)?;
        }
        "-h" | "--help" | "help" => writeln!(out, "{USAGE}")?,
        other => {
            eprintln!("unknown command '{other}'\n\n{USAGE}");
            return Ok(1);
        }
    }

    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use warbler_db::{DeletePolicy, NewUser, StoreLocation};

    fn file_config(dir: &tempfile::TempDir) -> DatabaseConfig {
        DatabaseConfig {
            location: StoreLocation::File(dir.path().join("warbler.db")),
            delete_policy: DeletePolicy::Restrict,
        }
    }

    #[test]
    fn unknown_or_missing_command_exits_non_zero() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(&dir);
        let mut out = Vec::new();

        assert_eq!(run(Some("migrate"), &config, &mut out).unwrap(), 1);
        assert_eq!(run(None, &config, &mut out).unwrap(), 1);
        assert!(out.is_empty());
        assert!(!dir.path().join("warbler.db").exists());
    }

    #[test]
    fn init_creates_the_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(&dir);

        assert_eq!(run(Some("init"), &config, &mut Vec::new()).unwrap(), 0);
        assert!(dir.path().join("warbler.db").exists());
    }

    #[test]
    fn stats_reports_row_counts() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(&dir);
        {
            let db = Database::connect(&config).unwrap();
            db.insert_user(&NewUser::new("a@test.com", "a", "HASHED_PASSWORD")).unwrap();
        }

        let mut out = Vec::new();
        assert_eq!(run(Some("stats"), &config, &mut out).unwrap(), 0);

        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("users     1"));
        assert!(printed.contains("messages  0"));
    }

    #[test]
    fn help_prints_usage() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = Vec::new();

        assert_eq!(run(Some("--help"), &file_config(&dir), &mut out).unwrap(), 0);
        assert!(String::from_utf8(out).unwrap().starts_with("usage: warbler"));
    }
}
