use std::path::{Path, PathBuf};

use person_service::adapters::db::{open_connection, run_migrations, schema_version};

const USAGE: &str = "\
Applies pending *.up.sql migrations to a sqlite database.

Usage: migrate_db [--path <file>] [--migrations <dir>] [--force]

  --path <file>        database file (default: $SQLITE_DSN)
  --migrations <dir>   migrations directory (default: $SQLITE_MIGRATIONS_DIR, then ./migrations)
  --force              delete the database file before migrating
  -h, --help           print this message";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Migrate(MigrateArgs),
    Help,
}

#[derive(Debug, PartialEq, Eq)]
struct MigrateArgs {
    db_path: String,
    migrations_dir: PathBuf,
    force: bool,
}

fn main() {
    if let Err(error) = dotenvy::dotenv()
        && !error.not_found()
    {
        eprintln!("failed to load .env file: {error}");
        std::process::exit(1);
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match parse_args(&args, |key| std::env::var(key).ok()) {
        Ok(Command::Help) => {
            println!("{USAGE}");
            Ok(())
        }
        Ok(Command::Migrate(migrate_args)) => migrate(&migrate_args),
        Err(error) => Err(error),
    };

    if let Err(error) = result {
        eprintln!("migrate_db: {error}");
        std::process::exit(1);
    }
}

fn parse_args<F>(args: &[String], lookup: F) -> Result<Command, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut db_path = lookup("SQLITE_DSN").filter(|value| !value.trim().is_empty());
    let mut migrations_dir = lookup("SQLITE_MIGRATIONS_DIR")
        .filter(|value| !value.trim().is_empty())
        .map_or_else(|| PathBuf::from("./migrations"), PathBuf::from);
    let mut force = false;

    let mut args = args.iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--path" => db_path = Some(flag_value(&mut args, "--path")?),
            "--migrations" => {
                migrations_dir = PathBuf::from(flag_value(&mut args, "--migrations")?);
            }
            "--force" => force = true,
            "-h" | "--help" => return Ok(Command::Help),
            other => return Err(format!("unknown argument {other:?}\n\n{USAGE}")),
        }
    }

    let db_path = db_path.ok_or("no database path; pass --path or set SQLITE_DSN")?;

    Ok(Command::Migrate(MigrateArgs {
        db_path,
        migrations_dir,
        force,
    }))
}

fn flag_value<'a>(
    args: &mut impl Iterator<Item = &'a String>,
    flag: &str,
) -> Result<String, String> {
    args.next()
        .filter(|value| !value.starts_with("--"))
        .cloned()
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn migrate(args: &MigrateArgs) -> Result<(), String> {
    let db_path = Path::new(&args.db_path);

    if args.force {
        match std::fs::remove_file(db_path) {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => return Err(format!("failed to remove {}: {error}", db_path.display())),
        }
    }
    if let Some(parent) = db_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|error| format!("failed to create {}: {error}", parent.display()))?;
    }

    let mut connection = open_connection(&args.db_path).map_err(|error| error.to_string())?;
    let before = schema_version(&connection).map_err(|error| error.to_string())?;
    let after =
        run_migrations(&mut connection, &args.migrations_dir).map_err(|error| error.to_string())?;

    println!("{}: schema version {before} -> {after}", db_path.display());
    Ok(())
}
