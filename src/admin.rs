//! Database administration: daemon control, CSV export, backup and restore.
//!
//! External PostgreSQL tools are run directly (no shell) with the role's
//! password passed through `PGPASSWORD`.

use log::{info, warn};
use std::io::Write;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::process::Command;

use crate::config::Settings;
use crate::error::AdminError;
use crate::models::Reading;
use crate::utils::format_export_timestamp;

/// Directory under the backup path holding the one backup to restore
pub const STAGING_DIR: &str = "backup_to_use";
pub const CSV_HEADER: &str = "unique_key, timestamp, value";

/// Builder for PostgreSQL command line tools
#[derive(Debug, Clone)]
pub struct PgTools {
    binaries: PathBuf,
    database: String,
    role: String,
    password: String,
}

impl PgTools {
    pub fn from_settings(settings: &Settings) -> Result<Self, AdminError> {
        let binaries = settings
            .paths
            .postgres_binaries
            .clone()
            .ok_or(AdminError::MissingSetting("postgres_binary_path"))?;

        Ok(PgTools {
            binaries,
            database: settings.database.name.clone(),
            role: settings.database.role.clone(),
            password: settings.database.password.clone(),
        })
    }

    fn command(&self, tool: &str) -> Command {
        let mut command = Command::new(self.binaries.join(tool));
        command.env("PGPASSWORD", &self.password);
        command
    }

    /// `pg_ctl -D <cluster> start|stop`
    pub fn pg_ctl(&self, data_cluster: &Path, action: &str) -> Command {
        let mut command = self.command("pg_ctl");
        command.arg("-D").arg(data_cluster).arg(action);
        command
    }

    /// `pg_dump -U <role> -f <file> <db>`
    pub fn dump(&self, output: &Path) -> Command {
        let mut command = self.command("pg_dump");
        command
            .arg("-U")
            .arg(&self.role)
            .arg("-f")
            .arg(output)
            .arg(&self.database);
        command
    }

    pub fn drop_database(&self) -> Command {
        let mut command = self.command("dropdb");
        command.arg("-U").arg(&self.role).arg(&self.database);
        command
    }

    pub fn create_database(&self) -> Command {
        let mut command = self.command("createdb");
        command.arg("-U").arg(&self.role).arg(&self.database);
        command
    }

    /// `psql -U <role> -d <db> -f <file>`
    pub fn load(&self, input: &Path) -> Command {
        let mut command = self.command("psql");
        command
            .arg("-U")
            .arg(&self.role)
            .arg("-d")
            .arg(&self.database)
            .arg("-f")
            .arg(input);
        command
    }
}

fn describe(command: &Command) -> String {
    let std = command.as_std();
    let mut parts = vec![std.get_program().to_string_lossy().into_owned()];
    parts.extend(std.get_args().map(|arg| arg.to_string_lossy().into_owned()));
    parts.join(" ")
}

/// Run a command to completion, failing on a non-zero exit
pub async fn run_command(mut command: Command) -> Result<(), AdminError> {
    let description = describe(&command);
    info!("Running {}", description);

    let status = command.status().await?;
    if status.success() {
        Ok(())
    } else {
        Err(AdminError::CommandFailed {
            command: description,
            status: status.to_string(),
        })
    }
}

/// File name for a backup taken at `now`: `<unix seconds>.bak`
pub fn backup_file_name(now: OffsetDateTime) -> String {
    format!("{}.bak", now.unix_timestamp())
}

/// Dump the database into the backup directory, returning the file written
pub async fn backup(tools: &PgTools, backup_dir: &Path) -> Result<PathBuf, AdminError> {
    std::fs::create_dir_all(backup_dir)?;
    let output = backup_dir.join(backup_file_name(OffsetDateTime::now_utc()));

    run_command(tools.dump(&output)).await?;
    info!("Backup written to {}", output.display());
    Ok(output)
}

/// The single file staged for restore. Zero or several files is an error.
pub fn staged_backup(backup_dir: &Path) -> Result<PathBuf, AdminError> {
    let staging = backup_dir.join(STAGING_DIR);

    let mut files = Vec::new();
    if staging.is_dir() {
        for entry in std::fs::read_dir(&staging)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
    }

    if files.len() != 1 {
        return Err(AdminError::StagedBackupCount {
            dir: staging,
            count: files.len(),
        });
    }

    Ok(files.remove(0))
}

/// Replace the database with the staged backup.
///
/// Nothing is executed unless exactly one backup is staged. With
/// `backup_first` the current state is dumped before dropping.
pub async fn restore(
    tools: &PgTools,
    backup_dir: &Path,
    backup_first: bool,
) -> Result<PathBuf, AdminError> {
    let staged = staged_backup(backup_dir)?;

    if backup_first {
        backup(tools, backup_dir).await?;
    } else {
        warn!("Restoring without backing up the current database");
    }

    run_command(tools.drop_database()).await?;
    run_command(tools.create_database()).await?;
    run_command(tools.load(&staged)).await?;

    info!("Database restored from {}", staged.display());
    Ok(staged)
}

/// Write readings as CSV: the fixed header, then `id,timestamp,value` rows.
/// Fields are not quoted.
pub fn write_csv<W: Write>(mut writer: W, readings: &[Reading]) -> std::io::Result<()> {
    writeln!(writer, "{}", CSV_HEADER)?;
    for reading in readings {
        writeln!(
            writer,
            "{},{},{}",
            reading.id,
            format_export_timestamp(&reading.timestamp),
            reading.value
        )?;
    }
    writer.flush()
}

pub fn export_csv(path: &Path, readings: &[Reading]) -> Result<(), AdminError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    write_csv(std::io::BufWriter::new(file), readings)?;
    info!("Exported {} rows to {}", readings.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;
    use time::macros::datetime;

    fn tools() -> PgTools {
        PgTools {
            binaries: PathBuf::from("/usr/lib/postgresql/bin"),
            database: "telemetry".into(),
            role: "teleuser".into(),
            password: "secret".into(),
        }
    }

    fn args(command: &Command) -> Vec<String> {
        command
            .as_std()
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_backup_file_name() {
        let now = datetime!(2019-03-26 17:50:30 UTC);
        assert_eq!(backup_file_name(now), "1553622630.bak");
    }

    #[test]
    fn test_dump_command() {
        let command = tools().dump(Path::new("/backups/1.bak"));
        assert_eq!(
            command.as_std().get_program(),
            Path::new("/usr/lib/postgresql/bin/pg_dump").as_os_str()
        );
        assert_eq!(args(&command), vec!["-U", "teleuser", "-f", "/backups/1.bak", "telemetry"]);

        let password = command
            .as_std()
            .get_envs()
            .find(|(key, _)| *key == OsStr::new("PGPASSWORD"))
            .and_then(|(_, value)| value);
        assert_eq!(password, Some(OsStr::new("secret")));
    }

    #[test]
    fn test_restore_commands() {
        let tools = tools();
        assert_eq!(args(&tools.drop_database()), vec!["-U", "teleuser", "telemetry"]);
        assert_eq!(args(&tools.create_database()), vec!["-U", "teleuser", "telemetry"]);
        assert_eq!(
            args(&tools.load(Path::new("/b/backup_to_use/1.bak"))),
            vec!["-U", "teleuser", "-d", "telemetry", "-f", "/b/backup_to_use/1.bak"]
        );
    }

    #[test]
    fn test_pg_ctl_command() {
        let command = tools().pg_ctl(Path::new("/var/lib/pg/data"), "start");
        assert_eq!(args(&command), vec!["-D", "/var/lib/pg/data", "start"]);
        assert!(describe(&command).ends_with("pg_ctl -D /var/lib/pg/data start"));
    }

    #[test]
    fn test_staged_backup_requires_exactly_one_file() {
        let dir = tempfile::tempdir().unwrap();

        // Missing staging directory
        match staged_backup(dir.path()).unwrap_err() {
            AdminError::StagedBackupCount { count, .. } => assert_eq!(count, 0),
            other => panic!("Expected StagedBackupCount, got {:?}", other),
        }

        let staging = dir.path().join(STAGING_DIR);
        std::fs::create_dir(&staging).unwrap();
        std::fs::write(staging.join("1.bak"), "-- dump").unwrap();
        assert_eq!(staged_backup(dir.path()).unwrap(), staging.join("1.bak"));

        std::fs::write(staging.join("2.bak"), "-- dump").unwrap();
        match staged_backup(dir.path()).unwrap_err() {
            AdminError::StagedBackupCount { count, .. } => assert_eq!(count, 2),
            other => panic!("Expected StagedBackupCount, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_restore_aborts_without_staged_backup() {
        let dir = tempfile::tempdir().unwrap();
        // Binaries do not exist: any executed command would fail with Io,
        // so StagedBackupCount proves nothing ran
        let tools = PgTools {
            binaries: dir.path().join("no-such-bin"),
            ..tools()
        };
        let err = restore(&tools, dir.path(), true).await.unwrap_err();
        assert!(matches!(err, AdminError::StagedBackupCount { count: 0, .. }));
    }

    #[tokio::test]
    async fn test_run_command_reports_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let tools = PgTools {
            binaries: dir.path().to_path_buf(),
            ..tools()
        };
        assert!(matches!(
            run_command(tools.drop_database()).await,
            Err(AdminError::Io(_))
        ));
    }

    #[test]
    fn test_write_csv() {
        let readings = vec![
            Reading {
                id: 7,
                timestamp: datetime!(2019-03-26 17:50:30 UTC),
                value: 5.11,
            },
            Reading {
                id: 8,
                timestamp: datetime!(2019-03-26 17:50:31 UTC),
                value: 5.09,
            },
        ];

        let mut out = Vec::new();
        write_csv(&mut out, &readings).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "unique_key, timestamp, value\n\
             7,2019-03-26 17:50:30.000000+00:00,5.11\n\
             8,2019-03-26 17:50:31.000000+00:00,5.09\n"
        );
    }

    #[test]
    fn test_export_csv_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exports").join("out.csv");
        export_csv(&path, &[]).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "unique_key, timestamp, value\n");
    }
}
