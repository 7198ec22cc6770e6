//! CLI tests

use clap::Parser;

use crate::cli::{BackupAction, Cli, Commands};

#[test]
fn test_parse_serve_defaults() {
    let cli = Cli::parse_from(["till", "serve"]);
    match cli.command {
        Commands::Serve { port, host, token } => {
            assert_eq!(port, 4736);
            assert_eq!(host, "127.0.0.1");
            assert!(token.is_none());
        }
        _ => panic!("expected serve"),
    }
}

#[test]
fn test_parse_pair_arguments() {
    let cli = Cli::parse_from([
        "till", "pair", "--terminal", "t-1", "--tenant", "acme", "--location", "loc-1",
        "--secret", "s", "--api-key", "k",
    ]);
    match cli.command {
        Commands::Pair {
            terminal,
            tenant,
            location,
            secret,
            api_key,
        } => {
            assert_eq!(terminal, "t-1");
            assert_eq!(tenant, "acme");
            assert_eq!(location, "loc-1");
            assert_eq!(secret, "s");
            assert_eq!(api_key.as_deref(), Some("k"));
        }
        _ => panic!("expected pair"),
    }
}

#[test]
fn test_parse_backup_prune_keep() {
    let cli = Cli::parse_from(["till", "backup", "prune", "--keep", "3"]);
    match cli.command {
        Commands::Backup {
            action: BackupAction::Prune { keep },
        } => assert_eq!(keep, Some(3)),
        _ => panic!("expected backup prune"),
    }
}

#[test]
fn test_data_dir_override_wins() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = crate::commands::load_config(Some(dir.path().to_path_buf()));
    assert_eq!(config.db_path(), dir.path().join("offline-pos.db"));
    assert_eq!(config.backups_dir(), dir.path().join("backups"));
}

#[test]
fn test_status_command_runs_against_fresh_db() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = crate::commands::load_config(Some(dir.path().to_path_buf()));
    crate::commands::cmd_init(&config).unwrap();
    crate::commands::cmd_status(&config, true).unwrap();
}
