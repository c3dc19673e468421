// tests/config_loading.rs

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use fsmirror::cli::{CliArgs, Command, LogLevel};
use fsmirror::config::{load_and_validate, load_or_default, parse_str, ConfigFile};
use fsmirror::copy::{CopyOptions, LinkStrategy};
use fsmirror::errors::FsMirrorError;
use fsmirror::logging::resolve_level;
use fsmirror::merge_copy_options;

type TestResult = Result<(), Box<dyn std::error::Error>>;

const FULL: &str = r#"
[copy]
stable_time = true
stable_sort = true
overwrite = false

[index]
path = ".fsmirror/index"
auto_repair = true
read_only = false

[watch]
interval_ms = 250
persistent = false
"#;

#[test]
fn full_config_maps_to_engine_options() -> TestResult {
    let cfg = ConfigFile::try_from(parse_str(FULL)?)?;

    assert_eq!(
        cfg.copy_options(),
        CopyOptions {
            link_strategy: Some(LinkStrategy::HardlinkFromIndex {
                index_path: PathBuf::from(".fsmirror/index"),
                auto_repair: true,
                read_only: false,
            }),
            stable_time: true,
            stable_sort: true,
            overwrite: false,
        }
    );

    let watch = cfg.watch_options();
    assert_eq!(watch.interval, Duration::from_millis(250));
    assert!(!watch.persistent);
    assert!(!watch.bigint);
    Ok(())
}

#[test]
fn empty_config_uses_defaults() -> TestResult {
    let cfg = ConfigFile::try_from(parse_str("")?)?;

    assert_eq!(cfg.copy_options(), CopyOptions::default());
    assert_eq!(cfg.watch.interval_ms, 5007);
    assert!(cfg.watch.persistent);
    Ok(())
}

#[test]
fn zero_interval_is_rejected() -> TestResult {
    let raw = parse_str("[watch]\ninterval_ms = 0\n")?;
    let err = ConfigFile::try_from(raw).expect_err("interval 0 must be rejected");
    assert!(matches!(err, FsMirrorError::ConfigError(_)), "got {err:?}");
    Ok(())
}

#[test]
fn empty_index_path_is_rejected() -> TestResult {
    let raw = parse_str("[index]\npath = \"\"\n")?;
    assert!(matches!(
        ConfigFile::try_from(raw),
        Err(FsMirrorError::ConfigError(_))
    ));
    Ok(())
}

#[test]
fn unknown_keys_are_a_parse_error() {
    let err = parse_str("[copy]\nstable_tme = true\n").expect_err("typo must be rejected");
    assert!(matches!(err, FsMirrorError::TomlError(_)), "got {err:?}");
}

#[test]
fn loads_from_a_file() -> TestResult {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(FULL.as_bytes())?;

    let cfg = load_and_validate(file.path())?;
    assert!(cfg.copy.stable_time);
    assert_eq!(load_or_default(Some(file.path()))?, cfg);
    Ok(())
}

#[test]
fn explicit_missing_file_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("Fsmirror.toml");

    let err = load_or_default(Some(missing.as_path())).expect_err("missing file");
    assert!(err.is_not_found(), "got {err:?}");
}

#[test]
fn cli_flags_extend_the_config() -> TestResult {
    let cfg = ConfigFile::try_from(parse_str(FULL)?)?;
    let args = CliArgs::try_parse_from([
        "fsmirror",
        "copy",
        "src",
        "dst",
        "--overwrite",
        "--read-only",
        "--index",
        "/tmp/other-index",
    ])?;

    let Command::Copy(copy_args) = args.command else {
        panic!("expected the copy subcommand");
    };
    let options = merge_copy_options(&cfg, &copy_args);

    assert!(options.overwrite);
    assert!(options.stable_time);
    assert_eq!(
        options.link_strategy,
        Some(LinkStrategy::HardlinkFromIndex {
            index_path: PathBuf::from("/tmp/other-index"),
            auto_repair: true,
            read_only: true,
        })
    );
    Ok(())
}

#[test]
fn cli_index_flag_enables_dedup_without_config() -> TestResult {
    let args = CliArgs::try_parse_from(["fsmirror", "copy", "a", "b", "--index", "idx"])?;
    let Command::Copy(copy_args) = args.command else {
        panic!("expected the copy subcommand");
    };

    let options = merge_copy_options(&ConfigFile::default(), &copy_args);
    assert_eq!(
        options.link_strategy,
        Some(LinkStrategy::HardlinkFromIndex {
            index_path: PathBuf::from("idx"),
            auto_repair: false,
            read_only: false,
        })
    );
    assert!(!options.stable_sort);
    Ok(())
}

#[test]
fn global_flags_parse_after_the_subcommand() -> TestResult {
    let args = CliArgs::try_parse_from([
        "fsmirror",
        "watch",
        "a",
        "b",
        "--interval-ms",
        "100",
        "--log-level",
        "debug",
        "--config",
        "custom.toml",
    ])?;

    assert!(matches!(args.log_level, Some(LogLevel::Debug)));
    assert_eq!(args.config, Some(PathBuf::from("custom.toml")));
    match args.command {
        Command::Watch(watch) => {
            assert_eq!(watch.paths.len(), 2);
            assert_eq!(watch.interval_ms, Some(100));
        }
        other => panic!("unexpected command {other:?}"),
    }
    Ok(())
}

#[test]
fn watch_requires_a_path() {
    assert!(CliArgs::try_parse_from(["fsmirror", "watch"]).is_err());
}

#[test]
fn log_level_priority() {
    assert_eq!(
        resolve_level(Some(LogLevel::Warn), Some("trace")),
        tracing::Level::WARN
    );
    assert_eq!(resolve_level(None, Some(" Debug ")), tracing::Level::DEBUG);
    assert_eq!(resolve_level(None, Some("nonsense")), tracing::Level::INFO);
    assert_eq!(resolve_level(None, None), tracing::Level::INFO);
}
