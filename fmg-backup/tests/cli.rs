use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::write;
use std::sync::{Arc, Mutex};
use tempfile::{tempdir, NamedTempFile};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{layer::Context, Layer, Registry};

fn create_minimal_config(output_dir: &std::path::Path) -> NamedTempFile {
    let config = NamedTempFile::new().expect("Creating temp config file failed");
    write(
        config.path(),
        format!(
            "controller:\n  address: 127.0.0.1:9\n  retry:\n    max_attempts: 1\n    backoff_ms: 1\nfilter:\n  since: \"2025-03-03\"\noutput_dir: {}\n",
            output_dir.display()
        ),
    )
    .expect("Writing temp config failed");
    config
}

#[test]
fn validate_succeeds_and_redacts_api_key() {
    let out = tempdir().unwrap();
    let config = create_minimal_config(out.path());
    let mut cmd = Command::cargo_bin("fmg-backup").expect("Binary exists");

    cmd.current_dir(out.path())
        .arg("validate")
        .arg("--config")
        .arg(config.path())
        .env("FMG_API_KEY", "super-secret-key");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Configuration OK"))
        .stdout(predicate::str::contains("<redacted>"))
        .stdout(predicate::str::contains("super-secret-key").not());
}

#[test]
fn validate_fails_without_api_key() {
    let out = tempdir().unwrap();
    let config = create_minimal_config(out.path());
    let mut cmd = Command::cargo_bin("fmg-backup").expect("Binary exists");

    cmd.current_dir(out.path())
        .arg("validate")
        .arg("--config")
        .arg(config.path())
        .env_remove("FMG_API_KEY");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("FMG_API_KEY"));
}

#[test]
fn sync_fails_for_missing_config_file() {
    let mut cmd = Command::cargo_bin("fmg-backup").expect("Binary exists");
    cmd.arg("sync")
        .arg("--config")
        .arg("/definitely/not/here.yaml")
        .env("FMG_API_KEY", "k");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}

/// An unreachable controller is a per-node failure, not a fatal one: the run completes.
#[test]
fn sync_against_unreachable_controller_completes_with_failures() {
    let out = tempdir().unwrap();
    let config = create_minimal_config(out.path());
    let mut cmd = Command::cargo_bin("fmg-backup").expect("Binary exists");

    cmd.current_dir(out.path())
        .arg("sync")
        .arg("--config")
        .arg(config.path())
        .env("FMG_API_KEY", "k");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("<controller>"))
        .stdout(predicate::str::contains("transient"));
}

/// Custom Layer to collect emitted event messages.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.events.lock().unwrap().push(format!("{:?}", event));
    }
}

#[tokio::test]
async fn emits_trace_initialised_event() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use fmg_backup::cli::{run, Cli, Commands};

    let cli = Cli {
        command: Commands::Validate {
            config: std::path::PathBuf::from("dummy.yaml"),
            env_file: None,
        },
    };

    let _ = run(cli).await;

    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("trace_initialised")),
        "Expected a 'trace_initialised' trace event, got: {:?}",
        event_msgs
    );
}
