use super::*;
use cdm_config::{DebuggerSettings, QueueSettings};

#[tokio::test]
async fn test_open_dump_requires_existing_file() {
    let server = DebugServer::new(ServerConfig::default());
    let err = server
        .open_dump("/nonexistent/crash.dmp", None)
        .await
        .unwrap_err();
    assert!(matches!(err, DebugError::InvalidInput(_)));
}

#[tokio::test]
async fn test_open_dump_rejects_non_dump_files() {
    let dir = tempfile::tempdir().unwrap();
    let bogus = dir.path().join("notes.dmp");
    std::fs::write(&bogus, b"just some text").unwrap();

    let server = DebugServer::new(ServerConfig::default());
    let err = server
        .open_dump(bogus.to_str().unwrap(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, DebugError::InvalidInput(_)));
}

#[tokio::test]
async fn test_open_dump_rejects_empty_path() {
    let server = DebugServer::new(ServerConfig::default());
    let err = server.open_dump("  ", None).await.unwrap_err();
    assert!(matches!(err, DebugError::InvalidInput(_)));
}

#[tokio::test]
async fn test_open_remote_rejects_empty_connection() {
    let server = DebugServer::new(ServerConfig::default());
    let err = server.open_remote("", None).await.unwrap_err();
    assert!(matches!(err, DebugError::InvalidInput(_)));
}

#[tokio::test]
async fn test_close_without_session_is_harmless() {
    let server = DebugServer::new(ServerConfig::default());
    let message = server.close_session().await.unwrap();
    assert!(message.contains("0 outstanding"));
}

#[cfg(unix)]
mod stub {
    use super::*;
    use serde_json::Value;
    use std::path::{Path, PathBuf};

    const STUB_SCRIPT: &str = r#"#!/bin/sh
printf 'Microsoft (R) Windows Debugger Version 10.0.99999.0 (fake)\n'
printf '0:000> '
while IFS= read -r line; do
  case "$line" in
    q) exit 0 ;;
    version) printf 'Microsoft (R) Windows Debugger Version 10.0.99999.0 (fake)\n' ;;
    ".echo "*) printf '%s\n' "${line#.echo }" ;;
    *) printf 'fake output for %s\n' "$line" ;;
  esac
  printf '0:000> '
done
"#;

    fn write_stub(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-cdb.sh");
        std::fs::write(&path, STUB_SCRIPT).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn stub_config(dir: &Path) -> ServerConfig {
        let stub = write_stub(dir);
        ServerConfig {
            debugger: DebuggerSettings {
                executable_override: Some(stub.display().to_string()),
                startup_delay_ms: 300,
                read_timeout_secs: 10,
                stop_grace_ms: 300,
                ..Default::default()
            },
            queue: QueueSettings {
                retention_secs: 0,
                cleanup_interval_secs: 3_600,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn write_dump(dir: &Path) -> PathBuf {
        let dump = dir.join("crash.dmp");
        std::fs::write(&dump, b"MDMP fake").unwrap();
        dump
    }

    async fn wait_settled(server: &DebugServer, id: &str) -> Value {
        for _ in 0..100 {
            let status = server.command_status(id);
            if status["isCompleted"].as_bool() == Some(true) {
                return status;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        panic!("command {id} never settled");
    }

    #[tokio::test]
    async fn test_open_dump_run_command_poll_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let server = DebugServer::new(stub_config(dir.path()));
        let dump = write_dump(dir.path());

        let message = server
            .open_dump(dump.to_str().unwrap(), None)
            .await
            .unwrap();
        assert!(message.contains("Opened crash dump"));
        assert!(server.is_session_active());

        let submission = server.run_command_async("version").unwrap();
        assert_eq!(submission["status"], "queued");
        let id = submission["commandId"].as_str().unwrap().to_string();

        let status = wait_settled(&server, &id).await;
        assert_eq!(status["status"], "completed");
        assert!(
            status["result"].as_str().unwrap().contains("Microsoft"),
            "status: {status}"
        );

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_status_served_from_cache_after_retention() {
        let dir = tempfile::tempdir().unwrap();
        let server = DebugServer::new(stub_config(dir.path()));
        let dump = write_dump(dir.path());
        server
            .open_dump(dump.to_str().unwrap(), None)
            .await
            .unwrap();

        let submission = server.run_command_async("version").unwrap();
        let id = submission["commandId"].as_str().unwrap().to_string();
        wait_settled(&server, &id).await;

        // Retention window is zero: the live entry disappears on sweep, but
        // the completed result survives in the cache.
        server.queue.sweep_retention();
        let status = server.command_status(&id);
        assert_eq!(status["status"], "completed");
        assert_eq!(status["note"], "served from result cache");
        assert!(status["result"].as_str().unwrap().contains("Microsoft"));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_open_dump_replaces_live_session() {
        let dir = tempfile::tempdir().unwrap();
        let server = DebugServer::new(stub_config(dir.path()));
        let dump = write_dump(dir.path());

        server
            .open_dump(dump.to_str().unwrap(), None)
            .await
            .unwrap();
        // Opening again closes the previous session instead of failing with
        // an already-active error.
        let message = server
            .open_dump(dump.to_str().unwrap(), None)
            .await
            .unwrap();
        assert!(message.contains("Opened crash dump"));
        assert!(server.is_session_active());

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_close_session_cancels_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let server = DebugServer::new(stub_config(dir.path()));
        let dump = write_dump(dir.path());
        server
            .open_dump(dump.to_str().unwrap(), None)
            .await
            .unwrap();

        let message = server.close_session().await.unwrap();
        assert!(message.contains("Session closed"));
        assert!(!server.is_session_active());
    }

    #[tokio::test]
    async fn test_list_commands_reflects_submissions() {
        let dir = tempfile::tempdir().unwrap();
        let server = DebugServer::new(stub_config(dir.path()));
        let dump = write_dump(dir.path());
        server
            .open_dump(dump.to_str().unwrap(), None)
            .await
            .unwrap();

        let listing = server.list_commands();
        assert_eq!(listing["sessionActive"], true);

        let submission = server.run_command_async("version").unwrap();
        let id = submission["commandId"].as_str().unwrap().to_string();
        wait_settled(&server, &id).await;

        server.shutdown().await;
    }
}
