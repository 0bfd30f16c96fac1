#![cfg(unix)]

use std::path::Path;
use std::sync::Arc;
use tempfile::{TempDir, tempdir};
use topbackup_core::config::{AppConfig, ConfigStore};
use topbackup_core::file_ops::verify_archive;
use topbackup_core::local_source::FileLocalSource;
use topbackup_core::models::RunStatus;
use topbackup_core::orchestrator::{AppState, Collaborators, Observers, Orchestrator};
use topbackup_core::pipeline::BackupOutcome;
use topbackup_core::process_dump::ProcessDumpTool;
use topbackup_core::store::HistoryStore;

const LOCAL_SOURCE: &str = r#"
system_version = "3.4.1"

[company]
local_id = 12
display_name = "Mercado Central"
legal_name = "Mercado Central LTDA"
tax_id = "98.765.432/0001-10"

[[schedules]]
time_of_day = "22:00"
monday = true
tuesday = true
wednesday = true
thursday = true
friday = true
saturday = true
sunday = true
destination1 = "{destination}"
naming_mode = "versioned"
"#;

struct Workspace {
    root: TempDir,
    config_path: std::path::PathBuf,
}

impl Workspace {
    fn new(dump_tool: &str) -> Self {
        let root = tempdir().unwrap();
        let destination = root.path().join("backups");

        let source = LOCAL_SOURCE.replace("{destination}", &destination.to_string_lossy());
        std::fs::write(root.path().join("local_source.toml"), source).unwrap();
        std::fs::write(root.path().join("ERP.FDB"), b"database").unwrap();

        let mut config = AppConfig::default();
        config.local_db.database_path = root.path().join("ERP.FDB").to_string_lossy().to_string();
        config.local_db.dump_tool_path = dump_tool.to_string();
        // 以 sh 代替原生导出工具：向 {output} 写入 5 MB
        config.local_db.dump_arguments = vec![
            "-c".to_string(),
            "head -c 5242880 /dev/zero > \"$0\"".to_string(),
            "{output}".to_string(),
        ];
        config.remote_db.store_path = root
            .path()
            .join("history.duckdb")
            .to_string_lossy()
            .to_string();
        config.backup.temp_dir = root.path().join("temp").to_string_lossy().to_string();
        config.app.auto_update = false;

        let config_path = root.path().join("config.toml");
        config.save_to_file(&config_path).unwrap();

        Self { root, config_path }
    }

    fn destination(&self) -> std::path::PathBuf {
        self.root.path().join("backups")
    }

    async fn orchestrator(&self) -> (Orchestrator, HistoryStore) {
        let config = ConfigStore::open(&self.config_path).unwrap();
        let store = HistoryStore::open(&config.snapshot().remote_db.store_path)
            .await
            .unwrap();

        let app = Orchestrator::new(
            config,
            Collaborators {
                local: Arc::new(FileLocalSource::new(self.root.path().join("local_source.toml"))),
                remote: Arc::new(store.clone()),
                dump_tool: Arc::new(ProcessDumpTool::new()),
                uploader_factory: None,
            },
            Observers::default(),
        );
        (app, store)
    }
}

fn files_in(dir: &Path) -> Vec<String> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[tokio::test]
async fn manual_backup_produces_archive_and_history() {
    let workspace = Workspace::new("/bin/sh");
    let (app, _store) = workspace.orchestrator().await;

    app.initialize().await.unwrap();
    app.start().await.unwrap();
    assert_eq!(app.state(), AppState::Running);

    let result = app.execute_backup_manual().await;
    assert_eq!(result.outcome, BackupOutcome::Success, "{}", result.message);

    let files = files_in(&workspace.destination());
    assert_eq!(files.len(), 1);
    let name = &files[0];
    assert!(name.starts_with("98765432000110_"));
    assert!(name.ends_with(".zip"));
    verify_archive(&workspace.destination().join(name)).await.unwrap();

    let history = app.backup_history(Some(5)).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, RunStatus::Success);
    assert_eq!(history[0].file_name.as_deref(), Some(name.as_str()));

    // 同步结果持久化到配置文件
    let saved = AppConfig::load_from_file(&workspace.config_path).unwrap();
    assert!(saved.app.company_id.is_some());
    assert_eq!(saved.app.company_tax_id, "98765432000110");
    assert_eq!(
        saved.backup.destination1,
        workspace.destination().to_string_lossy()
    );

    // 临时目录中不留下本次运行的文件
    assert!(files_in(&workspace.root.path().join("temp")).is_empty());
    app.shutdown().await;
}

#[tokio::test]
async fn missing_dump_tool_records_failure() {
    let workspace = Workspace::new("/nonexistent/gbak");
    let (app, store) = workspace.orchestrator().await;
    app.initialize().await.unwrap();

    let result = app.execute_backup_manual().await;
    assert_eq!(result.outcome, BackupOutcome::Failed);
    assert!(result.message.contains("未找到"), "{}", result.message);
    assert!(files_in(&workspace.destination()).is_empty());

    let company_id = app.config().snapshot().app.company_id.unwrap();
    let runs = topbackup_core::collaborators::RemoteStore::runs_by_company(&store, company_id, 5)
        .await
        .unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failure);
    assert!(runs[0].error_message.as_deref().unwrap_or_default().contains("未找到"));

    // 失败后仍可继续使用
    assert_eq!(app.state(), AppState::Running);
    app.shutdown().await;
}
