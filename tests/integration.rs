use std::path::Path;
use std::process::{Command, Output};

fn mergewise(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_mergewise"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env("RUST_LOG", "warn")
        .env_remove("MERGEWISE_INDEX_DIR")
        .env_remove("MERGEWISE_INDEX_ENABLED")
        .env_remove("MERGEWISE_LLM_PROVIDER")
        .env_remove("MERGEWISE_RERANKER_STRATEGY")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn write_config(dir: &Path, extra: &str) -> std::path::PathBuf {
    let path = dir.join("mergewise.toml");
    let storage = dir.join("indexes");
    let body = format!(
        "[index]\nstorage_dir = {:?}\n\n[reranker]\nstrategy = \"lexical\"\n{extra}",
        storage.display().to_string()
    );
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn status_of_unknown_repository_is_uninitialized() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "");
    let output = mergewise(&config, &["status", "--repo", "acme/widgets"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), "uninitialized");
}

#[test]
fn drop_without_index_reports_nothing_to_remove() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "");
    let output = mergewise(&config, &["drop", "--repo", "acme/widgets"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("no index for acme/widgets"));
}

#[test]
fn malformed_repository_key_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "");
    let output = mergewise(&config, &["status", "--repo", "../escape"]);
    assert!(!output.status.success());
}

#[test]
fn malformed_config_fails_with_context() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("broken.toml");
    std::fs::write(&config, "[index\nenabled = ").unwrap();
    let output = mergewise(&config, &["status", "--repo", "acme/widgets"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to parse config file"));
}

#[test]
fn retrieve_requires_diff_or_lines() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "");
    let root = dir.path().to_str().unwrap();
    let output = mergewise(
        &config,
        &["retrieve", "--repo", "acme/widgets", "--root", root, "--file", "a.py"],
    );
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--diff or --lines"));
}

#[cfg(feature = "mock")]
mod with_mock_provider {
    use super::*;

    fn workspace() -> (tempfile::TempDir, std::path::PathBuf, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(dir.path(), "\n[llm]\nprovider = \"mock\"\n");
        let root = dir.path().join("repo");
        std::fs::create_dir_all(root.join("src")).unwrap();
        let mut handler = String::from("def handler(request):\n");
        for i in 0..20 {
            handler.push_str(&format!("    value_{i} = request.get({i})\n"));
        }
        std::fs::write(root.join("src/app.py"), handler).unwrap();
        std::fs::write(
            root.join("README.md"),
            "# Widgets\n\nHandles requests.\n\n## Usage\n\nRun the handler.\n",
        )
        .unwrap();
        (dir, config, root)
    }

    #[test]
    fn index_then_retrieve_then_drop() {
        let (_dir, config, root) = workspace();
        let root = root.to_str().unwrap();
        let repo = ["--repo", "acme/widgets"];

        let output = mergewise(&config, &["index", repo[0], repo[1], "--root", root]);
        assert!(output.status.success(), "{output:?}");
        assert!(stdout(&output).contains("files_indexed: 2"));

        let output = mergewise(&config, &["index", repo[0], repo[1], "--root", root]);
        assert!(stdout(&output).contains("files_indexed: 0"));
        assert!(stdout(&output).contains("embedding_calls: 0"));

        let output = mergewise(&config, &["status", repo[0], repo[1]]);
        assert_eq!(stdout(&output).trim(), "ready");

        let output = mergewise(
            &config,
            &[
                "retrieve", repo[0], repo[1], "--root", root, "--file", "src/app.py", "--lines",
                "5-8", "-k", "1",
            ],
        );
        assert!(output.status.success(), "{output:?}");
        assert!(stdout(&output).contains("[Source: src/app.py:1-21]"));

        let output = mergewise(&config, &["drop", repo[0], repo[1]]);
        assert!(stdout(&output).contains("dropped acme/widgets"));
        let output = mergewise(&config, &["status", repo[0], repo[1]]);
        assert_eq!(stdout(&output).trim(), "uninitialized");
    }

    #[test]
    fn edits_on_disk_trigger_a_rebuild() {
        let (_dir, config, root) = workspace();
        let root_str = root.to_str().unwrap();
        let args = ["index", "--repo", "acme/widgets", "--root", root_str];

        mergewise(&config, &args);
        std::fs::write(root.join("README.md"), "# Widgets\n\nNow with more words.\n").unwrap();
        let output = mergewise(&config, &args);
        assert!(stdout(&output).contains("files_indexed: 1"));
        assert!(stdout(&output).contains("files_unchanged: 1"));
    }

    #[test]
    fn retrieve_reads_a_unified_diff() {
        let (dir, config, root) = workspace();
        let patch = dir.path().join("change.diff");
        std::fs::write(
            &patch,
            "--- a/src/app.py\n+++ b/src/app.py\n@@ -3,2 +3,3 @@\n     value_1 = request.get(1)\n+    value_extra = request.get(99)\n     value_2 = request.get(2)\n",
        )
        .unwrap();
        let output = mergewise(
            &config,
            &[
                "retrieve",
                "--repo",
                "acme/widgets",
                "--root",
                root.to_str().unwrap(),
                "--file",
                "src/app.py",
                "--diff",
                patch.to_str().unwrap(),
                "--title",
                "Add extra value",
            ],
        );
        assert!(output.status.success(), "{output:?}");
        assert!(stdout(&output).contains("```python"));
    }
}
