//! Integration tests for Strata

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn strata(state: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("strata");
        cmd.env("STRATA_HOME", state.path());
        cmd
    }

    /// A context directory with one file and a matching Kubefile
    fn copy_only_project(root: &TempDir) -> (std::path::PathBuf, std::path::PathBuf) {
        let context = root.path().join("ctx");
        std::fs::create_dir_all(&context).unwrap();
        std::fs::write(context.join("app"), "binary").unwrap();

        let kubefile = root.path().join("Kubefile");
        std::fs::write(&kubefile, "FROM scratch\nCOPY app /app\n").unwrap();
        (kubefile, context)
    }

    #[test]
    fn help_displays() {
        let state = TempDir::new().unwrap();
        strata(&state)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Layered cluster image builder"));
    }

    #[test]
    fn version_displays() {
        let state = TempDir::new().unwrap();
        strata(&state)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("strata"));
    }

    #[test]
    fn build_help() {
        let state = TempDir::new().unwrap();
        strata(&state)
            .args(["build", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Build a cluster image"));
    }

    #[test]
    fn images_empty() {
        let state = TempDir::new().unwrap();
        strata(&state)
            .arg("images")
            .assert()
            .success()
            .stdout(predicate::str::contains("No images found"));
    }

    #[test]
    fn copy_only_build_end_to_end() {
        let state = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let (kubefile, context) = copy_only_project(&project);

        strata(&state)
            .args(["build", "-f"])
            .arg(&kubefile)
            .args(["-t", "cli:v1"])
            .arg(&context)
            .assert()
            .success()
            .stdout(predicate::str::contains("cli:v1"));

        strata(&state)
            .arg("images")
            .assert()
            .success()
            .stdout(predicate::str::contains("cli:v1"));

        strata(&state)
            .args(["inspect", "cli:v1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("COPY").and(predicate::str::contains("app /app")));
    }

    #[test]
    fn rebuild_reuses_the_layer() {
        let state = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let (kubefile, context) = copy_only_project(&project);

        for tag in ["cli:v1", "cli:v2"] {
            strata(&state)
                .args(["build", "-f"])
                .arg(&kubefile)
                .args(["-t", tag])
                .arg(&context)
                .assert()
                .success();
        }

        // Both tags point at the same content-addressed layer
        let layers: Vec<_> = std::fs::read_dir(state.path().join("layers"))
            .unwrap()
            .collect();
        assert_eq!(layers.len(), 1);
    }

    #[test]
    fn build_missing_kubefile_fails() {
        let state = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        strata(&state)
            .args(["build", "-f", "/nonexistent/Kubefile", "-t", "x:v1"])
            .arg(project.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("Kubefile not found"));
    }

    #[test]
    fn build_rejects_non_from_first() {
        let state = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let kubefile = project.path().join("Kubefile");
        std::fs::write(&kubefile, "COPY app /app\n").unwrap();

        strata(&state)
            .args(["build", "-f"])
            .arg(&kubefile)
            .args(["-t", "x:v1"])
            .arg(project.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("First instruction must be FROM"));
    }

    #[test]
    fn inspect_unknown_image_fails() {
        let state = TempDir::new().unwrap();
        strata(&state)
            .args(["inspect", "ghost:v1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Image not found"));
    }

    #[test]
    fn completions_generate() {
        let state = TempDir::new().unwrap();
        strata(&state)
            .args(["completions", "bash"])
            .assert()
            .success()
            .stdout(predicate::str::contains("strata"));
    }
}
