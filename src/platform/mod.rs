// Platform module
// Builders for job-control CLI invocations plus output helpers shared by the
// deploy and runner components.

use crate::errors::DeployError;
use crate::models::DeployConfig;
use crate::process::{CommandOutput, CommandRunner, CommandSpec};

/// Lines the platform CLI prints that carry no diagnostic value.
const NOISE_MARKERS: &[&str] = &[
    "Updates are available for some Google Cloud CLI components",
    "Updates are available for some Cloud SDK components",
    "please run:",
    "$ gcloud components update",
    "To take a quick anonymous survey",
    "$ gcloud survey",
];

/// Candidate list delimiters for the `^DELIM^KEY=VALUE` assignment syntax.
/// None of them are JSON punctuation.
const ENV_DELIMITERS: &[&str] = &["@@", "##", "~~", "%%", "||"];

/// Handle for issuing platform CLI commands scoped to one project and region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gcloud {
    pub bin: String,
    pub project: String,
    pub region: String,
}

impl Gcloud {
    pub fn new(config: &DeployConfig, project: &str) -> Self {
        Self {
            bin: config.gcloud_bin.clone(),
            project: project.to_string(),
            region: config.region.clone(),
        }
    }

    /// Bare command with no scoping flags.
    pub fn command<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new(self.bin.clone()).args(args)
    }

    /// Command scoped to the project only.
    pub fn project_command<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command(args)
            .arg(format!("--project={}", self.project))
    }

    /// Command scoped to the project and region.
    pub fn regional_command<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.project_command(args)
            .arg(format!("--region={}", self.region))
    }

    /// Console page for one execution, used when the platform reports no log URI.
    pub fn console_url(&self, execution_short_name: &str) -> String {
        format!(
            "https://console.cloud.google.com/run/jobs/executions/details/{}/{}/tasks?project={}",
            self.region, execution_short_name, self.project
        )
    }
}

/// Determine the project to operate in: configured value first, then the
/// platform CLI's active configuration.
pub async fn resolve_project(
    runner: &dyn CommandRunner,
    config: &DeployConfig,
) -> Result<String, DeployError> {
    if let Some(ref project) = config.project_id {
        return Ok(project.clone());
    }

    let cmd = CommandSpec::new(config.gcloud_bin.clone()).args(["config", "get-value", "project"]);
    let output = runner
        .run(&cmd)
        .await
        .map_err(|e| DeployError::Setup(format!("Failed to run {}: {}", config.gcloud_bin, e)))?;

    let project = output.stdout.trim();
    if !output.is_success() || project.is_empty() || project == "(unset)" {
        return Err(DeployError::Config(
            "No project configured. Set project_id in the config file, pass --project, \
             or run `gcloud config set project <id>`."
                .to_string(),
        ));
    }
    Ok(project.to_string())
}

/// Strip platform hint banners from captured output before showing it.
pub fn filter_platform_noise(output: &str) -> String {
    output
        .lines()
        .filter(|line| !NOISE_MARKERS.iter().any(|m| line.contains(m)))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Whether a failed describe-style call failed because the resource is absent.
pub fn is_not_found(output: &CommandOutput) -> bool {
    let text = output.combined().to_lowercase();
    ["not_found", "not found", "cannot find", "could not be found"]
        .iter()
        .any(|marker| text.contains(marker))
}

/// Render `KEY=VALUE` pairs as one flag value using the alternate-delimiter
/// syntax, picking a delimiter that does not occur in any pair.
///
/// `[("JOB_ARGS", "[\"a\",\"b\"]")]` renders as `^@@^JOB_ARGS=["a","b"]`.
pub fn env_assignment<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let rendered: Vec<String> = pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    let delimiter = pick_delimiter(&rendered);
    format!("^{}^{}", delimiter, rendered.join(&delimiter))
}

/// First candidate absent from every pair; numbered `@N@` delimiters once the
/// fixed candidates are exhausted.
fn pick_delimiter(rendered: &[String]) -> String {
    let free = |d: &str| !rendered.iter().any(|pair| pair.contains(d));
    if let Some(d) = ENV_DELIMITERS.iter().find(|d| free(**d)) {
        return d.to_string();
    }
    let mut n = 0usize;
    loop {
        let candidate = format!("@{}@", n);
        if free(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::MockCommandRunner;

    fn gcloud() -> Gcloud {
        Gcloud {
            bin: "gcloud".to_string(),
            project: "acme".to_string(),
            region: "us-central1".to_string(),
        }
    }

    #[test]
    fn test_regional_command_appends_scope() {
        let cmd = gcloud().regional_command(["run", "jobs", "describe", "export-users"]);
        assert_eq!(
            cmd.argv(),
            vec![
                "gcloud",
                "run",
                "jobs",
                "describe",
                "export-users",
                "--project=acme",
                "--region=us-central1"
            ]
        );
    }

    #[test]
    fn test_filter_platform_noise() {
        let raw = "ERROR: (gcloud.run.jobs.update) PERMISSION_DENIED\n\n\
                   Updates are available for some Google Cloud CLI components.  To install them,\n\
                   please run:\n  $ gcloud components update\n";
        assert_eq!(
            filter_platform_noise(raw),
            "ERROR: (gcloud.run.jobs.update) PERMISSION_DENIED"
        );
    }

    #[test]
    fn test_is_not_found() {
        assert!(is_not_found(&CommandOutput::failure(
            1,
            "ERROR: (gcloud.run.jobs.describe) Cannot find job [x]. NOT_FOUND"
        )));
        assert!(!is_not_found(&CommandOutput::failure(
            1,
            "ERROR: PERMISSION_DENIED"
        )));
    }

    #[test]
    fn test_env_assignment_uses_non_json_delimiter() {
        let value = r#"["export-users","--format","csv"]"#;
        assert_eq!(
            env_assignment([("JOB_ARGS", value)]),
            r#"^@@^JOB_ARGS=["export-users","--format","csv"]"#
        );
    }

    #[test]
    fn test_env_assignment_avoids_colliding_delimiter() {
        let value = r#"["user@@example.com"]"#;
        let rendered = env_assignment([("JOB_ARGS", value)]);
        assert!(rendered.starts_with("^##^"), "Got: {}", rendered);
    }

    #[test]
    fn test_env_assignment_all_candidates_taken() {
        let value = r###"["@@","##","~~","%%","||","@0@"]"###;
        let rendered = env_assignment([("JOB_ARGS", value)]);
        assert_eq!(rendered, format!("^@1@^JOB_ARGS={}", value));
    }

    #[test]
    fn test_env_assignment_joins_multiple_pairs() {
        let rendered = env_assignment([("A", "1,2"), ("B", "x")]);
        assert_eq!(rendered, "^@@^A=1,2@@B=x");
    }

    #[tokio::test]
    async fn test_resolve_project_prefers_config() {
        let runner = MockCommandRunner::new();
        let config = DeployConfig {
            project_id: Some("from-config".to_string()),
            ..Default::default()
        };
        let project = resolve_project(&runner, &config).await.expect("resolve");
        assert_eq!(project, "from-config");
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_project_from_cli_config() {
        let runner = MockCommandRunner::new().ok(&["gcloud", "config", "get-value"], "acme\n");
        let project = resolve_project(&runner, &DeployConfig::default())
            .await
            .expect("resolve");
        assert_eq!(project, "acme");
    }

    #[tokio::test]
    async fn test_resolve_project_unset() {
        let runner = MockCommandRunner::new().ok(&["gcloud", "config", "get-value"], "(unset)");
        let err = resolve_project(&runner, &DeployConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Config(_)));
    }
}
