//! Slurm batch script rendering.
//!
//! A [`ScriptGenerator`] is bound to one remote worker program (the embedding
//! worker or the generation worker) and renders a self-contained `sbatch`
//! script for a given job name, resource profile and remote input path.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use hpcrag_core::defaults;
use hpcrag_core::{Error, Result};

use crate::shell::quote;

/// Value of a free-form `#SBATCH` directive taken from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DirectiveValue {
    /// `true` renders a bare `--flag`; `false` suppresses the directive.
    Flag(bool),
    Number(i64),
    Text(String),
}

/// Scheduler resources requested for one kind of job.
///
/// Keys in configuration that do not name a field land in `extra` and are
/// rendered as additional `#SBATCH --<key>=<value>` lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceProfile {
    #[serde(default = "default_time_limit")]
    pub time_limit: String,
    #[serde(default = "default_memory")]
    pub memory: String,
    #[serde(default = "default_gpu_count")]
    pub gpu_count: u32,
    #[serde(default = "default_gpu_type")]
    pub gpu_type: String,
    #[serde(default = "default_partition")]
    pub partition: String,
    #[serde(default = "default_cpu_count")]
    pub cpu_count: u32,
    #[serde(default = "default_ntasks")]
    pub ntasks: u32,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, DirectiveValue>,
}

fn default_time_limit() -> String {
    defaults::SLURM_TIME_LIMIT.to_string()
}

fn default_memory() -> String {
    defaults::SLURM_MEMORY.to_string()
}

fn default_gpu_count() -> u32 {
    defaults::SLURM_GPU_COUNT
}

fn default_gpu_type() -> String {
    defaults::SLURM_GPU_TYPE.to_string()
}

fn default_partition() -> String {
    defaults::SLURM_PARTITION.to_string()
}

fn default_cpu_count() -> u32 {
    defaults::SLURM_CPU_COUNT
}

fn default_ntasks() -> u32 {
    defaults::SLURM_NTASKS
}

impl Default for ResourceProfile {
    fn default() -> Self {
        Self {
            time_limit: default_time_limit(),
            memory: default_memory(),
            gpu_count: default_gpu_count(),
            gpu_type: default_gpu_type(),
            partition: default_partition(),
            cpu_count: default_cpu_count(),
            ntasks: default_ntasks(),
            account: None,
            extra: BTreeMap::new(),
        }
    }
}

impl ResourceProfile {
    pub fn with_time_limit(mut self, time_limit: impl Into<String>) -> Self {
        self.time_limit = time_limit.into();
        self
    }

    pub fn with_memory(mut self, memory: impl Into<String>) -> Self {
        self.memory = memory.into();
        self
    }

    pub fn with_gpus(mut self, count: u32, gpu_type: impl Into<String>) -> Self {
        self.gpu_count = count;
        self.gpu_type = gpu_type.into();
        self
    }

    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = partition.into();
        self
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: DirectiveValue) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Reject values that would break out of their `#SBATCH` line.
    pub fn validate(&self) -> Result<()> {
        let mut fields: Vec<(&str, &str)> = vec![
            ("time_limit", self.time_limit.as_str()),
            ("memory", self.memory.as_str()),
            ("gpu_type", self.gpu_type.as_str()),
            ("partition", self.partition.as_str()),
        ];
        if let Some(account) = &self.account {
            fields.push(("account", account.as_str()));
        }
        for (key, value) in &self.extra {
            fields.push(("extra key", key.as_str()));
            if let DirectiveValue::Text(text) = value {
                fields.push((key.as_str(), text.as_str()));
            }
        }

        for (name, value) in fields {
            if value.contains(['\n', '\r']) {
                return Err(Error::Config(format!(
                    "resource profile {} must be a single line",
                    name
                )));
            }
        }
        if self.time_limit.trim().is_empty() || self.partition.trim().is_empty() {
            return Err(Error::Config(
                "resource profile needs a time_limit and a partition".to_string(),
            ));
        }
        Ok(())
    }
}

/// Remote software environment the worker runs in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerEnvironment {
    /// Directory prepended to `PATH` (the remote virtualenv's `bin`).
    #[serde(default)]
    pub env_bin: Option<String>,
    /// HuggingFace cache root; exported as `HF_HOME` and `TRANSFORMERS_CACHE`.
    #[serde(default)]
    pub hf_home: Option<String>,
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
}

fn default_interpreter() -> String {
    defaults::WORKER_INTERPRETER.to_string()
}

impl Default for WorkerEnvironment {
    fn default() -> Self {
        Self {
            env_bin: None,
            hf_home: None,
            interpreter: default_interpreter(),
        }
    }
}

/// Renders batch scripts for one worker program.
#[derive(Debug, Clone)]
pub struct ScriptGenerator {
    environment: WorkerEnvironment,
    worker_program: String,
}

impl ScriptGenerator {
    pub fn new(environment: WorkerEnvironment, worker_program: impl Into<String>) -> Self {
        Self {
            environment,
            worker_program: worker_program.into(),
        }
    }

    pub fn worker_program(&self) -> &str {
        &self.worker_program
    }

    /// Render the submission script. Pure; never touches the network.
    pub fn render(
        &self,
        job_name: &str,
        profile: &ResourceProfile,
        remote_input_path: &str,
    ) -> String {
        let mut script = String::from("#!/bin/bash\n");

        let _ = writeln!(script, "#SBATCH --job-name={}", job_name);
        if let Some(account) = &profile.account {
            let _ = writeln!(script, "#SBATCH --account={}", account);
        }
        let _ = writeln!(script, "#SBATCH --partition={}", profile.partition);
        let _ = writeln!(script, "#SBATCH --time={}", profile.time_limit);
        let _ = writeln!(script, "#SBATCH --ntasks={}", profile.ntasks);
        let _ = writeln!(script, "#SBATCH --cpus-per-task={}", profile.cpu_count);
        let _ = writeln!(script, "#SBATCH --mem={}", profile.memory);
        if profile.gpu_count > 0 {
            if profile.gpu_type.is_empty() {
                let _ = writeln!(script, "#SBATCH --gres=gpu:{}", profile.gpu_count);
            } else {
                let _ = writeln!(
                    script,
                    "#SBATCH --gres=gpu:{}:{}",
                    profile.gpu_type, profile.gpu_count
                );
            }
        }
        for (key, value) in &profile.extra {
            let key = key.replace('_', "-");
            match value {
                DirectiveValue::Flag(true) => {
                    let _ = writeln!(script, "#SBATCH --{}", key);
                }
                DirectiveValue::Flag(false) => {}
                DirectiveValue::Number(n) => {
                    let _ = writeln!(script, "#SBATCH --{}={}", key, n);
                }
                DirectiveValue::Text(text) => {
                    let _ = writeln!(script, "#SBATCH --{}={}", key, text);
                }
            }
        }

        script.push('\n');
        if let Some(bin) = &self.environment.env_bin {
            let _ = writeln!(script, "export PATH={}:\"$PATH\"", quote(bin));
        }
        if let Some(hf_home) = &self.environment.hf_home {
            let _ = writeln!(script, "export HF_HOME={}", quote(hf_home));
            let _ = writeln!(script, "export TRANSFORMERS_CACHE={}", quote(hf_home));
        }

        script.push('\n');
        let _ = writeln!(
            script,
            "{} {} --input {}",
            quote(&self.environment.interpreter),
            quote(&self.worker_program),
            quote(remote_input_path)
        );
        script
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> ScriptGenerator {
        ScriptGenerator::new(
            WorkerEnvironment {
                env_bin: Some("/scratch/proj/ml_env/bin".into()),
                hf_home: Some("/scratch/proj/hf_cache".into()),
                interpreter: "python".into(),
            },
            "/scratch/proj/embedding_script.py",
        )
    }

    #[test]
    fn test_render_default_profile() {
        let script = generator().render(
            "embed_1",
            &ResourceProfile::default(),
            "/scratch/work/K1-1_Aino 60v K1-1.docx",
        );

        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("#SBATCH --job-name=embed_1\n"));
        assert!(script.contains("#SBATCH --partition=gputest\n"));
        assert!(script.contains("#SBATCH --time=00:15:00\n"));
        assert!(script.contains("#SBATCH --ntasks=1\n"));
        assert!(script.contains("#SBATCH --cpus-per-task=1\n"));
        assert!(script.contains("#SBATCH --mem=4G\n"));
        assert!(script.contains("#SBATCH --gres=gpu:v100:1\n"));
        assert!(!script.contains("--account"));
        assert!(script.contains("export PATH='/scratch/proj/ml_env/bin':\"$PATH\"\n"));
        assert!(script.contains("export HF_HOME='/scratch/proj/hf_cache'\n"));
        assert!(script.contains("export TRANSFORMERS_CACHE='/scratch/proj/hf_cache'\n"));
        assert!(script.ends_with(
            "'python' '/scratch/proj/embedding_script.py' \
             --input '/scratch/work/K1-1_Aino 60v K1-1.docx'\n"
        ));
    }

    #[test]
    fn test_render_without_gpu_omits_gres() {
        let profile = ResourceProfile::default().with_gpus(0, "v100");
        let script = generator().render("llm_2", &profile, "/w/in.json");
        assert!(!script.contains("--gres"));
    }

    #[test]
    fn test_render_account_and_extra_directives() {
        let profile = ResourceProfile::default()
            .with_account("project_2011638")
            .with_extra("mail_type", DirectiveValue::Text("END".into()))
            .with_extra("nodes", DirectiveValue::Number(1))
            .with_extra("exclusive", DirectiveValue::Flag(true))
            .with_extra("requeue", DirectiveValue::Flag(false));
        let script = generator().render("embed_3", &profile, "/w/in.docx");

        assert!(script.contains("#SBATCH --account=project_2011638\n"));
        assert!(script.contains("#SBATCH --mail-type=END\n"));
        assert!(script.contains("#SBATCH --nodes=1\n"));
        assert!(script.contains("#SBATCH --exclusive\n"));
        assert!(!script.contains("requeue"));
    }

    #[test]
    fn test_render_minimal_environment() {
        let gen = ScriptGenerator::new(WorkerEnvironment::default(), "llm_script.py");
        let script = gen.render("llm_4", &ResourceProfile::default(), "/w/llm_input_4.json");
        assert!(!script.contains("export"));
        assert!(script.contains("'python' 'llm_script.py' --input '/w/llm_input_4.json'"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let gen = generator();
        let profile = ResourceProfile::default().with_memory("8G");
        assert_eq!(
            gen.render("a", &profile, "/w/x"),
            gen.render("a", &profile, "/w/x")
        );
    }

    #[test]
    fn test_profile_from_toml_keeps_unknown_keys() {
        let profile: ResourceProfile = toml::from_str(
            r#"
            memory = "16G"
            gpu_count = 2
            qos = "high"
            nodes = 1
            "#,
        )
        .unwrap();

        assert_eq!(profile.memory, "16G");
        assert_eq!(profile.gpu_count, 2);
        assert_eq!(profile.time_limit, "00:15:00");
        assert_eq!(profile.partition, "gputest");
        assert_eq!(profile.extra.get("qos"), Some(&DirectiveValue::Text("high".into())));
        assert_eq!(profile.extra.get("nodes"), Some(&DirectiveValue::Number(1)));
    }

    #[test]
    fn test_profile_validate_rejects_multiline() {
        let profile = ResourceProfile::default().with_partition("gpu\n#SBATCH --mem=1T");
        assert!(matches!(profile.validate(), Err(Error::Config(_))));
        assert!(ResourceProfile::default().validate().is_ok());
    }
}
