//! voxdash probe: checks that test-call registration works end to end.
//!
//! Usage: `voxdash-probe <agent-id> [config-path]`
//!
//! Loads the same `[call]` settings the dashboard uses, registers one test
//! call for the agent and reports the issued session id. The credential
//! itself is never printed.

mod config;

use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use voxdash_call::{CallRegistrar, HttpCallRegistrar, RegistrationError};

const USAGE: &str = "usage: voxdash-probe <agent-id> [config-path]";

fn resolve_config_path(args: &[String]) -> (Option<String>, &'static str) {
    if let Some(path) = args.get(1).filter(|value| !value.trim().is_empty()) {
        return (Some(path.clone()), "cli-arg");
    }

    if let Ok(path) = std::env::var("VOXDASH_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

fn init_tracing(logging: &config::LoggingConfig) {
    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(agent_id) = args.first().filter(|id| !id.trim().is_empty()).cloned() else {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    };

    let (resolved_config_path, config_source) = resolve_config_path(&args);
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = match config::load_config(selected_config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("voxdash-probe: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&config.logging);

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    if !config.call.is_enabled() {
        tracing::error!("call.endpoint is not configured; set it in the config file or VOXDASH_ENDPOINT");
        return ExitCode::FAILURE;
    }

    let registrar = match HttpCallRegistrar::new(&config.call) {
        Ok(registrar) => registrar,
        Err(e) => {
            tracing::error!(error = %e, "failed to build registration client");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(agent_id = %agent_id, endpoint = registrar.endpoint(), "probing call registration");

    match registrar.register(&agent_id).await {
        Ok(registration) => {
            tracing::info!(
                agent_id = %agent_id,
                session_id = %registration.session_id,
                token_len = registration.credential.len(),
                "registration succeeded"
            );
            println!("{}", registration.session_id);
            ExitCode::SUCCESS
        }
        Err(e) => {
            let reason = voxdash_types::FailureReason::RegistrationFailed;
            match &e {
                RegistrationError::Status { status, .. } => {
                    tracing::warn!(%reason, status, error = %e, "registration rejected");
                }
                _ => tracing::warn!(%reason, error = %e, "registration failed"),
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn cli_config_path_wins() {
        let (path, source) = resolve_config_path(&args(&["agent_1", "probe.toml"]));
        assert_eq!(path.as_deref(), Some("probe.toml"));
        assert_eq!(source, "cli-arg");
    }

    #[test]
    fn blank_cli_path_is_ignored() {
        let (path, source) = resolve_config_path(&args(&["agent_1", "  "]));
        assert_ne!(source, "cli-arg");
        assert_ne!(path.as_deref(), Some("  "));
    }
}
