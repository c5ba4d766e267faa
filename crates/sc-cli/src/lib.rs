//! Shell commands for the safety center
//!
//! A small command surface over a running [`SafetyCenterService`]:
//! enabled and supported checks, refresh triggering, data clearing, the
//! owning package name, and a JSON dump of the aggregated view.

use anyhow::Context;
use sc_core::SafetyCenterService;
use sc_model::{RefreshReason, UserId};

/// One shell command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    /// Print whether the safety center is enabled
    Enabled,
    /// Print whether the device supports the safety center
    Supported,
    /// Start a refresh for a user
    Refresh { reason: RefreshReason, user: UserId },
    /// Clear all data and dismissals
    ClearData,
    /// Print the package hosting the safety center
    PackageName,
    /// Print the aggregated view of a user's profile group as JSON
    Status { user: UserId },
}

/// Run `command` against `service` and return its output
pub fn handle_shell_command(
    service: &SafetyCenterService,
    command: ShellCommand,
) -> anyhow::Result<String> {
    tracing::debug!("Running shell command {:?}", command);
    match command {
        ShellCommand::Enabled => Ok(service.is_enabled().to_string()),
        ShellCommand::Supported => Ok(service.is_supported().to_string()),
        ShellCommand::Refresh { reason, user } => {
            let broadcast_id = service
                .refresh_safety_sources(reason, user)
                .with_context(|| format!("refresh for {reason} as user {user} failed"))?;
            Ok(format!("Started refresh {broadcast_id} ({reason}, user {user})"))
        }
        ShellCommand::ClearData => {
            service.clear_all_data();
            service.flush().context("writing cleared dismissal state")?;
            Ok("Cleared all safety center data".to_string())
        }
        ShellCommand::PackageName => Ok(service.owning_package_name()),
        ShellCommand::Status { user } => {
            let package = service.owning_package_name();
            let view = service
                .get_safety_center_data(&package, user)
                .with_context(|| format!("no view for user {user}"))?;
            serde_json::to_string_pretty(&view).context("serializing view")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_compare_by_value() {
        let refresh = ShellCommand::Refresh {
            reason: RefreshReason::RescanButtonClick,
            user: UserId::SYSTEM,
        };
        assert_eq!(refresh.clone(), refresh);
        assert_ne!(refresh, ShellCommand::Enabled);
    }
}
