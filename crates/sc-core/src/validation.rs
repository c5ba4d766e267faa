//! Protocol checks on source reports
//!
//! A report is rejected as a whole; nothing is stored for a rejected call.

use crate::error::SafetyCenterError;
use crate::users::UserTopology;
use sc_config::{SafetyCenterConfig, SafetyCenterFlags, SafetySource};
use sc_model::{SafetySourceData, UserId};
use std::collections::HashSet;

/// Check that `package_name` may report for `source_id` as `user_id`
pub(crate) fn validate_caller<'c>(
    config: &'c SafetyCenterConfig,
    users: &dyn UserTopology,
    source_id: &str,
    user_id: UserId,
    package_name: &str,
) -> Result<&'c SafetySource, SafetyCenterError> {
    let source = config
        .source(source_id)
        .ok_or_else(|| SafetyCenterError::UnknownSource(source_id.to_string()))?;
    if !source.is_external() {
        return Err(SafetyCenterError::StaticSource(source_id.to_string()));
    }
    let expected = source.package_name.as_deref().unwrap_or_default();
    if expected != package_name {
        return Err(SafetyCenterError::PackageMismatch {
            source_id: source_id.to_string(),
            expected: expected.to_string(),
            actual: package_name.to_string(),
        });
    }

    let user = users
        .users()
        .into_iter()
        .find(|u| u.id == user_id)
        .ok_or(SafetyCenterError::UnknownUser(user_id))?;
    if user.is_managed_profile() && !source.applies_to_managed_profiles() {
        return Err(SafetyCenterError::NotApplicableToUser {
            source_id: source_id.to_string(),
            user_id,
        });
    }
    Ok(source)
}

/// Check the contents of a report against the source's configuration
pub(crate) fn validate_data(
    source: &SafetySource,
    flags: &SafetyCenterFlags,
    data: &SafetySourceData,
) -> Result<(), SafetyCenterError> {
    let max = source.max_severity_level;

    if let Some(status) = &data.status {
        if source.is_issue_only() {
            return Err(SafetyCenterError::StatusNotAllowed(source.id.clone()));
        }
        if status.severity_level > max {
            return Err(SafetyCenterError::SeverityTooHigh {
                source_id: source.id.clone(),
                level: status.severity_level,
                max,
            });
        }
    }

    let mut seen = HashSet::new();
    for issue in &data.issues {
        if issue.id.is_empty() {
            return Err(SafetyCenterError::invalid_data(&source.id, "empty issue id"));
        }
        if !seen.insert(issue.id.as_str()) {
            return Err(SafetyCenterError::invalid_data(
                &source.id,
                format!("duplicate issue id {}", issue.id),
            ));
        }
        if issue.severity_level > max {
            return Err(SafetyCenterError::SeverityTooHigh {
                source_id: source.id.clone(),
                level: issue.severity_level,
                max,
            });
        }
        if !flags.is_category_allowed(issue.category, &source.id) {
            return Err(SafetyCenterError::DisallowedCategory {
                source_id: source.id.clone(),
                category: issue.category,
            });
        }
        let mut action_ids = HashSet::new();
        for action in &issue.actions {
            if action.id.is_empty() || !action_ids.insert(action.id.as_str()) {
                return Err(SafetyCenterError::invalid_data(
                    &source.id,
                    format!("bad action id {:?} on issue {}", action.id, issue.id),
                ));
            }
        }
    }
    Ok(())
}
