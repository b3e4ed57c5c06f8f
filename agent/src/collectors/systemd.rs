use std::str::FromStr;

use fleetwatch_shared::{ActiveState, ServiceInfo};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// Queries `ActiveState`/`SubState` for each allowlisted unit concurrently.
/// A unit whose query fails reports `unknown`/`unknown`, it is never dropped.
pub async fn collect(units: &[String]) -> Vec<ServiceInfo> {
    if units.is_empty() {
        return Vec::new();
    }
    join_all(units.iter().map(|unit| query_one(unit))).await
}

async fn query_one(unit: &str) -> ServiceInfo {
    let output = Command::new("systemctl")
        .arg("show")
        .arg(unit)
        .arg("--property=ActiveState,SubState")
        .output()
        .await;

    let Ok(output) = output else {
        return unknown(unit);
    };
    if !output.status.success() {
        return unknown(unit);
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut active_state = ActiveState::Unknown;
    let mut sub_state = "unknown".to_string();

    for line in stdout.lines() {
        if let Some((key, value)) = line.split_once('=') {
            match key {
                "ActiveState" => active_state = ActiveState::from_str(value).unwrap(),
                "SubState" => sub_state = value.to_string(),
                _ => {}
            }
        }
    }

    ServiceInfo {
        name: unit.to_string(),
        active_state,
        sub_state,
    }
}

fn unknown(unit: &str) -> ServiceInfo {
    ServiceInfo {
        name: unit.to_string(),
        active_state: ActiveState::Unknown,
        sub_state: "unknown".to_string(),
    }
}

/// A single entry in the agent's service catalog, populated via
/// `systemctl list-units` + `systemctl is-enabled`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCatalogItem {
    pub name: String,
    pub active_state: String,
    pub enabled: bool,
    pub description: String,
}

pub async fn discover_services() -> Vec<ServiceCatalogItem> {
    let output = Command::new("systemctl")
        .args([
            "list-units",
            "--type=service",
            "--all",
            "--no-pager",
            "--no-legend",
        ])
        .output()
        .await;

    let Ok(output) = output else {
        return Vec::new();
    };
    if !output.status.success() {
        return Vec::new();
    }

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let lines: Vec<String> = stdout.lines().map(str::to_string).collect();

    let parsed: Vec<(String, String, String)> = lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| parse_list_units_line(line))
        .collect();

    join_all(parsed.into_iter().map(|(name, active_state, description)| async move {
        let enabled = is_service_enabled(&name).await;
        ServiceCatalogItem {
            name,
            active_state,
            enabled,
            description,
        }
    }))
    .await
}

/// `UNIT LOAD ACTIVE SUB DESCRIPTION`, description may contain spaces and
/// columns are separated by variable runs of whitespace.
fn parse_list_units_line(line: &str) -> Option<(String, String, String)> {
    let mut rest = line;
    let name = take_token(&mut rest)?.to_string();
    let _load = take_token(&mut rest)?;
    let active_state = take_token(&mut rest)?.to_string();
    let _sub = take_token(&mut rest)?;
    let description = rest.trim().to_string();
    Some((name, active_state, description))
}

fn take_token<'a>(s: &mut &'a str) -> Option<&'a str> {
    *s = s.trim_start();
    let end = s.find(char::is_whitespace).unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    let token = &s[..end];
    *s = &s[end..];
    Some(token)
}

async fn is_service_enabled(unit: &str) -> bool {
    let Ok(output) = Command::new("systemctl")
        .arg("is-enabled")
        .arg(unit)
        .output()
        .await
    else {
        return false;
    };
    String::from_utf8_lossy(&output.stdout).trim() == "enabled"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_list_units_line_with_description() {
        let line = "nginx.service            loaded active running The nginx HTTP server";
        let (name, active_state, description) = parse_list_units_line(line).unwrap();
        assert_eq!(name, "nginx.service");
        assert_eq!(active_state, "active");
        assert_eq!(description, "The nginx HTTP server");
    }

    #[test]
    fn rejects_short_line() {
        assert!(parse_list_units_line("only two fields").is_none());
    }
}
