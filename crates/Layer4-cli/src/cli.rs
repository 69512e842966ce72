//! Command handlers - 각 명령은 PluginService 메서드 하나에 대응한다

use crate::{Command, PluginCommand, RegistryCommand, TenantCommand};
use anyhow::Context;
use serde_json::Value;
use tally_core::PluginService;
use tally_foundation::{PluginRecord, RegistryRecord};

pub(crate) async fn run(service: &PluginService, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Registry { action } => registry(service, action).await,
        Command::Search { query } => search(service, &query).await,
        Command::Plugin { action } => plugin(service, action).await,
        Command::Tenant { action } => tenant(service, action).await,
    }
}

// ============================================================================
// registry
// ============================================================================

async fn registry(service: &PluginService, action: RegistryCommand) -> anyhow::Result<()> {
    match action {
        RegistryCommand::List => {
            let registries = service.list_registries().await?;
            println!(
                "{:<38} {:<16} {:<8} {:<8} {}",
                "ID", "Name", "Official", "Active", "Last synced"
            );
            println!("{}", "-".repeat(90));
            for r in registries {
                let synced = r
                    .last_synced_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{:<38} {:<16} {:<8} {:<8} {}",
                    r.id,
                    truncate(&r.name, 16),
                    yes_no(r.is_official),
                    yes_no(r.is_active),
                    synced
                );
            }
        }
        RegistryCommand::Add {
            name,
            url,
            description,
        } => {
            let record = service.add_registry(&name, &url, description).await?;
            println!("✓ Added registry {} ({})", record.name, record.id);
        }
        RegistryCommand::Remove { registry } => {
            let record = resolve_registry(service, &registry).await?;
            service.remove_registry(&record.id).await?;
            println!("✓ Removed registry {}", record.name);
        }
        RegistryCommand::Sync { registry } => {
            let record = resolve_registry(service, &registry).await?;
            let sync = service.sync_registry(&record.id).await?;
            println!(
                "✓ Synced {}: {} plugin(s) listed (index version {})",
                sync.registry.name,
                sync.index.plugins.len(),
                sync.index.version
            );
        }
    }
    Ok(())
}

async fn search(service: &PluginService, query: &str) -> anyhow::Result<()> {
    let results = service.search_plugins(query).await?;
    if results.is_empty() {
        println!("No plugins found.");
        return Ok(());
    }

    println!(
        "{:<14} {:<24} {:<12} {:<8} {}",
        "Registry", "Name", "Version", "Stars", "Source"
    );
    println!("{}", "-".repeat(90));
    for result in results {
        println!(
            "{:<14} {:<24} {:<12} {:<8} {}",
            truncate(&result.registry_name, 14),
            truncate(&result.plugin.name, 24),
            result.plugin.version,
            result.plugin.stars,
            result.plugin.source_url
        );
    }
    Ok(())
}

// ============================================================================
// plugin
// ============================================================================

async fn plugin(service: &PluginService, action: PluginCommand) -> anyhow::Result<()> {
    match action {
        PluginCommand::List => {
            let plugins = service.list_plugins().await?;
            if plugins.is_empty() {
                println!("No plugins installed.");
                return Ok(());
            }

            println!(
                "{:<38} {:<24} {:<12} {:<10} {}",
                "ID", "Name", "Version", "State", "Granted"
            );
            println!("{}", "-".repeat(100));
            for p in plugins {
                println!(
                    "{:<38} {:<24} {:<12} {:<10} {}",
                    p.id,
                    truncate(&p.name, 24),
                    p.version,
                    p.state.as_str(),
                    p.granted_permissions.join(",")
                );
            }
        }
        PluginCommand::Install { url } => {
            let record = service.install(&url).await?;
            println!(
                "✓ Installed {} v{} ({})",
                record.name, record.version, record.id
            );
            println!(
                "Review with 'tally plugin permissions {}' before enabling.",
                record.name
            );
        }
        PluginCommand::Uninstall { plugin } => {
            let record = resolve_plugin(service, &plugin).await?;
            service.uninstall(&record.id).await?;
            println!("✓ Uninstalled {}", record.name);
        }
        PluginCommand::Enable {
            plugin,
            permissions,
        } => {
            let record = resolve_plugin(service, &plugin).await?;
            let enabled = service.enable(&record.id, &permissions).await?;
            println!(
                "✓ Enabled {} with [{}]",
                enabled.name,
                enabled.granted_permissions.join(", ")
            );
        }
        PluginCommand::Disable { plugin } => {
            let record = resolve_plugin(service, &plugin).await?;
            service.disable(&record.id).await?;
            println!("✓ Disabled {} for the instance and all tenants", record.name);
        }
        PluginCommand::Permissions { plugin } => {
            let record = resolve_plugin(service, &plugin).await?;
            let report = service.permission_report(&record.id).await?;

            println!("\nPermissions for {}\n", report.plugin);
            println!("Requested: {}", list_or_none(&report.requested));
            println!("Required:  {}", list_or_none(&report.required));
            println!("Highest risk: {}", report.summary.highest_risk);
            for (risk, count) in &report.summary.by_risk {
                println!("  {:<10} {}", risk.to_string(), count);
            }
            if report.dangerous {
                println!("\n⚠ Requests dangerous permissions; review before enabling.");
            }
            println!();
        }
    }
    Ok(())
}

// ============================================================================
// tenant
// ============================================================================

async fn tenant(service: &PluginService, action: TenantCommand) -> anyhow::Result<()> {
    match action {
        TenantCommand::List { tenant } => {
            let rows = service.list_tenant_plugins(&tenant).await?;
            if rows.is_empty() {
                println!("No plugins for tenant {}.", tenant);
                return Ok(());
            }

            println!("{:<38} {:<8} {}", "Plugin ID", "Enabled", "Enabled at");
            println!("{}", "-".repeat(70));
            for row in rows {
                let enabled_at = row
                    .enabled_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!(
                    "{:<38} {:<8} {}",
                    row.plugin_id,
                    yes_no(row.is_enabled),
                    enabled_at
                );
            }
        }
        TenantCommand::Enable {
            tenant,
            plugin,
            settings,
        } => {
            let record = resolve_plugin(service, &plugin).await?;
            let settings = settings.as_deref().map(parse_settings).transpose()?;
            service
                .enable_for_tenant(&tenant, &record.id, settings)
                .await?;
            println!("✓ Enabled {} for tenant {}", record.name, tenant);
        }
        TenantCommand::Disable { tenant, plugin } => {
            let record = resolve_plugin(service, &plugin).await?;
            service.disable_for_tenant(&tenant, &record.id).await?;
            println!("✓ Disabled {} for tenant {}", record.name, tenant);
        }
        TenantCommand::Settings { tenant, plugin } => {
            let record = resolve_plugin(service, &plugin).await?;
            match service.get_tenant_settings(&tenant, &record.id).await? {
                Some(settings) => println!("{}", serde_json::to_string_pretty(&settings)?),
                None => println!("null"),
            }
        }
        TenantCommand::SetSettings {
            tenant,
            plugin,
            settings,
        } => {
            let record = resolve_plugin(service, &plugin).await?;
            service
                .update_tenant_settings(&tenant, &record.id, parse_settings(&settings)?)
                .await?;
            println!("✓ Updated settings of {} for tenant {}", record.name, tenant);
        }
    }
    Ok(())
}

// ============================================================================
// helpers
// ============================================================================

/// ID 또는 이름
async fn resolve_plugin(service: &PluginService, key: &str) -> anyhow::Result<PluginRecord> {
    match service.get_plugin(key).await {
        Ok(record) => Ok(record),
        Err(e) if e.is_not_found() => Ok(service.get_plugin_by_name(key).await?),
        Err(e) => Err(e.into()),
    }
}

async fn resolve_registry(service: &PluginService, key: &str) -> anyhow::Result<RegistryRecord> {
    service
        .list_registries()
        .await?
        .into_iter()
        .find(|r| r.id == key || r.name == key)
        .with_context(|| format!("registry '{}' not found", key))
}

fn parse_settings(raw: &str) -> anyhow::Result<Value> {
    serde_json::from_str(raw).context("settings must be a JSON document")
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}

/// Truncate a string for display
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("crm", 10), "crm");
        assert_eq!(truncate("payroll-export-pro", 10), "payroll...");
    }

    #[test]
    fn test_parse_settings() {
        assert_eq!(
            parse_settings(r#"{"days": 7}"#).unwrap(),
            serde_json::json!({"days": 7})
        );
        assert!(parse_settings("days=7").is_err());
    }
}
