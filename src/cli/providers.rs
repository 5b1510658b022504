//! Providers listing command handler.

use std::path::PathBuf;

use anyhow::Result;

use clawcore::providers::{profile_for, ProviderRole};

/// Print configured provider profiles and the failover settings.
pub(crate) fn cmd_providers(config_path: Option<&PathBuf>) -> Result<()> {
    let config = super::load_config(config_path)?;
    let providers = &config.providers;

    if providers.entries.is_empty() {
        println!("No providers configured.");
        return Ok(());
    }

    println!("Providers:");
    for entry in &providers.entries {
        let profile = profile_for(entry);
        let roles: Vec<String> = profile.roles.iter().map(|r| r.to_string()).collect();
        println!(
            "  {:<16} {:<8} model={} tier={:?} roles=[{}] tools={}{}",
            profile.id,
            entry.kind,
            if profile.model.is_empty() { "-" } else { &profile.model },
            profile.tier,
            roles.join(","),
            if profile.supports_tools { "yes" } else { "no" },
            if entry.enabled { "" } else { " (disabled)" },
        );
    }

    println!("\nRole defaults:");
    for role in [ProviderRole::Chat, ProviderRole::Tools, ProviderRole::CliParent] {
        println!(
            "  {:<10} {}",
            role.to_string(),
            providers.defaults.for_role(role).unwrap_or("-")
        );
    }

    if !providers.fallback_chain.is_empty() {
        println!("\nFallback chain: {}", providers.fallback_chain.join(" -> "));
    }
    println!(
        "Retry: {} primary / {} fallback attempts, call timeout {}s",
        providers.retry.primary_attempts,
        providers.retry.fallback_attempts,
        providers.call_timeout_secs
    );
    Ok(())
}
