//! Fingerprint hardening applied to every session tab.
//!
//! The script is registered with `Page.addScriptToEvaluateOnNewDocument`, so
//! it runs before any page script on each product page.

use std::sync::Arc;

use anyhow::Result;
use headless_chrome::protocol::cdp::Emulation::{SetLocaleOverride, SetTimezoneOverride};
use headless_chrome::protocol::cdp::Page::AddScriptToEvaluateOnNewDocument;
use headless_chrome::Tab;
use rand::Rng;

/// Builds the injection script. Hardware values are randomized per session.
pub fn stealth_script(rng: &mut impl Rng, languages: &[&str]) -> String {
    let cores = [4, 8, 12, 16][rng.gen_range(0..4)];
    let memory = [4, 8, 16][rng.gen_range(0..3)];
    let languages =
        serde_json::to_string(languages).unwrap_or_else(|_| r#"["en-US","en"]"#.to_string());

    format!(
        r#"
        Object.defineProperty(navigator, 'webdriver', {{ get: () => undefined }});
        Object.defineProperty(navigator, 'hardwareConcurrency', {{ get: () => {cores} }});
        Object.defineProperty(navigator, 'deviceMemory', {{ get: () => {memory} }});
        Object.defineProperty(navigator, 'languages', {{ get: () => {languages} }});

        if (!window.chrome) {{
            window.chrome = {{ runtime: {{}}, app: {{ isInstalled: false }}, csi: function() {{}}, loadTimes: function() {{ return {{}}; }} }};
        }}

        Object.defineProperty(navigator, 'plugins', {{
            get: () => {{
                const pdf = {{ name: 'Chrome PDF Plugin', filename: 'internal-pdf-viewer', description: 'Portable Document Format', length: 1 }};
                const list = [pdf, pdf, pdf];
                Object.setPrototypeOf(list, PluginArray.prototype);
                return list;
            }}
        }});

        const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
        if (originalQuery) {{
            window.navigator.permissions.query = (parameters) => (
                parameters.name === 'notifications'
                    ? Promise.resolve({{ state: Notification.permission }})
                    : originalQuery(parameters)
            );
        }}
    "#
    )
}

/// Registers the stealth script and overrides timezone and locale on `tab`.
pub fn harden_tab(tab: &Arc<Tab>, script: String, timezone_id: &str, locale: &str) -> Result<()> {
    tab.call_method(AddScriptToEvaluateOnNewDocument {
        source: script,
        world_name: None,
        include_command_line_api: None,
        run_immediately: None,
    })?;

    tab.call_method(SetTimezoneOverride {
        timezone_id: timezone_id.to_string(),
    })?;

    tab.call_method(SetLocaleOverride {
        locale: Some(locale.to_string()),
    })?;

    Ok(())
}
