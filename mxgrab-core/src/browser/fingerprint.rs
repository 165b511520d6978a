use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::page::Page;

use crate::config::FingerprintSection;

use super::error::{BrowserError, BrowserResult};

/// Injects init scripts hiding the usual automation tells before any page
/// script runs.
#[derive(Debug, Clone)]
pub struct AutomationMask {
    config: FingerprintSection,
}

impl AutomationMask {
    pub fn new(config: FingerprintSection) -> Self {
        Self { config }
    }

    pub fn scripts(&self) -> Vec<String> {
        let mut scripts = Vec::new();
        if self.config.hide_webdriver {
            scripts.push(HIDE_WEBDRIVER.to_string());
        }
        if self.config.spoof_plugins {
            scripts.push(SPOOF_PLUGINS.to_string());
        }
        if self.config.spoof_chrome_runtime {
            scripts.push(SPOOF_CHROME_RUNTIME.to_string());
        }
        if !self.config.languages.is_empty() {
            let languages = serde_json::to_string(&self.config.languages)
                .unwrap_or_else(|_| "[\"en-US\"]".to_string());
            scripts.push(format!(
                "Object.defineProperty(navigator, 'languages', {{ get: () => {languages} }});"
            ));
        }
        scripts
    }

    pub async fn apply(&self, page: &Page) -> BrowserResult<()> {
        for script in self.scripts() {
            page.evaluate_on_new_document(
                AddScriptToEvaluateOnNewDocumentParams::builder()
                    .source(script)
                    .build()
                    .map_err(BrowserError::Configuration)?,
            )
            .await?;
        }
        Ok(())
    }
}

const HIDE_WEBDRIVER: &str = r#"
(() => {
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
    try {
        delete Object.getPrototypeOf(navigator).webdriver;
    } catch (_) {}
})();
"#;

const SPOOF_PLUGINS: &str = r#"
(() => {
    const fakePlugins = [
        { name: 'Chrome PDF Plugin', filename: 'internal-pdf-viewer' },
        { name: 'Chrome PDF Viewer', filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai' },
        { name: 'Native Client', filename: 'internal-nacl-plugin' },
    ];
    Object.defineProperty(navigator, 'plugins', { get: () => fakePlugins });
})();
"#;

const SPOOF_CHROME_RUNTIME: &str = r#"
(() => {
    if (!window.chrome) {
        window.chrome = {};
    }
    if (!window.chrome.runtime) {
        window.chrome.runtime = {};
    }
    const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
    if (originalQuery) {
        window.navigator.permissions.query = (parameters) =>
            parameters && parameters.name === 'notifications'
                ? Promise.resolve({ state: Notification.permission })
                : originalQuery(parameters);
    }
})();
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_sections_emit_no_scripts() {
        let mask = AutomationMask::new(FingerprintSection {
            hide_webdriver: false,
            spoof_plugins: false,
            spoof_chrome_runtime: false,
            languages: vec![],
        });
        assert!(mask.scripts().is_empty());
    }

    #[test]
    fn languages_are_serialized_as_js_array() {
        let mask = AutomationMask::new(FingerprintSection {
            hide_webdriver: true,
            spoof_plugins: false,
            spoof_chrome_runtime: false,
            languages: vec!["hi-IN".into(), "en".into()],
        });
        let scripts = mask.scripts();
        assert_eq!(scripts.len(), 2);
        assert!(scripts[0].contains("webdriver"));
        assert!(scripts[1].contains(r#"["hi-IN","en"]"#));
    }
}
