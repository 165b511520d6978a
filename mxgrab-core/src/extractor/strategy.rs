use std::fmt;

use serde::Serialize;

/// Manifest discovery strategies, tried in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    NetworkBodies,
    PageMarkup,
    MediaElements,
    PlayerRuntime,
    ResourceTiming,
    ExternalHelper,
}

impl Strategy {
    pub const ORDER: [Strategy; 6] = [
        Strategy::NetworkBodies,
        Strategy::PageMarkup,
        Strategy::MediaElements,
        Strategy::PlayerRuntime,
        Strategy::ResourceTiming,
        Strategy::ExternalHelper,
    ];
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Strategy::NetworkBodies => "network-bodies",
            Strategy::PageMarkup => "page-markup",
            Strategy::MediaElements => "media-elements",
            Strategy::PlayerRuntime => "player-runtime",
            Strategy::ResourceTiming => "resource-timing",
            Strategy::ExternalHelper => "external-helper",
        };
        f.write_str(label)
    }
}

pub(crate) const MEDIA_ELEMENT_SOURCES: &str = r#"
(() => {
    const found = [];
    const push = (value) => {
        if (typeof value === 'string' && value.length > 0) {
            found.push(value);
        }
    };
    document.querySelectorAll('video, audio').forEach((el) => {
        push(el.currentSrc);
        push(el.src);
        push(el.getAttribute('src'));
        push(el.getAttribute('data-src'));
        el.querySelectorAll('source').forEach((source) => {
            push(source.src);
            push(source.getAttribute('src'));
            push(source.getAttribute('data-src'));
        });
    });
    return found;
})()
"#;

pub(crate) const PLAYER_RUNTIME_SOURCES: &str = r#"
(() => {
    const found = [];
    const push = (value) => {
        if (typeof value === 'string' && value.length > 0) {
            found.push(value);
        }
    };
    try {
        if (window.videojs && typeof window.videojs.getPlayers === 'function') {
            Object.values(window.videojs.getPlayers()).forEach((player) => {
                if (player && typeof player.currentSrc === 'function') {
                    push(player.currentSrc());
                }
            });
        }
    } catch (_) {}
    try {
        if (typeof window.jwplayer === 'function') {
            const jw = window.jwplayer();
            if (jw && typeof jw.getPlaylistItem === 'function') {
                const item = jw.getPlaylistItem();
                if (item) {
                    push(item.file);
                    (item.sources || []).forEach((source) => push(source.file));
                }
            }
        }
    } catch (_) {}
    document.querySelectorAll('video').forEach((video) => {
        try {
            const shaka = video.ui && video.ui.getControls && video.ui.getControls().getPlayer();
            if (shaka && typeof shaka.getAssetUri === 'function') {
                push(shaka.getAssetUri());
            }
        } catch (_) {}
    });
    try {
        if (window.shakaPlayer && typeof window.shakaPlayer.getAssetUri === 'function') {
            push(window.shakaPlayer.getAssetUri());
        }
    } catch (_) {}
    try {
        if (window.dashjs && window.player && typeof window.player.getSource === 'function') {
            const source = window.player.getSource();
            push(typeof source === 'string' ? source : source && source.url);
        }
    } catch (_) {}
    try {
        if (window.hls && typeof window.hls.url === 'string') {
            push(window.hls.url);
        }
        if (window.Hls && window.hlsInstance) {
            push(window.hlsInstance.url);
        }
    } catch (_) {}
    return found;
})()
"#;

/// Builds the resource-timing query for the given name markers.
pub(crate) fn resource_timing_script(markers: &[String]) -> String {
    let markers = serde_json::to_string(markers).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"
(() => {{
    const markers = {markers};
    return performance.getEntriesByType('resource')
        .map((entry) => entry.name)
        .filter((name) => markers.some((marker) => name.includes(marker)));
}})()
"#
    )
}

pub(crate) fn scroll_script(pixels: u32) -> String {
    format!("window.scrollBy(0, {pixels});")
}

/// Clicks the first visible element matching any selector, then nudges every
/// media element to play.
pub(crate) fn play_activation_script(selectors: &[String]) -> String {
    let selectors = serde_json::to_string(selectors).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"
(() => {{
    const selectors = {selectors};
    for (const selector of selectors) {{
        let el = null;
        try {{ el = document.querySelector(selector); }} catch (_) {{ continue; }}
        if (el && el.offsetParent !== null) {{
            el.click();
            break;
        }}
    }}
    document.querySelectorAll('video').forEach((video) => {{
        try {{
            video.muted = true;
            const attempt = video.play();
            if (attempt && attempt.catch) {{ attempt.catch(() => {{}}); }}
        }} catch (_) {{}}
    }});
    return true;
}})()
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_starts_with_network_and_ends_with_helper() {
        assert_eq!(Strategy::ORDER[0], Strategy::NetworkBodies);
        assert_eq!(Strategy::ORDER[5], Strategy::ExternalHelper);
    }

    #[test]
    fn resource_timing_script_embeds_markers() {
        let script = resource_timing_script(&["master".into(), ".m3u8".into()]);
        assert!(script.contains(r#"["master",".m3u8"]"#));
    }
}
