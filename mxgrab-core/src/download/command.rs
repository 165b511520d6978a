use std::path::Path;

use crate::config::DownloadSection;

/// Argument vector for fetching `manifest_url` into `output`.
pub fn build_helper_args(
    section: &DownloadSection,
    remux_tool: &Path,
    manifest_url: &str,
    output: &Path,
) -> Vec<String> {
    let mut args = vec![
        "--ffmpeg-location".to_string(),
        remux_tool.display().to_string(),
        "--newline".to_string(),
        "--no-warnings".to_string(),
        "--no-part".to_string(),
        "--force-generic-extractor".to_string(),
        "--no-check-certificate".to_string(),
        "--retries".to_string(),
        section.retries.to_string(),
    ];
    if let Some(rate) = section.limit_rate.as_deref().filter(|v| !v.is_empty()) {
        args.push("--limit-rate".to_string());
        args.push(rate.to_string());
    }
    if let Some(size) = section.buffer_size.as_deref().filter(|v| !v.is_empty()) {
        args.push("--buffer-size".to_string());
        args.push(size.to_string());
    }
    args.extend(section.extra_args.iter().cloned());
    args.push("-o".to_string());
    args.push(output.display().to_string());
    args.push(manifest_url.to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|arg| arg == flag)
            .and_then(|idx| args.get(idx + 1))
            .map(String::as_str)
    }

    #[test]
    fn carries_fixed_option_set() {
        let args = build_helper_args(
            &DownloadSection::default(),
            Path::new("/usr/bin/ffmpeg"),
            "https://cdn.example/a.m3u8",
            Path::new("/tmp/s/mxplayer_video_1.mp4"),
        );
        for flag in [
            "--newline",
            "--no-warnings",
            "--no-part",
            "--force-generic-extractor",
            "--no-check-certificate",
        ] {
            assert!(args.iter().any(|arg| arg == flag), "missing {flag}");
        }
        assert_eq!(value_after(&args, "--ffmpeg-location"), Some("/usr/bin/ffmpeg"));
        assert_eq!(value_after(&args, "--retries"), Some("3"));
        assert_eq!(value_after(&args, "--limit-rate"), Some("2M"));
        assert_eq!(value_after(&args, "--buffer-size"), Some("16K"));
        assert_eq!(value_after(&args, "-o"), Some("/tmp/s/mxplayer_video_1.mp4"));
        assert_eq!(args.last().map(String::as_str), Some("https://cdn.example/a.m3u8"));
    }

    #[test]
    fn optional_limits_can_be_disabled() {
        let section = DownloadSection {
            limit_rate: None,
            buffer_size: Some(String::new()),
            ..DownloadSection::default()
        };
        let args = build_helper_args(
            &section,
            Path::new("ffmpeg"),
            "https://cdn.example/a.mpd",
            Path::new("out.mp4"),
        );
        assert!(!args.iter().any(|arg| arg == "--limit-rate"));
        assert!(!args.iter().any(|arg| arg == "--buffer-size"));
    }
}
